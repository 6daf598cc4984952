//! The emission walk: one depth-first pass over the tree per unit.

mod calls;
mod control;
mod definitions;
mod exceptions;
mod literals;
mod variables;

use std::mem;

use bytecode::{BytecodeBuilder, CompiledMethod, Label, MethodInfo, MethodKind};
use log::debug;

use crate::CompileOptions;
use crate::ast::{FormalArgs, Node, NodeKind};
use crate::error::CompileError;
use crate::flow::{Flow, Unwind};
use crate::scope::{ScopeKind, ScopeStack};

type Result<T> = std::result::Result<T, CompileError>;

/// What `super` and `__METHOD__` refer to inside a unit.
#[derive(Debug, Clone, Default)]
struct MethodContext {
    name: Option<String>,
    /// Required and optional argument names, in order.
    args: Vec<String>,
    splat: Option<String>,
}

impl MethodContext {
    fn method(name: &str, args: &FormalArgs) -> Self {
        Self {
            name: Some(name.to_string()),
            args: args
                .required
                .iter()
                .map(String::as_str)
                .chain(args.optional_names())
                .map(str::to_string)
                .collect(),
            splat: args.splat.clone(),
        }
    }
}

/// The unit currently being emitted.
struct Unit {
    builder: BytecodeBuilder,
    info: MethodInfo,
    context: MethodContext,
}

impl Unit {
    fn new(
        kind: MethodKind,
        name: &str,
        file: &str,
        line: u32,
        context: MethodContext,
    ) -> Self {
        let mut info = MethodInfo::new(name, kind);
        info.file = file.to_string();
        Self {
            builder: BytecodeBuilder::new(line),
            info,
            context,
        }
    }

    fn finish(mut self, local_names: Vec<String>) -> Result<CompiledMethod> {
        self.info.local_names = local_names;
        let name = self.info.name.clone();
        let kind = self.info.kind;
        let method = self.builder.finish(self.info)?;
        debug!(
            "compiled {kind} `{name}`: {} bytes, {} locals",
            method.bytecode.len(),
            method.local_count
        );
        Ok(method)
    }
}

/// Compiles a tree into [`CompiledMethod`]s.
///
/// Nested methods, blocks and class bodies become their own units; the
/// walk swaps the unit being emitted and pushes a scope for it, then
/// stores the finished child in the parent's literal pool.
pub struct Compiler {
    unit: Unit,
    scopes: ScopeStack,
    file: String,
    fresh: u32,
}

impl Compiler {
    fn new(options: &CompileOptions) -> Self {
        Self {
            unit: Unit::new(
                MethodKind::Script,
                &options.name,
                &options.file,
                options.first_line,
                MethodContext::default(),
            ),
            scopes: ScopeStack::new(ScopeKind::Script),
            file: options.file.clone(),
            fresh: 0,
        }
    }

    /// Compile the top level of a file. `root` is usually a
    /// [`NodeKind::Script`]; any other node is taken as the script body.
    /// The script evaluates to `true`.
    pub fn compile_script(
        root: &Node,
        options: &CompileOptions,
    ) -> Result<CompiledMethod> {
        debug!("compiling script `{}` ({})", options.name, options.file);
        let mut c = Compiler::new(options);
        let flow = Flow::default();
        match &root.kind {
            NodeKind::Script(body) => c.emit_opt(body.as_deref(), &flow)?,
            _ => c.emit(root, &flow)?,
        }
        c.b().pop();
        c.b().push_true();
        c.b().ret();
        let locals = c.scopes.current().clone().finalize();
        c.unit.finish(locals)
    }

    /// Compile a single `def` into the method it defines.
    pub fn compile_method(
        def: &Node,
        options: &CompileOptions,
    ) -> Result<CompiledMethod> {
        let mut c = Compiler::new(options);
        match &def.kind {
            NodeKind::Def { name, args, body }
            | NodeKind::DefSingleton {
                name, args, body, ..
            } => c.method_unit(def.line, name, args, body.as_deref()),
            _ => Err(CompileError::malformed(def.line, "expected a method definition")),
        }
    }

    fn b(&mut self) -> &mut BytecodeBuilder {
        &mut self.unit.builder
    }

    fn mark(&mut self, label: Label) -> Result<()> {
        self.unit.builder.mark_label(label)?;
        Ok(())
    }

    /// A name no source identifier can collide with.
    fn fresh_name(&mut self, prefix: &str) -> String {
        self.fresh += 1;
        format!("{prefix}{}", self.fresh)
    }

    /// Run `body` against a fresh unit and scope, then hand back the
    /// finished child. The parent unit is restored even when `body` fails.
    fn nested<F>(
        &mut self,
        kind: MethodKind,
        name: &str,
        line: u32,
        context: MethodContext,
        body: F,
    ) -> Result<CompiledMethod>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        debug!("compiling {kind} `{name}` at line {line}");
        let unit = Unit::new(kind, name, &self.file, line, context);
        let parent = mem::replace(&mut self.unit, unit);
        self.scopes.push(match kind {
            MethodKind::Script => ScopeKind::Script,
            MethodKind::Method => ScopeKind::Method,
            MethodKind::Block => ScopeKind::Block,
            MethodKind::Body => ScopeKind::Body,
        });
        let result = body(self);
        let scope = self.scopes.pop();
        let child = mem::replace(&mut self.unit, parent);
        result?;
        child.finish(scope.map(|s| s.finalize()).unwrap_or_default())
    }

    /// Emit `node`, or `nil` when it is absent.
    fn emit_opt<'a>(&mut self, node: Option<&'a Node>, flow: &Flow<'a>) -> Result<()> {
        match node {
            Some(node) => self.emit(node, flow),
            None => {
                self.b().push_nil();
                Ok(())
            }
        }
    }

    /// Emit `node`, leaving its value on the stack. Assignment targets
    /// without a value consume the value already there and leave it.
    fn emit<'a>(&mut self, node: &'a Node, flow: &Flow<'a>) -> Result<()> {
        if node.line > 0 {
            self.b().set_line(node.line);
        }
        let line = node.line;
        match &node.kind {
            NodeKind::Nil => self.b().push_nil(),
            NodeKind::True => self.b().push_true(),
            NodeKind::False => self.b().push_false(),
            NodeKind::SelfRef => self.b().push_self(),
            NodeKind::Integer(_)
            | NodeKind::BigInteger(_)
            | NodeKind::Float(_)
            | NodeKind::Str(_)
            | NodeKind::Symbol(_)
            | NodeKind::Regex { .. } => self.constant_literal(&node.kind),
            NodeKind::DynamicString(parts) => self.dynamic_string(parts, flow)?,
            NodeKind::DynamicSymbol(parts) => {
                self.dynamic_string(parts, flow)?;
                self.b().send("to_sym", 0);
            }
            NodeKind::DynamicRegex { parts, flags, once } => {
                self.dynamic_regex(parts, *flags, *once, flow)?
            }
            NodeKind::ExecuteString(text) => self.execute_string(None, text, flow)?,
            NodeKind::DynamicExecuteString(parts) => {
                self.execute_string(Some(parts), "", flow)?
            }
            NodeKind::File => {
                let file = self.file.clone();
                self.b().push_string(&file);
            }
            NodeKind::Array(elements) => self.array(elements, flow)?,
            NodeKind::Hash(pairs) => self.hash(pairs, flow)?,
            NodeKind::Range {
                first,
                last,
                exclusive,
            } => self.range(first, last, *exclusive, flow)?,

            NodeKind::LocalVar(name) => self.local_var(name),
            NodeKind::LocalAssign { name, value } => {
                self.local_assign(name, value.as_deref(), flow)?
            }
            NodeKind::IVar(name) => self.b().push_ivar(name),
            NodeKind::IVarAssign { name, value } => {
                self.emit_value(value.as_deref(), flow)?;
                self.b().set_ivar(name);
            }
            NodeKind::GVar(name) => self.b().push_global(name),
            NodeKind::GVarAssign { name, value } => {
                self.emit_value(value.as_deref(), flow)?;
                self.b().set_global(name);
            }
            NodeKind::BackRef(kind) => self.back_ref(*kind)?,
            NodeKind::NthRef(group) => self.nth_ref(*group),
            NodeKind::CVar(name) => self.class_var(name),
            NodeKind::CVarAssign { name, value } => {
                self.class_var_assign(name, value.as_deref(), flow)?
            }
            NodeKind::Const(name) => self.b().push_const(name),
            NodeKind::ScopedConst { scope, name } => {
                self.emit(scope, flow)?;
                self.b().find_const(name);
            }
            NodeKind::TopConst(name) => {
                self.b().push_cpath_top();
                self.b().find_const(name);
            }
            NodeKind::ConstAssign { path, value } => {
                self.const_assign(path, value.as_deref(), flow)?
            }

            NodeKind::And(l, r) => self.short_circuit(l, r, false, flow)?,
            NodeKind::Or(l, r) => self.short_circuit(l, r, true, flow)?,
            NodeKind::Not(e) => self.not(e, flow)?,
            NodeKind::OrAssign(assign) => self.op_assign(assign, true, flow)?,
            NodeKind::AndAssign(assign) => self.op_assign(assign, false, flow)?,
            NodeKind::IndexOpAssign {
                receiver,
                args,
                op,
                value,
            } => self.call_op_assign(receiver, "[]=", args, op, value, flow)?,
            NodeKind::AttrOpAssign {
                receiver,
                name,
                op,
                value,
            } => {
                let writer = format!("{name}=");
                self.call_op_assign(receiver, &writer, &[], op, value, flow)?
            }
            NodeKind::Match {
                pattern,
                value,
                pattern_first,
            } => self.regex_match(pattern, value, *pattern_first, flow)?,
            NodeKind::LastLineMatch(pattern) => self.last_line_match(pattern, flow)?,
            NodeKind::FlipFlop {
                start,
                finish,
                exclusive,
            } => self.flip_flop(start, finish, *exclusive, flow)?,

            NodeKind::If {
                cond,
                then,
                otherwise,
            } => self.if_else(cond, then.as_deref(), otherwise.as_deref(), flow)?,
            NodeKind::While {
                cond,
                body,
                check_first,
                until,
            } => {
                if *check_first {
                    self.while_first(cond, body.as_deref(), *until, flow)?
                } else {
                    self.while_last(cond, body.as_deref(), *until, flow)?
                }
            }
            NodeKind::Loop(body) => self.endless_loop(body.as_deref(), flow)?,
            NodeKind::For { iter, var, body } => {
                self.for_loop(line, iter, var, body.as_deref(), flow)?
            }
            NodeKind::Case {
                receiver: Some(receiver),
                whens,
                otherwise,
            } => self.case_receiver(receiver, whens, otherwise.as_deref(), flow)?,
            NodeKind::Case {
                receiver: None,
                whens,
                otherwise,
            } => self.case_conditions(whens, otherwise.as_deref(), flow)?,
            NodeKind::Block(statements) => self.sequence(statements, flow)?,

            NodeKind::Begin(body) => self.emit(body, flow)?,
            NodeKind::Rescue {
                body,
                clauses,
                otherwise,
            } => self.rescue(body.as_deref(), clauses, otherwise.as_deref(), flow)?,
            NodeKind::Ensure { body, ensure } => {
                self.ensure(body.as_deref(), ensure.as_deref(), flow)?
            }

            NodeKind::Return(value) => self.return_(line, value.as_deref(), flow)?,
            NodeKind::Break(value) => self.break_(line, value.as_deref(), flow)?,
            NodeKind::Next(value) => self.next(line, value.as_deref(), flow)?,
            NodeKind::Redo => self.redo(line, flow)?,
            NodeKind::Retry => self.retry(line, flow)?,

            NodeKind::Call {
                receiver,
                name,
                args,
                block,
            } => self.call(line, receiver.as_deref(), name, args, block.as_deref(), flow)?,
            NodeKind::Yield(args) => self.yield_(line, args, flow)?,
            NodeKind::Super { args, block } => {
                self.super_(line, args, block.as_deref(), flow)?
            }
            NodeKind::ZSuper { block } => self.zsuper(line, block.as_deref(), flow)?,
            NodeKind::AttrAssign {
                receiver,
                name,
                args,
                value,
            } => self.attr_assign(line, receiver, name, args, value.as_deref(), flow)?,
            NodeKind::MultipleAssign {
                targets,
                splat,
                value,
            } => self.multiple_assign(targets, splat.as_deref(), value.as_deref(), flow)?,

            NodeKind::Def { name, args, body } => {
                let method = self.method_unit(line, name, args, body.as_deref())?;
                self.b().push_scope();
                self.b().attach_method(name, method);
            }
            NodeKind::DefSingleton {
                receiver,
                name,
                args,
                body,
            } => {
                self.emit(receiver, flow)?;
                self.b().open_metaclass();
                let method = self.method_unit(line, name, args, body.as_deref())?;
                self.b().attach_method(name, method);
            }
            NodeKind::Class {
                path,
                superclass,
                body,
            } => self.class(line, path, superclass.as_deref(), body.as_deref(), flow)?,
            NodeKind::Module { path, body } => {
                self.module(line, path, body.as_deref(), flow)?
            }
            NodeKind::SingletonClass { receiver, body } => {
                self.singleton_class(line, receiver, body.as_deref(), flow)?
            }
            NodeKind::Alias { new, old } => {
                self.b().push_scope();
                self.b().push_symbol(new);
                self.b().push_symbol(old);
                self.b().send("alias_method", 2);
            }
            NodeKind::GlobalAlias { new, old } => {
                self.b().push_self();
                self.b().push_symbol(new);
                self.b().push_symbol(old);
                self.b().send("alias_global_variable", 2);
            }
            NodeKind::Undef(name) => {
                self.b().push_scope();
                self.b().push_symbol(name);
                self.b().send("undef_method", 1);
            }
            NodeKind::Defined(expr) => self.defined(expr, flow)?,

            NodeKind::Script(_) => {
                return Err(CompileError::malformed(line, "nested script"));
            }
            NodeKind::Splat(_) => {
                return Err(CompileError::malformed(
                    line,
                    "splat outside of a call, array or condition",
                ));
            }
            NodeKind::BlockPass(_) | NodeKind::Iter { .. } => {
                return Err(CompileError::malformed(line, "block outside of a call"));
            }
        }
        Ok(())
    }

    /// The value of an assignment: its own, or the one on the stack.
    fn emit_value<'a>(&mut self, value: Option<&'a Node>, flow: &Flow<'a>) -> Result<()> {
        match value {
            Some(v) => self.emit(v, flow),
            None => Ok(()),
        }
    }

    // ── unwinding ──────────────────────────────────────────────────

    /// Drop stack values above `level`. With `carrying`, the top value is
    /// kept and the ones under it are dropped.
    fn pop_to(&mut self, level: u32, carrying: bool) {
        let carried = u32::from(carrying);
        while self.b().stack_depth() > level + carried {
            if carrying {
                self.b().swap();
            }
            self.b().pop();
        }
    }

    /// Undo the unwind entries past `keep`, innermost first.
    fn unwind<'a>(&mut self, flow: &Flow<'a>, keep: usize, carrying: bool) -> Result<()> {
        for entry in flow.unwind.iter().skip(keep).rev() {
            match entry {
                Unwind::Ensure {
                    body,
                    region,
                    outer,
                    depth,
                } => {
                    self.pop_to(*depth, carrying);
                    if let Some(body) = body {
                        let suspended = self.b().suspend_regions(region)?;
                        self.emit(body, outer)?;
                        self.b().pop();
                        self.b().resume_regions(suspended)?;
                    }
                }
                Unwind::SavedException { depth } => {
                    self.pop_to(depth + 1, carrying);
                    if carrying {
                        self.b().swap();
                    }
                    self.b().pop_exception();
                }
            }
        }
        Ok(())
    }
}
