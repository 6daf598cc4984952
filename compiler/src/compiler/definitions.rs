use bytecode::{CompiledMethod, MethodKind};

use super::{Compiler, MethodContext, Result};
use crate::ast::{ConstPath, FormalArgs, Node, NodeKind};
use crate::error::CompileError;
use crate::flow::Flow;

impl Compiler {
    /// Compile a `def` body into its own method.
    pub(super) fn method_unit(
        &mut self,
        line: u32,
        name: &str,
        args: &FormalArgs,
        body: Option<&Node>,
    ) -> Result<CompiledMethod> {
        let context = MethodContext::method(name, args);
        self.nested(MethodKind::Method, name, line, context, |c| {
            c.formal_args(line, args)?;
            c.emit_opt(body, &Flow::default())?;
            c.b().ret();
            Ok(())
        })
    }

    /// Compile a block literal. Blocks see the locals of the scopes around
    /// them, and `super` and `__METHOD__` keep meaning the enclosing method.
    pub(super) fn block_unit(
        &mut self,
        line: u32,
        args: &FormalArgs,
        body: Option<&Node>,
    ) -> Result<CompiledMethod> {
        let context = self.unit.context.clone();
        self.nested(MethodKind::Block, "__block__", line, context, |c| {
            c.formal_args(line, args)?;
            let top = c.b().new_label();
            c.mark(top)?;
            c.emit_opt(body, &Flow::block(top))?;
            c.b().ret();
            Ok(())
        })
    }

    /// `for var in iter`: `iter.each` with a block whose one hidden
    /// argument is assigned to `var`. Unlike a block literal, the loop
    /// variables belong to the enclosing scope.
    pub(super) fn for_loop<'a>(
        &mut self,
        line: u32,
        iter: &'a Node,
        var: &'a Node,
        body: Option<&'a Node>,
        flow: &Flow<'a>,
    ) -> Result<()> {
        let mut names = Vec::new();
        assigned_locals(var, &mut names);
        for name in names {
            self.scopes.resolve_assign(name);
        }
        self.emit(iter, flow)?;

        let param = self.fresh_name("%for");
        let args = FormalArgs::required(line, &[param.as_str()])?;
        let context = self.unit.context.clone();
        let block = self.nested(MethodKind::Block, "__for__", line, context, |c| {
            c.formal_args(line, &args)?;
            let slot = c.scopes.lookup(&param).slot;
            let top = c.b().new_label();
            let inner = Flow::block(top);
            c.b().push_local(slot, 0);
            c.emit(var, &inner)?;
            c.b().pop();
            c.mark(top)?;
            c.emit_opt(body, &inner)?;
            c.b().ret();
            Ok(())
        })?;
        self.b().create_block(block);
        self.b().send_with_block("each", 0);
        Ok(())
    }

    /// Declare the parameters in slot order, then fill in defaults for
    /// optional arguments the caller did not pass.
    fn formal_args(&mut self, line: u32, args: &FormalArgs) -> Result<()> {
        let scope = self.scopes.current_mut();
        for name in &args.required {
            scope.declare_parameter(name, true);
        }
        for name in args.optional_names() {
            scope.declare_parameter(name, false);
        }
        let splat = args
            .splat
            .as_deref()
            .map(|name| scope.declare_parameter(name, false));
        let block = args
            .block
            .as_deref()
            .map(|name| scope.declare_parameter(name, false));

        self.unit.info.required_args = args.required_count();
        self.unit.info.total_args = args.total_count();
        self.unit.info.splat_index = splat;

        let flow = Flow::default();
        for default in &args.optional {
            let NodeKind::LocalAssign {
                name,
                value: Some(_),
            } = &default.kind
            else {
                return Err(CompileError::malformed(
                    line,
                    "optional argument default must assign the argument",
                ));
            };
            let slot = self.scopes.lookup(name).slot;
            let passed = self.b().new_label();
            self.b().passed_arg(slot);
            self.b().goto_if_true(passed);
            self.emit(default, &flow)?;
            self.b().pop();
            self.mark(passed)?;
        }

        if let Some(slot) = block {
            self.b().push_block();
            self.b().set_local(slot, 0);
            self.b().pop();
        }
        Ok(())
    }

    /// Push the module a class or module is opened under.
    fn enclosing<'a>(&mut self, path: &'a ConstPath, flow: &Flow<'a>) -> Result<()> {
        match path {
            ConstPath::Name(_) => self.b().push_scope(),
            ConstPath::Scoped(scope, _) => self.emit(scope, flow)?,
            ConstPath::Top(_) => self.b().push_cpath_top(),
        }
        Ok(())
    }

    /// `superclass enclosing -> class`, then run the body with the class
    /// as self.
    pub(super) fn class<'a>(
        &mut self,
        line: u32,
        path: &'a ConstPath,
        superclass: Option<&'a Node>,
        body: Option<&'a Node>,
        flow: &Flow<'a>,
    ) -> Result<()> {
        self.emit_opt(superclass, flow)?;
        self.enclosing(path, flow)?;
        self.b().open_class(path.name());
        self.module_body(line, &format!("<class:{}>", path.name()), body)
    }

    pub(super) fn module<'a>(
        &mut self,
        line: u32,
        path: &'a ConstPath,
        body: Option<&'a Node>,
        flow: &Flow<'a>,
    ) -> Result<()> {
        self.enclosing(path, flow)?;
        self.b().open_module(path.name());
        self.module_body(line, &format!("<module:{}>", path.name()), body)
    }

    /// `class << receiver`
    pub(super) fn singleton_class<'a>(
        &mut self,
        line: u32,
        receiver: &'a Node,
        body: Option<&'a Node>,
        flow: &Flow<'a>,
    ) -> Result<()> {
        self.emit(receiver, flow)?;
        self.b().open_metaclass();
        self.module_body(line, "<singleton class>", body)
    }

    /// Replace the opened module on the stack with the body's value, or
    /// with nil when there is no body.
    fn module_body(&mut self, line: u32, name: &str, body: Option<&Node>) -> Result<()> {
        let Some(body) = body else {
            self.b().pop();
            self.b().push_nil();
            return Ok(());
        };
        let compiled = self.nested(MethodKind::Body, name, line, MethodContext::default(), |c| {
            c.emit(body, &Flow::default())?;
            c.b().ret();
            Ok(())
        })?;
        self.b().run_body(compiled);
        Ok(())
    }

    /// `defined?(expr)`: a description string, or nil. Nothing in `expr`
    /// is evaluated except the receiver or scope a test needs.
    pub(super) fn defined<'a>(&mut self, expr: &'a Node, flow: &Flow<'a>) -> Result<()> {
        match &expr.kind {
            NodeKind::LocalVar(name) => {
                if self.scopes.resolve(name, false).is_some() {
                    self.b().push_string("local-variable");
                } else {
                    self.b().push_nil();
                }
            }
            NodeKind::IVar(name) => {
                self.b().push_self();
                self.b().push_symbol(name);
                self.b().send("instance_variable_defined?", 1);
                self.describe_if("instance-variable")?;
            }
            NodeKind::GVar(name) => {
                self.b().push_self();
                self.b().push_symbol(name);
                self.b().send("global_variable_defined?", 1);
                self.describe_if("global-variable")?;
            }
            NodeKind::CVar(name) => {
                self.b().push_scope();
                self.b().push_symbol(name);
                self.b().send("class_variable_defined?", 1);
                self.describe_if("class variable")?;
            }
            NodeKind::Const(name) => {
                self.b().push_scope();
                self.b().push_symbol(name);
                self.b().send("const_defined?", 1);
                self.describe_if("constant")?;
            }
            NodeKind::ScopedConst { scope, name } => {
                self.emit(scope, flow)?;
                self.b().push_symbol(name);
                self.b().send("const_defined?", 1);
                self.describe_if("constant")?;
            }
            NodeKind::TopConst(name) => {
                self.b().push_cpath_top();
                self.b().push_symbol(name);
                self.b().send("const_defined?", 1);
                self.describe_if("constant")?;
            }
            NodeKind::Call { receiver, name, .. } => {
                match receiver {
                    Some(r) => {
                        self.emit(r, flow)?;
                        self.b().push_symbol(name);
                        self.b().send("respond_to?", 1);
                    }
                    None => {
                        // private methods count for a functional call
                        self.b().push_self();
                        self.b().push_symbol(name);
                        self.b().push_true();
                        self.b().send("respond_to?", 2);
                    }
                }
                self.describe_if("method")?;
            }
            NodeKind::Yield(_) => {
                self.b().push_block();
                self.b().is_nil();
                self.b().push_false();
                self.b().send("==", 1);
                self.describe_if("yield")?;
            }
            NodeKind::Super { .. } | NodeKind::ZSuper { .. } => {
                self.b().push_string("super");
            }
            NodeKind::SelfRef => self.b().push_string("self"),
            NodeKind::Nil => self.b().push_string("nil"),
            NodeKind::True => self.b().push_string("true"),
            NodeKind::False => self.b().push_string("false"),
            NodeKind::OrAssign(_)
            | NodeKind::AndAssign(_)
            | NodeKind::IndexOpAssign { .. }
            | NodeKind::AttrOpAssign { .. }
            | NodeKind::MultipleAssign { .. } => {
                self.b().push_string("assignment");
            }
            _ if expr.is_assignment() => self.b().push_string("assignment"),
            _ => self.b().push_string("expression"),
        }
        Ok(())
    }

    /// Turn the boolean on the stack into `what` or nil.
    fn describe_if(&mut self, what: &str) -> Result<()> {
        let missing = self.b().new_label();
        let done = self.b().new_label();
        self.b().goto_if_false(missing);
        self.b().push_string(what);
        self.b().goto(done);
        self.mark(missing)?;
        self.b().push_nil();
        self.mark(done)
    }
}

/// Local names a `for` target assigns, nested destructuring included.
fn assigned_locals<'n>(target: &'n Node, names: &mut Vec<&'n str>) {
    match &target.kind {
        NodeKind::LocalAssign { name, .. } => names.push(name),
        NodeKind::MultipleAssign { targets, splat, .. } => {
            for t in targets.iter().chain(splat.as_deref()) {
                assigned_locals(t, names);
            }
        }
        _ => {}
    }
}
