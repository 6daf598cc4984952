use std::iter;

use super::{Compiler, Result};
use crate::ast::{ConstPath, Node, NodeKind};
use crate::error::CompileError;
use crate::flow::Flow;

/// How the old value of an operator assignment meets the new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Combine<'n> {
    Or,
    And,
    Send(&'n str),
}

impl<'n> Combine<'n> {
    pub(super) fn from_operator(op: &'n str) -> Self {
        match op {
            "||" => Combine::Or,
            "&&" => Combine::And,
            _ => Combine::Send(op),
        }
    }
}

impl Compiler {
    pub(super) fn local_var(&mut self, name: &str) {
        let r = self.scopes.lookup(name);
        self.b().push_local(r.slot, r.depth);
    }

    pub(super) fn local_assign<'a>(
        &mut self,
        name: &str,
        value: Option<&'a Node>,
        flow: &Flow<'a>,
    ) -> Result<()> {
        self.emit_value(value, flow)?;
        let r = self.scopes.resolve_assign(name);
        self.b().set_local(r.slot, r.depth);
        Ok(())
    }

    pub(super) fn class_var(&mut self, name: &str) {
        self.b().push_scope();
        self.b().push_symbol(name);
        self.b().send("class_variable_get", 1);
    }

    pub(super) fn class_var_assign<'a>(
        &mut self,
        name: &str,
        value: Option<&'a Node>,
        flow: &Flow<'a>,
    ) -> Result<()> {
        self.emit_value(value, flow)?;
        // value scope -> scope name value
        self.b().push_scope();
        self.b().swap();
        self.b().push_symbol(name);
        self.b().swap();
        self.b().send("class_variable_set", 2);
        Ok(())
    }

    pub(super) fn const_assign<'a>(
        &mut self,
        path: &'a ConstPath,
        value: Option<&'a Node>,
        flow: &Flow<'a>,
    ) -> Result<()> {
        match path {
            ConstPath::Name(name) => {
                self.emit_value(value, flow)?;
                self.b().set_const(name);
            }
            ConstPath::Scoped(_, name) | ConstPath::Top(name) => {
                match path {
                    ConstPath::Scoped(scope, _) => self.emit(scope, flow)?,
                    _ => self.b().push_cpath_top(),
                }
                // module value
                match value {
                    Some(v) => self.emit(v, flow)?,
                    None => self.b().swap(),
                }
                self.b().set_const_at(name);
            }
        }
        Ok(())
    }

    /// `a ||= v` and `a &&= v`: read, test, and only assign when the test
    /// falls through.
    pub(super) fn op_assign<'a>(
        &mut self,
        assign: &'a Node,
        or: bool,
        flow: &Flow<'a>,
    ) -> Result<()> {
        if let NodeKind::AttrAssign {
            receiver,
            name,
            args,
            value: Some(value),
        } = &assign.kind
        {
            let combine = if or { Combine::Or } else { Combine::And };
            return self.attr_op_assign(receiver, name, args, value, combine, flow);
        }
        self.current_value(assign, flow)?;
        let done = self.b().new_label();
        self.b().dup();
        if or {
            self.b().goto_if_true(done);
        } else {
            self.b().goto_if_false(done);
        }
        self.b().pop();
        self.emit(assign, flow)?;
        self.mark(done)
    }

    fn current_value<'a>(&mut self, assign: &'a Node, flow: &Flow<'a>) -> Result<()> {
        match &assign.kind {
            NodeKind::LocalAssign { name, .. } => self.local_var(name),
            NodeKind::IVarAssign { name, .. } => self.b().push_ivar(name),
            NodeKind::GVarAssign { name, .. } => self.b().push_global(name),
            NodeKind::CVarAssign { name, .. } => self.class_var(name),
            NodeKind::ConstAssign { path, .. } => match path {
                ConstPath::Name(name) => self.b().push_const(name),
                ConstPath::Scoped(scope, name) => {
                    self.emit(scope, flow)?;
                    self.b().find_const(name);
                }
                ConstPath::Top(name) => {
                    self.b().push_cpath_top();
                    self.b().find_const(name);
                }
            },
            _ => {
                return Err(CompileError::malformed(
                    assign.line,
                    "operator assignment target cannot be read",
                ));
            }
        }
        Ok(())
    }

    /// `recv.attr op= v` and `recv[i] op= v`. The receiver and index
    /// arguments are evaluated once into hidden locals. `||` and `&&` skip
    /// the write when the test says so; any other operator is sent to the
    /// old value and always written back.
    pub(super) fn attr_op_assign<'a>(
        &mut self,
        receiver: &'a Node,
        name: &str,
        args: &'a [Node],
        value: &'a Node,
        combine: Combine<'_>,
        flow: &Flow<'a>,
    ) -> Result<()> {
        let mut temps = Vec::with_capacity(args.len() + 1);
        for node in iter::once(receiver).chain(args) {
            self.emit(node, flow)?;
            let temp = self.fresh_name("%op");
            let slot = self.scopes.current_mut().declare(&temp);
            self.b().set_local(slot, 0);
            self.b().pop();
            temps.push(slot);
        }
        let argc = args.len() as u32;
        let reader = name.strip_suffix('=').unwrap_or(name);
        let done = self.b().new_label();

        for &slot in &temps {
            self.b().push_local(slot, 0);
        }
        if let Combine::Send(op) = combine {
            // writer args, then the old value combined with the new one
            for &slot in &temps {
                self.b().push_local(slot, 0);
            }
            for &slot in &temps {
                self.b().push_local(slot, 0);
            }
            self.b().send(reader, argc);
            self.emit(value, flow)?;
            self.b().send(op, 1);
        } else {
            self.b().send(reader, argc);
            self.b().dup();
            if combine == Combine::Or {
                self.b().goto_if_true(done);
            } else {
                self.b().goto_if_false(done);
            }
            self.b().pop();

            for &slot in &temps {
                self.b().push_local(slot, 0);
            }
            self.emit(value, flow)?;
        }
        self.b().dup();
        self.b().move_down(argc + 2);
        self.b().send(name, argc + 1);
        self.b().pop();
        self.mark(done)
    }

    /// `recv[args] op= value` and `recv.name op= value`.
    pub(super) fn call_op_assign<'a>(
        &mut self,
        receiver: &'a Node,
        writer: &str,
        args: &'a [Node],
        op: &str,
        value: &'a Node,
        flow: &Flow<'a>,
    ) -> Result<()> {
        let combine = Combine::from_operator(op);
        self.attr_op_assign(receiver, writer, args, value, combine, flow)
    }

    /// `a, (b, c), *d = value`. Leaves the right-hand side, cast to an
    /// array. Without a value the array is taken from the stack.
    pub(super) fn multiple_assign<'a>(
        &mut self,
        targets: &'a [Node],
        splat: Option<&'a Node>,
        value: Option<&'a Node>,
        flow: &Flow<'a>,
    ) -> Result<()> {
        self.emit_value(value, flow)?;
        self.b().cast_array();
        self.b().dup();
        for target in targets {
            if !target.is_target() {
                return Err(CompileError::malformed(
                    target.line,
                    "multiple assignment target is not assignable",
                ));
            }
            self.b().shift_array();
            self.emit(target, flow)?;
            self.b().pop();
        }
        if let Some(rest) = splat {
            if !rest.is_target() {
                return Err(CompileError::malformed(
                    rest.line,
                    "splat target is not assignable",
                ));
            }
            self.emit(rest, flow)?;
        }
        self.b().pop();
        Ok(())
    }
}
