use std::rc::Rc;

use super::{Compiler, Result};
use crate::ast::{Node, NodeKind, RescueClause};
use crate::flow::{Flow, Unwind};

impl Compiler {
    /// ```text
    ///         push_exception          save the current exception
    /// retry:  body                    protected
    ///         goto escape
    /// handler:
    ///         cond; push_exception; send ===; goto_if_true clause_1
    ///         ...
    ///         reraise
    /// escape: [pop; else]
    /// done:   swap; pop_exception     restore the saved exception
    /// ```
    /// Clause bodies jump to `done` after clearing the exception.
    pub(super) fn rescue<'a>(
        &mut self,
        body: Option<&'a Node>,
        clauses: &'a [RescueClause],
        otherwise: Option<&'a Node>,
        flow: &Flow<'a>,
    ) -> Result<()> {
        let depth = self.b().stack_depth();
        let region = self.fresh_name("rescue");
        let retry = self.b().new_label();
        let escape = self.b().new_label();
        let done = self.b().new_label();

        self.b().push_exception();
        self.mark(retry)?;
        self.b().open_region(&region)?;
        let saved = flow.with_unwind(Unwind::SavedException { depth });
        self.emit_opt(body, &saved)?;
        self.b().goto(escape);

        self.b().mark_handler(&region)?;
        let handler_flow = saved.in_handler(saved.target(retry, depth + 1));
        for clause in clauses {
            let matched = self.b().new_label();
            let next_clause = self.b().new_label();
            self.b().set_line(clause.line);
            if clause.conditions.is_empty() {
                self.b().push_const("StandardError");
                self.b().push_exception();
                self.b().send("===", 1);
                self.b().goto_if_true(matched);
            }
            for cond in &clause.conditions {
                match &cond.kind {
                    NodeKind::Splat(list) => {
                        self.emit(list, flow)?;
                        self.b().cast_array();
                        self.b().push_exception();
                        self.b().send("__rescue_match__", 1);
                    }
                    _ => {
                        self.emit(cond, flow)?;
                        self.b().push_exception();
                        self.b().send("===", 1);
                    }
                }
                self.b().goto_if_true(matched);
            }
            self.b().goto(next_clause);

            self.mark(matched)?;
            if let Some(name) = &clause.assign {
                self.b().push_exception();
                let r = self.scopes.resolve_assign(name);
                self.b().set_local(r.slot, r.depth);
                self.b().pop();
            }
            self.emit_opt(clause.body.as_deref(), &handler_flow)?;
            self.b().clear_exception();
            self.b().goto(done);
            self.mark(next_clause)?;
        }
        self.b().reraise();
        self.b().close_region(&region)?;

        self.mark(escape)?;
        if let Some(otherwise) = otherwise {
            self.b().pop();
            self.emit(otherwise, &saved)?;
        }
        self.mark(done)?;
        self.b().swap();
        self.b().pop_exception();
        Ok(())
    }

    /// ```text
    ///         body                    protected
    ///         goto ok
    /// handler:
    ///         push_exception; ensure; pop; pop_exception; reraise
    /// ok:     ensure; pop
    /// ```
    /// Jumps out of the body run the ensure code inline on their way.
    pub(super) fn ensure<'a>(
        &mut self,
        body: Option<&'a Node>,
        ensure: Option<&'a Node>,
        flow: &Flow<'a>,
    ) -> Result<()> {
        let Some(ensure) = ensure else {
            return self.emit_opt(body, flow);
        };
        let depth = self.b().stack_depth();
        let region = self.fresh_name("ensure");
        let ok = self.b().new_label();

        self.b().open_region(&region)?;
        let inner = flow.with_unwind(Unwind::Ensure {
            body: Some(ensure),
            region: Rc::from(region.as_str()),
            outer: Rc::new(flow.clone()),
            depth,
        });
        self.emit_opt(body, &inner)?;
        self.b().goto(ok);

        self.b().mark_handler(&region)?;
        self.b().push_exception();
        self.emit(ensure, flow)?;
        self.b().pop();
        self.b().pop_exception();
        self.b().reraise();
        self.b().close_region(&region)?;

        self.mark(ok)?;
        self.emit(ensure, flow)?;
        self.b().pop();
        Ok(())
    }
}
