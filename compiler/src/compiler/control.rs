use bytecode::{Label, MethodKind};

use super::{Compiler, Result};
use crate::ast::{Node, NodeKind, When};
use crate::error::CompileError;
use crate::flow::{Flow, Target};

impl Compiler {
    /// `l && r` / `l || r`: the left value is kept when it decides.
    pub(super) fn short_circuit<'a>(
        &mut self,
        left: &'a Node,
        right: &'a Node,
        or: bool,
        flow: &Flow<'a>,
    ) -> Result<()> {
        let done = self.b().new_label();
        self.emit(left, flow)?;
        self.b().dup();
        if or {
            self.b().goto_if_true(done);
        } else {
            self.b().goto_if_false(done);
        }
        self.b().pop();
        self.emit(right, flow)?;
        self.mark(done)
    }

    pub(super) fn not<'a>(&mut self, expr: &'a Node, flow: &Flow<'a>) -> Result<()> {
        let truthy = self.b().new_label();
        let done = self.b().new_label();
        self.emit(expr, flow)?;
        self.b().goto_if_false(truthy);
        self.b().push_false();
        self.b().goto(done);
        self.mark(truthy)?;
        self.b().push_true();
        self.mark(done)
    }

    /// A range used as a condition. Whether it is between `start` and
    /// `finish` is kept in a hidden local of the unit.
    pub(super) fn flip_flop<'a>(
        &mut self,
        start: &'a Node,
        finish: &'a Node,
        exclusive: bool,
        flow: &Flow<'a>,
    ) -> Result<()> {
        let name = self.fresh_name("%flip");
        let state = self.scopes.current_mut().declare(&name);
        let check_start = self.b().new_label();
        let stay = self.b().new_label();
        let hit = self.b().new_label();
        let miss = self.b().new_label();
        let done = self.b().new_label();

        self.b().push_local(state, 0);
        self.b().goto_if_false(check_start);
        self.emit(finish, flow)?;
        self.b().goto_if_false(stay);
        self.set_flag(state, false);
        self.mark(stay)?;
        self.b().push_true();
        self.b().goto(done);

        self.mark(check_start)?;
        self.emit(start, flow)?;
        self.b().goto_if_false(miss);
        if !exclusive {
            // `..` may end on the same test that started it
            self.emit(finish, flow)?;
            self.b().goto_if_true(hit);
        }
        self.set_flag(state, true);
        self.mark(hit)?;
        self.b().push_true();
        self.b().goto(done);

        self.mark(miss)?;
        self.b().push_false();
        self.mark(done)
    }

    fn set_flag(&mut self, slot: u32, on: bool) {
        if on {
            self.b().push_true();
        } else {
            self.b().push_false();
        }
        self.b().set_local(slot, 0);
        self.b().pop();
    }

    pub(super) fn if_else<'a>(
        &mut self,
        cond: &'a Node,
        then: Option<&'a Node>,
        otherwise: Option<&'a Node>,
        flow: &Flow<'a>,
    ) -> Result<()> {
        let else_label = self.b().new_label();
        let done = self.b().new_label();
        self.emit(cond, flow)?;
        self.b().goto_if_false(else_label);
        self.emit_opt(then, flow)?;
        self.b().goto(done);
        self.mark(else_label)?;
        self.emit_opt(otherwise, flow)?;
        self.mark(done)
    }

    /// ```text
    /// top:  cond; goto_if_false bottom
    /// redo: body; pop; check_interrupts; goto top
    /// bottom: push_nil
    /// post:
    /// ```
    /// `break` lands on `post` with its value, `next` on `top`. Both bind to
    /// this loop from the condition as well as from the body.
    pub(super) fn while_first<'a>(
        &mut self,
        cond: &'a Node,
        body: Option<&'a Node>,
        until: bool,
        flow: &Flow<'a>,
    ) -> Result<()> {
        let depth = self.b().stack_depth();
        let top = self.b().new_label();
        let redo = self.b().new_label();
        let bottom = self.b().new_label();
        let post = self.b().new_label();

        let inner = flow.in_loop(
            flow.target(post, depth),
            flow.target(top, depth),
            flow.target(redo, depth),
        );
        self.mark(top)?;
        self.emit(cond, &inner)?;
        self.branch_out(bottom, until);
        self.mark(redo)?;
        self.emit_opt(body, &inner)?;
        self.b().pop();
        self.b().check_interrupts();
        self.b().goto(top);

        self.mark(bottom)?;
        self.b().push_nil();
        self.mark(post)
    }

    /// `begin body end while cond`: the body runs once before the test.
    pub(super) fn while_last<'a>(
        &mut self,
        cond: &'a Node,
        body: Option<&'a Node>,
        until: bool,
        flow: &Flow<'a>,
    ) -> Result<()> {
        let depth = self.b().stack_depth();
        let top = self.b().new_label();
        let next = self.b().new_label();
        let bottom = self.b().new_label();
        let post = self.b().new_label();

        let inner = flow.in_loop(
            flow.target(post, depth),
            flow.target(next, depth),
            flow.target(top, depth),
        );
        self.mark(top)?;
        self.emit_opt(body, &inner)?;
        self.b().pop();

        self.mark(next)?;
        self.emit(cond, &inner)?;
        self.branch_out(bottom, until);
        self.b().check_interrupts();
        self.b().goto(top);

        self.mark(bottom)?;
        self.b().push_nil();
        self.mark(post)
    }

    /// Leave a `while` when the condition fails, an `until` when it holds.
    fn branch_out(&mut self, bottom: Label, until: bool) {
        if until {
            self.b().goto_if_true(bottom);
        } else {
            self.b().goto_if_false(bottom);
        }
    }

    /// `loop { body }`; only `break` leaves it.
    pub(super) fn endless_loop<'a>(&mut self, body: Option<&'a Node>, flow: &Flow<'a>) -> Result<()> {
        let depth = self.b().stack_depth();
        let top = self.b().new_label();
        let post = self.b().new_label();
        self.mark(top)?;
        let inner = flow.in_loop(
            flow.target(post, depth),
            flow.target(top, depth),
            flow.target(top, depth),
        );
        self.emit_opt(body, &inner)?;
        self.b().pop();
        self.b().check_interrupts();
        self.b().goto(top);
        self.mark(post)
    }

    /// `case x when a, *b then .. end`: each condition is tested with
    /// `cond === x`; splats use `__matches_when__`.
    pub(super) fn case_receiver<'a>(
        &mut self,
        receiver: &'a Node,
        whens: &'a [When],
        otherwise: Option<&'a Node>,
        flow: &Flow<'a>,
    ) -> Result<()> {
        let done = self.b().new_label();
        self.emit(receiver, flow)?;
        for when in whens {
            check_when(when)?;
            let body = self.b().new_label();
            let next = self.b().new_label();
            for cond in &when.conditions {
                self.b().dup();
                match &cond.kind {
                    NodeKind::Splat(list) => {
                        self.emit(list, flow)?;
                        self.b().cast_array();
                        self.b().swap();
                        self.b().send("__matches_when__", 1);
                    }
                    _ => {
                        self.emit(cond, flow)?;
                        self.b().swap();
                        self.b().send("===", 1);
                    }
                }
                self.b().goto_if_true(body);
            }
            self.b().goto(next);

            self.mark(body)?;
            self.b().set_line(when.line);
            self.b().pop();
            self.emit_opt(when.body.as_deref(), flow)?;
            self.b().goto(done);
            self.mark(next)?;
        }
        self.b().pop();
        self.emit_opt(otherwise, flow)?;
        self.mark(done)
    }

    /// `case when a then .. end`: conditions are plain truth tests.
    pub(super) fn case_conditions<'a>(
        &mut self,
        whens: &'a [When],
        otherwise: Option<&'a Node>,
        flow: &Flow<'a>,
    ) -> Result<()> {
        let done = self.b().new_label();
        for when in whens {
            check_when(when)?;
            let body = self.b().new_label();
            let next = self.b().new_label();
            for cond in &when.conditions {
                match &cond.kind {
                    NodeKind::Splat(list) => {
                        self.emit(list, flow)?;
                        self.b().cast_array();
                        self.b().send("any?", 0);
                    }
                    _ => self.emit(cond, flow)?,
                }
                self.b().goto_if_true(body);
            }
            self.b().goto(next);

            self.mark(body)?;
            self.b().set_line(when.line);
            self.emit_opt(when.body.as_deref(), flow)?;
            self.b().goto(done);
            self.mark(next)?;
        }
        self.emit_opt(otherwise, flow)?;
        self.mark(done)
    }

    /// Statements in order; every value but the last is dropped.
    pub(super) fn sequence<'a>(&mut self, statements: &'a [Node], flow: &Flow<'a>) -> Result<()> {
        let Some((last, init)) = statements.split_last() else {
            self.b().push_nil();
            return Ok(());
        };
        for statement in init {
            self.emit(statement, flow)?;
            self.b().pop();
        }
        self.emit(last, flow)
    }

    // ── jumps ──────────────────────────────────────────────────────

    /// Unwind to `target`, keeping the value on top when `carrying`, and
    /// jump there.
    fn jump_to<'a>(&mut self, target: Target, carrying: bool, flow: &Flow<'a>) -> Result<()> {
        self.unwind(flow, target.unwind, carrying)?;
        self.pop_to(target.depth, carrying);
        self.b().goto(target.label);
        Ok(())
    }

    /// Before a `ret` out of the unit: the exception a rescue clause is
    /// handling is done with, and every saved one is restored on the way.
    fn leave_unit<'a>(&mut self, flow: &Flow<'a>) -> Result<()> {
        if flow.in_rescue_handler {
            self.b().clear_exception();
        }
        self.unwind(flow, 0, true)
    }

    pub(super) fn return_<'a>(
        &mut self,
        _line: u32,
        value: Option<&'a Node>,
        flow: &Flow<'a>,
    ) -> Result<()> {
        self.emit_opt(value, flow)?;
        if self.unit.info.kind == MethodKind::Block {
            self.b().raise_return();
            return Ok(());
        }
        self.leave_unit(flow)?;
        self.b().ret();
        Ok(())
    }

    pub(super) fn break_<'a>(
        &mut self,
        line: u32,
        value: Option<&'a Node>,
        flow: &Flow<'a>,
    ) -> Result<()> {
        if let Some(target) = flow.break_to {
            self.emit_opt(value, flow)?;
            return self.jump_to(target, true, flow);
        }
        if flow.in_block {
            self.emit_opt(value, flow)?;
            self.b().raise_break();
            return Ok(());
        }
        Err(CompileError::InvalidControl {
            keyword: "break",
            line,
        })
    }

    pub(super) fn next<'a>(
        &mut self,
        line: u32,
        value: Option<&'a Node>,
        flow: &Flow<'a>,
    ) -> Result<()> {
        if let Some(target) = flow.next_to {
            self.emit_opt(value, flow)?;
            self.b().pop();
            return self.jump_to(target, false, flow);
        }
        if flow.in_block {
            self.emit_opt(value, flow)?;
            self.leave_unit(flow)?;
            self.b().ret();
            return Ok(());
        }
        Err(CompileError::InvalidControl {
            keyword: "next",
            line,
        })
    }

    pub(super) fn redo<'a>(&mut self, line: u32, flow: &Flow<'a>) -> Result<()> {
        let target = flow.redo_to.ok_or(CompileError::InvalidControl {
            keyword: "redo",
            line,
        })?;
        self.jump_to(target, false, flow)
    }

    pub(super) fn retry<'a>(&mut self, line: u32, flow: &Flow<'a>) -> Result<()> {
        let target = flow.retry_to.ok_or(CompileError::InvalidControl {
            keyword: "retry",
            line,
        })?;
        self.b().clear_exception();
        self.jump_to(target, false, flow)
    }
}

fn check_when(when: &When) -> Result<()> {
    if when.conditions.is_empty() {
        return Err(CompileError::malformed(when.line, "`when` without conditions"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use bytecode::{CompiledMethod, Op};

    use crate::CompileOptions;
    use crate::ast::{FormalArgs, Node, NodeKind, RescueClause, When};
    use crate::compiler::Compiler;
    use crate::error::CompileError;

    fn compile(body: Node) -> Result<CompiledMethod, CompileError> {
        Compiler::compile_script(&Node::script(1, Some(body)), &CompileOptions::default())
    }

    fn ops(m: &CompiledMethod) -> Vec<Op> {
        m.decode().unwrap().iter().map(|i| i.op).collect()
    }

    fn call(name: &str) -> Node {
        Node::call(1, None, name, vec![]).unwrap()
    }

    #[test]
    fn if_without_else_yields_nil() {
        let m = compile(Node::if_else(1, call("c"), Some(Node::int(1, 1)), None)).unwrap();
        assert_eq!(&ops(&m)[..6], &[
            Op::PushSelf,
            Op::SendMethod,
            Op::GotoIfFalse,
            Op::PushInt,
            Op::Goto,
            Op::PushNil,
        ]);
        assert_eq!(m.stack_size, 1);
    }

    #[test]
    fn not_produces_booleans() {
        let m = compile(Node::new(1, NodeKind::Not(Box::new(call("c"))))).unwrap();
        assert_eq!(&ops(&m)[..6], &[
            Op::PushSelf,
            Op::SendMethod,
            Op::GotoIfFalse,
            Op::PushFalse,
            Op::Goto,
            Op::PushTrue,
        ]);
    }

    #[test]
    fn until_branches_on_true() {
        let m = compile(Node::until_loop(1, call("done?"), None, true)).unwrap();
        assert_eq!(ops(&m)[2], Op::GotoIfTrue);
    }

    #[test]
    fn do_while_runs_body_first() {
        let m = compile(Node::while_loop(1, call("c"), Some(call("b")), false)).unwrap();
        assert_eq!(&ops(&m)[..9], &[
            Op::PushSelf,
            Op::SendMethod,
            Op::Pop,
            Op::PushSelf,
            Op::SendMethod,
            Op::GotoIfFalse,
            Op::CheckInterrupts,
            Op::Goto,
            Op::PushNil,
        ]);
        let code = m.decode().unwrap();
        assert_eq!(code[7].target(), Some(0));
    }

    #[test]
    fn break_value_through_nested_expression() {
        // while c; foo(1, break 2); end
        let brk = Node::brk(1, Some(Node::int(1, 2)));
        let body = Node::call(1, None, "foo", vec![Node::int(1, 1), brk]).unwrap();
        let m = compile(Node::while_loop(1, call("c"), Some(body), true)).unwrap();
        let code = m.decode().unwrap();
        let ops: Vec<Op> = code.iter().map(|i| i.op).collect();
        // self, 1 and the break value: two values are dropped under it
        assert_eq!(&ops[3..10], &[
            Op::PushSelf,
            Op::PushInt,
            Op::PushInt,
            Op::Swap,
            Op::Pop,
            Op::Swap,
            Op::Pop,
        ]);
        assert_eq!(ops[10], Op::Goto);
    }

    #[test]
    fn next_in_loop_targets_top() {
        let body = Node::next(1, None);
        let m = compile(Node::while_loop(1, call("c"), Some(body), true)).unwrap();
        let code = m.decode().unwrap();
        assert_eq!(code[3].op, Op::PushNil);
        assert_eq!(code[4].op, Op::Pop);
        assert_eq!(code[5].op, Op::Goto);
        assert_eq!(code[5].target(), Some(0));
    }

    fn flip_flop(exclusive: bool) -> CompiledMethod {
        let node = Node::flip_flop(1, call("a"), call("b"), exclusive);
        compile(Node::if_else(1, node, Some(Node::int(1, 1)), None)).unwrap()
    }

    #[test]
    fn flip_flop_keeps_state_in_hidden_local() {
        let m = flip_flop(false);
        assert_eq!(m.local_names, vec!["%flip1"]);
        let code = m.decode().unwrap();
        assert_eq!(code[0].op, Op::PushLocal);
        assert_eq!(code[1].op, Op::GotoIfFalse);
        // the "on" path tests `b`, the "off" path tests `a` then `b`
        let sends: Vec<u32> = code
            .iter()
            .filter(|i| i.op == Op::SendMethod)
            .map(|i| i.arg(0))
            .collect();
        assert_eq!(sends.len(), 3);
        assert_eq!(sends[0], sends[2]);
        assert_ne!(sends[0], sends[1]);
        let stores = code.iter().filter(|i| i.op == Op::SetLocal).count();
        assert_eq!(stores, 2);
    }

    #[test]
    fn exclusive_flip_flop_does_not_test_finish_on_start() {
        let m = flip_flop(true);
        let code = m.decode().unwrap();
        let sends = code.iter().filter(|i| i.op == Op::SendMethod).count();
        assert_eq!(sends, 2);
        assert!(!code.iter().any(|i| i.op == Op::GotoIfTrue));
    }

    #[test]
    fn jumps_outside_loops_are_rejected() {
        assert_eq!(
            compile(Node::brk(4, None)).unwrap_err(),
            CompileError::InvalidControl { keyword: "break", line: 4 }
        );
        assert_eq!(
            compile(Node::next(5, None)).unwrap_err(),
            CompileError::InvalidControl { keyword: "next", line: 5 }
        );
        assert_eq!(
            compile(Node::new(6, NodeKind::Retry)).unwrap_err(),
            CompileError::InvalidControl { keyword: "retry", line: 6 }
        );
    }

    #[test]
    fn case_with_receiver_tests_each_condition() {
        let when = When::new(
            2,
            vec![Node::int(2, 1), Node::splat(2, Node::ivar(2, "@list"))],
            Some(Node::symbol(2, "one")),
        )
        .unwrap();
        let m = compile(Node::case(1, Some(call("x")), vec![when], None)).unwrap();
        let ops = ops(&m);
        let sends = ops
            .iter()
            .filter(|&&op| op == Op::SendStack)
            .count();
        assert_eq!(sends, 2);
        assert!(ops.contains(&Op::CastArray));
        assert_eq!(m.stack_size, 3);
    }

    #[test]
    fn case_rejects_empty_when() {
        let when = When {
            line: 3,
            conditions: vec![],
            body: None,
        };
        assert!(matches!(
            compile(Node::case(1, None, vec![when], None)),
            Err(CompileError::MalformedNode { line: 3, .. })
        ));
    }

    #[test]
    fn sequence_pops_all_but_last() {
        let m = compile(Node::seq(1, vec![Node::int(1, 1), Node::int(1, 2)])).unwrap();
        assert_eq!(&ops(&m)[..3], &[Op::PushInt, Op::Pop, Op::PushInt]);
    }

    #[test]
    fn break_in_condition_leaves_loop() {
        // while (break 1); end
        let cond = Node::brk(1, Some(Node::int(1, 1)));
        let m = compile(Node::while_loop(1, cond, None, true)).unwrap();
        let code = m.decode().unwrap();
        assert_eq!(code[0].op, Op::PushInt);
        assert_eq!(code[1].op, Op::Goto);
        let post = code.iter().rev().find(|i| i.op == Op::Pop).unwrap();
        assert_eq!(code[1].target(), Some(post.offset));
    }

    #[test]
    fn next_in_do_while_condition_retests() {
        // begin; b; end while (next)
        let m = compile(Node::while_loop(1, Node::next(1, None), Some(call("b")), false))
            .unwrap();
        let code = m.decode().unwrap();
        // b; pop; then `next` drops its nil and jumps back to the test
        assert_eq!(code[3].op, Op::PushNil);
        assert_eq!(code[4].op, Op::Pop);
        assert_eq!(code[5].op, Op::Goto);
        assert_eq!(code[5].target(), Some(code[3].offset));
    }

    #[test]
    fn break_in_condition_inside_block_stays_local() {
        let looped = Node::while_loop(1, Node::brk(1, None), Some(call("b")), true);
        let block = Node::iter(1, FormalArgs::default(), Some(looped));
        let tap = Node::call(1, None, "tap", vec![]).unwrap().with_block(block).unwrap();
        let m = compile(tap).unwrap();
        let code = m.children().next().unwrap().decode().unwrap();
        assert!(code.iter().all(|i| i.op != Op::RaiseBreak));
        let out = code.iter().find(|i| i.op == Op::Goto).unwrap();
        assert!(out.target().unwrap() > out.offset);
    }

    #[test]
    fn next_in_rescue_clause_of_block_clears_exception() {
        // each { begin; risky; rescue; next 1; end }
        let clause =
            RescueClause::new(1, vec![], None, Some(Node::next(1, Some(Node::int(1, 1)))))
                .unwrap();
        let guarded = Node::rescue(1, Some(call("risky")), vec![clause], None);
        let block = Node::iter(1, FormalArgs::default(), Some(guarded));
        let each = Node::call(1, None, "each", vec![]).unwrap().with_block(block).unwrap();
        let m = compile(each).unwrap();
        let ops = ops(m.children().next().unwrap());
        let at = ops.iter().position(|&op| op == Op::ClearException).unwrap();
        assert_eq!(&ops[at - 1..at + 5], &[
            Op::PushInt,
            Op::ClearException,
            Op::Swap,
            Op::PopException,
            Op::Ret,
            Op::ClearException,
        ]);
    }

    #[test]
    fn return_in_rescue_clause_clears_then_restores() {
        let clause =
            RescueClause::new(1, vec![], None, Some(Node::ret(1, Some(Node::int(1, 1)))))
                .unwrap();
        let guarded = Node::rescue(1, Some(call("risky")), vec![clause], None);
        let def = Node::def(1, "m", FormalArgs::default(), Some(guarded)).unwrap();
        let m = Compiler::compile_method(&def, &CompileOptions::default()).unwrap();
        let ops = ops(&m);
        let at = ops.iter().position(|&op| op == Op::ClearException).unwrap();
        assert_eq!(&ops[at - 1..at + 4], &[
            Op::PushInt,
            Op::ClearException,
            Op::Swap,
            Op::PopException,
            Op::Ret,
        ]);
    }

    #[test]
    fn redo_in_loop() {
        // loop { if c then redo else break end }
        let redo = Node::new(1, NodeKind::Redo);
        let body = Node::if_else(1, call("c"), Some(redo), Some(Node::brk(1, None)));
        let m = compile(Node::new(1, NodeKind::Loop(Some(Box::new(body))))).unwrap();
        let code = m.decode().unwrap();
        assert_eq!(code[3].op, Op::Goto);
        assert_eq!(code[3].target(), Some(0));
        assert_eq!(code[4].op, Op::Goto);
        assert_eq!(code[5].op, Op::PushNil);
    }
}
