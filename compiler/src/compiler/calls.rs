use super::{Compiler, Result};
use crate::ast::{Node, NodeKind};
use crate::error::CompileError;
use crate::flow::Flow;

/// Arguments split into the plain ones and a trailing splat.
fn split_splat<'a>(line: u32, args: &'a [Node]) -> Result<(&'a [Node], Option<&'a Node>)> {
    let (plain, splat) = match args.split_last() {
        Some((last, init)) => match &last.kind {
            NodeKind::Splat(inner) => (init, Some(&**inner)),
            _ => (args, None),
        },
        None => (args, None),
    };
    if plain.iter().any(|a| matches!(a.kind, NodeKind::Splat(_))) {
        return Err(CompileError::malformed(line, "splat argument must come last"));
    }
    Ok((plain, splat))
}

impl Compiler {
    pub(super) fn call<'a>(
        &mut self,
        line: u32,
        receiver: Option<&'a Node>,
        name: &str,
        args: &'a [Node],
        block: Option<&'a Node>,
        flow: &Flow<'a>,
    ) -> Result<()> {
        if self.special_form(line, receiver, name, args, block)? {
            return Ok(());
        }
        match receiver {
            Some(r) => self.emit(r, flow)?,
            None => self.b().push_self(),
        }
        let (plain, splat) = split_splat(line, args)?;
        for arg in plain {
            self.emit(arg, flow)?;
        }
        let argc = plain.len() as u32;
        if let Some(splat) = splat {
            self.emit(splat, flow)?;
            self.b().cast_array();
            self.block_arg(block, flow, false)?;
            self.b().send_with_splat(name, argc);
        } else if block.is_some() {
            self.block_arg(block, flow, false)?;
            self.b().send_with_block(name, argc);
        } else {
            self.b().send(name, argc);
        }
        Ok(())
    }

    /// Calls the compiler handles itself. Returns whether `name` was one.
    fn special_form(
        &mut self,
        line: u32,
        receiver: Option<&Node>,
        name: &str,
        args: &[Node],
        block: Option<&Node>,
    ) -> Result<bool> {
        if block.is_some() {
            return Ok(false);
        }
        match (receiver.map(|r| &r.kind), name, args) {
            (None, "block_given?" | "iterator?", []) => {
                let absent = self.b().new_label();
                let done = self.b().new_label();
                self.b().push_block();
                self.b().is_nil();
                self.b().goto_if_true(absent);
                self.b().push_true();
                self.b().goto(done);
                self.mark(absent)?;
                self.b().push_false();
                self.mark(done)?;
            }
            (None, "__METHOD__", []) => match self.unit.context.name.clone() {
                Some(method) => self.b().push_symbol(&method),
                None => self.b().push_nil(),
            },
            (Some(NodeKind::Const(module)), "primitive", [arg]) if module == "Ruby" => {
                let NodeKind::Integer(id) = &arg.kind else {
                    return Err(CompileError::malformed(line, "primitive id must be an integer"));
                };
                let id = u32::try_from(*id).map_err(|_| {
                    CompileError::malformed(line, "primitive id out of range")
                })?;
                self.unit.info.primitive = Some(id);
                self.b().push_nil();
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Push the block argument of a call. Without one, push nil, or the
    /// current block when `forward` is set (as `super` does).
    fn block_arg<'a>(&mut self, block: Option<&'a Node>, flow: &Flow<'a>, forward: bool) -> Result<()> {
        match block {
            Some(node) => match &node.kind {
                NodeKind::Iter { args, body } => {
                    let compiled = self.block_unit(node.line, args, body.as_deref())?;
                    self.b().create_block(compiled);
                }
                NodeKind::BlockPass(expr) => self.emit(expr, flow)?,
                _ => {
                    return Err(CompileError::malformed(
                        node.line,
                        "block must be a block literal or `&expr`",
                    ));
                }
            },
            None if forward => self.b().push_block(),
            None => self.b().push_nil(),
        }
        Ok(())
    }

    /// `yield a, b` calls the current block.
    pub(super) fn yield_<'a>(&mut self, line: u32, args: &'a [Node], flow: &Flow<'a>) -> Result<()> {
        self.b().push_block();
        let (plain, splat) = split_splat(line, args)?;
        for arg in plain {
            self.emit(arg, flow)?;
        }
        let argc = plain.len() as u32;
        if let Some(splat) = splat {
            self.emit(splat, flow)?;
            self.b().cast_array();
            self.b().push_nil();
            self.b().send_with_splat("call", argc);
        } else {
            self.b().send("call", argc);
        }
        Ok(())
    }

    fn super_name(&self, line: u32) -> Result<String> {
        self.unit
            .context
            .name
            .clone()
            .ok_or_else(|| CompileError::malformed(line, "`super` outside of a method"))
    }

    pub(super) fn super_<'a>(
        &mut self,
        line: u32,
        args: &'a [Node],
        block: Option<&'a Node>,
        flow: &Flow<'a>,
    ) -> Result<()> {
        let name = self.super_name(line)?;
        let (plain, splat) = split_splat(line, args)?;
        for arg in plain {
            self.emit(arg, flow)?;
        }
        let argc = plain.len() as u32;
        if let Some(splat) = splat {
            self.emit(splat, flow)?;
            self.b().cast_array();
            self.block_arg(block, flow, true)?;
            self.b().send_super_with_splat(&name, argc);
        } else {
            self.block_arg(block, flow, true)?;
            self.b().send_super(&name, argc);
        }
        Ok(())
    }

    /// `super` with no argument list passes the method's own arguments,
    /// read from wherever they live now.
    pub(super) fn zsuper<'a>(
        &mut self,
        line: u32,
        block: Option<&'a Node>,
        flow: &Flow<'a>,
    ) -> Result<()> {
        let name = self.super_name(line)?;
        let context = self.unit.context.clone();
        for arg in &context.args {
            self.push_argument(line, arg)?;
        }
        let argc = context.args.len() as u32;
        match &context.splat {
            Some(splat) => {
                self.push_argument(line, splat)?;
                self.b().cast_array();
                self.block_arg(block, flow, true)?;
                self.b().send_super_with_splat(&name, argc);
            }
            None => {
                self.block_arg(block, flow, true)?;
                self.b().send_super(&name, argc);
            }
        }
        Ok(())
    }

    fn push_argument(&mut self, line: u32, name: &str) -> Result<()> {
        let r = self.scopes.resolve(name, false).ok_or_else(|| {
            CompileError::malformed(line, format!("argument `{name}` is not visible"))
        })?;
        self.b().push_local(r.slot, r.depth);
        Ok(())
    }

    /// `recv.name(args, value)` evaluating to `value`. Without a value
    /// node the value is taken from the top of the stack.
    pub(super) fn attr_assign<'a>(
        &mut self,
        line: u32,
        receiver: &'a Node,
        name: &str,
        args: &'a [Node],
        value: Option<&'a Node>,
        flow: &Flow<'a>,
    ) -> Result<()> {
        if args.iter().any(|a| matches!(a.kind, NodeKind::Splat(_))) {
            return Err(CompileError::malformed(line, "splat in attribute assignment"));
        }
        let argc = args.len() as u32;
        self.emit(receiver, flow)?;
        for arg in args {
            self.emit(arg, flow)?;
        }
        match value {
            Some(v) => self.emit(v, flow)?,
            None => {
                // bring the value from under receiver and args to the top
                for _ in 0..=argc {
                    self.b().move_down(argc + 1);
                }
            }
        }
        self.b().dup();
        self.b().move_down(argc + 2);
        self.b().send(name, argc + 1);
        self.b().pop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytecode::{CompiledMethod, Op};

    use crate::CompileOptions;
    use crate::ast::{FormalArgs, Node, NodeKind};
    use crate::compiler::Compiler;
    use crate::error::CompileError;

    fn compile(body: Node) -> Result<CompiledMethod, CompileError> {
        Compiler::compile_script(&Node::script(1, Some(body)), &CompileOptions::default())
    }

    fn ops(m: &CompiledMethod) -> Vec<Op> {
        m.decode().unwrap().iter().map(|i| i.op).collect()
    }

    #[test]
    fn binary_call_leaves_one_value() {
        let call = Node::call(1, Some(Node::int(1, 1)), "+", vec![Node::int(1, 2)]).unwrap();
        let m = compile(call).unwrap();
        assert_eq!(&ops(&m)[..3], &[Op::PushInt, Op::PushInt, Op::SendStack]);
        assert_eq!(m.stack_size, 2);
    }

    #[test]
    fn call_with_block_literal() {
        let block = Node::iter(1, FormalArgs::required(1, &["x"]).unwrap(), None);
        let call = Node::call(1, Some(Node::ivar(1, "@list")), "each", vec![])
            .unwrap()
            .with_block(block)
            .unwrap();
        let m = compile(call).unwrap();
        assert_eq!(&ops(&m)[..3], &[Op::PushIvar, Op::CreateBlock, Op::SendStackWithBlock]);
        let child = m.children().next().unwrap();
        assert_eq!(child.kind, bytecode::MethodKind::Block);
        assert_eq!(child.local_names, vec!["x"]);
    }

    #[test]
    fn splat_call_passes_nil_block() {
        let args = vec![Node::int(1, 1), Node::splat(1, Node::ivar(1, "@rest"))];
        let m = compile(Node::call(1, None, "f", args).unwrap()).unwrap();
        assert_eq!(&ops(&m)[..6], &[
            Op::PushSelf,
            Op::PushInt,
            Op::PushIvar,
            Op::CastArray,
            Op::PushNil,
            Op::SendStackWithSplat,
        ]);
    }

    #[test]
    fn splat_in_the_middle_is_malformed() {
        let node = Node::new(2, NodeKind::Call {
            receiver: None,
            name: "f".into(),
            args: vec![Node::splat(2, Node::nil(2)), Node::nil(2)],
            block: None,
        });
        assert!(matches!(
            compile(node),
            Err(CompileError::MalformedNode { line: 2, .. })
        ));
    }

    #[test]
    fn block_given_tests_the_block() {
        let m = compile(Node::call(1, None, "block_given?", vec![]).unwrap()).unwrap();
        assert_eq!(&ops(&m)[..3], &[Op::PushBlock, Op::IsNil, Op::GotoIfTrue]);
    }

    #[test]
    fn primitive_is_recorded() {
        let prim = Node::call(
            2,
            Some(Node::constant(2, "Ruby").unwrap()),
            "primitive",
            vec![Node::int(2, 17)],
        )
        .unwrap();
        let def = Node::def(1, "size", FormalArgs::default(), Some(prim)).unwrap();
        let m = Compiler::compile_method(&def, &CompileOptions::default()).unwrap();
        assert_eq!(m.primitive, Some(17));
        assert_eq!(ops(&m), vec![Op::PushNil, Op::Ret]);
    }

    #[test]
    fn method_name_form() {
        let body = Node::call(2, None, "__METHOD__", vec![]).unwrap();
        let def = Node::def(1, "who", FormalArgs::default(), Some(body)).unwrap();
        let m = Compiler::compile_method(&def, &CompileOptions::default()).unwrap();
        assert_eq!(m.literals[0].as_symbol(), Some("who"));
    }

    #[test]
    fn zsuper_forwards_arguments() {
        let args = FormalArgs::new(1, vec!["a".into()], vec![], Some("rest".into()), None)
            .unwrap();
        let def =
            Node::def(1, "go", args, Some(Node::new(2, NodeKind::ZSuper { block: None }))).unwrap();
        let m = Compiler::compile_method(&def, &CompileOptions::default()).unwrap();
        assert_eq!(ops(&m), vec![
            Op::PushLocal,
            Op::PushLocal,
            Op::CastArray,
            Op::PushBlock,
            Op::SendSuperWithSplat,
            Op::Ret,
        ]);
        assert_eq!(m.splat_index, Some(1));
    }

    #[test]
    fn super_outside_method_is_malformed() {
        let node = Node::new(3, NodeKind::Super {
            args: vec![],
            block: None,
        });
        assert!(matches!(
            compile(node),
            Err(CompileError::MalformedNode { line: 3, .. })
        ));
    }

    #[test]
    fn attribute_assignment_yields_value() {
        let node = Node::attr_assign(
            1,
            Node::ivar(1, "@obj"),
            "[]=",
            vec![Node::int(1, 0)],
            Some(Node::int(1, 9)),
        )
        .unwrap();
        let m = compile(node).unwrap();
        assert_eq!(&ops(&m)[..7], &[
            Op::PushIvar,
            Op::PushInt,
            Op::PushInt,
            Op::Dup,
            Op::MoveDown,
            Op::SendStack,
            Op::Pop,
        ]);
        assert_eq!(m.stack_size, 4);
    }

    #[test]
    fn attribute_target_in_multiple_assign() {
        let target = Node::attr_assign(1, Node::ivar(1, "@o"), "x=", vec![], None).unwrap();
        let node =
            Node::multiple_assign(1, vec![target], None, Some(Node::ivar(1, "@v"))).unwrap();
        let m = compile(node).unwrap();
        assert!(ops(&m).contains(&Op::MoveDown));
    }

    #[test]
    fn yield_calls_the_block() {
        let m = compile(Node::new(1, NodeKind::Yield(vec![Node::int(1, 1)]))).unwrap();
        assert_eq!(&ops(&m)[..3], &[Op::PushBlock, Op::PushInt, Op::SendStack]);
    }
}
