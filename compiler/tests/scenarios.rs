use bytecode::{CompiledMethod, Instruction, Op};
use compiler::{
    CompileError, CompileOptions, Compiler, FormalArgs, Node, NodeKind, RescueClause,
};

fn script(body: Node) -> CompiledMethod {
    Compiler::compile_script(&Node::script(1, Some(body)), &CompileOptions::for_file("t.rb"))
        .unwrap()
}

fn call(line: u32, name: &str) -> Node {
    Node::call(line, None, name, vec![]).unwrap()
}

fn find(code: &[Instruction], op: Op) -> &Instruction {
    code.iter().find(|i| i.op == op).unwrap()
}

fn at(code: &[Instruction], offset: u32) -> &Instruction {
    code.iter().find(|i| i.offset == offset).unwrap()
}

#[test]
fn while_loop_shape_and_break_bypasses_interrupt_check() {
    let body = Node::seq(2, vec![call(2, "work"), Node::brk(3, None)]);
    let m = script(Node::while_loop(1, call(1, "running"), Some(body), true));
    let code = m.decode().unwrap();
    let ops: Vec<Op> = code.iter().map(|i| i.op).collect();
    assert_eq!(ops, vec![
        Op::PushSelf,
        Op::SendMethod,
        Op::GotoIfFalse,
        Op::PushSelf,
        Op::SendMethod,
        Op::Pop,
        Op::PushNil,
        Op::Goto,
        Op::Pop,
        Op::CheckInterrupts,
        Op::Goto,
        Op::PushNil,
        Op::Pop,
        Op::PushTrue,
        Op::Ret,
    ]);

    let exit = &code[2];
    let bottom = at(&code, exit.target().unwrap());
    assert_eq!(bottom.op, Op::PushNil);

    let brk = &code[7];
    assert_eq!(brk.target(), Some(bottom.next_offset()));
    let check = find(&code, Op::CheckInterrupts);
    assert!(check.offset < brk.target().unwrap());
    assert!(check.offset > brk.offset);

    let back = &code[10];
    assert_eq!(back.target(), Some(0));
}

#[test]
fn rescue_handler_offsets_cover_the_handler() {
    let raise = Node::call(3, None, "raise", vec![Node::string(3, "again")]).unwrap();
    let clause = RescueClause::new(
        2,
        vec![
            Node::constant(2, "IOError").unwrap(),
            Node::constant(2, "KeyError").unwrap(),
        ],
        None,
        Some(raise),
    )
    .unwrap();
    let m = script(Node::rescue(1, Some(call(1, "risky")), vec![clause], None));
    let code = m.decode().unwrap();
    assert_eq!(m.exceptions.len(), 1);
    let entry = m.exceptions.entries()[0];

    // protected body: push_self; send risky; goto escape
    let first = at(&code, entry.start);
    assert_eq!(first.op, Op::PushSelf);
    let skip = at(&code, entry.handler - 5);
    assert_eq!(skip.op, Op::Goto);

    let handler = at(&code, entry.handler);
    assert_eq!(handler.op, Op::PushConst);
    assert_eq!(m.literal(handler.arg(0)).and_then(|l| l.as_symbol()), Some("IOError"));

    let reraise = find(&code, Op::Reraise);
    assert_eq!(entry.end, reraise.next_offset());
    assert_eq!(m.exceptions.handler_for(first.offset), Some(entry.handler));
    assert_eq!(m.exceptions.handler_for(entry.handler), None);
}

#[test]
fn nested_blocks_resolve_outer_local_by_depth() {
    let mut body = Node::local(4, "total").unwrap();
    for line in [3, 2, 1] {
        let block = Node::iter(line, FormalArgs::default(), Some(body));
        body = call(line, "each").with_block(block).unwrap();
    }
    let assign = Node::assign_local(1, "total", Some(Node::int(1, 0))).unwrap();
    let m = script(Node::seq(1, vec![assign, body]));

    let mut unit = &m;
    for _ in 0..3 {
        unit = unit.children().next().unwrap();
    }
    let read = *find(&unit.decode().unwrap(), Op::PushLocalDepth);
    assert_eq!(read.args(), &[3, 0]);
    assert_eq!(m.local_names, vec!["total"]);
}

#[test]
fn block_parameters_shadow_nothing_outside() {
    let args = FormalArgs::required(2, &["item"]).unwrap();
    let block = Node::iter(2, args, Some(Node::local(2, "item").unwrap()));
    let m = script(call(2, "each").with_block(block).unwrap());
    assert!(m.local_names.is_empty());
    let block = m.children().next().unwrap();
    assert_eq!(block.local_names, vec!["item"]);
    assert_eq!(block.required_args, 1);
}

#[test]
fn jumps_without_an_owner_are_rejected() {
    for (node, keyword) in [
        (Node::brk(7, None), "break"),
        (Node::next(7, None), "next"),
        (Node::new(7, NodeKind::Redo), "redo"),
        (Node::new(7, NodeKind::Retry), "retry"),
    ] {
        let def = Node::def(6, "m", FormalArgs::default(), Some(node)).unwrap();
        let err = Compiler::compile_script(&Node::script(1, Some(def)), &CompileOptions::default())
            .unwrap_err();
        assert_eq!(err, CompileError::InvalidControl { keyword, line: 7 });
        assert_eq!(err.line(), Some(7));
    }
}

#[test]
fn next_in_block_returns_from_block() {
    let block = Node::iter(1, FormalArgs::default(), Some(Node::next(1, Some(Node::int(1, 4)))));
    let m = script(call(1, "each").with_block(block).unwrap());
    let block = m.children().next().unwrap();
    let ops: Vec<Op> = block.decode().unwrap().iter().map(|i| i.op).collect();
    assert_eq!(&ops[..2], &[Op::PushInt, Op::Ret]);
}

#[test]
fn break_in_block_raises_to_the_caller() {
    let block = Node::iter(1, FormalArgs::default(), Some(Node::brk(1, None)));
    let m = script(call(1, "each").with_block(block).unwrap());
    let block = m.children().next().unwrap();
    let ops: Vec<Op> = block.decode().unwrap().iter().map(|i| i.op).collect();
    assert_eq!(&ops[..2], &[Op::PushNil, Op::RaiseBreak]);
}

#[test]
fn return_in_block_is_non_local() {
    let block = Node::iter(2, FormalArgs::default(), Some(Node::ret(2, Some(Node::int(2, 1)))));
    let body = call(2, "each").with_block(block).unwrap();
    let def = Node::def(1, "m", FormalArgs::default(), Some(body)).unwrap();
    let m = Compiler::compile_method(&def, &CompileOptions::default()).unwrap();
    let block = m.children().next().unwrap();
    assert!(block.decode().unwrap().iter().any(|i| i.op == Op::RaiseReturn));
}

#[test]
fn ensure_inside_rescue_nests_regions() {
    let inner = Node::ensure(2, Some(call(2, "work")), Some(call(3, "cleanup")));
    let clause = RescueClause::new(4, vec![], None, None).unwrap();
    let m = script(Node::rescue(1, Some(inner), vec![clause], None));
    let entries = m.exceptions.entries();
    assert_eq!(entries.len(), 2);
    let (outer, inner) = if entries[0].end >= entries[1].end {
        (entries[0], entries[1])
    } else {
        (entries[1], entries[0])
    };
    assert!(outer.start <= inner.start && inner.end <= outer.end);
    let work = m
        .decode()
        .unwrap()
        .into_iter()
        .find(|i| {
            i.op == Op::SendMethod
                && m.literal(i.arg(0)).and_then(|l| l.as_symbol()) == Some("work")
        })
        .unwrap();
    assert_eq!(m.exceptions.handler_for(work.offset), Some(inner.handler));
}

#[test]
fn line_table_follows_statements() {
    let m = script(Node::seq(1, vec![call(1, "a"), call(5, "b")]));
    let entries = m.lines.entries();
    assert_eq!(entries.first().map(|e| e.start), Some(0));
    assert_eq!(entries.last().map(|e| e.end), Some(m.bytecode.len() as u32));
    assert!(entries.iter().any(|e| e.line == 5));
    for pair in entries.windows(2) {
        assert_eq!(pair[0].end, pair[1].start);
    }
}
