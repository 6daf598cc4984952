//! Stack-machine bytecode: the opcode table, the emission builder with its
//! label, literal, line and exception-region bookkeeping, the assembler
//! that resolves labels and packs bytes, and the compiled-method artifact.

mod assembler;
mod builder;
mod decoder;
mod error;
mod exceptions;
mod instruction;
mod line_table;
mod literal;
mod method;
mod op;
mod stack;
pub mod text;

pub use assembler::{encode, encode_op};
pub use builder::{BytecodeBuilder, Label};
pub use decoder::{BytecodeDecoder, decode_all};
pub use error::{AssembleError, DecodeError};
pub use exceptions::{ExceptionEntry, ExceptionTable, RegionTracker, Regions, Suspension};
pub use instruction::{Instruction, Operand};
pub use line_table::{LineEntry, LineTable, LineTableBuilder, line_for};
pub use literal::{Literal, LiteralPool};
pub use method::{CompiledMethod, MethodInfo, MethodKind};
pub use op::{Op, OperandKind};
pub use stack::verify as verify_stack;

#[cfg(test)]
mod tests {
    use super::*;

    fn method(build: impl FnOnce(&mut BytecodeBuilder)) -> CompiledMethod {
        let mut b = BytecodeBuilder::new(1);
        build(&mut b);
        b.finish(MethodInfo::new("t", MethodKind::Method)).unwrap()
    }

    #[test]
    fn encode_decode_agree() {
        let m = method(|b| {
            let top = b.new_label();
            let done = b.new_label();
            b.mark_label(top).unwrap();
            b.push_local(0, 0);
            b.goto_if_false(done);
            b.push_self();
            b.push_int(-1);
            b.push_local(2, 1);
            b.send_with_block("each", 1);
            b.pop();
            b.check_interrupts();
            b.goto(top);
            b.mark_label(done).unwrap();
            b.push_nil();
            b.ret();
        });
        let code = m.decode().unwrap();
        assert_eq!(encode(&code), m.bytecode);
        let ops: Vec<Op> = code.iter().map(|i| i.op).collect();
        assert_eq!(ops, vec![
            Op::PushLocal,
            Op::GotoIfFalse,
            Op::PushSelf,
            Op::PushInt,
            Op::PushLocalDepth,
            Op::SendStackWithBlock,
            Op::Pop,
            Op::CheckInterrupts,
            Op::Goto,
            Op::PushNil,
            Op::Ret,
        ]);
        assert_eq!(code[8].target(), Some(0));
        assert_eq!(code[1].target(), Some(code[9].offset));
        assert_eq!(code[3].to_string(), "push_int -1");
    }

    #[test]
    fn rescue_shaped_method() {
        let m = method(|b| {
            let done = b.new_label();
            b.push_exception();
            b.open_region("r").unwrap();
            b.push_self();
            b.send("risky", 0);
            b.goto(done);
            b.mark_handler("r").unwrap();
            b.push_nil();
            b.close_region("r").unwrap();
            b.mark_label(done).unwrap();
            b.swap();
            b.pop_exception();
            b.ret();
        });
        let table = m.exceptions.entries();
        assert_eq!(table, &[ExceptionEntry::new(1, 12, 13)]);
        assert_eq!(m.exceptions.handler_for(2), Some(12));
        assert_eq!(m.exceptions.handler_for(12), None);
        assert_eq!(m.stack_size, 2);
    }

    #[test]
    fn unbalanced_join_is_rejected() {
        let mut b = BytecodeBuilder::new(1);
        let join = b.new_label();
        b.push_true();
        b.goto_if_true(join);
        b.push_nil();
        b.mark_label(join).unwrap();
        b.ret();
        assert!(matches!(
            b.finish(MethodInfo::new("t", MethodKind::Method)),
            Err(AssembleError::StackImbalance { .. })
        ));
    }
}
