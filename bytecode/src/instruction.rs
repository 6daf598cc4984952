use core::fmt;

use crate::builder::Label;
use crate::op::Op;

/// An operand before label translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Int(u32),
    Label(Label),
}

/// An instruction in the builder's symbolic stream. Jump operands may
/// still refer to labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbolic {
    pub op: Op,
    pub operands: [Operand; 2],
}

impl Symbolic {
    pub fn new(op: Op, args: &[Operand]) -> Self {
        let mut operands = [Operand::Int(0); 2];
        operands[..args.len()].copy_from_slice(args);
        Self { op, operands }
    }

    pub fn args(&self) -> &[Operand] {
        &self.operands[..self.op.operand_count()]
    }
}

/// A decoded instruction with every operand resolved to an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// Byte offset of the opcode in the stream.
    pub offset: u32,
    pub op: Op,
    operands: [u32; 2],
}

impl Instruction {
    pub fn new(offset: u32, op: Op, args: &[u32]) -> Self {
        let mut operands = [0; 2];
        operands[..args.len()].copy_from_slice(args);
        Self {
            offset,
            op,
            operands,
        }
    }

    pub fn args(&self) -> &[u32] {
        &self.operands[..self.op.operand_count()]
    }

    pub fn arg(&self, i: usize) -> u32 {
        self.operands[i]
    }

    /// Offset of the following instruction.
    pub fn next_offset(&self) -> u32 {
        self.offset + self.op.width()
    }

    pub fn stack_effect(&self) -> (u32, u32) {
        self.op.stack_effect(self.args())
    }

    /// The jump target, if this is a jump.
    pub fn target(&self) -> Option<u32> {
        self.op.is_jump().then(|| self.operands[0])
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op.mnemonic())?;
        match self.op {
            Op::PushInt => write!(f, " {}", self.operands[0] as i32),
            _ => {
                for a in self.args() {
                    write!(f, " {a}")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let i = Instruction::new(0, Op::SendStack, &[3, 1]);
        assert_eq!(i.to_string(), "send_stack 3 1");
        let i = Instruction::new(0, Op::PushInt, &[(-7i32) as u32]);
        assert_eq!(i.to_string(), "push_int -7");
        let i = Instruction::new(4, Op::Pop, &[]);
        assert_eq!(i.to_string(), "pop");
        assert_eq!(i.next_offset(), 5);
    }
}
