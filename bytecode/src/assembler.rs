//! Label translation and binary encoding.

use log::trace;

use crate::builder::LabelInfo;
use crate::error::AssembleError;
use crate::instruction::{Instruction, Operand, Symbolic};
use crate::op::Op;

/// Replace every label operand with the label's offset.
///
/// Fails on the first label that was referenced but never marked.
pub(crate) fn translate(
    code: &[Symbolic],
    labels: &[LabelInfo],
) -> Result<Vec<Instruction>, AssembleError> {
    let mut out = Vec::with_capacity(code.len());
    let mut ip = 0;
    for sym in code {
        let mut args = [0u32; 2];
        for (slot, operand) in args.iter_mut().zip(sym.args()) {
            *slot = match *operand {
                Operand::Int(v) => v,
                Operand::Label(label) => {
                    let info = &labels[label.index()];
                    let Some(location) = info.location else {
                        return Err(AssembleError::UnresolvedLabel(
                            info.display_name(label.index()),
                        ));
                    };
                    trace!(
                        "{} at {ip} -> {}",
                        sym.op,
                        info.display_name(label.index())
                    );
                    location
                }
            };
        }
        let instr =
            Instruction::new(ip, sym.op, &args[..sym.op.operand_count()]);
        ip = instr.next_offset();
        out.push(instr);
    }
    Ok(out)
}

/// Pack resolved instructions: one opcode byte, then each operand as a
/// little-endian `u32`.
pub fn encode(code: &[Instruction]) -> Vec<u8> {
    let len = code.last().map(|i| i.next_offset()).unwrap_or(0);
    let mut buf = Vec::with_capacity(len as usize);
    for instr in code {
        encode_op(instr.op, instr.args(), &mut buf);
    }
    buf
}

pub fn encode_op(op: Op, args: &[u32], buf: &mut Vec<u8>) {
    buf.push(op as u8);
    for a in args {
        buf.extend_from_slice(&a.to_le_bytes());
    }
}
