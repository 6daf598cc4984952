//! Operand-stack depth verification.
//!
//! Walks every reachable path through a resolved method, tracking the
//! operand stack depth. Every instruction must be reached with the same
//! depth on all paths, and no instruction may pop more than is there. A
//! handler is entered with the depth its region had at its start.

use std::collections::HashMap;

use crate::error::AssembleError;
use crate::exceptions::ExceptionEntry;
use crate::instruction::Instruction;

/// Returns the maximum stack depth of `code`.
pub fn verify(
    code: &[Instruction],
    regions: &[ExceptionEntry],
) -> Result<u32, AssembleError> {
    let index: HashMap<u32, usize> = code
        .iter()
        .enumerate()
        .map(|(i, instr)| (instr.offset, i))
        .collect();
    let mut depth: Vec<Option<u32>> = vec![None; code.len()];
    let mut work: Vec<(usize, u32)> = Vec::new();
    let mut max = 0;
    let mut seeded = vec![false; regions.len()];

    if !code.is_empty() {
        work.push((0, 0));
    }

    loop {
        while let Some((i, d)) = work.pop() {
            let instr = &code[i];
            match depth[i] {
                Some(known) if known == d => continue,
                Some(known) => {
                    return Err(AssembleError::StackImbalance {
                        offset: instr.offset,
                        expected: known,
                        found: d,
                    });
                }
                None => depth[i] = Some(d),
            }

            let (pops, pushes) = instr.stack_effect();
            if pops > d {
                return Err(AssembleError::StackUnderflow {
                    offset: instr.offset,
                });
            }
            let after = d - pops + pushes;
            max = max.max(d).max(after);

            if let Some(target) = instr.target() {
                let Some(&t) = index.get(&target) else {
                    return Err(AssembleError::BadJumpTarget {
                        offset: instr.offset,
                        target,
                    });
                };
                work.push((t, after));
            }
            if !instr.op.is_terminator() && i + 1 < code.len() {
                work.push((i + 1, after));
            }
        }

        let mut more = false;
        for (r, region) in regions.iter().enumerate() {
            if seeded[r] {
                continue;
            }
            let start = index.get(&region.start).and_then(|&i| depth[i]);
            let handler = index.get(&region.handler);
            if let (Some(d), Some(&h)) = (start, handler) {
                seeded[r] = true;
                work.push((h, d));
                more = true;
            }
        }
        if !more {
            return Ok(max);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::Op;

    fn code(ops: &[(Op, &[u32])]) -> Vec<Instruction> {
        let mut ip = 0;
        ops.iter()
            .map(|(op, args)| {
                let i = Instruction::new(ip, *op, args);
                ip = i.next_offset();
                i
            })
            .collect()
    }

    #[test]
    fn straight_line() {
        let c = code(&[
            (Op::PushSelf, &[]),
            (Op::PushInt, &[1]),
            (Op::PushInt, &[2]),
            (Op::SendStack, &[0, 2]),
            (Op::Ret, &[]),
        ]);
        assert_eq!(verify(&c, &[]), Ok(3));
    }

    #[test]
    fn underflow() {
        let c = code(&[(Op::Pop, &[])]);
        assert_eq!(verify(&c, &[]), Err(AssembleError::StackUnderflow {
            offset: 0
        }));
    }

    #[test]
    fn join_mismatch() {
        // push_true; goto_if_false L; push_nil; L: ret
        let c = code(&[
            (Op::PushTrue, &[]),
            (Op::GotoIfFalse, &[7]),
            (Op::PushNil, &[]),
            (Op::PushNil, &[]),
            (Op::Ret, &[]),
        ]);
        assert!(matches!(
            verify(&c, &[]),
            Err(AssembleError::StackImbalance { offset: 7, .. })
        ));
    }

    #[test]
    fn bad_target() {
        let c = code(&[(Op::Goto, &[3])]);
        assert!(matches!(
            verify(&c, &[]),
            Err(AssembleError::BadJumpTarget { target: 3, .. })
        ));
    }

    #[test]
    fn handler_starts_at_region_depth() {
        // the protected push_int/pop runs at depth 1, so does the handler
        let c = code(&[
            (Op::PushNil, &[]),
            (Op::PushInt, &[1]),
            (Op::Pop, &[]),
            (Op::Goto, &[14]),
            (Op::PushException, &[]),
            (Op::Pop, &[]),
            (Op::Ret, &[]),
        ]);
        let handler = c[4].offset;
        assert_eq!(handler, 12);
        let regions = [ExceptionEntry::new(1, handler, 13)];
        assert_eq!(verify(&c, &regions), Ok(2));
    }
}
