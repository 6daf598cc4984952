//! Control-flow context threaded through every emission call.
//!
//! A [`Flow`] names where `break`, `next`, `redo` and `retry` go from the
//! current position, and what has to be undone on the way there. Loops
//! and rescue handlers derive a new `Flow` for their bodies; nothing is
//! restored afterwards because the parent's value is never changed.

use std::rc::Rc;

use bytecode::Label;

use crate::ast::Node;

/// A jump destination together with the state it expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub label: Label,
    /// Stack depth at the destination, before any carried value.
    pub depth: u32,
    /// Length of the unwind list when the target was created.
    pub unwind: usize,
}

/// Something a jump out of the current construct must undo.
#[derive(Debug, Clone)]
pub enum Unwind<'a> {
    /// An `ensure` body, emitted again inline with the flow that was
    /// active where the `ensure` started. The inline copy sits outside
    /// `region`, the ensure's own handler region.
    Ensure {
        body: Option<&'a Node>,
        region: Rc<str>,
        outer: Rc<Flow<'a>>,
        depth: u32,
    },
    /// An exception saved by a `rescue` one slot above `depth`, restored
    /// with `pop_exception`.
    SavedException { depth: u32 },
}

#[derive(Debug, Clone, Default)]
pub struct Flow<'a> {
    pub break_to: Option<Target>,
    pub next_to: Option<Target>,
    pub redo_to: Option<Target>,
    pub retry_to: Option<Target>,
    /// Directly inside a block body (not nested in a loop of it).
    pub in_block: bool,
    pub in_rescue_handler: bool,
    pub unwind: Vec<Unwind<'a>>,
}

impl<'a> Flow<'a> {
    /// Flow at the top of a block body; `redo` restarts it.
    pub fn block(top: Label) -> Self {
        Self {
            redo_to: Some(Target {
                label: top,
                depth: 0,
                unwind: 0,
            }),
            in_block: true,
            ..Self::default()
        }
    }

    /// A target at `label` reached with `depth` values on the stack.
    pub fn target(&self, label: Label, depth: u32) -> Target {
        Target {
            label,
            depth,
            unwind: self.unwind.len(),
        }
    }

    /// Flow for a loop body. `redo` and `next` stay inside the loop, so a
    /// block around it no longer owns them.
    pub fn in_loop(&self, break_to: Target, next_to: Target, redo_to: Target) -> Self {
        Self {
            break_to: Some(break_to),
            next_to: Some(next_to),
            redo_to: Some(redo_to),
            in_block: false,
            ..self.clone()
        }
    }

    pub fn with_unwind(&self, entry: Unwind<'a>) -> Self {
        let mut flow = self.clone();
        flow.unwind.push(entry);
        flow
    }

    /// Flow for a rescue clause body.
    pub fn in_handler(&self, retry_to: Target) -> Self {
        Self {
            retry_to: Some(retry_to),
            in_rescue_handler: true,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytecode::BytecodeBuilder;

    #[test]
    fn loop_flow_hides_block() {
        let mut b = BytecodeBuilder::new(1);
        let top = b.new_label();
        let post = b.new_label();
        let block = Flow::block(top);
        assert!(block.in_block);

        let t = block.target(post, 3);
        let body = block.in_loop(t, t, t);
        assert!(!body.in_block);
        assert_eq!(body.break_to, Some(t));
        assert_eq!(block.break_to, None);
    }

    #[test]
    fn targets_remember_unwind_length() {
        let mut b = BytecodeBuilder::new(1);
        let l = b.new_label();
        let flow = Flow::default()
            .with_unwind(Unwind::SavedException { depth: 0 });
        assert_eq!(flow.target(l, 1).unwind, 1);
        let inner = flow.in_handler(flow.target(l, 1));
        assert!(inner.in_rescue_handler);
        assert_eq!(inner.unwind.len(), 1);
    }
}
