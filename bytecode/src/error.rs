use thiserror::Error;

/// Failures while building, translating or verifying a method.
///
/// Any of these aborts the current unit; no artifact is produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssembleError {
    #[error("label `{0}` is used but never set")]
    UnresolvedLabel(String),

    #[error("label `{0}` is set more than once")]
    LabelRedefined(String),

    #[error("exception region `{name}`: {message}")]
    ExceptionLayout { name: String, message: String },

    #[error("unknown operation `{0}`")]
    UnknownOperation(String),

    #[error("`{op}` takes {expected} operand(s), got {got}")]
    OperandCount {
        op: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("stack underflow at offset {offset}")]
    StackUnderflow { offset: u32 },

    #[error(
        "stack depth mismatch at offset {offset}: {expected} vs {found}"
    )]
    StackImbalance {
        offset: u32,
        expected: u32,
        found: u32,
    },

    #[error("jump at offset {offset} targets {target}, which is not an instruction")]
    BadJumpTarget { offset: u32, target: u32 },

    #[error("{0}")]
    Syntax(String),
}

impl AssembleError {
    pub(crate) fn layout(name: &str, message: impl Into<String>) -> Self {
        AssembleError::ExceptionLayout {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

/// Failures while decoding a packed byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown opcode {byte:#04x} at offset {offset}")]
    UnknownOpcode { offset: u32, byte: u8 },

    #[error("instruction at offset {offset} is truncated")]
    Truncated { offset: u32 },
}
