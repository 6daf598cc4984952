use bytecode::AssembleError;
use thiserror::Error;

/// Why a unit failed to compile. The failed unit produces no artifact.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("line {line}: malformed node: {message}")]
    MalformedNode { line: u32, message: String },

    #[error("line {line}: `{keyword}` used outside of a loop or block")]
    InvalidControl { keyword: &'static str, line: u32 },

    #[error(transparent)]
    Assemble(#[from] AssembleError),
}

impl CompileError {
    pub fn malformed(line: u32, message: impl Into<String>) -> Self {
        CompileError::MalformedNode {
            line,
            message: message.into(),
        }
    }

    /// Source line the error was detected on, when one is known.
    pub fn line(&self) -> Option<u32> {
        match self {
            CompileError::MalformedNode { line, .. }
            | CompileError::InvalidControl { line, .. } => Some(*line),
            CompileError::Assemble(_) => None,
        }
    }
}
