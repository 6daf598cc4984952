//! Lowers a parsed syntax tree into [`CompiledMethod`]s.
//!
//! The walk is a single depth-first pass per unit. Every `def`, block,
//! and class or module body becomes its own unit, stored in the literal
//! pool of the unit that defines it. Control flow that leaves a construct
//! (`break`, `next`, `redo`, `retry`, `return`) is resolved against an
//! explicit flow value rather than shared state, so nothing leaks
//! between sibling constructs.

pub mod ast;
mod compiler;
mod error;
mod flow;
pub mod scope;

use bytecode::CompiledMethod;
use log::{debug, warn};

pub use ast::{ConstPath, FormalArgs, LiteralValue, Node, NodeKind, RescueClause, When};
pub use compiler::Compiler;
pub use error::CompileError;

/// Where a unit came from and what it is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    pub file: String,
    pub first_line: u32,
    pub name: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            file: "(none)".to_string(),
            first_line: 1,
            name: "__script__".to_string(),
        }
    }
}

impl CompileOptions {
    pub fn for_file(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            ..Self::default()
        }
    }
}

/// One top-level tree to compile.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub options: CompileOptions,
    pub root: Node,
}

/// Compile each unit as a script. Without `keep_going` the batch stops at
/// the first failure, and the result list ends with that error.
pub fn compile_batch(
    units: &[SourceUnit],
    keep_going: bool,
) -> Vec<Result<CompiledMethod, CompileError>> {
    let mut results = Vec::with_capacity(units.len());
    for unit in units {
        let result = Compiler::compile_script(&unit.root, &unit.options);
        match &result {
            Ok(method) => {
                debug!("{}: {} bytes", unit.options.file, method.bytecode.len())
            }
            Err(e) => warn!("{}: {e}", unit.options.file),
        }
        let failed = result.is_err();
        results.push(result);
        if failed && !keep_going {
            break;
        }
    }
    results
}
