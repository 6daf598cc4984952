use core::fmt;
use std::fmt::Write as _;

use crate::decoder::decode_all;
use crate::error::DecodeError;
use crate::exceptions::ExceptionTable;
use crate::instruction::Instruction;
use crate::line_table::LineTable;
use crate::literal::Literal;
use crate::op::{Op, OperandKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// Top-level code of a file.
    Script,
    Method,
    Block,
    /// A class, module or singleton-class body.
    Body,
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MethodKind::Script => "script",
            MethodKind::Method => "method",
            MethodKind::Block => "block",
            MethodKind::Body => "body",
        })
    }
}

/// Everything about a unit that is not produced by emission itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub name: String,
    pub file: String,
    pub kind: MethodKind,
    pub required_args: u32,
    pub total_args: u32,
    pub splat_index: Option<u32>,
    /// One name per local slot, in slot order.
    pub local_names: Vec<String>,
    pub primitive: Option<u32>,
}

impl MethodInfo {
    pub fn new(name: impl Into<String>, kind: MethodKind) -> Self {
        Self {
            name: name.into(),
            file: String::new(),
            kind,
            required_args: 0,
            total_args: 0,
            splat_index: None,
            local_names: Vec::new(),
            primitive: None,
        }
    }
}

/// The finished artifact for one method, block, body or script.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledMethod {
    pub name: String,
    pub file: String,
    pub kind: MethodKind,
    pub bytecode: Vec<u8>,
    pub literals: Vec<Literal>,
    pub required_args: u32,
    pub total_args: u32,
    pub splat_index: Option<u32>,
    pub local_count: u32,
    pub local_names: Vec<String>,
    pub exceptions: ExceptionTable,
    pub lines: LineTable,
    pub primitive: Option<u32>,
    pub stack_size: u32,
}

impl CompiledMethod {
    /// A method with no code.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file: String::new(),
            kind: MethodKind::Method,
            bytecode: Vec::new(),
            literals: Vec::new(),
            required_args: 0,
            total_args: 0,
            splat_index: None,
            local_count: 0,
            local_names: Vec::new(),
            exceptions: ExceptionTable::default(),
            lines: LineTable::default(),
            primitive: None,
            stack_size: 0,
        }
    }

    pub fn decode(&self) -> Result<Vec<Instruction>, DecodeError> {
        decode_all(&self.bytecode)
    }

    pub fn literal(&self, idx: u32) -> Option<&Literal> {
        self.literals.get(idx as usize)
    }

    /// Nested methods and blocks held in the literal pool.
    pub fn children(&self) -> impl Iterator<Item = &CompiledMethod> {
        self.literals.iter().filter_map(Literal::as_method)
    }

    /// Human-readable listing, nested units indented below their parent.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        self.disassemble_into(&mut out, 0);
        out
    }

    fn disassemble_into(&self, out: &mut String, indent: usize) {
        let pad = " ".repeat(indent);
        let _ = writeln!(
            out,
            "{pad}== {} {} ({}) ==",
            self.kind,
            self.name,
            if self.file.is_empty() { "-" } else { &self.file }
        );
        let splat = self
            .splat_index
            .map(|s| s.to_string())
            .unwrap_or_else(|| "none".to_string());
        let _ = writeln!(
            out,
            "{pad}args: required={} total={} splat={splat}",
            self.required_args, self.total_args
        );
        let _ = writeln!(
            out,
            "{pad}locals ({}): {}",
            self.local_count,
            self.local_names.join(", ")
        );
        let _ = writeln!(out, "{pad}stack: {}", self.stack_size);
        if let Some(p) = self.primitive {
            let _ = writeln!(out, "{pad}primitive: {p}");
        }

        let _ = writeln!(out, "{pad}-- bytecode --");
        match self.decode() {
            Ok(code) => {
                for instr in &code {
                    let _ = writeln!(
                        out,
                        "{pad}{:04}: {}{}",
                        instr.offset,
                        instr,
                        self.annotate(instr)
                    );
                }
            }
            Err(e) => {
                let _ = writeln!(out, "{pad}<{e}>");
            }
        }

        if !self.exceptions.is_empty() {
            let _ = writeln!(out, "{pad}-- exceptions --");
            for e in self.exceptions.entries() {
                let _ = writeln!(out, "{pad}{e}");
            }
        }

        for (idx, lit) in self.literals.iter().enumerate() {
            if let Literal::Method(m) = lit {
                let _ = writeln!(out, "{pad}  >> literal {idx}");
                m.disassemble_into(out, indent + 4);
            }
        }
    }

    fn annotate(&self, instr: &Instruction) -> String {
        let mut notes = Vec::new();
        for (kind, &arg) in instr.op.operands().iter().zip(instr.args()) {
            match kind {
                OperandKind::Literal => {
                    if let Some(lit) = self.literal(arg) {
                        notes.push(lit.to_string());
                    }
                }
                OperandKind::Local
                    if !matches!(
                        instr.op,
                        Op::PushLocalDepth | Op::SetLocalDepth
                    ) =>
                {
                    if let Some(name) = self.local_names.get(arg as usize) {
                        notes.push(name.clone());
                    }
                }
                _ => {}
            }
        }
        if notes.is_empty() {
            String::new()
        } else {
            format!("    ; {}", notes.join(" "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::BytecodeBuilder;

    #[test]
    fn disassembly_names_literals_and_locals() {
        let mut b = BytecodeBuilder::new(1);
        b.push_local(0, 0);
        b.send("succ", 0);
        b.ret();
        let mut info = MethodInfo::new("bump", MethodKind::Method);
        info.local_names = vec!["n".into()];
        info.required_args = 1;
        info.total_args = 1;
        let m = b.finish(info).unwrap();
        let text = m.disassemble();
        assert!(text.contains("== method bump (-) =="), "{text}");
        assert!(text.contains("0000: push_local 0    ; n"), "{text}");
        assert!(text.contains("0005: send_method 0    ; :succ"), "{text}");
        assert!(text.contains("args: required=1 total=1 splat=none"));
    }

    #[test]
    fn nested_methods_are_listed() {
        let mut inner = BytecodeBuilder::new(1);
        inner.push_nil();
        inner.ret();
        let inner = inner
            .finish(MethodInfo::new("__block__", MethodKind::Block))
            .unwrap();

        let mut b = BytecodeBuilder::new(1);
        b.create_block(inner);
        b.ret();
        let m = b.finish(MethodInfo::new("outer", MethodKind::Method)).unwrap();
        assert_eq!(m.children().count(), 1);
        assert!(m.disassemble().contains("    == block __block__"));
    }
}
