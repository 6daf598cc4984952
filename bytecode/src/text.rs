//! Line-oriented textual assembly for hand-written methods.
//!
//! ```text
//! #arg n
//! #line 3
//!     push n
//!     push 1
//!     send_stack + 1
//!     set n
//! top:
//!     push n
//!     gif done
//!     goto top
//! done: push nil
//!     ret
//! ```
//!
//! A line is a `label:` (optionally followed by an instruction), a
//! `#directive args` line, or `mnemonic operand..`. `push` and `set`
//! accept pseudo-operands that lower to one or more real instructions.

use std::collections::HashMap;

use thiserror::Error;

use crate::builder::{BytecodeBuilder, Label};
use crate::error::AssembleError;
use crate::instruction::Operand;
use crate::literal::Literal;
use crate::method::{CompiledMethod, MethodInfo, MethodKind};
use crate::op::{Op, OperandKind};

/// An assembly failure with the 1-based line it was detected on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {source}")]
pub struct AsmError {
    pub line: u32,
    pub source: AssembleError,
}

fn syntax(message: impl Into<String>) -> AssembleError {
    AssembleError::Syntax(message.into())
}

/// Assemble `source` into a method called `name`.
pub fn assemble(
    source: &str,
    name: &str,
    file: &str,
) -> Result<CompiledMethod, AsmError> {
    let mut asm = TextAssembler::new();
    let mut lineno = 0;
    for line in source.lines() {
        lineno += 1;
        asm.line = lineno;
        asm.parse_line(line).map_err(|source| AsmError {
            line: lineno,
            source,
        })?;
    }
    asm.finish(name, file, lineno)
}

const MAX_LOCAL_SLOT: u32 = u16::MAX as u32;

struct TextAssembler {
    builder: BytecodeBuilder,
    labels: HashMap<String, (Label, u32)>,
    locals: Vec<String>,
    args: usize,
    open: Vec<(String, u32)>,
    primitive: Option<u32>,
    line: u32,
}

impl TextAssembler {
    fn new() -> Self {
        Self {
            builder: BytecodeBuilder::new(0),
            labels: HashMap::new(),
            locals: Vec::new(),
            args: 0,
            open: Vec::new(),
            primitive: None,
            line: 0,
        }
    }

    fn label(&mut self, name: &str) -> Label {
        if let Some(&(label, _)) = self.labels.get(name) {
            return label;
        }
        let label = self.builder.named_label(name);
        self.labels.insert(name.to_string(), (label, self.line));
        label
    }

    /// Make numbered slot `slot` part of the frame, naming the slots it
    /// adds `%N` so no identifier can refer to them.
    fn reserve_slot(&mut self, slot: u32) -> Result<(), AssembleError> {
        if slot > MAX_LOCAL_SLOT {
            return Err(syntax(format!("local slot {slot} out of range")));
        }
        while self.locals.len() <= slot as usize {
            let n = self.locals.len();
            self.locals.push(format!("%{n}"));
        }
        Ok(())
    }

    fn find_local(&mut self, name: &str) -> u32 {
        match self.locals.iter().position(|l| l == name) {
            Some(slot) => slot as u32,
            None => {
                self.locals.push(name.to_string());
                (self.locals.len() - 1) as u32
            }
        }
    }

    fn parse_line(&mut self, line: &str) -> Result<(), AssembleError> {
        let line = line.trim();
        if let Some(directive) = line.strip_prefix('#') {
            let (kind, args) = directive
                .split_once(char::is_whitespace)
                .unwrap_or((directive, ""));
            return self.parse_directive(kind, args.trim());
        }

        let mut rest = line;
        if let Some((head, tail)) = line.split_once(':') {
            if is_label_name(head) {
                let label = self.label(head);
                self.builder.mark_label(label)?;
                rest = tail.trim();
            }
        }
        if rest.is_empty() {
            return Ok(());
        }

        let parts: Vec<&str> = rest.split_whitespace().collect();
        self.parse_operation(parts[0], &parts[1..])
    }

    fn parse_directive(
        &mut self,
        kind: &str,
        args: &str,
    ) -> Result<(), AssembleError> {
        match kind {
            "line" => {
                let line = parse_u32(args)?;
                self.builder.set_line(line);
            }
            "exc_start" => {
                self.builder.open_region(args)?;
                self.open.push((args.to_string(), self.line));
            }
            "exceptions" => {
                self.expect_innermost(args)?;
                let end = self.label(&format!("{args}_end"));
                self.builder.goto(end);
                self.builder.mark_handler(args)?;
            }
            "exc_end" => {
                self.expect_innermost(args)?;
                let end = self.label(&format!("{args}_end"));
                self.builder.mark_label(end).map_err(|_| {
                    AssembleError::layout(args, "end defined twice")
                })?;
                self.builder.close_region(args)?;
                self.open.pop();
            }
            "primitive" => self.primitive = Some(parse_u32(args)?),
            "arg" => {
                if !is_ident(args) {
                    return Err(syntax(format!("bad argument name `{args}`")));
                }
                if self.locals.len() != self.args {
                    return Err(syntax(
                        "arguments must be declared before locals are used",
                    ));
                }
                if self.locals.iter().any(|l| l == args) {
                    return Err(syntax(format!("duplicate argument `{args}`")));
                }
                self.find_local(args);
                self.args += 1;
            }
            _ => return Err(syntax(format!("unknown directive `#{kind}`"))),
        }
        Ok(())
    }

    fn expect_innermost(&self, name: &str) -> Result<(), AssembleError> {
        match self.open.last() {
            Some((open, _)) if open == name => Ok(()),
            Some((open, _)) => Err(AssembleError::layout(
                name,
                format!("expected `{open}` to be closed first"),
            )),
            None => Err(AssembleError::layout(name, "no open region")),
        }
    }

    fn parse_operation(
        &mut self,
        mnemonic: &str,
        operands: &[&str],
    ) -> Result<(), AssembleError> {
        let one = || match operands {
            [one] => Ok(*one),
            _ => Err(syntax(format!(
                "`{mnemonic}` takes one operand, got {}",
                operands.len()
            ))),
        };
        match mnemonic {
            "push" => return self.parse_push(one()?),
            "set" => return self.parse_set(one()?),
            _ => {}
        }

        let canonical = match mnemonic {
            "git" => "goto_if_true",
            "gif" => "goto_if_false",
            "swap" => "swap_stack",
            "dup" => "dup_top",
            other => other,
        };
        let Some(op) = Op::from_mnemonic(canonical) else {
            return Err(AssembleError::UnknownOperation(mnemonic.to_string()));
        };
        if operands.len() != op.operand_count() {
            return Err(AssembleError::OperandCount {
                op: op.mnemonic(),
                expected: op.operand_count(),
                got: operands.len(),
            });
        }

        let mut args = Vec::with_capacity(operands.len());
        for (kind, text) in op.operands().iter().zip(operands) {
            args.push(self.operand(op, *kind, text)?);
        }
        self.builder.emit(op, &args)
    }

    fn operand(
        &mut self,
        op: Op,
        kind: OperandKind,
        text: &str,
    ) -> Result<Operand, AssembleError> {
        Ok(match kind {
            OperandKind::Target => Operand::Label(self.label(text)),
            OperandKind::Int => Operand::Int(parse_i32(text)? as u32),
            OperandKind::Literal => {
                Operand::Int(self.builder.add_literal(parse_literal(text)))
            }
            OperandKind::Local if is_ident(text) => {
                Operand::Int(self.find_local(text))
            }
            OperandKind::Local => {
                let slot = parse_u32(text).map_err(|_| {
                    syntax(format!("bad operand `{text}` for `{op}`"))
                })?;
                // a slot of an enclosing scope is not ours to allocate
                if !op.operands().contains(&OperandKind::Depth) {
                    self.reserve_slot(slot)?;
                }
                Operand::Int(slot)
            }
            OperandKind::Depth | OperandKind::Count => {
                Operand::Int(parse_u32(text).map_err(|_| {
                    syntax(format!("bad operand `{text}` for `{op}`"))
                })?)
            }
        })
    }

    fn parse_push(&mut self, what: &str) -> Result<(), AssembleError> {
        match what {
            "true" => self.builder.push_true(),
            "false" => self.builder.push_false(),
            "nil" => self.builder.push_nil(),
            "self" => self.builder.push_self(),
            _ => {
                if let Some(name) = what.strip_prefix('&') {
                    let label = self.label(name);
                    self.builder.emit(Op::PushInt, &[Operand::Label(label)])?;
                } else if what.starts_with('@') {
                    self.builder.push_ivar(what);
                } else if let Ok(v) = what.parse::<i64>() {
                    self.builder.push_int(v);
                } else if let Some((target, idx)) = parse_aref(what)? {
                    self.parse_push(target)?;
                    self.builder.push_int(idx);
                    self.builder.fetch_field();
                } else if is_ident(what) {
                    let slot = self.find_local(what);
                    self.builder.push_local(slot, 0);
                } else if let Some((local, field)) = parse_field(what) {
                    let slot = self.find_local(local);
                    let b = &mut self.builder;
                    b.push_local(slot, 0);
                    b.push_symbol(&format!("@{field}"));
                    b.send("instance_variable_get", 1);
                } else {
                    return Err(syntax(format!(
                        "unknown push operand `{what}`"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Store the value on top of the stack, leaving it there.
    fn parse_set(&mut self, what: &str) -> Result<(), AssembleError> {
        if is_ident(what) && !matches!(what, "true" | "false" | "nil" | "self")
        {
            let slot = self.find_local(what);
            self.builder.set_local(slot, 0);
        } else if what.starts_with('@') {
            self.builder.set_ivar(what);
        } else if let Some((target, idx)) = parse_aref(what)? {
            self.parse_push(target)?;
            self.builder.push_int(idx);
            self.builder.store_field();
        } else if let Some((local, field)) = parse_field(what) {
            let slot = self.find_local(local);
            let b = &mut self.builder;
            b.push_local(slot, 0);
            b.swap();
            b.push_symbol(&format!("@{field}"));
            b.swap();
            b.send("instance_variable_set", 2);
        } else {
            return Err(syntax(format!("unknown set operand `{what}`")));
        }
        Ok(())
    }

    fn finish(
        self,
        name: &str,
        file: &str,
        last_line: u32,
    ) -> Result<CompiledMethod, AsmError> {
        if let Some((region, line)) = self.open.last() {
            return Err(AsmError {
                line: *line,
                source: AssembleError::layout(region, "never closed"),
            });
        }
        let labels = self.labels;
        let mut info = MethodInfo::new(name, MethodKind::Method);
        info.file = file.to_string();
        info.required_args = self.args as u32;
        info.total_args = self.args as u32;
        info.local_names = self.locals;
        info.primitive = self.primitive;
        self.builder.finish(info).map_err(|source| {
            let line = match &source {
                AssembleError::UnresolvedLabel(l) => {
                    labels.get(l).map(|&(_, line)| line)
                }
                _ => None,
            };
            AsmError {
                line: line.unwrap_or(last_line),
                source,
            }
        })
    }
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_label_name(s: &str) -> bool {
    !s.is_empty()
        && !s.contains(char::is_whitespace)
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `local.field`
fn parse_field(s: &str) -> Option<(&str, &str)> {
    let (local, field) = s.split_once('.')?;
    (is_ident(local) && !field.is_empty()).then_some((local, field))
}

/// `expr[N]`
fn parse_aref(s: &str) -> Result<Option<(&str, i64)>, AssembleError> {
    let Some(inner) = s.strip_suffix(']') else {
        return Ok(None);
    };
    let Some((target, idx)) = inner.rsplit_once('[') else {
        return Ok(None);
    };
    let idx = idx
        .parse::<u32>()
        .map_err(|_| syntax(format!("bad index in `{s}`")))?;
    Ok(Some((target, idx as i64)))
}

fn parse_u32(s: &str) -> Result<u32, AssembleError> {
    s.parse().map_err(|_| syntax(format!("expected a number, got `{s}`")))
}

fn parse_i32(s: &str) -> Result<i32, AssembleError> {
    s.parse().map_err(|_| syntax(format!("expected an integer, got `{s}`")))
}

fn parse_literal(s: &str) -> Literal {
    if let Some(sym) = s.strip_prefix(':') {
        return Literal::symbol(sym);
    }
    if let Some(text) = s.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        return Literal::String(text.to_string());
    }
    if let Ok(i) = s.parse::<i64>() {
        return Literal::Integer(i);
    }
    if s.contains('.') {
        if let Ok(f) = s.parse::<f64>() {
            return Literal::Float(f);
        }
    }
    Literal::symbol(s)
}
