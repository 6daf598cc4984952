use bytecode::Literal;

use super::{Compiler, Result};
use crate::ast::{Node, NodeKind};
use crate::flow::Flow;

impl Compiler {
    pub(super) fn constant_literal(&mut self, kind: &NodeKind) {
        match kind {
            NodeKind::Integer(v) => self.b().push_int(*v),
            NodeKind::BigInteger(digits) => {
                self.b().push_literal(Literal::BigInteger(digits.clone()))
            }
            NodeKind::Float(f) => self.b().push_literal(Literal::Float(*f)),
            NodeKind::Str(s) => self.b().push_string(s),
            NodeKind::Symbol(s) => self.b().push_symbol(s),
            NodeKind::Regex { source, flags } => self.b().push_literal(Literal::Regex {
                source: source.clone(),
                flags: *flags,
            }),
            _ => self.b().push_nil(),
        }
    }

    /// `"a#{b}c"`: every part becomes a string, then one `string_build`.
    pub(super) fn dynamic_string<'a>(
        &mut self,
        parts: &'a [Node],
        flow: &Flow<'a>,
    ) -> Result<()> {
        if parts.is_empty() {
            self.b().push_string("");
            return Ok(());
        }
        for part in parts {
            match &part.kind {
                NodeKind::Str(s) => self.b().push_string(s),
                _ => {
                    self.emit(part, flow)?;
                    self.b().send("to_s", 0);
                }
            }
        }
        self.b().string_build(parts.len() as u32);
        Ok(())
    }

    /// `Regexp.new(string, flags)`. A `once` regex is built on first use
    /// and kept in a cache literal of this unit.
    pub(super) fn dynamic_regex<'a>(
        &mut self,
        parts: &'a [Node],
        flags: u32,
        once: bool,
        flow: &Flow<'a>,
    ) -> Result<()> {
        let cached = once.then(|| {
            let slot = self.b().new_cache();
            let done = self.b().new_label();
            self.b().push_cache(slot);
            self.b().dup();
            self.b().goto_if_true(done);
            self.b().pop();
            (slot, done)
        });
        self.b().push_const("Regexp");
        self.dynamic_string(parts, flow)?;
        self.b().push_int(i64::from(flags));
        self.b().send("new", 2);
        if let Some((slot, done)) = cached {
            self.b().set_cache(slot);
            self.mark(done)?;
        }
        Ok(())
    }

    /// `` `cmd` ``: the command string is handed to self.
    pub(super) fn execute_string<'a>(
        &mut self,
        parts: Option<&'a [Node]>,
        text: &str,
        flow: &Flow<'a>,
    ) -> Result<()> {
        self.b().push_self();
        match parts {
            Some(parts) => self.dynamic_string(parts, flow)?,
            None => self.b().push_string(text),
        }
        self.b().send("`", 1);
        Ok(())
    }

    /// `pattern =~ value`, with the literal side as the receiver.
    pub(super) fn regex_match<'a>(
        &mut self,
        pattern: &'a Node,
        value: &'a Node,
        pattern_first: bool,
        flow: &Flow<'a>,
    ) -> Result<()> {
        let (receiver, arg) = if pattern_first {
            (pattern, value)
        } else {
            (value, pattern)
        };
        self.emit(receiver, flow)?;
        self.emit(arg, flow)?;
        self.b().send("=~", 1);
        Ok(())
    }

    pub(super) fn last_line_match<'a>(&mut self, pattern: &'a Node, flow: &Flow<'a>) -> Result<()> {
        self.emit(pattern, flow)?;
        self.b().push_global("$_");
        self.b().send("=~", 1);
        Ok(())
    }

    /// `$1`: `Regexp.last_match(1)`.
    pub(super) fn nth_ref(&mut self, group: u32) {
        self.b().push_const("Regexp");
        self.b().push_int(i64::from(group));
        self.b().send("last_match", 1);
    }

    /// `$&` is group 0; the others read the last match data and give nil
    /// when there was no match.
    pub(super) fn back_ref(&mut self, kind: char) -> Result<()> {
        if kind == '&' {
            self.nth_ref(0);
            return Ok(());
        }
        let done = self.b().new_label();
        self.b().push_const("Regexp");
        self.b().send("last_match", 0);
        self.b().dup();
        self.b().is_nil();
        self.b().goto_if_true(done);
        match kind {
            '`' => self.b().send("pre_match", 0),
            '\'' => self.b().send("post_match", 0),
            _ => {
                self.b().send("captures", 0);
                self.b().send("compact", 0);
                self.b().send("last", 0);
            }
        }
        self.mark(done)
    }

    /// Plain elements are gathered with `make_array`; each splat is cast
    /// and concatenated onto what came before it.
    pub(super) fn array<'a>(&mut self, elements: &'a [Node], flow: &Flow<'a>) -> Result<()> {
        let mut pending = 0;
        let mut have_array = false;
        for element in elements {
            match &element.kind {
                NodeKind::Splat(inner) => {
                    if pending > 0 {
                        self.flush_elements(pending, have_array);
                        have_array = true;
                        pending = 0;
                    }
                    self.emit(inner, flow)?;
                    self.b().cast_array();
                    if have_array {
                        self.b().send("+", 1);
                    }
                    have_array = true;
                }
                _ => {
                    self.emit(element, flow)?;
                    pending += 1;
                }
            }
        }
        if pending > 0 || !have_array {
            self.flush_elements(pending, have_array);
        }
        Ok(())
    }

    fn flush_elements(&mut self, count: u32, append: bool) {
        self.b().make_array(count);
        if append {
            self.b().send("+", 1);
        }
    }

    pub(super) fn hash<'a>(&mut self, pairs: &'a [(Node, Node)], flow: &Flow<'a>) -> Result<()> {
        for (key, value) in pairs {
            self.emit(key, flow)?;
            self.emit(value, flow)?;
        }
        self.b().make_hash(pairs.len() as u32);
        Ok(())
    }

    /// `Range.new(first, last, exclusive)`
    pub(super) fn range<'a>(
        &mut self,
        first: &'a Node,
        last: &'a Node,
        exclusive: bool,
        flow: &Flow<'a>,
    ) -> Result<()> {
        self.b().push_const("Range");
        self.emit(first, flow)?;
        self.emit(last, flow)?;
        if exclusive {
            self.b().push_true();
        } else {
            self.b().push_false();
        }
        self.b().send("new", 3);
        Ok(())
    }
}
