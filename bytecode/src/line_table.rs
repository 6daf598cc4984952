//! Line table: maps bytecode offset ranges to source lines.
//!
//! Entries are `(start, end, line)` and always tile `[0, final_offset)`
//! without gaps. A compact form stores the final offset followed by
//! `(delta_start, delta_line)` pairs, the first unsigned VLQ and the
//! second zigzag + VLQ.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry {
    pub start: u32,
    pub end: u32,
    pub line: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineTable {
    entries: Vec<LineEntry>,
}

impl LineTable {
    pub fn entries(&self) -> &[LineEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Source line of the instruction at `ip`.
    pub fn line_at(&self, ip: u32) -> Option<u32> {
        let i = self.entries.partition_point(|e| e.end <= ip);
        self.entries
            .get(i)
            .filter(|e| e.start <= ip)
            .map(|e| e.line)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let Some(last) = self.entries.last() else {
            return buf;
        };
        encode_unsigned_vlq(last.end, &mut buf);
        let mut prev_start = 0;
        let mut prev_line: i64 = 0;
        for e in &self.entries {
            encode_unsigned_vlq(e.start - prev_start, &mut buf);
            encode_unsigned_vlq(zigzag_encode(e.line as i64 - prev_line), &mut buf);
            prev_start = e.start;
            prev_line = e.line as i64;
        }
        buf
    }
}

/// Collects `(offset, line)` marks while code is emitted.
#[derive(Debug, Clone)]
pub struct LineTableBuilder {
    marks: Vec<(u32, u32)>,
}

impl LineTableBuilder {
    /// The table starts at offset 0 with `first_line`.
    pub fn new(first_line: u32) -> Self {
        Self {
            marks: vec![(0, first_line)],
        }
    }

    /// Code emitted from `ip` on belongs to `line`.
    ///
    /// When nothing was emitted since the previous mark, that mark is
    /// overwritten so the table never holds zero-width ranges.
    pub fn mark(&mut self, ip: u32, line: u32) {
        let Some(&(last_ip, last_line)) = self.marks.last() else {
            self.marks.push((0, line));
            return;
        };
        if last_line == line {
            return;
        }
        if last_ip == ip {
            self.marks.pop();
            if self.marks.last().map(|m| m.1) != Some(line) {
                self.marks.push((ip, line));
            }
        } else {
            self.marks.push((ip, line));
        }
    }

    pub fn current_line(&self) -> u32 {
        self.marks.last().map(|m| m.1).unwrap_or(0)
    }

    pub fn finish(self, final_offset: u32) -> LineTable {
        let mut entries = Vec::with_capacity(self.marks.len());
        if final_offset == 0 {
            return LineTable { entries };
        }
        for (i, &(start, line)) in self.marks.iter().enumerate() {
            let end = self
                .marks
                .get(i + 1)
                .map(|m| m.0)
                .unwrap_or(final_offset)
                .min(final_offset);
            if start < end {
                entries.push(LineEntry { start, end, line });
            }
        }
        LineTable { entries }
    }
}

/// Look up the line for `target_pc` in an encoded line table.
pub fn line_for(encoded: &[u8], target_pc: u32) -> Option<u32> {
    let mut pos = 0;
    let end = decode_unsigned_vlq(encoded, &mut pos)?;
    if target_pc >= end {
        return None;
    }
    let mut start: u32 = 0;
    let mut line: i64 = 0;
    let mut best = None;

    while pos < encoded.len() {
        start += decode_unsigned_vlq(encoded, &mut pos)?;
        line += zigzag_decode(decode_unsigned_vlq(encoded, &mut pos)?);
        if start > target_pc {
            break;
        }
        best = Some(line as u32);
    }

    best
}

// ── VLQ helpers ─────────────────────────────────────────────────────

/// 7 data bits per byte, MSB set on all but the last byte.
fn encode_unsigned_vlq(mut value: u32, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn decode_unsigned_vlq(encoded: &[u8], pos: &mut usize) -> Option<u32> {
    let mut result: u32 = 0;
    let mut shift = 0;
    loop {
        let byte = *encoded.get(*pos)?;
        *pos += 1;
        result |= ((byte & 0x7F) as u32) << shift;
        if byte & 0x80 == 0 {
            return Some(result);
        }
        shift += 7;
        if shift >= 35 {
            return None;
        }
    }
}

fn zigzag_encode(value: i64) -> u32 {
    ((value << 1) ^ (value >> 63)) as u32
}

fn zigzag_decode(value: u32) -> i64 {
    ((value >> 1) as i64) ^ (-((value & 1) as i64))
}
