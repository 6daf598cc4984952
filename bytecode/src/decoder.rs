use crate::error::DecodeError;
use crate::instruction::Instruction;
use crate::op::Op;

/// Decodes a packed byte stream into [`Instruction`]s.
///
/// Unlike the builder side, the input is untrusted: unknown opcodes and
/// truncated operands are reported as [`DecodeError`]s and end the
/// iteration.
pub struct BytecodeDecoder<'a> {
    bytes: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> BytecodeDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            failed: false,
        }
    }

    /// Current byte offset in the stream.
    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.pos
    }

    #[inline(always)]
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// Decode the next instruction, or `None` at end of stream.
    pub fn decode_next(&mut self) -> Option<Result<Instruction, DecodeError>> {
        if self.is_at_end() || self.failed {
            return None;
        }
        let result = self.decode();
        self.failed = result.is_err();
        Some(result)
    }

    fn decode(&mut self) -> Result<Instruction, DecodeError> {
        let offset = self.pos as u32;
        let byte = self.bytes[self.pos];
        let op = Op::try_from(byte)
            .map_err(|byte| DecodeError::UnknownOpcode { offset, byte })?;
        let end = self.pos + op.width() as usize;
        if end > self.bytes.len() {
            return Err(DecodeError::Truncated { offset });
        }
        let mut args = [0u32; 2];
        for (i, arg) in args.iter_mut().take(op.operand_count()).enumerate() {
            let at = self.pos + 1 + 4 * i;
            let mut word = [0u8; 4];
            word.copy_from_slice(&self.bytes[at..at + 4]);
            *arg = u32::from_le_bytes(word);
        }
        self.pos = end;
        Ok(Instruction::new(offset, op, &args[..op.operand_count()]))
    }
}

impl Iterator for BytecodeDecoder<'_> {
    type Item = Result<Instruction, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decode_next()
    }
}

/// Decode a whole stream.
pub fn decode_all(bytes: &[u8]) -> Result<Vec<Instruction>, DecodeError> {
    BytecodeDecoder::new(bytes).collect()
}
