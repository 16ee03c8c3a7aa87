use crate::pdu_parse_error::PduParseErr;

/// Cursor over a received byte buffer. Reads past the end yield BufferEnded.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ByteReader { data, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_u8(&mut self, field: &'static str) -> Result<u8, PduParseErr> {
        let b = *self.data.get(self.pos).ok_or(PduParseErr::BufferEnded { field: Some(field) })?;
        self.pos += 1;
        Ok(b)
    }

    /// Reads `len` bytes as a big-endian unsigned integer, up to 8 bytes
    pub fn read_be(&mut self, len: usize, field: &'static str) -> Result<u64, PduParseErr> {
        let bytes = self.read_slice(len, field)?;
        Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
    }

    pub fn read_slice(&mut self, len: usize, field: &'static str) -> Result<&'a [u8], PduParseErr> {
        if self.remaining() < len {
            return Err(PduParseErr::BufferEnded { field: Some(field) });
        }
        let s = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(s)
    }

    /// Everything not consumed yet
    pub fn rest(&mut self) -> &'a [u8] {
        let s = &self.data[self.pos..];
        self.pos = self.data.len();
        s
    }
}
