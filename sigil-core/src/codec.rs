//! Primitive wire codec: big-endian fixed-width integers and doubles, and
//! `u32` length-prefixed byte runs. No alignment, no varints.

use alloc::vec::Vec;

/// The input ended before a read could complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndOfInput {
    /// Offset at which the read started.
    pub offset: usize,
    /// Number of bytes the read required.
    pub needed: usize,
}

impl core::fmt::Display for EndOfInput {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "input ended at offset {} ({} more bytes required)",
            self.offset, self.needed
        )
    }
}

impl core::error::Error for EndOfInput {}

/// Positional reader over a byte slice.
pub struct Decoder<'input> {
    input: &'input [u8],
    offset: usize,
}

impl<'input> Decoder<'input> {
    /// Create a decoder positioned at the start of `input`.
    pub fn new(input: &'input [u8]) -> Self {
        Decoder { input, offset: 0 }
    }

    /// Current read offset.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The bytes not yet consumed.
    pub fn remaining(&self) -> &'input [u8] {
        &self.input[self.offset..]
    }

    /// Whether every byte has been consumed.
    pub fn is_at_end(&self) -> bool {
        self.offset == self.input.len()
    }

    /// Skip `n` bytes without reading them.
    pub fn advance(&mut self, n: usize) -> Result<(), EndOfInput> {
        self.take(n).map(|_| ())
    }

    /// Consume `n` raw bytes.
    pub fn take(&mut self, n: usize) -> Result<&'input [u8], EndOfInput> {
        if self.input.len() - self.offset < n {
            return Err(EndOfInput {
                offset: self.offset,
                needed: n,
            });
        }
        let bytes = &self.input[self.offset..self.offset + n];
        self.offset += n;
        Ok(bytes)
    }

    /// Consume one byte.
    pub fn read_u8(&mut self) -> Result<u8, EndOfInput> {
        Ok(self.take(1)?[0])
    }

    /// Consume a big-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, EndOfInput> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Consume a big-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32, EndOfInput> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Consume a big-endian `i64`.
    pub fn read_i64(&mut self) -> Result<i64, EndOfInput> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(i64::from_be_bytes(buf))
    }

    /// Consume a big-endian IEEE-754 double.
    pub fn read_f64(&mut self) -> Result<f64, EndOfInput> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(f64::from_be_bytes(buf))
    }

    /// Consume a `u32` length prefix followed by that many bytes.
    pub fn read_len_prefixed(&mut self) -> Result<&'input [u8], EndOfInput> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }
}

/// Append one byte.
pub fn write_u8(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

/// Append a big-endian `u32`.
pub fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// Append a big-endian `i32`.
pub fn write_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// Append a big-endian `i64`.
pub fn write_i64(out: &mut Vec<u8>, v: i64) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// Append a big-endian IEEE-754 double.
pub fn write_f64(out: &mut Vec<u8>, v: f64) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// Append a `u32` length prefix followed by `bytes`.
///
/// Lengths above `u32::MAX` are not representable on the wire; callers bound
/// input sizes before encoding.
pub fn write_len_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    write_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn integers_are_big_endian() {
        let mut out = Vec::new();
        write_i64(&mut out, 4242);
        assert_eq!(out, vec![0, 0, 0, 0, 0, 0, 0x10, 0x92]);

        let mut out = Vec::new();
        write_i32(&mut out, -1);
        assert_eq!(out, vec![0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn round_trips() {
        let mut out = Vec::new();
        write_u8(&mut out, 7);
        write_u32(&mut out, 0xdead_beef);
        write_i32(&mut out, -12345);
        write_i64(&mut out, i64::MIN);
        write_f64(&mut out, 1.5);
        write_len_prefixed(&mut out, b"abc");

        let mut dec = Decoder::new(&out);
        assert_eq!(dec.read_u8().unwrap(), 7);
        assert_eq!(dec.read_u32().unwrap(), 0xdead_beef);
        assert_eq!(dec.read_i32().unwrap(), -12345);
        assert_eq!(dec.read_i64().unwrap(), i64::MIN);
        assert_eq!(dec.read_f64().unwrap(), 1.5);
        assert_eq!(dec.read_len_prefixed().unwrap(), b"abc");
        assert!(dec.is_at_end());
    }

    #[test]
    fn short_reads_report_offset() {
        let mut dec = Decoder::new(&[0, 0]);
        let err = dec.read_u32().unwrap_err();
        assert_eq!(err, EndOfInput { offset: 0, needed: 4 });
    }
}
