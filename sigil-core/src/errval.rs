//! The error value: a `(type, message, aux)` triple carried by `e`-typed
//! data and by `x`/`X` wrappers holding an error. An empty `type` is the
//! "no error" sentinel.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::codec::{self, Decoder, EndOfInput};
use crate::value::Any;

/// A structured error value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorValue {
    /// Error category; empty means "no error".
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Arbitrary structured context, possibly void.
    pub aux: Any,
}

impl ErrorValue {
    /// Build an error value with void auxiliary context.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        ErrorValue {
            kind: kind.into(),
            message: message.into(),
            aux: Any::void(),
        }
    }

    /// Build an error value carrying auxiliary context.
    pub fn with_aux(kind: impl Into<String>, message: impl Into<String>, aux: Any) -> Self {
        ErrorValue {
            kind: kind.into(),
            message: message.into(),
            aux,
        }
    }

    /// The "no error" sentinel: all three components empty.
    pub fn none() -> Self {
        ErrorValue {
            kind: String::new(),
            message: String::new(),
            aux: Any::void(),
        }
    }

    /// Whether this is the "no error" sentinel.
    pub fn is_none(&self) -> bool {
        self.kind.is_empty()
    }

    /// Append the wire form: two length-prefixed strings plus a framed any.
    pub fn encode(&self, out: &mut Vec<u8>) {
        codec::write_len_prefixed(out, self.kind.as_bytes());
        codec::write_len_prefixed(out, self.message.as_bytes());
        self.aux.write_framed(out);
    }

    /// Read the wire form. The bytes must already have scanned as `e`.
    pub(crate) fn decode_raw(dec: &mut Decoder<'_>) -> Result<Self, EndOfInput> {
        let kind = String::from_utf8_lossy(dec.read_len_prefixed()?).into_owned();
        let message = String::from_utf8_lossy(dec.read_len_prefixed()?).into_owned();
        let aux_ty = String::from_utf8_lossy(dec.read_len_prefixed()?).into_owned();
        let aux_value = dec.read_len_prefixed()?.to_vec();
        Ok(ErrorValue {
            kind,
            message,
            aux: Any::from_parts_unchecked(aux_ty, aux_value),
        })
    }
}

impl core::fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_none() {
            return write!(f, "(no error)");
        }
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan;

    #[test]
    fn wire_round_trip() {
        let err = ErrorValue::with_aux(
            "io",
            "file vanished",
            Any::new("i", alloc::vec![0, 0, 0, 42]).unwrap(),
        );
        let mut out = Vec::new();
        err.encode(&mut out);
        assert_eq!(scan::scan("e", &out).unwrap(), out.len());

        let mut dec = Decoder::new(&out);
        let back = ErrorValue::decode_raw(&mut dec).unwrap();
        assert_eq!(back, err);
        assert!(dec.is_at_end());
    }

    #[test]
    fn sentinel_is_sixteen_zero_bytes() {
        let mut out = Vec::new();
        ErrorValue::none().encode(&mut out);
        assert_eq!(out, alloc::vec![0u8; 16]);
        assert!(ErrorValue::none().is_none());
    }
}
