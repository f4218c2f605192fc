//! The scanner: validate that a byte slice matches a type without decoding
//! any values. Strings are opaque bytes at this layer; UTF-8 is not
//! enforced. Presence tags and structural sizes are.

use alloc::string::{String, ToString};

use crate::codec::Decoder;
use crate::error::mark;
use crate::typestr;

/// Error produced while scanning value bytes against a type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanError {
    /// What went wrong.
    pub kind: ScanErrorKind,
    /// The type the value was scanned against.
    pub ty: String,
    /// Byte position within the type string.
    pub type_pos: usize,
    /// Byte offset within the value.
    pub value_pos: usize,
}

/// Specific kinds of scan failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanErrorKind {
    /// The value is shorter than the type demands, or a presence tag is
    /// neither 0 nor 1, or an embedded `a` payload is not self-contained.
    Value,
    /// A character in the type string is not a type code.
    Char(char),
    /// A tuple arity in the type string is malformed or below 2.
    CharNum,
    /// The type string ended mid-parse.
    CharEnd,
}

impl core::fmt::Display for ScanError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let marked = mark(&self.ty, self.type_pos);
        match self.kind {
            ScanErrorKind::Value => write!(
                f,
                "value does not match type `{marked}` (failed at value offset {})",
                self.value_pos
            ),
            ScanErrorKind::Char(c) => {
                write!(f, "bad type character `{c}` in `{marked}` while scanning")
            }
            ScanErrorKind::CharNum => write!(f, "bad tuple arity in `{marked}` while scanning"),
            ScanErrorKind::CharEnd => write!(f, "type `{marked}` ends mid-parse while scanning"),
        }
    }
}

impl core::error::Error for ScanError {}

type RawError = (ScanErrorKind, usize, usize);

/// Validate `value` against `ty` and return the number of bytes consumed.
///
/// Trailing value bytes are not an error here; callers that require full
/// consumption compare the returned count against `value.len()`.
pub fn scan(ty: &str, value: &[u8]) -> Result<usize, ScanError> {
    let mut dec = Decoder::new(value);
    if ty.is_empty() {
        return Ok(0);
    }
    let end = scan_at(ty, 0, &mut dec).map_err(|(kind, type_pos, value_pos)| ScanError {
        kind,
        ty: ty.to_string(),
        type_pos,
        value_pos,
    })?;
    if end != ty.len() {
        let c = ty[end..].chars().next().unwrap_or('\u{fffd}');
        return Err(ScanError {
            kind: ScanErrorKind::Char(c),
            ty: ty.to_string(),
            type_pos: end,
            value_pos: dec.offset(),
        });
    }
    Ok(dec.offset())
}

/// Like [`scan`], but additionally requires that every value byte is
/// consumed.
pub fn scan_exact(ty: &str, value: &[u8]) -> Result<(), ScanError> {
    let consumed = scan(ty, value)?;
    if consumed != value.len() {
        return Err(ScanError {
            kind: ScanErrorKind::Value,
            ty: ty.to_string(),
            type_pos: ty.len(),
            value_pos: consumed,
        });
    }
    Ok(())
}

/// Skip one complete type starting at `pos`, consuming no value bytes.
fn skip_type(ty: &str, pos: usize, vpos: usize) -> Result<usize, RawError> {
    match typestr_skip(ty, pos) {
        Ok(end) => Ok(end),
        Err((kind, tpos)) => Err((kind, tpos, vpos)),
    }
}

fn typestr_skip(ty: &str, pos: usize) -> Result<usize, (ScanErrorKind, usize)> {
    let bytes = ty.as_bytes();
    let Some(&c) = bytes.get(pos) else {
        return Err((ScanErrorKind::CharEnd, pos));
    };
    match c {
        b'b' | b'c' | b'i' | b'I' | b'd' | b's' | b'X' | b'e' | b'a' => Ok(pos + 1),
        b'l' | b'o' | b'x' => typestr_skip(ty, pos + 1),
        b'm' => {
            let after_key = typestr_skip(ty, pos + 1)?;
            typestr_skip(ty, after_key)
        }
        b't' => {
            let (arity, mut cur) = read_arity(ty, pos)?;
            for _ in 0..arity {
                cur = typestr_skip(ty, cur)?;
            }
            Ok(cur)
        }
        _ => Err((
            ScanErrorKind::Char(ty[pos..].chars().next().unwrap_or('\u{fffd}')),
            pos,
        )),
    }
}

fn read_arity(ty: &str, pos: usize) -> Result<(usize, usize), (ScanErrorKind, usize)> {
    let bytes = ty.as_bytes();
    let mut cur = pos + 1;
    let mut arity = 0usize;
    let mut digits = 0usize;
    while let Some(&d) = bytes.get(cur) {
        if !d.is_ascii_digit() {
            break;
        }
        arity = arity
            .checked_mul(10)
            .and_then(|a| a.checked_add((d - b'0') as usize))
            .ok_or((ScanErrorKind::CharNum, cur))?;
        digits += 1;
        cur += 1;
    }
    if digits == 0 {
        return Err(if cur == ty.len() {
            (ScanErrorKind::CharEnd, cur)
        } else {
            (ScanErrorKind::CharNum, cur)
        });
    }
    if arity < 2 {
        return Err((ScanErrorKind::CharNum, pos + 1));
    }
    Ok((arity, cur))
}

/// Scan one complete type starting at `pos`, consuming the matching value
/// bytes. Returns the position just past the type.
fn scan_at(ty: &str, pos: usize, dec: &mut Decoder<'_>) -> Result<usize, RawError> {
    let bytes = ty.as_bytes();
    let value_err = |dec: &Decoder<'_>| (ScanErrorKind::Value, pos, dec.offset());
    let Some(&c) = bytes.get(pos) else {
        return Err((ScanErrorKind::CharEnd, pos, dec.offset()));
    };
    match c {
        b'b' | b'c' => {
            dec.read_u8().map_err(|_| value_err(dec))?;
            Ok(pos + 1)
        }
        b'i' => {
            dec.advance(4).map_err(|_| value_err(dec))?;
            Ok(pos + 1)
        }
        b'I' | b'd' => {
            dec.advance(8).map_err(|_| value_err(dec))?;
            Ok(pos + 1)
        }
        b's' => {
            dec.read_len_prefixed().map_err(|_| value_err(dec))?;
            Ok(pos + 1)
        }
        b'l' => {
            let count = dec.read_u32().map_err(|_| value_err(dec))?;
            let mut end = skip_type(ty, pos + 1, dec.offset())?;
            for _ in 0..count {
                end = scan_at(ty, pos + 1, dec)?;
            }
            Ok(end)
        }
        b'm' => {
            let count = dec.read_u32().map_err(|_| value_err(dec))?;
            let key_end = skip_type(ty, pos + 1, dec.offset())?;
            let mut end = skip_type(ty, key_end, dec.offset())?;
            for _ in 0..count {
                scan_at(ty, pos + 1, dec)?;
                end = scan_at(ty, key_end, dec)?;
            }
            Ok(end)
        }
        b't' => {
            let (arity, mut cur) =
                read_arity(ty, pos).map_err(|(kind, tpos)| (kind, tpos, dec.offset()))?;
            for _ in 0..arity {
                cur = scan_at(ty, cur, dec)?;
            }
            Ok(cur)
        }
        b'o' => {
            let tag = dec.read_u8().map_err(|_| value_err(dec))?;
            match tag {
                0 => skip_type(ty, pos + 1, dec.offset()),
                1 => scan_at(ty, pos + 1, dec),
                _ => Err(value_err(dec)),
            }
        }
        b'x' => {
            let tag = dec.read_u8().map_err(|_| value_err(dec))?;
            match tag {
                0 => {
                    scan_error_triple(pos, dec)?;
                    skip_type(ty, pos + 1, dec.offset())
                }
                1 => scan_at(ty, pos + 1, dec),
                _ => Err(value_err(dec)),
            }
        }
        b'X' => {
            let tag = dec.read_u8().map_err(|_| value_err(dec))?;
            match tag {
                0 => {
                    scan_error_triple(pos, dec)?;
                    Ok(pos + 1)
                }
                1 => Ok(pos + 1),
                _ => Err(value_err(dec)),
            }
        }
        b'e' => {
            scan_error_triple(pos, dec)?;
            Ok(pos + 1)
        }
        b'a' => {
            scan_any(pos, dec)?;
            Ok(pos + 1)
        }
        _ => Err((
            ScanErrorKind::Char(ty[pos..].chars().next().unwrap_or('\u{fffd}')),
            pos,
            dec.offset(),
        )),
    }
}

/// The `(s, s, a)` error triple.
fn scan_error_triple(tpos: usize, dec: &mut Decoder<'_>) -> Result<(), RawError> {
    dec.read_len_prefixed()
        .map_err(|_| (ScanErrorKind::Value, tpos, dec.offset()))?;
    dec.read_len_prefixed()
        .map_err(|_| (ScanErrorKind::Value, tpos, dec.offset()))?;
    scan_any(tpos, dec)
}

/// An `a` payload: embedded type and value, each length-prefixed. The
/// embedded pair must be self-contained.
fn scan_any(tpos: usize, dec: &mut Decoder<'_>) -> Result<(), RawError> {
    let value_err = |dec: &Decoder<'_>| (ScanErrorKind::Value, tpos, dec.offset());
    let ty_bytes = dec.read_len_prefixed().map_err(|_| value_err(dec))?;
    let inner_ty = core::str::from_utf8(ty_bytes).map_err(|_| value_err(dec))?;
    if typestr::validate(inner_ty).is_err() {
        return Err(value_err(dec));
    }
    let inner_value = dec.read_len_prefixed().map_err(|_| value_err(dec))?;
    match scan(inner_ty, inner_value) {
        Ok(consumed) if consumed == inner_value.len() => Ok(()),
        _ => Err(value_err(dec)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{write_len_prefixed, write_u32};
    use alloc::vec;
    use alloc::vec::Vec;

    #[test]
    fn scalars_consume_their_fixed_widths() {
        assert_eq!(scan("b", &[1]).unwrap(), 1);
        assert_eq!(scan("i", &[0; 4]).unwrap(), 4);
        assert_eq!(scan("I", &[0; 8]).unwrap(), 8);
        assert_eq!(scan("d", &[0; 8]).unwrap(), 8);
        assert_eq!(scan("", b"").unwrap(), 0);
    }

    #[test]
    fn short_values_fail_with_value_kind() {
        let err = scan("I", &[0; 4]).unwrap_err();
        assert_eq!(err.kind, ScanErrorKind::Value);

        let mut bytes = Vec::new();
        write_u32(&mut bytes, 3);
        bytes.extend_from_slice(&[0; 8]); // two of three i32 elements
        let err = scan("li", &bytes).unwrap_err();
        assert_eq!(err.kind, ScanErrorKind::Value);
    }

    #[test]
    fn bad_type_characters_are_reported() {
        assert_eq!(scan("z", &[]).unwrap_err().kind, ScanErrorKind::Char('z'));
        assert_eq!(scan("l", &[0; 4]).unwrap_err().kind, ScanErrorKind::CharEnd);
        assert_eq!(scan("t1i", &[0; 4]).unwrap_err().kind, ScanErrorKind::CharNum);
    }

    #[test]
    fn empty_list_still_validates_element_type() {
        let mut bytes = Vec::new();
        write_u32(&mut bytes, 0);
        assert_eq!(scan("li", &bytes).unwrap(), 4);
        assert_eq!(scan("lz", &bytes).unwrap_err().kind, ScanErrorKind::Char('z'));
    }

    #[test]
    fn presence_tags_must_be_zero_or_one() {
        assert_eq!(scan("oi", &[0]).unwrap(), 1);
        assert_eq!(scan("oi", &[1, 0, 0, 0, 7]).unwrap(), 5);
        assert_eq!(scan("oi", &[2]).unwrap_err().kind, ScanErrorKind::Value);
    }

    #[test]
    fn expected_with_error_scans_the_triple() {
        let mut bytes = vec![0u8]; // tag 0: error follows
        write_len_prefixed(&mut bytes, b"kind");
        write_len_prefixed(&mut bytes, b"message");
        write_len_prefixed(&mut bytes, b""); // aux any: void type
        write_len_prefixed(&mut bytes, b""); // aux any: empty value
        assert_eq!(scan("xi", &bytes).unwrap(), bytes.len());
        assert_eq!(scan("X", &bytes).unwrap(), bytes.len());
    }

    #[test]
    fn any_payload_must_be_self_contained() {
        let mut good = Vec::new();
        write_len_prefixed(&mut good, b"i");
        write_len_prefixed(&mut good, &[0, 0, 0, 7]);
        assert_eq!(scan("a", &good).unwrap(), good.len());

        // embedded value shorter than the embedded type demands
        let mut bad = Vec::new();
        write_len_prefixed(&mut bad, b"i");
        write_len_prefixed(&mut bad, &[0, 0]);
        assert_eq!(scan("a", &bad).unwrap_err().kind, ScanErrorKind::Value);

        // embedded type does not parse
        let mut bad = Vec::new();
        write_len_prefixed(&mut bad, b"q");
        write_len_prefixed(&mut bad, b"");
        assert_eq!(scan("a", &bad).unwrap_err().kind, ScanErrorKind::Value);
    }

    #[test]
    fn maps_scan_pairs() {
        let mut bytes = Vec::new();
        write_u32(&mut bytes, 2);
        for (k, v) in [(1i32, b"x"), (2, b"y")] {
            bytes.extend_from_slice(&k.to_be_bytes());
            write_len_prefixed(&mut bytes, v);
        }
        assert_eq!(scan("mis", &bytes).unwrap(), bytes.len());
    }

    #[test]
    fn trailing_type_characters_are_rejected() {
        assert_eq!(scan("ii", &[0; 8]).unwrap_err().kind, ScanErrorKind::Char('i'));
    }
}
