//! The polymorphic container: an owned [`Any`] or borrowed [`AnyView`]
//! holding a `(type, value)` pair.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::codec::{self, Decoder};
use crate::convert;
use crate::error::{ApiError, SigilError};
use crate::native::{FromSigil, GuessMode, ToSigil};
use crate::policy::Policy;
use crate::scan;
use crate::typestr;

/// An owned self-describing `(type, value)` pair.
///
/// Construction always validates: the type must satisfy the grammar and the
/// value bytes must scan against it exactly. Structural equality is byte
/// equality of the canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Any {
    ty: String,
    value: Vec<u8>,
}

impl Any {
    /// Validate `value` against `ty` and take ownership of both.
    pub fn new(ty: impl Into<String>, value: Vec<u8>) -> Result<Self, SigilError> {
        let ty = ty.into();
        typestr::validate(&ty)?;
        scan::scan_exact(&ty, &value)?;
        Ok(Any { ty, value })
    }

    /// The canonical zero value of `ty`.
    pub fn from_type(ty: &str) -> Result<Self, SigilError> {
        let value = typestr::default_value(ty)?;
        Ok(Any {
            ty: ty.to_string(),
            value,
        })
    }

    /// A void-typed any: empty type, zero value bytes.
    pub fn void() -> Self {
        Any {
            ty: String::new(),
            value: Vec::new(),
        }
    }

    /// Serialize a host value, inferring its type from its shape.
    pub fn from_value<T: ToSigil + ?Sized>(value: &T, mode: GuessMode) -> Result<Self, SigilError> {
        let ty = value.guess_type(mode)?;
        let mut out = Vec::new();
        value.encode_guessed(mode, &mut out)?;
        Any::new(ty, out)
    }

    /// Serialize a host value against a supplied type string.
    pub fn from_value_as<T: ToSigil + ?Sized>(value: &T, ty: &str) -> Result<Self, SigilError> {
        typestr::validate(ty)?;
        let mut out = Vec::new();
        value.encode_as(ty, GuessMode::Normal, &mut out)?;
        Any::new(ty, out)
    }

    pub(crate) fn from_parts_unchecked(ty: String, value: Vec<u8>) -> Self {
        Any { ty, value }
    }

    /// The type string.
    pub fn type_str(&self) -> &str {
        &self.ty
    }

    /// The serialized value bytes.
    pub fn value_bytes(&self) -> &[u8] {
        &self.value
    }

    /// Whether this is the void pair (empty type, empty value).
    pub fn is_void(&self) -> bool {
        self.ty.is_empty()
    }

    /// Borrow as a view.
    pub fn as_view(&self) -> AnyView<'_> {
        AnyView {
            ty: &self.ty,
            value: &self.value,
        }
    }

    /// Produce a new pair of type `target` under `policy`.
    pub fn convert_to(&self, target: &str, policy: Policy) -> Result<Any, SigilError> {
        self.as_view().convert_to(target, policy)
    }

    /// Convert to `T`'s native type string, then decode.
    pub fn get_as<T: FromSigil>(&self, policy: Policy) -> Result<T, SigilError> {
        self.as_view().get_as(policy)
    }

    /// Append the framed wire form: `u32` type length + type bytes + `u32`
    /// value length + value bytes.
    pub fn write_framed(&self, out: &mut Vec<u8>) {
        codec::write_len_prefixed(out, self.ty.as_bytes());
        codec::write_len_prefixed(out, &self.value);
    }

    /// Read one framed pair, returning it and the unconsumed rest.
    pub fn read_framed(bytes: &[u8]) -> Result<(Any, &[u8]), SigilError> {
        let mut dec = Decoder::new(bytes);
        let ty_bytes = dec.read_len_prefixed()?;
        let ty = core::str::from_utf8(ty_bytes)
            .map_err(|_| ApiError::new("framed type is not valid UTF-8"))?;
        let value = dec.read_len_prefixed()?;
        let any = Any::new(ty, value.to_vec())?;
        Ok((any, dec.remaining()))
    }

    /// Consume self into its `(type, value)` parts.
    pub fn into_parts(self) -> (String, Vec<u8>) {
        (self.ty, self.value)
    }
}

/// A borrowed `(type, value)` pair over externally owned memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnyView<'a> {
    ty: &'a str,
    value: &'a [u8],
}

impl<'a> AnyView<'a> {
    /// Validate `value` against `ty` and borrow both.
    pub fn new(ty: &'a str, value: &'a [u8]) -> Result<Self, SigilError> {
        typestr::validate(ty)?;
        scan::scan_exact(ty, value)?;
        Ok(AnyView { ty, value })
    }

    pub(crate) fn from_parts_unchecked(ty: &'a str, value: &'a [u8]) -> Self {
        AnyView { ty, value }
    }

    /// The type string.
    pub fn type_str(&self) -> &'a str {
        self.ty
    }

    /// The serialized value bytes.
    pub fn value_bytes(&self) -> &'a [u8] {
        self.value
    }

    /// Whether this is the void pair.
    pub fn is_void(&self) -> bool {
        self.ty.is_empty()
    }

    /// Copy into an owned [`Any`].
    pub fn to_any(&self) -> Any {
        Any {
            ty: self.ty.to_string(),
            value: self.value.to_vec(),
        }
    }

    /// Produce a new owned pair of type `target` under `policy`.
    pub fn convert_to(&self, target: &str, policy: Policy) -> Result<Any, SigilError> {
        typestr::validate(target)?;
        if self.ty == target {
            return Ok(self.to_any());
        }
        let bytes = convert::convert_serialized(self.ty, self.value, target, policy)?;
        Ok(Any::from_parts_unchecked(target.to_string(), bytes))
    }

    /// Convert to `T`'s native type string, then decode.
    pub fn get_as<T: FromSigil>(&self, policy: Policy) -> Result<T, SigilError> {
        let want = T::type_string();
        if self.ty == want {
            let mut dec = Decoder::new(self.value);
            return T::decode(&mut dec);
        }
        let bytes = convert::convert_serialized(self.ty, self.value, &want, policy)?;
        let mut dec = Decoder::new(&bytes);
        T::decode(&mut dec)
    }
}

impl PartialEq<AnyView<'_>> for Any {
    fn eq(&self, other: &AnyView<'_>) -> bool {
        self.ty == other.ty && self.value == other.value
    }
}

impl PartialEq<Any> for AnyView<'_> {
    fn eq(&self, other: &Any) -> bool {
        self.ty == other.ty && self.value == other.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn construction_validates_both_halves() {
        assert!(Any::new("i", vec![0, 0, 0, 1]).is_ok());
        assert!(matches!(
            Any::new("q", vec![]),
            Err(SigilError::Typestring(_))
        ));
        assert!(matches!(
            Any::new("i", vec![0, 0]),
            Err(SigilError::ValueMismatch(_))
        ));
        // trailing value bytes are a mismatch too
        assert!(matches!(
            Any::new("i", vec![0, 0, 0, 1, 9]),
            Err(SigilError::ValueMismatch(_))
        ));
    }

    #[test]
    fn from_type_materializes_defaults() {
        let any = Any::from_type("t2is").unwrap();
        assert_eq!(any.value_bytes(), &[0; 8]);
        assert!(Any::from_type("").unwrap().is_void());
    }

    #[test]
    fn framed_round_trip() {
        let any = Any::new("i", vec![0, 0, 0, 7]).unwrap();
        let mut out = Vec::new();
        any.write_framed(&mut out);
        out.extend_from_slice(b"rest");
        let (back, rest) = Any::read_framed(&out).unwrap();
        assert_eq!(back, any);
        assert_eq!(rest, b"rest");
    }

    #[test]
    fn views_compare_structurally_with_owned() {
        let any = Any::new("s", vec![0, 0, 0, 2, b'h', b'i']).unwrap();
        let view = AnyView::new("s", &[0, 0, 0, 2, b'h', b'i']).unwrap();
        assert_eq!(any, view);
        assert_eq!(view.to_any(), any);
    }
}
