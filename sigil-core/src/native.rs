//! Native bindings: mapping host values to and from `(type, value)` pairs.
//!
//! Serialization runs in one of two modes. *Guess mode* infers the type
//! from the value's shape; container elements must either share one
//! homogeneous type or, under [`GuessMode::Liberal`] / [`GuessMode::Json`],
//! they are wrapped individually in `a` and the container typed `la` /
//! `m…a`. *Typed mode* matches a supplied type string, converting numerics
//! per the usual rules and failing with an api error on shape mismatch.

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::codec::{self, Decoder};
use crate::convert;
use crate::error::{ApiError, NotSerializableError, SigilError};
use crate::errval::ErrorValue;
use crate::policy::Policy;
use crate::scan::{ScanError, ScanErrorKind};
use crate::typestr::{self, Head};
use crate::value::Any;

/// How guess-mode serialization treats heterogeneous containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GuessMode {
    /// Containers must be homogeneous.
    #[default]
    Normal,
    /// Heterogeneous containers are typed `la` / `m…a` with each element
    /// wrapped in `a`.
    Liberal,
    /// Like `Liberal`, and map keys must be strings.
    Json,
}

impl GuessMode {
    fn wraps_heterogeneous(self) -> bool {
        matches!(self, GuessMode::Liberal | GuessMode::Json)
    }
}

/// The canonical type string of a host type, independent of any value.
pub trait SigilType {
    /// The type string, e.g. `"li"` for `Vec<i32>`.
    fn type_string() -> String;
}

/// Decoding of a host value from its canonical serialized form.
pub trait FromSigil: SigilType + Sized {
    /// Read one value of [`SigilType::type_string`] shape.
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, SigilError>;
}

/// Serialization of a host value into a `(type, value)` pair.
pub trait ToSigil {
    /// Infer the type from this value's shape.
    fn guess_type(&self, mode: GuessMode) -> Result<String, SigilError>;

    /// Encode per the type [`Self::guess_type`] would infer.
    fn encode_guessed(&self, mode: GuessMode, out: &mut Vec<u8>) -> Result<(), SigilError>;

    /// Encode against a supplied type string.
    ///
    /// The default implementation guess-encodes and converts; containers
    /// override it to descend structurally.
    fn encode_as(&self, ty: &str, mode: GuessMode, out: &mut Vec<u8>) -> Result<(), SigilError> {
        encode_via_convert(self, ty, mode, out)
    }

    /// Serialize into an owned [`Any`], inferring the type.
    fn to_any(&self, mode: GuessMode) -> Result<Any, SigilError>
    where
        Self: Sized,
    {
        Any::from_value(self, mode)
    }
}

/// Guess-encode `value`, then convert the result to `ty`.
fn encode_via_convert<T: ToSigil + ?Sized>(
    value: &T,
    ty: &str,
    mode: GuessMode,
    out: &mut Vec<u8>,
) -> Result<(), SigilError> {
    let own = value.guess_type(mode)?;
    if own == ty {
        return value.encode_guessed(mode, out);
    }
    let mut tmp = Vec::new();
    value.encode_guessed(mode, &mut tmp)?;
    match convert::convert_serialized(&own, &tmp, ty, Policy::ALL) {
        Ok(bytes) => {
            out.extend_from_slice(&bytes);
            Ok(())
        }
        Err(e) => Err(ApiError::new(format!(
            "cannot serialize a `{own}` value as `{ty}`: {e}"
        ))
        .into()),
    }
}

impl<T: ToSigil + ?Sized> ToSigil for &T {
    fn guess_type(&self, mode: GuessMode) -> Result<String, SigilError> {
        (**self).guess_type(mode)
    }
    fn encode_guessed(&self, mode: GuessMode, out: &mut Vec<u8>) -> Result<(), SigilError> {
        (**self).encode_guessed(mode, out)
    }
    fn encode_as(&self, ty: &str, mode: GuessMode, out: &mut Vec<u8>) -> Result<(), SigilError> {
        (**self).encode_as(ty, mode, out)
    }
}

macro_rules! impl_fixed_scalar {
    ($t:ty, $code:literal, |$v:ident, $out:ident| $enc:expr, |$dec:ident| $dec_body:expr) => {
        impl SigilType for $t {
            fn type_string() -> String {
                $code.to_string()
            }
        }

        impl ToSigil for $t {
            fn guess_type(&self, _mode: GuessMode) -> Result<String, SigilError> {
                Ok($code.to_string())
            }
            fn encode_guessed(
                &self,
                _mode: GuessMode,
                out: &mut Vec<u8>,
            ) -> Result<(), SigilError> {
                let $v = *self;
                let $out = out;
                $enc;
                Ok(())
            }
        }

        impl FromSigil for $t {
            fn decode(dec: &mut Decoder<'_>) -> Result<Self, SigilError> {
                let $dec = dec;
                Ok($dec_body)
            }
        }
    };
}

impl_fixed_scalar!(bool, "b", |v, out| codec::write_u8(out, v as u8), |dec| {
    dec.read_u8()? != 0
});
impl_fixed_scalar!(u8, "c", |v, out| codec::write_u8(out, v), |dec| dec
    .read_u8()?);
impl_fixed_scalar!(i32, "i", |v, out| codec::write_i32(out, v), |dec| dec
    .read_i32()?);
impl_fixed_scalar!(i64, "I", |v, out| codec::write_i64(out, v), |dec| dec
    .read_i64()?);
impl_fixed_scalar!(f64, "d", |v, out| codec::write_f64(out, v), |dec| dec
    .read_f64()?);

macro_rules! impl_widening_int {
    ($t:ty, $code:literal, $write:path, $wide:ty) => {
        impl SigilType for $t {
            fn type_string() -> String {
                $code.to_string()
            }
        }

        impl ToSigil for $t {
            fn guess_type(&self, _mode: GuessMode) -> Result<String, SigilError> {
                Ok($code.to_string())
            }
            fn encode_guessed(
                &self,
                _mode: GuessMode,
                out: &mut Vec<u8>,
            ) -> Result<(), SigilError> {
                $write(out, *self as $wide);
                Ok(())
            }
        }
    };
}

impl_widening_int!(i16, "i", codec::write_i32, i32);
impl_widening_int!(u16, "i", codec::write_i32, i32);
impl_widening_int!(u32, "I", codec::write_i64, i64);

impl SigilType for u64 {
    fn type_string() -> String {
        "I".to_string()
    }
}

impl ToSigil for u64 {
    fn guess_type(&self, _mode: GuessMode) -> Result<String, SigilError> {
        if *self > i64::MAX as u64 {
            return Err(NotSerializableError::new(format!(
                "unsigned value {self} exceeds the signed 64-bit wire range"
            ))
            .into());
        }
        Ok("I".to_string())
    }
    fn encode_guessed(&self, mode: GuessMode, out: &mut Vec<u8>) -> Result<(), SigilError> {
        self.guess_type(mode)?;
        codec::write_i64(out, *self as i64);
        Ok(())
    }
}

impl ToSigil for f32 {
    fn guess_type(&self, _mode: GuessMode) -> Result<String, SigilError> {
        Ok("d".to_string())
    }
    fn encode_guessed(&self, _mode: GuessMode, out: &mut Vec<u8>) -> Result<(), SigilError> {
        codec::write_f64(out, f64::from(*self));
        Ok(())
    }
}

impl ToSigil for char {
    fn guess_type(&self, _mode: GuessMode) -> Result<String, SigilError> {
        if !self.is_ascii() {
            return Err(NotSerializableError::new(format!(
                "char {self:?} does not fit a single wire byte"
            ))
            .into());
        }
        Ok("c".to_string())
    }
    fn encode_guessed(&self, mode: GuessMode, out: &mut Vec<u8>) -> Result<(), SigilError> {
        self.guess_type(mode)?;
        codec::write_u8(out, *self as u8);
        Ok(())
    }
}

impl SigilType for () {
    fn type_string() -> String {
        String::new()
    }
}

impl ToSigil for () {
    fn guess_type(&self, _mode: GuessMode) -> Result<String, SigilError> {
        Ok(String::new())
    }
    fn encode_guessed(&self, _mode: GuessMode, _out: &mut Vec<u8>) -> Result<(), SigilError> {
        Ok(())
    }
}

impl FromSigil for () {
    fn decode(_dec: &mut Decoder<'_>) -> Result<Self, SigilError> {
        Ok(())
    }
}

impl SigilType for String {
    fn type_string() -> String {
        "s".to_string()
    }
}

impl SigilType for str {
    fn type_string() -> String {
        "s".to_string()
    }
}

impl ToSigil for str {
    fn guess_type(&self, _mode: GuessMode) -> Result<String, SigilError> {
        Ok("s".to_string())
    }
    fn encode_guessed(&self, _mode: GuessMode, out: &mut Vec<u8>) -> Result<(), SigilError> {
        codec::write_len_prefixed(out, self.as_bytes());
        Ok(())
    }
}

impl ToSigil for String {
    fn guess_type(&self, mode: GuessMode) -> Result<String, SigilError> {
        self.as_str().guess_type(mode)
    }
    fn encode_guessed(&self, mode: GuessMode, out: &mut Vec<u8>) -> Result<(), SigilError> {
        self.as_str().encode_guessed(mode, out)
    }
}

impl FromSigil for String {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, SigilError> {
        let at = dec.offset();
        let bytes = dec.read_len_prefixed()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| {
            SigilError::ValueMismatch(ScanError {
                kind: ScanErrorKind::Value,
                ty: "s".to_string(),
                type_pos: 0,
                value_pos: at,
            })
        })
    }
}

impl SigilType for Any {
    fn type_string() -> String {
        "a".to_string()
    }
}

impl ToSigil for Any {
    /// An any guesses as its own inner type, so a uniform `Vec<Any>` stays
    /// a plain homogeneous list.
    fn guess_type(&self, _mode: GuessMode) -> Result<String, SigilError> {
        Ok(self.type_str().to_string())
    }
    fn encode_guessed(&self, _mode: GuessMode, out: &mut Vec<u8>) -> Result<(), SigilError> {
        out.extend_from_slice(self.value_bytes());
        Ok(())
    }
    fn encode_as(&self, ty: &str, _mode: GuessMode, out: &mut Vec<u8>) -> Result<(), SigilError> {
        if ty == self.type_str() {
            out.extend_from_slice(self.value_bytes());
            return Ok(());
        }
        if ty == "a" {
            self.write_framed(out);
            return Ok(());
        }
        match convert::convert_serialized(self.type_str(), self.value_bytes(), ty, Policy::ALL) {
            Ok(bytes) => {
                out.extend_from_slice(&bytes);
                Ok(())
            }
            Err(e) => Err(ApiError::new(format!(
                "cannot serialize a `{}` value as `{ty}`: {e}",
                self.type_str()
            ))
            .into()),
        }
    }
}

impl FromSigil for Any {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, SigilError> {
        let ty_bytes = dec.read_len_prefixed()?;
        let ty = core::str::from_utf8(ty_bytes)
            .map_err(|_| ApiError::new("embedded type is not valid UTF-8"))?
            .to_string();
        let value = dec.read_len_prefixed()?.to_vec();
        Ok(Any::from_parts_unchecked(ty, value))
    }
}

impl SigilType for ErrorValue {
    fn type_string() -> String {
        "e".to_string()
    }
}

impl ToSigil for ErrorValue {
    fn guess_type(&self, _mode: GuessMode) -> Result<String, SigilError> {
        Ok("e".to_string())
    }
    fn encode_guessed(&self, _mode: GuessMode, out: &mut Vec<u8>) -> Result<(), SigilError> {
        self.encode(out);
        Ok(())
    }
}

impl FromSigil for ErrorValue {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, SigilError> {
        Ok(ErrorValue::decode_raw(dec)?)
    }
}

impl<T: SigilType> SigilType for Vec<T> {
    fn type_string() -> String {
        format!("l{}", T::type_string())
    }
}

/// Infer the element type of a sequence: one homogeneous type, or `a` when
/// the mode wraps heterogeneous elements.
fn guess_elem_type<'a, T: ToSigil + 'a>(
    elems: impl Iterator<Item = &'a T>,
    fallback: String,
    mode: GuessMode,
    what: &str,
) -> Result<String, SigilError> {
    let mut elem_ty: Option<String> = None;
    for e in elems {
        let t = e.guess_type(mode)?;
        match &elem_ty {
            None => elem_ty = Some(t),
            Some(prev) if *prev == t => {}
            Some(_) => {
                return if mode.wraps_heterogeneous() {
                    Ok("a".to_string())
                } else {
                    Err(NotSerializableError::new(format!("non-uniform types in {what}")).into())
                };
            }
        }
    }
    Ok(elem_ty.unwrap_or(fallback))
}

impl<T: ToSigil + SigilType> ToSigil for Vec<T> {
    fn guess_type(&self, mode: GuessMode) -> Result<String, SigilError> {
        let elem = guess_elem_type(self.iter(), T::type_string(), mode, "list")?;
        Ok(format!("l{elem}"))
    }
    fn encode_guessed(&self, mode: GuessMode, out: &mut Vec<u8>) -> Result<(), SigilError> {
        let ty = self.guess_type(mode)?;
        self.encode_as(&ty, mode, out)
    }
    fn encode_as(&self, ty: &str, mode: GuessMode, out: &mut Vec<u8>) -> Result<(), SigilError> {
        match typestr::head(ty) {
            Ok(Head::List(elem_ty)) => {
                codec::write_u32(out, self.len() as u32);
                for e in self {
                    encode_elem(e, elem_ty, mode, out)?;
                }
                Ok(())
            }
            _ => encode_via_convert(self, ty, mode, out),
        }
    }
}

/// Encode one container element against `elem_ty`, framing it when the
/// container carries anys.
fn encode_elem<T: ToSigil>(
    e: &T,
    elem_ty: &str,
    mode: GuessMode,
    out: &mut Vec<u8>,
) -> Result<(), SigilError> {
    if elem_ty == "a" {
        let inner_ty = e.guess_type(mode)?;
        if inner_ty == "a" {
            return e.encode_guessed(mode, out);
        }
        let mut tmp = Vec::new();
        e.encode_guessed(mode, &mut tmp)?;
        codec::write_len_prefixed(out, inner_ty.as_bytes());
        codec::write_len_prefixed(out, &tmp);
        Ok(())
    } else {
        e.encode_as(elem_ty, mode, out)
    }
}

impl<T: FromSigil> FromSigil for Vec<T> {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, SigilError> {
        let count = dec.read_u32()? as usize;
        let mut out = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            out.push(T::decode(dec)?);
        }
        Ok(out)
    }
}

impl<K: SigilType, V: SigilType> SigilType for BTreeMap<K, V> {
    fn type_string() -> String {
        format!("m{}{}", K::type_string(), V::type_string())
    }
}

impl<K: ToSigil + SigilType + Ord, V: ToSigil + SigilType> ToSigil for BTreeMap<K, V> {
    fn guess_type(&self, mode: GuessMode) -> Result<String, SigilError> {
        let mut key_ty: Option<String> = None;
        for k in self.keys() {
            let t = k.guess_type(mode)?;
            match &key_ty {
                None => key_ty = Some(t),
                Some(prev) if *prev == t => {}
                Some(_) => {
                    return Err(
                        NotSerializableError::new("non-uniform key types in map").into()
                    );
                }
            }
        }
        let key_ty = key_ty.unwrap_or_else(K::type_string);
        if mode == GuessMode::Json && key_ty != "s" {
            return Err(NotSerializableError::new("JSON maps require string keys").into());
        }
        let val_ty = guess_elem_type(self.values(), V::type_string(), mode, "map")?;
        Ok(format!("m{key_ty}{val_ty}"))
    }
    fn encode_guessed(&self, mode: GuessMode, out: &mut Vec<u8>) -> Result<(), SigilError> {
        let ty = self.guess_type(mode)?;
        self.encode_as(&ty, mode, out)
    }
    fn encode_as(&self, ty: &str, mode: GuessMode, out: &mut Vec<u8>) -> Result<(), SigilError> {
        match typestr::head(ty) {
            Ok(Head::Map(key_ty, val_ty)) => {
                // entries are stored ascending by serialized key, which is
                // not necessarily the host map's own order
                let mut pairs: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(self.len());
                for (k, v) in self {
                    let mut kb = Vec::new();
                    encode_elem(k, key_ty, mode, &mut kb)?;
                    let mut vb = Vec::new();
                    encode_elem(v, val_ty, mode, &mut vb)?;
                    pairs.push((kb, vb));
                }
                pairs.sort_by(|a, b| a.0.cmp(&b.0));
                codec::write_u32(out, pairs.len() as u32);
                for (k, v) in pairs {
                    out.extend_from_slice(&k);
                    out.extend_from_slice(&v);
                }
                Ok(())
            }
            _ => encode_via_convert(self, ty, mode, out),
        }
    }
}

impl<K: FromSigil + Ord, V: FromSigil> FromSigil for BTreeMap<K, V> {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, SigilError> {
        let count = dec.read_u32()?;
        let mut out = BTreeMap::new();
        for _ in 0..count {
            let k = K::decode(dec)?;
            let v = V::decode(dec)?;
            out.insert(k, v);
        }
        Ok(out)
    }
}

impl<T: SigilType> SigilType for Option<T> {
    fn type_string() -> String {
        format!("o{}", T::type_string())
    }
}

impl<T: ToSigil + SigilType> ToSigil for Option<T> {
    fn guess_type(&self, mode: GuessMode) -> Result<String, SigilError> {
        match self {
            Some(v) => Ok(format!("o{}", v.guess_type(mode)?)),
            None => Ok(format!("o{}", T::type_string())),
        }
    }
    fn encode_guessed(&self, mode: GuessMode, out: &mut Vec<u8>) -> Result<(), SigilError> {
        match self {
            Some(v) => {
                codec::write_u8(out, 1);
                v.encode_guessed(mode, out)
            }
            None => {
                codec::write_u8(out, 0);
                Ok(())
            }
        }
    }
    fn encode_as(&self, ty: &str, mode: GuessMode, out: &mut Vec<u8>) -> Result<(), SigilError> {
        match typestr::head(ty) {
            Ok(Head::Optional(inner)) => match self {
                Some(v) => {
                    codec::write_u8(out, 1);
                    v.encode_as(inner, mode, out)
                }
                None => {
                    codec::write_u8(out, 0);
                    Ok(())
                }
            },
            _ => encode_via_convert(self, ty, mode, out),
        }
    }
}

impl<T: FromSigil> FromSigil for Option<T> {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, SigilError> {
        match dec.read_u8()? {
            0 => Ok(None),
            _ => Ok(Some(T::decode(dec)?)),
        }
    }
}

impl<T: SigilType> SigilType for Result<T, ErrorValue> {
    fn type_string() -> String {
        format!("x{}", T::type_string())
    }
}

impl<T: ToSigil + SigilType> ToSigil for Result<T, ErrorValue> {
    fn guess_type(&self, mode: GuessMode) -> Result<String, SigilError> {
        match self {
            Ok(v) => Ok(format!("x{}", v.guess_type(mode)?)),
            Err(_) => Ok(format!("x{}", T::type_string())),
        }
    }
    fn encode_guessed(&self, mode: GuessMode, out: &mut Vec<u8>) -> Result<(), SigilError> {
        match self {
            Ok(v) => {
                codec::write_u8(out, 1);
                v.encode_guessed(mode, out)
            }
            Err(e) => {
                codec::write_u8(out, 0);
                e.encode(out);
                Ok(())
            }
        }
    }
}

impl<T: FromSigil> FromSigil for Result<T, ErrorValue> {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, SigilError> {
        match dec.read_u8()? {
            1 => Ok(Ok(T::decode(dec)?)),
            _ => Ok(Err(ErrorValue::decode_raw(dec)?)),
        }
    }
}

/// Assemble a tuple type from per-field types. Void fields occupy no wire
/// bytes and are omitted from the type; the arity counts what remains.
fn tuple_type_from_parts(parts: &[String]) -> String {
    let mut non_void = parts.iter().filter(|p| !p.is_empty());
    let count = non_void.clone().count();
    match count {
        0 => String::new(),
        1 => non_void.next().map(String::clone).unwrap_or_default(),
        n => {
            let mut out = format!("t{n}");
            for p in non_void {
                out.push_str(p);
            }
            out
        }
    }
}

macro_rules! impl_tuple {
    ($arity:literal, $($name:ident . $idx:tt),+) => {
        impl<$($name: SigilType),+> SigilType for ($($name,)+) {
            fn type_string() -> String {
                let parts = [$($name::type_string()),+];
                tuple_type_from_parts(&parts)
            }
        }

        impl<$($name: ToSigil),+> ToSigil for ($($name,)+) {
            fn guess_type(&self, mode: GuessMode) -> Result<String, SigilError> {
                let parts = [$(self.$idx.guess_type(mode)?),+];
                Ok(tuple_type_from_parts(&parts))
            }
            fn encode_guessed(&self, mode: GuessMode, out: &mut Vec<u8>) -> Result<(), SigilError> {
                $(self.$idx.encode_guessed(mode, out)?;)+
                Ok(())
            }
            fn encode_as(&self, ty: &str, mode: GuessMode, out: &mut Vec<u8>) -> Result<(), SigilError> {
                match typestr::head(ty) {
                    Ok(Head::Tuple(t)) if t.arity == $arity => {
                        let mut fields = t.fields();
                        $(
                            let field_ty = fields.next().ok_or_else(|| {
                                ApiError::new("tuple type ended before its declared arity")
                            })?;
                            self.$idx.encode_as(field_ty, mode, out)?;
                        )+
                        Ok(())
                    }
                    _ => encode_via_convert(self, ty, mode, out),
                }
            }
        }

        impl<$($name: FromSigil),+> FromSigil for ($($name,)+) {
            fn decode(dec: &mut Decoder<'_>) -> Result<Self, SigilError> {
                Ok(($($name::decode(dec)?,)+))
            }
        }
    };
}

impl_tuple!(2, A.0, B.1);
impl_tuple!(3, A.0, B.1, C.2);
impl_tuple!(4, A.0, B.1, C.2, D.3);

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn scalars_serialize_to_their_codes() {
        assert_eq!(42i64.to_any(GuessMode::Normal).unwrap().type_str(), "I");
        assert_eq!(
            4242i64.to_any(GuessMode::Normal).unwrap().value_bytes(),
            &4242i64.to_be_bytes()
        );
        assert_eq!(true.to_any(GuessMode::Normal).unwrap().value_bytes(), &[1]);
        assert_eq!(
            ToSigil::to_any(&"hi", GuessMode::Normal).unwrap().type_str(),
            "s"
        );
    }

    #[test]
    fn byte_vectors_are_byte_strings() {
        let any = vec![1u8, 2, 3].to_any(GuessMode::Normal).unwrap();
        assert_eq!(any.type_str(), "lc");
        assert_eq!(any.value_bytes(), &[0, 0, 0, 3, 1, 2, 3]);
    }

    #[test]
    fn uniform_any_lists_stay_homogeneous() {
        let list = vec![
            Any::from_value(&1i32, GuessMode::Normal).unwrap(),
            Any::from_value(&2i32, GuessMode::Normal).unwrap(),
        ];
        let any = list.to_any(GuessMode::Normal).unwrap();
        assert_eq!(any.type_str(), "li");
    }

    #[test]
    fn heterogeneous_lists_need_liberal_mode() {
        let list = vec![
            Any::from_value(&1i32, GuessMode::Normal).unwrap(),
            Any::from_value("x", GuessMode::Normal).unwrap(),
        ];
        assert!(matches!(
            list.to_any(GuessMode::Normal),
            Err(SigilError::NotSerializable(_))
        ));

        let any = list.to_any(GuessMode::Liberal).unwrap();
        assert_eq!(any.type_str(), "la");
        let mut expect = Vec::new();
        codec::write_u32(&mut expect, 2);
        codec::write_len_prefixed(&mut expect, b"i");
        codec::write_len_prefixed(&mut expect, &1i32.to_be_bytes());
        codec::write_len_prefixed(&mut expect, b"s");
        let mut s_val = Vec::new();
        codec::write_len_prefixed(&mut s_val, b"x");
        codec::write_len_prefixed(&mut expect, &s_val);
        assert_eq!(any.value_bytes(), &expect);
    }

    #[test]
    fn maps_encode_in_serialized_key_order() {
        let mut map = BTreeMap::new();
        map.insert(-1i32, 10i32);
        map.insert(1i32, 20i32);
        let any = map.to_any(GuessMode::Normal).unwrap();
        assert_eq!(any.type_str(), "mii");
        // big-endian two's complement puts 1 before -1
        let mut dec = Decoder::new(any.value_bytes());
        assert_eq!(dec.read_u32().unwrap(), 2);
        assert_eq!(dec.read_i32().unwrap(), 1);
        assert_eq!(dec.read_i32().unwrap(), 20);
        assert_eq!(dec.read_i32().unwrap(), -1);
        assert_eq!(dec.read_i32().unwrap(), 10);
    }

    #[test]
    fn json_mode_requires_string_keys() {
        let mut map = BTreeMap::new();
        map.insert(1i32, 2i32);
        assert!(matches!(
            map.to_any(GuessMode::Json),
            Err(SigilError::NotSerializable(_))
        ));
    }

    #[test]
    fn typed_mode_converts_and_rejects() {
        let any = Any::from_value_as(&7i64, "i").unwrap();
        assert_eq!(any.type_str(), "i");
        assert_eq!(any.value_bytes(), &7i32.to_be_bytes());
        assert!(matches!(
            Any::from_value_as(&7i64, "s"),
            Err(SigilError::Api(_))
        ));
    }

    #[test]
    fn tuples_and_options_round_trip() {
        let value = (1i32, "x".to_string());
        let any = value.to_any(GuessMode::Normal).unwrap();
        assert_eq!(any.type_str(), "t2is");
        let back: (i32, String) = any.get_as(Policy::NONE).unwrap();
        assert_eq!(back, value);

        let none: Option<i32> = None;
        let any = none.to_any(GuessMode::Normal).unwrap();
        assert_eq!(any.type_str(), "oi");
        assert_eq!(any.value_bytes(), &[0]);
        let back: Option<i32> = any.get_as(Policy::NONE).unwrap();
        assert_eq!(back, None);
    }

    #[test]
    fn get_as_converts_under_policy() {
        let any = Any::from_value(&4242i64, GuessMode::Normal).unwrap();
        assert_eq!(any.get_as::<i32>(Policy::INTS_NARROWING).unwrap(), 4242);
        assert!(any.get_as::<i32>(Policy::NONE).is_err());
    }

    #[test]
    fn get_as_any_recovers_the_pair() {
        let any = Any::from_value(&(1i32, "x".to_string()), GuessMode::Normal).unwrap();
        let rewrapped = any.convert_to("t2is", Policy::ANY).unwrap();
        let back: Any = rewrapped.get_as(Policy::ANY).unwrap();
        assert_eq!(back, any);
    }

    #[test]
    fn expecteds_map_to_result() {
        let ok: Result<i32, ErrorValue> = Ok(7);
        let any = ok.to_any(GuessMode::Normal).unwrap();
        assert_eq!(any.type_str(), "xi");
        let back: Result<i32, ErrorValue> = any.get_as(Policy::NONE).unwrap();
        assert_eq!(back, Ok(7));

        let err: Result<i32, ErrorValue> = Err(ErrorValue::new("io", "gone"));
        let any = err.to_any(GuessMode::Normal).unwrap();
        let back: Result<i32, ErrorValue> = any.get_as(Policy::NONE).unwrap();
        assert_eq!(back.unwrap_err().kind, "io");

        // unwrapping the value arm of an errored expected is the
        // distinguished failure
        assert!(matches!(
            any.get_as::<i32>(Policy::EXPECTED),
            Err(SigilError::ExpectedWithError(_))
        ));
    }

    #[test]
    fn void_fields_serialize_to_zero_bytes() {
        let value = (1i32, (), "x".to_string());
        let any = value.to_any(GuessMode::Normal).unwrap();
        assert_eq!(any.type_str(), "t2is");
        let back: (i32, (), String) = any.get_as(Policy::NONE).unwrap();
        assert_eq!(back, value);
    }
}
