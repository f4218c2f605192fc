//! Crate-wide error taxonomy. Errors are values: they carry the type
//! strings involved, a positional marker, and a human-readable summary.

use alloc::string::{String, ToString};

use crate::convert::ConvertError;
use crate::errval::ErrorValue;
use crate::scan::ScanError;
use crate::typestr::TypestrError;

/// Render `ty` with a `*` marker inserted at byte position `pos`.
pub fn mark(ty: &str, pos: usize) -> String {
    let pos = pos.min(ty.len());
    let mut out = String::with_capacity(ty.len() + 1);
    out.push_str(&ty[..pos]);
    out.push('*');
    out.push_str(&ty[pos..]);
    out
}

/// Programmatic misuse of the API, e.g. inserting a key out of order or
/// asking a wview to swap with its own ancestor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// What the caller did wrong.
    pub message: String,
}

impl ApiError {
    /// Create an error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        ApiError {
            message: message.into(),
        }
    }
}

impl core::fmt::Display for ApiError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "api misuse: {}", self.message)
    }
}

impl core::error::Error for ApiError {}

/// A host value whose type could not be inferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotSerializableError {
    /// Why inference failed.
    pub message: String,
}

impl NotSerializableError {
    /// Create an error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        NotSerializableError {
            message: message.into(),
        }
    }
}

impl core::fmt::Display for NotSerializableError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "not serializable: {}", self.message)
    }
}

impl core::error::Error for NotSerializableError {}

/// Any failure the library can surface to a caller.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum SigilError {
    /// The type string violates the grammar.
    Typestring(TypestrError),
    /// The value bytes do not match the declared type.
    ValueMismatch(ScanError),
    /// Conversion between the two types is impossible under the given
    /// policy.
    TypeMismatch(ConvertError),
    /// Programmatic misuse.
    Api(ApiError),
    /// A host value whose type could not be inferred.
    NotSerializable(NotSerializableError),
    /// An `expected` was unwrapped while holding an error.
    ExpectedWithError(ErrorValue),
}

impl core::fmt::Display for SigilError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SigilError::Typestring(e) => write!(f, "{e}"),
            SigilError::ValueMismatch(e) => write!(f, "{e}"),
            SigilError::TypeMismatch(e) => write!(f, "{e}"),
            SigilError::Api(e) => write!(f, "{e}"),
            SigilError::NotSerializable(e) => write!(f, "{e}"),
            SigilError::ExpectedWithError(e) => {
                write!(f, "expected holds an error: {e}")
            }
        }
    }
}

impl core::error::Error for SigilError {}

impl From<TypestrError> for SigilError {
    fn from(e: TypestrError) -> Self {
        SigilError::Typestring(e)
    }
}

impl From<ScanError> for SigilError {
    fn from(e: ScanError) -> Self {
        SigilError::ValueMismatch(e)
    }
}

impl From<ApiError> for SigilError {
    fn from(e: ApiError) -> Self {
        SigilError::Api(e)
    }
}

impl From<NotSerializableError> for SigilError {
    fn from(e: NotSerializableError) -> Self {
        SigilError::NotSerializable(e)
    }
}

impl From<crate::codec::EndOfInput> for SigilError {
    fn from(e: crate::codec::EndOfInput) -> Self {
        SigilError::Api(ApiError::new(e.to_string()))
    }
}

impl SigilError {
    /// Short machine-readable code for this kind of error.
    pub const fn code(&self) -> &'static str {
        match self {
            SigilError::Typestring(_) => "sigil::typestring",
            SigilError::ValueMismatch(_) => "sigil::value_mismatch",
            SigilError::TypeMismatch(_) => "sigil::type_mismatch",
            SigilError::Api(_) => "sigil::api",
            SigilError::NotSerializable(_) => "sigil::not_serializable",
            SigilError::ExpectedWithError(_) => "sigil::expected_with_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_inserts_an_asterisk() {
        assert_eq!(mark("li", 1), "l*i");
        assert_eq!(mark("li", 0), "*li");
        assert_eq!(mark("li", 2), "li*");
        assert_eq!(mark("li", 99), "li*");
        assert_eq!(mark("", 0), "*");
    }
}
