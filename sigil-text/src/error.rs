//! Error type for text parsing and printing.

use core::fmt::{self, Display};

use sigil_core::SigilError;

use crate::tokenizer::{Span, TokenError, TokenErrorKind};

/// Error type for the textual notation.
#[derive(Debug, Clone, PartialEq)]
pub struct TextError {
    /// The specific kind of error.
    pub kind: TextErrorKind,
    /// Source span where the error occurred, when known.
    pub span: Option<Span>,
}

impl TextError {
    /// Create a new error with span information.
    pub const fn new(kind: TextErrorKind, span: Span) -> Self {
        TextError {
            kind,
            span: Some(span),
        }
    }

    /// Create an error without span information.
    pub const fn without_span(kind: TextErrorKind) -> Self {
        TextError { kind, span: None }
    }
}

impl Display for TextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(span) = self.span {
            write!(f, " at offset {}", span.start)?;
        }
        Ok(())
    }
}

impl std::error::Error for TextError {}

/// Specific error kinds for the textual notation.
#[derive(Debug, Clone, PartialEq)]
pub enum TextErrorKind {
    /// Tokenizer error.
    Token(TokenErrorKind),
    /// Unexpected token.
    UnexpectedToken {
        /// The token that was found.
        got: String,
        /// What was expected instead.
        expected: &'static str,
    },
    /// Container elements do not share one type and the mode does not wrap
    /// them.
    NonUniform {
        /// Which container kind.
        what: &'static str,
    },
    /// The same serialized key appeared more than once in a map.
    DuplicateKey,
    /// A tuple with fewer than two fields.
    TupleTooShort,
    /// Input remained after a complete value.
    TrailingInput,
    /// The value's type has no representation in the selected output
    /// format.
    Unprintable {
        /// The offending type.
        ty: String,
    },
    /// A string value is not valid UTF-8.
    InvalidUtf8String,
    /// An underlying type/value/conversion failure.
    Sigil(SigilError),
}

impl Display for TextErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextErrorKind::Token(e) => write!(f, "{e}"),
            TextErrorKind::UnexpectedToken { got, expected } => {
                write!(f, "unexpected token: got {got}, expected {expected}")
            }
            TextErrorKind::NonUniform { what } => {
                write!(f, "non-uniform types in {what}")
            }
            TextErrorKind::DuplicateKey => write!(f, "duplicate map key"),
            TextErrorKind::TupleTooShort => {
                write!(f, "tuples require at least two non-void fields")
            }
            TextErrorKind::TrailingInput => write!(f, "input remains after a complete value"),
            TextErrorKind::Unprintable { ty } => {
                write!(f, "type `{ty}` has no representation in this output format")
            }
            TextErrorKind::InvalidUtf8String => write!(f, "string value is not valid UTF-8"),
            TextErrorKind::Sigil(e) => write!(f, "{e}"),
        }
    }
}

impl From<TokenError> for TextError {
    fn from(e: TokenError) -> Self {
        TextError::new(TextErrorKind::Token(e.kind), e.span)
    }
}

impl From<SigilError> for TextError {
    fn from(e: SigilError) -> Self {
        TextError::without_span(TextErrorKind::Sigil(e))
    }
}
