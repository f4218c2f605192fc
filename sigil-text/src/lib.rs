#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

mod error;
pub use error::*;

mod tokenizer;
pub use tokenizer::{Pos, Span, Spanned, TokenError, TokenErrorKind};

mod parser;
pub use parser::*;

mod printer;
pub use printer::*;
