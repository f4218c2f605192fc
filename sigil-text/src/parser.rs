//! Parser: textual notation to `(type, value)` pairs. Types never appear
//! in source text unless the author wants them to; an annotated value
//! `<T>v` parses `v` by shape and converts it to `T`.

use log::trace;

use sigil_core::{
    Any, ErrorValue, GuessMode, NotSerializableError, Policy, SigilError, codec,
};

use crate::error::{TextError, TextErrorKind};
use crate::tokenizer::{Span, Spanned, Token, Tokenizer};

/// Parse a complete textual value under [`GuessMode::Liberal`].
///
/// Liberal is the natural mode for human-written text: heterogeneous
/// containers wrap their elements in `a` instead of erroring.
pub fn parse(text: &str) -> Result<Any, TextError> {
    parse_with(text, GuessMode::Liberal)
}

/// Parse a complete textual value under an explicit guess mode.
pub fn parse_with(text: &str, mode: GuessMode) -> Result<Any, TextError> {
    trace!("parsing {} bytes of text", text.len());
    let mut p = Parser::new(text.as_bytes(), mode)?;
    if p.current.node == Token::Eof {
        return Ok(Any::void());
    }
    let value = p.value()?;
    if p.current.node != Token::Eof {
        return Err(TextError::new(TextErrorKind::TrailingInput, p.current.span));
    }
    Ok(value)
}

struct Parser<'input> {
    tokens: Tokenizer<'input>,
    current: Spanned<Token>,
    mode: GuessMode,
}

impl<'input> Parser<'input> {
    fn new(input: &'input [u8], mode: GuessMode) -> Result<Self, TextError> {
        let mut tokens = Tokenizer::new(input);
        let current = tokens.next_token()?;
        Ok(Parser {
            tokens,
            current,
            mode,
        })
    }

    fn bump(&mut self) -> Result<(), TextError> {
        self.current = self.tokens.next_token()?;
        Ok(())
    }

    fn unexpected(&self, expected: &'static str) -> TextError {
        TextError::new(
            TextErrorKind::UnexpectedToken {
                got: format!("{:?}", self.current.node),
                expected,
            },
            self.current.span,
        )
    }

    fn expect(&mut self, want: &Token, expected: &'static str) -> Result<(), TextError> {
        if self.current.node == *want {
            self.bump()
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn starts_value(tok: &Token) -> bool {
        matches!(
            tok,
            Token::True
                | Token::False
                | Token::Null
                | Token::Int(_)
                | Token::Double(_)
                | Token::String(_)
                | Token::Char(_)
                | Token::TypeAnnotation(_)
                | Token::LBracket
                | Token::LBrace
                | Token::LParen
                | Token::ErrKeyword
        )
    }

    fn value(&mut self) -> Result<Any, TextError> {
        let span = self.current.span;
        match self.current.node.clone() {
            Token::True => {
                self.bump()?;
                Ok(Any::new("b", vec![1])?)
            }
            Token::False => {
                self.bump()?;
                Ok(Any::new("b", vec![0])?)
            }
            Token::Null => {
                self.bump()?;
                Ok(Any::void())
            }
            Token::Int(v) => {
                self.bump()?;
                if (i64::from(i32::MIN)..=i64::from(i32::MAX)).contains(&v) {
                    Ok(Any::new("i", (v as i32).to_be_bytes().to_vec())?)
                } else {
                    Ok(Any::new("I", v.to_be_bytes().to_vec())?)
                }
            }
            Token::Double(v) => {
                self.bump()?;
                Ok(Any::new("d", v.to_be_bytes().to_vec())?)
            }
            Token::String(s) => {
                self.bump()?;
                let mut out = Vec::new();
                codec::write_len_prefixed(&mut out, s.as_bytes());
                Ok(Any::new("s", out)?)
            }
            Token::Char(c) => {
                self.bump()?;
                Ok(Any::new("c", vec![c])?)
            }
            Token::TypeAnnotation(ty) => {
                self.bump()?;
                if Self::starts_value(&self.current.node) {
                    let inner = self.value()?;
                    if inner.type_str() == ty {
                        Ok(inner)
                    } else {
                        inner
                            .convert_to(&ty, Policy::ALL)
                            .map_err(|e| TextError::new(TextErrorKind::Sigil(e), span))
                    }
                } else {
                    // a bare annotation materializes the type's default
                    Any::from_type(&ty).map_err(|e| TextError::new(TextErrorKind::Sigil(e), span))
                }
            }
            Token::LBracket => self.list(span),
            Token::LParen => self.tuple(span),
            Token::LBrace => self.map(span),
            Token::ErrKeyword => self.error_value(span),
            _ => Err(self.unexpected("a value")),
        }
    }

    fn list(&mut self, span: Span) -> Result<Any, TextError> {
        self.bump()?; // '['
        let mut elems = Vec::new();
        if self.current.node == Token::RBracket {
            self.bump()?;
            return self.assemble_list(elems, span);
        }
        loop {
            elems.push(self.value()?);
            match self.current.node {
                Token::Comma => self.bump()?,
                Token::RBracket => {
                    self.bump()?;
                    break;
                }
                _ => return Err(self.unexpected("`,` or `]`")),
            }
        }
        self.assemble_list(elems, span)
    }

    fn assemble_list(&self, elems: Vec<Any>, span: Span) -> Result<Any, TextError> {
        let mut out = Vec::new();
        codec::write_u32(&mut out, elems.len() as u32);
        if elems.is_empty() {
            return Ok(Any::new("la", out)?);
        }
        let first_ty = elems[0].type_str().to_string();
        let uniform =
            !first_ty.is_empty() && elems.iter().all(|e| e.type_str() == first_ty);
        if uniform {
            for e in &elems {
                out.extend_from_slice(e.value_bytes());
            }
            return Ok(Any::new(format!("l{first_ty}"), out)?);
        }
        if !matches!(self.mode, GuessMode::Liberal | GuessMode::Json) {
            return Err(TextError::new(
                TextErrorKind::NonUniform { what: "list" },
                span,
            ));
        }
        for e in &elems {
            frame_any(e, &mut out);
        }
        Ok(Any::new("la", out)?)
    }

    fn tuple(&mut self, span: Span) -> Result<Any, TextError> {
        self.bump()?; // '('
        let mut fields = Vec::new();
        if self.current.node == Token::RParen {
            self.bump()?;
            return Err(TextError::new(TextErrorKind::TupleTooShort, span));
        }
        loop {
            fields.push(self.value()?);
            match self.current.node {
                Token::Comma => self.bump()?,
                Token::RParen => {
                    self.bump()?;
                    break;
                }
                _ => return Err(self.unexpected("`,` or `)`")),
            }
        }
        if fields.len() < 2 {
            return Err(TextError::new(TextErrorKind::TupleTooShort, span));
        }
        if fields.iter().any(Any::is_void) {
            return Err(TextError::new(
                TextErrorKind::UnexpectedToken {
                    got: "null".to_string(),
                    expected: "a tuple field",
                },
                span,
            ));
        }
        let mut ty = format!("t{}", fields.len());
        let mut out = Vec::new();
        for f in &fields {
            ty.push_str(f.type_str());
            out.extend_from_slice(f.value_bytes());
        }
        Ok(Any::new(ty, out)?)
    }

    fn map(&mut self, span: Span) -> Result<Any, TextError> {
        self.bump()?; // '{'
        let mut pairs: Vec<(Any, Any)> = Vec::new();
        if self.current.node == Token::RBrace {
            self.bump()?;
            // an empty map defaults to string keys and wrapped values
            return Ok(Any::new("msa", vec![0, 0, 0, 0])?);
        }
        loop {
            let key = self.value()?;
            self.expect(&Token::Colon, "`:`")?;
            let value = self.value()?;
            pairs.push((key, value));
            match self.current.node {
                Token::Comma => self.bump()?,
                Token::RBrace => {
                    self.bump()?;
                    break;
                }
                _ => return Err(self.unexpected("`,` or `}`")),
            }
        }
        self.assemble_map(pairs, span)
    }

    fn assemble_map(&self, pairs: Vec<(Any, Any)>, span: Span) -> Result<Any, TextError> {
        let key_ty = pairs[0].0.type_str().to_string();
        if key_ty.is_empty() || pairs.iter().any(|(k, _)| k.type_str() != key_ty) {
            return Err(TextError::new(
                TextErrorKind::NonUniform { what: "map keys" },
                span,
            ));
        }
        if self.mode == GuessMode::Json && key_ty != "s" {
            return Err(TextError::new(
                TextErrorKind::Sigil(SigilError::NotSerializable(NotSerializableError::new(
                    "JSON maps require string keys",
                ))),
                span,
            ));
        }
        let first_val_ty = pairs[0].1.type_str().to_string();
        let uniform_vals = !first_val_ty.is_empty()
            && pairs.iter().all(|(_, v)| v.type_str() == first_val_ty);
        let val_ty = if uniform_vals {
            first_val_ty
        } else if matches!(self.mode, GuessMode::Liberal | GuessMode::Json) {
            "a".to_string()
        } else {
            return Err(TextError::new(
                TextErrorKind::NonUniform { what: "map" },
                span,
            ));
        };

        let mut encoded: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(pairs.len());
        for (k, v) in &pairs {
            let mut vb = Vec::new();
            if val_ty == "a" && v.type_str() != "a" {
                frame_any(v, &mut vb);
            } else {
                vb.extend_from_slice(v.value_bytes());
            }
            encoded.push((k.value_bytes().to_vec(), vb));
        }
        encoded.sort_by(|a, b| a.0.cmp(&b.0));
        if encoded.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err(TextError::new(TextErrorKind::DuplicateKey, span));
        }
        let mut out = Vec::new();
        codec::write_u32(&mut out, encoded.len() as u32);
        for (k, v) in encoded {
            out.extend_from_slice(&k);
            out.extend_from_slice(&v);
        }
        Ok(Any::new(format!("m{key_ty}{val_ty}"), out)?)
    }

    fn error_value(&mut self, span: Span) -> Result<Any, TextError> {
        self.bump()?; // 'err'
        self.expect(&Token::LParen, "`(`")?;
        let kind = self.string_arg()?;
        self.expect(&Token::Comma, "`,`")?;
        let message = self.string_arg()?;
        self.expect(&Token::Comma, "`,`")?;
        let aux = self.value()?;
        self.expect(&Token::RParen, "`)`")?;
        let mut out = Vec::new();
        ErrorValue::with_aux(kind, message, aux).encode(&mut out);
        Ok(Any::new("e", out).map_err(|e| TextError::new(TextErrorKind::Sigil(e), span))?)
    }

    fn string_arg(&mut self) -> Result<String, TextError> {
        match self.current.node.clone() {
            Token::String(s) => {
                self.bump()?;
                Ok(s)
            }
            _ => Err(self.unexpected("a string")),
        }
    }
}

/// Frame `any` as an `a` payload. A value that is already an `a` carries
/// its framing in its value bytes.
fn frame_any(any: &Any, out: &mut Vec<u8>) {
    if any.type_str() == "a" {
        out.extend_from_slice(any.value_bytes());
    } else {
        any.write_framed(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_infer_their_types() {
        assert_eq!(parse("true").unwrap().type_str(), "b");
        assert_eq!(parse("1").unwrap().type_str(), "i");
        assert_eq!(parse("3000000000").unwrap().type_str(), "I");
        assert_eq!(parse("1.5").unwrap().type_str(), "d");
        assert_eq!(parse("2e3").unwrap().type_str(), "d");
        assert_eq!(parse("\"x\"").unwrap().type_str(), "s");
        assert_eq!(parse("'x'").unwrap().type_str(), "c");
        assert!(parse("").unwrap().is_void());
    }

    #[test]
    fn homogeneous_lists_stay_homogeneous() {
        let any = parse("[1, 2, 3]").unwrap();
        assert_eq!(any.type_str(), "li");
        let mut expect = Vec::new();
        codec::write_u32(&mut expect, 3);
        for v in [1i32, 2, 3] {
            expect.extend_from_slice(&v.to_be_bytes());
        }
        assert_eq!(any.value_bytes(), &expect);
    }

    #[test]
    fn heterogeneous_lists_wrap_under_liberal() {
        let any = parse_with("[1, \"x\"]", GuessMode::Liberal).unwrap();
        assert_eq!(any.type_str(), "la");

        let err = parse_with("[1, \"x\"]", GuessMode::Normal).unwrap_err();
        assert_eq!(err.kind, TextErrorKind::NonUniform { what: "list" });
    }

    #[test]
    fn liberal_map_fixture() {
        // {"a":1,"b":[1,1]} becomes msa with framed values, keys ascending
        let any = parse_with(r#"{"a":1,"b":[1,1]}"#, GuessMode::Liberal).unwrap();
        assert_eq!(any.type_str(), "msa");

        let mut expect = Vec::new();
        codec::write_u32(&mut expect, 2);
        codec::write_len_prefixed(&mut expect, b"a");
        codec::write_len_prefixed(&mut expect, b"i");
        codec::write_len_prefixed(&mut expect, &1i32.to_be_bytes());
        codec::write_len_prefixed(&mut expect, b"b");
        codec::write_len_prefixed(&mut expect, b"li");
        let mut list = Vec::new();
        codec::write_u32(&mut list, 2);
        codec::write_i32(&mut list, 1);
        codec::write_i32(&mut list, 1);
        codec::write_len_prefixed(&mut expect, &list);
        assert_eq!(any.value_bytes(), &expect);
    }

    #[test]
    fn tuples_need_two_fields() {
        let any = parse("(1, \"x\")").unwrap();
        assert_eq!(any.type_str(), "t2is");
        assert_eq!(
            parse("(1)").unwrap_err().kind,
            TextErrorKind::TupleTooShort
        );
    }

    #[test]
    fn annotations_convert() {
        let any = parse("<I>42").unwrap();
        assert_eq!(any.type_str(), "I");
        assert_eq!(any.value_bytes(), &42i64.to_be_bytes());

        let any = parse("<oi>").unwrap();
        assert_eq!(any.value_bytes(), &[0]);

        let any = parse("<oi>5").unwrap();
        assert_eq!(any.value_bytes(), &[1, 0, 0, 0, 5]);

        let any = parse("<oi>null").unwrap();
        assert_eq!(any.value_bytes(), &[0]);

        let any = parse("<a>5").unwrap();
        assert_eq!(any.type_str(), "a");
    }

    #[test]
    fn error_values_parse() {
        let any = parse(r#"err("io","gone",<i>42)"#).unwrap();
        assert_eq!(any.type_str(), "e");
        let err: ErrorValue = any.get_as(Policy::NONE).unwrap();
        assert_eq!(err.kind, "io");
        assert_eq!(err.message, "gone");
        assert_eq!(err.aux.type_str(), "i");
    }

    #[test]
    fn whitespace_and_nesting_are_insignificant() {
        let pretty = indoc::indoc! {r#"
            {
                "rows": [
                    (1, "one"),
                    (2, "two")
                ],
                "total": 2
            }
        "#};
        let any = parse(pretty).unwrap();
        assert_eq!(any.type_str(), "msa");
        assert_eq!(any, parse(r#"{"rows":[(1,"one"),(2,"two")],"total":2}"#).unwrap());
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let err = parse(r#"{"a":1,"a":2}"#).unwrap_err();
        assert_eq!(err.kind, TextErrorKind::DuplicateKey);
    }

    #[test]
    fn trailing_input_is_rejected() {
        let err = parse("1 2").unwrap_err();
        assert_eq!(err.kind, TextErrorKind::TrailingInput);
    }
}
