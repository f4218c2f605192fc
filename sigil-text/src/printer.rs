//! Printer: `(type, value)` pairs to text, either the annotated form or
//! the JSON-compatible subset.

use sigil_core::codec::Decoder;
use sigil_core::typestr::{self, Head};
use sigil_core::{Any, AnyView};

use crate::error::{TextError, TextErrorKind};

/// Output notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// `<type>value`; every pair can be printed and re-parsed.
    #[default]
    Annotated,
    /// Pure JSON values; types the subset cannot express are refused.
    Json,
}

/// Options for printing.
#[derive(Debug, Clone, Default)]
pub struct PrintOptions {
    /// The output notation (default: annotated).
    pub format: Format,
}

impl PrintOptions {
    /// Create new default options (annotated output).
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the JSON subset.
    pub fn json(mut self) -> Self {
        self.format = Format::Json;
        self
    }
}

/// Print a borrowed pair.
pub fn print(view: &AnyView<'_>, options: &PrintOptions) -> Result<String, TextError> {
    let mut out = String::new();
    let mut dec = Decoder::new(view.value_bytes());
    match options.format {
        Format::Annotated => {
            out.push('<');
            out.push_str(view.type_str());
            out.push('>');
            value_text(view.type_str(), &mut dec, &mut out, Format::Annotated)?;
        }
        Format::Json => value_text(view.type_str(), &mut dec, &mut out, Format::Json)?,
    }
    Ok(out)
}

/// Print an owned pair in the annotated form.
pub fn to_text(any: &Any) -> Result<String, TextError> {
    print(&any.as_view(), &PrintOptions::new())
}

/// Print an owned pair in the JSON subset.
pub fn to_json(any: &Any) -> Result<String, TextError> {
    print(&any.as_view(), &PrintOptions::new().json())
}

fn unprintable(ty: &str) -> TextError {
    TextError::without_span(TextErrorKind::Unprintable { ty: ty.to_string() })
}

fn short_value(ty: &str) -> TextError {
    TextError::without_span(TextErrorKind::Sigil(sigil_core::SigilError::Api(
        sigil_core::ApiError::new(format!("value too short for type `{ty}`")),
    )))
}

fn value_text(
    ty: &str,
    dec: &mut Decoder<'_>,
    out: &mut String,
    fmt: Format,
) -> Result<(), TextError> {
    let head = typestr::head(ty).map_err(sigil_core::SigilError::from)?;
    match head {
        Head::Void => {
            if fmt == Format::Json {
                out.push_str("null");
            }
            Ok(())
        }
        Head::Bool => {
            let v = dec.read_u8().map_err(|_| short_value(ty))?;
            out.push_str(if v != 0 { "true" } else { "false" });
            Ok(())
        }
        Head::Byte => {
            // bytes print as decimal; re-parsing narrows them back
            let v = dec.read_u8().map_err(|_| short_value(ty))?;
            out.push_str(&v.to_string());
            Ok(())
        }
        Head::Int32 => {
            let v = dec.read_i32().map_err(|_| short_value(ty))?;
            out.push_str(&v.to_string());
            Ok(())
        }
        Head::Int64 => {
            let v = dec.read_i64().map_err(|_| short_value(ty))?;
            out.push_str(&v.to_string());
            Ok(())
        }
        Head::Double => {
            let v = dec.read_f64().map_err(|_| short_value(ty))?;
            if !v.is_finite() {
                return Err(unprintable("d"));
            }
            out.push_str(&fmt_double(v));
            Ok(())
        }
        Head::Str => {
            let bytes = dec.read_len_prefixed().map_err(|_| short_value(ty))?;
            let s = core::str::from_utf8(bytes)
                .map_err(|_| TextError::without_span(TextErrorKind::InvalidUtf8String))?;
            push_quoted(s, out);
            Ok(())
        }
        Head::List(elem) => {
            let count = dec.read_u32().map_err(|_| short_value(ty))?;
            out.push('[');
            for i in 0..count {
                if i > 0 {
                    out.push(',');
                }
                value_text(elem, dec, out, fmt)?;
            }
            out.push(']');
            Ok(())
        }
        Head::Map(key, val) => {
            if fmt == Format::Json && key != "s" {
                return Err(unprintable(ty));
            }
            let count = dec.read_u32().map_err(|_| short_value(ty))?;
            out.push('{');
            for i in 0..count {
                if i > 0 {
                    out.push(',');
                }
                value_text(key, dec, out, fmt)?;
                out.push(':');
                value_text(val, dec, out, fmt)?;
            }
            out.push('}');
            Ok(())
        }
        Head::Tuple(t) => {
            let (open, close) = match fmt {
                Format::Annotated => ('(', ')'),
                Format::Json => ('[', ']'),
            };
            out.push(open);
            for (i, field) in t.fields().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                if fmt == Format::Annotated && payload_needs_annotation(field) {
                    out.push('<');
                    out.push_str(field);
                    out.push('>');
                }
                value_text(field, dec, out, fmt)?;
            }
            out.push(close);
            Ok(())
        }
        Head::Optional(inner) => {
            let tag = dec.read_u8().map_err(|_| short_value(ty))?;
            if tag == 1 {
                // a payload whose own printed form could read as absent
                // (nested optionals, expected-void, any) gets an explicit
                // annotation so re-parsing keeps the presence tag
                if fmt == Format::Annotated && payload_needs_annotation(inner) {
                    out.push('<');
                    out.push_str(inner);
                    out.push('>');
                }
                value_text(inner, dec, out, fmt)
            } else {
                out.push_str("null");
                Ok(())
            }
        }
        Head::Expected(inner) => {
            let tag = dec.read_u8().map_err(|_| short_value(ty))?;
            if fmt == Format::Json {
                return Err(unprintable(ty));
            }
            if tag == 1 {
                if payload_needs_annotation(inner) {
                    out.push('<');
                    out.push_str(inner);
                    out.push('>');
                }
                value_text(inner, dec, out, fmt)
            } else {
                error_text(dec, out)
            }
        }
        Head::ExpectedVoid => {
            let tag = dec.read_u8().map_err(|_| short_value(ty))?;
            if fmt == Format::Json {
                return Err(unprintable(ty));
            }
            if tag == 1 {
                // re-parsing lifts the void back into the success arm
                out.push_str("null");
                Ok(())
            } else {
                error_text(dec, out)
            }
        }
        Head::Error => {
            if fmt == Format::Json {
                return Err(unprintable(ty));
            }
            error_text(dec, out)
        }
        Head::Any => {
            let ty_bytes = dec.read_len_prefixed().map_err(|_| short_value(ty))?;
            let inner_ty = core::str::from_utf8(ty_bytes)
                .map_err(|_| TextError::without_span(TextErrorKind::InvalidUtf8String))?;
            let inner_value = dec.read_len_prefixed().map_err(|_| short_value(ty))?;
            let mut inner_dec = Decoder::new(inner_value);
            match fmt {
                Format::Annotated => {
                    out.push('<');
                    out.push_str(inner_ty);
                    out.push('>');
                    value_text(inner_ty, &mut inner_dec, out, fmt)
                }
                // the JSON subset drops the annotation and prints the payload
                Format::Json => value_text(inner_ty, &mut inner_dec, out, fmt),
            }
        }
    }
}

fn payload_needs_annotation(ty: &str) -> bool {
    matches!(ty.as_bytes().first(), Some(b'o') | Some(b'X') | Some(b'a'))
}

/// The `err("kind","message",aux)` form.
fn error_text(dec: &mut Decoder<'_>, out: &mut String) -> Result<(), TextError> {
    out.push_str("err(");
    let kind = dec.read_len_prefixed().map_err(|_| short_value("e"))?;
    let kind = core::str::from_utf8(kind)
        .map_err(|_| TextError::without_span(TextErrorKind::InvalidUtf8String))?;
    push_quoted(kind, out);
    out.push(',');
    let message = dec.read_len_prefixed().map_err(|_| short_value("e"))?;
    let message = core::str::from_utf8(message)
        .map_err(|_| TextError::without_span(TextErrorKind::InvalidUtf8String))?;
    push_quoted(message, out);
    out.push(',');
    value_text("a", dec, out, Format::Annotated)?;
    out.push(')');
    Ok(())
}

/// Canonical double formatting: integral values keep one fraction digit so
/// they re-parse as doubles.
fn fmt_double(v: f64) -> String {
    if v == v.trunc() && v.abs() < 1e15 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

fn push_quoted(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use sigil_core::{GuessMode, Policy, ToSigil};

    #[test]
    fn annotated_output_carries_the_type() {
        let any = (1i32, "x".to_string()).to_any(GuessMode::Normal).unwrap();
        assert_eq!(to_text(&any).unwrap(), r#"<t2is>(1,"x")"#);
    }

    #[test]
    fn json_output_is_bare() {
        let any = parse(r#"{"a":1,"b":[1,1]}"#).unwrap();
        assert_eq!(to_json(&any).unwrap(), r#"{"a":1,"b":[1,1]}"#);
    }

    #[test]
    fn json_refuses_inexpressible_types() {
        let any = Any::from_type("xi").unwrap();
        assert!(matches!(
            to_json(&any).unwrap_err().kind,
            TextErrorKind::Unprintable { .. }
        ));
        let any = Any::from_type("mii").unwrap();
        assert!(matches!(
            to_json(&any).unwrap_err().kind,
            TextErrorKind::Unprintable { .. }
        ));
    }

    #[test]
    fn doubles_keep_their_point() {
        let any = Any::new("d", 2.0f64.to_be_bytes().to_vec()).unwrap();
        assert_eq!(to_text(&any).unwrap(), "<d>2.0");
        let any = Any::new("d", 2.5f64.to_be_bytes().to_vec()).unwrap();
        assert_eq!(to_text(&any).unwrap(), "<d>2.5");
    }

    #[test]
    fn optionals_print_their_presence() {
        let any = Any::new("oi", vec![1, 0, 0, 0, 5]).unwrap();
        assert_eq!(to_text(&any).unwrap(), "<oi>5");
        let any = Any::new("oi", vec![0]).unwrap();
        assert_eq!(to_text(&any).unwrap(), "<oi>null");
    }

    #[test]
    fn round_trip_is_idempotent_from_the_second_stage() {
        for text in [
            r#"<t2is>(1,"x")"#,
            "<li>[1,2,3]",
            "<oi>null",
            "<xi>5",
            "<X>null",
            r#"<e>err("io","gone",<i>42)"#,
            "<d>1.5",
            "<lc>[104,105]",
            "<msa>{\"a\":<i>1,\"b\":<s>\"two\"}",
            "<a><i>5",
            // nested wrappers keep their presence tags through reprints
            "<ooi>5",
            "<ooi><oi>null",
            "<xoi>null",
            "<oa><a><i>5",
            "<t2ois>(<oi>null,\"x\")",
            "<loi>[null,5]",
        ] {
            let first = parse(text).unwrap();
            let printed = to_text(&first).unwrap();
            let second = parse(&printed).unwrap();
            assert_eq!(first, second, "text `{text}` printed as `{printed}`");
            assert_eq!(to_text(&second).unwrap(), printed, "text `{text}`");
        }
    }

    #[test]
    fn expected_errors_round_trip() {
        let holding = parse(r#"<xi>err("io","gone",null)"#).unwrap();
        assert_eq!(holding.type_str(), "xi");
        assert_eq!(holding.value_bytes()[0], 0);
        let printed = to_text(&holding).unwrap();
        let back = parse(&printed).unwrap();
        assert_eq!(back, holding);
    }

    #[test]
    fn get_as_after_text_parse() {
        let any = parse("<I>42").unwrap();
        assert_eq!(any.get_as::<i64>(Policy::NONE).unwrap(), 42);
    }
}
