//! The conversion engine: given source type S, target type T, a policy, and
//! optionally source bytes, decide whether S converts to T and produce the
//! converted bytes.
//!
//! Conversion is a two-pass recursive descent. The first pass walks both
//! type trees in lockstep and either reports the first impossible position
//! or yields a transform plan: a tree of per-node operations. The second
//! pass executes the plan against the source bytes. Value-dependent steps
//! (narrowing range checks, unwrapping embedded `a` payloads) validate
//! during execution.

use alloc::borrow::ToOwned;
use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::codec::{self, Decoder};
use crate::error::{SigilError, mark};
use crate::errval::ErrorValue;
use crate::policy::Policy;
use crate::scan::{self, ScanError, ScanErrorKind};
use crate::trace;
use crate::typestr::{self, Head};

/// Conversion between two types failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertError {
    /// What went wrong.
    pub kind: ConvertErrorKind,
    /// The source type string.
    pub src: String,
    /// The target type string.
    pub dst: String,
    /// Position of the offending subtree within `src`.
    pub src_pos: usize,
    /// Position of the offending subtree within `dst`.
    pub dst_pos: usize,
}

/// Specific kinds of conversion failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertErrorKind {
    /// No rule maps the source subtree onto the target subtree.
    Incompatible,
    /// A rule exists but the policy does not allow it.
    PolicyDenied {
        /// The allowance that would make the conversion legal.
        needed: Policy,
    },
    /// Tuple arities differ.
    ArityMismatch {
        /// Source arity.
        src_arity: usize,
        /// Target arity.
        dst_arity: usize,
    },
    /// A source value does not fit the narrower target.
    OutOfRange {
        /// The source value, rendered.
        value: String,
        /// Offset of the value within the source bytes.
        at_offset: usize,
    },
    /// An `expected` was unwrapped while holding an error.
    HoldsError {
        /// The error it holds.
        error: ErrorValue,
    },
    /// The source bytes ended before the plan finished.
    SourceTruncated,
}

impl core::fmt::Display for ConvertError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let src = mark(&self.src, self.src_pos);
        let dst = mark(&self.dst, self.dst_pos);
        write!(f, "cannot convert `{src}` to `{dst}`: ")?;
        match &self.kind {
            ConvertErrorKind::Incompatible => write!(f, "no conversion rule applies"),
            ConvertErrorKind::PolicyDenied { needed } => {
                write!(f, "policy does not allow {needed:?}")
            }
            ConvertErrorKind::ArityMismatch {
                src_arity,
                dst_arity,
            } => write!(f, "tuple arity {src_arity} does not match {dst_arity}"),
            ConvertErrorKind::OutOfRange { value, .. } => {
                write!(f, "value {value} does not fit the target width")
            }
            ConvertErrorKind::HoldsError { error } => {
                write!(f, "expected holds an error ({error})")
            }
            ConvertErrorKind::SourceTruncated => write!(f, "source value ended prematurely"),
        }
    }
}

impl core::error::Error for ConvertError {}

impl From<ConvertError> for SigilError {
    fn from(e: ConvertError) -> Self {
        match e.kind {
            ConvertErrorKind::HoldsError { error } => SigilError::ExpectedWithError(error),
            ConvertErrorKind::OutOfRange { at_offset, .. } => {
                // a value-level failure: the bytes do not fit the declared
                // target, which callers observe as a value mismatch
                SigilError::ValueMismatch(ScanError {
                    kind: ScanErrorKind::Value,
                    ty: e.src,
                    type_pos: e.src_pos,
                    value_pos: at_offset,
                })
            }
            kind => SigilError::TypeMismatch(ConvertError {
                kind,
                src: e.src,
                dst: e.dst,
                src_pos: e.src_pos,
                dst_pos: e.dst_pos,
            }),
        }
    }
}

/// Scalar widths the engine rewrites between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarKind {
    Bool,
    Byte,
    Int32,
    Int64,
    Double,
}

impl ScalarKind {
    fn of(head: &Head<'_>) -> Option<ScalarKind> {
        match head {
            Head::Bool => Some(ScalarKind::Bool),
            Head::Byte => Some(ScalarKind::Byte),
            Head::Int32 => Some(ScalarKind::Int32),
            Head::Int64 => Some(ScalarKind::Int64),
            Head::Double => Some(ScalarKind::Double),
            _ => None,
        }
    }

    /// Widening rank among the integer widths.
    fn int_rank(self) -> Option<u8> {
        match self {
            ScalarKind::Byte => Some(0),
            ScalarKind::Int32 => Some(1),
            ScalarKind::Int64 => Some(2),
            _ => None,
        }
    }
}

/// Position of a plan node within the outermost type strings.
#[derive(Debug, Clone, Copy)]
struct Pos {
    src: usize,
    dst: usize,
}

/// One node of the transform plan.
#[derive(Debug)]
struct Plan {
    op: PlanOp,
    at: Pos,
}

#[derive(Debug)]
enum PlanOp {
    /// Identical subtrees: copy the scanned bytes through.
    Copy { ty: String },
    /// Scalar rewrite.
    Scalar { from: ScalarKind, to: ScalarKind },
    /// T → `a`: frame the source subtree as an embedded pair.
    WrapAny { src_ty: String },
    /// `a` → T: unwrap the embedded pair and convert it to the target.
    UnwrapAny { dst_ty: String, policy: Policy },
    /// `a` → `x`T / `X`: unwrap and convert; failures embed as the error
    /// arm instead of aborting.
    AnyToExpected { dst_ty: String, policy: Policy },
    /// `o`S → `o`T componentwise.
    OptionalToOptional { inner: Box<Plan> },
    /// T → `o`T′: present tag plus converted payload.
    LiftOptional { inner: Box<Plan> },
    /// void → `o`T: the absent optional.
    AbsentOptional,
    /// `o`S → T: present converts, absent yields the target default.
    UnwrapOptional { inner: Box<Plan>, dst_ty: String },
    /// `x`S → `x`T componentwise; the error arm copies through.
    ExpectedToExpected { inner: Box<Plan> },
    /// T → `x`T′: value tag plus converted payload.
    LiftExpected { inner: Box<Plan> },
    /// void → `X`.
    LiftExpectedVoid,
    /// `x`S → T / `X` → void: value converts, error aborts.
    UnwrapExpected { inner: Box<Plan> },
    /// `x`S → `X`: drop the payload, keep the error arm.
    ExpectedToVoid { src_inner: String },
    /// `X` → `x`T: keep the error arm, default the value arm.
    VoidToExpected { dst_inner: String },
    /// `e` → `x`T / `X`: embed under the error tag.
    EmbedError,
    /// `l`S → `l`T componentwise.
    List { elem: Box<Plan> },
    /// `m`K₁V₁ → `m`K₂V₂ componentwise; entries are re-sorted when the key
    /// bytes change.
    Map {
        key: Box<Plan>,
        val: Box<Plan>,
        resort: bool,
    },
    /// Tuples of equal arity, componentwise.
    Tuple { fields: Vec<Plan> },
}

impl Plan {
    fn is_copy(&self) -> bool {
        matches!(self.op, PlanOp::Copy { .. })
    }
}

struct BuildCx<'a> {
    osrc: &'a str,
    odst: &'a str,
    policy: Policy,
}

impl BuildCx<'_> {
    fn err(&self, at: Pos, kind: ConvertErrorKind) -> ConvertError {
        ConvertError {
            kind,
            src: self.osrc.to_owned(),
            dst: self.odst.to_owned(),
            src_pos: at.src,
            dst_pos: at.dst,
        }
    }

    fn need(&self, flag: Policy, at: Pos) -> Result<(), ConvertError> {
        if self.policy.contains(flag) {
            Ok(())
        } else {
            Err(self.err(at, ConvertErrorKind::PolicyDenied { needed: flag }))
        }
    }
}

/// First pass: build the transform plan for `src → dst`, or report the
/// first impossible position.
fn build(cx: &BuildCx<'_>, src: &str, dst: &str, at: Pos) -> Result<Plan, ConvertError> {
    if src == dst {
        return Ok(Plan {
            op: PlanOp::Copy { ty: src.to_owned() },
            at,
        });
    }
    let incompatible = || cx.err(at, ConvertErrorKind::Incompatible);
    let sh = typestr::head(src).map_err(|_| incompatible())?;
    let dh = typestr::head(dst).map_err(|_| incompatible())?;

    let op = match (sh, dh) {
        // exact lifts win over every other rule: T → oT / T → xT is a tag
        // plus a byte copy even when T is itself wrapped, so lift/decay
        // stays an inverse pair for nested wrappers and `a` payloads
        (_, Head::Optional(t)) if t == src => PlanOp::LiftOptional {
            inner: Box::new(Plan {
                op: PlanOp::Copy { ty: src.to_owned() },
                at: Pos { src: at.src, dst: at.dst + 1 },
            }),
        },
        (_, Head::Expected(t)) if t == src => PlanOp::LiftExpected {
            inner: Box::new(Plan {
                op: PlanOp::Copy { ty: src.to_owned() },
                at: Pos { src: at.src, dst: at.dst + 1 },
            }),
        },
        // and the matching exact decays win over componentwise descent
        // and rewrapping, so they invert the lifts above
        (Head::Optional(s), _) if s == dst => {
            cx.need(Policy::AUX, at)?;
            PlanOp::UnwrapOptional {
                inner: Box::new(Plan {
                    op: PlanOp::Copy { ty: dst.to_owned() },
                    at: Pos { src: at.src + 1, dst: at.dst },
                }),
                dst_ty: dst.to_owned(),
            }
        }
        (Head::Expected(s), _) if s == dst => {
            cx.need(Policy::EXPECTED, at)?;
            PlanOp::UnwrapExpected {
                inner: Box::new(Plan {
                    op: PlanOp::Copy { ty: dst.to_owned() },
                    at: Pos { src: at.src + 1, dst: at.dst },
                }),
            }
        }
        // wrapping into `a` swallows any source shape whole
        (_, Head::Any) => {
            cx.need(Policy::ANY, at)?;
            PlanOp::WrapAny {
                src_ty: src.to_owned(),
            }
        }
        // unwrapping out of `a` into an expected recovers per-value
        (Head::Any, Head::Expected(_) | Head::ExpectedVoid) => {
            cx.need(Policy::ANY, at)?;
            PlanOp::AnyToExpected {
                dst_ty: dst.to_owned(),
                policy: cx.policy,
            }
        }
        (Head::Any, _) => {
            cx.need(Policy::ANY, at)?;
            PlanOp::UnwrapAny {
                dst_ty: dst.to_owned(),
                policy: cx.policy,
            }
        }
        (Head::Optional(s), Head::Optional(t)) => PlanOp::OptionalToOptional {
            inner: Box::new(build(cx, s, t, Pos { src: at.src + 1, dst: at.dst + 1 })?),
        },
        (Head::Expected(s), Head::Expected(t)) => PlanOp::ExpectedToExpected {
            inner: Box::new(build(cx, s, t, Pos { src: at.src + 1, dst: at.dst + 1 })?),
        },
        (Head::Expected(s), Head::ExpectedVoid) => {
            cx.need(Policy::EXPECTED, at)?;
            PlanOp::ExpectedToVoid {
                src_inner: s.to_owned(),
            }
        }
        (Head::ExpectedVoid, Head::Expected(t)) => {
            cx.need(Policy::EXPECTED, at)?;
            PlanOp::VoidToExpected {
                dst_inner: t.to_owned(),
            }
        }
        (Head::ExpectedVoid, Head::Void) => {
            cx.need(Policy::EXPECTED, at)?;
            PlanOp::UnwrapExpected {
                inner: Box::new(Plan {
                    op: PlanOp::Copy { ty: String::new() },
                    at: Pos { src: at.src + 1, dst: at.dst },
                }),
            }
        }
        // an exact e → xe lift was caught above; anything else embeds
        (Head::Error, Head::Expected(_) | Head::ExpectedVoid) => PlanOp::EmbedError,
        (Head::Void, Head::ExpectedVoid) => PlanOp::LiftExpectedVoid,
        (_, Head::Expected(t)) => PlanOp::LiftExpected {
            inner: Box::new(build(cx, src, t, Pos { src: at.src, dst: at.dst + 1 })?),
        },
        // void is the absent optional
        (Head::Void, Head::Optional(_)) => PlanOp::AbsentOptional,
        (_, Head::Optional(t)) => PlanOp::LiftOptional {
            inner: Box::new(build(cx, src, t, Pos { src: at.src, dst: at.dst + 1 })?),
        },
        (Head::Optional(s), _) => {
            cx.need(Policy::AUX, at)?;
            PlanOp::UnwrapOptional {
                inner: Box::new(build(cx, s, dst, Pos { src: at.src + 1, dst: at.dst })?),
                dst_ty: dst.to_owned(),
            }
        }
        (Head::Expected(s), _) => {
            cx.need(Policy::EXPECTED, at)?;
            PlanOp::UnwrapExpected {
                inner: Box::new(build(cx, s, dst, Pos { src: at.src + 1, dst: at.dst })?),
            }
        }
        (Head::List(s), Head::List(t)) => PlanOp::List {
            elem: Box::new(build(cx, s, t, Pos { src: at.src + 1, dst: at.dst + 1 })?),
        },
        (Head::Map(sk, sv), Head::Map(dk, dv)) => {
            let key = build(cx, sk, dk, Pos { src: at.src + 1, dst: at.dst + 1 })?;
            let val = build(
                cx,
                sv,
                dv,
                Pos {
                    src: at.src + 1 + sk.len(),
                    dst: at.dst + 1 + dk.len(),
                },
            )?;
            let resort = !key.is_copy();
            PlanOp::Map {
                key: Box::new(key),
                val: Box::new(val),
                resort,
            }
        }
        (Head::Tuple(st), Head::Tuple(dt)) => {
            if st.arity != dt.arity {
                return Err(cx.err(
                    at,
                    ConvertErrorKind::ArityMismatch {
                        src_arity: st.arity,
                        dst_arity: dt.arity,
                    },
                ));
            }
            let mut spos = at.src + (src.len() - st.fields_str().len());
            let mut dpos = at.dst + (dst.len() - dt.fields_str().len());
            let mut fields = Vec::with_capacity(st.arity);
            for (sf, df) in st.fields().zip(dt.fields()) {
                fields.push(build(cx, sf, df, Pos { src: spos, dst: dpos })?);
                spos += sf.len();
                dpos += df.len();
            }
            PlanOp::Tuple { fields }
        }
        (sh, dh) => {
            let (Some(from), Some(to)) = (ScalarKind::of(&sh), ScalarKind::of(&dh)) else {
                return Err(incompatible());
            };
            let flag = scalar_policy(from, to).ok_or_else(incompatible)?;
            cx.need(flag, at)?;
            PlanOp::Scalar { from, to }
        }
    };
    Ok(Plan { op, at })
}

/// The allowance a scalar rewrite requires, or `None` when no rule exists.
fn scalar_policy(from: ScalarKind, to: ScalarKind) -> Option<Policy> {
    use ScalarKind::*;
    match (from, to) {
        (Bool, Byte | Int32 | Int64) => Some(Policy::BOOL),
        (Byte | Int32 | Int64 | Double, Bool) => Some(Policy::BOOL),
        (Bool, Double) => Some(Policy::DOUBLE),
        (Byte | Int32 | Int64, Double) => Some(Policy::DOUBLE),
        (Double, Byte | Int32 | Int64) => Some(Policy::DOUBLE),
        (a, b) => {
            let (ra, rb) = (a.int_rank()?, b.int_rank()?);
            if ra < rb {
                Some(Policy::INTS)
            } else {
                Some(Policy::INTS_NARROWING)
            }
        }
    }
}

struct ExecCx<'a> {
    osrc: &'a str,
    odst: &'a str,
}

impl ExecCx<'_> {
    fn err(&self, at: Pos, kind: ConvertErrorKind) -> ConvertError {
        ConvertError {
            kind,
            src: self.osrc.to_owned(),
            dst: self.odst.to_owned(),
            src_pos: at.src,
            dst_pos: at.dst,
        }
    }
}

/// Copy one scanned subtree of type `ty` from `dec` to `out`.
fn copy_scanned(
    cx: &ExecCx<'_>,
    at: Pos,
    ty: &str,
    dec: &mut Decoder<'_>,
    out: &mut Vec<u8>,
) -> Result<(), ConvertError> {
    let rem = dec.remaining();
    let n = scan::scan(ty, rem).map_err(|_| cx.err(at, ConvertErrorKind::SourceTruncated))?;
    out.extend_from_slice(&rem[..n]);
    let _ = dec.advance(n);
    Ok(())
}

/// Skip one scanned subtree of type `ty`.
fn skip_scanned(
    cx: &ExecCx<'_>,
    at: Pos,
    ty: &str,
    dec: &mut Decoder<'_>,
) -> Result<(), ConvertError> {
    let rem = dec.remaining();
    let n = scan::scan(ty, rem).map_err(|_| cx.err(at, ConvertErrorKind::SourceTruncated))?;
    let _ = dec.advance(n);
    Ok(())
}

/// Read the embedded `(type, value)` pair of an `a` payload.
fn read_embedded<'i>(
    cx: &ExecCx<'_>,
    at: Pos,
    dec: &mut Decoder<'i>,
) -> Result<(&'i str, &'i [u8]), ConvertError> {
    let truncated = |cx: &ExecCx<'_>| cx.err(at, ConvertErrorKind::SourceTruncated);
    let ty_bytes = dec.read_len_prefixed().map_err(|_| truncated(cx))?;
    let inner_ty =
        core::str::from_utf8(ty_bytes).map_err(|_| cx.err(at, ConvertErrorKind::Incompatible))?;
    let inner_value = dec.read_len_prefixed().map_err(|_| truncated(cx))?;
    Ok((inner_ty, inner_value))
}

/// Convert one embedded pair to `dst_ty` in its own error space.
fn convert_embedded(
    inner_ty: &str,
    inner_value: &[u8],
    dst_ty: &str,
    policy: Policy,
) -> Result<Vec<u8>, ConvertError> {
    let cx = BuildCx {
        osrc: inner_ty,
        odst: dst_ty,
        policy,
    };
    let plan = build(&cx, inner_ty, dst_ty, Pos { src: 0, dst: 0 })?;
    let ecx = ExecCx {
        osrc: inner_ty,
        odst: dst_ty,
    };
    let mut out = Vec::with_capacity(inner_value.len() + 8);
    let mut dec = Decoder::new(inner_value);
    exec(&plan, &ecx, &mut dec, &mut out)?;
    if !dec.is_at_end() {
        return Err(ecx.err(Pos { src: 0, dst: 0 }, ConvertErrorKind::SourceTruncated));
    }
    Ok(out)
}

/// Second pass: run the plan against the source bytes.
fn exec(
    plan: &Plan,
    cx: &ExecCx<'_>,
    dec: &mut Decoder<'_>,
    out: &mut Vec<u8>,
) -> Result<(), ConvertError> {
    let at = plan.at;
    let truncated = |cx: &ExecCx<'_>| cx.err(at, ConvertErrorKind::SourceTruncated);
    match &plan.op {
        PlanOp::Copy { ty } => copy_scanned(cx, at, ty, dec, out),
        PlanOp::Scalar { from, to } => exec_scalar(cx, at, *from, *to, dec, out),
        PlanOp::WrapAny { src_ty } => {
            let rem = dec.remaining();
            let n = scan::scan(src_ty, rem).map_err(|_| truncated(cx))?;
            codec::write_len_prefixed(out, src_ty.as_bytes());
            codec::write_len_prefixed(out, &rem[..n]);
            let _ = dec.advance(n);
            Ok(())
        }
        PlanOp::UnwrapAny { dst_ty, policy } => {
            let (inner_ty, inner_value) = read_embedded(cx, at, dec)?;
            let bytes = convert_embedded(inner_ty, inner_value, dst_ty, *policy)?;
            out.extend_from_slice(&bytes);
            Ok(())
        }
        PlanOp::AnyToExpected { dst_ty, policy } => {
            let (inner_ty, inner_value) = read_embedded(cx, at, dec)?;
            match convert_embedded(inner_ty, inner_value, dst_ty, *policy) {
                Ok(bytes) => out.extend_from_slice(&bytes),
                Err(e) => {
                    trace!("embedding per-element conversion failure: {e}");
                    codec::write_u8(out, 0);
                    ErrorValue::new("typemismatch", e.to_string()).encode(out);
                }
            }
            Ok(())
        }
        PlanOp::OptionalToOptional { inner } => {
            let tag = dec.read_u8().map_err(|_| truncated(cx))?;
            codec::write_u8(out, tag);
            if tag == 1 {
                exec(inner, cx, dec, out)?;
            }
            Ok(())
        }
        PlanOp::LiftOptional { inner } | PlanOp::LiftExpected { inner } => {
            codec::write_u8(out, 1);
            exec(inner, cx, dec, out)
        }
        PlanOp::LiftExpectedVoid => {
            codec::write_u8(out, 1);
            Ok(())
        }
        PlanOp::AbsentOptional => {
            codec::write_u8(out, 0);
            Ok(())
        }
        PlanOp::UnwrapOptional { inner, dst_ty } => {
            let tag = dec.read_u8().map_err(|_| truncated(cx))?;
            if tag == 1 {
                exec(inner, cx, dec, out)
            } else {
                let default = typestr::default_value(dst_ty)
                    .map_err(|_| cx.err(at, ConvertErrorKind::Incompatible))?;
                out.extend_from_slice(&default);
                Ok(())
            }
        }
        PlanOp::ExpectedToExpected { inner } => {
            let tag = dec.read_u8().map_err(|_| truncated(cx))?;
            codec::write_u8(out, tag);
            if tag == 1 {
                exec(inner, cx, dec, out)
            } else {
                copy_scanned(cx, at, "e", dec, out)
            }
        }
        PlanOp::UnwrapExpected { inner } => {
            let tag = dec.read_u8().map_err(|_| truncated(cx))?;
            if tag == 1 {
                exec(inner, cx, dec, out)
            } else {
                let mut sub = Decoder::new(dec.remaining());
                let error = ErrorValue::decode_raw(&mut sub).map_err(|_| truncated(cx))?;
                Err(cx.err(at, ConvertErrorKind::HoldsError { error }))
            }
        }
        PlanOp::ExpectedToVoid { src_inner } => {
            let tag = dec.read_u8().map_err(|_| truncated(cx))?;
            codec::write_u8(out, tag);
            if tag == 1 {
                skip_scanned(cx, at, src_inner, dec)
            } else {
                copy_scanned(cx, at, "e", dec, out)
            }
        }
        PlanOp::VoidToExpected { dst_inner } => {
            let tag = dec.read_u8().map_err(|_| truncated(cx))?;
            codec::write_u8(out, tag);
            if tag == 1 {
                let default = typestr::default_value(dst_inner)
                    .map_err(|_| cx.err(at, ConvertErrorKind::Incompatible))?;
                out.extend_from_slice(&default);
                Ok(())
            } else {
                copy_scanned(cx, at, "e", dec, out)
            }
        }
        PlanOp::EmbedError => {
            codec::write_u8(out, 0);
            copy_scanned(cx, at, "e", dec, out)
        }
        PlanOp::List { elem } => {
            let count = dec.read_u32().map_err(|_| truncated(cx))?;
            codec::write_u32(out, count);
            for _ in 0..count {
                exec(elem, cx, dec, out)?;
            }
            Ok(())
        }
        PlanOp::Map { key, val, resort } => {
            let count = dec.read_u32().map_err(|_| truncated(cx))?;
            if !resort {
                codec::write_u32(out, count);
                for _ in 0..count {
                    exec(key, cx, dec, out)?;
                    exec(val, cx, dec, out)?;
                }
                return Ok(());
            }
            // converted keys may order differently than the source keys did
            let mut pairs: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let mut k = Vec::new();
                exec(key, cx, dec, &mut k)?;
                let mut v = Vec::new();
                exec(val, cx, dec, &mut v)?;
                pairs.push((k, v));
            }
            pairs.sort_by(|a, b| a.0.cmp(&b.0));
            codec::write_u32(out, count);
            for (k, v) in pairs {
                out.extend_from_slice(&k);
                out.extend_from_slice(&v);
            }
            Ok(())
        }
        PlanOp::Tuple { fields } => {
            for field in fields {
                exec(field, cx, dec, out)?;
            }
            Ok(())
        }
    }
}

fn exec_scalar(
    cx: &ExecCx<'_>,
    at: Pos,
    from: ScalarKind,
    to: ScalarKind,
    dec: &mut Decoder<'_>,
    out: &mut Vec<u8>,
) -> Result<(), ConvertError> {
    enum Num {
        Int(i64),
        Float(f64),
    }
    let value_offset = dec.offset();
    let truncated = |cx: &ExecCx<'_>| cx.err(at, ConvertErrorKind::SourceTruncated);
    let n = match from {
        ScalarKind::Bool | ScalarKind::Byte => {
            Num::Int(dec.read_u8().map_err(|_| truncated(cx))? as i64)
        }
        ScalarKind::Int32 => Num::Int(dec.read_i32().map_err(|_| truncated(cx))? as i64),
        ScalarKind::Int64 => Num::Int(dec.read_i64().map_err(|_| truncated(cx))?),
        ScalarKind::Double => Num::Float(dec.read_f64().map_err(|_| truncated(cx))?),
    };
    let out_of_range = |cx: &ExecCx<'_>, rendered: String| {
        cx.err(
            at,
            ConvertErrorKind::OutOfRange {
                value: rendered,
                at_offset: value_offset,
            },
        )
    };
    // integer target: truncate doubles toward zero, then range-check
    let as_int = |cx: &ExecCx<'_>, n: &Num, lo: i64, hi: i64| -> Result<i64, ConvertError> {
        match n {
            Num::Int(v) => {
                if *v < lo || *v > hi {
                    Err(out_of_range(cx, v.to_string()))
                } else {
                    Ok(*v)
                }
            }
            Num::Float(v) => {
                let t = v.trunc();
                if !v.is_finite() || t < lo as f64 || t > hi as f64 {
                    Err(out_of_range(cx, alloc::format!("{v}")))
                } else {
                    Ok(t as i64)
                }
            }
        }
    };
    match to {
        ScalarKind::Bool => {
            let truthy = match n {
                Num::Int(v) => v != 0,
                Num::Float(v) => v != 0.0,
            };
            codec::write_u8(out, truthy as u8);
        }
        ScalarKind::Byte => {
            let v = as_int(cx, &n, 0, u8::MAX as i64)?;
            codec::write_u8(out, v as u8);
        }
        ScalarKind::Int32 => {
            let v = as_int(cx, &n, i32::MIN as i64, i32::MAX as i64)?;
            codec::write_i32(out, v as i32);
        }
        ScalarKind::Int64 => {
            let v = match n {
                Num::Int(v) => v,
                Num::Float(v) => {
                    let t = v.trunc();
                    if !v.is_finite() || t < -9_223_372_036_854_775_808.0 || t >= 9_223_372_036_854_775_808.0 {
                        return Err(out_of_range(cx, alloc::format!("{v}")));
                    }
                    t as i64
                }
            };
            codec::write_i64(out, v);
        }
        ScalarKind::Double => {
            let v = match n {
                Num::Int(v) => v as f64,
                Num::Float(v) => v,
            };
            codec::write_f64(out, v);
        }
    }
    Ok(())
}

/// Type-only feasibility plus value production when `src` is supplied.
///
/// Without bytes, only type-structural feasibility is reported; with bytes,
/// value-dependent failures (narrowing range, embedded `a` payloads,
/// expecteds holding errors) surface too.
pub fn cant_convert(
    src_ty: &str,
    dst_ty: &str,
    policy: Policy,
    src: Option<&[u8]>,
) -> Option<SigilError> {
    match src {
        Some(bytes) => convert_serialized(src_ty, bytes, dst_ty, policy).err(),
        None => {
            if let Err(e) = typestr::validate(src_ty) {
                return Some(e.into());
            }
            if let Err(e) = typestr::validate(dst_ty) {
                return Some(e.into());
            }
            let cx = BuildCx {
                osrc: src_ty,
                odst: dst_ty,
                policy,
            };
            build(&cx, src_ty, dst_ty, Pos { src: 0, dst: 0 })
                .err()
                .map(SigilError::from)
        }
    }
}

/// Convert `src` bytes of type `src_ty` into bytes of type `dst_ty` under
/// `policy`. No partial output is produced on failure.
pub fn convert_serialized(
    src_ty: &str,
    src: &[u8],
    dst_ty: &str,
    policy: Policy,
) -> Result<Vec<u8>, SigilError> {
    typestr::validate(src_ty)?;
    typestr::validate(dst_ty)?;
    scan::scan_exact(src_ty, src)?;
    let cx = BuildCx {
        osrc: src_ty,
        odst: dst_ty,
        policy,
    };
    let plan = build(&cx, src_ty, dst_ty, Pos { src: 0, dst: 0 })?;
    trace!("convert plan for `{src_ty}` -> `{dst_ty}`: {plan:?}");
    let ecx = ExecCx {
        osrc: src_ty,
        odst: dst_ty,
    };
    let mut out = Vec::with_capacity(src.len() + 8);
    let mut dec = Decoder::new(src);
    exec(&plan, &ecx, &mut dec, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn cv(src_ty: &str, src: &[u8], dst_ty: &str, policy: Policy) -> Result<Vec<u8>, SigilError> {
        convert_serialized(src_ty, src, dst_ty, policy)
    }

    #[test]
    fn identity_copies_bytes() {
        let bytes = vec![0, 0, 0, 2, 0, 0, 0, 1, 0, 0, 0, 2];
        assert_eq!(cv("li", &bytes, "li", Policy::NONE).unwrap(), bytes);
    }

    #[test]
    fn widening_preserves_value() {
        // c -> i -> I under INTS
        let as_i = cv("c", &[200], "i", Policy::INTS).unwrap();
        assert_eq!(as_i, vec![0, 0, 0, 200]);
        let as_big = cv("i", &as_i, "I", Policy::INTS).unwrap();
        assert_eq!(as_big, vec![0, 0, 0, 0, 0, 0, 0, 200]);
        // and in one hop
        assert_eq!(cv("c", &[200], "I", Policy::INTS).unwrap(), as_big);
    }

    #[test]
    fn narrowing_needs_its_policy_and_checks_range() {
        let big = 4242i64.to_be_bytes().to_vec();
        match cv("I", &big, "i", Policy::INTS) {
            Err(SigilError::TypeMismatch(e)) => assert_eq!(
                e.kind,
                ConvertErrorKind::PolicyDenied {
                    needed: Policy::INTS_NARROWING
                }
            ),
            other => panic!("expected a policy denial, got {other:?}"),
        }
        assert_eq!(
            cv("I", &big, "i", Policy::INTS_NARROWING).unwrap(),
            4242i32.to_be_bytes().to_vec()
        );
        let too_big = (i64::from(i32::MAX) + 1).to_be_bytes().to_vec();
        assert!(matches!(
            cv("I", &too_big, "i", Policy::INTS_NARROWING),
            Err(SigilError::ValueMismatch(_))
        ));
    }

    #[test]
    fn bool_and_double_bridges() {
        assert_eq!(cv("i", &[0, 0, 0, 5], "b", Policy::BOOL).unwrap(), vec![1]);
        assert_eq!(cv("i", &[0, 0, 0, 0], "b", Policy::BOOL).unwrap(), vec![0]);
        assert_eq!(
            cv("b", &[1], "d", Policy::DOUBLE).unwrap(),
            1.0f64.to_be_bytes().to_vec()
        );
        assert_eq!(
            cv("i", &7i32.to_be_bytes(), "d", Policy::DOUBLE).unwrap(),
            7.0f64.to_be_bytes().to_vec()
        );
        assert_eq!(
            cv("d", &7.9f64.to_be_bytes(), "i", Policy::DOUBLE).unwrap(),
            7i32.to_be_bytes().to_vec()
        );
        assert!(cv("i", &[0, 0, 0, 1], "d", Policy::NONE).is_err());
    }

    #[test]
    fn any_wrap_and_unwrap_are_inverse() {
        let bytes = 7i32.to_be_bytes().to_vec();
        let wrapped = cv("i", &bytes, "a", Policy::ANY).unwrap();
        let mut expect = Vec::new();
        codec::write_len_prefixed(&mut expect, b"i");
        codec::write_len_prefixed(&mut expect, &bytes);
        assert_eq!(wrapped, expect);
        assert_eq!(cv("a", &wrapped, "i", Policy::ANY).unwrap(), bytes);
        assert!(cv("i", &bytes, "a", Policy::NONE).is_err());
    }

    #[test]
    fn optional_lift_and_unwrap() {
        let bytes = 7i32.to_be_bytes().to_vec();
        let lifted = cv("i", &bytes, "oi", Policy::NONE).unwrap();
        assert_eq!(lifted, vec![1, 0, 0, 0, 7]);
        assert_eq!(cv("oi", &lifted, "i", Policy::AUX).unwrap(), bytes);
        // absent yields the target default
        assert_eq!(cv("oi", &[0], "i", Policy::AUX).unwrap(), vec![0; 4]);
        assert!(cv("oi", &lifted, "i", Policy::NONE).is_err());
    }

    #[test]
    fn expected_lift_and_decay() {
        let bytes = 7i32.to_be_bytes().to_vec();
        let lifted = cv("i", &bytes, "xi", Policy::NONE).unwrap();
        assert_eq!(lifted, vec![1, 0, 0, 0, 7]);
        assert_eq!(cv("xi", &lifted, "i", Policy::EXPECTED).unwrap(), bytes);

        // xi holding an error refuses to decay to i
        let mut holding = vec![0u8];
        ErrorValue::new("t", "m").encode(&mut holding);
        assert!(matches!(
            cv("xi", &holding, "i", Policy::EXPECTED),
            Err(SigilError::ExpectedWithError(e)) if e.kind == "t"
        ));

        // xi -> X drops the payload but keeps the error arm
        assert_eq!(cv("xi", &lifted, "X", Policy::EXPECTED).unwrap(), vec![1]);
        let as_void = cv("xi", &holding, "X", Policy::EXPECTED).unwrap();
        assert_eq!(as_void, holding);

        // X -> xi defaults the value arm, keeps the error arm
        assert_eq!(
            cv("X", &[1], "xi", Policy::EXPECTED).unwrap(),
            vec![1, 0, 0, 0, 0]
        );
        assert_eq!(cv("X", &as_void, "xi", Policy::EXPECTED).unwrap(), holding);
    }

    #[test]
    fn any_payloads_lift_and_decay_like_other_types() {
        // (a, <i>7) -> xa -> a is an inverse pair, not a rewrap
        let mut payload = Vec::new();
        codec::write_len_prefixed(&mut payload, b"i");
        codec::write_len_prefixed(&mut payload, &7i32.to_be_bytes());
        let lifted = cv("a", &payload, "xa", Policy::NONE).unwrap();
        let mut expect = vec![1u8];
        expect.extend_from_slice(&payload);
        assert_eq!(lifted, expect);
        assert_eq!(cv("xa", &lifted, "a", Policy::EXPECTED).unwrap(), payload);

        let lifted = cv("a", &payload, "oa", Policy::NONE).unwrap();
        assert_eq!(cv("oa", &lifted, "a", Policy::AUX).unwrap(), payload);
    }

    #[test]
    fn error_values_embed_into_expecteds() {
        let mut err_bytes = Vec::new();
        ErrorValue::new("io", "gone").encode(&mut err_bytes);
        let embedded = cv("e", &err_bytes, "xi", Policy::NONE).unwrap();
        let mut expect = vec![0u8];
        expect.extend_from_slice(&err_bytes);
        assert_eq!(embedded, expect);
        assert_eq!(cv("e", &err_bytes, "X", Policy::NONE).unwrap(), expect);
    }

    #[test]
    fn lists_convert_componentwise() {
        let mut bytes = Vec::new();
        codec::write_u32(&mut bytes, 2);
        codec::write_i32(&mut bytes, 1);
        codec::write_i32(&mut bytes, 2);
        let mut expect = Vec::new();
        codec::write_u32(&mut expect, 2);
        codec::write_i64(&mut expect, 1);
        codec::write_i64(&mut expect, 2);
        assert_eq!(cv("li", &bytes, "lI", Policy::INTS).unwrap(), expect);
        assert!(cv("li", &bytes, "lI", Policy::NONE).is_err());
    }

    #[test]
    fn list_to_any_list_wraps_each_element() {
        let mut bytes = Vec::new();
        codec::write_u32(&mut bytes, 1);
        codec::write_i32(&mut bytes, 7);
        let wrapped = cv("li", &bytes, "la", Policy::ANY).unwrap();
        let mut expect = Vec::new();
        codec::write_u32(&mut expect, 1);
        codec::write_len_prefixed(&mut expect, b"i");
        codec::write_len_prefixed(&mut expect, &7i32.to_be_bytes());
        assert_eq!(wrapped, expect);
        // and back, value-dependent
        assert_eq!(cv("la", &wrapped, "li", Policy::ANY).unwrap(), bytes);
    }

    #[test]
    fn any_list_to_expected_list_recovers_per_element() {
        // [i 7, s "x"] as la
        let mut bytes = Vec::new();
        codec::write_u32(&mut bytes, 2);
        codec::write_len_prefixed(&mut bytes, b"i");
        codec::write_len_prefixed(&mut bytes, &7i32.to_be_bytes());
        codec::write_len_prefixed(&mut bytes, b"s");
        let mut s_val = Vec::new();
        codec::write_len_prefixed(&mut s_val, b"x");
        codec::write_len_prefixed(&mut bytes, &s_val);

        // la -> li aborts on the string element
        assert!(cv("la", &bytes, "li", Policy::ANY).is_err());

        // la -> lxi embeds the failure in the second element
        let out = cv("la", &bytes, "lxi", Policy::ANY).unwrap();
        let mut dec = Decoder::new(&out);
        assert_eq!(dec.read_u32().unwrap(), 2);
        assert_eq!(dec.read_u8().unwrap(), 1);
        assert_eq!(dec.read_i32().unwrap(), 7);
        assert_eq!(dec.read_u8().unwrap(), 0);
        let err = ErrorValue::decode_raw(&mut dec).unwrap();
        assert_eq!(err.kind, "typemismatch");
        assert!(dec.is_at_end());
    }

    #[test]
    fn maps_resort_when_key_bytes_change() {
        // { -1: 10, 1: 20 } as mii; byte order puts 1 before -1 (big-endian
        // two's complement), and converted keys are re-sorted by their new
        // serialized form
        let mut bytes = Vec::new();
        codec::write_u32(&mut bytes, 2);
        codec::write_i32(&mut bytes, 1);
        codec::write_i32(&mut bytes, 10);
        codec::write_i32(&mut bytes, -1);
        codec::write_i32(&mut bytes, 20);
        let out = cv("mii", &bytes, "mdi", Policy::DOUBLE).unwrap();
        let mut dec = Decoder::new(&out);
        assert_eq!(dec.read_u32().unwrap(), 2);
        // -1.0 has its sign bit set, so it sorts after 1.0 byte-wise
        assert_eq!(dec.read_f64().unwrap(), 1.0);
        assert_eq!(dec.read_i32().unwrap(), 10);
        assert_eq!(dec.read_f64().unwrap(), -1.0);
        assert_eq!(dec.read_i32().unwrap(), 20);
    }

    #[test]
    fn tuple_arity_must_match() {
        let bytes = [0u8; 8];
        assert!(matches!(
            cv("t2ii", &bytes, "t3iii", Policy::ALL),
            Err(SigilError::TypeMismatch(e))
                if matches!(e.kind, ConvertErrorKind::ArityMismatch { src_arity: 2, dst_arity: 3 })
        ));
        let out = cv("t2ii", &bytes, "t2II", Policy::INTS).unwrap();
        assert_eq!(out, vec![0; 16]);
    }

    #[test]
    fn string_and_byte_string_stay_distinct() {
        let mut bytes = Vec::new();
        codec::write_len_prefixed(&mut bytes, b"hi");
        assert!(cv("s", &bytes, "lc", Policy::ALL).is_err());
        assert!(cv("lc", &bytes, "s", Policy::ALL).is_err());
    }

    #[test]
    fn errors_mark_the_offending_subtree() {
        let Some(SigilError::TypeMismatch(e)) = cant_convert("li", "ls", Policy::ALL, None) else {
            panic!("expected a type mismatch");
        };
        assert_eq!(e.src_pos, 1);
        assert_eq!(e.dst_pos, 1);
        let rendered = e.to_string();
        assert!(rendered.contains("l*i"), "got: {rendered}");
        assert!(rendered.contains("l*s"), "got: {rendered}");
    }

    #[test]
    fn feasibility_without_bytes_ignores_values() {
        // narrowing is feasible type-wise under the policy, even though a
        // particular value might not fit
        assert!(cant_convert("I", "i", Policy::INTS_NARROWING, None).is_none());
        let too_big = i64::MAX.to_be_bytes();
        assert!(cant_convert("I", "i", Policy::INTS_NARROWING, Some(&too_big)).is_some());
    }

    #[test]
    fn policies_are_monotone() {
        let bytes = 4242i64.to_be_bytes().to_vec();
        let narrow = cv("I", &bytes, "i", Policy::INTS_NARROWING).unwrap();
        let all = cv("I", &bytes, "i", Policy::ALL).unwrap();
        assert_eq!(narrow, all);
    }
}
