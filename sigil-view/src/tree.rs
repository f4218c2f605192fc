//! The edit tree: lazily parsed nodes over chunked value bytes, with
//! in-place edits, structural insert/erase, and single-pass flattening.
//!
//! Ownership is parent-strong / child-owned: the tree arena owns every
//! node, parents hold child indices, and a child's back-reference is an
//! index plus the parent generation it was linked under. Replacing a
//! node's content bumps its generation, so stale children detect
//! detachment (disown) on next access instead of observing a half-updated
//! parent.

use core::marker::PhantomData;
use std::cell::RefCell;
use std::rc::Rc;

use sigil_core::codec::Decoder;
use sigil_core::typestr::{self, Head};
use sigil_core::{
    Any, AnyView, ApiError, ConvertError, ConvertErrorKind, SigilError, codec, scan,
};

use crate::arena::{Arena, Idx};
use crate::chunk::{
    Chunk, ChunkAlloc, RefCounted, chunks_concat_into, chunks_len, chunks_slice,
};
use crate::trace;

#[derive(Debug, Clone, Copy)]
struct ParentLink<'src> {
    idx: Idx<Node<'src>>,
    slot: usize,
    /// The parent's generation when this link was made. A mismatch means
    /// the parent replaced its content and this node is disowned.
    generation: u64,
}

#[derive(Debug)]
struct Node<'src> {
    ty: String,
    /// Raw value bytes; authoritative only while `children` is `None`
    /// (always authoritative for leaf heads).
    chunks: Vec<Chunk<'src>>,
    children: Option<Vec<Idx<Node<'src>>>>,
    /// Presence tag for `o`/`x`/`X` heads, recorded at materialization.
    tag: Option<u8>,
    parent: Option<ParentLink<'src>>,
    generation: u64,
    disowned: bool,
}

#[derive(Debug)]
struct TreeInner<'src> {
    nodes: Arena<Node<'src>>,
}

/// A handle to one node of a lazily parsed edit tree.
///
/// Handles are cheap to clone and share the tree; mutations require the
/// usual single-threaded exclusive access (the tree is `Rc`-based).
pub struct WView<'src, P: ChunkAlloc = RefCounted> {
    tree: Rc<RefCell<TreeInner<'src>>>,
    node: Idx<Node<'src>>,
    _policy: PhantomData<P>,
}

impl<'src, P: ChunkAlloc> Clone for WView<'src, P> {
    fn clone(&self) -> Self {
        WView {
            tree: Rc::clone(&self.tree),
            node: self.node,
            _policy: PhantomData,
        }
    }
}

impl<P: ChunkAlloc> core::fmt::Debug for WView<'_, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let inner = self.tree.borrow();
        let node = inner.nodes.get(self.node);
        f.debug_struct("WView")
            .field("node", &self.node)
            .field("ty", &node.ty)
            .finish_non_exhaustive()
    }
}

fn type_mismatch(src: &str, dst: &str) -> SigilError {
    SigilError::TypeMismatch(ConvertError {
        kind: ConvertErrorKind::Incompatible,
        src: src.to_string(),
        dst: dst.to_string(),
        src_pos: 0,
        dst_pos: 0,
    })
}

fn api(message: impl Into<String>) -> SigilError {
    SigilError::Api(ApiError::new(message))
}

impl<'src, P: ChunkAlloc> WView<'src, P> {
    fn make_root(ty: String, chunks: Vec<Chunk<'src>>) -> Self {
        let mut nodes = Arena::new();
        let node = nodes.alloc(Node {
            ty,
            chunks,
            children: None,
            tag: None,
            parent: None,
            generation: 0,
            disowned: false,
        });
        WView {
            tree: Rc::new(RefCell::new(TreeInner { nodes })),
            node,
            _policy: PhantomData,
        }
    }

    /// Build an edit tree owning a copy of `any`'s bytes.
    pub fn from_any(any: &Any) -> Self {
        Self::make_root(
            any.type_str().to_string(),
            vec![Chunk::store::<P>(any.value_bytes().to_vec())],
        )
    }

    /// Build an edit tree borrowing read-only bytes from `view`.
    ///
    /// Unchanged spans flatten straight out of the borrowed buffer.
    pub fn borrowed(view: AnyView<'src>) -> Self {
        Self::make_root(
            view.type_str().to_string(),
            vec![Chunk::borrowed(view.value_bytes())],
        )
    }

    /// Whether this policy frees chunk buffers by reference counting.
    pub fn has_refcount() -> bool {
        P::HAS_REFCOUNT
    }

    /// The node's current type string.
    pub fn type_str(&self) -> String {
        self.tree.borrow().nodes.get(self.node).ty.clone()
    }

    /// Whether this node has been detached from its former parent.
    pub fn is_disowned(&self) -> bool {
        let inner = self.tree.borrow();
        let node = inner.nodes.get(self.node);
        if node.disowned {
            return true;
        }
        match node.parent {
            Some(link) => inner.nodes.get(link.idx).generation != link.generation,
            None => false,
        }
    }

    /// Number of children, materializing them on first access.
    pub fn child_count(&self) -> Result<usize, SigilError> {
        let mut inner = self.tree.borrow_mut();
        materialize(&mut inner, self.node)?;
        Ok(inner
            .nodes
            .get(self.node)
            .children
            .as_ref()
            .map(Vec::len)
            .unwrap_or(0))
    }

    /// Handle to the i-th child, materializing the child list on first
    /// access.
    pub fn child(&self, i: usize) -> Result<Self, SigilError> {
        let mut inner = self.tree.borrow_mut();
        materialize(&mut inner, self.node)?;
        let kids = inner.nodes.get(self.node).children.as_ref();
        let idx = kids
            .and_then(|k| k.get(i))
            .copied()
            .ok_or_else(|| api(format!("child index {i} out of range")))?;
        Ok(WView {
            tree: Rc::clone(&self.tree),
            node: idx,
            _policy: PhantomData,
        })
    }

    /// Size in bytes of the flattened value.
    pub fn flatten_size(&self) -> Result<usize, SigilError> {
        let inner = self.tree.borrow();
        flat_size(&inner, self.node)
    }

    /// Append the flattened value bytes to `out`.
    pub fn flatten_to(&self, out: &mut Vec<u8>) -> Result<(), SigilError> {
        let inner = self.tree.borrow();
        flat_value(&inner, self.node, out)
    }

    /// Flatten into an owned, validated `(type, value)` pair.
    pub fn flatten(&self) -> Result<Any, SigilError> {
        let ty = self.type_str();
        let mut out = Vec::new();
        self.flatten_to(&mut out)?;
        Any::new(ty, out)
    }

    /// Append the framed wire form (`u32` type length + type + `u32` value
    /// length + value).
    pub fn flatten_framed_to(&self, out: &mut Vec<u8>) -> Result<(), SigilError> {
        let ty = self.type_str();
        codec::write_len_prefixed(out, ty.as_bytes());
        let size = self.flatten_size()?;
        codec::write_u32(out, size as u32);
        self.flatten_to(out)
    }

    /// Replace this node's type and value with `other`'s content.
    ///
    /// Existing children are disowned: their handles stay usable, but
    /// edits no longer propagate here. Siblings are unaffected.
    pub fn set<P2: ChunkAlloc>(&self, other: &WView<'_, P2>) -> Result<(), SigilError> {
        let replacement = other.flatten()?;
        self.set_any(&replacement)
    }

    /// Replace this node's type and value with `any`'s content.
    pub fn set_any(&self, any: &Any) -> Result<(), SigilError> {
        self.set_raw(any.type_str().to_string(), any.value_bytes().to_vec())
    }

    /// Set this node to void: empty type, zero value bytes. Legal only
    /// where the surrounding type permits void (content of an expected,
    /// an `a` payload, or a free-standing root).
    pub fn set_void(&self) -> Result<(), SigilError> {
        self.set_raw(String::new(), Vec::new())
    }

    fn set_raw(&self, new_ty: String, bytes: Vec<u8>) -> Result<(), SigilError> {
        let mut inner = self.tree.borrow_mut();
        let updates = plan_upward(&inner, self.node, new_ty)?;
        trace!("set: applying {} type updates", updates.len());
        let node = inner.nodes.get_mut(self.node);
        node.generation += 1;
        node.chunks = vec![Chunk::store::<P>(bytes)];
        node.tag = None;
        let old_kids = node.children.take();
        for (idx, ty) in updates {
            inner.nodes.get_mut(idx).ty = ty;
        }
        if let Some(kids) = old_kids {
            for kid in kids {
                inner.nodes.get_mut(kid).disowned = true;
                inner.nodes.get_mut(kid).parent = None;
            }
        }
        Ok(())
    }

    /// Remove the i-th child from a list, map, tuple or optional. The
    /// child is disowned. Tuple arity must stay at least 2.
    pub fn erase(&self, i: usize) -> Result<(), SigilError> {
        let mut inner = self.tree.borrow_mut();
        materialize(&mut inner, self.node)?;
        let node = inner.nodes.get(self.node);
        let ty = node.ty.clone();
        let kids = node.children.clone().unwrap_or_default();
        if i >= kids.len() {
            return Err(api(format!("erase index {i} out of range")));
        }
        let updates = match typestr::head(&ty).map_err(SigilError::from)? {
            Head::List(_) | Head::Map(..) => Vec::new(),
            Head::Tuple(_) => {
                if kids.len() - 1 < 2 {
                    return Err(type_mismatch(&ty, "a tuple of arity >= 2"));
                }
                let fields: Vec<String> = kids
                    .iter()
                    .enumerate()
                    .filter(|(slot, _)| *slot != i)
                    .map(|(_, k)| inner.nodes.get(*k).ty.clone())
                    .collect();
                let new_ty = format!("t{}{}", fields.len(), fields.concat());
                plan_upward(&inner, self.node, new_ty)?
            }
            Head::Optional(_) => Vec::new(),
            _ => return Err(api(format!("erase on a `{ty}` node"))),
        };
        let removed = kids[i];
        for (idx, new_ty) in updates {
            inner.nodes.get_mut(idx).ty = new_ty;
        }
        {
            let node = inner.nodes.get_mut(self.node);
            let node_kids = node.children.as_mut().expect("materialized above");
            node_kids.remove(i);
            if node.tag.is_some() && node_kids.is_empty() {
                node.tag = Some(0);
            }
        }
        let shifted: Vec<Idx<Node<'src>>> = inner
            .nodes
            .get(self.node)
            .children
            .as_ref()
            .expect("materialized above")[i..]
            .to_vec();
        for kid in shifted {
            if let Some(link) = &mut inner.nodes.get_mut(kid).parent {
                link.slot -= 1;
            }
        }
        let removed_node = inner.nodes.get_mut(removed);
        removed_node.disowned = true;
        removed_node.parent = None;
        Ok(())
    }

    /// Insert a copy of `other` after child `i`; `-1` prepends.
    ///
    /// Lists and maps require an exact element-type match; tuples accept
    /// any type and grow their arity; an optional must currently be empty
    /// and takes exactly one element of its payload type.
    pub fn insert_after<P2: ChunkAlloc>(
        &self,
        i: isize,
        other: &WView<'_, P2>,
    ) -> Result<(), SigilError> {
        let content = other.flatten()?;
        let mut inner = self.tree.borrow_mut();
        materialize(&mut inner, self.node)?;
        let node = inner.nodes.get(self.node);
        let ty = node.ty.clone();
        let len = node.children.as_ref().map(Vec::len).unwrap_or(0);
        if i < -1 || i >= len as isize {
            return Err(api(format!("insert position {i} out of range")));
        }
        let pos = (i + 1) as usize;
        let mut updates = Vec::new();
        match typestr::head(&ty).map_err(SigilError::from)? {
            Head::List(elem) => {
                if content.type_str() != elem {
                    return Err(type_mismatch(content.type_str(), elem));
                }
            }
            Head::Map(k, v) => {
                let pair_ty = format!("t2{k}{v}");
                if content.type_str() != pair_ty {
                    return Err(type_mismatch(content.type_str(), &pair_ty));
                }
                let key_len = scan(k, content.value_bytes())?;
                let key = &content.value_bytes()[..key_len];
                let kids = inner.nodes.get(self.node).children.as_ref().cloned().unwrap_or_default();
                if pos > 0 {
                    let prev = pair_key_bytes(&inner, kids[pos - 1], k)?;
                    if prev.as_slice() >= key {
                        return Err(api("map insert would break the key order"));
                    }
                }
                if pos < kids.len() {
                    let next = pair_key_bytes(&inner, kids[pos], k)?;
                    if next.as_slice() <= key {
                        return Err(api("map insert would break the key order"));
                    }
                }
            }
            Head::Tuple(_) => {
                if content.is_void() {
                    return Err(api("tuples cannot hold void fields"));
                }
                let kids = inner.nodes.get(self.node).children.as_ref().cloned().unwrap_or_default();
                let mut fields: Vec<String> =
                    kids.iter().map(|k| inner.nodes.get(*k).ty.clone()).collect();
                fields.insert(pos, content.type_str().to_string());
                let new_ty = format!("t{}{}", fields.len(), fields.concat());
                updates = plan_upward(&inner, self.node, new_ty)?;
            }
            Head::Optional(elem) => {
                if len != 0 {
                    return Err(api("optional already holds a value"));
                }
                if content.type_str() != elem {
                    return Err(type_mismatch(content.type_str(), elem));
                }
            }
            _ => return Err(api(format!("insert into a `{ty}` node"))),
        }
        for (idx, new_ty) in updates {
            inner.nodes.get_mut(idx).ty = new_ty;
        }
        let generation = inner.nodes.get(self.node).generation;
        let new_idx = inner.nodes.alloc(Node {
            ty: content.type_str().to_string(),
            chunks: vec![Chunk::store::<P>(content.value_bytes().to_vec())],
            children: None,
            tag: None,
            parent: Some(ParentLink {
                idx: self.node,
                slot: pos,
                generation,
            }),
            generation: 0,
            disowned: false,
        });
        {
            let node = inner.nodes.get_mut(self.node);
            let kids = node.children.get_or_insert_with(Vec::new);
            kids.insert(pos, new_idx);
            if node.tag.is_some() {
                node.tag = Some(1);
            }
        }
        let shifted: Vec<Idx<Node<'src>>> = inner
            .nodes
            .get(self.node)
            .children
            .as_ref()
            .expect("just inserted")[pos + 1..]
            .to_vec();
        for kid in shifted {
            if let Some(link) = &mut inner.nodes.get_mut(kid).parent {
                link.slot += 1;
            }
        }
        Ok(())
    }

    /// Swap this node's type and value with `other`'s. Fails between an
    /// ancestor and its descendant.
    pub fn swap_content_with(&self, other: &WView<'src, P>) -> Result<(), SigilError> {
        if Rc::ptr_eq(&self.tree, &other.tree) {
            if self.node == other.node {
                return Ok(());
            }
            let inner = self.tree.borrow();
            if is_ancestor(&inner, self.node, other.node)
                || is_ancestor(&inner, other.node, self.node)
            {
                return Err(api("swap between an ancestor and its descendant"));
            }
        }
        let a = self.flatten()?;
        let b = other.flatten()?;
        // validate both sides before mutating either
        {
            let inner = self.tree.borrow();
            plan_upward(&inner, self.node, b.type_str().to_string())?;
        }
        {
            let inner = other.tree.borrow();
            plan_upward(&inner, other.node, a.type_str().to_string())?;
        }
        self.set_any(&b)?;
        other.set_any(&a)
    }

    /// Scan a list (or map) for the `n`-th element whose leading columns
    /// equal `key`'s columns; `n` is 0-based.
    pub fn linear_search<P2: ChunkAlloc>(
        &self,
        key: &WView<'_, P2>,
        n: usize,
    ) -> Result<Option<usize>, SigilError> {
        let key_any = key.flatten()?;
        let mut inner = self.tree.borrow_mut();
        materialize(&mut inner, self.node)?;
        let node = inner.nodes.get(self.node);
        match typestr::head(&node.ty).map_err(SigilError::from)? {
            Head::List(_) | Head::Map(..) => {}
            _ => return Err(api("linear search over a non-sequence node")),
        }
        let key_cols = column_types(key_any.type_str());
        let kids = node.children.clone().unwrap_or_default();
        let mut seen = 0usize;
        for (pos, kid) in kids.iter().enumerate() {
            let elem_ty = inner.nodes.get(*kid).ty.clone();
            let elem_cols = column_types(&elem_ty);
            if elem_cols.len() < key_cols.len()
                || elem_cols[..key_cols.len()] != key_cols[..]
            {
                continue;
            }
            let mut elem_bytes = Vec::new();
            flat_value(&inner, *kid, &mut elem_bytes)?;
            let mut prefix = 0usize;
            for col in &key_cols {
                prefix += scan(col, &elem_bytes[prefix..])?;
            }
            if elem_bytes[..prefix] == *key_any.value_bytes() {
                if seen == n {
                    return Ok(Some(pos));
                }
                seen += 1;
            }
        }
        Ok(None)
    }
}

/// The comparable columns of a type: a tuple's fields, or the type itself.
fn column_types(ty: &str) -> Vec<String> {
    match typestr::head(ty) {
        Ok(Head::Tuple(t)) => t.fields().map(str::to_string).collect(),
        _ => vec![ty.to_string()],
    }
}

fn is_ancestor<'src>(
    inner: &TreeInner<'src>,
    candidate: Idx<Node<'src>>,
    of: Idx<Node<'src>>,
) -> bool {
    let mut cur = of;
    loop {
        let Some(link) = inner.nodes.get(cur).parent else {
            return false;
        };
        if link.idx == candidate {
            return true;
        }
        cur = link.idx;
    }
}

/// Flatten a map pair node and slice out its serialized key.
fn pair_key_bytes<'src>(
    inner: &TreeInner<'src>,
    pair: Idx<Node<'src>>,
    key_ty: &str,
) -> Result<Vec<u8>, SigilError> {
    let mut bytes = Vec::new();
    flat_value(inner, pair, &mut bytes)?;
    let len = scan(key_ty, &bytes)?;
    bytes.truncate(len);
    Ok(bytes)
}

/// Compute the chain of type-string updates a type change at `idx`
/// requires, from the node itself up through its ancestors. Errors when a
/// surrounding type forbids the change (list/map elements, error triples,
/// the error arm of an expected, void where void is not permitted).
fn plan_upward<'src>(
    inner: &TreeInner<'src>,
    idx: Idx<Node<'src>>,
    new_ty: String,
) -> Result<Vec<(Idx<Node<'src>>, String)>, SigilError> {
    let mut updates = Vec::new();
    let mut cur = idx;
    let mut cur_new = new_ty;
    loop {
        let node = inner.nodes.get(cur);
        if node.ty == cur_new {
            break;
        }
        updates.push((cur, cur_new.clone()));
        let Some(link) = node.parent else {
            break;
        };
        let parent = inner.nodes.get(link.idx);
        if parent.generation != link.generation {
            // disowned: edits no longer propagate to the former parent
            break;
        }
        let parent_new = match typestr::head(&parent.ty).map_err(SigilError::from)? {
            Head::List(elem) => {
                return Err(type_mismatch(&cur_new, elem));
            }
            Head::Map(k, v) => {
                return Err(type_mismatch(&cur_new, &format!("t2{k}{v}")));
            }
            Head::Error => {
                return Err(api("error triple fields keep their types"));
            }
            Head::ExpectedVoid => {
                return Err(api("the error arm of an expected keeps its type"));
            }
            Head::Expected(_) if parent.tag == Some(0) => {
                return Err(api("the error arm of an expected keeps its type"));
            }
            Head::Any => break,
            Head::Optional(_) => {
                if cur_new.is_empty() {
                    return Err(api("void is not permitted inside an optional"));
                }
                format!("o{cur_new}")
            }
            Head::Expected(_) => {
                if cur_new.is_empty() {
                    "X".to_string()
                } else {
                    format!("x{cur_new}")
                }
            }
            Head::Tuple(_) => {
                if cur_new.is_empty() {
                    return Err(api("tuples cannot hold void fields"));
                }
                let kids = parent.children.as_ref().ok_or_else(|| {
                    api("edited a child of a parent with no materialized children")
                })?;
                let fields: Vec<String> = kids
                    .iter()
                    .enumerate()
                    .map(|(slot, k)| {
                        if slot == link.slot {
                            cur_new.clone()
                        } else {
                            inner.nodes.get(*k).ty.clone()
                        }
                    })
                    .collect();
                format!("t{}{}", fields.len(), fields.concat())
            }
            _ => {
                return Err(api(format!(
                    "a `{}` node cannot hold children",
                    parent.ty
                )));
            }
        };
        cur = link.idx;
        cur_new = parent_new;
    }
    Ok(updates)
}

struct ChildSpec<'src> {
    ty: String,
    chunks: Vec<Chunk<'src>>,
}

/// Parse a node's value into child specs, sharing read-only chunks for
/// every span.
fn child_specs<'src>(
    ty: &str,
    chunks: &[Chunk<'src>],
) -> Result<(Option<u8>, Option<Vec<ChildSpec<'src>>>), SigilError> {
    let mut concat_buf = Vec::new();
    let bytes: &[u8] = if chunks.len() == 1 {
        chunks[0].bytes()
    } else {
        chunks_concat_into(chunks, &mut concat_buf);
        &concat_buf
    };
    let spec = |off: usize, len: usize, child_ty: &str| ChildSpec {
        ty: child_ty.to_string(),
        chunks: chunks_slice(chunks, off, len),
    };
    match typestr::head(ty).map_err(SigilError::from)? {
        Head::Void
        | Head::Bool
        | Head::Byte
        | Head::Int32
        | Head::Int64
        | Head::Double
        | Head::Str => Ok((None, None)),
        Head::List(elem) => {
            let mut dec = Decoder::new(bytes);
            let count = dec.read_u32()?;
            let mut specs = Vec::with_capacity(count as usize);
            let mut off = 4;
            for _ in 0..count {
                let len = scan(elem, &bytes[off..])?;
                specs.push(spec(off, len, elem));
                off += len;
            }
            Ok((None, Some(specs)))
        }
        Head::Map(k, v) => {
            let mut dec = Decoder::new(bytes);
            let count = dec.read_u32()?;
            let pair_ty = format!("t2{k}{v}");
            let mut specs = Vec::with_capacity(count as usize);
            let mut off = 4;
            for _ in 0..count {
                let klen = scan(k, &bytes[off..])?;
                let vlen = scan(v, &bytes[off + klen..])?;
                specs.push(spec(off, klen + vlen, &pair_ty));
                off += klen + vlen;
            }
            Ok((None, Some(specs)))
        }
        Head::Tuple(t) => {
            let mut specs = Vec::with_capacity(t.arity);
            let mut off = 0;
            for field in t.fields() {
                let len = scan(field, &bytes[off..])?;
                specs.push(spec(off, len, field));
                off += len;
            }
            Ok((None, Some(specs)))
        }
        Head::Optional(elem) => {
            let tag = bytes.first().copied().unwrap_or(0);
            if tag == 1 {
                let len = scan(elem, &bytes[1..])?;
                Ok((Some(1), Some(vec![spec(1, len, elem)])))
            } else {
                Ok((Some(0), Some(Vec::new())))
            }
        }
        Head::Expected(elem) => {
            let tag = bytes.first().copied().unwrap_or(0);
            if tag == 1 {
                let len = scan(elem, &bytes[1..])?;
                Ok((Some(1), Some(vec![spec(1, len, elem)])))
            } else {
                let len = scan("e", &bytes[1..])?;
                Ok((Some(0), Some(vec![spec(1, len, "e")])))
            }
        }
        Head::ExpectedVoid => {
            let tag = bytes.first().copied().unwrap_or(0);
            if tag == 1 {
                Ok((Some(1), Some(Vec::new())))
            } else {
                let len = scan("e", &bytes[1..])?;
                Ok((Some(0), Some(vec![spec(1, len, "e")])))
            }
        }
        Head::Error => {
            let klen = scan("s", bytes)?;
            let mlen = scan("s", &bytes[klen..])?;
            let alen = scan("a", &bytes[klen + mlen..])?;
            Ok((
                None,
                Some(vec![
                    spec(0, klen, "s"),
                    spec(klen, mlen, "s"),
                    spec(klen + mlen, alen, "a"),
                ]),
            ))
        }
        Head::Any => {
            let mut dec = Decoder::new(bytes);
            let ty_bytes = dec.read_len_prefixed()?;
            let inner_ty = core::str::from_utf8(ty_bytes)
                .map_err(|_| api("embedded type is not valid UTF-8"))?
                .to_string();
            let val_off = dec.offset() + 4;
            let val = dec.read_len_prefixed()?;
            Ok((None, Some(vec![spec(val_off, val.len(), &inner_ty)])))
        }
    }
}

/// Build the child list on first access. Leaf heads get no children.
fn materialize<'src>(inner: &mut TreeInner<'src>, idx: Idx<Node<'src>>) -> Result<(), SigilError> {
    if inner.nodes.get(idx).children.is_some() {
        return Ok(());
    }
    let (ty, chunks, generation) = {
        let node = inner.nodes.get(idx);
        (node.ty.clone(), node.chunks.clone(), node.generation)
    };
    let (tag, specs) = child_specs(&ty, &chunks)?;
    let Some(specs) = specs else {
        let node = inner.nodes.get_mut(idx);
        node.children = Some(Vec::new());
        return Ok(());
    };
    let mut kids = Vec::with_capacity(specs.len());
    for (slot, spec) in specs.into_iter().enumerate() {
        let kid = inner.nodes.alloc(Node {
            ty: spec.ty,
            chunks: spec.chunks,
            children: None,
            tag: None,
            parent: Some(ParentLink {
                idx,
                slot,
                generation,
            }),
            generation: 0,
            disowned: false,
        });
        kids.push(kid);
    }
    let node = inner.nodes.get_mut(idx);
    node.children = Some(kids);
    node.tag = tag;
    Ok(())
}

/// Whether flattening must consult children for this head. Leaf heads
/// always flatten from their chunks.
fn is_leaf_head(head: &Head<'_>) -> bool {
    matches!(
        head,
        Head::Void
            | Head::Bool
            | Head::Byte
            | Head::Int32
            | Head::Int64
            | Head::Double
            | Head::Str
    )
}

fn flat_size<'src>(inner: &TreeInner<'src>, idx: Idx<Node<'src>>) -> Result<usize, SigilError> {
    let node = inner.nodes.get(idx);
    let head = typestr::head(&node.ty).map_err(SigilError::from)?;
    let Some(kids) = node.children.as_ref().filter(|_| !is_leaf_head(&head)) else {
        return Ok(chunks_len(&node.chunks));
    };
    let sum = |inner: &TreeInner<'src>, kids: &[Idx<Node<'src>>]| -> Result<usize, SigilError> {
        let mut total = 0;
        for k in kids {
            total += flat_size(inner, *k)?;
        }
        Ok(total)
    };
    match head {
        Head::List(_) | Head::Map(..) => Ok(4 + sum(inner, kids)?),
        Head::Tuple(_) | Head::Error => sum(inner, kids),
        Head::Optional(_) | Head::Expected(_) | Head::ExpectedVoid => Ok(1 + sum(inner, kids)?),
        Head::Any => {
            let kid = *kids.first().ok_or_else(|| api("any payload missing"))?;
            let inner_ty_len = inner.nodes.get(kid).ty.len();
            Ok(4 + inner_ty_len + 4 + flat_size(inner, kid)?)
        }
        _ => Ok(chunks_len(&node.chunks)),
    }
}

fn flat_value<'src>(
    inner: &TreeInner<'src>,
    idx: Idx<Node<'src>>,
    out: &mut Vec<u8>,
) -> Result<(), SigilError> {
    let node = inner.nodes.get(idx);
    let head = typestr::head(&node.ty).map_err(SigilError::from)?;
    let Some(kids) = node.children.as_ref().filter(|_| !is_leaf_head(&head)) else {
        chunks_concat_into(&node.chunks, out);
        return Ok(());
    };
    match head {
        Head::List(_) | Head::Map(..) => {
            codec::write_u32(out, kids.len() as u32);
            for k in kids {
                flat_value(inner, *k, out)?;
            }
            Ok(())
        }
        Head::Tuple(_) | Head::Error => {
            for k in kids {
                flat_value(inner, *k, out)?;
            }
            Ok(())
        }
        Head::Optional(_) => {
            let tag = node.tag.unwrap_or(u8::from(!kids.is_empty()));
            codec::write_u8(out, tag);
            for k in kids {
                flat_value(inner, *k, out)?;
            }
            Ok(())
        }
        Head::Expected(_) | Head::ExpectedVoid => {
            let tag = node.tag.unwrap_or(1);
            codec::write_u8(out, tag);
            for k in kids {
                flat_value(inner, *k, out)?;
            }
            Ok(())
        }
        Head::Any => {
            let kid = *kids.first().ok_or_else(|| api("any payload missing"))?;
            let kid_ty = inner.nodes.get(kid).ty.clone();
            codec::write_len_prefixed(out, kid_ty.as_bytes());
            codec::write_u32(out, flat_size(inner, kid)? as u32);
            flat_value(inner, kid, out)
        }
        _ => {
            chunks_concat_into(&node.chunks, out);
            Ok(())
        }
    }
}
