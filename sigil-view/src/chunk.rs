//! Chunks: contiguous byte runs backing wview values. A chunk either
//! shares an owned buffer or borrows read-only from an external source;
//! cloning is O(1) either way. A value is the concatenation of a chunk
//! list.

use std::cell::RefCell;
use std::rc::Rc;

/// Governs how owned chunk buffers are allocated and when they are freed.
///
/// The rest of the view machinery is allocator-agnostic; only
/// [`HAS_REFCOUNT`](ChunkAlloc::HAS_REFCOUNT) is observable, plus the fact
/// that arena-backed chunks stay readable until their arena is reset.
pub trait ChunkAlloc {
    /// Whether dropping the last handle frees the buffer.
    const HAS_REFCOUNT: bool;

    /// Store a buffer and return a shared handle to it.
    fn store(bytes: Vec<u8>) -> Rc<[u8]>;
}

/// Plain reference counting: a buffer is freed when its last chunk drops.
#[derive(Debug, Clone, Copy, Default)]
pub struct RefCounted;

impl ChunkAlloc for RefCounted {
    const HAS_REFCOUNT: bool = true;

    fn store(bytes: Vec<u8>) -> Rc<[u8]> {
        Rc::from(bytes)
    }
}

thread_local! {
    static GLOBAL_ARENA: RefCell<Vec<Rc<[u8]>>> = const { RefCell::new(Vec::new()) };
    static LOCAL_ARENA: RefCell<Vec<Rc<[u8]>>> = const { RefCell::new(Vec::new()) };
}

/// Process-global monotonic arena: buffers stay alive until
/// [`reset_global_arena`] runs in a quiescent state.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalArena;

impl ChunkAlloc for GlobalArena {
    const HAS_REFCOUNT: bool = false;

    fn store(bytes: Vec<u8>) -> Rc<[u8]> {
        let buf: Rc<[u8]> = Rc::from(bytes);
        GLOBAL_ARENA.with(|arena| arena.borrow_mut().push(Rc::clone(&buf)));
        buf
    }
}

/// Release every buffer held by the global arena. The caller must ensure
/// no tree using [`GlobalArena`] is alive.
pub fn reset_global_arena() {
    GLOBAL_ARENA.with(|arena| arena.borrow_mut().clear());
}

/// Thread-local monotonic arena, reset independently of the global one.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalArena;

impl ChunkAlloc for LocalArena {
    const HAS_REFCOUNT: bool = false;

    fn store(bytes: Vec<u8>) -> Rc<[u8]> {
        let buf: Rc<[u8]> = Rc::from(bytes);
        LOCAL_ARENA.with(|arena| arena.borrow_mut().push(Rc::clone(&buf)));
        buf
    }
}

/// Release every buffer held by this thread's local arena.
pub fn reset_local_arena() {
    LOCAL_ARENA.with(|arena| arena.borrow_mut().clear());
}

#[derive(Debug, Clone)]
enum ChunkData<'src> {
    Shared(Rc<[u8]>),
    Borrowed(&'src [u8]),
}

/// A contiguous byte run, shared-owned or borrowed read-only.
#[derive(Debug, Clone)]
pub struct Chunk<'src> {
    data: ChunkData<'src>,
    start: usize,
    len: usize,
}

impl<'src> Chunk<'src> {
    /// A chunk over a whole shared buffer.
    pub fn shared(buf: Rc<[u8]>) -> Self {
        let len = buf.len();
        Chunk {
            data: ChunkData::Shared(buf),
            start: 0,
            len,
        }
    }

    /// A chunk borrowing read-only bytes from an external source.
    pub fn borrowed(bytes: &'src [u8]) -> Self {
        Chunk {
            data: ChunkData::Borrowed(bytes),
            start: 0,
            len: bytes.len(),
        }
    }

    /// Store `bytes` through the allocation policy and wrap the result.
    pub fn store<P: ChunkAlloc>(bytes: Vec<u8>) -> Self {
        Chunk::shared(P::store(bytes))
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the chunk is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The bytes of this chunk.
    pub fn bytes(&self) -> &[u8] {
        match &self.data {
            ChunkData::Shared(buf) => &buf[self.start..self.start + self.len],
            ChunkData::Borrowed(bytes) => &bytes[self.start..self.start + self.len],
        }
    }

    /// A sub-chunk of `len` bytes starting `offset` into this chunk.
    /// Shares the backing storage; O(1).
    pub fn slice(&self, offset: usize, len: usize) -> Chunk<'src> {
        debug_assert!(offset + len <= self.len);
        Chunk {
            data: self.data.clone(),
            start: self.start + offset,
            len,
        }
    }
}

/// Total length of a chunk list.
pub fn chunks_len(chunks: &[Chunk<'_>]) -> usize {
    chunks.iter().map(Chunk::len).sum()
}

/// Copy a chunk list's concatenation into `out`.
pub fn chunks_concat_into(chunks: &[Chunk<'_>], out: &mut Vec<u8>) {
    for c in chunks {
        out.extend_from_slice(c.bytes());
    }
}

/// Slice `len` bytes starting at `offset` out of a chunk list's
/// concatenation, sharing storage with the originals.
pub fn chunks_slice<'src>(chunks: &[Chunk<'src>], offset: usize, len: usize) -> Vec<Chunk<'src>> {
    let mut out = Vec::new();
    let mut skip = offset;
    let mut want = len;
    for c in chunks {
        if want == 0 {
            break;
        }
        if skip >= c.len() {
            skip -= c.len();
            continue;
        }
        let take = (c.len() - skip).min(want);
        out.push(c.slice(skip, take));
        skip = 0;
        want -= take;
    }
    debug_assert_eq!(want, 0, "slice past the end of the chunk list");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slicing_shares_storage() {
        let buf: Rc<[u8]> = Rc::from(vec![1u8, 2, 3, 4, 5]);
        let chunk = Chunk::shared(Rc::clone(&buf));
        let sub = chunk.slice(1, 3);
        assert_eq!(sub.bytes(), &[2, 3, 4]);
        assert_eq!(Rc::strong_count(&buf), 3); // buf + chunk + sub
    }

    #[test]
    fn list_slicing_crosses_chunk_boundaries() {
        let a = Chunk::borrowed(&[1, 2, 3]);
        let b = Chunk::borrowed(&[4, 5, 6]);
        let chunks = vec![a, b];
        assert_eq!(chunks_len(&chunks), 6);
        let sub = chunks_slice(&chunks, 2, 3);
        let mut out = Vec::new();
        chunks_concat_into(&sub, &mut out);
        assert_eq!(out, vec![3, 4, 5]);
    }

    #[test]
    fn policies_expose_their_refcount_behavior() {
        assert!(RefCounted::HAS_REFCOUNT);
        assert!(!GlobalArena::HAS_REFCOUNT);
        assert!(!LocalArena::HAS_REFCOUNT);
    }

    #[test]
    fn arena_chunks_survive_handle_drops() {
        reset_local_arena();
        let chunk = Chunk::store::<LocalArena>(vec![9, 9]);
        let weak = match &chunk.data {
            ChunkData::Shared(buf) => Rc::downgrade(buf),
            ChunkData::Borrowed(_) => unreachable!(),
        };
        drop(chunk);
        // the arena still holds the buffer
        assert!(weak.upgrade().is_some());
        reset_local_arena();
        assert!(weak.upgrade().is_none());
    }
}
