#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

pub use sigil_core::*;

pub use sigil_text::{
    Format, PrintOptions, TextError, TextErrorKind, parse, parse_with, print, to_json, to_text,
};

pub use sigil_view::{
    Chunk, ChunkAlloc, GlobalArena, LocalArena, RefCounted, WView, reset_global_arena,
    reset_local_arena,
};
