//! # mediamux-core
//!
//! Shared building blocks for the mediamux container crates.
//!
//! Container muxers and demuxers in this workspace do not talk to files or
//! sockets directly. They are written against two small capability traits:
//!
//! - [`ByteSink`] — an append-oriented writer that knows its position and
//!   *may* support seeking. Whether back-patching (size fields, duration,
//!   seek indexes) happens is decided by [`ByteSink::is_seekable`], so the
//!   same muxer code serves both file output and live streaming.
//! - [`ByteSource`] — a positioned, non-consuming reader that reports how
//!   many bytes are resident right now. Parsers built on it never block;
//!   when data is short they report how much must be available before the
//!   call can be retried.
//!
//! Ready-made adapters cover the common cases: in-memory buffers, plain
//! `std::io` writers, and a windowed source for incremental feeding.

pub mod io;

pub use io::{
    ByteSink, ByteSource, IoWriter, MemoryWriter, ReaderSource, SliceSource, SourceLength,
    StreamWriter, WindowSource,
};
