//! Byte sink and source traits plus the standard adapters.

use std::cell::Cell;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Destination for muxed bytes.
///
/// Bytes leave a muxer strictly in file order, except for explicit
/// back-patches which are only attempted when [`is_seekable`] returns true.
/// A non-seekable sink is therefore sufficient for live output; the muxer
/// leaves legal "unknown size" placeholders in place of patched values.
///
/// [`is_seekable`]: ByteSink::is_seekable
pub trait ByteSink {
    /// Append `buf` at the current position.
    fn write(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Current write position in bytes from the start of the stream.
    fn position(&self) -> u64;

    /// Reposition the sink for a back-patch write.
    ///
    /// Implementations that cannot seek must return an error and report
    /// `false` from [`ByteSink::is_seekable`]; callers check the capability
    /// first, so the error path is a misuse guard rather than a mode switch.
    fn seek(&mut self, pos: u64) -> io::Result<()>;

    /// Whether [`ByteSink::seek`] works on this sink.
    fn is_seekable(&self) -> bool;
}

/// How much of a source exists and how much of it can be read right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLength {
    /// Total stream length in bytes, if known.
    pub total: Option<u64>,
    /// Bytes resident and readable at this moment. Always `<= total`.
    pub available: u64,
}

/// Origin of demuxed bytes.
///
/// Reads are positioned and non-consuming: the same range may be read any
/// number of times, and reading does not advance any cursor. A source is
/// allowed to hold only a prefix of the stream; parsers consult
/// [`ByteSource::length`] before reading and surface "not enough bytes yet"
/// to their caller instead of blocking.
pub trait ByteSource {
    /// Fill `buf` from the bytes starting at `pos`.
    ///
    /// The requested range must lie within `length().available`; callers
    /// enforce this, so an out-of-range read is an error, not a retry signal.
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Report total and currently-available length.
    fn length(&self) -> SourceLength;
}

impl<S: ByteSource + ?Sized> ByteSource for &S {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_at(pos, buf)
    }

    fn length(&self) -> SourceLength {
        (**self).length()
    }
}

impl<S: ByteSink + ?Sized> ByteSink for &mut S {
    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        (**self).write(buf)
    }

    fn position(&self) -> u64 {
        (**self).position()
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        (**self).seek(pos)
    }

    fn is_seekable(&self) -> bool {
        (**self).is_seekable()
    }
}

fn unseekable() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, "sink does not support seeking")
}

fn out_of_range(pos: u64, len: usize, available: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("read of {len} bytes at {pos} exceeds available {available}"),
    )
}

/// Growable in-memory sink, seekable. The workhorse for tests and for
/// callers that assemble a whole file in memory before shipping it.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    buf: Vec<u8>,
    pos: usize,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume the writer and return the assembled bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    /// Bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl ByteSink for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        let end = self.pos + buf.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[self.pos..end].copy_from_slice(buf);
        self.pos = end;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.pos as u64
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        // Seeking past the end is allowed; the gap is zero-filled on write.
        self.pos = pos as usize;
        Ok(())
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

/// Forward-only adapter over any `std::io::Write`. Reports itself as
/// non-seekable, which switches the muxer into live output.
#[derive(Debug)]
pub struct StreamWriter<W: Write> {
    inner: W,
    pos: u64,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, pos: 0 }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> ByteSink for StreamWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.write_all(buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, _pos: u64) -> io::Result<()> {
        Err(unseekable())
    }

    fn is_seekable(&self) -> bool {
        false
    }
}

/// Seekable adapter over any `std::io::Write + Seek` (files, `Cursor`).
#[derive(Debug)]
pub struct IoWriter<W: Write + Seek> {
    inner: W,
    pos: u64,
}

impl<W: Write + Seek> IoWriter<W> {
    pub fn new(mut inner: W) -> io::Result<Self> {
        let pos = inner.stream_position()?;
        Ok(Self { inner, pos })
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Seek> ByteSink for IoWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.write_all(buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(pos))?;
        self.pos = pos;
        Ok(())
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

/// Fully-resident source over a byte buffer.
#[derive(Debug, Clone)]
pub struct SliceSource<T: AsRef<[u8]>> {
    data: T,
}

impl<T: AsRef<[u8]>> SliceSource<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }

    pub fn into_inner(self) -> T {
        self.data
    }
}

impl<T: AsRef<[u8]>> ByteSource for SliceSource<T> {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<()> {
        let data = self.data.as_ref();
        let pos = pos as usize;
        let end = pos + buf.len();
        if end > data.len() {
            return Err(out_of_range(pos as u64, buf.len(), data.len() as u64));
        }
        buf.copy_from_slice(&data[pos..end]);
        Ok(())
    }

    fn length(&self) -> SourceLength {
        let len = self.data.as_ref().len() as u64;
        SourceLength { total: Some(len), available: len }
    }
}

/// Source over a byte buffer with an adjustable availability horizon.
///
/// Models a stream arriving over time: the full length is known up front,
/// but only the first `available` bytes may be read. Feeding more bytes is
/// `set_available`; parsers poll [`ByteSource::length`] and retry.
#[derive(Debug)]
pub struct WindowSource<T: AsRef<[u8]>> {
    data: T,
    available: Cell<u64>,
}

impl<T: AsRef<[u8]>> WindowSource<T> {
    pub fn new(data: T) -> Self {
        Self { data, available: Cell::new(0) }
    }

    /// Raise (or lower, for tests) the availability horizon.
    pub fn set_available(&self, available: u64) {
        let len = self.data.as_ref().len() as u64;
        self.available.set(available.min(len));
    }

    pub fn available(&self) -> u64 {
        self.available.get()
    }
}

impl<T: AsRef<[u8]>> ByteSource for WindowSource<T> {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<()> {
        let end = pos + buf.len() as u64;
        if end > self.available.get() {
            return Err(out_of_range(pos, buf.len(), self.available.get()));
        }
        let data = self.data.as_ref();
        buf.copy_from_slice(&data[pos as usize..end as usize]);
        Ok(())
    }

    fn length(&self) -> SourceLength {
        SourceLength {
            total: Some(self.data.as_ref().len() as u64),
            available: self.available.get(),
        }
    }
}

/// Positioned source over any `std::io::Read + Seek`, for callers that want
/// to demux straight from a `File` without mapping it.
#[derive(Debug)]
pub struct ReaderSource<R: Read + Seek> {
    inner: std::cell::RefCell<R>,
    len: u64,
}

impl<R: Read + Seek> ReaderSource<R> {
    pub fn new(mut inner: R) -> io::Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        Ok(Self { inner: std::cell::RefCell::new(inner), len })
    }
}

impl<R: Read + Seek> ByteSource for ReaderSource<R> {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.seek(SeekFrom::Start(pos))?;
        inner.read_exact(buf)
    }

    fn length(&self) -> SourceLength {
        SourceLength { total: Some(self.len), available: self.len }
    }
}
