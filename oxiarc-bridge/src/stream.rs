//! Byte sources and sinks behind a uniform capability set.
//!
//! A [`StreamResource`] is one volume of input (or the single output sink)
//! of an archive session. Every resource offers `read`, `seek`, `skip` and
//! `close`; resources that cannot seek report
//! [`io::ErrorKind::Unsupported`] so the engine can fall back to sequential
//! access.
//!
//! Provided resources:
//!
//! - [`SeekableStream`]: any `Read + Seek` source (files, cursors)
//! - [`SequentialStream`]: forward-only sources (pipes, sockets, decoders)
//! - [`LazyStream`]: defers opening the real resource until first use
//! - [`SinkStream`]: any `Write` sink, for archive output
//! - `MmapStream` (feature `mmap`): memory-mapped file with O(1) skips

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Chunk size used when skipping by reading and discarding.
const DISCARD_CHUNK: usize = 8 * 1024;

/// One external byte source or sink.
pub trait StreamResource: Send {
    /// Read into `buf`, returning the number of bytes read (0 at end of stream).
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write `buf`, returning the number of bytes accepted.
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(unsupported("write"))
    }

    /// Reposition the stream.
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(unsupported("seek"))
    }

    /// Skip up to `request` bytes, returning how many were skipped.
    ///
    /// May skip fewer bytes than requested (at end of stream, or to keep
    /// block alignment); callers must not assume an exact skip.
    fn skip(&mut self, request: u64) -> io::Result<u64> {
        discard(self, request)
    }

    /// Whether [`seek`](Self::seek) is supported.
    fn is_seekable(&self) -> bool {
        false
    }

    /// Flush buffered output.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Close the resource. Closing twice has no further effect.
    fn close(&mut self) -> io::Result<()>;

    /// Whether [`close`](Self::close) has run.
    fn is_closed(&self) -> bool;
}

impl<S: StreamResource + ?Sized> StreamResource for Box<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        (**self).seek(pos)
    }

    fn skip(&mut self, request: u64) -> io::Result<u64> {
        (**self).skip(request)
    }

    fn is_seekable(&self) -> bool {
        (**self).is_seekable()
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }
}

/// Skip by reading and discarding up to `request` bytes.
///
/// Stops early at end of stream and returns the number of bytes actually
/// consumed.
pub fn discard<S: StreamResource + ?Sized>(stream: &mut S, request: u64) -> io::Result<u64> {
    let mut scratch = [0u8; DISCARD_CHUNK];
    let mut skipped = 0u64;
    while skipped < request {
        let want = (request - skipped).min(DISCARD_CHUNK as u64) as usize;
        match stream.read(&mut scratch[..want]) {
            Ok(0) => break,
            Ok(n) => skipped += n as u64,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(skipped)
}

fn unsupported(op: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{} not supported by this stream", op),
    )
}

fn closed() -> io::Error {
    io::Error::other("stream resource is closed")
}

/// A seekable source such as a file or an in-memory cursor.
#[derive(Debug)]
pub struct SeekableStream<T> {
    inner: Option<T>,
}

impl<T: Read + Seek + Send> SeekableStream<T> {
    /// Wrap a seekable reader.
    pub fn new(inner: T) -> Self {
        Self { inner: Some(inner) }
    }

    /// Get a reference to the wrapped reader, unless closed.
    pub fn get_ref(&self) -> Option<&T> {
        self.inner.as_ref()
    }

    /// Unwrap the reader, unless closed.
    pub fn into_inner(self) -> Option<T> {
        self.inner
    }

    fn inner(&mut self) -> io::Result<&mut T> {
        self.inner.as_mut().ok_or_else(closed)
    }
}

impl SeekableStream<File> {
    /// Open a file for reading.
    pub fn open_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self::new(File::open(path)?))
    }
}

impl<T: Read + Seek + Send> StreamResource for SeekableStream<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner()?.read(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner()?.seek(pos)
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn close(&mut self) -> io::Result<()> {
        self.inner = None;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

/// A forward-only source. Seeking is unsupported; skipping discards.
#[derive(Debug)]
pub struct SequentialStream<R> {
    inner: Option<R>,
}

impl<R: Read + Send> SequentialStream<R> {
    /// Wrap a reader.
    pub fn new(inner: R) -> Self {
        Self { inner: Some(inner) }
    }

    /// Unwrap the reader, unless closed.
    pub fn into_inner(self) -> Option<R> {
        self.inner
    }
}

impl<R: Read + Send> StreamResource for SequentialStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.as_mut().ok_or_else(closed)?.read(buf)
    }

    fn close(&mut self) -> io::Result<()> {
        self.inner = None;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

type StreamFactory = Box<dyn FnOnce() -> io::Result<Box<dyn StreamResource>> + Send>;

/// A resource opened on first use.
///
/// Useful for multi-volume sets where later volumes should not be opened
/// until the engine actually switches to them. Closing a lazy stream that was
/// never opened does nothing.
pub struct LazyStream {
    factory: Option<StreamFactory>,
    inner: Option<Box<dyn StreamResource>>,
    closed: bool,
}

impl LazyStream {
    /// Create a lazy resource from a factory.
    pub fn new<F>(factory: F) -> Self
    where
        F: FnOnce() -> io::Result<Box<dyn StreamResource>> + Send + 'static,
    {
        Self {
            factory: Some(Box::new(factory)),
            inner: None,
            closed: false,
        }
    }

    /// Lazily open a file.
    pub fn file<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        Self::new(move || {
            let stream = SeekableStream::open_file(path)?;
            Ok(Box::new(stream) as Box<dyn StreamResource>)
        })
    }

    /// Whether the underlying resource has been created.
    pub fn is_opened(&self) -> bool {
        self.inner.is_some()
    }

    fn get(&mut self) -> io::Result<&mut Box<dyn StreamResource>> {
        if self.closed {
            return Err(closed());
        }
        if self.inner.is_none() {
            let factory = self
                .factory
                .take()
                .ok_or_else(|| io::Error::other("lazy stream factory already failed"))?;
            self.inner = Some(factory()?);
        }
        self.inner.as_mut().ok_or_else(closed)
    }
}

impl std::fmt::Debug for LazyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyStream")
            .field("opened", &self.inner.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}

impl StreamResource for LazyStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.get()?.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.get()?.write(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.get()?.seek(pos)
    }

    fn skip(&mut self, request: u64) -> io::Result<u64> {
        self.get()?.skip(request)
    }

    fn is_seekable(&self) -> bool {
        self.inner.as_ref().is_some_and(|s| s.is_seekable())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(inner) => inner.flush(),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.factory = None;
        match self.inner.as_mut() {
            Some(inner) => inner.close(),
            None => Ok(()),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// An output sink. Closing flushes once; the writer stays available through
/// [`into_inner`](SinkStream::into_inner).
#[derive(Debug)]
pub struct SinkStream<W> {
    inner: W,
    closed: bool,
}

impl<W: Write + Send> SinkStream<W> {
    /// Wrap a writer.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            closed: false,
        }
    }

    /// Get a reference to the writer.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Unwrap the writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Send> StreamResource for SinkStream<W> {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(unsupported("read"))
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(closed());
        }
        self.inner.write(buf)
    }

    fn skip(&mut self, _request: u64) -> io::Result<u64> {
        Err(unsupported("skip"))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.flush()
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(feature = "mmap")]
pub use self::mmap::MmapStream;

#[cfg(feature = "mmap")]
mod mmap {
    use super::{StreamResource, closed};
    use memmap2::Mmap;
    use std::fs::File;
    use std::io::{self, SeekFrom};
    use std::path::Path;

    /// A memory-mapped file source.
    ///
    /// Reads copy straight out of the mapping and skips only move the
    /// position, so large skips never touch the disk.
    ///
    /// # Safety
    ///
    /// Memory-mapped files can misbehave if the underlying file is modified
    /// by another process while mapped. The mapping is read-only.
    #[derive(Debug)]
    pub struct MmapStream {
        mmap: Option<Mmap>,
        position: usize,
    }

    impl MmapStream {
        /// Open and map a file.
        pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
            let file = File::open(path.as_ref())?;
            Self::from_file(&file)
        }

        /// Map an already-open file.
        pub fn from_file(file: &File) -> io::Result<Self> {
            // SAFETY: read-only mapping; the caller must not modify the file
            // while it is mapped.
            let mmap = unsafe { Mmap::map(file)? };
            Ok(Self {
                mmap: Some(mmap),
                position: 0,
            })
        }

        /// Total length of the mapped file (0 once closed).
        pub fn len(&self) -> usize {
            self.mmap.as_ref().map_or(0, |m| m.len())
        }

        /// Whether the mapped file is empty.
        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        /// Bytes from the current position to the end.
        pub fn remaining(&self) -> usize {
            self.len().saturating_sub(self.position)
        }

        fn map(&self) -> io::Result<&Mmap> {
            self.mmap.as_ref().ok_or_else(closed)
        }
    }

    impl StreamResource for MmapStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let position = self.position;
            let map = self.map()?;
            if position >= map.len() {
                return Ok(0);
            }
            let n = buf.len().min(map.len() - position);
            buf[..n].copy_from_slice(&map[position..position + n]);
            self.position += n;
            Ok(n)
        }

        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            let len = self.map()?.len() as i128;
            let target = match pos {
                SeekFrom::Start(offset) => offset as i128,
                SeekFrom::End(offset) => len + offset as i128,
                SeekFrom::Current(offset) => self.position as i128 + offset as i128,
            };
            if target < 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "invalid seek to a negative position",
                ));
            }
            self.position = usize::try_from(target).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "seek position overflows usize")
            })?;
            Ok(self.position as u64)
        }

        fn skip(&mut self, request: u64) -> io::Result<u64> {
            self.map()?;
            let step = (self.remaining() as u64).min(request);
            self.position += step as usize;
            Ok(step)
        }

        fn is_seekable(&self) -> bool {
            true
        }

        fn close(&mut self) -> io::Result<()> {
            self.mmap = None;
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.mmap.is_none()
        }
    }
}
