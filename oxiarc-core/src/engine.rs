//! Engine boundary traits.
//!
//! The archive engine (format and filter logic) is an external collaborator
//! that pulls bytes through a fixed set of callbacks. This module defines
//! both sides of that boundary:
//!
//! - [`EngineIo`] and [`WriteIo`]: the callbacks the session offers to the
//!   engine (open/read/seek/skip/close/switch for input, write/close for
//!   output).
//! - [`ReadEngine`] and [`WriteEngine`]: the pull-based operations the
//!   session invokes on the engine (next header, next payload block, skip
//!   remaining payload; write header, write data, finish entry).
//!
//! Every engine operation receives the callbacks as a `&mut dyn` argument,
//! so callbacks run synchronously inside the call that triggered them.

use crate::entry::EntryHeader;
use crate::error::Result;
use std::fmt;
use std::io::SeekFrom;
use std::num::NonZeroU32;
use std::ops::Deref;

/// Identity of one volume of a (possibly multi-part) archive.
///
/// Keys are 1-based and never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VolumeKey(NonZeroU32);

impl VolumeKey {
    /// The first volume.
    pub const FIRST: Self = Self(NonZeroU32::MIN);

    /// Create a key from a 1-based index. Returns `None` for zero.
    pub fn new(index: u32) -> Option<Self> {
        NonZeroU32::new(index).map(Self)
    }

    /// The 1-based index.
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for VolumeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bytes produced by one `read` callback.
///
/// Borrows the bridge's transfer buffer for `volume`; the borrow ends before
/// the next callback can be issued, so the engine can never observe a buffer
/// that a later read overwrote.
#[derive(Debug, Clone, Copy)]
pub struct ReadBuffer<'a> {
    volume: VolumeKey,
    data: &'a [u8],
}

impl<'a> ReadBuffer<'a> {
    /// Wrap bytes read from `volume`.
    pub fn new(volume: VolumeKey, data: &'a [u8]) -> Self {
        Self { volume, data }
    }

    /// The volume the bytes came from.
    pub fn volume(&self) -> VolumeKey {
        self.volume
    }

    /// The bytes read. Empty at end of stream.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }
}

impl Deref for ReadBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data
    }
}

/// One block of entry payload at an absolute offset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PayloadBlock {
    /// Offset of the first byte within the entry's logical data.
    pub offset: u64,
    /// Block contents.
    pub data: Vec<u8>,
}

impl PayloadBlock {
    /// Create a block.
    pub fn new(offset: u64, data: impl Into<Vec<u8>>) -> Self {
        Self {
            offset,
            data: data.into(),
        }
    }

    /// Number of bytes in the block.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the block carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Offset one past the last byte.
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

/// A header returned by [`ReadEngine::next_header`].
pub struct RawHeader {
    /// Decoded header fields.
    pub header: EntryHeader,
    /// Frees the engine-side header resource, if the engine allocated one.
    pub release: Option<Box<dyn FnOnce(&EntryHeader) + Send>>,
}

impl RawHeader {
    /// A header with no engine-side resource attached.
    pub fn new(header: EntryHeader) -> Self {
        Self {
            header,
            release: None,
        }
    }

    /// Attach the callback that frees the engine-side resource.
    pub fn with_release<F>(mut self, release: F) -> Self
    where
        F: FnOnce(&EntryHeader) + Send + 'static,
    {
        self.release = Some(Box::new(release));
        self
    }
}

impl fmt::Debug for RawHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawHeader")
            .field("header", &self.header)
            .field("release", &self.release.is_some())
            .finish()
    }
}

impl From<EntryHeader> for RawHeader {
    fn from(header: EntryHeader) -> Self {
        Self::new(header)
    }
}

/// Input callbacks offered to a [`ReadEngine`].
pub trait EngineIo {
    /// Live volume keys in precedence order.
    fn volumes(&self) -> Vec<VolumeKey>;

    /// Prepare `volume` for reading.
    fn open(&mut self, volume: VolumeKey) -> Result<()>;

    /// Read the next chunk of `volume`. An empty buffer means end of stream.
    fn read(&mut self, volume: VolumeKey) -> Result<ReadBuffer<'_>>;

    /// Reposition `volume`.
    ///
    /// Fails with [`OxiArcError::Unsupported`](crate::OxiArcError::Unsupported)
    /// on forward-only resources; the engine should fall back to sequential
    /// reads.
    fn seek(&mut self, volume: VolumeKey, pos: SeekFrom) -> Result<u64>;

    /// Skip up to `request` bytes forward. May skip fewer; the engine retries.
    fn skip(&mut self, volume: VolumeKey, request: u64) -> Result<u64>;

    /// Close `volume`. Idempotent.
    fn close(&mut self, volume: VolumeKey) -> Result<()>;

    /// Move from `old` to `new`.
    ///
    /// `old = None` is the initial activation; `new = None` marks the end of
    /// all input.
    fn switch(&mut self, old: Option<VolumeKey>, new: Option<VolumeKey>) -> Result<()>;
}

/// A pull-based archive decoder.
pub trait ReadEngine {
    /// Start reading (format detection, first volume activation).
    fn open(&mut self, io: &mut dyn EngineIo) -> Result<()>;

    /// Advance to the next entry header. `None` at end of archive.
    fn next_header(&mut self, io: &mut dyn EngineIo) -> Result<Option<RawHeader>>;

    /// Next payload block of the current entry. `None` at end of entry.
    fn next_block(&mut self, io: &mut dyn EngineIo) -> Result<Option<PayloadBlock>>;

    /// Discard the rest of the current entry's payload.
    fn skip_payload(&mut self, io: &mut dyn EngineIo) -> Result<()>;

    /// Stop reading and release engine state.
    fn close(&mut self, io: &mut dyn EngineIo) -> Result<()>;

    /// Last engine error code and message, for diagnostics.
    fn last_error(&self) -> Option<(i32, String)> {
        None
    }
}

/// Output callbacks offered to a [`WriteEngine`].
pub trait WriteIo {
    /// Prepare the sink.
    fn open(&mut self) -> Result<()>;

    /// Write `data`, returning the number of bytes accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Close the sink. Idempotent.
    fn close(&mut self) -> Result<()>;
}

/// A push-based archive encoder.
pub trait WriteEngine {
    /// Start the archive (format preamble).
    fn open(&mut self, io: &mut dyn WriteIo) -> Result<()>;

    /// Begin an entry with `header`.
    fn write_header(&mut self, io: &mut dyn WriteIo, header: &EntryHeader) -> Result<()>;

    /// Append payload bytes to the current entry, returning how many were taken.
    fn write_data(&mut self, io: &mut dyn WriteIo, data: &[u8]) -> Result<usize>;

    /// Complete the current entry.
    fn finish_entry(&mut self, io: &mut dyn WriteIo) -> Result<()>;

    /// Finish the archive (trailer) and release engine state.
    fn close(&mut self, io: &mut dyn WriteIo) -> Result<()>;
}
