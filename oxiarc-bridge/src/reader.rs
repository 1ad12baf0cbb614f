//! Lazy entry iteration over a pull-based engine.
//!
//! [`ArchiveReader`] owns the engine and the [`IoBridge`] and walks the
//! archive one entry at a time. Each call to
//! [`next_entry`](ArchiveReader::next_entry) drains whatever is left of the
//! previous entry's payload, asks the engine for the next header and returns
//! an [`EntryItem`] that borrows the reader. The borrow checker therefore
//! rules out touching a stale entry after advancing.
//!
//! ```text
//!  Idle ──next_header──▶ Positioned ──next_block──▶ Consuming
//!   ▲                        │                          │
//!   └──── drain (skip/read) ◀┴──────────────────────────┘
//!
//!  any state ──end of archive──▶ Finished
//!  any state ──fatal error─────▶ Failed
//!  any state ──close()─────────▶ Disposed
//! ```

use crate::bridge::IoBridge;
use crate::options::{DrainPolicy, ReaderOptions};
use crate::payload::PayloadStreamer;
use crate::stream::StreamResource;
use oxiarc_core::{
    EngineIo, EntryHandle, EntryHeader, OxiArcError, PayloadBlock, ReadEngine, Result, VolumeKey,
};
use std::collections::VecDeque;
use std::io::{self, Cursor, Read};

/// Where the reader is in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// No entry positioned.
    Idle,
    /// Header fetched, payload untouched.
    Positioned,
    /// Payload partially read.
    Consuming,
    /// End of archive reached.
    Finished,
    /// A fatal error occurred; the session is unusable.
    Failed,
    /// The reader has been closed.
    Disposed,
}

#[derive(Debug)]
struct Current {
    index: usize,
    handle: EntryHandle,
    prefetched: VecDeque<PayloadBlock>,
    deferred: Option<OxiArcError>,
    materialized: Option<Vec<u8>>,
    touched: bool,
    skipped: bool,
    exhausted: bool,
    errored: bool,
}

/// Streams entries out of an archive engine.
///
/// # Example
///
/// ```ignore
/// let volume = SeekableStream::open_file("backup.tar")?;
/// let mut reader = ArchiveReader::open(engine, volume, ReaderOptions::default())?;
/// while let Some(mut entry) = reader.next_entry()? {
///     println!("{}", entry.header());
///     let data = entry.read_to_vec()?;
/// }
/// ```
pub struct ArchiveReader<E: ReadEngine> {
    engine: E,
    bridge: IoBridge,
    options: ReaderOptions,
    state: ReaderState,
    opened: bool,
    next_index: usize,
    current: Option<Current>,
}

impl<E: ReadEngine> ArchiveReader<E> {
    /// Create a reader with no volumes. The engine is opened on first use.
    pub fn new(engine: E, options: ReaderOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            engine,
            bridge: IoBridge::new(&options),
            options,
            state: ReaderState::Idle,
            opened: false,
            next_index: 0,
            current: None,
        })
    }

    /// Open a single-volume archive.
    pub fn open<S>(engine: E, resource: S, options: ReaderOptions) -> Result<Self>
    where
        S: StreamResource + 'static,
    {
        Self::open_volumes(engine, [Box::new(resource) as Box<dyn StreamResource>], options)
    }

    /// Open a multi-volume archive. Volumes are keyed 1, 2, 3, ... in order.
    pub fn open_volumes<I>(engine: E, volumes: I, options: ReaderOptions) -> Result<Self>
    where
        I: IntoIterator<Item = Box<dyn StreamResource>>,
    {
        let mut reader = Self::new(engine, options)?;
        for resource in volumes {
            reader.bridge.register(resource)?;
        }
        reader.start()?;
        Ok(reader)
    }

    /// Append a volume.
    pub fn add_volume<S>(&mut self, resource: S) -> Result<VolumeKey>
    where
        S: StreamResource + 'static,
    {
        self.ensure_usable("add_volume")?;
        self.bridge.register(Box::new(resource))
    }

    /// Insert a volume ahead of all others.
    pub fn prepend_volume<S>(&mut self, resource: S) -> Result<VolumeKey>
    where
        S: StreamResource + 'static,
    {
        self.ensure_usable("prepend_volume")?;
        self.bridge.prepend(Box::new(resource))
    }

    /// Open the engine if that has not happened yet.
    pub fn start(&mut self) -> Result<()> {
        self.ensure_usable("open")?;
        if self.opened {
            return Ok(());
        }
        tracing::debug!(volumes = self.bridge.registry().len(), "opening engine");
        self.opened = true;
        match self.call(|engine, io| engine.open(io)) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.state = ReaderState::Failed;
                Err(err)
            }
        }
    }

    /// Current state.
    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// The reader's options.
    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    /// Number of headers returned so far.
    pub fn entries_read(&self) -> usize {
        self.next_index
    }

    /// Live volume keys in precedence order.
    pub fn volumes(&self) -> Vec<VolumeKey> {
        self.bridge.volumes()
    }

    /// The engine's last error code and message.
    pub fn last_error(&self) -> Option<(i32, String)> {
        self.engine.last_error()
    }

    /// Advance to the next entry, draining the current one first.
    ///
    /// Returns `Ok(None)` at the end of the archive.
    ///
    /// # Errors
    ///
    /// Header errors are fatal: the reader moves to
    /// [`ReaderState::Failed`] and every later call returns
    /// [`OxiArcError::SessionAborted`]. After [`close`](Self::close), returns
    /// [`OxiArcError::AlreadyDisposed`].
    pub fn next_entry(&mut self) -> Result<Option<EntryItem<'_, E>>> {
        match self.state {
            ReaderState::Disposed => return Err(OxiArcError::disposed("archive reader")),
            ReaderState::Failed => return Err(OxiArcError::aborted("next_entry")),
            ReaderState::Finished => return Ok(None),
            _ => {}
        }
        self.start()?;
        self.drain_current()?;
        self.release_current();
        self.state = ReaderState::Idle;

        let raw = match self.call(|engine, io| engine.next_header(io)) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::debug!(entries = self.next_index, "end of archive");
                self.state = ReaderState::Finished;
                return Ok(None);
            }
            Err(err) => {
                tracing::debug!(error = %err, "header fetch failed");
                self.state = ReaderState::Failed;
                return Err(err);
            }
        };

        let handle = EntryHandle::from_raw(raw, true);
        handle.add_ref()?;
        let item_handle = handle.clone();
        let index = self.next_index;
        self.next_index += 1;
        tracing::debug!(index, path = %handle.value().path, "positioned on entry");

        self.current = Some(Current {
            index,
            handle,
            prefetched: VecDeque::new(),
            deferred: None,
            materialized: None,
            touched: false,
            skipped: false,
            exhausted: false,
            errored: false,
        });
        self.state = ReaderState::Positioned;

        if self.options.greedy {
            self.prefetch()?;
        }
        Ok(Some(EntryItem {
            reader: self,
            index,
            handle: item_handle,
        }))
    }

    /// Close the engine and every volume. Closing twice does nothing.
    pub fn close(&mut self) -> Result<()> {
        if self.state == ReaderState::Disposed {
            return Ok(());
        }
        self.release_current();
        let result = if self.opened {
            self.call(|engine, io| engine.close(io))
        } else {
            Ok(())
        };
        self.bridge.close_all();
        self.state = ReaderState::Disposed;
        tracing::debug!(entries = self.next_index, ok = result.is_ok(), "reader closed");
        result
    }

    fn ensure_usable(&self, op: &'static str) -> Result<()> {
        match self.state {
            ReaderState::Disposed => Err(OxiArcError::disposed("archive reader")),
            ReaderState::Failed => Err(OxiArcError::aborted(op)),
            _ => Ok(()),
        }
    }

    /// Run one engine operation and classify its failure.
    fn call<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut E, &mut dyn EngineIo) -> Result<T>,
    {
        self.bridge.take_fault();
        let result = f(&mut self.engine, &mut self.bridge);
        let faulted = self.bridge.take_fault();
        if let Err(err) = &result {
            if faulted || err.is_fatal() {
                tracing::debug!(error = %err, faulted, "fatal engine error");
                self.state = ReaderState::Failed;
            }
        }
        result
    }

    /// Pull the whole payload of the current entry into memory.
    fn prefetch(&mut self) -> Result<()> {
        loop {
            match self.call(|engine, io| engine.next_block(io)) {
                Ok(Some(block)) => {
                    if let Some(current) = self.current.as_mut() {
                        current.prefetched.push_back(block);
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    if self.state == ReaderState::Failed {
                        return Err(err);
                    }
                    if let Some(current) = self.current.as_mut() {
                        current.deferred = Some(err);
                        current.errored = true;
                    }
                    break;
                }
            }
        }
        if let Some(current) = self.current.as_mut() {
            current.exhausted = !current.errored;
        }
        Ok(())
    }

    fn pull_block(&mut self) -> Result<Option<PayloadBlock>> {
        self.ensure_usable("next_block")?;
        let current = self
            .current
            .as_mut()
            .ok_or_else(|| OxiArcError::protocol("next_block", "no entry positioned"))?;
        current.touched = true;
        if let Some(block) = current.prefetched.pop_front() {
            self.state = ReaderState::Consuming;
            return Ok(Some(block));
        }
        if let Some(err) = current.deferred.take() {
            return Err(err);
        }
        if current.exhausted || current.materialized.is_some() {
            return Ok(None);
        }
        self.state = ReaderState::Consuming;

        let result = self.call(|engine, io| engine.next_block(io));
        let Some(current) = self.current.as_mut() else {
            return result;
        };
        match &result {
            Ok(Some(block)) => {
                tracing::trace!(
                    index = current.index,
                    offset = block.offset,
                    len = block.len(),
                    "payload block"
                );
            }
            Ok(None) => current.exhausted = true,
            Err(_) => current.errored = true,
        }
        result
    }

    /// Drain the current entry so the engine can move to the next header.
    fn drain_current(&mut self) -> Result<()> {
        let Some(current) = self.current.as_ref() else {
            return Ok(());
        };
        if current.exhausted {
            return Ok(());
        }
        let index = current.index;
        let untouched = !current.touched;
        let errored = current.errored;

        if (untouched && self.options.drain_policy == DrainPolicy::Skip) || errored {
            tracing::debug!(index, "skip-drain");
            match self.call(|engine, io| engine.skip_payload(io)) {
                Ok(()) => {
                    self.mark_exhausted();
                    return Ok(());
                }
                Err(err) if self.state == ReaderState::Failed => return Err(err),
                Err(err) => {
                    tracing::debug!(index, error = %err, "skip-drain failed, trying read-drain");
                }
            }
        }

        tracing::debug!(index, "read-drain");
        loop {
            match self.call(|engine, io| engine.next_block(io)) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    self.mark_exhausted();
                    return Ok(());
                }
                Err(err) => {
                    // Engine position is unknown once both drains failed.
                    self.state = ReaderState::Failed;
                    return Err(err);
                }
            }
        }
    }

    fn mark_exhausted(&mut self) {
        if let Some(current) = self.current.as_mut() {
            current.exhausted = true;
            current.prefetched.clear();
            current.deferred = None;
        }
    }

    /// Drop the reader's reference on the current entry.
    fn release_current(&mut self) {
        if let Some(current) = self.current.take() {
            if let Err(err) = current.handle.release() {
                tracing::warn!(
                    index = current.index,
                    error = %err,
                    "failed to release entry handle"
                );
            }
        }
    }
}

impl<E: ReadEngine> Drop for ArchiveReader<E> {
    fn drop(&mut self) {
        // Errors during drop are ignored; call close() to observe them.
        let _ = self.close();
    }
}

impl<E: ReadEngine> std::fmt::Debug for ArchiveReader<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveReader")
            .field("state", &self.state)
            .field("entries_read", &self.next_index)
            .field("bridge", &self.bridge)
            .finish()
    }
}

/// The entry the reader is positioned on.
///
/// Holds the reader mutably, so it must be dropped before the next call to
/// [`ArchiveReader::next_entry`].
pub struct EntryItem<'a, E: ReadEngine> {
    reader: &'a mut ArchiveReader<E>,
    index: usize,
    handle: EntryHandle,
}

impl<E: ReadEngine> EntryItem<'_, E> {
    /// Zero-based position of the entry in the archive.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The entry header.
    pub fn header(&self) -> &EntryHeader {
        self.handle.value()
    }

    /// The shared handle. Call [`EntryHandle::add_ref`] on a clone to keep the
    /// header past the next advance.
    pub fn handle(&self) -> &EntryHandle {
        &self.handle
    }

    /// Pull the next raw payload block. `None` at end of entry.
    pub fn next_block(&mut self) -> Result<Option<PayloadBlock>> {
        self.reader.pull_block()
    }

    /// Iterate over the remaining raw payload blocks.
    pub fn blocks(&mut self) -> Blocks<'_, E> {
        Blocks {
            reader: &mut *self.reader,
            done: false,
        }
    }

    /// Byte view of the payload, with sparse holes zero-filled.
    ///
    /// After [`materialize`](Self::materialize) this replays the buffered
    /// bytes and may be called any number of times.
    ///
    /// # Errors
    ///
    /// Returns [`OxiArcError::PayloadUnavailable`] if the live payload was
    /// already partly consumed or skipped, since the block sequence cannot be
    /// restarted.
    pub fn payload(&mut self) -> Result<EntryPayload<'_, E>> {
        let (touched, skipped) = match self.reader.current.as_ref() {
            Some(current) if current.materialized.is_some() => {
                return Ok(EntryPayload::Replay(Cursor::new(self.materialized_bytes())));
            }
            Some(current) => (current.touched, current.skipped),
            None => return Err(OxiArcError::protocol("payload", "no entry positioned")),
        };
        if skipped {
            return Err(OxiArcError::payload_unavailable("payload", "payload was skipped"));
        }
        if touched {
            return Err(OxiArcError::payload_unavailable(
                "payload",
                "payload already consumed; materialize() to read it twice",
            ));
        }
        let size = self.handle.value().size;
        Ok(EntryPayload::Live(PayloadStreamer::with_size(
            self.blocks(),
            size,
        )))
    }

    /// Read the whole payload into a vector.
    pub fn read_to_vec(&mut self) -> Result<Vec<u8>> {
        self.payload()?.into_vec()
    }

    /// Buffer the payload once so it can be replayed.
    pub fn materialize(&mut self) -> Result<&[u8]> {
        let buffered = self
            .reader
            .current
            .as_ref()
            .is_some_and(|current| current.materialized.is_some());
        if !buffered {
            let bytes = self.payload()?.into_vec()?;
            if let Some(current) = self.reader.current.as_mut() {
                current.materialized = Some(bytes);
            }
        }
        Ok(self.materialized_bytes())
    }

    fn materialized_bytes(&self) -> &[u8] {
        self.reader
            .current
            .as_ref()
            .and_then(|current| current.materialized.as_deref())
            .unwrap_or_default()
    }

    /// Discard the rest of the payload now instead of at the next advance.
    ///
    /// A materialized payload can still be replayed afterwards; otherwise
    /// [`payload`](Self::payload) fails and [`next_block`](Self::next_block)
    /// returns `None`.
    pub fn skip(&mut self) -> Result<()> {
        self.reader.ensure_usable("skip")?;
        self.reader.drain_current()?;
        if let Some(current) = self.reader.current.as_mut() {
            current.skipped = true;
            current.exhausted = true;
            current.prefetched.clear();
            current.deferred = None;
        }
        Ok(())
    }
}

impl<E: ReadEngine> std::fmt::Debug for EntryItem<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryItem")
            .field("index", &self.index())
            .field("header", self.header())
            .finish()
    }
}

/// Iterator over an entry's remaining payload blocks.
///
/// Stops after the first error.
pub struct Blocks<'a, E: ReadEngine> {
    reader: &'a mut ArchiveReader<E>,
    done: bool,
}

impl<E: ReadEngine> Iterator for Blocks<'_, E> {
    type Item = Result<PayloadBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.pull_block() {
            Ok(Some(block)) => Some(Ok(block)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Byte stream over one entry's payload.
pub enum EntryPayload<'a, E: ReadEngine> {
    /// Streams blocks from the engine as they are read.
    Live(PayloadStreamer<Blocks<'a, E>>),
    /// Replays a materialized payload.
    Replay(Cursor<&'a [u8]>),
}

impl<E: ReadEngine> EntryPayload<'_, E> {
    /// Read everything that is left into a vector.
    pub fn into_vec(self) -> Result<Vec<u8>> {
        match self {
            Self::Live(streamer) => streamer.into_vec(),
            Self::Replay(cursor) => {
                let position = cursor.position() as usize;
                let bytes = cursor.into_inner();
                Ok(bytes.get(position..).unwrap_or_default().to_vec())
            }
        }
    }
}

impl<E: ReadEngine> Read for EntryPayload<'_, E> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Live(streamer) => streamer.read(buf),
            Self::Replay(cursor) => cursor.read(buf),
        }
    }
}
