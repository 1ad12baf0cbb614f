//! Callback adapters between the engine and the stream resources.
//!
//! [`IoBridge`] implements [`EngineIo`]: every call carries a [`VolumeKey`]
//! and is dispatched to the matching resource in the [`StreamRegistry`].
//! Each volume gets its own transfer buffer, allocated on first read and
//! dropped when the volume is switched away from.
//!
//! [`OutputBridge`] implements [`WriteIo`] over a single sink.
//!
//! Any callback failure other than an unsupported seek marks the bridge as
//! faulted. The reader checks the fault after each engine call: an engine
//! error that follows a bridge fault aborts the whole session, while a plain
//! engine error only fails the operation that raised it.

use crate::options::ReaderOptions;
use crate::registry::StreamRegistry;
use crate::stream::StreamResource;
use oxiarc_core::{EngineIo, OxiArcError, ReadBuffer, Result, VolumeKey, WriteIo};
use std::collections::HashMap;
use std::io::{self, SeekFrom};

/// Input side of the engine boundary.
pub struct IoBridge {
    registry: StreamRegistry,
    buffers: HashMap<VolumeKey, Vec<u8>>,
    current: Option<VolumeKey>,
    buffer_size: usize,
    skip_seek_threshold: u64,
    faulted: bool,
    finished: bool,
}

impl IoBridge {
    /// Create a bridge with an empty registry.
    pub fn new(options: &ReaderOptions) -> Self {
        Self {
            registry: StreamRegistry::new(),
            buffers: HashMap::new(),
            current: None,
            buffer_size: options.buffer_size.max(1),
            skip_seek_threshold: options.skip_seek_threshold,
            faulted: false,
            finished: false,
        }
    }

    /// Append a volume.
    pub fn register(&mut self, resource: Box<dyn StreamResource>) -> Result<VolumeKey> {
        self.registry.register(resource)
    }

    /// Insert a volume ahead of all others.
    pub fn prepend(&mut self, resource: Box<dyn StreamResource>) -> Result<VolumeKey> {
        self.registry.prepend(resource)
    }

    /// The volume registry.
    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    /// The currently active volume, if any.
    pub fn current(&self) -> Option<VolumeKey> {
        self.current
    }

    /// Whether the engine signalled the end of all input.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether a callback failed since the fault was last taken.
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    /// Return and clear the fault flag.
    pub fn take_fault(&mut self) -> bool {
        std::mem::take(&mut self.faulted)
    }

    /// Close every volume and drop all buffers.
    pub fn close_all(&mut self) {
        self.registry.close_all();
        self.buffers.clear();
        self.current = None;
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if !err.is_unsupported() {
                self.faulted = true;
            }
        }
        result
    }

    fn ensure_input(&self, op: &'static str) -> Result<()> {
        if self.finished {
            return Err(OxiArcError::protocol(op, "input already ended"));
        }
        Ok(())
    }

    fn fill(&mut self, volume: VolumeKey) -> Result<usize> {
        self.ensure_input("read")?;
        let resource = self.registry.get_for("read", volume)?;
        let buffer_size = self.buffer_size;
        let buffer = self
            .buffers
            .entry(volume)
            .or_insert_with(|| vec![0u8; buffer_size]);
        loop {
            match resource.read(buffer) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(OxiArcError::volume_io("read", volume.get(), e)),
            }
        }
    }

    fn seek_volume(&mut self, volume: VolumeKey, pos: SeekFrom) -> Result<u64> {
        self.ensure_input("seek")?;
        let resource = self.registry.get_for("seek", volume)?;
        if !resource.is_seekable() {
            return Err(OxiArcError::unsupported("seek", volume.get()));
        }
        resource.seek(pos).map_err(|e| seek_error(volume, e))
    }

    fn skip_volume(&mut self, volume: VolumeKey, request: u64) -> Result<u64> {
        self.ensure_input("skip")?;
        let threshold = self.skip_seek_threshold;
        let resource = self.registry.get_for("skip", volume)?;
        if request == 0 {
            return Ok(0);
        }
        if request >= threshold && resource.is_seekable() {
            match skip_by_seek(resource, request) {
                Ok(skipped) => return Ok(skipped),
                Err(e) if e.kind() == io::ErrorKind::Unsupported => {}
                Err(e) => return Err(OxiArcError::volume_io("skip", volume.get(), e)),
            }
        }
        resource
            .skip(request)
            .map_err(|e| OxiArcError::volume_io("skip", volume.get(), e))
    }

    fn close_volume(&mut self, volume: VolumeKey) -> Result<()> {
        let resource = self.registry.get_for("close", volume)?;
        resource
            .close()
            .map_err(|e| OxiArcError::volume_io("close", volume.get(), e))
    }

    fn switch_volume(&mut self, old: Option<VolumeKey>, new: Option<VolumeKey>) -> Result<()> {
        if let Some(new) = new {
            if !self.registry.contains(new) {
                return Err(OxiArcError::unknown_volume("switch", new.get()));
            }
        }
        if let Some(old) = old {
            if Some(old) != new {
                self.registry.remove(old);
                self.buffers.remove(&old);
            }
        }
        self.current = new;
        if new.is_none() {
            self.finished = true;
        }
        tracing::debug!(
            old = old.map(VolumeKey::get),
            new = new.map(VolumeKey::get),
            "switched volume"
        );
        Ok(())
    }
}

impl std::fmt::Debug for IoBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoBridge")
            .field("registry", &self.registry)
            .field("buffered_volumes", &self.buffers.len())
            .field("current", &self.current)
            .field("faulted", &self.faulted)
            .field("finished", &self.finished)
            .finish()
    }
}

fn seek_error(volume: VolumeKey, e: io::Error) -> OxiArcError {
    if e.kind() == io::ErrorKind::Unsupported {
        OxiArcError::unsupported("seek", volume.get())
    } else {
        OxiArcError::volume_io("seek", volume.get(), e)
    }
}

/// Skip forward by seeking, clamped to the end of the resource.
fn skip_by_seek(resource: &mut dyn StreamResource, request: u64) -> io::Result<u64> {
    let start = resource.seek(SeekFrom::Current(0))?;
    let end = resource.seek(SeekFrom::End(0))?;
    let target = start.saturating_add(request).min(end.max(start));
    resource.seek(SeekFrom::Start(target))?;
    Ok(target - start)
}

impl EngineIo for IoBridge {
    fn volumes(&self) -> Vec<VolumeKey> {
        self.registry.keys()
    }

    fn open(&mut self, volume: VolumeKey) -> Result<()> {
        let result = self.registry.get_for("open", volume).map(|_| ());
        tracing::debug!(volume = volume.get(), ok = result.is_ok(), "open volume");
        self.record(result)
    }

    fn read(&mut self, volume: VolumeKey) -> Result<ReadBuffer<'_>> {
        let filled = self.fill(volume);
        let n = self.record(filled)?;
        tracing::trace!(volume = volume.get(), bytes = n, "read");
        let data = match self.buffers.get(&volume) {
            Some(buffer) => &buffer[..n],
            None => &[],
        };
        Ok(ReadBuffer::new(volume, data))
    }

    fn seek(&mut self, volume: VolumeKey, pos: SeekFrom) -> Result<u64> {
        let result = self.seek_volume(volume, pos);
        tracing::trace!(volume = volume.get(), ?pos, ok = result.is_ok(), "seek");
        self.record(result)
    }

    fn skip(&mut self, volume: VolumeKey, request: u64) -> Result<u64> {
        let result = self.skip_volume(volume, request);
        if let Ok(skipped) = &result {
            tracing::trace!(volume = volume.get(), request, skipped, "skip");
        }
        self.record(result)
    }

    fn close(&mut self, volume: VolumeKey) -> Result<()> {
        let result = self.close_volume(volume);
        tracing::debug!(volume = volume.get(), ok = result.is_ok(), "close volume");
        self.record(result)
    }

    fn switch(&mut self, old: Option<VolumeKey>, new: Option<VolumeKey>) -> Result<()> {
        let result = self.switch_volume(old, new);
        self.record(result)
    }
}

/// Output side of the engine boundary.
#[derive(Debug)]
pub struct OutputBridge<S> {
    sink: S,
    opened: bool,
    closed: bool,
}

impl<S: StreamResource> OutputBridge<S> {
    /// Wrap a sink.
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            opened: false,
            closed: false,
        }
    }

    /// Get a reference to the sink.
    pub fn get_ref(&self) -> &S {
        &self.sink
    }

    /// Whether [`close`](WriteIo::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Unwrap the sink.
    pub fn into_inner(self) -> S {
        self.sink
    }
}

impl<S: StreamResource> WriteIo for OutputBridge<S> {
    fn open(&mut self) -> Result<()> {
        if self.closed {
            return Err(OxiArcError::disposed("output sink"));
        }
        self.opened = true;
        tracing::debug!("open output sink");
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(OxiArcError::disposed("output sink"));
        }
        let volume = VolumeKey::FIRST.get();
        let mut rest = data;
        while !rest.is_empty() {
            match self.sink.write(rest) {
                Ok(0) => {
                    return Err(OxiArcError::volume_io(
                        "write",
                        volume,
                        io::Error::from(io::ErrorKind::WriteZero),
                    ));
                }
                Ok(n) => rest = &rest[n.min(rest.len())..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(OxiArcError::volume_io("write", volume, e)),
            }
        }
        tracing::trace!(bytes = data.len(), "write");
        Ok(data.len())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        tracing::debug!(opened = self.opened, "close output sink");
        self.sink
            .close()
            .map_err(|e| OxiArcError::volume_io("close", VolumeKey::FIRST.get(), e))
    }
}
