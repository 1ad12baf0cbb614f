//! Archive creation through a push-based engine.
//!
//! [`ArchiveWriter`] owns the engine and a single output sink. Each entry is
//! written as header, data, finish. The header travels as an
//! [`EntryHandle`]: the writer holds a reference for exactly the duration of
//! the engine's header write, so the caller may release its own reference at
//! any time without racing the engine.

use crate::bridge::OutputBridge;
use crate::options::WriterOptions;
use crate::stream::StreamResource;
use oxiarc_core::{EntryHandle, EntryHeader, OxiArcError, Result, WriteEngine, WriteIo};
use std::io::{self, Read};

/// Writes entries into an archive engine.
///
/// # Example
///
/// ```ignore
/// let sink = SinkStream::new(File::create("out.tar")?);
/// let mut writer = ArchiveWriter::new(engine, sink, WriterOptions::default())?;
/// writer.add_file("hello.txt", b"Hello world")?;
/// writer.finish()?;
/// ```
pub struct ArchiveWriter<E: WriteEngine, S: StreamResource> {
    engine: E,
    sink: Option<OutputBridge<S>>,
    buffer: Vec<u8>,
    entries: usize,
    finished: bool,
    failed: bool,
}

impl<E: WriteEngine, S: StreamResource> ArchiveWriter<E, S> {
    /// Open the sink and start the archive.
    pub fn new(mut engine: E, sink: S, options: WriterOptions) -> Result<Self> {
        options.validate()?;
        let mut sink = OutputBridge::new(sink);
        sink.open()?;
        engine.open(&mut sink)?;
        tracing::debug!(buffer_size = options.buffer_size, "archive writer opened");
        Ok(Self {
            engine,
            sink: Some(sink),
            buffer: vec![0u8; options.buffer_size],
            entries: 0,
            finished: false,
            failed: false,
        })
    }

    /// Number of entries written so far.
    pub fn entries_written(&self) -> usize {
        self.entries
    }

    /// Get a reference to the sink.
    pub fn get_ref(&self) -> Option<&S> {
        self.sink.as_ref().map(OutputBridge::get_ref)
    }

    /// Write one entry.
    ///
    /// The handle is retained around the header write and released right
    /// after it. If the header carries no size and `data` is given, the data
    /// is buffered first so the engine sees the real size.
    ///
    /// # Errors
    ///
    /// Returns [`OxiArcError::AlreadyDisposed`] if the writer was finished or
    /// the handle was already disposed. A failure after the header reached
    /// the engine leaves the archive mid-entry; every later call then returns
    /// [`OxiArcError::SessionAborted`].
    pub fn add_entry(&mut self, handle: &EntryHandle, data: Option<&mut dyn Read>) -> Result<()> {
        if self.finished {
            return Err(OxiArcError::disposed("archive writer"));
        }
        if self.failed {
            return Err(OxiArcError::aborted("add_entry"));
        }
        let out = self
            .sink
            .as_mut()
            .ok_or_else(|| OxiArcError::disposed("archive writer"))?;

        let lease = handle.lease()?;
        let mut data = data;
        let spooled = match data.take() {
            Some(reader) if lease.size.is_none() => {
                let mut bytes = Vec::new();
                reader.read_to_end(&mut bytes)?;
                let sized = (*lease).clone().with_size(bytes.len() as u64);
                self.engine.write_header(out, &sized)?;
                Some(bytes)
            }
            other => {
                data = other;
                self.engine.write_header(out, &lease)?;
                None
            }
        };
        let path = lease.path.clone();
        lease.release()?;

        let result = write_body(&mut self.engine, out, &mut self.buffer, spooled, data)
            .and_then(|written| self.engine.finish_entry(out).map(|()| written));
        let written = match result {
            Ok(written) => written,
            Err(err) => {
                tracing::debug!(path = %path, error = %err, "entry write failed");
                self.failed = true;
                return Err(err);
            }
        };
        self.entries += 1;
        tracing::debug!(path = %path, bytes = written, "entry written");
        Ok(())
    }

    /// Write an entry from a fresh header.
    pub fn add_header(&mut self, header: EntryHeader, data: Option<&mut dyn Read>) -> Result<()> {
        let handle = EntryHandle::new(header, false);
        handle.add_ref()?;
        let result = self.add_entry(&handle, data);
        handle.release()?;
        result
    }

    /// Write a regular file from a byte slice.
    pub fn add_file(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let mut reader = data;
        self.add_header(
            EntryHeader::file(path, data.len() as u64).with_permissions(0o644),
            Some(&mut reader),
        )
    }

    /// Write a directory entry.
    pub fn add_directory(&mut self, path: &str) -> Result<()> {
        self.add_header(EntryHeader::directory(path).with_permissions(0o755), None)
    }

    /// Finish the archive and close the sink. Finishing twice does nothing.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        let Some(out) = self.sink.as_mut() else {
            return Ok(());
        };
        let closed = self.engine.close(out);
        let flushed = out.close();
        tracing::debug!(
            entries = self.entries,
            ok = closed.is_ok(),
            "archive writer finished"
        );
        closed.and(flushed)
    }

    /// Finish the archive and return the sink.
    pub fn into_inner(mut self) -> Result<S> {
        self.finish()?;
        self.sink
            .take()
            .map(OutputBridge::into_inner)
            .ok_or_else(|| OxiArcError::disposed("archive writer"))
    }
}

/// Send an entry's data to the engine, returning the byte count.
fn write_body<E: WriteEngine>(
    engine: &mut E,
    io: &mut dyn WriteIo,
    buffer: &mut [u8],
    spooled: Option<Vec<u8>>,
    data: Option<&mut dyn Read>,
) -> Result<u64> {
    if let Some(bytes) = spooled {
        write_all(engine, io, &bytes)?;
        return Ok(bytes.len() as u64);
    }
    let Some(reader) = data else {
        return Ok(0);
    };
    let mut written = 0u64;
    loop {
        let n = match reader.read(buffer) {
            Ok(0) => return Ok(written),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        write_all(engine, io, &buffer[..n])?;
        written += n as u64;
    }
}

/// Feed `data` to the engine until every byte is taken.
fn write_all<E: WriteEngine>(
    engine: &mut E,
    io: &mut dyn WriteIo,
    mut data: &[u8],
) -> Result<()> {
    while !data.is_empty() {
        let n = engine.write_data(io, data)?;
        if n == 0 {
            return Err(OxiArcError::protocol("write_data", "engine accepted no bytes"));
        }
        data = &data[n.min(data.len())..];
    }
    Ok(())
}

impl<E: WriteEngine, S: StreamResource> Drop for ArchiveWriter<E, S> {
    fn drop(&mut self) {
        // Attempt to finish on drop, ignore errors
        let _ = self.finish();
    }
}

impl<E: WriteEngine, S: StreamResource> std::fmt::Debug for ArchiveWriter<E, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveWriter")
            .field("entries", &self.entries)
            .field("finished", &self.finished)
            .field("failed", &self.failed)
            .finish()
    }
}
