//! Scripted frame engine shared by the integration tests.
//!
//! The frame format is deliberately trivial so the tests exercise the bridge
//! rather than a codec:
//!
//! ```text
//! archive := MAGIC entry* 0x00
//! entry   := 0x01 path_len:u16 path kind:u8 size:u64 payload_len:u64 block*
//! block   := offset:u64 len:u32 bytes[len]
//! ```
//!
//! All integers are little-endian. `size == u64::MAX` means unknown size and
//! `payload_len` covers the encoded blocks so the payload can be skipped.

#![allow(dead_code)]

use oxiarc_bridge::{
    EngineIo, EntryHeader, EntryType, OxiArcError, PayloadBlock, RawHeader, ReadEngine, Result,
    StreamResource, VolumeKey, WriteEngine, WriteIo,
};
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const MAGIC: &[u8; 4] = b"OXFR";
const TAG_END: u8 = 0;
const TAG_ENTRY: u8 = 1;
const UNKNOWN_SIZE: u64 = u64::MAX;
const BLOCK_HEADER_LEN: u64 = 12;
/// Largest block the writer emits.
pub const WRITE_BLOCK: usize = 4096;

// ============================================================================
// Encoding
// ============================================================================

fn kind_of(entry_type: EntryType) -> u8 {
    match entry_type {
        EntryType::Directory => 1,
        EntryType::Symlink => 2,
        _ => 0,
    }
}

fn type_of(kind: u8) -> EntryType {
    match kind {
        1 => EntryType::Directory,
        2 => EntryType::Symlink,
        _ => EntryType::File,
    }
}

/// Append one encoded entry to `out`.
pub fn encode_entry(
    out: &mut Vec<u8>,
    path: &str,
    kind: u8,
    size: Option<u64>,
    blocks: &[(u64, &[u8])],
) {
    out.push(TAG_ENTRY);
    out.extend_from_slice(&(path.len() as u16).to_le_bytes());
    out.extend_from_slice(path.as_bytes());
    out.push(kind);
    out.extend_from_slice(&size.unwrap_or(UNKNOWN_SIZE).to_le_bytes());
    let payload_len: u64 = blocks
        .iter()
        .map(|(_, data)| BLOCK_HEADER_LEN + data.len() as u64)
        .sum();
    out.extend_from_slice(&payload_len.to_le_bytes());
    for (offset, data) in blocks {
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
    }
}

/// Builds frame archives byte by byte, including sparse entries the writer
/// never produces.
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    bytes: Vec<u8>,
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self {
            bytes: MAGIC.to_vec(),
        }
    }

    pub fn file(mut self, path: &str, data: &[u8]) -> Self {
        let blocks: Vec<(u64, &[u8])> = if data.is_empty() {
            Vec::new()
        } else {
            vec![(0, data)]
        };
        encode_entry(&mut self.bytes, path, 0, Some(data.len() as u64), &blocks);
        self
    }

    pub fn chunked(mut self, path: &str, data: &[u8], chunk: usize) -> Self {
        let blocks: Vec<(u64, &[u8])> = data
            .chunks(chunk)
            .enumerate()
            .map(|(i, part)| ((i * chunk) as u64, part))
            .collect();
        encode_entry(&mut self.bytes, path, 0, Some(data.len() as u64), &blocks);
        self
    }

    pub fn sparse(mut self, path: &str, size: Option<u64>, blocks: &[(u64, &[u8])]) -> Self {
        encode_entry(&mut self.bytes, path, 0, size, blocks);
        self
    }

    pub fn directory(mut self, path: &str) -> Self {
        encode_entry(&mut self.bytes, path, 1, Some(0), &[]);
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        self.bytes.push(TAG_END);
        self.bytes
    }

    /// Build without the end marker, as if the archive were cut short.
    pub fn build_truncated(self) -> Vec<u8> {
        self.bytes
    }
}

/// Split `bytes` into volumes at the given offsets.
pub fn split(bytes: &[u8], cuts: &[usize]) -> Vec<Vec<u8>> {
    let mut volumes = Vec::new();
    let mut start = 0;
    for &cut in cuts {
        volumes.push(bytes[start..cut].to_vec());
        start = cut;
    }
    volumes.push(bytes[start..].to_vec());
    volumes
}

// ============================================================================
// Engine statistics and fault injection
// ============================================================================

/// Counters shared between a test and the engine it handed to a reader.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub headers: AtomicUsize,
    pub blocks: AtomicUsize,
    pub skip_payloads: AtomicUsize,
    pub released: AtomicUsize,
    pub closes: AtomicUsize,
}

impl EngineStats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Failure injection for [`FrameReader`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    /// Fail the given block (entry index, block index) after consuming it.
    pub fail_block: Option<(usize, usize)>,
    /// Fail every `skip_payload` call without consuming anything.
    pub fail_skip: bool,
}

// ============================================================================
// Read engine
// ============================================================================

/// Byte-level cursor over the engine's volumes.
#[derive(Debug, Default)]
struct Input {
    volumes: Vec<VolumeKey>,
    at: usize,
    buf: Vec<u8>,
    pos: usize,
}

impl Input {
    fn current(&self) -> Option<VolumeKey> {
        self.volumes.get(self.at).copied()
    }

    /// Move to the next volume, or signal the end of all input.
    fn advance(&mut self, io: &mut dyn EngineIo) -> Result<()> {
        let old = self.current();
        self.at += 1;
        let new = self.current();
        if let Some(new) = new {
            io.open(new)?;
        }
        io.switch(old, new)
    }

    fn fill(&mut self, io: &mut dyn EngineIo) -> Result<bool> {
        loop {
            let Some(volume) = self.current() else {
                return Ok(false);
            };
            let chunk = io.read(volume)?;
            if !chunk.is_empty() {
                self.buf = chunk.to_vec();
                self.pos = 0;
                return Ok(true);
            }
            self.advance(io)?;
        }
    }

    fn read_exact(&mut self, io: &mut dyn EngineIo, out: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < out.len() {
            if self.pos == self.buf.len() && !self.fill(io)? {
                return Err(OxiArcError::engine("read", 84, "truncated archive"));
            }
            let n = (self.buf.len() - self.pos).min(out.len() - filled);
            out[filled..filled + n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            filled += n;
        }
        Ok(())
    }

    fn skip(&mut self, io: &mut dyn EngineIo, mut remaining: u64) -> Result<()> {
        let buffered = ((self.buf.len() - self.pos) as u64).min(remaining);
        self.pos += buffered as usize;
        remaining -= buffered;
        while remaining > 0 {
            let Some(volume) = self.current() else {
                return Err(OxiArcError::engine("skip", 84, "truncated archive"));
            };
            let skipped = io.skip(volume, remaining)?;
            if skipped == 0 {
                self.advance(io)?;
            }
            remaining -= skipped.min(remaining);
        }
        Ok(())
    }

    fn u8(&mut self, io: &mut dyn EngineIo) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_exact(io, &mut b)?;
        Ok(b[0])
    }

    fn u16(&mut self, io: &mut dyn EngineIo) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_exact(io, &mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    fn u32(&mut self, io: &mut dyn EngineIo) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_exact(io, &mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    fn u64(&mut self, io: &mut dyn EngineIo) -> Result<u64> {
        let mut b = [0u8; 8];
        self.read_exact(io, &mut b)?;
        Ok(u64::from_le_bytes(b))
    }
}

/// Decoder for the frame format.
#[derive(Debug, Default)]
pub struct FrameReader {
    input: Input,
    stats: Arc<EngineStats>,
    faults: Faults,
    entry: usize,
    block: usize,
    remaining: u64,
    done: bool,
    last_error: Option<(i32, String)>,
}

impl FrameReader {
    pub fn new() -> (Self, Arc<EngineStats>) {
        Self::with_faults(Faults::default())
    }

    pub fn with_faults(faults: Faults) -> (Self, Arc<EngineStats>) {
        let stats = Arc::new(EngineStats::default());
        let engine = Self {
            stats: Arc::clone(&stats),
            faults,
            ..Self::default()
        };
        (engine, stats)
    }

    fn fail<T>(&mut self, op: &'static str, code: i32, message: &str) -> Result<T> {
        self.last_error = Some((code, message.to_string()));
        Err(OxiArcError::engine(op, code, message))
    }
}

impl ReadEngine for FrameReader {
    fn open(&mut self, io: &mut dyn EngineIo) -> Result<()> {
        self.input.volumes = io.volumes();
        let Some(first) = self.input.current() else {
            return self.fail("open", 22, "no volumes");
        };
        io.open(first)?;
        io.switch(None, Some(first))?;
        let mut magic = [0u8; 4];
        self.input.read_exact(io, &mut magic)?;
        if &magic != MAGIC {
            return self.fail("open", 79, "unrecognized archive format");
        }
        Ok(())
    }

    fn next_header(&mut self, io: &mut dyn EngineIo) -> Result<Option<RawHeader>> {
        if self.done {
            return Ok(None);
        }
        if self.remaining > 0 {
            let remaining = std::mem::take(&mut self.remaining);
            self.input.skip(io, remaining)?;
        }
        match self.input.u8(io)? {
            TAG_END => {
                self.done = true;
                return Ok(None);
            }
            TAG_ENTRY => {}
            _ => return self.fail("next_header", 84, "bad entry tag"),
        }
        let path_len = self.input.u16(io)? as usize;
        let mut path = vec![0u8; path_len];
        self.input.read_exact(io, &mut path)?;
        let path = match String::from_utf8(path) {
            Ok(path) => path,
            Err(_) => return self.fail("next_header", 84, "path is not UTF-8"),
        };
        let kind = self.input.u8(io)?;
        let size = self.input.u64(io)?;
        self.remaining = self.input.u64(io)?;
        self.block = 0;
        self.stats.headers.fetch_add(1, Ordering::SeqCst);

        let mut header = EntryHeader::file(path, 0);
        header.entry_type = type_of(kind);
        header.size = (size != UNKNOWN_SIZE).then_some(size);
        let stats = Arc::clone(&self.stats);
        let raw = RawHeader::new(header).with_release(move |_| {
            stats.released.fetch_add(1, Ordering::SeqCst);
        });
        self.entry += 1;
        Ok(Some(raw))
    }

    fn next_block(&mut self, io: &mut dyn EngineIo) -> Result<Option<PayloadBlock>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let offset = self.input.u64(io)?;
        let len = self.input.u32(io)?;
        let mut data = vec![0u8; len as usize];
        self.input.read_exact(io, &mut data)?;
        self.remaining = self
            .remaining
            .saturating_sub(BLOCK_HEADER_LEN + len as u64);

        let position = (self.entry - 1, self.block);
        self.block += 1;
        self.stats.blocks.fetch_add(1, Ordering::SeqCst);
        if self.faults.fail_block == Some(position) {
            return self.fail("next_block", 5, "injected block failure");
        }
        Ok(Some(PayloadBlock::new(offset, data)))
    }

    fn skip_payload(&mut self, io: &mut dyn EngineIo) -> Result<()> {
        self.stats.skip_payloads.fetch_add(1, Ordering::SeqCst);
        if self.faults.fail_skip {
            return self.fail("skip_payload", 5, "injected skip failure");
        }
        let remaining = std::mem::take(&mut self.remaining);
        self.input.skip(io, remaining)
    }

    fn close(&mut self, io: &mut dyn EngineIo) -> Result<()> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        match self.input.current() {
            Some(volume) => io.close(volume),
            None => Ok(()),
        }
    }

    fn last_error(&self) -> Option<(i32, String)> {
        self.last_error.clone()
    }
}

// ============================================================================
// Write engine
// ============================================================================

/// Encoder for the frame format. Buffers each entry until it is finished.
#[derive(Debug, Default)]
pub struct FrameWriter {
    header: Option<EntryHeader>,
    data: Vec<u8>,
    pub entries: usize,
    pub closed: bool,
}

impl WriteEngine for FrameWriter {
    fn open(&mut self, io: &mut dyn WriteIo) -> Result<()> {
        io.write(MAGIC).map(|_| ())
    }

    fn write_header(&mut self, _io: &mut dyn WriteIo, header: &EntryHeader) -> Result<()> {
        if self.header.is_some() {
            return Err(OxiArcError::protocol("write_header", "previous entry not finished"));
        }
        self.header = Some(header.clone());
        self.data.clear();
        Ok(())
    }

    fn write_data(&mut self, _io: &mut dyn WriteIo, data: &[u8]) -> Result<usize> {
        if self.header.is_none() {
            return Err(OxiArcError::protocol("write_data", "no entry started"));
        }
        self.data.extend_from_slice(data);
        Ok(data.len())
    }

    fn finish_entry(&mut self, io: &mut dyn WriteIo) -> Result<()> {
        let header = self
            .header
            .take()
            .ok_or_else(|| OxiArcError::protocol("finish_entry", "no entry started"))?;
        let blocks: Vec<(u64, &[u8])> = self
            .data
            .chunks(WRITE_BLOCK)
            .enumerate()
            .map(|(i, part)| ((i * WRITE_BLOCK) as u64, part))
            .collect();
        let mut out = Vec::new();
        encode_entry(
            &mut out,
            &header.path,
            kind_of(header.entry_type),
            header.size,
            &blocks,
        );
        io.write(&out)?;
        self.entries += 1;
        Ok(())
    }

    fn close(&mut self, io: &mut dyn WriteIo) -> Result<()> {
        self.closed = true;
        io.write(&[TAG_END]).map(|_| ())
    }
}

// ============================================================================
// Probe resources
// ============================================================================

/// Counters observed through a [`Probe`].
#[derive(Debug, Default)]
pub struct ProbeStats {
    pub reads: AtomicUsize,
    pub seeks: AtomicUsize,
    pub closes: AtomicUsize,
}

/// In-memory volume that counts what the bridge does to it.
#[derive(Debug)]
pub struct Probe {
    inner: Cursor<Vec<u8>>,
    seekable: bool,
    fail_after: Option<u64>,
    closed: bool,
    stats: Arc<ProbeStats>,
}

impl Probe {
    pub fn new(bytes: Vec<u8>) -> (Self, Arc<ProbeStats>) {
        let stats = Arc::new(ProbeStats::default());
        let probe = Self {
            inner: Cursor::new(bytes),
            seekable: true,
            fail_after: None,
            closed: false,
            stats: Arc::clone(&stats),
        };
        (probe, stats)
    }

    /// Forward-only variant.
    pub fn sequential(bytes: Vec<u8>) -> (Self, Arc<ProbeStats>) {
        let (mut probe, stats) = Self::new(bytes);
        probe.seekable = false;
        (probe, stats)
    }

    /// Fail every read once the position reaches `offset`.
    pub fn failing_after(mut self, offset: u64) -> Self {
        self.fail_after = Some(offset);
        self
    }
}

impl StreamResource for Probe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::other("probe closed"));
        }
        self.stats.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.fail_after {
            let position = self.inner.position();
            if position >= limit {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "volume went away"));
            }
            let allowed = (limit - position).min(buf.len() as u64) as usize;
            return self.inner.read(&mut buf[..allowed]);
        }
        self.inner.read(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        if !self.seekable {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "not seekable"));
        }
        self.stats.seeks.fetch_add(1, Ordering::SeqCst);
        self.inner.seek(pos)
    }

    fn is_seekable(&self) -> bool {
        self.seekable
    }

    fn close(&mut self) -> io::Result<()> {
        if !self.closed {
            self.closed = true;
            self.stats.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Collect every entry as `(path, payload)`.
pub fn collect_entries<E: ReadEngine>(
    reader: &mut oxiarc_bridge::ArchiveReader<E>,
) -> Result<Vec<(String, Vec<u8>)>> {
    let mut entries = Vec::new();
    while let Some(mut entry) = reader.next_entry()? {
        let path = entry.header().path.clone();
        let data = entry.read_to_vec()?;
        entries.push((path, data));
    }
    Ok(entries)
}
