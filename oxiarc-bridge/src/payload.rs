//! Flattening of sparse payload blocks into a byte stream.
//!
//! Engines hand out an entry's payload as `(offset, bytes)` blocks with
//! non-decreasing offsets. Gaps between blocks are sparse holes and read as
//! zeros. [`PayloadStreamer`] turns such a block sequence into a plain
//! [`Read`] implementation.

use oxiarc_core::{OxiArcError, PayloadBlock, Result};
use std::io::{self, Read};

/// Chunk size used by [`PayloadStreamer::into_vec`].
const COLLECT_CHUNK: usize = 64 * 1024;

/// Lazy, single-pass byte view over one entry's payload blocks.
///
/// Block errors surface from [`Read::read`] as an [`io::Error`] wrapping the
/// underlying [`OxiArcError`]. The stream is dead after the first error:
/// later reads fail with [`OxiArcError::PayloadUnavailable`].
#[derive(Debug)]
pub struct PayloadStreamer<I> {
    blocks: I,
    pending: Option<PayloadBlock>,
    cursor: u64,
    size: Option<u64>,
    done: bool,
    failed: bool,
}

impl<I> PayloadStreamer<I>
where
    I: Iterator<Item = Result<PayloadBlock>>,
{
    /// Stream `blocks` with no known logical size.
    pub fn new(blocks: I) -> Self {
        Self {
            blocks,
            pending: None,
            cursor: 0,
            size: None,
            done: false,
            failed: false,
        }
    }

    /// Stream `blocks`, zero-filling any trailing hole up to `size`.
    pub fn with_size(blocks: I, size: Option<u64>) -> Self {
        Self {
            size,
            ..Self::new(blocks)
        }
    }

    /// Logical offset of the next byte to be produced.
    pub fn position(&self) -> u64 {
        self.cursor
    }

    /// Logical size used for trailing zero fill, if known.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Read everything that is left into a vector.
    pub fn into_vec(mut self) -> Result<Vec<u8>> {
        let hint = self.size.unwrap_or(0).min(COLLECT_CHUNK as u64) as usize;
        let mut out = Vec::with_capacity(hint);
        let mut chunk = vec![0u8; COLLECT_CHUNK];
        loop {
            let n = self.fill(&mut chunk)?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&chunk[..n]);
        }
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.failed {
            return Err(OxiArcError::payload_unavailable(
                "read",
                format!("payload stream failed at offset {}", self.cursor),
            ));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if let Some(block) = self.pending.as_ref() {
                if self.cursor < block.offset {
                    let n = zero_fill(buf, block.offset - self.cursor);
                    self.cursor += n as u64;
                    return Ok(n);
                }
                let start = (self.cursor - block.offset) as usize;
                if start < block.data.len() {
                    let n = (block.data.len() - start).min(buf.len());
                    buf[..n].copy_from_slice(&block.data[start..start + n]);
                    self.cursor += n as u64;
                    return Ok(n);
                }
            }
            self.pending = None;

            if self.done {
                return Ok(match self.size {
                    Some(size) if self.cursor < size => {
                        let n = zero_fill(buf, size - self.cursor);
                        self.cursor += n as u64;
                        n
                    }
                    _ => 0,
                });
            }

            match self.blocks.next() {
                None => self.done = true,
                Some(Ok(block)) => {
                    if block.offset < self.cursor {
                        self.failed = true;
                        return Err(OxiArcError::payload_unavailable(
                            "next_block",
                            format!(
                                "block at offset {} overlaps data up to offset {}",
                                block.offset, self.cursor
                            ),
                        ));
                    }
                    self.pending = Some(block);
                }
                Some(Err(err)) => {
                    self.failed = true;
                    return Err(err);
                }
            }
        }
    }
}

fn zero_fill(buf: &mut [u8], gap: u64) -> usize {
    let n = gap.min(buf.len() as u64) as usize;
    buf[..n].fill(0);
    n
}

impl<I> Read for PayloadStreamer<I>
where
    I: Iterator<Item = Result<PayloadBlock>>,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.fill(buf).map_err(|err| match err {
            OxiArcError::Io(e) => e,
            other => io::Error::other(other),
        })
    }
}
