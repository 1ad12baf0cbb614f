//! Reader and writer configuration.

use oxiarc_core::{OxiArcError, Result};

/// Default size of each per-volume transfer buffer (64 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Default request size at or above which skips seek instead of discarding (64 KiB).
pub const DEFAULT_SKIP_SEEK_THRESHOLD: u64 = 64 * 1024;

/// How an untouched entry's payload is drained before advancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainPolicy {
    /// Ask the engine to skip the payload in one call.
    #[default]
    Skip,
    /// Pull and discard every remaining block.
    Read,
}

/// Configuration for an [`ArchiveReader`](crate::ArchiveReader).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Size of each volume's transfer buffer.
    pub buffer_size: usize,
    /// Skips of at least this many bytes seek on seekable volumes;
    /// shorter skips read and discard.
    pub skip_seek_threshold: u64,
    /// Drain strategy for entries whose payload was never touched.
    pub drain_policy: DrainPolicy,
    /// Pull each entry's whole payload into memory as soon as it is positioned.
    pub greedy: bool,
}

impl ReaderOptions {
    /// Options for streaming: skip untouched payloads, no prefetch.
    pub const STREAMING: Self = Self {
        buffer_size: DEFAULT_BUFFER_SIZE,
        skip_seek_threshold: DEFAULT_SKIP_SEEK_THRESHOLD,
        drain_policy: DrainPolicy::Skip,
        greedy: false,
    };

    /// Options that buffer every entry's payload up front.
    pub const GREEDY: Self = Self {
        greedy: true,
        ..Self::STREAMING
    };

    /// Create default options.
    pub fn new() -> Self {
        Self::STREAMING
    }

    /// Set the transfer buffer size.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set the skip-versus-seek threshold.
    pub fn with_skip_seek_threshold(mut self, threshold: u64) -> Self {
        self.skip_seek_threshold = threshold;
        self
    }

    /// Set the drain policy.
    pub fn with_drain_policy(mut self, policy: DrainPolicy) -> Self {
        self.drain_policy = policy;
        self
    }

    /// Enable or disable greedy payload prefetch.
    pub fn with_greedy(mut self, greedy: bool) -> Self {
        self.greedy = greedy;
        self
    }

    /// Check the options for values the reader cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(OxiArcError::invalid_option("buffer_size must be non-zero"));
        }
        Ok(())
    }
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for an [`ArchiveWriter`](crate::ArchiveWriter).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterOptions {
    /// Size of the buffer used to pump entry data into the engine.
    pub buffer_size: usize,
}

impl WriterOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Set the pump buffer size.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Check the options for values the writer cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(OxiArcError::invalid_option("buffer_size must be non-zero"));
        }
        Ok(())
    }
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self::new()
    }
}
