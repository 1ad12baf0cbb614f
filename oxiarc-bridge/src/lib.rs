//! # OxiArc Bridge
//!
//! Managed I/O and entry streaming for pull-based archive engines.
//!
//! An archive engine (for example a libarchive binding) only knows how to pull
//! bytes through `open/read/seek/skip/close/switch` callbacks and how to hand
//! out entries as "next header / next data block". This crate adapts
//! arbitrary byte sources, including multi-volume sets, to that contract and
//! exposes the engine's output as a lazy sequence of entries.
//!
//! ## Modules
//!
//! - [`stream`]: [`StreamResource`] and the provided sources and sinks
//! - [`registry`]: volume-keyed registry of input resources
//! - [`bridge`]: [`IoBridge`] and [`OutputBridge`], the callback adapters
//! - [`reader`]: [`ArchiveReader`], the entry iteration state machine
//! - [`payload`]: [`PayloadStreamer`], sparse block to byte flattening
//! - [`writer`]: [`ArchiveWriter`], header/data/finish on the write side
//! - [`options`]: reader and writer configuration
//!
//! ## Reading
//!
//! ```ignore
//! use oxiarc_bridge::prelude::*;
//!
//! let volumes: Vec<Box<dyn StreamResource>> = vec![
//!     Box::new(LazyStream::file("backup.part1")),
//!     Box::new(LazyStream::file("backup.part2")),
//! ];
//! let mut reader = ArchiveReader::open_volumes(engine, volumes, ReaderOptions::default())?;
//! while let Some(mut entry) = reader.next_entry()? {
//!     if entry.header().is_file() {
//!         let bytes = entry.read_to_vec()?;
//!         println!("{} ({} bytes)", entry.header().path, bytes.len());
//!     }
//! }
//! reader.close()?;
//! ```
//!
//! ## Logging
//!
//! Volume lifecycle, engine open/close and entry positioning are reported
//! through `tracing` at `debug`; individual reads and skips at `trace`.
//! Install any `tracing` subscriber to see them.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod bridge;
pub mod options;
pub mod payload;
pub mod reader;
pub mod registry;
pub mod stream;
pub mod writer;

// Re-exports for convenience
pub use bridge::{IoBridge, OutputBridge};
pub use options::{
    DEFAULT_BUFFER_SIZE, DEFAULT_SKIP_SEEK_THRESHOLD, DrainPolicy, ReaderOptions, WriterOptions,
};
pub use payload::PayloadStreamer;
pub use reader::{ArchiveReader, Blocks, EntryItem, EntryPayload, ReaderState};
pub use registry::StreamRegistry;
#[cfg(feature = "mmap")]
pub use stream::MmapStream;
pub use stream::{
    LazyStream, SeekableStream, SequentialStream, SinkStream, StreamResource, discard,
};
pub use writer::ArchiveWriter;

pub use oxiarc_core::{
    EngineIo, EntryHandle, EntryHeader, EntryType, OxiArcError, PayloadBlock, RawHeader,
    ReadBuffer, ReadEngine, Result, VolumeKey, WriteEngine, WriteIo,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::options::{DrainPolicy, ReaderOptions, WriterOptions};
    pub use crate::reader::{ArchiveReader, EntryItem};
    pub use crate::stream::{
        LazyStream, SeekableStream, SequentialStream, SinkStream, StreamResource,
    };
    pub use crate::writer::ArchiveWriter;
    pub use oxiarc_core::prelude::*;
}
