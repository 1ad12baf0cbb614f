//! # OxiArc Core
//!
//! Core types shared by the OxiArc engine bridge.
//!
//! This crate provides the vocabulary spoken across the boundary between an
//! external, pull-based archive engine and the code that feeds it bytes:
//!
//! - [`engine`]: engine traits and callback traits, volume keys, payload blocks
//! - [`entry`]: entry header metadata
//! - [`handle`]: atomically reference-counted entry headers
//! - [`error`]: Error types
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Caller                                                  │
//! │     entry sequence, payload bytes, EntryHandle refs     │
//! ├─────────────────────────────────────────────────────────┤
//! │ Session (oxiarc-bridge)                                 │
//! │     ArchiveReader / ArchiveWriter state machines        │
//! ├─────────────────────────────────────────────────────────┤
//! │ Engine boundary (this crate)                            │
//! │     ReadEngine / WriteEngine  ⇄  EngineIo / WriteIo     │
//! ├─────────────────────────────────────────────────────────┤
//! │ I/O (oxiarc-bridge)                                     │
//! │     IoBridge, StreamRegistry, StreamResource            │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use oxiarc_core::{EntryHandle, EntryHeader, PayloadBlock};
//!
//! let handle = EntryHandle::new(EntryHeader::file("notes.txt", 12), true);
//! let header = handle.add_ref().unwrap();
//! assert_eq!(header.size, Some(12));
//! handle.release().unwrap();
//!
//! let block = PayloadBlock::new(10, b"BB".to_vec());
//! assert_eq!(block.end(), 12);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod engine;
pub mod entry;
pub mod error;
pub mod handle;

// Re-exports for convenience
pub use engine::{
    EngineIo, PayloadBlock, RawHeader, ReadBuffer, ReadEngine, VolumeKey, WriteEngine, WriteIo,
};
pub use entry::{EntryHeader, EntryType, Ownership};
pub use error::{OxiArcError, Result};
pub use handle::{EntryHandle, HeaderLease};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::engine::{
        EngineIo, PayloadBlock, RawHeader, ReadBuffer, ReadEngine, VolumeKey, WriteEngine,
        WriteIo,
    };
    pub use crate::entry::{EntryHeader, EntryType};
    pub use crate::error::{OxiArcError, Result};
    pub use crate::handle::EntryHandle;
}
