//! Error types for OxiArc bridge operations.
//!
//! This module provides a single error type covering every failure the I/O
//! bridge and entry stream can report: stream I/O errors, protocol
//! violations between the engine and the volume registry, engine-reported
//! failures, and misuse of disposed handles or sessions.

use std::io;
use thiserror::Error;

/// The main error type for OxiArc operations.
#[derive(Debug, Error)]
pub enum OxiArcError {
    /// I/O error from an underlying reader/writer without volume context.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// I/O failure on a registered volume.
    #[error("{op} failed on volume {volume}: {source}")]
    VolumeIo {
        /// Name of the failing operation.
        op: &'static str,
        /// Volume index the operation addressed.
        volume: u32,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The engine referenced a volume key that is not (or no longer) registered.
    #[error("{op} failed: unknown volume {volume}")]
    UnknownVolume {
        /// Name of the failing operation.
        op: &'static str,
        /// The unknown volume index.
        volume: u32,
    },

    /// The engine and the session disagree about the protocol state.
    #[error("{op} failed: protocol violation: {message}")]
    ProtocolViolation {
        /// Name of the failing operation.
        op: &'static str,
        /// Description of the violation.
        message: String,
    },

    /// The caller asked for an entry payload that can no longer be produced.
    ///
    /// Only the current entry is affected; the session stays usable.
    #[error("{op} failed: payload unavailable: {message}")]
    PayloadUnavailable {
        /// Name of the failing operation.
        op: &'static str,
        /// Why the payload cannot be read.
        message: String,
    },

    /// The resource does not support the requested operation (e.g. seek on a pipe).
    #[error("{op} is not supported by volume {volume}")]
    Unsupported {
        /// Name of the unsupported operation.
        op: &'static str,
        /// Volume index the operation addressed.
        volume: u32,
    },

    /// The archive engine reported a failure.
    #[error("{op} failed: {code:#x}: {message}")]
    Engine {
        /// Name of the failing engine operation.
        op: &'static str,
        /// Engine error code (errno-style).
        code: i32,
        /// Engine error message.
        message: String,
    },

    /// A handle or session was used after it was disposed.
    #[error("{what} already disposed")]
    AlreadyDisposed {
        /// What was disposed.
        what: &'static str,
    },

    /// `release` was called more times than `add_ref`.
    #[error("reference count underflow: release without matching add_ref")]
    RefCountUnderflow,

    /// The session hit a fatal error earlier and can no longer be used.
    #[error("{op} failed: session aborted by an earlier fatal error")]
    SessionAborted {
        /// Name of the rejected operation.
        op: &'static str,
    },

    /// Invalid configuration value.
    #[error("Invalid option: {message}")]
    InvalidOption {
        /// Description of the problem.
        message: String,
    },
}

/// Result type alias for OxiArc operations.
pub type Result<T> = std::result::Result<T, OxiArcError>;

impl OxiArcError {
    /// Create a volume I/O error.
    pub fn volume_io(op: &'static str, volume: u32, source: io::Error) -> Self {
        Self::VolumeIo { op, volume, source }
    }

    /// Create an unknown volume error.
    pub fn unknown_volume(op: &'static str, volume: u32) -> Self {
        Self::UnknownVolume { op, volume }
    }

    /// Create a protocol violation error.
    pub fn protocol(op: &'static str, message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            op,
            message: message.into(),
        }
    }

    /// Create a payload unavailable error.
    pub fn payload_unavailable(op: &'static str, message: impl Into<String>) -> Self {
        Self::PayloadUnavailable {
            op,
            message: message.into(),
        }
    }

    /// Create an unsupported operation error.
    pub fn unsupported(op: &'static str, volume: u32) -> Self {
        Self::Unsupported { op, volume }
    }

    /// Create an engine error.
    pub fn engine(op: &'static str, code: i32, message: impl Into<String>) -> Self {
        Self::Engine {
            op,
            code,
            message: message.into(),
        }
    }

    /// Create an already-disposed error.
    pub fn disposed(what: &'static str) -> Self {
        Self::AlreadyDisposed { what }
    }

    /// Create a session aborted error.
    pub fn aborted(op: &'static str) -> Self {
        Self::SessionAborted { op }
    }

    /// Create an invalid option error.
    pub fn invalid_option(message: impl Into<String>) -> Self {
        Self::InvalidOption {
            message: message.into(),
        }
    }

    /// Whether this error leaves the session in an unknown state.
    ///
    /// Protocol violations and volume I/O failures mean the engine and the
    /// stream registry can no longer be trusted to agree on positions.
    /// [`PayloadUnavailable`](Self::PayloadUnavailable) only concerns the
    /// current entry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnknownVolume { .. }
                | Self::ProtocolViolation { .. }
                | Self::VolumeIo { .. }
                | Self::SessionAborted { .. }
        )
    }

    /// Whether this error only signals an unsupported operation.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}
