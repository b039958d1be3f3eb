//! Error types for courier.
//!
//! Every error carries a stable `Exxx` code and enough context to act on:
//! sizes for the capacity errors, a cause string for the collaborator
//! failures that are surfaced verbatim.

use thiserror::Error;

/// The main error type for buffered-send operations.
#[derive(Error, Debug)]
pub enum CourierError {
    /// The region handed to attach cannot hold even one minimum block.
    #[error("E001: attach buffer too small: {size} bytes, minimum {min}")]
    BufferTooSmall {
        /// Usable size of the offered region.
        size: usize,
        /// Minimum acceptable size (header plus minimum payload).
        min: usize,
    },

    /// The slot already holds an attached buffer.
    #[error("E002: a buffer is already attached to this slot")]
    BufferAlreadyAttached,

    /// No buffer is attached on any of the resolution slots.
    #[error("E003: no buffer attached for buffered send")]
    NoBufferAttached,

    /// No free block can hold the packed message, even after a progress poll.
    #[error("E004: no buffer space for message: packed size {requested}, buffer capacity {capacity}")]
    NoBufferSpace {
        /// Packed size of the message that could not be placed.
        requested: usize,
        /// Usable capacity of the attached buffer.
        capacity: usize,
    },

    /// The packing facility reported an error.
    #[error("E005: pack failed: {cause}")]
    PackFailed {
        /// Reason reported by the packer.
        cause: String,
    },

    /// The send engine refused to initiate the send.
    #[error("E006: send initiation failed: {cause}")]
    SendInitFailed {
        /// Reason reported by the send engine.
        cause: String,
    },

    /// The progress engine reported an error during reclaim or drain.
    #[error("E007: progress engine failed: {cause}")]
    ProgressFailed {
        /// Reason reported by the progress engine.
        cause: String,
    },
}

impl CourierError {
    /// Get the error code (e.g. "E004").
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::BufferTooSmall { .. } => "E001",
            Self::BufferAlreadyAttached => "E002",
            Self::NoBufferAttached => "E003",
            Self::NoBufferSpace { .. } => "E004",
            Self::PackFailed { .. } => "E005",
            Self::SendInitFailed { .. } => "E006",
            Self::ProgressFailed { .. } => "E007",
        }
    }

    /// Check if this error means the buffer ran out of room.
    ///
    /// Resource-exhaustion errors clear once outstanding sends complete;
    /// the caller may retry after driving progress.
    #[must_use]
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, Self::NoBufferSpace { .. })
    }

    /// Check if this error is a misuse of the attach/detach surface.
    #[must_use]
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::BufferTooSmall { .. } | Self::BufferAlreadyAttached | Self::NoBufferAttached
        )
    }
}

/// Result type alias using `CourierError`.
pub type Result<T> = std::result::Result<T, CourierError>;
