//! Prelude for convenient imports.
//!
//! # Example
//!
//! ```ignore
//! use courier_core::prelude::*;
//! ```

// Core types
pub use crate::types::{BufferRegion, CommId, Datatype, Rank, Tag};

// Error handling
pub use crate::error::{CourierError, Result};

// Buffered-send surface
pub use crate::bsend::{
    attach_process_buffer, detach_process_buffer, finalize_process_buffer, process_buffer,
    BlockInfo, BlockState, BufferSlot, BufferUsage, HEADER_SIZE, MAX_ALIGNMENT,
    MIN_BLOCK_PAYLOAD, MIN_BUFFER_OVERHEAD,
};

// Sessions and communicators
pub use crate::comm::{Communicator, Session};

// Collaborator traits
pub use crate::traits::{BytePacker, Completion, Packer, SendEngine, SendHandle};
