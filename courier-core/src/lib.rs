//! Courier Core Library
//!
//! This crate provides buffered-send buffer management for the courier
//! message-passing runtime: a caller donates a byte region, buffered
//! sends carve packed payloads out of it without blocking, and the space
//! returns to the pool as the underlying non-blocking sends complete.
//!
//! # Key Components
//!
//! - **Bsend**: the in-band first-fit arena with coalescing free list,
//!   active-send tracking, and the two-pass send driver
//! - **Slots**: process-, session-, and communicator-scope buffer slots
//!   with attach/detach/finalize lifecycle
//! - **Traits**: the send-engine and packer abstractions the arena
//!   drives
//! - **Testing**: manual-completion engine and aligned region helpers
//!
//! # Example
//!
//! ```ignore
//! use courier_core::prelude::*;
//!
//! let session = Session::new(engine);
//! let comm = Communicator::new(session, CommId::new(0));
//!
//! // Donate a region, send without blocking, take the region back.
//! comm.attach_buffer(region)?;
//! comm.buffered_send(&payload, payload.len(), Datatype::BYTE, dest, tag)?;
//! let region = comm.detach_buffer()?; // drains in-flight sends first
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bsend;
pub mod comm;
pub mod error;
pub mod prelude;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export key types at crate root for convenience
pub use bsend::{
    attach_process_buffer, detach_process_buffer, finalize_process_buffer, process_buffer,
    BufferSlot, BufferUsage,
};
pub use comm::{Communicator, Session};
pub use error::{CourierError, Result};
pub use traits::{Completion, Packer, SendEngine, SendHandle};
pub use types::{BufferRegion, CommId, Datatype, Rank, Tag};
