//! Core abstractions for the send engine and the packing facility.
//!
//! The buffered-send arena does not move bytes over a wire or serialize
//! typed messages itself; it delegates both to collaborators behind these
//! traits. Engines and packers are expected to be internally thread-safe;
//! the arena calls them while holding its own guard.

mod engine;
mod pack;

pub use engine::{Completion, SendEngine, SendHandle};
pub use pack::{BytePacker, Packer};
