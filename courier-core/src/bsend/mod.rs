//! Buffered-send buffer management.
//!
//! A caller donates a contiguous byte region; buffered sends carve
//! sub-regions out of it, pack the message payload in place, hand it to
//! the non-blocking send engine, and give the space back once the send
//! completes. Detach drains every in-flight transfer before returning the
//! region.
//!
//! The subsystem is an in-band first-fit allocator: every sub-region
//! starts with a block header carrying its span and list links, free
//! blocks form an address-ordered list with maximal coalescing, and
//! active blocks are polled against the progress engine to reclaim space
//! opportunistically.

pub(crate) mod arena;
pub(crate) mod block;
mod send;
mod slot;

pub use arena::{BlockInfo, BlockState, BufferUsage};
pub use block::{
    ATTACH_ALIGNMENT, HEADER_SIZE, MAX_ALIGNMENT, MIN_BLOCK_PAYLOAD, MIN_BUFFER_OVERHEAD,
};
pub(crate) use send::{buffered_send_impl, SendRequest};
pub use slot::{
    attach_process_buffer, detach_process_buffer, finalize_process_buffer, process_buffer,
    BufferSlot,
};
