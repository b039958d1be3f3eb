//! In-band block header for the buffered-send arena.
//!
//! Every sub-region of the attached buffer, free or active, starts with a
//! [`Block`] record; the message payload follows immediately after it.
//! Keeping the header in band makes the payload address free to compute
//! and keeps split/merge O(1) once neighbors are known.

use crate::traits::SendHandle;
use std::mem;
use std::ptr::NonNull;

/// Widest scalar alignment blocks are carved on.
///
/// Every block span is a multiple of this, so a split never produces a
/// misaligned neighbor.
pub const MAX_ALIGNMENT: usize = 16;

/// Alignment the attached region's base is advanced to.
///
/// The base must carry the in-band header's own alignment, which subsumes
/// the pointer and double alignment the rest of the code assumes.
pub const ATTACH_ALIGNMENT: usize = mem::align_of::<Block>();

/// Minimum payload a block is allowed to carry.
///
/// A split remainder that could not hold this many bytes is absorbed into
/// the taken block instead of becoming its own free block.
pub const MIN_BLOCK_PAYLOAD: usize = 8;

/// Bytes from a block's start to its payload.
///
/// This is the offset of the trailing alignment sentinel, not
/// `size_of::<Block>()`: the sentinel's alignment places the payload on a
/// [`MAX_ALIGNMENT`] boundary within the block with no per-allocation
/// fix-up.
pub const HEADER_SIZE: usize = mem::offset_of!(Block, payload);

/// Smallest region attach accepts: one header plus one minimum payload.
pub const MIN_BUFFER_OVERHEAD: usize = HEADER_SIZE + MIN_BLOCK_PAYLOAD;

/// Zero-sized marker pinning the payload to the widest scalar alignment.
#[repr(C, align(16))]
struct PayloadMark([u8; 0]);

/// Header record embedded at the start of every block.
///
/// `prev`/`next` link the block into whichever list it currently belongs
/// to: the address-ordered free list while unallocated, the active list
/// while its payload is in flight.
#[repr(C)]
pub(crate) struct Block {
    /// Bytes from this block's start to the start of the next block.
    total_span: usize,
    /// Usable payload bytes: `total_span - HEADER_SIZE`.
    capacity: usize,
    /// Previous block on the current list.
    prev: Option<NonNull<Block>>,
    /// Next block on the current list.
    next: Option<NonNull<Block>>,
    /// Bytes actually packed; meaningful only while active.
    bytes_used: usize,
    /// Completion handle of the in-flight send; `None` while free.
    handle: Option<SendHandle>,
    /// Payload starts here.
    payload: PayloadMark,
}

impl Block {
    /// Write a fresh free block spanning `total_span` bytes at `at`.
    ///
    /// # Safety
    ///
    /// `at` must be valid for writes of `total_span >= MIN_BUFFER_OVERHEAD`
    /// bytes and properly aligned for `Block`, and the memory must not be
    /// aliased by any live reference.
    pub(crate) unsafe fn init(at: NonNull<u8>, total_span: usize) -> NonNull<Block> {
        debug_assert!(total_span >= MIN_BUFFER_OVERHEAD);
        let block = at.cast::<Block>();
        block.as_ptr().write(Block {
            total_span,
            capacity: total_span - HEADER_SIZE,
            prev: None,
            next: None,
            bytes_used: 0,
            handle: None,
            payload: PayloadMark([]),
        });
        block
    }

    pub(crate) fn total_span(&self) -> usize {
        self.total_span
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    pub(crate) fn prev(&self) -> Option<NonNull<Block>> {
        self.prev
    }

    pub(crate) fn next(&self) -> Option<NonNull<Block>> {
        self.next
    }

    pub(crate) fn set_prev(&mut self, prev: Option<NonNull<Block>>) {
        self.prev = prev;
    }

    pub(crate) fn set_next(&mut self, next: Option<NonNull<Block>>) {
        self.next = next;
    }

    /// Resize the block, keeping `capacity` in sync with the span.
    pub(crate) fn set_span(&mut self, total_span: usize) {
        self.total_span = total_span;
        self.capacity = total_span - HEADER_SIZE;
    }

    pub(crate) fn handle(&self) -> Option<&SendHandle> {
        self.handle.as_ref()
    }

    /// Take the handle out of the block, leaving `None` behind.
    pub(crate) fn take_handle(&mut self) -> Option<SendHandle> {
        self.handle.take()
    }

    /// Record an initiated send: packed byte count and its handle.
    pub(crate) fn record_send(&mut self, bytes_used: usize, handle: SendHandle) {
        self.bytes_used = bytes_used;
        self.handle = Some(handle);
    }

    pub(crate) fn clear_message(&mut self) {
        self.bytes_used = 0;
    }
}

/// Start of a block's payload.
pub(crate) fn payload_ptr(block: NonNull<Block>) -> NonNull<u8> {
    // Safety: the payload offset stays inside the block's span.
    unsafe { block.cast::<u8>().add(HEADER_SIZE) }
}

/// One-past-the-end address of a block.
pub(crate) unsafe fn block_end(block: NonNull<Block>) -> NonNull<u8> {
    let span = block.as_ref().total_span();
    block.cast::<u8>().add(span)
}

/// Round `n` up to the next multiple of [`MAX_ALIGNMENT`].
pub(crate) const fn align_up(n: usize) -> usize {
    (n + MAX_ALIGNMENT - 1) & !(MAX_ALIGNMENT - 1)
}

/// Round `n` down to a multiple of [`MAX_ALIGNMENT`].
pub(crate) const fn align_down(n: usize) -> usize {
    n & !(MAX_ALIGNMENT - 1)
}
