//! The buffered-send arena: free/active lists over the attached region.
//!
//! # Layout
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │ origin base … forward-aligned base                             │
//! ├──────────┬─────────────────┬──────────┬────────────────────────┤
//! │ Block    │ payload         │ Block    │ payload                │
//! │ (active) │ (in flight)     │ (free)   │ (unused)               │
//! ├──────────┴─────────────────┴──────────┴────────────────────────┤
//! │ … every usable byte belongs to exactly one block               │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Free blocks form a doubly linked list sorted by address with no two
//! neighbors adjacent in memory (coalescing is always maximal). Active
//! blocks form an unordered doubly linked list polled for completed
//! sends. All raw pointer arithmetic of the subsystem lives in this
//! module and [`super::block`]; everything above is safe.

use super::block::{self, Block, HEADER_SIZE, MIN_BLOCK_PAYLOAD, MIN_BUFFER_OVERHEAD};
use crate::error::{CourierError, Result};
use crate::traits::{SendEngine, SendHandle};
use crate::types::BufferRegion;
use std::ptr::NonNull;
use tracing::{debug, trace};

/// Snapshot of one block, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Byte offset of the block from the arena's aligned base.
    pub offset: usize,
    /// Header-plus-payload length of the block.
    pub total_span: usize,
    /// Usable payload bytes.
    pub payload_capacity: usize,
    /// Which list the block is on.
    pub state: BlockState,
}

/// Which list a block currently belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// On the free list.
    Free,
    /// On the active list, payload in flight.
    Active,
}

/// Aggregate usage snapshot of an arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferUsage {
    /// Usable bytes of the attached region.
    pub capacity: usize,
    /// Total span of all free blocks.
    pub free_bytes: usize,
    /// Largest payload a single allocation could get right now.
    pub largest_free_payload: usize,
    /// Number of free blocks.
    pub free_blocks: usize,
    /// Number of blocks with sends in flight.
    pub active_blocks: usize,
}

/// One attached buffer with its bookkeeping.
///
/// The arena itself is not synchronized; its owning slot serializes every
/// operation behind one guard.
#[derive(Debug)]
pub(crate) struct Arena {
    /// The exact region the caller handed in, returned verbatim on detach.
    origin: BufferRegion,
    /// Forward-aligned base of the usable region.
    base: NonNull<u8>,
    /// Usable bytes, a multiple of `MAX_ALIGNMENT`.
    capacity: usize,
    free_head: Option<NonNull<Block>>,
    active_head: Option<NonNull<Block>>,
}

// The arena has exclusive custody of the region (see BufferRegion's
// contract) and is only ever used behind its slot's guard.
unsafe impl Send for Arena {}

impl Arena {
    /// Initialize an arena over a caller-owned region.
    ///
    /// The base is advanced to [`block::ATTACH_ALIGNMENT`] and the usable
    /// size trimmed to a multiple of [`MAX_ALIGNMENT`]; the original
    /// `(ptr, len)` pair is kept for detach. The free list starts as one
    /// block spanning the whole usable region.
    pub(crate) fn attach(region: BufferRegion) -> Result<Self> {
        if region.len() < MIN_BUFFER_OVERHEAD {
            return Err(CourierError::BufferTooSmall {
                size: region.len(),
                min: MIN_BUFFER_OVERHEAD,
            });
        }

        let addr = region.as_ptr().as_ptr() as usize;
        let misalign = addr % block::ATTACH_ALIGNMENT;
        let skip = if misalign == 0 {
            0
        } else {
            block::ATTACH_ALIGNMENT - misalign
        };
        let usable = block::align_down(region.len() - skip);
        if usable < MIN_BUFFER_OVERHEAD {
            return Err(CourierError::BufferTooSmall {
                size: usable,
                min: MIN_BUFFER_OVERHEAD,
            });
        }

        // Safety: skip < len, so the advanced pointer stays in the region.
        let base = unsafe { NonNull::new_unchecked(region.as_ptr().as_ptr().add(skip)) };
        // Safety: base..base + usable is valid, exclusively ours per the
        // region contract, and usable >= MIN_BUFFER_OVERHEAD.
        let first = unsafe { Block::init(base, usable) };

        debug!(
            origin_len = region.len(),
            skip, usable, "attached buffered-send arena"
        );

        let arena = Self {
            origin: region,
            base,
            capacity: usable,
            free_head: Some(first),
            active_head: None,
        };
        arena.audit();
        Ok(arena)
    }

    /// Usable capacity in bytes.
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// First-fit search of the free list.
    ///
    /// Returns the first block whose payload can hold `size` bytes; the
    /// block stays on the free list until [`Self::take`].
    pub(crate) fn find(&self, size: usize) -> Option<NonNull<Block>> {
        let mut cur = self.free_head;
        while let Some(p) = cur {
            // Safety: list nodes are valid blocks inside the region.
            let header = unsafe { p.as_ref() };
            if header.capacity() >= size {
                trace!(size, offset = self.offset_of(p), "found free block");
                return Some(p);
            }
            cur = header.next();
        }
        None
    }

    /// Carve `size` bytes out of free block `p` and move it to the active
    /// list.
    ///
    /// Rounds `size` up to [`MAX_ALIGNMENT`]. If the remainder could hold a
    /// header plus [`MIN_BLOCK_PAYLOAD`], the block is split and the tail
    /// becomes a new free block; otherwise the whole block is consumed and
    /// the slack stays inside it.
    pub(crate) fn take(&mut self, p: NonNull<Block>, size: usize) {
        let aligned = block::align_up(size);

        unsafe {
            let capacity = p.as_ref().capacity();
            trace!(
                offset = self.offset_of(p),
                aligned,
                capacity,
                "taking block"
            );

            if aligned + HEADER_SIZE + MIN_BLOCK_PAYLOAD <= capacity {
                // Split: the tail becomes a new free block spliced in
                // right after p.
                let tail_at = p.cast::<u8>().add(HEADER_SIZE + aligned);
                let tail_span = p.as_ref().total_span() - (HEADER_SIZE + aligned);
                let tail = Block::init(tail_at, tail_span);

                (*tail.as_ptr()).set_prev(Some(p));
                let after = p.as_ref().next();
                (*tail.as_ptr()).set_next(after);
                if let Some(mut n) = after {
                    n.as_mut().set_prev(Some(tail));
                }
                (*p.as_ptr()).set_next(Some(tail));
                (*p.as_ptr()).set_span(HEADER_SIZE + aligned);

                trace!(
                    taken = HEADER_SIZE + aligned,
                    remainder = tail_span,
                    "split block"
                );
            }

            // Unlink p from the free list.
            let prev = p.as_ref().prev();
            let next = p.as_ref().next();
            match prev {
                Some(mut q) => q.as_mut().set_next(next),
                None => self.free_head = next,
            }
            if let Some(mut n) = next {
                n.as_mut().set_prev(prev);
            }

            // Push onto the head of the active list.
            (*p.as_ptr()).set_prev(None);
            (*p.as_ptr()).set_next(self.active_head);
            if let Some(mut a) = self.active_head {
                a.as_mut().set_prev(Some(p));
            }
            self.active_head = Some(p);
        }

        self.audit();
    }

    /// Unlink `p` from the active list and return it to the free list,
    /// merging with whichever neighbors are free.
    ///
    /// The merges are unconditional when the blocks are adjacent; the free
    /// list never ends up with two adjacent members.
    pub(crate) fn free_segment(&mut self, p: NonNull<Block>) {
        unsafe {
            trace!(
                offset = self.offset_of(p),
                span = p.as_ref().total_span(),
                "freeing segment"
            );

            // Unlink from the active list.
            let prev = p.as_ref().prev();
            let next = p.as_ref().next();
            match prev {
                Some(mut q) => q.as_mut().set_next(next),
                None => self.active_head = next,
            }
            if let Some(mut n) = next {
                n.as_mut().set_prev(prev);
            }
            (*p.as_ptr()).clear_message();

            // Locate the free neighbors: left is the last free block below
            // p, right the first above it.
            let mut left: Option<NonNull<Block>> = None;
            let mut right = self.free_head;
            while let Some(r) = right {
                if r.as_ptr() > p.as_ptr() {
                    break;
                }
                left = Some(r);
                right = r.as_ref().next();
            }

            // Merge p with the right neighbor, or link to it.
            match right {
                Some(mut r) => {
                    if block::block_end(p).as_ptr() == r.cast::<u8>().as_ptr() {
                        let merged = p.as_ref().total_span() + r.as_ref().total_span();
                        (*p.as_ptr()).set_span(merged);
                        let after = r.as_ref().next();
                        (*p.as_ptr()).set_next(after);
                        if let Some(mut n) = after {
                            n.as_mut().set_prev(Some(p));
                        }
                        trace!(span = merged, "merged with right neighbor");
                    } else {
                        (*p.as_ptr()).set_next(Some(r));
                        r.as_mut().set_prev(Some(p));
                    }
                }
                None => (*p.as_ptr()).set_next(None),
            }

            // Merge the left neighbor with p, or link from it.
            match left {
                Some(mut l) => {
                    if block::block_end(l).as_ptr() == p.cast::<u8>().as_ptr() {
                        let merged = l.as_ref().total_span() + p.as_ref().total_span();
                        (*l.as_ptr()).set_span(merged);
                        let after = p.as_ref().next();
                        (*l.as_ptr()).set_next(after);
                        if let Some(mut n) = after {
                            n.as_mut().set_prev(Some(l));
                        }
                        trace!(span = merged, "merged into left neighbor");
                    } else {
                        l.as_mut().set_next(Some(p));
                        (*p.as_ptr()).set_prev(Some(l));
                    }
                }
                None => {
                    self.free_head = Some(p);
                    (*p.as_ptr()).set_prev(None);
                }
            }
        }

        self.audit();
    }

    /// Poll the engine once and reclaim every active block whose send has
    /// completed.
    ///
    /// Does nothing when no sends are outstanding, so idle callers never
    /// pay for a progress poll.
    pub(crate) fn reclaim(&mut self, engine: &dyn SendEngine) -> Result<()> {
        if self.active_head.is_none() {
            return Ok(());
        }
        engine.progress()?;
        self.sweep_completed();
        Ok(())
    }

    /// Free every active block whose handle reports completion.
    fn sweep_completed(&mut self) {
        let mut cur = self.active_head;
        while let Some(p) = cur {
            // Safety: active list nodes are valid blocks; the successor is
            // read before free_segment relinks p.
            unsafe {
                cur = p.as_ref().next();
                let done = p.as_ref().handle().is_none_or(SendHandle::is_complete);
                if done {
                    let handle = (*p.as_ptr()).take_handle();
                    self.free_segment(p);
                    drop(handle);
                }
            }
        }
    }

    /// Wait synchronously for every outstanding send, head to tail.
    ///
    /// The list links are not maintained while draining; the arena is
    /// about to be torn down and is exclusively owned here. On an error
    /// the drain stops and already-released handles stay released.
    pub(crate) fn drain(&mut self) -> Result<()> {
        let mut cur = self.active_head;
        while let Some(p) = cur {
            // Safety: exclusive ownership, valid list nodes.
            unsafe {
                cur = p.as_ref().next();
                if let Some(handle) = (*p.as_ptr()).take_handle() {
                    handle.wait()?;
                    drop(handle);
                }
            }
        }
        self.active_head = None;
        self.free_head = None;
        Ok(())
    }

    /// Tear down and hand back the caller's original region.
    ///
    /// Callers drain first; there must be no active blocks left.
    pub(crate) fn into_origin(self) -> BufferRegion {
        debug_assert!(self.active_head.is_none());
        let this = std::mem::ManuallyDrop::new(self);
        // Safety: `this`'s destructor is suppressed and it is never used
        // again, so the origin is moved out exactly once. The remaining
        // fields are plain pointers with nothing to drop.
        unsafe { std::ptr::read(&this.origin) }
    }

    /// Payload area of a block, writable.
    ///
    /// Only meaningful for a block about to be packed; the caller must not
    /// hold this across any operation that could move the block off the
    /// free list.
    pub(crate) fn payload_mut(&mut self, p: NonNull<Block>) -> &mut [u8] {
        // Safety: the payload lies inside the region we exclusively own,
        // and &mut self keeps any other arena access out.
        unsafe {
            let len = p.as_ref().capacity();
            std::slice::from_raw_parts_mut(block::payload_ptr(p).as_ptr(), len)
        }
    }

    /// Start of a block's payload.
    pub(crate) fn payload_ptr(&self, p: NonNull<Block>) -> NonNull<u8> {
        block::payload_ptr(p)
    }

    /// Record an initiated send on a block.
    pub(crate) fn record_send(&mut self, p: NonNull<Block>, bytes_used: usize, handle: SendHandle) {
        // Safety: p is a valid block in the region we own.
        unsafe {
            (*p.as_ptr()).record_send(bytes_used, handle);
        }
    }

    /// Snapshot of every block, sorted by address.
    pub(crate) fn layout(&self) -> Vec<BlockInfo> {
        let mut blocks = Vec::new();
        self.collect(self.free_head, BlockState::Free, &mut blocks);
        self.collect(self.active_head, BlockState::Active, &mut blocks);
        blocks.sort_by_key(|b| b.offset);
        blocks
    }

    fn collect(&self, head: Option<NonNull<Block>>, state: BlockState, out: &mut Vec<BlockInfo>) {
        let mut cur = head;
        while let Some(p) = cur {
            // Safety: list nodes are valid blocks.
            let header = unsafe { p.as_ref() };
            out.push(BlockInfo {
                offset: self.offset_of(p),
                total_span: header.total_span(),
                payload_capacity: header.capacity(),
                state,
            });
            if header.next() == Some(p) {
                break;
            }
            cur = header.next();
        }
    }

    /// Aggregate usage counters.
    pub(crate) fn usage(&self) -> BufferUsage {
        let mut usage = BufferUsage {
            capacity: self.capacity,
            free_bytes: 0,
            largest_free_payload: 0,
            free_blocks: 0,
            active_blocks: 0,
        };
        for info in self.layout() {
            match info.state {
                BlockState::Free => {
                    usage.free_blocks += 1;
                    usage.free_bytes += info.total_span;
                    usage.largest_free_payload =
                        usage.largest_free_payload.max(info.payload_capacity);
                }
                BlockState::Active => usage.active_blocks += 1,
            }
        }
        usage
    }

    /// Log both lists, flagging self-referencing nodes as corruption.
    ///
    /// Observability only; never mutates state.
    pub(crate) fn dump(&self) {
        debug!(capacity = self.capacity, "arena dump");
        self.dump_list("free", self.free_head);
        self.dump_list("active", self.active_head);
    }

    fn dump_list(&self, which: &str, head: Option<NonNull<Block>>) {
        let mut cur = head;
        while let Some(p) = cur {
            // Safety: list nodes are valid blocks.
            let header = unsafe { p.as_ref() };
            debug!(
                list = which,
                offset = self.offset_of(p),
                span = header.total_span(),
                used = header.bytes_used(),
                "block"
            );
            if header.next() == Some(p) {
                debug!(list = which, "corrupt list: block points at itself");
                break;
            }
            cur = header.next();
        }
    }

    fn offset_of(&self, p: NonNull<Block>) -> usize {
        p.as_ptr() as usize - self.base.as_ptr() as usize
    }

    /// Check the structural invariants in debug builds.
    ///
    /// Violations here are defects, not runtime conditions, so this is
    /// detection-only and compiles away in release builds.
    fn audit(&self) {
        #[cfg(debug_assertions)]
        {
            let blocks = self.layout();
            let mut expected = 0;
            for info in &blocks {
                debug_assert_eq!(info.offset, expected, "blocks must tile the region");
                debug_assert_eq!(info.total_span % block::MAX_ALIGNMENT, 0);
                debug_assert_eq!(info.payload_capacity, info.total_span - HEADER_SIZE);
                debug_assert!(info.payload_capacity >= MIN_BLOCK_PAYLOAD);
                expected = info.offset + info.total_span;
            }
            debug_assert_eq!(expected, self.capacity, "blocks must cover the region");

            // No two free blocks may be adjacent, and the free list must be
            // address-sorted.
            let mut cur = self.free_head;
            let mut last_end: Option<usize> = None;
            while let Some(p) = cur {
                let header = unsafe { p.as_ref() };
                let offset = self.offset_of(p);
                if let Some(end) = last_end {
                    debug_assert!(offset > end, "free list adjacency or ordering violated");
                }
                last_end = Some(offset + header.total_span());
                cur = header.next();
            }
        }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // Release any handles still parked in active headers so the
        // engine-side records are not leaked. Teardown paths drain first;
        // this only fires when an attached arena is abandoned.
        let mut cur = self.active_head;
        while let Some(p) = cur {
            // Safety: exclusive ownership during drop.
            unsafe {
                cur = p.as_ref().next();
                drop((*p.as_ptr()).take_handle());
            }
        }
    }
}
