//! Arena slots: attach, detach, finalize.
//!
//! A slot is one of the three well-known places an arena can live:
//! process-wide, per-communicator, or per-session. Each slot is a guard
//! over an optional arena; every public operation serializes through it.

use super::arena::{Arena, BlockInfo, BufferUsage};
use crate::error::{CourierError, Result};
use crate::traits::SendEngine;
use crate::types::BufferRegion;
use parking_lot::Mutex;
use std::mem;
use tracing::debug;

enum SlotState {
    /// No buffer attached.
    Empty,
    /// A buffer is attached and operational.
    Attached(Box<Arena>),
    /// A detach is draining outstanding sends off-lock; the slot is
    /// reserved until the drain resolves.
    Draining,
}

/// A nullable holder for one buffered-send arena.
pub struct BufferSlot {
    state: Mutex<SlotState>,
}

impl Default for BufferSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferSlot {
    /// Create an empty slot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Empty),
        }
    }

    /// Attach a caller-owned region to this slot.
    ///
    /// Fails with [`CourierError::BufferAlreadyAttached`] if the slot holds
    /// a buffer, and with [`CourierError::BufferTooSmall`] if the region
    /// cannot hold one minimum block.
    pub fn attach(&self, region: BufferRegion) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            SlotState::Empty => {}
            SlotState::Attached(_) | SlotState::Draining => {
                return Err(CourierError::BufferAlreadyAttached);
            }
        }
        let arena = Arena::attach(region)?;
        *state = SlotState::Attached(Box::new(arena));
        Ok(())
    }

    /// Detach the buffer, first waiting for every outstanding send.
    ///
    /// Returns the caller's original region; `Ok(None)` if the slot was
    /// already empty. The drain happens without holding the slot's guard:
    /// the arena is taken out first, so concurrent sends resolve the slot
    /// as unattached rather than deadlocking against the progress engine.
    /// If a wait fails the arena is put back and the buffer stays
    /// attached.
    pub fn detach(&self) -> Result<Option<BufferRegion>> {
        let mut state = self.state.lock();
        let mut arena = match mem::replace(&mut *state, SlotState::Draining) {
            SlotState::Attached(arena) => arena,
            other => {
                *state = other;
                return Ok(None);
            }
        };
        drop(state);

        match arena.drain() {
            Ok(()) => {
                debug!("drained buffered-send arena for detach");
                let region = arena.into_origin();
                *self.state.lock() = SlotState::Empty;
                Ok(Some(region))
            }
            Err(err) => {
                *self.state.lock() = SlotState::Attached(arena);
                Err(err)
            }
        }
    }

    /// Detach if attached, then leave the slot empty.
    ///
    /// Idempotent; the returned region is dropped, since the caller owns
    /// the memory either way.
    pub fn finalize(&self) -> Result<()> {
        self.detach().map(|_| ())
    }

    /// Whether a buffer is currently attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        matches!(*self.state.lock(), SlotState::Attached(_))
    }

    /// Snapshot of every block in the attached buffer, sorted by address.
    #[must_use]
    pub fn layout(&self) -> Option<Vec<BlockInfo>> {
        match &*self.state.lock() {
            SlotState::Attached(arena) => Some(arena.layout()),
            _ => None,
        }
    }

    /// Aggregate usage of the attached buffer.
    #[must_use]
    pub fn usage(&self) -> Option<BufferUsage> {
        match &*self.state.lock() {
            SlotState::Attached(arena) => Some(arena.usage()),
            _ => None,
        }
    }

    /// Log the attached buffer's lists. Observability only.
    pub fn dump(&self) {
        if let SlotState::Attached(arena) = &*self.state.lock() {
            arena.dump();
        }
    }

    /// Poll progress and reclaim completed sends in the attached buffer.
    ///
    /// A no-op on an empty slot or an idle arena.
    pub fn reclaim(&self, engine: &dyn SendEngine) -> Result<()> {
        match &mut *self.state.lock() {
            SlotState::Attached(arena) => arena.reclaim(engine),
            _ => Ok(()),
        }
    }

    /// Run `body` against the attached arena, holding the slot's guard.
    ///
    /// Returns `None` if the slot holds no buffer, which is how send
    /// resolution walks past unattached slots.
    pub(crate) fn with_arena<R>(&self, body: impl FnOnce(&mut Arena) -> R) -> Option<R> {
        match &mut *self.state.lock() {
            SlotState::Attached(arena) => Some(body(arena)),
            _ => None,
        }
    }
}

static PROCESS_BUFFER: BufferSlot = BufferSlot::new();

/// The process-wide arena slot.
///
/// Sends that find no communicator- or session-scope buffer fall back to
/// this one.
#[must_use]
pub fn process_buffer() -> &'static BufferSlot {
    &PROCESS_BUFFER
}

/// Attach a region to the process-wide slot.
pub fn attach_process_buffer(region: BufferRegion) -> Result<()> {
    PROCESS_BUFFER.attach(region)
}

/// Detach the process-wide buffer, draining outstanding sends.
pub fn detach_process_buffer() -> Result<Option<BufferRegion>> {
    PROCESS_BUFFER.detach()
}

/// Finalize the process-wide slot. Idempotent.
pub fn finalize_process_buffer() -> Result<()> {
    PROCESS_BUFFER.finalize()
}
