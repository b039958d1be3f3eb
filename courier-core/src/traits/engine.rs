//! Send engine and completion handle abstractions.

use crate::error::Result;
use crate::types::{CommId, Rank, Tag};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

/// Completion state of one outstanding send.
///
/// Engines return these wrapped in a [`SendHandle`]; the arena stores the
/// handle in the block whose payload is in flight and drops it once the
/// send completes.
pub trait Completion: Send + Sync {
    /// Whether the send has finished and the payload may be reused.
    fn is_complete(&self) -> bool;

    /// Block until the send finishes.
    ///
    /// Implementations drive their own engine's progress as needed; the
    /// arena calls this without holding any lock the engine could want.
    fn wait(&self) -> Result<()>;
}

/// A reference-counted handle to an outstanding send.
///
/// Cloning the handle adds a reference, dropping it releases one; the
/// underlying completion record stays alive as long as any holder keeps a
/// clone. This is how a caller-held handle and the arena's own copy share
/// one send without coordination.
#[derive(Clone)]
pub struct SendHandle(Arc<dyn Completion>);

impl SendHandle {
    /// Wrap an engine's completion record.
    #[must_use]
    pub fn new(completion: Arc<dyn Completion>) -> Self {
        Self(completion)
    }

    /// Whether the send has finished.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.0.is_complete()
    }

    /// Block until the send finishes.
    pub fn wait(&self) -> Result<()> {
        self.0.wait()
    }
}

impl fmt::Debug for SendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendHandle")
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// A non-blocking send engine.
///
/// The arena hands the engine a pointer into its own managed region and
/// keeps the enclosing block on the active list until the returned handle
/// reports completion, at which point the engine must no longer touch the
/// payload.
pub trait SendEngine: Send + Sync {
    /// Initiate a non-blocking send of `len` bytes starting at `src`.
    ///
    /// Must not block. The returned handle is queryable and waitable.
    ///
    /// # Safety
    ///
    /// The caller guarantees that `src..src + len` stays valid and
    /// unmodified until the returned handle reports completion. The engine
    /// must not retain references to the payload past completion.
    unsafe fn isend(
        &self,
        src: NonNull<u8>,
        len: usize,
        dest: Rank,
        tag: Tag,
        comm: CommId,
    ) -> Result<SendHandle>;

    /// Advance outstanding sends without blocking.
    fn progress(&self) -> Result<()>;
}
