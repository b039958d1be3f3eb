//! Test doubles for the buffered-send collaborators.
//!
//! `ManualEngine` stands in for the send engine with completion fully
//! under test control; `FailingPacker` drives the pack error path;
//! `TestRegion` owns aligned backing storage for attachable regions.
//! These live in the core crate so downstream crates' tests can reuse
//! them.

use crate::error::{CourierError, Result};
use crate::traits::{Completion, Packer, SendEngine, SendHandle};
use crate::types::{BufferRegion, CommId, Datatype, Rank, Tag};
use parking_lot::Mutex;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// One recorded isend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Initiation {
    /// Destination rank passed to isend.
    pub dest: Rank,
    /// Tag passed to isend.
    pub tag: Tag,
    /// Communicator passed to isend.
    pub comm: CommId,
    /// Payload bytes, copied at initiation time.
    pub payload: Vec<u8>,
}

struct SendRecord {
    info: Initiation,
    done: Arc<AtomicBool>,
}

struct EngineInner {
    sends: Mutex<Vec<SendRecord>>,
    polls: AtomicUsize,
    completions_per_poll: AtomicUsize,
    complete_on_wait: AtomicBool,
    fail_next_isend: AtomicBool,
    fail_next_progress: AtomicBool,
    fail_waits: AtomicBool,
}

/// A send engine whose completions happen exactly when the test says so.
///
/// By default nothing completes on its own except `wait`, which marks the
/// waited send complete and returns, so drains always terminate. Knobs:
///
/// - [`complete_all`](Self::complete_all) / [`complete_oldest`](Self::complete_oldest)
///   complete sends directly.
/// - [`complete_per_poll`](Self::complete_per_poll) makes each progress
///   poll complete up to `n` of the oldest outstanding sends.
/// - [`complete_on_wait`](Self::complete_on_wait) turned off makes `wait`
///   block until another thread completes the send.
/// - `fail_*` inject one-shot or sticky collaborator errors.
pub struct ManualEngine {
    inner: Arc<EngineInner>,
}

impl ManualEngine {
    /// Create an engine with manual completion and completing waits.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EngineInner {
                sends: Mutex::new(Vec::new()),
                polls: AtomicUsize::new(0),
                completions_per_poll: AtomicUsize::new(0),
                complete_on_wait: AtomicBool::new(true),
                fail_next_isend: AtomicBool::new(false),
                fail_next_progress: AtomicBool::new(false),
                fail_waits: AtomicBool::new(false),
            }),
        }
    }

    /// Every initiation so far, in order.
    #[must_use]
    pub fn initiations(&self) -> Vec<Initiation> {
        self.inner
            .sends
            .lock()
            .iter()
            .map(|s| s.info.clone())
            .collect()
    }

    /// Number of sends not yet complete.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner
            .sends
            .lock()
            .iter()
            .filter(|s| !s.done.load(Ordering::Acquire))
            .count()
    }

    /// Number of progress polls observed.
    #[must_use]
    pub fn polls(&self) -> usize {
        self.inner.polls.load(Ordering::Acquire)
    }

    /// Complete the oldest outstanding send, if any.
    pub fn complete_oldest(&self) -> bool {
        let sends = self.inner.sends.lock();
        for send in sends.iter() {
            if !send.done.load(Ordering::Acquire) {
                send.done.store(true, Ordering::Release);
                return true;
            }
        }
        false
    }

    /// Complete the `index`-th initiation (in initiation order).
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn complete_at(&self, index: usize) {
        let sends = self.inner.sends.lock();
        sends[index].done.store(true, Ordering::Release);
    }

    /// Complete the newest outstanding send, if any.
    pub fn complete_newest(&self) -> bool {
        let sends = self.inner.sends.lock();
        for send in sends.iter().rev() {
            if !send.done.load(Ordering::Acquire) {
                send.done.store(true, Ordering::Release);
                return true;
            }
        }
        false
    }

    /// Complete every outstanding send.
    pub fn complete_all(&self) {
        for send in self.inner.sends.lock().iter() {
            send.done.store(true, Ordering::Release);
        }
    }

    /// Make each progress poll complete up to `n` of the oldest sends.
    pub fn complete_per_poll(&self, n: usize) {
        self.inner.completions_per_poll.store(n, Ordering::Release);
    }

    /// Control whether `wait` completes the send itself (the default) or
    /// blocks until someone else does.
    pub fn complete_on_wait(&self, enabled: bool) {
        self.inner.complete_on_wait.store(enabled, Ordering::Release);
    }

    /// Make the next isend fail with `SendInitFailed`.
    pub fn fail_next_isend(&self) {
        self.inner.fail_next_isend.store(true, Ordering::Release);
    }

    /// Make the next progress poll fail with `ProgressFailed`.
    pub fn fail_next_progress(&self) {
        self.inner.fail_next_progress.store(true, Ordering::Release);
    }

    /// Make every wait fail with `ProgressFailed` until
    /// [`allow_waits`](Self::allow_waits).
    pub fn fail_waits(&self) {
        self.inner.fail_waits.store(true, Ordering::Release);
    }

    /// Clear [`fail_waits`](Self::fail_waits).
    pub fn allow_waits(&self) {
        self.inner.fail_waits.store(false, Ordering::Release);
    }
}

impl Default for ManualEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SendEngine for ManualEngine {
    unsafe fn isend(
        &self,
        src: NonNull<u8>,
        len: usize,
        dest: Rank,
        tag: Tag,
        comm: CommId,
    ) -> Result<SendHandle> {
        if self.inner.fail_next_isend.swap(false, Ordering::AcqRel) {
            return Err(CourierError::SendInitFailed {
                cause: "injected initiation failure".into(),
            });
        }

        // Safety: the caller guarantees src..src+len is valid; the payload
        // is snapshotted eagerly so nothing is read during flight.
        let payload = std::slice::from_raw_parts(src.as_ptr(), len).to_vec();
        let done = Arc::new(AtomicBool::new(false));
        self.inner.sends.lock().push(SendRecord {
            info: Initiation {
                dest,
                tag,
                comm,
                payload,
            },
            done: done.clone(),
        });
        Ok(SendHandle::new(Arc::new(ManualCompletion {
            inner: self.inner.clone(),
            done,
        })))
    }

    fn progress(&self) -> Result<()> {
        self.inner.polls.fetch_add(1, Ordering::AcqRel);
        if self.inner.fail_next_progress.swap(false, Ordering::AcqRel) {
            return Err(CourierError::ProgressFailed {
                cause: "injected progress failure".into(),
            });
        }

        let budget = self.inner.completions_per_poll.load(Ordering::Acquire);
        if budget > 0 {
            let sends = self.inner.sends.lock();
            let mut left = budget;
            for send in sends.iter() {
                if left == 0 {
                    break;
                }
                if !send.done.load(Ordering::Acquire) {
                    send.done.store(true, Ordering::Release);
                    left -= 1;
                }
            }
        }
        Ok(())
    }
}

struct ManualCompletion {
    inner: Arc<EngineInner>,
    done: Arc<AtomicBool>,
}

impl Completion for ManualCompletion {
    fn is_complete(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    fn wait(&self) -> Result<()> {
        if self.inner.fail_waits.load(Ordering::Acquire) {
            return Err(CourierError::ProgressFailed {
                cause: "injected wait failure".into(),
            });
        }
        if self.done.load(Ordering::Acquire) {
            return Ok(());
        }
        if self.inner.complete_on_wait.load(Ordering::Acquire) {
            self.done.store(true, Ordering::Release);
            return Ok(());
        }
        while !self.done.load(Ordering::Acquire) {
            std::thread::yield_now();
        }
        Ok(())
    }
}

/// A packer that sizes honestly but refuses to pack.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingPacker;

impl Packer for FailingPacker {
    fn packed_size(&self, count: usize, dtype: &Datatype) -> usize {
        match dtype {
            Datatype::Packed => count,
            Datatype::Contiguous { elem_size } => count * elem_size,
        }
    }

    fn pack(&self, _src: &[u8], _count: usize, _dtype: &Datatype, _dst: &mut [u8]) -> Result<usize> {
        Err(CourierError::PackFailed {
            cause: "injected pack failure".into(),
        })
    }
}

#[repr(C, align(16))]
#[derive(Clone, Copy)]
struct AlignedChunk([u8; 16]);

/// Owned, max-alignment backing storage for attachable regions.
///
/// The regions handed out point into this storage; keep the `TestRegion`
/// alive for as long as any of them (or an arena attached over them) is
/// in use.
pub struct TestRegion {
    storage: Vec<AlignedChunk>,
    len: usize,
}

impl TestRegion {
    /// Allocate `len` bytes of 16-aligned storage.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            storage: vec![AlignedChunk([0; 16]); len.div_ceil(16)],
            len,
        }
    }

    /// A region over the whole storage.
    #[must_use]
    pub fn region(&mut self) -> BufferRegion {
        self.region_at(0, self.len)
    }

    /// A region over `len` bytes starting `skew` bytes into the storage,
    /// for exercising unaligned attaches.
    ///
    /// # Panics
    ///
    /// Panics if `skew + len` overruns the storage.
    #[must_use]
    pub fn region_at(&mut self, skew: usize, len: usize) -> BufferRegion {
        assert!(skew + len <= self.storage.len() * 16);
        // Safety: the range lies inside our owned storage; the caller
        // keeps self alive while the region is in use (see type docs).
        unsafe {
            let ptr = NonNull::new_unchecked(self.storage.as_mut_ptr().cast::<u8>().add(skew));
            BufferRegion::from_raw_parts(ptr, len)
        }
    }
}
