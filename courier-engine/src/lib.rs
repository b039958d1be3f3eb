//! Courier Engine - in-process loopback send engine.
//!
//! This crate provides [`LocalEngine`], a progress-driven implementation
//! of the core's `SendEngine` trait that delivers messages inside the
//! process. Sends sit in an in-flight queue and complete after a
//! configurable number of progress polls; the payload is copied out of
//! the sender's buffer at completion time, which makes the engine a
//! faithful exerciser of the buffered-send contract: the source bytes
//! must stay valid for the whole flight, and are never touched after
//! completion.
//!
//! # Example
//!
//! ```ignore
//! use courier_core::prelude::*;
//! use courier_engine::{EngineConfig, LocalEngine};
//!
//! let engine = LocalEngine::with_config(EngineConfig::default().with_latency(2));
//! let session = Session::new(Arc::new(engine.clone()));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use courier_core::error::Result;
use courier_core::traits::{Completion, SendEngine, SendHandle};
use courier_core::types::{CommId, Rank, Tag};
use parking_lot::Mutex;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Configuration for a [`LocalEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Progress polls a send stays in flight before completing.
    ///
    /// Zero means sends complete at initiation time.
    pub latency_polls: u32,
    /// Whether completed messages are kept for [`LocalEngine::take_deliveries`].
    pub capture_deliveries: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            latency_polls: 1,
            capture_deliveries: true,
        }
    }
}

impl EngineConfig {
    /// Set the number of polls a send stays in flight.
    #[must_use]
    pub fn with_latency(mut self, polls: u32) -> Self {
        self.latency_polls = polls;
        self
    }

    /// Enable or disable delivery capture.
    #[must_use]
    pub fn with_capture(mut self, capture: bool) -> Self {
        self.capture_deliveries = capture;
        self
    }
}

/// One message delivered by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Destination rank.
    pub dest: Rank,
    /// Message tag.
    pub tag: Tag,
    /// Communicator the send was issued on.
    pub comm: CommId,
    /// The message bytes, copied out at completion time.
    pub payload: Vec<u8>,
}

/// Source pointer of an in-flight send.
///
/// The buffered-send contract keeps the pointed-at payload valid and
/// unmodified until the send's handle completes, so carrying the raw
/// pointer across threads is sound.
struct RawSrc(*const u8);

unsafe impl Send for RawSrc {}

struct InFlight {
    src: RawSrc,
    len: usize,
    dest: Rank,
    tag: Tag,
    comm: CommId,
    remaining_polls: u32,
    done: Arc<AtomicBool>,
}

struct EngineState {
    in_flight: Vec<InFlight>,
    deliveries: Vec<Delivery>,
}

struct EngineInner {
    state: Mutex<EngineState>,
    config: EngineConfig,
    completed: AtomicUsize,
}

impl EngineInner {
    /// Complete an in-flight record: copy the payload, record the
    /// delivery, then publish completion.
    fn finish(&self, send: InFlight, deliveries: &mut Vec<Delivery>) {
        // Safety: the arena keeps the payload alive and unmodified until
        // `done` is set; the copy happens strictly before that.
        let payload = unsafe { std::slice::from_raw_parts(send.src.0, send.len).to_vec() };
        trace!(dest = %send.dest, tag = %send.tag, len = send.len, "delivering send");
        if self.config.capture_deliveries {
            deliveries.push(Delivery {
                dest: send.dest,
                tag: send.tag,
                comm: send.comm,
                payload,
            });
        }
        self.completed.fetch_add(1, Ordering::AcqRel);
        send.done.store(true, Ordering::Release);
    }

    fn progress(&self) -> Result<()> {
        let mut state = self.state.lock();
        let EngineState {
            in_flight,
            deliveries,
        } = &mut *state;

        let mut index = 0;
        while index < in_flight.len() {
            if in_flight[index].remaining_polls <= 1 {
                // Keep initiation order so deliveries stay oldest-first.
                let send = in_flight.remove(index);
                self.finish(send, deliveries);
            } else {
                in_flight[index].remaining_polls -= 1;
                index += 1;
            }
        }
        Ok(())
    }
}

/// An in-process, progress-driven loopback send engine.
///
/// Cheap to clone; clones share the same in-flight queue and deliveries.
#[derive(Clone)]
pub struct LocalEngine {
    inner: Arc<EngineInner>,
}

impl LocalEngine {
    /// Create an engine with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create an engine with an explicit configuration.
    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                state: Mutex::new(EngineState {
                    in_flight: Vec::new(),
                    deliveries: Vec::new(),
                }),
                config,
                completed: AtomicUsize::new(0),
            }),
        }
    }

    /// Number of sends currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    /// Number of sends completed so far.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.inner.completed.load(Ordering::Acquire)
    }

    /// Take every delivery captured so far, oldest first.
    #[must_use]
    pub fn take_deliveries(&self) -> Vec<Delivery> {
        std::mem::take(&mut self.inner.state.lock().deliveries)
    }
}

impl Default for LocalEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SendEngine for LocalEngine {
    unsafe fn isend(
        &self,
        src: NonNull<u8>,
        len: usize,
        dest: Rank,
        tag: Tag,
        comm: CommId,
    ) -> Result<SendHandle> {
        let done = Arc::new(AtomicBool::new(false));
        let send = InFlight {
            src: RawSrc(src.as_ptr()),
            len,
            dest,
            tag,
            comm,
            remaining_polls: self.inner.config.latency_polls,
            done: done.clone(),
        };

        debug!(dest = %dest, tag = %tag, len, "isend initiated");
        if send.remaining_polls == 0 {
            let mut state = self.inner.state.lock();
            let EngineState { deliveries, .. } = &mut *state;
            self.inner.finish(send, deliveries);
        } else {
            self.inner.state.lock().in_flight.push(send);
        }

        Ok(SendHandle::new(Arc::new(LocalCompletion {
            inner: self.inner.clone(),
            done,
        })))
    }

    fn progress(&self) -> Result<()> {
        self.inner.progress()
    }
}

struct LocalCompletion {
    inner: Arc<EngineInner>,
    done: Arc<AtomicBool>,
}

impl Completion for LocalCompletion {
    fn is_complete(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    fn wait(&self) -> Result<()> {
        while !self.done.load(Ordering::Acquire) {
            self.inner.progress()?;
            std::thread::yield_now();
        }
        Ok(())
    }
}
