//! Sessions and communicators.
//!
//! These are the minimal holder records the buffered-send subsystem
//! needs: each carries its own arena slot, and the session owns the
//! collaborator handles (send engine and packer) every send goes
//! through. Send resolution walks communicator → session → process.

use crate::bsend::{self, BufferSlot, SendRequest};
use crate::error::Result;
use crate::traits::{Packer, SendEngine, SendHandle};
use crate::types::{BufferRegion, CommId, Datatype, Rank, Tag};
use std::sync::Arc;

/// A session: a group of communicators sharing one engine and packer.
pub struct Session {
    engine: Arc<dyn SendEngine>,
    packer: Arc<dyn Packer>,
    bsend: BufferSlot,
}

impl Session {
    /// Create a session over the given engine, with the default packer.
    #[must_use]
    pub fn new(engine: Arc<dyn SendEngine>) -> Arc<Self> {
        Self::with_packer(engine, Arc::new(crate::traits::BytePacker))
    }

    /// Create a session with an explicit packer.
    #[must_use]
    pub fn with_packer(engine: Arc<dyn SendEngine>, packer: Arc<dyn Packer>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            packer,
            bsend: BufferSlot::new(),
        })
    }

    /// The session-scope arena slot.
    #[must_use]
    pub fn buffer(&self) -> &BufferSlot {
        &self.bsend
    }

    /// The session's send engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn SendEngine> {
        &self.engine
    }

    /// Detach the session buffer if attached, then clear the slot.
    pub fn finalize(&self) -> Result<()> {
        self.bsend.finalize()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Mirrors scope teardown: complete outstanding sends, then let go
        // of the slot. Errors cannot be reported from here.
        let _ = self.bsend.finalize();
    }
}

/// A communicator within a session.
pub struct Communicator {
    id: CommId,
    session: Arc<Session>,
    bsend: BufferSlot,
}

impl Communicator {
    /// Create a communicator with the given ID.
    #[must_use]
    pub fn new(session: Arc<Session>, id: CommId) -> Self {
        Self {
            id,
            session,
            bsend: BufferSlot::new(),
        }
    }

    /// This communicator's ID.
    #[must_use]
    pub fn id(&self) -> CommId {
        self.id
    }

    /// The owning session.
    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// The communicator-scope arena slot.
    #[must_use]
    pub fn buffer(&self) -> &BufferSlot {
        &self.bsend
    }

    /// Attach a caller-owned region to this communicator's slot.
    pub fn attach_buffer(&self, region: BufferRegion) -> Result<()> {
        self.bsend.attach(region)
    }

    /// Detach this communicator's buffer, draining outstanding sends.
    pub fn detach_buffer(&self) -> Result<Option<BufferRegion>> {
        self.bsend.detach()
    }

    /// Detach if attached, then clear the slot. Idempotent.
    pub fn finalize(&self) -> Result<()> {
        self.bsend.finalize()
    }

    /// Buffered send: copy the message into attached buffer space and
    /// return as soon as the non-blocking send is initiated.
    ///
    /// The arena is resolved from this communicator's slot, then the
    /// session's, then the process slot; fails with `NoBufferAttached`
    /// when all three are empty and with `NoBufferSpace` when no block
    /// fits even after a progress poll.
    pub fn buffered_send(
        &self,
        buf: &[u8],
        count: usize,
        dtype: Datatype,
        dest: Rank,
        tag: Tag,
    ) -> Result<()> {
        self.send_impl(buf, count, dtype, dest, tag, false)
            .map(|_| ())
    }

    /// Buffered send that also hands back a handle to wait on.
    ///
    /// The buffer space is reclaimed by the arena on completion either
    /// way; the handle is an extra reference for the caller.
    pub fn buffered_isend(
        &self,
        buf: &[u8],
        count: usize,
        dtype: Datatype,
        dest: Rank,
        tag: Tag,
    ) -> Result<SendHandle> {
        self.send_impl(buf, count, dtype, dest, tag, true)
            .map(|handle| handle.expect("driver returns a handle when asked"))
    }

    fn send_impl(
        &self,
        buf: &[u8],
        count: usize,
        dtype: Datatype,
        dest: Rank,
        tag: Tag,
        want_handle: bool,
    ) -> Result<Option<SendHandle>> {
        let req = SendRequest {
            buf,
            count,
            dtype,
            dest,
            tag,
            comm: self.id,
        };
        bsend::buffered_send_impl(
            &[&self.bsend, &self.session.bsend, bsend::process_buffer()],
            self.session.engine.as_ref(),
            self.session.packer.as_ref(),
            &req,
            want_handle,
        )
    }

    /// Poll progress and reclaim completed sends on whichever arena this
    /// communicator's sends resolve to.
    pub fn reclaim_buffer(&self) -> Result<()> {
        let engine = self.session.engine.as_ref();
        for slot in [&self.bsend, &self.session.bsend, bsend::process_buffer()] {
            if slot.is_attached() {
                return slot.reclaim(engine);
            }
        }
        Ok(())
    }
}

impl Drop for Communicator {
    fn drop(&mut self) {
        let _ = self.bsend.finalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualEngine, TestRegion};

    #[test]
    fn comm_send_draws_from_session_slot_when_comm_empty() {
        let engine = Arc::new(ManualEngine::new());
        let session = Session::new(engine.clone());
        let comm = Communicator::new(session.clone(), CommId::new(5));

        let mut region = TestRegion::new(2048);
        session.buffer().attach(region.region()).unwrap();

        comm.buffered_send(&[1u8; 128], 128, Datatype::BYTE, Rank::new(2), Tag::new(0))
            .unwrap();
        assert_eq!(session.buffer().usage().unwrap().active_blocks, 1);
        assert!(comm.buffer().usage().is_none());

        assert_eq!(engine.initiations()[0].comm, CommId::new(5));
        session.finalize().unwrap();
    }

    #[test]
    fn isend_returns_waitable_handle() {
        let engine = Arc::new(ManualEngine::new());
        let session = Session::new(engine.clone());
        let comm = Communicator::new(session.clone(), CommId::new(0));

        let mut region = TestRegion::new(2048);
        comm.attach_buffer(region.region()).unwrap();

        let handle = comm
            .buffered_isend(&[9u8; 64], 64, Datatype::BYTE, Rank::new(1), Tag::new(3))
            .unwrap();
        assert!(!handle.is_complete());
        handle.wait().unwrap();
        assert!(handle.is_complete());

        comm.detach_buffer().unwrap();
    }

    #[test]
    fn reclaim_buffer_frees_completed_space() {
        let engine = Arc::new(ManualEngine::new());
        let session = Session::new(engine.clone());
        let comm = Communicator::new(session.clone(), CommId::new(0));

        let mut region = TestRegion::new(2048);
        comm.attach_buffer(region.region()).unwrap();

        comm.buffered_send(&[0u8; 64], 64, Datatype::BYTE, Rank::new(0), Tag::new(0))
            .unwrap();
        engine.complete_all();
        comm.reclaim_buffer().unwrap();

        let usage = comm.buffer().usage().unwrap();
        assert_eq!(usage.active_blocks, 0);
        assert_eq!(usage.free_bytes, usage.capacity);
        comm.finalize().unwrap();
    }
}
