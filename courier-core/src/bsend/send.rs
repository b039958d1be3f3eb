//! The buffered-send driver.
//!
//! Glues the collaborators together: sizes the message with the packer,
//! picks the arena by slot precedence, packs in place, initiates the
//! non-blocking send, and parks the block on the active list. The driver
//! never blocks waiting for space: it polls progress once between its
//! two passes and then gives up with `NoBufferSpace`.

use super::arena::Arena;
use super::slot::BufferSlot;
use crate::error::{CourierError, Result};
use crate::traits::{Packer, SendEngine, SendHandle};
use crate::types::{CommId, Datatype, Rank, Tag};
use tracing::debug;

/// One buffered-send request.
pub(crate) struct SendRequest<'a> {
    pub buf: &'a [u8],
    pub count: usize,
    pub dtype: Datatype,
    pub dest: Rank,
    pub tag: Tag,
    pub comm: CommId,
}

/// Resolve the arena by slot precedence and run the send on it.
///
/// `slots` is ordered: communicator, then session, then process. The
/// first slot holding a buffer wins; a send never spills from one arena
/// into another.
pub(crate) fn buffered_send_impl(
    slots: &[&BufferSlot],
    engine: &dyn SendEngine,
    packer: &dyn Packer,
    req: &SendRequest<'_>,
    want_handle: bool,
) -> Result<Option<SendHandle>> {
    let packsize = if req.dtype.is_packed() {
        // Already-packed bytes: the count is the byte length.
        req.count
    } else {
        packer.packed_size(req.count, &req.dtype)
    };

    for slot in slots {
        if let Some(result) =
            slot.with_arena(|arena| send_on_arena(arena, engine, packer, req, packsize, want_handle))
        {
            return result;
        }
    }
    Err(CourierError::NoBufferAttached)
}

/// The two-pass reclaim-then-allocate loop, on one arena under its guard.
fn send_on_arena(
    arena: &mut Arena,
    engine: &dyn SendEngine,
    packer: &dyn Packer,
    req: &SendRequest<'_>,
    packsize: usize,
    want_handle: bool,
) -> Result<Option<SendHandle>> {
    debug!(packsize, dest = %req.dest, tag = %req.tag, "looking for buffer space");

    // Two passes, not a retry loop: try, drive progress once, try again,
    // give up. The driver promises never to block waiting for space.
    for _pass in 0..2 {
        arena.reclaim(engine)?;

        let Some(p) = arena.find(packsize) else {
            continue;
        };

        let bytes_used = if req.dtype.is_packed() {
            if req.buf.len() < req.count {
                return Err(CourierError::PackFailed {
                    cause: format!(
                        "packed source holds {} bytes, message claims {}",
                        req.buf.len(),
                        req.count
                    ),
                });
            }
            let payload = arena.payload_mut(p);
            payload[..req.count].copy_from_slice(&req.buf[..req.count]);
            req.count
        } else {
            packer.pack(req.buf, req.count, &req.dtype, arena.payload_mut(p))?
        };

        // Initiation must not block; the engine reads the payload from the
        // arena until the handle completes.
        let src = arena.payload_ptr(p);
        let handle = unsafe { engine.isend(src, bytes_used, req.dest, req.tag, req.comm)? };

        arena.record_send(p, bytes_used, handle.clone());
        arena.take(p, bytes_used);

        debug!(bytes_used, "buffered send initiated");
        return Ok(want_handle.then_some(handle));
    }

    debug!(packsize, "no buffer space after progress poll");
    arena.dump();
    Err(CourierError::NoBufferSpace {
        requested: packsize,
        capacity: arena.capacity(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingPacker, ManualEngine, TestRegion};
    use crate::traits::BytePacker;

    fn request(buf: &[u8]) -> SendRequest<'_> {
        SendRequest {
            buf,
            count: buf.len(),
            dtype: Datatype::BYTE,
            dest: Rank::new(1),
            tag: Tag::new(7),
            comm: CommId::new(0),
        }
    }

    #[test]
    fn send_fails_without_any_buffer() {
        let engine = ManualEngine::new();
        let slot = BufferSlot::new();
        let payload = [0u8; 16];
        let err =
            buffered_send_impl(&[&slot], &engine, &BytePacker, &request(&payload), false)
                .unwrap_err();
        assert_eq!(err.code(), "E003");
    }

    #[test]
    fn send_places_message_and_returns_handle_on_demand() {
        let mut region = TestRegion::new(1024);
        let slot = BufferSlot::new();
        slot.attach(region.region()).unwrap();
        let engine = ManualEngine::new();

        let payload = [9u8; 100];
        let handle =
            buffered_send_impl(&[&slot], &engine, &BytePacker, &request(&payload), true)
                .unwrap()
                .expect("asked for a handle");
        assert!(!handle.is_complete());

        let sent = engine.initiations();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload, payload);
        assert_eq!(sent[0].dest, Rank::new(1));
        assert_eq!(sent[0].tag, Tag::new(7));

        engine.complete_all();
        assert!(handle.is_complete());
        slot.finalize().unwrap();
    }

    #[test]
    fn second_pass_finds_space_freed_by_progress() {
        let mut region = TestRegion::new(1024);
        let slot = BufferSlot::new();
        slot.attach(region.region()).unwrap();
        let engine = ManualEngine::new();

        // Two sends leave only a sliver free.
        let chunk = vec![1u8; 400];
        buffered_send_impl(&[&slot], &engine, &BytePacker, &request(&chunk), false).unwrap();
        buffered_send_impl(&[&slot], &engine, &BytePacker, &request(&chunk), false).unwrap();

        // Each progress poll completes one outstanding send. A message
        // needing both blocks back fails the first pass (one send
        // reclaimed) and succeeds on the second (both reclaimed and
        // coalesced).
        let polls_before = engine.polls();
        engine.complete_per_poll(1);
        let big = vec![2u8; 800];
        buffered_send_impl(&[&slot], &engine, &BytePacker, &request(&big), false).unwrap();
        assert_eq!(engine.polls() - polls_before, 2);
        slot.finalize().unwrap();
    }

    #[test]
    fn progress_failure_surfaces_from_reclaim() {
        let mut region = TestRegion::new(1024);
        let slot = BufferSlot::new();
        slot.attach(region.region()).unwrap();
        let engine = ManualEngine::new();

        let payload = [1u8; 64];
        buffered_send_impl(&[&slot], &engine, &BytePacker, &request(&payload), false).unwrap();

        engine.fail_next_progress();
        let err = buffered_send_impl(&[&slot], &engine, &BytePacker, &request(&payload), false)
            .unwrap_err();
        assert_eq!(err.code(), "E007");
        slot.finalize().unwrap();
    }

    #[test]
    fn no_space_error_carries_diagnostics_and_mutates_nothing() {
        let mut region = TestRegion::new(512);
        let slot = BufferSlot::new();
        slot.attach(region.region()).unwrap();
        let engine = ManualEngine::new();

        let small = [2u8; 100];
        buffered_send_impl(&[&slot], &engine, &BytePacker, &request(&small), false).unwrap();
        let before = slot.layout().unwrap();

        let big = vec![3u8; 512];
        let err = buffered_send_impl(&[&slot], &engine, &BytePacker, &request(&big), false)
            .unwrap_err();
        match err {
            CourierError::NoBufferSpace {
                requested,
                capacity,
            } => {
                assert_eq!(requested, 512);
                assert_eq!(capacity, 512);
            }
            other => panic!("expected NoBufferSpace, got {other}"),
        }
        assert_eq!(slot.layout().unwrap(), before);
        slot.finalize().unwrap();
    }

    #[test]
    fn resolution_prefers_earlier_slots() {
        let mut region_a = TestRegion::new(1024);
        let mut region_b = TestRegion::new(1024);
        let comm_slot = BufferSlot::new();
        let process_slot = BufferSlot::new();
        comm_slot.attach(region_a.region()).unwrap();
        process_slot.attach(region_b.region()).unwrap();
        let engine = ManualEngine::new();

        let payload = [4u8; 64];
        buffered_send_impl(
            &[&comm_slot, &process_slot],
            &engine,
            &BytePacker,
            &request(&payload),
            false,
        )
        .unwrap();

        assert_eq!(comm_slot.usage().unwrap().active_blocks, 1);
        assert_eq!(process_slot.usage().unwrap().active_blocks, 0);
        comm_slot.finalize().unwrap();
        process_slot.finalize().unwrap();
    }

    #[test]
    fn pack_failure_leaves_lists_untouched() {
        let mut region = TestRegion::new(1024);
        let slot = BufferSlot::new();
        slot.attach(region.region()).unwrap();
        let engine = ManualEngine::new();
        let before = slot.layout().unwrap();

        let payload = [5u8; 32];
        let err = buffered_send_impl(&[&slot], &engine, &FailingPacker, &request(&payload), false)
            .unwrap_err();
        assert_eq!(err.code(), "E005");
        assert_eq!(slot.layout().unwrap(), before);
        assert_eq!(engine.initiations().len(), 0);
        slot.finalize().unwrap();
    }

    #[test]
    fn send_init_failure_leaves_lists_untouched() {
        let mut region = TestRegion::new(1024);
        let slot = BufferSlot::new();
        slot.attach(region.region()).unwrap();
        let engine = ManualEngine::new();
        engine.fail_next_isend();
        let before = slot.layout().unwrap();

        let payload = [6u8; 32];
        let err = buffered_send_impl(&[&slot], &engine, &BytePacker, &request(&payload), false)
            .unwrap_err();
        assert_eq!(err.code(), "E006");
        assert_eq!(slot.layout().unwrap(), before);
        slot.finalize().unwrap();
    }

    #[test]
    fn packed_datatype_bypasses_the_packer() {
        let mut region = TestRegion::new(1024);
        let slot = BufferSlot::new();
        slot.attach(region.region()).unwrap();
        let engine = ManualEngine::new();

        // FailingPacker would error if consulted; Packed must not touch it.
        let payload = [7u8; 48];
        let req = SendRequest {
            dtype: Datatype::Packed,
            ..request(&payload)
        };
        buffered_send_impl(&[&slot], &engine, &FailingPacker, &req, false).unwrap();
        assert_eq!(engine.initiations()[0].payload, payload);
        slot.finalize().unwrap();
    }
}
