//! Common test utilities for integration tests.

#![allow(dead_code)]

use courier_core::prelude::*;
use courier_core::testing::ManualEngine;
use courier_engine::{EngineConfig, LocalEngine};
use std::sync::Arc;

/// A session plus communicator over a `LocalEngine` with the given latency.
pub fn local_setup(latency_polls: u32) -> (LocalEngine, Arc<Session>, Communicator) {
    let engine = LocalEngine::with_config(EngineConfig::default().with_latency(latency_polls));
    let session = Session::new(Arc::new(engine.clone()));
    let comm = Communicator::new(session.clone(), CommId::new(0));
    (engine, session, comm)
}

/// A session plus communicator over a manually-completed engine.
pub fn manual_setup() -> (Arc<ManualEngine>, Arc<Session>, Communicator) {
    let engine = Arc::new(ManualEngine::new());
    let session = Session::new(engine.clone());
    let comm = Communicator::new(session.clone(), CommId::new(0));
    (engine, session, comm)
}

/// Assert the universal structural invariants on an attached buffer:
/// blocks tile the usable region exactly, spans are aligned, capacities
/// track spans, no block is undersized, and no two free blocks touch.
pub fn assert_valid_layout(slot: &BufferSlot) {
    let Some(layout) = slot.layout() else {
        return;
    };
    let capacity = slot.usage().expect("attached").capacity;

    let mut expected = 0;
    let mut prev_free_end: Option<usize> = None;
    for block in &layout {
        assert_eq!(block.offset, expected, "blocks must tile the region");
        assert_eq!(block.total_span % MAX_ALIGNMENT, 0, "span alignment");
        assert_eq!(
            block.payload_capacity,
            block.total_span - HEADER_SIZE,
            "capacity tracks span"
        );
        assert!(
            block.payload_capacity >= MIN_BLOCK_PAYLOAD,
            "no undersized block"
        );
        if block.state == BlockState::Free {
            if let Some(end) = prev_free_end {
                assert!(block.offset > end, "adjacent free blocks");
            }
            prev_free_end = Some(block.offset + block.total_span);
        }
        expected += block.total_span;
    }
    assert_eq!(expected, capacity, "blocks must cover the region");
}

/// Count blocks in each state.
pub fn count_blocks(slot: &BufferSlot) -> (usize, usize) {
    let layout = slot.layout().expect("attached");
    let free = layout
        .iter()
        .filter(|b| b.state == BlockState::Free)
        .count();
    let active = layout.len() - free;
    (free, active)
}
