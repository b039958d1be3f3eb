//! Randomized stress test of the buffered-send allocator.
//!
//! Drives a long random mix of sends, completions, and reclaims, checking
//! the structural invariants after every operation. Deterministic seeds
//! keep failures reproducible.

use courier_core::prelude::*;
use courier_core::testing::TestRegion;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

mod common;

use common::{assert_valid_layout, manual_setup};

#[test]
fn random_send_complete_reclaim_keeps_invariants() {
    for seed in [7u64, 1234, 99999] {
        let mut rng = StdRng::seed_from_u64(seed);
        let (engine, _session, comm) = manual_setup();
        let mut region = TestRegion::new(64 * 1024);
        comm.attach_buffer(region.region()).unwrap();

        let payload = vec![0xabu8; 4096];
        for _op in 0..1000 {
            match rng.random_range(0..100) {
                0..60 => {
                    let size = rng.random_range(1..=payload.len());
                    match comm.buffered_send(
                        &payload[..size],
                        size,
                        Datatype::BYTE,
                        Rank::new(1),
                        Tag::new(0),
                    ) {
                        Ok(()) => {}
                        Err(CourierError::NoBufferSpace { .. }) => {}
                        Err(other) => panic!("seed {seed}: unexpected error: {other}"),
                    }
                }
                60..85 => {
                    engine.complete_oldest();
                }
                _ => {
                    comm.reclaim_buffer().unwrap();
                }
            }
            assert_valid_layout(comm.buffer());
        }

        // Quiesce: once everything completes and is reclaimed, the free
        // list must collapse back to one block spanning the arena.
        engine.complete_all();
        comm.reclaim_buffer().unwrap();
        let layout = comm.buffer().layout().unwrap();
        assert_eq!(layout.len(), 1, "seed {seed}: arena did not coalesce");
        assert_eq!(layout[0].total_span, 64 * 1024);

        let returned = comm.detach_buffer().unwrap().expect("was attached");
        assert_eq!(returned.len(), 64 * 1024);
    }
}
