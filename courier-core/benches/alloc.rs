//! Benchmarks for the buffered-send allocate/release hot path.

use courier_core::prelude::*;
use courier_core::testing::{ManualEngine, TestRegion};
use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;

fn send_reclaim_cycle(c: &mut Criterion) {
    let engine = Arc::new(ManualEngine::new());
    let session = Session::new(engine.clone());
    let comm = Communicator::new(session, CommId::new(0));

    let mut region = TestRegion::new(1 << 20);
    comm.attach_buffer(region.region()).unwrap();

    let payload = vec![0u8; 256];
    c.bench_function("send_complete_reclaim_256B", |b| {
        b.iter(|| {
            comm.buffered_send(
                &payload,
                payload.len(),
                Datatype::BYTE,
                Rank::new(1),
                Tag::new(0),
            )
            .unwrap();
            engine.complete_all();
            comm.reclaim_buffer().unwrap();
        });
    });

    comm.finalize().unwrap();
}

fn fragmented_first_fit(c: &mut Criterion) {
    let engine = Arc::new(ManualEngine::new());
    let session = Session::new(engine.clone());
    let comm = Communicator::new(session, CommId::new(0));

    let mut region = TestRegion::new(1 << 20);
    comm.attach_buffer(region.region()).unwrap();

    // Pin a comb of small sends with completed large sends between them;
    // reclaiming the larges leaves a long free list of holes to walk.
    let small = vec![0u8; 64];
    let large = vec![0u8; 4096];
    for _ in 0..64 {
        comm.buffered_send(&small, small.len(), Datatype::BYTE, Rank::new(1), Tag::new(0))
            .unwrap();
        comm.buffered_send(&large, large.len(), Datatype::BYTE, Rank::new(1), Tag::new(0))
            .unwrap();
        engine.complete_newest();
    }
    comm.reclaim_buffer().unwrap();

    // Too big for any hole: every allocation walks the whole free list
    // before landing in the tail.
    let oversized = vec![0u8; 8192];
    c.bench_function("send_complete_reclaim_fragmented", |b| {
        b.iter(|| {
            comm.buffered_send(
                &oversized,
                oversized.len(),
                Datatype::BYTE,
                Rank::new(1),
                Tag::new(0),
            )
            .unwrap();
            // Complete only the send just issued; the comb stays pinned.
            engine.complete_newest();
            comm.reclaim_buffer().unwrap();
        });
    });

    engine.complete_all();
    comm.finalize().unwrap();
}

criterion_group!(benches, send_reclaim_cycle, fragmented_first_fit);
criterion_main!(benches);
