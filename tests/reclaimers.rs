//! Engine-level reclamation tests: drains, protection blocking, and the
//! bounded-retention behavior every engine must exhibit.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use smrkit::{
    Atomic, Ebr, EbrHeader, EpochReclaim, He, HeHeader, Hp, Hyaline, HyalineHeader, Ibr,
    IbrHeader, NoReclaim, Retirable, SlotReclaim,
};

macro_rules! test_node {
    ($name:ident, $hdr:ty) => {
        #[repr(C)]
        struct $name {
            hdr: $hdr,
            drops: Arc<AtomicUsize>,
        }

        unsafe impl Retirable<$hdr> for $name {}

        impl $name {
            fn alloc(drops: &Arc<AtomicUsize>) -> *mut Self {
                Box::into_raw(Box::new(Self {
                    hdr: <$hdr>::default(),
                    drops: drops.clone(),
                }))
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                self.drops.fetch_add(1, Ordering::Relaxed);
            }
        }
    };
}

test_node!(EbrNode, EbrHeader);
test_node!(IbrNode, IbrHeader);
test_node!(HeNode, HeHeader);
test_node!(HpNode, ());
test_node!(HyNode, HyalineHeader);

#[test]
fn ebr_registration_exhausts_and_recycles() {
    let ebr: Ebr<EbrNode> = Ebr::with_threads(2);
    assert_eq!(ebr.register_thread(), Some(0));
    assert_eq!(ebr.register_thread(), Some(1));
    assert_eq!(ebr.register_thread(), None);
    ebr.unregister_thread(0);
    assert_eq!(ebr.register_thread(), Some(0));
}

#[test]
fn ebr_drains_when_quiescent() {
    let drops = Arc::new(AtomicUsize::new(0));
    let ebr: Ebr<EbrNode> = Ebr::with_threads(1);
    for _ in 0..10_000 {
        unsafe { ebr.retire(EbrNode::alloc(&drops), 0) };
    }
    // Drain cadence leaves at most one partial batch behind.
    assert!(drops.load(Ordering::Relaxed) >= 10_000 - 128);
    drop(ebr);
    assert_eq!(drops.load(Ordering::Relaxed), 10_000);
}

#[test]
fn ebr_active_reader_blocks_reclamation() {
    let drops = Arc::new(AtomicUsize::new(0));
    let ebr: Ebr<EbrNode> = Ebr::with_threads(2);
    ebr.start_op(1);
    for _ in 0..1_000 {
        unsafe { ebr.retire(EbrNode::alloc(&drops), 0) };
    }
    assert_eq!(drops.load(Ordering::Relaxed), 0);
    ebr.end_op(1);
    for _ in 0..128 {
        unsafe { ebr.retire(EbrNode::alloc(&drops), 0) };
    }
    assert!(drops.load(Ordering::Relaxed) >= 1_000);
}

#[test]
fn ibr_reserved_interval_blocks_reclamation() {
    let drops = Arc::new(AtomicUsize::new(0));
    let ibr: Ibr<IbrNode> = Ibr::with_threads(2);
    let nodes: Vec<_> = (0..200)
        .map(|_| ibr.init_object(IbrNode::alloc(&drops), 0))
        .collect();
    ibr.start_op(1);
    for node in nodes {
        unsafe { ibr.retire(node, 0) };
    }
    // Every interval straddles the reader's reservation.
    assert_eq!(drops.load(Ordering::Relaxed), 0);
    ibr.end_op(1);
    for _ in 0..128 {
        unsafe { ibr.retire(ibr.init_object(IbrNode::alloc(&drops), 0), 0) };
    }
    assert!(drops.load(Ordering::Relaxed) >= 200);
}

#[test]
fn hp_hazard_blocks_reclamation() {
    let protected_drops = Arc::new(AtomicUsize::new(0));
    let other_drops = Arc::new(AtomicUsize::new(0));
    let hp: Hp<HpNode> = Hp::with_slots(2, 2);

    let victim = HpNode::alloc(&protected_drops);
    let shared = Atomic::new(victim);
    let got = hp.protect(0, &shared, 1);
    assert_eq!(got, victim);

    unsafe { hp.retire(victim, 0) };
    for _ in 0..300 {
        unsafe { hp.retire(HpNode::alloc(&other_drops), 0) };
    }
    // Scans ran (300 > threshold) but the hazard held the victim alive.
    assert_eq!(protected_drops.load(Ordering::Relaxed), 0);
    assert!(other_drops.load(Ordering::Relaxed) > 0);

    hp.clear(1);
    for _ in 0..128 {
        unsafe { hp.retire(HpNode::alloc(&other_drops), 0) };
    }
    assert_eq!(protected_drops.load(Ordering::Relaxed), 1);
}

#[test]
fn he_published_era_blocks_reclamation() {
    let protected_drops = Arc::new(AtomicUsize::new(0));
    let other_drops = Arc::new(AtomicUsize::new(0));
    let he: He<HeNode> = He::with_slots(2, 2);

    let victim = he.init_object(HeNode::alloc(&protected_drops), 0);
    let shared = Atomic::new(victim);
    let got = he.protect(0, &shared, 1);
    assert_eq!(got, victim);

    unsafe { he.retire(victim, 0) };
    for _ in 0..300 {
        unsafe { he.retire(he.init_object(HeNode::alloc(&other_drops), 0), 0) };
    }
    assert_eq!(protected_drops.load(Ordering::Relaxed), 0);

    he.clear(1);
    for _ in 0..128 {
        unsafe { he.retire(he.init_object(HeNode::alloc(&other_drops), 0), 0) };
    }
    assert_eq!(protected_drops.load(Ordering::Relaxed), 1);
}

#[test]
fn hyaline_batch_freed_when_no_reader_covers_it() {
    let drops = Arc::new(AtomicUsize::new(0));
    let hyaline: Hyaline<HyNode> = Hyaline::with_threads(1);
    // No reader anywhere: publication frees the batch on the spot.
    for _ in 0..128 {
        unsafe { hyaline.retire(HyNode::alloc(&drops), 0) };
    }
    assert_eq!(drops.load(Ordering::Relaxed), 128);
}

#[test]
fn hyaline_batch_waits_for_last_covering_reader() {
    let drops = Arc::new(AtomicUsize::new(0));
    let hyaline: Hyaline<HyNode> = Hyaline::with_threads(2);
    hyaline.start_op(0);
    hyaline.start_op(1);
    for _ in 0..128 {
        unsafe { hyaline.retire(HyNode::alloc(&drops), 1) };
    }
    // The batch sits in both readers' slots.
    assert_eq!(drops.load(Ordering::Relaxed), 0);
    hyaline.end_op(0);
    assert_eq!(drops.load(Ordering::Relaxed), 0);
    hyaline.end_op(1);
    assert_eq!(drops.load(Ordering::Relaxed), 128);
}

#[test]
fn hyaline_unflushed_batch_freed_on_drop() {
    let drops = Arc::new(AtomicUsize::new(0));
    let hyaline: Hyaline<HyNode> = Hyaline::with_threads(1);
    for _ in 0..10 {
        unsafe { hyaline.retire(HyNode::alloc(&drops), 0) };
    }
    assert_eq!(drops.load(Ordering::Relaxed), 0);
    drop(hyaline);
    assert_eq!(drops.load(Ordering::Relaxed), 10);
}

#[test]
fn nr_never_reclaims_but_counts_space() {
    let drops = Arc::new(AtomicUsize::new(0));
    let nr: NoReclaim = <NoReclaim as EpochReclaim<EbrNode>>::with_threads(1);
    for _ in 0..5 {
        let node = EbrNode::alloc(&drops);
        unsafe { EpochReclaim::<EbrNode>::retire(&nr, node, 0) };
    }
    EpochReclaim::<EbrNode>::take_snapshot(&nr, 0);
    assert_eq!(drops.load(Ordering::Relaxed), 0);
    assert_eq!(EpochReclaim::<EbrNode>::avg_retained(&nr, 0), 5);
}

#[test]
fn randomized_reader_retire_interleaving() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let drops = Arc::new(AtomicUsize::new(0));
    let ebr: Ebr<EbrNode> = Ebr::with_threads(2);
    let mut rng = StdRng::seed_from_u64(5);
    let mut reading = false;
    let mut retired = 0usize;
    for _ in 0..50_000 {
        match rng.gen_range(0..4u32) {
            0 if !reading => {
                ebr.start_op(1);
                reading = true;
            }
            1 if reading => {
                ebr.end_op(1);
                reading = false;
            }
            _ => {
                unsafe { ebr.retire(EbrNode::alloc(&drops), 0) };
                retired += 1;
            }
        }
    }
    if reading {
        ebr.end_op(1);
    }
    drop(ebr);
    // Everything retired is freed exactly once by engine teardown.
    assert_eq!(drops.load(Ordering::Relaxed), retired);
}

#[test]
fn retention_stays_bounded_under_churn() {
    // Property 5: retained count is a function of threads and batch size,
    // not of how many operations have run.
    let drops = Arc::new(AtomicUsize::new(0));
    let ebr: Ebr<EbrNode> = Ebr::with_threads(4);
    let total = 100_000u64;
    for _ in 0..total {
        unsafe { ebr.retire(EbrNode::alloc(&drops), 0) };
    }
    let retained = total as usize - drops.load(Ordering::Relaxed);
    assert!(retained <= 4 * 128, "retained {retained} nodes");
}
