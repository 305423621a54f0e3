//! Leaking baseline: every hook is free, retired nodes are never reclaimed.
//!
//! Useful as the upper bound on throughput and the lower bound on memory
//! discipline in comparison runs. Space accounting still counts retires so
//! the memory column stays meaningful.

use core::cell::UnsafeCell;
use core::sync::atomic::Ordering;

use crossbeam_utils::CachePadded;

use crate::atomic::Atomic;
use crate::reclaim::{EpochReclaim, SpaceCounter};

/// The no-reclamation engine.
pub struct NoReclaim {
    thr: Box<[CachePadded<UnsafeCell<SpaceCounter>>]>,
}

unsafe impl Send for NoReclaim {}
unsafe impl Sync for NoReclaim {}

impl<T> EpochReclaim<T> for NoReclaim {
    fn with_threads(max_threads: usize) -> Self {
        assert!(max_threads > 0, "smrkit: at least one thread slot required");
        Self {
            thr: (0..max_threads)
                .map(|_| CachePadded::new(UnsafeCell::new(SpaceCounter::default())))
                .collect(),
        }
    }

    #[inline]
    fn init_object(&self, obj: *mut T, _tid: usize) -> *mut T {
        obj
    }

    #[inline]
    fn start_op(&self, _tid: usize) {}

    #[inline]
    fn end_op(&self, _tid: usize) {}

    #[inline]
    fn protect(&self, atom: &Atomic<T>, _tid: usize) -> *mut T {
        atom.load(Ordering::SeqCst)
    }

    unsafe fn retire(&self, _ptr: *mut T, tid: usize) {
        // Safety: owner-only counters.
        let counter = unsafe { &mut *self.thr[tid].get() };
        counter.space += 1;
    }

    #[inline]
    fn take_snapshot(&self, tid: usize) {
        // Safety: owner-only counters.
        let counter = unsafe { &mut *self.thr[tid].get() };
        counter.snapshot();
    }

    #[inline]
    fn avg_retained(&self, tid: usize) -> i64 {
        // Safety: owner-only counters.
        let counter = unsafe { &*self.thr[tid].get() };
        counter.average()
    }
}
