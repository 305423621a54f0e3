//! Interval-based reclamation (the two-global-epoch variant).
//!
//! Every node carries the interval `[birth_epoch, retired_epoch]` it may be
//! referenced in; every active thread reserves the interval `[low, high]` of
//! epochs it may still dereference. A node is reclaimable exactly when its
//! interval intersects no thread's reservation.

use core::cell::UnsafeCell;
use core::ptr;
use core::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

use crate::atomic::Atomic;
use crate::reclaim::{EpochReclaim, Retirable, SpaceCounter};
use crate::{EMPTY_FREQ, EPOCH_FREQ};

/// Node header for [`Ibr`].
pub struct IbrHeader {
    smr_next: *mut (),
    birth_epoch: u64,
    retired_epoch: u64,
}

impl Default for IbrHeader {
    fn default() -> Self {
        Self {
            smr_next: ptr::null_mut(),
            birth_epoch: 0,
            retired_epoch: 0,
        }
    }
}

/// A thread's reserved epoch interval; `u64::MAX` on both ends when idle.
struct Reservation {
    low: AtomicU64,
    high: AtomicU64,
}

struct IbrLocal<T> {
    first: *mut T,
    epoch_counter: u64,
    list_counter: u64,
    space: SpaceCounter,
}

/// Interval-based reclamation engine.
pub struct Ibr<T: Retirable<IbrHeader>> {
    global_epoch: CachePadded<AtomicU64>,
    resv: Box<[CachePadded<Reservation>]>,
    thr: Box<[CachePadded<UnsafeCell<IbrLocal<T>>>]>,
    max_threads: usize,
}

unsafe impl<T: Retirable<IbrHeader>> Send for Ibr<T> {}
unsafe impl<T: Retirable<IbrHeader>> Sync for Ibr<T> {}

impl<T: Retirable<IbrHeader>> Ibr<T> {
    fn can_delete(&self, birth: u64, retired: u64, lows: &[u64], highs: &[u64]) -> bool {
        for tid in 0..self.max_threads {
            if highs[tid] < birth || lows[tid] > retired {
                continue;
            }
            return false;
        }
        true
    }

    fn scan(&self, tid: usize) {
        let mut lows = vec![0u64; self.max_threads];
        let mut highs = vec![0u64; self.max_threads];
        for (i, resv) in self.resv.iter().enumerate() {
            lows[i] = resv.low.load(Ordering::Acquire);
            highs[i] = resv.high.load(Ordering::Acquire);
        }

        // Safety: local retired list is owner-only.
        let local = unsafe { &mut *self.thr[tid].get() };
        unsafe {
            let mut prev_p: *mut *mut () = {
                // The list is untyped in the header, so thread the unlink
                // cursor through a shadow of `first`.
                &mut local.first as *mut *mut T as *mut *mut ()
            };
            let mut obj = local.first;
            while !obj.is_null() {
                let hdr = T::header_ptr(obj);
                let next = (*hdr).smr_next.cast::<T>();
                if self.can_delete((*hdr).birth_epoch, (*hdr).retired_epoch, &lows, &highs) {
                    local.space.space -= 1;
                    *prev_p = next.cast();
                    T::dealloc(obj);
                } else {
                    prev_p = &mut (*hdr).smr_next;
                }
                obj = next;
            }
        }
    }
}

impl<T: Retirable<IbrHeader>> EpochReclaim<T> for Ibr<T> {
    fn with_threads(max_threads: usize) -> Self {
        assert!(max_threads > 0, "smrkit: at least one thread slot required");
        let resv = (0..max_threads)
            .map(|_| {
                CachePadded::new(Reservation {
                    low: AtomicU64::new(u64::MAX),
                    high: AtomicU64::new(u64::MAX),
                })
            })
            .collect();
        let thr = (0..max_threads)
            .map(|_| {
                CachePadded::new(UnsafeCell::new(IbrLocal {
                    first: ptr::null_mut(),
                    epoch_counter: 0,
                    list_counter: 0,
                    space: SpaceCounter::default(),
                }))
            })
            .collect();
        Self {
            global_epoch: CachePadded::new(AtomicU64::new(0)),
            resv,
            thr,
            max_threads,
        }
    }

    fn init_object(&self, obj: *mut T, tid: usize) -> *mut T {
        // Safety: owner-only counter; the node is still private.
        let local = unsafe { &mut *self.thr[tid].get() };
        local.epoch_counter += 1;
        if local.epoch_counter % (EPOCH_FREQ * self.max_threads as u64) == 0 {
            self.global_epoch.fetch_add(1, Ordering::AcqRel);
        }
        unsafe {
            (*T::header_ptr(obj)).birth_epoch = self.global_epoch.load(Ordering::Acquire);
        }
        obj
    }

    #[inline]
    fn start_op(&self, tid: usize) {
        let era = self.global_epoch.load(Ordering::Acquire);
        self.resv[tid].low.store(era, Ordering::SeqCst);
        self.resv[tid].high.store(era, Ordering::SeqCst);
    }

    #[inline]
    fn end_op(&self, tid: usize) {
        self.resv[tid].low.store(u64::MAX, Ordering::Release);
        self.resv[tid].high.store(u64::MAX, Ordering::Release);
    }

    /// The caller's pointer is valid only once the observed epoch is stable
    /// against the published `high`, so loop until a load pair agrees.
    fn protect(&self, atom: &Atomic<T>, tid: usize) -> *mut T {
        let resv = &self.resv[tid];
        let mut prev_era = resv.high.load(Ordering::Relaxed);
        loop {
            let ptr = atom.load(Ordering::SeqCst);
            let era = self.global_epoch.load(Ordering::Acquire);
            if era == prev_era {
                return ptr;
            }
            resv.high.store(era, Ordering::SeqCst);
            prev_era = era;
        }
    }

    unsafe fn retire(&self, ptr: *mut T, tid: usize) {
        // Safety: owner-only local list; the node is ours to stamp.
        let local = unsafe { &mut *self.thr[tid].get() };
        local.space.space += 1;
        unsafe {
            let hdr = T::header_ptr(ptr);
            (*hdr).retired_epoch = self.global_epoch.load(Ordering::Acquire);
            (*hdr).smr_next = local.first.cast();
        }
        local.first = ptr;
        local.list_counter += 1;
        let drain = local.list_counter % EMPTY_FREQ == 0;
        if drain {
            self.scan(tid);
        }
    }

    #[inline]
    fn take_snapshot(&self, tid: usize) {
        // Safety: owner-only counters.
        let local = unsafe { &mut *self.thr[tid].get() };
        local.space.snapshot();
    }

    #[inline]
    fn avg_retained(&self, tid: usize) -> i64 {
        // Safety: owner-only counters.
        let local = unsafe { &*self.thr[tid].get() };
        local.space.average()
    }
}

impl<T: Retirable<IbrHeader>> Drop for Ibr<T> {
    fn drop(&mut self) {
        for cell in self.thr.iter() {
            let local = unsafe { &mut *cell.get() };
            let mut cur = local.first;
            while !cur.is_null() {
                // Safety: sole owner at drop time.
                unsafe {
                    let next = (*T::header_ptr(cur)).smr_next.cast::<T>();
                    T::dealloc(cur);
                    cur = next;
                }
            }
            local.first = ptr::null_mut();
        }
    }
}
