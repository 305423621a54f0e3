//! Hazard pointers.
//!
//! Threads publish the exact pointers they are about to dereference into a
//! small per-thread slot array. A retirement scan unions every published
//! slot into a hash set and frees exactly the retired nodes that are not in
//! it. Hazard pointers carry no node header; the retired list is an owned
//! vector.

use core::cell::UnsafeCell;
use core::mem;
use core::ptr;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::collections::HashSet;

use crossbeam_utils::CachePadded;
use foldhash::fast::FixedState;

use crate::atomic::{untagged, Atomic};
use crate::reclaim::{Retirable, SlotReclaim, SpaceCounter};

/// Scan the retired vector every this many retirements.
const SCAN_THRESHOLD: u64 = 128;

struct HpThread {
    hp: Box<[AtomicUsize]>,
}

struct HpLocal<T> {
    retired: Vec<*mut T>,
    list_counter: u64,
    space: SpaceCounter,
}

/// Hazard-pointer engine.
pub struct Hp<T: Retirable<()>> {
    slots: Box<[CachePadded<HpThread>]>,
    thr: Box<[CachePadded<UnsafeCell<HpLocal<T>>>]>,
    max_slots: usize,
    max_threads: usize,
}

unsafe impl<T: Retirable<()>> Send for Hp<T> {}
unsafe impl<T: Retirable<()>> Sync for Hp<T> {}

impl<T: Retirable<()>> Hp<T> {
    fn scan(&self, tid: usize) {
        let mut protected: HashSet<usize, FixedState> = HashSet::with_capacity_and_hasher(
            self.max_threads * self.max_slots,
            FixedState::default(),
        );
        for thread in self.slots.iter() {
            for slot in thread.hp.iter() {
                let v = slot.load(Ordering::SeqCst);
                if v != 0 {
                    protected.insert(v);
                }
            }
        }

        // Safety: the retired vector is owner-only.
        let local = unsafe { &mut *self.thr[tid].get() };
        let mut retired = mem::take(&mut local.retired);
        retired.retain(|&obj| {
            if protected.contains(&(obj as usize)) {
                true
            } else {
                local.space.space -= 1;
                // Safety: not protected by any thread, unlinked, ours.
                unsafe { T::dealloc(obj) };
                false
            }
        });
        local.retired = retired;
    }
}

impl<T: Retirable<()>> SlotReclaim<T> for Hp<T> {
    fn with_slots(slots: usize, max_threads: usize) -> Self {
        assert!(max_threads > 0, "smrkit: at least one thread slot required");
        assert!(slots > 0, "smrkit: at least one hazard slot required");
        let slot_arrays = (0..max_threads)
            .map(|_| {
                CachePadded::new(HpThread {
                    hp: (0..slots).map(|_| AtomicUsize::new(0)).collect(),
                })
            })
            .collect();
        let thr = (0..max_threads)
            .map(|_| {
                CachePadded::new(UnsafeCell::new(HpLocal {
                    retired: Vec::with_capacity(max_threads * slots),
                    list_counter: 0,
                    space: SpaceCounter::default(),
                }))
            })
            .collect();
        Self {
            slots: slot_arrays,
            thr,
            max_slots: slots,
            max_threads,
        }
    }

    #[inline]
    fn init_object(&self, obj: *mut T, _tid: usize) -> *mut T {
        obj
    }

    #[inline]
    fn clear(&self, tid: usize) {
        for slot in self.slots[tid].hp.iter() {
            slot.store(0, Ordering::Release);
        }
    }

    /// The re-observation loop: publish, reload, and only return once two
    /// successive loads agree, so no updater can retire the pointer between
    /// our load and our publication.
    fn protect(&self, slot: usize, atom: &Atomic<T>, tid: usize) -> *mut T {
        let cell = &self.slots[tid].hp[slot];
        let mut seen: *mut T = ptr::null_mut();
        loop {
            let ret = atom.load(Ordering::SeqCst);
            if ret == seen {
                return ret;
            }
            cell.store(untagged(ret) as usize, Ordering::SeqCst);
            seen = ret;
        }
    }

    #[inline]
    fn transfer(&self, to: usize, _from: usize, ptr: *mut T, tid: usize) -> *mut T {
        self.slots[tid].hp[to].store(untagged(ptr) as usize, Ordering::Release);
        ptr
    }

    unsafe fn retire(&self, ptr: *mut T, tid: usize) {
        // Safety: the retired vector is owner-only.
        let local = unsafe { &mut *self.thr[tid].get() };
        local.space.space += 1;
        local.retired.push(ptr);
        local.list_counter += 1;
        let scan = local.list_counter % SCAN_THRESHOLD == 0;
        if scan {
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

impl<T: Retirable<()>> Drop for Hp<T> {
    fn drop(&mut self) {
        for cell in self.thr.iter() {
            let local = unsafe { &mut *cell.get() };
            for &obj in local.retired.iter() {
                // Safety: sole owner at drop time.
                unsafe { T::dealloc(obj) };
            }
            local.retired.clear();
        }
    }
}
