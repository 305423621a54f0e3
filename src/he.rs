//! Hazard eras.
//!
//! A hybrid of hazard pointers and interval reclamation: threads publish
//! *era values* rather than pointers, and nodes carry the era interval
//! `[new_era, del_era]` they lived through. A retired node is free once no
//! published era falls inside its interval. Publishing an era protects every
//! pointer loaded while the era clock stands still, which is what makes the
//! slot-transfer operation a cheap era copy.

use core::cell::UnsafeCell;
use core::ptr;
use core::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

use crate::atomic::Atomic;
use crate::reclaim::{Retirable, SlotReclaim, SpaceCounter};
use crate::EPOCH_FREQ;

/// Scan the retired list every this many retirements.
const SCAN_THRESHOLD: u64 = 128;

/// Published era meaning "no protection".
const NONE: u64 = 0;

/// Node header for [`He`].
pub struct HeHeader {
    smr_next: *mut (),
    new_era: u64,
    del_era: u64,
}

impl Default for HeHeader {
    fn default() -> Self {
        Self {
            smr_next: ptr::null_mut(),
            new_era: 0,
            del_era: 0,
        }
    }
}

struct HeThread {
    eras: Box<[AtomicU64]>,
}

struct HeLocal<T> {
    first: *mut T,
    epoch_counter: u64,
    list_counter: u64,
    space: SpaceCounter,
}

/// Hazard-eras engine.
pub struct He<T: Retirable<HeHeader>> {
    era_clock: CachePadded<AtomicU64>,
    slots: Box<[CachePadded<HeThread>]>,
    thr: Box<[CachePadded<UnsafeCell<HeLocal<T>>>]>,
    max_slots: usize,
    max_threads: usize,
}

unsafe impl<T: Retirable<HeHeader>> Send for He<T> {}
unsafe impl<T: Retirable<HeHeader>> Sync for He<T> {}

impl<T: Retirable<HeHeader>> He<T> {
    fn scan(&self, tid: usize) {
        // Collect the published eras, skipping NONE and collapsing
        // consecutive duplicates.
        let mut eras = Vec::with_capacity(self.max_threads * self.max_slots);
        let mut prev = NONE;
        for thread in self.slots.iter() {
            for slot in thread.eras.iter() {
                let val = slot.load(Ordering::SeqCst);
                if val != NONE && val != prev {
                    eras.push(val);
                    prev = val;
                }
            }
        }

        // Safety: the retired list is owner-only.
        let local = unsafe { &mut *self.thr[tid].get() };
        unsafe {
            let mut prev_p: *mut *mut () = &mut local.first as *mut *mut T as *mut *mut ();
            let mut obj = local.first;
            while !obj.is_null() {
                let hdr = T::header_ptr(obj);
                let next = (*hdr).smr_next.cast::<T>();
                let covered = eras
                    .iter()
                    .any(|&era| era >= (*hdr).new_era && era <= (*hdr).del_era);
                if covered {
                    prev_p = &mut (*hdr).smr_next;
                } else {
                    local.space.space -= 1;
                    *prev_p = next.cast();
                    T::dealloc(obj);
                }
                obj = next;
            }
        }
    }
}

impl<T: Retirable<HeHeader>> SlotReclaim<T> for He<T> {
    fn with_slots(slots: usize, max_threads: usize) -> Self {
        assert!(max_threads > 0, "smrkit: at least one thread slot required");
        assert!(slots > 0, "smrkit: at least one era slot required");
        let slot_arrays = (0..max_threads)
            .map(|_| {
                CachePadded::new(HeThread {
                    eras: (0..slots).map(|_| AtomicU64::new(NONE)).collect(),
                })
            })
            .collect();
        let thr = (0..max_threads)
            .map(|_| {
                CachePadded::new(UnsafeCell::new(HeLocal {
                    first: ptr::null_mut(),
                    epoch_counter: 0,
                    list_counter: 0,
                    space: SpaceCounter::default(),
                }))
            })
            .collect();
        Self {
            // Era 0 is reserved as NONE.
            era_clock: CachePadded::new(AtomicU64::new(1)),
            slots: slot_arrays,
            thr,
            max_slots: slots,
            max_threads,
        }
    }

    fn init_object(&self, obj: *mut T, _tid: usize) -> *mut T {
        unsafe {
            (*T::header_ptr(obj)).new_era = self.era_clock.load(Ordering::SeqCst);
        }
        obj
    }

    #[inline]
    fn clear(&self, tid: usize) {
        for slot in self.slots[tid].eras.iter() {
            slot.store(NONE, Ordering::Release);
        }
    }

    /// Publish the era, reload, and return only once the era observed after
    /// the pointer load matches the one published.
    fn protect(&self, slot: usize, atom: &Atomic<T>, tid: usize) -> *mut T {
        let cell = &self.slots[tid].eras[slot];
        let mut prev_era = cell.load(Ordering::Relaxed);
        loop {
            let ptr = atom.load(Ordering::SeqCst);
            let era = self.era_clock.load(Ordering::Acquire);
            if era == prev_era {
                return ptr;
            }
            cell.store(era, Ordering::SeqCst);
            prev_era = era;
        }
    }

    #[inline]
    fn transfer(&self, to: usize, from: usize, ptr: *mut T, tid: usize) -> *mut T {
        let eras = &self.slots[tid].eras;
        let era = eras[from].load(Ordering::Relaxed);
        if eras[to].load(Ordering::Relaxed) != era {
            eras[to].store(era, Ordering::Release);
        }
        ptr
    }

    unsafe fn retire(&self, ptr: *mut T, tid: usize) {
        // Safety: owner-only local list; the node is ours to stamp.
        let local = unsafe { &mut *self.thr[tid].get() };
        local.space.space += 1;
        unsafe {
            let hdr = T::header_ptr(ptr);
            (*hdr).del_era = self.era_clock.load(Ordering::SeqCst);
            (*hdr).smr_next = local.first.cast();
        }
        local.first = ptr;

        local.epoch_counter += 1;
        if local.epoch_counter % (EPOCH_FREQ * self.max_threads as u64) == 0 {
            self.era_clock.fetch_add(1, Ordering::AcqRel);
        }
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

impl<T: Retirable<HeHeader>> Drop for He<T> {
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
