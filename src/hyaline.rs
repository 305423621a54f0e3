//! Hyaline-style slot-based, batch reference-counted reclamation.
//!
//! Readers enter a reservation slot before an operation and leave after it.
//! Retired nodes accumulate into thread-local batches; a full batch is
//! published by linking one of its nodes into the retirement list of every
//! slot that currently has a reader inside. Each inserted node charges the
//! batch's reference count with one unit, and a creation unit is held by the
//! retiring thread until publication finishes. The last reader to leave a
//! slot detaches that slot's whole list and releases the units it holds; a
//! batch is freed when its count reaches zero, i.e. when the last covering
//! reader is gone.
//!
//! Slots are sized to the next power of two of `max_threads`, so every tid
//! owns a private slot and its reference count is only ever 0 or 1. The
//! `(refs, list)` head still changes atomically as a pair, because
//! publishing threads race against the owner's enter/leave; the pair lives
//! in a single 128-bit atomic.

use core::cell::UnsafeCell;
use core::mem;
use core::ptr;
use core::sync::atomic::{AtomicI64, AtomicIsize, Ordering};

use crossbeam_utils::CachePadded;
use portable_atomic::AtomicU128;

use crate::atomic::Atomic;
use crate::reclaim::{EpochReclaim, Retirable};
use crate::EMPTY_FREQ;

/// Node header for [`Hyaline`].
pub struct HyalineHeader {
    smr_next: *mut (),
    batch_next: *mut (),
    batch: *mut BatchCtl,
}

impl Default for HyalineHeader {
    fn default() -> Self {
        Self {
            smr_next: ptr::null_mut(),
            batch_next: ptr::null_mut(),
            batch: ptr::null_mut(),
        }
    }
}

/// Shared control block of one retired batch.
struct BatchCtl {
    /// One unit per slot insertion plus one creation unit.
    nref: AtomicIsize,
    first: *mut (),
    owner: usize,
    count: usize,
}

/// `(refs, list)` packed into one atomic word: list pointer in the low half,
/// reference count in the high half.
const REFS_UNIT: u128 = 1 << 64;

#[inline]
fn pack(list: u64, refs: u64) -> u128 {
    list as u128 | ((refs as u128) << 64)
}

#[inline]
fn unpack(v: u128) -> (u64, u64) {
    (v as u64, (v >> 64) as u64)
}

struct HySlot {
    head: AtomicU128,
}

struct HyLocal<T> {
    batch: Vec<*mut T>,
    sum: i64,
    count: u64,
}

struct HyThread<T> {
    /// Retained-node count; freed batches are debited by whichever thread
    /// releases the last reference, hence atomic.
    space: AtomicI64,
    local: UnsafeCell<HyLocal<T>>,
}

/// Hyaline-style reclamation engine.
pub struct Hyaline<T: Retirable<HyalineHeader>> {
    slots: Box<[CachePadded<HySlot>]>,
    thr: Box<[CachePadded<HyThread<T>>]>,
    batch_cap: usize,
}

unsafe impl<T: Retirable<HyalineHeader>> Send for Hyaline<T> {}
unsafe impl<T: Retirable<HyalineHeader>> Sync for Hyaline<T> {}

impl<T: Retirable<HyalineHeader>> Hyaline<T> {
    /// Drops one reference; the last one frees the whole batch.
    unsafe fn release_batch_ref(&self, ctl: *mut BatchCtl) {
        unsafe {
            if (*ctl).nref.fetch_sub(1, Ordering::AcqRel) != 1 {
                return;
            }
            let owner = (*ctl).owner;
            let count = (*ctl).count;
            let mut cur = (*ctl).first.cast::<T>();
            while !cur.is_null() {
                let next = (*T::header_ptr(cur)).batch_next.cast::<T>();
                T::dealloc(cur);
                cur = next;
            }
            self.thr[owner].space.fetch_sub(count as i64, Ordering::Relaxed);
            drop(Box::from_raw(ctl));
        }
    }

    /// Releases every node of a detached slot list. Consecutive nodes belong
    /// to distinct batches (one node per batch per slot), so reading `next`
    /// before the release keeps the walk safe even when a release frees its
    /// batch.
    unsafe fn release_list(&self, mut node: *mut T) {
        while !node.is_null() {
            unsafe {
                let hdr = T::header_ptr(node);
                let next = (*hdr).smr_next.cast::<T>();
                let ctl = (*hdr).batch;
                self.release_batch_ref(ctl);
                node = next;
            }
        }
    }

    fn flush(&self, tid: usize) {
        // Safety: the local batch is owner-only.
        let local = unsafe { &mut *self.thr[tid].local.get() };
        let batch = mem::take(&mut local.batch);
        if batch.is_empty() {
            return;
        }
        local.batch = Vec::with_capacity(self.batch_cap);

        let ctl = Box::into_raw(Box::new(BatchCtl {
            nref: AtomicIsize::new(1),
            first: batch[0].cast(),
            owner: tid,
            count: batch.len(),
        }));
        // Safety: batch nodes are unlinked and private until published.
        unsafe {
            for (i, &node) in batch.iter().enumerate() {
                let hdr = T::header_ptr(node);
                (*hdr).batch = ctl;
                (*hdr).batch_next = if i + 1 < batch.len() {
                    batch[i + 1].cast()
                } else {
                    ptr::null_mut()
                };
                (*hdr).smr_next = ptr::null_mut();
            }
        }

        // One distinct batch node per active slot; the batch is sized so it
        // can never run out of nodes before running out of slots.
        let mut idx = 0;
        for slot in self.slots.iter() {
            let node = batch[idx];
            let head = &slot.head;
            let mut cur = head.load(Ordering::SeqCst);
            loop {
                let (list, refs) = unpack(cur);
                if refs == 0 {
                    break;
                }
                // Safety: the node is still private; charge the batch before
                // the CAS can make it visible.
                unsafe {
                    (*T::header_ptr(node)).smr_next = list as usize as *mut ();
                    (*ctl).nref.fetch_add(1, Ordering::AcqRel);
                }
                match head.compare_exchange_weak(
                    cur,
                    pack(node as u64, refs),
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => {
                        idx += 1;
                        break;
                    }
                    Err(observed) => {
                        // Revert the charge; the creation unit keeps the
                        // count above zero.
                        unsafe {
                            (*ctl).nref.fetch_sub(1, Ordering::AcqRel);
                        }
                        cur = observed;
                    }
                }
            }
        }

        // Drop the creation unit. With no active slot anywhere this frees
        // the batch on the spot, which is exactly right: nobody can still
        // hold pointers into it.
        unsafe { self.release_batch_ref(ctl) };
    }
}

impl<T: Retirable<HyalineHeader>> EpochReclaim<T> for Hyaline<T> {
    fn with_threads(max_threads: usize) -> Self {
        assert!(max_threads > 0, "smrkit: at least one thread slot required");
        let num_slots = max_threads.next_power_of_two();
        let batch_cap = usize::max(EMPTY_FREQ as usize, num_slots + 1);
        let slots = (0..num_slots)
            .map(|_| {
                CachePadded::new(HySlot {
                    head: AtomicU128::new(0),
                })
            })
            .collect();
        let thr = (0..max_threads)
            .map(|_| {
                CachePadded::new(HyThread {
                    space: AtomicI64::new(0),
                    local: UnsafeCell::new(HyLocal {
                        batch: Vec::with_capacity(batch_cap),
                        sum: 0,
                        count: 0,
                    }),
                })
            })
            .collect();
        Self {
            slots,
            thr,
            batch_cap,
        }
    }

    #[inline]
    fn init_object(&self, obj: *mut T, _tid: usize) -> *mut T {
        obj
    }

    #[inline]
    fn start_op(&self, tid: usize) {
        self.slots[tid].head.fetch_add(REFS_UNIT, Ordering::SeqCst);
    }

    fn end_op(&self, tid: usize) {
        let head = &self.slots[tid].head;
        let mut cur = head.load(Ordering::SeqCst);
        loop {
            let (list, refs) = unpack(cur);
            let new = if refs == 1 { pack(0, 0) } else { pack(list, refs - 1) };
            match head.compare_exchange_weak(cur, new, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => {
                    if refs == 1 && list != 0 {
                        // Safety: the detached list is exclusively ours.
                        unsafe { self.release_list(list as usize as *mut T) };
                    }
                    return;
                }
                Err(observed) => cur = observed,
            }
        }
    }

    /// Plain load: every pointer observed inside a `start_op`/`end_op`
    /// frame stays valid, because any batch retiring it lands in our slot.
    #[inline]
    fn protect(&self, atom: &Atomic<T>, _tid: usize) -> *mut T {
        atom.load(Ordering::SeqCst)
    }

    unsafe fn retire(&self, ptr: *mut T, tid: usize) {
        self.thr[tid].space.fetch_add(1, Ordering::Relaxed);
        // Safety: the local batch is owner-only.
        let full = {
            let local = unsafe { &mut *self.thr[tid].local.get() };
            local.batch.push(ptr);
            local.batch.len() >= self.batch_cap
        };
        if full {
            self.flush(tid);
        }
    }

    #[inline]
    fn take_snapshot(&self, tid: usize) {
        let space = self.thr[tid].space.load(Ordering::Relaxed);
        // Safety: owner-only counters.
        let local = unsafe { &mut *self.thr[tid].local.get() };
        local.sum += space;
        local.count += 1;
    }

    #[inline]
    fn avg_retained(&self, tid: usize) -> i64 {
        // Safety: owner-only counters.
        let local = unsafe { &*self.thr[tid].local.get() };
        if local.count == 0 {
            0
        } else {
            local.sum / local.count as i64
        }
    }
}

impl<T: Retirable<HyalineHeader>> Drop for Hyaline<T> {
    fn drop(&mut self) {
        // Published batches were freed when their last covering reader
        // left; only unflushed local batches remain.
        for thread in self.thr.iter() {
            let local = unsafe { &mut *thread.local.get() };
            for &node in local.batch.iter() {
                // Safety: never published, sole owner.
                unsafe { T::dealloc(node) };
            }
            local.batch.clear();
        }
    }
}
