//! Epoch-based reclamation.
//!
//! A global `updater_version` counter advances on a retirement cadence.
//! Active threads publish the version they observed; retired nodes are
//! stamped with the version current at retirement and freed once every
//! thread has either moved past that version or gone quiescent.
//!
//! The retired list is an intrusive FIFO, so epoch stamps are monotone in
//! list order and a drain can stop at the first node it cannot free.

use core::cell::UnsafeCell;
use core::ptr;
use core::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

use crate::atomic::Atomic;
use crate::reclaim::{EpochReclaim, Retirable, SpaceCounter};
use crate::{EMPTY_FREQ, EPOCH_FREQ};

/// Published while a thread is outside any operation.
const NOT_READING: u64 = u64::MAX - 1;
/// Published while a slot has no registered thread.
const UNASSIGNED: u64 = u64::MAX - 2;

/// Node header for [`Ebr`].
pub struct EbrHeader {
    smr_next: *mut (),
    retired_epoch: u64,
}

impl Default for EbrHeader {
    fn default() -> Self {
        Self {
            smr_next: ptr::null_mut(),
            retired_epoch: 0,
        }
    }
}

struct EbrLocal<T> {
    head: *mut T,
    tail: *mut T,
    epoch_counter: u64,
    list_counter: u64,
    space: SpaceCounter,
}

struct EbrSlot<T> {
    /// Epoch snapshot while active, `NOT_READING`/`UNASSIGNED` otherwise.
    reader_version: AtomicU64,
    /// Retired list and counters, owned by the slot's thread.
    local: UnsafeCell<EbrLocal<T>>,
}

/// Epoch-based reclamation engine.
pub struct Ebr<T: Retirable<EbrHeader>> {
    updater_version: CachePadded<AtomicU64>,
    rnc: Box<[CachePadded<EbrSlot<T>>]>,
    max_threads: usize,
}

unsafe impl<T: Retirable<EbrHeader>> Send for Ebr<T> {}
unsafe impl<T: Retirable<EbrHeader>> Sync for Ebr<T> {}

impl<T: Retirable<EbrHeader>> Ebr<T> {
    /// CAS-claims a free slot, or `None` when every slot is taken (which
    /// callers treat as fatal).
    pub fn register_thread(&self) -> Option<usize> {
        for (i, slot) in self.rnc.iter().enumerate() {
            if slot.reader_version.load(Ordering::SeqCst) != UNASSIGNED {
                continue;
            }
            if slot
                .reader_version
                .compare_exchange(UNASSIGNED, NOT_READING, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Some(i);
            }
        }
        None
    }

    /// Releases a slot claimed by [`register_thread`](Ebr::register_thread).
    pub fn unregister_thread(&self, tid: usize) {
        self.rnc[tid]
            .reader_version
            .store(UNASSIGNED, Ordering::SeqCst);
    }

    fn try_empty_list(&self, tid: usize) {
        let mut safe_epoch = u64::MAX;
        for slot in self.rnc.iter() {
            let epoch = slot.reader_version.load(Ordering::SeqCst);
            if epoch < safe_epoch {
                safe_epoch = epoch;
            }
        }

        // Safety: the slot's local state is only touched by its owner.
        let local = unsafe { &mut *self.rnc[tid].local.get() };
        let mut cur = local.head;
        while !cur.is_null() {
            // Safety: retired nodes are exclusively owned by this list.
            unsafe {
                let hdr = T::header_ptr(cur);
                if (*hdr).retired_epoch >= safe_epoch {
                    local.head = cur;
                    return;
                }
                let next = (*hdr).smr_next.cast::<T>();
                local.space.space -= 1;
                local.list_counter -= 1;
                T::dealloc(cur);
                cur = next;
            }
        }
        local.head = ptr::null_mut();
        local.tail = ptr::null_mut();
    }
}

impl<T: Retirable<EbrHeader>> EpochReclaim<T> for Ebr<T> {
    fn with_threads(max_threads: usize) -> Self {
        assert!(max_threads > 0, "smrkit: at least one thread slot required");
        let rnc = (0..max_threads)
            .map(|_| {
                CachePadded::new(EbrSlot {
                    reader_version: AtomicU64::new(UNASSIGNED),
                    local: UnsafeCell::new(EbrLocal {
                        head: ptr::null_mut(),
                        tail: ptr::null_mut(),
                        epoch_counter: 0,
                        list_counter: 0,
                        space: SpaceCounter::default(),
                    }),
                })
            })
            .collect();
        Self {
            updater_version: CachePadded::new(AtomicU64::new(0)),
            rnc,
            max_threads,
        }
    }

    #[inline]
    fn init_object(&self, obj: *mut T, _tid: usize) -> *mut T {
        obj
    }

    #[inline]
    fn start_op(&self, tid: usize) {
        let rv = self.updater_version.load(Ordering::SeqCst);
        self.rnc[tid].reader_version.store(rv, Ordering::SeqCst);
    }

    #[inline]
    fn end_op(&self, tid: usize) {
        self.rnc[tid]
            .reader_version
            .store(NOT_READING, Ordering::Release);
    }

    #[inline]
    fn protect(&self, atom: &Atomic<T>, _tid: usize) -> *mut T {
        atom.load(Ordering::SeqCst)
    }

    unsafe fn retire(&self, ptr: *mut T, tid: usize) {
        // Safety: local state is owner-only; the node is ours to stamp.
        let local = unsafe { &mut *self.rnc[tid].local.get() };
        local.space.space += 1;
        unsafe {
            let hdr = T::header_ptr(ptr);
            (*hdr).retired_epoch = self.updater_version.load(Ordering::SeqCst);
            (*hdr).smr_next = ptr::null_mut();
            if local.head.is_null() {
                local.head = ptr;
            } else {
                (*T::header_ptr(local.tail)).smr_next = ptr.cast();
            }
        }
        local.tail = ptr;

        local.epoch_counter += 1;
        if local.epoch_counter % (EPOCH_FREQ * self.max_threads as u64) == 0 {
            self.updater_version.fetch_add(1, Ordering::AcqRel);
        }
        local.list_counter += 1;
        let drain = local.list_counter % EMPTY_FREQ == 0;
        if drain {
            self.try_empty_list(tid);
        }
    }

    #[inline]
    fn take_snapshot(&self, tid: usize) {
        // Safety: owner-only counters.
        let local = unsafe { &mut *self.rnc[tid].local.get() };
        local.space.snapshot();
    }

    #[inline]
    fn avg_retained(&self, tid: usize) -> i64 {
        // Safety: owner-only counters.
        let local = unsafe { &*self.rnc[tid].local.get() };
        local.space.average()
    }
}

impl<T: Retirable<EbrHeader>> Drop for Ebr<T> {
    fn drop(&mut self) {
        for slot in self.rnc.iter() {
            let local = unsafe { &mut *slot.local.get() };
            let mut cur = local.head;
            while !cur.is_null() {
                // Safety: retired nodes are unreachable; nobody else runs.
                unsafe {
                    let next = (*T::header_ptr(cur)).smr_next.cast::<T>();
                    T::dealloc(cur);
                    cur = next;
                }
            }
            local.head = ptr::null_mut();
            local.tail = ptr::null_mut();
        }
    }
}
