//! Wait-free helping layer.
//!
//! A searcher that keeps losing its lock-free retry loop publishes its key
//! and an odd request tag; any other thread probing its peers picks the
//! request up, runs the search with its *own* protection slot, and publishes
//! the boolean outcome. Tags advance by two per request, so every request
//! has a unique odd tag for its lifetime.
//!
//! Results do not ride on the tag word. Each thread owns a separate result
//! word holding `(request_tag << 1) | outcome`; producers publish through a
//! monotone CAS that refuses to overwrite the result of a newer request.
//! A requester therefore always decodes the boolean produced for its own
//! tag, never one inferred from a later request's parity.

use core::cell::Cell;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

/// Fast-path retries granted before a search requests help.
pub const WF_THRESHOLD: u64 = 32;

/// Probe one peer for pending requests every this many fast-path ops.
const WF_DELAY: u64 = 16;

/// A pending request picked up from a peer.
pub struct HelpRequest<K> {
    /// Key the stalled searcher is looking for.
    pub key: *mut K,
    /// The request's odd tag.
    pub tag: u64,
    /// Slot of the stalled searcher.
    pub tid: usize,
}

struct HelpRecord<K> {
    key: AtomicPtr<K>,
    tag: AtomicU64,
    /// `(request_tag << 1) | outcome` of the newest completed request.
    result: AtomicU64,
    // The three cells below are only touched by the record's owner.
    next_check: Cell<u64>,
    curr_tid: Cell<usize>,
    local_tag: Cell<u64>,
}

/// Cooperative helping state, one record per thread slot.
pub struct WaitFree<K> {
    wfc: Box<[CachePadded<HelpRecord<K>>]>,
    max_threads: usize,
}

// The Cell fields follow the crate-wide owner-only tid discipline; the
// cross-thread fields are atomics.
unsafe impl<K: Sync> Send for WaitFree<K> {}
unsafe impl<K: Sync> Sync for WaitFree<K> {}

impl<K> WaitFree<K> {
    /// Builds helping state for `max_threads` slots.
    pub fn with_threads(max_threads: usize) -> Self {
        assert!(max_threads > 0, "smrkit: at least one thread slot required");
        let wfc = (0..max_threads)
            .map(|_| {
                CachePadded::new(HelpRecord {
                    key: AtomicPtr::new(ptr::null_mut()),
                    tag: AtomicU64::new(0),
                    result: AtomicU64::new(0),
                    next_check: Cell::new(WF_DELAY),
                    curr_tid: Cell::new(0),
                    // Request tags are always odd.
                    local_tag: Cell::new(1),
                })
            })
            .collect();
        Self { wfc, max_threads }
    }

    /// Publishes a help request for `key` and returns its tag.
    pub fn request_help(&self, key: *const K, tid: usize) -> u64 {
        let rec = &self.wfc[tid];
        rec.key.store(key as *mut K, Ordering::SeqCst);
        let tag = rec.local_tag.get();
        rec.tag.store(tag, Ordering::SeqCst);
        rec.local_tag.set(tag + 2);
        tag
    }

    /// Round-robin probe for a peer with an unserved request; fires every
    /// `WF_DELAY` calls.
    pub fn help_wanted(&self, mytid: usize) -> Option<HelpRequest<K>> {
        let me = &self.wfc[mytid];
        let countdown = me.next_check.get() - 1;
        me.next_check.set(countdown);
        if countdown != 0 {
            return None;
        }
        me.next_check.set(WF_DELAY);

        let target = me.curr_tid.get();
        me.curr_tid.set((target + 1) % self.max_threads);
        if target == mytid {
            return None;
        }

        let rec = &self.wfc[target];
        let tag = rec.tag.load(Ordering::SeqCst);
        if tag & 1 == 0 {
            return None; // no request has ever been published
        }
        if rec.result.load(Ordering::SeqCst) >> 1 >= tag {
            return None; // already served
        }
        let key = rec.key.load(Ordering::SeqCst);
        if rec.tag.load(Ordering::SeqCst) != tag {
            return None; // a different cycle
        }
        Some(HelpRequest {
            key,
            tag,
            tid: target,
        })
    }

    /// Returns the outcome recorded for `tag`, if the request has completed.
    pub fn completed(&self, tag: u64, tid: usize) -> Option<bool> {
        let r = self.wfc[tid].result.load(Ordering::SeqCst);
        if r >> 1 >= tag {
            Some(r & 1 == 1)
        } else {
            None
        }
    }

    /// Records `outcome` for request `tag` of thread `tid`. Loses cleanly
    /// against an already-recorded result for the same or a newer tag.
    pub fn produce_result(&self, tag: u64, outcome: bool, tid: usize) {
        let rec = &self.wfc[tid];
        let new = (tag << 1) | outcome as u64;
        let mut cur = rec.result.load(Ordering::SeqCst);
        loop {
            if cur >> 1 >= tag {
                return;
            }
            match rec
                .result
                .compare_exchange(cur, new, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return,
                Err(observed) => cur = observed,
            }
        }
    }
}
