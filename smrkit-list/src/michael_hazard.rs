//! Harris–Michael ordered list over a slot-publishing reclamation engine.
//!
//! Three protections: next, current, and the validated predecessor. The
//! per-step unlink keeps the protection dance short compared to the Harris
//! variant, at the cost of a restart whenever the predecessor link moves.

use core::ptr;
use core::sync::atomic::Ordering;

use crossbeam_utils::CachePadded;

use smrkit::{
    is_marked, untagged, with_tag, without_tag, Atomic, He, HeHeader, Hp, SlotReclaim, MARK,
};

use crate::node::{at_or_past, key_matches, ListNode};

/// Protection slot for the successor being examined.
const S_NEXT: usize = 0;
/// Protection slot for the current node.
const S_CURR: usize = 1;
/// Protection slot for the predecessor.
const S_PREV: usize = 2;

const SLOTS: usize = 3;

/// Harris–Michael list over hazard pointers.
pub type HazardMichaelListHp<'k, K> = HazardMichaelList<'k, K, (), Hp<ListNode<'k, K, ()>>>;
/// Harris–Michael list over hazard eras.
pub type HazardMichaelListHe<'k, K> =
    HazardMichaelList<'k, K, HeHeader, He<ListNode<'k, K, HeHeader>>>;

struct Window<'k, K, H> {
    prev: *const Atomic<ListNode<'k, K, H>>,
    curr: *mut ListNode<'k, K, H>,
    next: *mut ListNode<'k, K, H>,
    found: bool,
}

/// A sorted set as a Harris–Michael linked list with per-pointer
/// protection.
pub struct HazardMichaelList<'k, K, H, S>
where
    K: Ord,
    H: Default,
    S: SlotReclaim<ListNode<'k, K, H>>,
{
    head: CachePadded<Atomic<ListNode<'k, K, H>>>,
    smr: S,
}

unsafe impl<'k, K, H, S> Send for HazardMichaelList<'k, K, H, S>
where
    K: Ord + Sync,
    H: Default,
    S: SlotReclaim<ListNode<'k, K, H>>,
{
}
unsafe impl<'k, K, H, S> Sync for HazardMichaelList<'k, K, H, S>
where
    K: Ord + Sync,
    H: Default,
    S: SlotReclaim<ListNode<'k, K, H>>,
{
}

impl<'k, K, H, S> HazardMichaelList<'k, K, H, S>
where
    K: Ord,
    H: Default,
    S: SlotReclaim<ListNode<'k, K, H>>,
{
    pub fn new(max_threads: usize) -> Self {
        let smr = S::with_slots(SLOTS, max_threads);
        let sentinel = smr.init_object(ListNode::alloc(None), 0);
        Self {
            head: CachePadded::new(Atomic::new(sentinel)),
            smr,
        }
    }

    /// Returns the average retained-node count sampled by `remove`.
    pub fn calculate_space(&self, tid: usize) -> i64 {
        self.smr.avg_retained(tid)
    }

    pub fn search(&self, key: &K, tid: usize) -> bool {
        unsafe {
            let found = self.find(key, tid).found;
            self.smr.clear(tid);
            found
        }
    }

    pub fn insert(&self, key: &'k K, tid: usize) -> bool {
        unsafe {
            let node = self.smr.init_object(ListNode::alloc(Some(key)), tid);
            loop {
                let w = self.find(key, tid);
                if w.found {
                    drop(Box::from_raw(node));
                    self.smr.clear(tid);
                    return false;
                }
                (*node).next.store(w.curr, Ordering::Relaxed);
                if (*w.prev).compare_exchange(w.curr, node).is_ok() {
                    self.smr.clear(tid);
                    return true;
                }
            }
        }
    }

    pub fn remove(&self, key: &K, tid: usize) -> bool {
        unsafe {
            self.smr.take_snapshot(tid);
            loop {
                let w = self.find(key, tid);
                if !w.found {
                    self.smr.clear(tid);
                    return false;
                }
                if (*w.curr)
                    .next
                    .compare_exchange(w.next, with_tag(w.next, MARK))
                    .is_err()
                {
                    continue;
                }
                if (*w.prev).compare_exchange(w.curr, w.next).is_ok() {
                    self.smr.clear(tid);
                    self.smr.retire(w.curr, tid);
                } else {
                    self.smr.clear(tid);
                }
                return true;
            }
        }
    }

    unsafe fn find(&self, key: &K, tid: usize) -> Window<'k, K, H> {
        'retry: loop {
            let mut prev: *const Atomic<ListNode<'k, K, H>> = &*self.head;
            let mut curr = self.smr.protect(S_CURR, &*prev, tid);
            loop {
                if curr.is_null() {
                    return Window {
                        prev,
                        curr,
                        next: ptr::null_mut(),
                        found: false,
                    };
                }
                let next = self.smr.protect(S_NEXT, &(*curr).next, tid);
                if (*prev).load(Ordering::SeqCst) != curr {
                    continue 'retry;
                }
                if !is_marked(next) {
                    if at_or_past((*curr).key, key) {
                        return Window {
                            prev,
                            curr,
                            next,
                            found: key_matches((*curr).key, key),
                        };
                    }
                    prev = &(*curr).next;
                    self.smr.transfer(S_PREV, S_CURR, curr, tid);
                    curr = untagged(next);
                    self.smr.transfer(S_CURR, S_NEXT, curr, tid);
                } else {
                    let unmarked = without_tag(next, MARK);
                    if (*prev).compare_exchange(curr, unmarked).is_err() {
                        continue 'retry;
                    }
                    self.smr.retire(curr, tid);
                    curr = unmarked;
                    self.smr.transfer(S_CURR, S_NEXT, curr, tid);
                }
            }
        }
    }
}

impl<'k, K, H, S> Drop for HazardMichaelList<'k, K, H, S>
where
    K: Ord,
    H: Default,
    S: SlotReclaim<ListNode<'k, K, H>>,
{
    fn drop(&mut self) {
        let mut cur = self.head.load(Ordering::Relaxed);
        while !cur.is_null() {
            unsafe {
                let next = untagged((*cur).next.load(Ordering::Relaxed));
                drop(Box::from_raw(cur));
                cur = next;
            }
        }
    }
}
