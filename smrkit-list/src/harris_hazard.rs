//! Harris ordered list over a slot-publishing reclamation engine (hazard
//! pointers or hazard eras).
//!
//! The traversal keeps four protections alive: the next pointer, the
//! current node, the first node of the marked run being skipped, and the
//! last safe predecessor. Every dereferenced pointer is published before
//! the reload that validates it; when the predecessor link changes under a
//! marked run, the traversal re-protects through `prev` and either recovers
//! locally or restarts from the head.

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
/// Protection slot for the first node of a marked run.
const S_RUN: usize = 2;
/// Protection slot for the last safe predecessor.
const S_PREV: usize = 3;

const SLOTS: usize = 4;

/// Harris list over hazard pointers.
pub type HazardHarrisListHp<'k, K> = HazardHarrisList<'k, K, (), Hp<ListNode<'k, K, ()>>>;
/// Harris list over hazard eras.
pub type HazardHarrisListHe<'k, K> =
    HazardHarrisList<'k, K, HeHeader, He<ListNode<'k, K, HeHeader>>>;

struct Window<'k, K, H> {
    prev: *const Atomic<ListNode<'k, K, H>>,
    curr: *mut ListNode<'k, K, H>,
    next: *mut ListNode<'k, K, H>,
    found: bool,
}

/// A sorted set as a Harris linked list with per-pointer protection.
pub struct HazardHarrisList<'k, K, H, S>
where
    K: Ord,
    H: Default,
    S: SlotReclaim<ListNode<'k, K, H>>,
{
    head: CachePadded<Atomic<ListNode<'k, K, H>>>,
    smr: S,
}

unsafe impl<'k, K, H, S> Send for HazardHarrisList<'k, K, H, S>
where
    K: Ord + Sync,
    H: Default,
    S: SlotReclaim<ListNode<'k, K, H>>,
{
}
unsafe impl<'k, K, H, S> Sync for HazardHarrisList<'k, K, H, S>
where
    K: Ord + Sync,
    H: Default,
    S: SlotReclaim<ListNode<'k, K, H>>,
{
}

impl<'k, K, H, S> HazardHarrisList<'k, K, H, S>
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
            let found = 'retry: loop {
                let mut prev: *const Atomic<ListNode<'k, K, H>> = &*self.head;
                let mut curr = self.smr.protect(S_CURR, &*prev, tid);
                let mut next = self.smr.protect(S_NEXT, &(*curr).next, tid);

                'walk: loop {
                    loop {
                        if at_or_past((*curr).key, key) {
                            break 'walk;
                        }
                        prev = &(*curr).next;
                        self.smr.transfer(S_PREV, S_CURR, curr, tid);
                        curr = untagged(next);
                        if curr.is_null() {
                            break 'walk;
                        }
                        self.smr.transfer(S_CURR, S_NEXT, curr, tid);
                        next = self.smr.protect(S_NEXT, &(*curr).next, tid);
                        if is_marked(next) {
                            break;
                        }
                    }
                    let mut run_start = curr;
                    self.smr.transfer(S_RUN, S_CURR, curr, tid);
                    loop {
                        curr = untagged(next);
                        if curr.is_null() {
                            break 'walk;
                        }
                        self.smr.transfer(S_CURR, S_NEXT, curr, tid);
                        next = self.smr.protect(S_NEXT, &(*curr).next, tid);
                        if (*prev).load(Ordering::SeqCst) != run_start {
                            curr = self.smr.protect(S_CURR, &*prev, tid);
                            if is_marked(curr) {
                                continue 'retry;
                            }
                            if curr.is_null() {
                                break 'walk;
                            }
                            next = self.smr.protect(S_NEXT, &(*curr).next, tid);
                            if !is_marked(next) {
                                continue 'walk;
                            }
                            run_start = curr;
                            self.smr.transfer(S_RUN, S_CURR, curr, tid);
                            continue;
                        }
                        if !is_marked(next) {
                            continue 'walk;
                        }
                    }
                }
                break key_matches(if curr.is_null() { None } else { (*curr).key }, key);
            };
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
                if (*w.prev)
                    .compare_exchange(w.curr, without_tag(w.next, MARK))
                    .is_ok()
                {
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
            let mut prev_next: *mut ListNode<'k, K, H> = ptr::null_mut();
            let mut prev: *const Atomic<ListNode<'k, K, H>> = &*self.head;
            let mut curr = self.smr.protect(S_CURR, &*prev, tid);
            let mut next = self.smr.protect(S_NEXT, &(*curr).next, tid);
            // Whether the walk ended with a pending marked run to unlink.
            let mut unlink = true;

            'walk: loop {
                loop {
                    if at_or_past((*curr).key, key) {
                        break 'walk;
                    }
                    prev_next = ptr::null_mut();
                    prev = &(*curr).next;
                    self.smr.transfer(S_PREV, S_CURR, curr, tid);
                    curr = untagged(next);
                    if curr.is_null() {
                        unlink = false;
                        break 'walk;
                    }
                    self.smr.transfer(S_CURR, S_NEXT, curr, tid);
                    next = self.smr.protect(S_NEXT, &(*curr).next, tid);
                    if is_marked(next) {
                        break;
                    }
                }
                prev_next = curr;
                self.smr.transfer(S_RUN, S_CURR, curr, tid);
                loop {
                    curr = untagged(next);
                    if curr.is_null() {
                        break 'walk;
                    }
                    self.smr.transfer(S_CURR, S_NEXT, curr, tid);
                    next = self.smr.protect(S_NEXT, &(*curr).next, tid);
                    if (*prev).load(Ordering::SeqCst) != prev_next {
                        curr = self.smr.protect(S_CURR, &*prev, tid);
                        if is_marked(curr) {
                            continue 'retry;
                        }
                        if curr.is_null() {
                            unlink = false;
                            break 'walk;
                        }
                        prev_next = curr;
                        next = self.smr.protect(S_NEXT, &(*curr).next, tid);
                        if !is_marked(next) {
                            continue 'walk;
                        }
                        self.smr.transfer(S_RUN, S_CURR, curr, tid);
                        continue;
                    }
                    if !is_marked(next) {
                        continue 'walk;
                    }
                }
            }

            if unlink && !prev_next.is_null() && prev_next != curr {
                if (*prev).compare_exchange(prev_next, curr).is_err() {
                    continue 'retry;
                }
                let mut run = prev_next;
                while run != curr {
                    let tmp = without_tag((*run).next.load(Ordering::Relaxed), MARK);
                    self.smr.retire(run, tid);
                    run = tmp;
                }
            }

            let found = key_matches(if curr.is_null() { None } else { (*curr).key }, key);
            return Window {
                prev,
                curr,
                next,
                found,
            };
        }
    }
}

impl<'k, K, H, S> Drop for HazardHarrisList<'k, K, H, S>
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
