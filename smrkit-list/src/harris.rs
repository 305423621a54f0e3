//! Harris ordered list over an epoch-framed reclamation engine.
//!
//! Traversals step over runs of marked nodes and remember where the run
//! started; the run is unlinked with a single CAS at the end of `find` and
//! every node in it is retired. When the prefix invariant is lost (the
//! `prev` link no longer holds what we stepped over), the traversal restarts
//! from the head.

use core::ptr;
use core::sync::atomic::Ordering;

use crossbeam_utils::CachePadded;

use smrkit::{
    is_marked, untagged, with_tag, without_tag, Atomic, Ebr, EbrHeader, EpochReclaim, Hyaline,
    HyalineHeader, Ibr, IbrHeader, NoReclaim, MARK,
};

use crate::node::{at_or_past, key_matches, ListNode};

/// Harris list over EBR.
pub type HarrisListEbr<'k, K> = HarrisList<'k, K, EbrHeader, Ebr<ListNode<'k, K, EbrHeader>>>;
/// Harris list over IBR.
pub type HarrisListIbr<'k, K> = HarrisList<'k, K, IbrHeader, Ibr<ListNode<'k, K, IbrHeader>>>;
/// Harris list over the Hyaline reclaimer.
pub type HarrisListHyaline<'k, K> =
    HarrisList<'k, K, HyalineHeader, Hyaline<ListNode<'k, K, HyalineHeader>>>;
/// Harris list that never reclaims.
pub type HarrisListNr<'k, K> = HarrisList<'k, K, (), NoReclaim>;

struct Window<'k, K, H> {
    prev: *const Atomic<ListNode<'k, K, H>>,
    curr: *mut ListNode<'k, K, H>,
    next: *mut ListNode<'k, K, H>,
    found: bool,
}

/// A sorted set as a Harris linked list.
pub struct HarrisList<'k, K, H, E>
where
    K: Ord,
    H: Default,
    E: EpochReclaim<ListNode<'k, K, H>>,
{
    head: CachePadded<Atomic<ListNode<'k, K, H>>>,
    smr: E,
}

unsafe impl<'k, K, H, E> Send for HarrisList<'k, K, H, E>
where
    K: Ord + Sync,
    H: Default,
    E: EpochReclaim<ListNode<'k, K, H>>,
{
}
unsafe impl<'k, K, H, E> Sync for HarrisList<'k, K, H, E>
where
    K: Ord + Sync,
    H: Default,
    E: EpochReclaim<ListNode<'k, K, H>>,
{
}

impl<'k, K, H, E> HarrisList<'k, K, H, E>
where
    K: Ord,
    H: Default,
    E: EpochReclaim<ListNode<'k, K, H>>,
{
    pub fn new(max_threads: usize) -> Self {
        let smr = E::with_threads(max_threads);
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
            self.smr.start_op(tid);
            let found = 'retry: loop {
                let mut prev_next: *mut ListNode<'k, K, H> = ptr::null_mut();
                let mut prev: *const Atomic<ListNode<'k, K, H>> = &*self.head;
                let mut curr = self.smr.protect(&*prev, tid);
                loop {
                    if curr.is_null() {
                        break;
                    }
                    let next = self.smr.protect(&(*curr).next, tid);
                    if !is_marked(next) {
                        if at_or_past((*curr).key, key) {
                            break;
                        }
                        prev = &(*curr).next;
                        prev_next = next;
                    } else if (*prev).load(Ordering::SeqCst) != prev_next {
                        continue 'retry;
                    }
                    curr = untagged(next);
                }
                break key_matches(if curr.is_null() { None } else { (*curr).key }, key);
            };
            self.smr.end_op(tid);
            found
        }
    }

    pub fn insert(&self, key: &'k K, tid: usize) -> bool {
        unsafe {
            let node = self.smr.init_object(ListNode::alloc(Some(key)), tid);
            self.smr.start_op(tid);
            loop {
                let w = self.find(key, tid);
                if w.found {
                    drop(Box::from_raw(node));
                    self.smr.end_op(tid);
                    return false;
                }
                (*node).next.store(w.curr, Ordering::Relaxed);
                if (*w.prev).compare_exchange(w.curr, node).is_ok() {
                    self.smr.end_op(tid);
                    return true;
                }
            }
        }
    }

    pub fn remove(&self, key: &K, tid: usize) -> bool {
        unsafe {
            self.smr.start_op(tid);
            self.smr.take_snapshot(tid);
            loop {
                let w = self.find(key, tid);
                if !w.found {
                    self.smr.end_op(tid);
                    return false;
                }
                // Logical deletion: marking the successor link is the
                // linearization point.
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
                    self.smr.end_op(tid);
                    self.smr.retire(w.curr, tid);
                } else {
                    // Some later traversal unlinks and retires it.
                    self.smr.end_op(tid);
                }
                return true;
            }
        }
    }

    unsafe fn find(&self, key: &K, tid: usize) -> Window<'k, K, H> {
        'retry: loop {
            let mut prev_next: *mut ListNode<'k, K, H> = ptr::null_mut();
            let mut prev: *const Atomic<ListNode<'k, K, H>> = &*self.head;
            let mut curr = self.smr.protect(&*prev, tid);
            let mut next: *mut ListNode<'k, K, H> = ptr::null_mut();

            loop {
                if curr.is_null() {
                    break;
                }
                next = self.smr.protect(&(*curr).next, tid);
                if !is_marked(next) {
                    if at_or_past((*curr).key, key) {
                        break;
                    }
                    prev = &(*curr).next;
                    prev_next = next;
                } else if (*prev).load(Ordering::SeqCst) != prev_next {
                    continue 'retry;
                }
                curr = untagged(next);
            }

            // A marked run sits between prev and curr: splice it out in one
            // CAS, then retire every node it held.
            if prev_next != curr {
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

impl<'k, K, H, E> Drop for HarrisList<'k, K, H, E>
where
    K: Ord,
    H: Default,
    E: EpochReclaim<ListNode<'k, K, H>>,
{
    fn drop(&mut self) {
        // Free everything still linked; retired nodes belong to the engine.
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
