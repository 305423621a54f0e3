//! Harris–Michael ordered list over an epoch-framed reclamation engine.
//!
//! Unlike the Harris list, `find` never steps over a marked node: it
//! unlinks and retires it on the spot, restarting when the unlink CAS
//! loses. Simpler invariants, one retired node at a time, no deferred run
//! state.

use core::ptr;
use core::sync::atomic::Ordering;

use crossbeam_utils::CachePadded;

use smrkit::{
    is_marked, untagged, with_tag, without_tag, Atomic, Ebr, EbrHeader, EpochReclaim, Hyaline,
    HyalineHeader, Ibr, IbrHeader, NoReclaim, MARK,
};

use crate::node::{at_or_past, key_matches, ListNode};

/// Harris–Michael list over EBR.
pub type MichaelListEbr<'k, K> = MichaelList<'k, K, EbrHeader, Ebr<ListNode<'k, K, EbrHeader>>>;
/// Harris–Michael list over IBR.
pub type MichaelListIbr<'k, K> = MichaelList<'k, K, IbrHeader, Ibr<ListNode<'k, K, IbrHeader>>>;
/// Harris–Michael list over the Hyaline reclaimer.
pub type MichaelListHyaline<'k, K> =
    MichaelList<'k, K, HyalineHeader, Hyaline<ListNode<'k, K, HyalineHeader>>>;
/// Harris–Michael list that never reclaims.
pub type MichaelListNr<'k, K> = MichaelList<'k, K, (), NoReclaim>;

struct Window<'k, K, H> {
    prev: *const Atomic<ListNode<'k, K, H>>,
    curr: *mut ListNode<'k, K, H>,
    next: *mut ListNode<'k, K, H>,
    found: bool,
}

/// A sorted set as a Harris–Michael linked list.
pub struct MichaelList<'k, K, H, E>
where
    K: Ord,
    H: Default,
    E: EpochReclaim<ListNode<'k, K, H>>,
{
    head: CachePadded<Atomic<ListNode<'k, K, H>>>,
    smr: E,
}

unsafe impl<'k, K, H, E> Send for MichaelList<'k, K, H, E>
where
    K: Ord + Sync,
    H: Default,
    E: EpochReclaim<ListNode<'k, K, H>>,
{
}
unsafe impl<'k, K, H, E> Sync for MichaelList<'k, K, H, E>
where
    K: Ord + Sync,
    H: Default,
    E: EpochReclaim<ListNode<'k, K, H>>,
{
}

impl<'k, K, H, E> MichaelList<'k, K, H, E>
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
            let found = self.find(key, tid).found;
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
                if (*w.curr)
                    .next
                    .compare_exchange(w.next, with_tag(w.next, MARK))
                    .is_err()
                {
                    continue;
                }
                if (*w.prev).compare_exchange(w.curr, w.next).is_ok() {
                    self.smr.end_op(tid);
                    self.smr.retire(w.curr, tid);
                } else {
                    self.smr.end_op(tid);
                }
                return true;
            }
        }
    }

    unsafe fn find(&self, key: &K, tid: usize) -> Window<'k, K, H> {
        'retry: loop {
            let mut prev: *const Atomic<ListNode<'k, K, H>> = &*self.head;
            let mut curr = self.smr.protect(&*prev, tid);
            loop {
                if curr.is_null() {
                    return Window {
                        prev,
                        curr,
                        next: ptr::null_mut(),
                        found: false,
                    };
                }
                let next = self.smr.protect(&(*curr).next, tid);
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
                    curr = untagged(next);
                } else {
                    // Unlink the marked node right here and retire it.
                    let unmarked = without_tag(next, MARK);
                    if (*prev).compare_exchange(curr, unmarked).is_err() {
                        continue 'retry;
                    }
                    self.smr.retire(curr, tid);
                    curr = unmarked;
                }
            }
        }
    }
}

impl<'k, K, H, E> Drop for MichaelList<'k, K, H, E>
where
    K: Ord,
    H: Default,
    E: EpochReclaim<ListNode<'k, K, H>>,
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
