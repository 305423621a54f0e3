//! Wait-free Harris list: the epoch-framed Harris list paired with the
//! cooperative helping layer.
//!
//! `search` runs the lock-free fast path with a retry budget. When the
//! budget is spent it publishes a help request and runs the slow search for
//! itself; concurrently, every `insert`/`remove` entry probes one peer and
//! services at most one pending request with its own thread slot, so the
//! helper's reclaimer sees every load. The request's boolean outcome lives
//! in a per-invocation result slot, so a searcher never returns a result
//! produced for some other request.

use core::ptr;
use core::sync::atomic::Ordering;

use crossbeam_utils::CachePadded;

use smrkit::{
    is_marked, untagged, with_tag, without_tag, Atomic, Ebr, EbrHeader, EpochReclaim, Hyaline,
    HyalineHeader, Ibr, IbrHeader, WaitFree, WF_THRESHOLD,
};
use smrkit::MARK;

use crate::node::{at_or_past, key_matches, ListNode};

/// Wait-free Harris list over EBR.
pub type WfHarrisListEbr<'k, K> = WfHarrisList<'k, K, EbrHeader, Ebr<ListNode<'k, K, EbrHeader>>>;
/// Wait-free Harris list over IBR.
pub type WfHarrisListIbr<'k, K> = WfHarrisList<'k, K, IbrHeader, Ibr<ListNode<'k, K, IbrHeader>>>;
/// Wait-free Harris list over the Hyaline reclaimer.
pub type WfHarrisListHyaline<'k, K> =
    WfHarrisList<'k, K, HyalineHeader, Hyaline<ListNode<'k, K, HyalineHeader>>>;

struct Window<'k, K, H> {
    prev: *const Atomic<ListNode<'k, K, H>>,
    curr: *mut ListNode<'k, K, H>,
    next: *mut ListNode<'k, K, H>,
    found: bool,
}

/// A sorted set as a Harris linked list with wait-free searches.
pub struct WfHarrisList<'k, K, H, E>
where
    K: Ord,
    H: Default,
    E: EpochReclaim<ListNode<'k, K, H>>,
{
    head: CachePadded<Atomic<ListNode<'k, K, H>>>,
    smr: E,
    wf: WaitFree<K>,
}

unsafe impl<'k, K, H, E> Send for WfHarrisList<'k, K, H, E>
where
    K: Ord + Sync,
    H: Default,
    E: EpochReclaim<ListNode<'k, K, H>>,
{
}
unsafe impl<'k, K, H, E> Sync for WfHarrisList<'k, K, H, E>
where
    K: Ord + Sync,
    H: Default,
    E: EpochReclaim<ListNode<'k, K, H>>,
{
}

impl<'k, K, H, E> WfHarrisList<'k, K, H, E>
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
            wf: WaitFree::with_threads(max_threads),
        }
    }

    /// Returns the average retained-node count sampled by `remove`.
    pub fn calculate_space(&self, tid: usize) -> i64 {
        self.smr.avg_retained(tid)
    }

    pub fn insert(&self, key: &'k K, tid: usize) -> bool {
        unsafe {
            let node = self.smr.init_object(ListNode::alloc(Some(key)), tid);
            let help = self.wf.help_wanted(tid);
            self.smr.start_op(tid);
            if let Some(req) = help {
                self.slow_search(&*req.key, req.tag, req.tid, tid);
            }
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
            let help = self.wf.help_wanted(tid);
            self.smr.start_op(tid);
            if let Some(req) = help {
                self.slow_search(&*req.key, req.tag, req.tid, tid);
            }
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
                if (*w.prev)
                    .compare_exchange(w.curr, without_tag(w.next, MARK))
                    .is_ok()
                {
                    self.smr.end_op(tid);
                    self.smr.retire(w.curr, tid);
                } else {
                    self.smr.end_op(tid);
                }
                return true;
            }
        }
    }

    /// Wait-free: after `WF_THRESHOLD` failed fast-path attempts the search
    /// publishes a request and completes through the helping protocol.
    pub fn search(&self, key: &'k K, tid: usize) -> bool {
        unsafe {
            let mut budget = WF_THRESHOLD;
            self.smr.start_op(tid);
            let ret = 'retry: loop {
                budget -= 1;
                if budget == 0 {
                    let tag = self.wf.request_help(key as *const K, tid);
                    break self.slow_search(key, tag, tid, tid);
                }

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
                        // Recover through prev instead of restarting: it
                        // still holds an unmarked successor.
                        let fresh = self.smr.protect(&*prev, tid);
                        if is_marked(fresh) {
                            continue 'retry;
                        }
                        prev_next = fresh;
                        curr = fresh;
                        continue;
                    }
                    curr = untagged(next);
                }
                break key_matches(if curr.is_null() { None } else { (*curr).key }, key);
            };
            self.smr.end_op(tid);
            ret
        }
    }

    /// The traversal run for a help request `tag` owned by `req_tid`,
    /// executed with `my_tid`'s protection. Both the requester and any
    /// helper run this; whoever finishes first records the outcome.
    unsafe fn slow_search(&self, key: &K, tag: u64, req_tid: usize, my_tid: usize) -> bool {
        'retry: loop {
            let mut prev_next: *mut ListNode<'k, K, H> = ptr::null_mut();
            let mut prev: *const Atomic<ListNode<'k, K, H>> = &*self.head;
            let mut curr = self.smr.protect(&*prev, my_tid);
            loop {
                if curr.is_null() {
                    break;
                }
                let next = self.smr.protect(&(*curr).next, my_tid);
                if !is_marked(next) {
                    if at_or_past((*curr).key, key) {
                        break;
                    }
                    prev = &(*curr).next;
                    prev_next = next;
                } else if (*prev).load(Ordering::SeqCst) != prev_next {
                    let fresh = self.smr.protect(&*prev, my_tid);
                    if is_marked(fresh) {
                        if let Some(done) = self.wf.completed(tag, req_tid) {
                            return done;
                        }
                        continue 'retry;
                    }
                    prev_next = fresh;
                    curr = fresh;
                    continue;
                }
                curr = untagged(next);
            }
            let ret = key_matches(if curr.is_null() { None } else { (*curr).key }, key);
            self.wf.produce_result(tag, ret, req_tid);
            return ret;
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
                    let fresh = self.smr.protect(&*prev, tid);
                    if is_marked(fresh) {
                        continue 'retry;
                    }
                    prev_next = fresh;
                    curr = fresh;
                    continue;
                }
                curr = untagged(next);
            }

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

impl<'k, K, H, E> Drop for WfHarrisList<'k, K, H, E>
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
