//! Natarajan–Mittal tree over an epoch-framed reclamation engine.

use core::cell::UnsafeCell;
use core::ptr;
use core::sync::atomic::Ordering;

use crossbeam_utils::CachePadded;

use smrkit::{
    tag_of, untagged, with_tag, without_tag, Ebr, EbrHeader, EpochReclaim, Hyaline,
    HyalineHeader, Ibr, IbrHeader, NoReclaim, FLG, TAG,
};

use crate::node::{key_equal, key_less, SeekRecord, TreeNode};

/// NM tree over EBR.
pub type NatarajanTreeEbr<'k, K> =
    NatarajanTree<'k, K, EbrHeader, Ebr<TreeNode<'k, K, EbrHeader>>>;
/// NM tree over IBR.
pub type NatarajanTreeIbr<'k, K> =
    NatarajanTree<'k, K, IbrHeader, Ibr<TreeNode<'k, K, IbrHeader>>>;
/// NM tree over the Hyaline reclaimer.
pub type NatarajanTreeHyaline<'k, K> =
    NatarajanTree<'k, K, HyalineHeader, Hyaline<TreeNode<'k, K, HyalineHeader>>>;
/// NM tree that never reclaims.
pub type NatarajanTreeNr<'k, K> = NatarajanTree<'k, K, (), NoReclaim>;

/// A sorted set as a lock-free external BST.
///
/// `R` and `S` bootstrap a universe where every real key routes left of the
/// sentinels; the three empty sentinel leaves make the tree non-degenerate
/// from the start.
pub struct NatarajanTree<'k, K, H, E>
where
    K: Ord,
    H: Default,
    E: EpochReclaim<TreeNode<'k, K, H>>,
{
    r: *mut TreeNode<'k, K, H>,
    s: *mut TreeNode<'k, K, H>,
    records: Box<[CachePadded<UnsafeCell<SeekRecord<'k, K, H>>>]>,
    smr: E,
}

unsafe impl<'k, K, H, E> Send for NatarajanTree<'k, K, H, E>
where
    K: Ord + Sync,
    H: Default,
    E: EpochReclaim<TreeNode<'k, K, H>>,
{
}
unsafe impl<'k, K, H, E> Sync for NatarajanTree<'k, K, H, E>
where
    K: Ord + Sync,
    H: Default,
    E: EpochReclaim<TreeNode<'k, K, H>>,
{
}

impl<'k, K, H, E> NatarajanTree<'k, K, H, E>
where
    K: Ord,
    H: Default,
    E: EpochReclaim<TreeNode<'k, K, H>>,
{
    pub fn new(max_threads: usize) -> Self {
        let smr = E::with_threads(max_threads);
        let r = smr.init_object(TreeNode::alloc(None, ptr::null_mut(), ptr::null_mut()), 0);
        let s = smr.init_object(TreeNode::alloc(None, ptr::null_mut(), ptr::null_mut()), 0);
        unsafe {
            (*r).right.store(
                smr.init_object(TreeNode::alloc(None, ptr::null_mut(), ptr::null_mut()), 0),
                Ordering::Relaxed,
            );
            (*r).left.store(s, Ordering::Relaxed);
            (*s).right.store(
                smr.init_object(TreeNode::alloc(None, ptr::null_mut(), ptr::null_mut()), 0),
                Ordering::Relaxed,
            );
            (*s).left.store(
                smr.init_object(TreeNode::alloc(None, ptr::null_mut(), ptr::null_mut()), 0),
                Ordering::Relaxed,
            );
        }
        let records = (0..max_threads)
            .map(|_| CachePadded::new(UnsafeCell::new(SeekRecord::default())))
            .collect();
        Self { r, s, records, smr }
    }

    /// Returns the average retained-node count sampled by `remove`.
    pub fn calculate_space(&self, tid: usize) -> i64 {
        self.smr.avg_retained(tid)
    }

    pub fn search(&self, key: &K, tid: usize) -> bool {
        unsafe {
            self.smr.start_op(tid);
            self.seek(key, tid);
            let leaf = (*self.records[tid].get()).leaf;
            let found = key_equal(key, (*leaf).key);
            self.smr.end_op(tid);
            found
        }
    }

    pub fn insert(&self, key: &'k K, tid: usize) -> bool {
        unsafe {
            let new_leaf =
                self.smr
                    .init_object(TreeNode::alloc(Some(key), ptr::null_mut(), ptr::null_mut()), tid);
            self.smr.start_op(tid);
            let ret = loop {
                self.seek(key, tid);
                let rec = &*self.records[tid].get();
                let leaf = rec.leaf;
                let parent = rec.parent;
                if key_equal(key, (*leaf).key) {
                    drop(Box::from_raw(new_leaf));
                    break false;
                }

                let child_addr = if key_less(key, (*parent).key) {
                    &(*parent).left
                } else {
                    &(*parent).right
                };

                let (new_left, new_right) = if key_less(key, (*leaf).key) {
                    (new_leaf, leaf)
                } else {
                    (leaf, new_leaf)
                };
                // The internal routing key is the larger of the two leaves;
                // a sentinel leaf keeps its "above everything" None.
                let new_key = match (*leaf).key {
                    Some(lk) if *lk < *key => Some(key),
                    other => other,
                };
                let new_internal =
                    self.smr
                        .init_object(TreeNode::alloc(new_key, new_left, new_right), tid);

                if child_addr.compare_exchange(leaf, new_internal).is_ok() {
                    break true;
                }
                drop(Box::from_raw(new_internal));
                let child = child_addr.load(Ordering::SeqCst);
                if untagged(child) == leaf && tag_of(child, TAG | FLG) != 0 {
                    self.cleanup(key, tid);
                }
            };
            self.smr.end_op(tid);
            ret
        }
    }

    pub fn remove(&self, key: &K, tid: usize) -> bool {
        unsafe {
            let mut leaf: *mut TreeNode<'k, K, H> = ptr::null_mut();
            self.smr.start_op(tid);
            self.smr.take_snapshot(tid);
            loop {
                self.seek(key, tid);
                let rec = &*self.records[tid].get();
                let parent = rec.parent;
                let child_addr = if key_less(key, (*parent).key) {
                    &(*parent).left
                } else {
                    &(*parent).right
                };

                if leaf.is_null() {
                    // Injection phase: flag the parent→leaf edge.
                    leaf = rec.leaf;
                    if !key_equal(key, (*leaf).key) {
                        self.smr.end_op(tid);
                        return false;
                    }
                    if child_addr
                        .compare_exchange(leaf, with_tag(leaf, FLG))
                        .is_ok()
                    {
                        if self.cleanup(key, tid) {
                            self.smr.end_op(tid);
                            return true;
                        }
                    } else {
                        let child = child_addr.load(Ordering::SeqCst);
                        if untagged(child) == leaf && tag_of(child, TAG | FLG) != 0 {
                            self.cleanup(key, tid);
                        }
                        leaf = ptr::null_mut();
                    }
                } else if rec.leaf != leaf {
                    // A helper finished our cleanup.
                    self.smr.end_op(tid);
                    return true;
                } else if self.cleanup(key, tid) {
                    self.smr.end_op(tid);
                    return true;
                }
            }
        }
    }

    unsafe fn seek(&self, key: &K, tid: usize) {
        let rec = &mut *self.records[tid].get();
        rec.ancestor = self.r;
        rec.parent = (*self.r).left.load(Ordering::SeqCst);
        rec.successor = rec.parent;
        let mut parent_field = (*self.s).left.load(Ordering::SeqCst);
        rec.leaf = untagged(parent_field);

        let mut current_field = (*rec.leaf).left.load(Ordering::SeqCst);
        let mut current = untagged(current_field);

        while !current.is_null() {
            // Track the nearest untagged edge as the cleanup anchor.
            if tag_of(parent_field, TAG) == 0 {
                rec.ancestor = rec.parent;
                rec.successor = rec.leaf;
            }

            rec.parent = rec.leaf;
            rec.leaf = current;
            parent_field = current_field;

            current_field = if key_less(key, (*current).key) {
                (*current).left.load(Ordering::SeqCst)
            } else {
                (*current).right.load(Ordering::SeqCst)
            };
            current = untagged(current_field);
        }
    }

    /// Physically unlinks the flagged leaf: tag the sibling edge, splice the
    /// ancestor straight onto the surviving sibling, then retire everything
    /// between the successor and the removed pair.
    unsafe fn cleanup(&self, key: &K, tid: usize) -> bool {
        let rec = &*self.records[tid].get();
        let ancestor = rec.ancestor;
        let mut successor = rec.successor;
        let parent = rec.parent;

        let successor_addr = if key_less(key, (*ancestor).key) {
            &(*ancestor).left
        } else {
            &(*ancestor).right
        };

        let (child_addr, mut sibling_addr) = if key_less(key, (*parent).key) {
            (&(*parent).left, &(*parent).right)
        } else {
            (&(*parent).right, &(*parent).left)
        };

        let mut child = child_addr.load(Ordering::SeqCst);
        if tag_of(child, FLG) == 0 {
            // The flag sits on the other edge; the sibling is ours.
            child = sibling_addr.load(Ordering::SeqCst);
            sibling_addr = child_addr;
        }

        // Lock the sibling edge, then splice. The spliced-in value keeps a
        // possible FLG of the sibling itself, only TAG is stripped.
        let prev = sibling_addr.fetch_or(TAG, Ordering::SeqCst);
        let node = without_tag(prev, TAG);
        let ret = successor_addr.compare_exchange(successor, node).is_ok();
        if ret {
            while successor != parent {
                let left = (*successor).left.load(Ordering::SeqCst);
                let right = (*successor).right.load(Ordering::SeqCst);
                self.smr.retire(successor, tid);
                if tag_of(left, FLG) != 0 {
                    self.smr.retire(untagged(left), tid);
                    successor = untagged(right);
                } else {
                    self.smr.retire(untagged(right), tid);
                    successor = untagged(left);
                }
            }
            self.smr.retire(untagged(child), tid);
            self.smr.retire(successor, tid);
        }
        ret
    }
}

impl<'k, K, H, E> Drop for NatarajanTree<'k, K, H, E>
where
    K: Ord,
    H: Default,
    E: EpochReclaim<TreeNode<'k, K, H>>,
{
    fn drop(&mut self) {
        let mut stack = vec![self.r];
        while let Some(node) = stack.pop() {
            if node.is_null() {
                continue;
            }
            unsafe {
                stack.push(untagged((*node).left.load(Ordering::Relaxed)));
                stack.push(untagged((*node).right.load(Ordering::Relaxed)));
                drop(Box::from_raw(node));
            }
        }
    }
}
