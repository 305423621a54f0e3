//! Natarajan–Mittal tree over a slot-publishing reclamation engine.
//!
//! `seek` keeps five protections alive — current, leaf, parent, successor,
//! ancestor — publishing each node before stepping onto it. When a tagged
//! or flagged edge is met and the anchored successor edge has moved, the
//! seek restarts from the top: its protections would otherwise anchor a
//! path that cleanup may already have spliced out.

use core::cell::UnsafeCell;
use core::ptr;
use core::sync::atomic::Ordering;

use crossbeam_utils::CachePadded;

use smrkit::{
    tag_of, untagged, with_tag, without_tag, Atomic, He, HeHeader, Hp, SlotReclaim, FLG, TAG,
};

use crate::node::{key_equal, key_less, SeekRecord, TreeNode};

/// Protection slot for the node being stepped onto.
const S_CURR: usize = 0;
/// Protection slot for the leaf.
const S_LEAF: usize = 1;
/// Protection slot for the parent.
const S_PARENT: usize = 2;
/// Protection slot for the successor.
const S_SUCC: usize = 3;
/// Protection slot for the ancestor.
const S_ANC: usize = 4;

const SLOTS: usize = 5;

/// NM tree over hazard pointers.
pub type HazardNatarajanTreeHp<'k, K> =
    HazardNatarajanTree<'k, K, (), Hp<TreeNode<'k, K, ()>>>;
/// NM tree over hazard eras.
pub type HazardNatarajanTreeHe<'k, K> =
    HazardNatarajanTree<'k, K, HeHeader, He<TreeNode<'k, K, HeHeader>>>;

/// A sorted set as a lock-free external BST with per-pointer protection.
pub struct HazardNatarajanTree<'k, K, H, S>
where
    K: Ord,
    H: Default,
    S: SlotReclaim<TreeNode<'k, K, H>>,
{
    r: *mut TreeNode<'k, K, H>,
    s: *mut TreeNode<'k, K, H>,
    records: Box<[CachePadded<UnsafeCell<SeekRecord<'k, K, H>>>]>,
    smr: S,
}

unsafe impl<'k, K, H, S> Send for HazardNatarajanTree<'k, K, H, S>
where
    K: Ord + Sync,
    H: Default,
    S: SlotReclaim<TreeNode<'k, K, H>>,
{
}
unsafe impl<'k, K, H, S> Sync for HazardNatarajanTree<'k, K, H, S>
where
    K: Ord + Sync,
    H: Default,
    S: SlotReclaim<TreeNode<'k, K, H>>,
{
}

impl<'k, K, H, S> HazardNatarajanTree<'k, K, H, S>
where
    K: Ord,
    H: Default,
    S: SlotReclaim<TreeNode<'k, K, H>>,
{
    pub fn new(max_threads: usize) -> Self {
        let smr = S::with_slots(SLOTS, max_threads);
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
            self.seek(key, tid);
            let leaf = (*self.records[tid].get()).leaf;
            let found = key_equal(key, (*leaf).key);
            self.smr.clear(tid);
            found
        }
    }

    pub fn insert(&self, key: &'k K, tid: usize) -> bool {
        unsafe {
            let new_leaf =
                self.smr
                    .init_object(TreeNode::alloc(Some(key), ptr::null_mut(), ptr::null_mut()), tid);
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
            self.smr.clear(tid);
            ret
        }
    }

    pub fn remove(&self, key: &K, tid: usize) -> bool {
        unsafe {
            let mut leaf: *mut TreeNode<'k, K, H> = ptr::null_mut();
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
                    leaf = rec.leaf;
                    if !key_equal(key, (*leaf).key) {
                        self.smr.clear(tid);
                        return false;
                    }
                    if child_addr
                        .compare_exchange(leaf, with_tag(leaf, FLG))
                        .is_ok()
                    {
                        if self.cleanup(key, tid) {
                            self.smr.clear(tid);
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
                    self.smr.clear(tid);
                    return true;
                } else if self.cleanup(key, tid) {
                    self.smr.clear(tid);
                    return true;
                }
            }
        }
    }

    unsafe fn seek(&self, key: &K, tid: usize) {
        'again: loop {
            let rec = &mut *self.records[tid].get();
            rec.ancestor = self.r;
            rec.parent = self.smr.protect(S_PARENT, &(*self.r).left, tid);
            rec.successor = rec.parent;
            let mut successor_addr: *const Atomic<TreeNode<'k, K, H>> = &(*self.r).left;
            self.smr.transfer(S_SUCC, S_PARENT, rec.parent, tid);

            let mut parent_field = self.smr.protect(S_LEAF, &(*self.s).left, tid);
            rec.leaf = untagged(parent_field);
            let mut leaf_addr: *const Atomic<TreeNode<'k, K, H>> = &(*self.s).left;

            let mut current_field = self.smr.protect(S_CURR, &(*rec.leaf).left, tid);
            let mut current = untagged(current_field);
            let mut current_addr: *const Atomic<TreeNode<'k, K, H>> = &(*rec.leaf).left;

            while !current.is_null() {
                if tag_of(parent_field, TAG) == 0 {
                    rec.ancestor = rec.parent;
                    self.smr.transfer(S_ANC, S_PARENT, rec.parent, tid);
                    rec.successor = rec.leaf;
                    self.smr.transfer(S_SUCC, S_LEAF, rec.leaf, tid);
                    successor_addr = leaf_addr;
                }

                // A dirty edge below a moved anchor means our protections
                // may cover a spliced-out path.
                if tag_of(current_field, TAG | FLG) != 0
                    && (*successor_addr).load(Ordering::SeqCst) != rec.successor
                {
                    continue 'again;
                }

                rec.parent = rec.leaf;
                self.smr.transfer(S_PARENT, S_LEAF, rec.leaf, tid);
                rec.leaf = current;
                leaf_addr = current_addr;
                self.smr.transfer(S_LEAF, S_CURR, current, tid);
                parent_field = current_field;

                if key_less(key, (*current).key) {
                    current_field = self.smr.protect(S_CURR, &(*current).left, tid);
                    current_addr = &(*current).left;
                } else {
                    current_field = self.smr.protect(S_CURR, &(*current).right, tid);
                    current_addr = &(*current).right;
                }
                current = untagged(current_field);
            }
            return;
        }
    }

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
            child = sibling_addr.load(Ordering::SeqCst);
            sibling_addr = child_addr;
        }

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

impl<'k, K, H, S> Drop for HazardNatarajanTree<'k, K, H, S>
where
    K: Ord,
    H: Default,
    S: SlotReclaim<TreeNode<'k, K, H>>,
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
