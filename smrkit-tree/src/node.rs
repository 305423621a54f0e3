//! The external-BST node and the per-thread seek record.

use core::ptr;
use core::ptr::addr_of_mut;

use smrkit::{Atomic, Retirable};

/// A tree node: reclaimer header first, then the borrowed routing/leaf key
/// and the two possibly tagged child edges. `key` is `None` for the
/// bootstrap sentinels, which order after every real key.
#[repr(C)]
pub struct TreeNode<'k, K, H> {
    pub(crate) hdr: H,
    pub(crate) key: Option<&'k K>,
    pub(crate) left: Atomic<TreeNode<'k, K, H>>,
    pub(crate) right: Atomic<TreeNode<'k, K, H>>,
}

unsafe impl<'k, K, H> Retirable<H> for TreeNode<'k, K, H> {
    #[inline]
    fn header_ptr(ptr: *mut Self) -> *mut H {
        unsafe { addr_of_mut!((*ptr).hdr) }
    }
}

impl<'k, K, H: Default> TreeNode<'k, K, H> {
    pub(crate) fn alloc(key: Option<&'k K>, left: *mut Self, right: *mut Self) -> *mut Self {
        Box::into_raw(Box::new(Self {
            hdr: H::default(),
            key,
            left: Atomic::new(left),
            right: Atomic::new(right),
        }))
    }
}

/// The path fragment a seek hands to cleanup: the nearest untagged edge
/// above the leaf (`ancestor` → `successor`) and the last two nodes
/// (`parent`, `leaf`).
pub(crate) struct SeekRecord<'k, K, H> {
    pub(crate) ancestor: *mut TreeNode<'k, K, H>,
    pub(crate) successor: *mut TreeNode<'k, K, H>,
    pub(crate) parent: *mut TreeNode<'k, K, H>,
    pub(crate) leaf: *mut TreeNode<'k, K, H>,
}

impl<'k, K, H> Default for SeekRecord<'k, K, H> {
    fn default() -> Self {
        Self {
            ancestor: ptr::null_mut(),
            successor: ptr::null_mut(),
            parent: ptr::null_mut(),
            leaf: ptr::null_mut(),
        }
    }
}

/// Routing comparison: a sentinel (`None`) key sits above every real key.
#[inline]
pub(crate) fn key_less<K: Ord>(key: &K, node_key: Option<&K>) -> bool {
    match node_key {
        None => true,
        Some(k) => key < k,
    }
}

/// True when the node holds exactly the probe key (sentinels match none).
#[inline]
pub(crate) fn key_equal<K: Ord>(key: &K, node_key: Option<&K>) -> bool {
    matches!(node_key, Some(k) if k == key)
}
