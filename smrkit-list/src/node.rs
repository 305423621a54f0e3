//! The list node shared by every list variant.

use core::ptr::addr_of_mut;

use smrkit::{Atomic, Retirable};

/// A sorted-list node: reclaimer header first, then the borrowed key and the
/// possibly marked successor link. `key` is `None` only for the head
/// sentinel, which orders before every real key.
#[repr(C)]
pub struct ListNode<'k, K, H> {
    pub(crate) hdr: H,
    pub(crate) key: Option<&'k K>,
    pub(crate) next: Atomic<ListNode<'k, K, H>>,
}

unsafe impl<'k, K, H> Retirable<H> for ListNode<'k, K, H> {
    #[inline]
    fn header_ptr(ptr: *mut Self) -> *mut H {
        unsafe { addr_of_mut!((*ptr).hdr) }
    }
}

impl<'k, K, H: Default> ListNode<'k, K, H> {
    pub(crate) fn alloc(key: Option<&'k K>) -> *mut Self {
        Box::into_raw(Box::new(Self {
            hdr: H::default(),
            key,
            next: Atomic::null(),
        }))
    }
}

/// True when the traversal must stop at this node: its key is at or past
/// the probe key. The sentinel never stops a traversal.
#[inline]
pub(crate) fn at_or_past<K: Ord>(node_key: Option<&K>, key: &K) -> bool {
    matches!(node_key, Some(k) if *k >= *key)
}

/// True when this node holds exactly the probe key.
#[inline]
pub(crate) fn key_matches<K: Ord>(node_key: Option<&K>, key: &K) -> bool {
    matches!(node_key, Some(k) if *k == *key)
}
