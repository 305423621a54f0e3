//! Set semantics and concurrency tests for the Natarajan–Mittal tree over
//! every engine pairing.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use smrkit_tree::{
    HazardNatarajanTreeHe, HazardNatarajanTreeHp, NatarajanTreeEbr, NatarajanTreeHyaline,
    NatarajanTreeIbr, NatarajanTreeNr,
};

fn pool(n: u64) -> &'static [u64] {
    Box::leak((0..n).collect::<Vec<_>>().into_boxed_slice())
}

macro_rules! tree_suite {
    ($name:ident, $ty:ty) => {
        mod $name {
            use super::*;

            #[test]
            fn leaf_routing_shape_survives_removal() {
                let keys = pool(16);
                let tree = <$ty>::new(1);
                for k in [10usize, 5, 15, 3, 7] {
                    assert!(tree.insert(&keys[k], 0), "insert {k}");
                }
                for k in [10usize, 5, 15, 3, 7] {
                    assert!(tree.search(&keys[k], 0), "search {k}");
                }
                assert!(tree.remove(&keys[10], 0));
                assert!(!tree.search(&keys[10], 0));
                for k in [5usize, 15, 3, 7] {
                    assert!(tree.search(&keys[k], 0), "search {k} after removing 10");
                }
            }

            #[test]
            fn insert_sequence_and_membership() {
                let keys = pool(16);
                let tree = <$ty>::new(1);
                let inserts = [3usize, 1, 4, 1, 5, 9, 2, 6];
                let expect = [true, true, true, false, true, true, true, true];
                for (k, e) in inserts.iter().zip(expect) {
                    assert_eq!(tree.insert(&keys[*k], 0), e, "insert {k}");
                }
                let members = [
                    false, true, true, true, true, true, true, false, false, true, false,
                ];
                for (k, e) in members.iter().enumerate() {
                    assert_eq!(tree.search(&keys[k], 0), *e, "search {k}");
                }
            }

            #[test]
            fn duplicate_insert_is_rejected() {
                let keys = pool(4);
                let tree = <$ty>::new(1);
                assert!(tree.insert(&keys[1], 0));
                assert!(!tree.insert(&keys[1], 0));
                assert!(tree.remove(&keys[1], 0));
                assert!(!tree.remove(&keys[1], 0));
                assert!(!tree.search(&keys[1], 0));
            }

            #[test]
            fn random_ops_match_reference_set() {
                let keys = pool(64);
                let tree = <$ty>::new(1);
                let mut reference = BTreeSet::new();
                let mut rng = StdRng::seed_from_u64(11);
                for _ in 0..10_000 {
                    let k = rng.gen_range(0..64usize);
                    match rng.gen_range(0..3u32) {
                        0 => assert_eq!(tree.insert(&keys[k], 0), reference.insert(k)),
                        1 => assert_eq!(tree.remove(&keys[k], 0), reference.remove(&k)),
                        _ => assert_eq!(tree.search(&keys[k], 0), reference.contains(&k)),
                    }
                }
            }

            #[test]
            fn two_threads_partition_the_keyspace() {
                let keys = pool(1000);
                let tree = Arc::new(<$ty>::new(2));
                let handles: Vec<_> = (0..2usize)
                    .map(|tid| {
                        let tree = Arc::clone(&tree);
                        thread::spawn(move || {
                            let mut k = tid;
                            while k < 1000 {
                                assert!(tree.insert(&keys[k], tid));
                                k += 2;
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().unwrap();
                }
                for k in 0..1000 {
                    assert!(tree.search(&keys[k], 0), "key {k} missing after join");
                }
            }

            #[test]
            fn mixed_stress_on_small_universe() {
                let keys = pool(16);
                let tree = Arc::new(<$ty>::new(8));
                let handles: Vec<_> = (0..8usize)
                    .map(|tid| {
                        let tree = Arc::clone(&tree);
                        thread::spawn(move || {
                            let mut rng = StdRng::seed_from_u64(900 + tid as u64);
                            for _ in 0..20_000 {
                                let k = rng.gen_range(0..16usize);
                                match rng.gen_range(0..10u32) {
                                    0..=7 => {
                                        tree.search(&keys[k], tid);
                                    }
                                    8 => {
                                        tree.insert(&keys[k], tid);
                                    }
                                    _ => {
                                        tree.remove(&keys[k], tid);
                                    }
                                }
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().unwrap();
                }
                for k in 0..16 {
                    let _ = tree.search(&keys[k], 0);
                }
            }

            #[test]
            fn churn_returns_to_empty() {
                let keys = pool(2_000);
                let tree = <$ty>::new(1);
                for k in 0..2_000 {
                    assert!(tree.insert(&keys[k], 0));
                }
                for k in 0..2_000 {
                    assert!(tree.remove(&keys[k], 0), "remove {k}");
                }
                for k in (0..2_000).step_by(97) {
                    assert!(!tree.search(&keys[k], 0));
                }
            }
        }
    };
}

tree_suite!(ebr, NatarajanTreeEbr<'static, u64>);
tree_suite!(ibr, NatarajanTreeIbr<'static, u64>);
tree_suite!(hyaline, NatarajanTreeHyaline<'static, u64>);
tree_suite!(nr, NatarajanTreeNr<'static, u64>);
tree_suite!(hp, HazardNatarajanTreeHp<'static, u64>);
tree_suite!(he, HazardNatarajanTreeHe<'static, u64>);
