//! Set semantics and concurrency tests for the epoch-framed Harris–Michael
//! list.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use smrkit_list::{MichaelListEbr, MichaelListHyaline, MichaelListIbr, MichaelListNr};

fn pool(n: u64) -> &'static [u64] {
    Box::leak((0..n).collect::<Vec<_>>().into_boxed_slice())
}

macro_rules! list_suite {
    ($name:ident, $ty:ty) => {
        mod $name {
            use super::*;

            #[test]
            fn insert_sequence_and_membership() {
                let keys = pool(16);
                let list = <$ty>::new(1);
                let inserts = [3usize, 1, 4, 1, 5, 9, 2, 6];
                let expect = [true, true, true, false, true, true, true, true];
                for (k, e) in inserts.iter().zip(expect) {
                    assert_eq!(list.insert(&keys[*k], 0), e, "insert {k}");
                }
                let members = [
                    false, true, true, true, true, true, true, false, false, true, false,
                ];
                for (k, e) in members.iter().enumerate() {
                    assert_eq!(list.search(&keys[k], 0), *e, "search {k}");
                }
            }

            #[test]
            fn duplicate_insert_is_rejected() {
                let keys = pool(4);
                let list = <$ty>::new(1);
                assert!(list.insert(&keys[2], 0));
                assert!(!list.insert(&keys[2], 0));
                assert!(list.remove(&keys[2], 0));
                assert!(!list.remove(&keys[2], 0));
                assert!(!list.search(&keys[2], 0));
            }

            #[test]
            fn random_ops_match_reference_set() {
                let keys = pool(64);
                let list = <$ty>::new(1);
                let mut reference = BTreeSet::new();
                let mut rng = StdRng::seed_from_u64(7);
                for _ in 0..10_000 {
                    let k = rng.gen_range(0..64usize);
                    match rng.gen_range(0..3u32) {
                        0 => assert_eq!(list.insert(&keys[k], 0), reference.insert(k)),
                        1 => assert_eq!(list.remove(&keys[k], 0), reference.remove(&k)),
                        _ => assert_eq!(list.search(&keys[k], 0), reference.contains(&k)),
                    }
                }
            }

            #[test]
            fn two_threads_partition_the_keyspace() {
                let keys = pool(1000);
                let list = Arc::new(<$ty>::new(2));
                let handles: Vec<_> = (0..2usize)
                    .map(|tid| {
                        let list = Arc::clone(&list);
                        thread::spawn(move || {
                            let mut k = tid;
                            while k < 1000 {
                                assert!(list.insert(&keys[k], tid));
                                k += 2;
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().unwrap();
                }
                for k in 0..1000 {
                    assert!(list.search(&keys[k], 0), "key {k} missing after join");
                }
            }

            #[test]
            fn mixed_stress_on_small_universe() {
                let keys = pool(16);
                let list = Arc::new(<$ty>::new(8));
                let handles: Vec<_> = (0..8usize)
                    .map(|tid| {
                        let list = Arc::clone(&list);
                        thread::spawn(move || {
                            let mut rng = StdRng::seed_from_u64(300 + tid as u64);
                            for _ in 0..20_000 {
                                let k = rng.gen_range(0..16usize);
                                match rng.gen_range(0..10u32) {
                                    0..=7 => {
                                        list.search(&keys[k], tid);
                                    }
                                    8 => {
                                        list.insert(&keys[k], tid);
                                    }
                                    _ => {
                                        list.remove(&keys[k], tid);
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
                    let _ = list.search(&keys[k], 0);
                }
            }
        }
    };
}

list_suite!(ebr, MichaelListEbr<'static, u64>);
list_suite!(ibr, MichaelListIbr<'static, u64>);
list_suite!(hyaline, MichaelListHyaline<'static, u64>);
list_suite!(nr, MichaelListNr<'static, u64>);
