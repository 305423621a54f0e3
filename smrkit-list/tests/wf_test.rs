//! Wait-free Harris list: semantics plus the no-starvation property of the
//! helped search.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use smrkit_list::{WfHarrisListEbr, WfHarrisListHyaline, WfHarrisListIbr};

fn pool(n: u64) -> &'static [u64] {
    Box::leak((0..n).collect::<Vec<_>>().into_boxed_slice())
}

macro_rules! wf_suite {
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

            /// One reader searches while every other thread churns inserts
            /// and removes around it. The reader's searches go through the
            /// help protocol under this contention and must all complete
            /// and stay correct for a key that is never removed.
            #[test]
            fn searches_complete_under_writer_pressure() {
                let keys = pool(64);
                let list = Arc::new(<$ty>::new(8));
                // Key 0 is permanently present.
                assert!(list.insert(&keys[0], 0));

                let stop = Arc::new(AtomicBool::new(false));
                let mut writers = Vec::new();
                for tid in 1..8usize {
                    let list = Arc::clone(&list);
                    let stop = Arc::clone(&stop);
                    writers.push(thread::spawn(move || {
                        let mut rng = StdRng::seed_from_u64(tid as u64);
                        while !stop.load(Ordering::Relaxed) {
                            let k = rng.gen_range(1..64usize);
                            if rng.gen_bool(0.5) {
                                list.insert(&keys[k], tid);
                            } else {
                                list.remove(&keys[k], tid);
                            }
                        }
                    }));
                }

                for i in 0..30_000usize {
                    assert!(list.search(&keys[0], 0), "lost key 0 at search {i}");
                    let _ = list.search(&keys[1 + i % 63], 0);
                }

                stop.store(true, Ordering::SeqCst);
                for writer in writers {
                    writer.join().unwrap();
                }
            }
        }
    };
}

wf_suite!(ebr, WfHarrisListEbr<'static, u64>);
wf_suite!(ibr, WfHarrisListIbr<'static, u64>);
wf_suite!(hyaline, WfHarrisListHyaline<'static, u64>);
