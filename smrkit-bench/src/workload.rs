//! The measurement loop: prefill, mixed read/insert/remove streams against
//! a shared container, throughput and retained-space aggregation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{Config, Scheme};

/// Past this size, prefilling with one thread dominates a data point, so it
/// is split across the available cores.
const SEQUENTIAL_PREFILL_THRESHOLD: usize = 100_000;

/// Cap on threads used for parallel prefilling.
const MAX_PREFILL_THREADS: usize = 384;

/// The driver-facing surface every benchmarked container provides.
pub trait BenchSet: Send + Sync + 'static {
    fn with_threads(max_threads: usize) -> Self;
    fn search(&self, key: &'static u64, tid: usize) -> bool;
    fn insert(&self, key: &'static u64, tid: usize) -> bool;
    fn remove(&self, key: &'static u64, tid: usize) -> bool;
    fn calculate_space(&self, tid: usize) -> i64;
}

/// Median ops/sec and retained nodes across the runs of one data point.
pub struct Outcome {
    pub ops_per_sec: i64,
    pub retained: i64,
}

fn prefill<C: BenchSet>(set: &Arc<C>, cfg: &Config, pool: &'static [u64]) {
    let half = cfg.elements / 2;
    let mut rng = StdRng::seed_from_u64(1);
    let keys: Vec<usize> = (0..half).map(|_| rng.gen_range(0..cfg.elements)).collect();

    let prefill_threads = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_PREFILL_THREADS);

    if cfg.elements <= SEQUENTIAL_PREFILL_THRESHOLD || prefill_threads < 2 {
        for &k in &keys {
            set.insert(&pool[k], 0);
        }
    } else {
        info!("prefilling {half} keys with {prefill_threads} threads");
        let keys = Arc::new(keys);
        let chunk = half.div_ceil(prefill_threads);
        let mut handles = Vec::with_capacity(prefill_threads);
        for tid in 0..prefill_threads {
            let set = Arc::clone(set);
            let keys = Arc::clone(&keys);
            handles.push(thread::spawn(move || {
                let start = usize::min(tid * chunk, keys.len());
                let end = usize::min(start + chunk, keys.len());
                for &k in &keys[start..end] {
                    set.insert(&pool[k], tid);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}

/// Runs `cfg.runs` timed rounds of the mixed workload on a fresh container
/// each round and returns the median ops/sec and retained-space figures.
pub fn benchmark<C: BenchSet>(
    name: &str,
    cfg: &Config,
    n_threads: usize,
    pool: &'static [u64],
) -> Outcome {
    let prefill_thread_cap = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_PREFILL_THREADS);
    let max_threads_needed = if cfg.elements > SEQUENTIAL_PREFILL_THRESHOLD {
        usize::max(n_threads, prefill_thread_cap)
    } else {
        n_threads
    };

    let mut ops_per_run: Vec<i64> = Vec::with_capacity(cfg.runs);
    let mut mem_per_run: Vec<i64> = Vec::with_capacity(cfg.runs);

    for irun in 0..cfg.runs {
        let set = Arc::new(C::with_threads(max_threads_needed));
        prefill(&set, cfg, pool);
        if irun == 0 {
            println!("##### {name} #####");
        }

        let quit = Arc::new(AtomicBool::new(false));
        let start = Arc::new(Barrier::new(n_threads + 1));
        let mut workers = Vec::with_capacity(n_threads);
        for tid in 0..n_threads {
            let set = Arc::clone(&set);
            let quit = Arc::clone(&quit);
            let start = Arc::clone(&start);
            let read_pct = cfg.read_pct;
            let insert_pct = cfg.insert_pct;
            let elements = cfg.elements;
            let seed = 0x9E37_79B9_7F4A_7C15u64 ^ ((irun as u64) << 32) ^ tid as u64;
            workers.push(thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut ops: i64 = 0;
                start.wait();
                while !quit.load(Ordering::Relaxed) {
                    let ix = rng.gen_range(0..elements);
                    let op = rng.gen_range(0..100u32);
                    if op < read_pct {
                        set.search(&pool[ix], tid);
                    } else if op < read_pct + insert_pct {
                        set.insert(&pool[ix], tid);
                    } else {
                        // The unexercised residue falls through to remove.
                        set.remove(&pool[ix], tid);
                    }
                    ops += 1;
                }
                ops
            }));
        }

        start.wait();
        thread::sleep(Duration::from_secs(cfg.seconds));
        quit.store(true, Ordering::SeqCst);

        let mut total_ops: i64 = 0;
        for worker in workers {
            total_ops += worker.join().unwrap();
        }
        let mut total_mem: i64 = 0;
        for tid in 0..n_threads {
            total_mem += set.calculate_space(tid);
        }

        // Return the container to empty so reclaimers drain before drop.
        if cfg.scheme != Scheme::Nr && cfg.elements <= SEQUENTIAL_PREFILL_THRESHOLD {
            for key in pool.iter() {
                set.remove(key, 0);
            }
        }
        drop(set);

        ops_per_run.push(total_ops / cfg.seconds as i64);
        mem_per_run.push(total_mem);
    }

    for (irun, (ops, mem)) in ops_per_run.iter().zip(mem_per_run.iter()).enumerate() {
        println!("\n#### RUN {} RESULT ####", irun + 1);
        println!(
            "----- Benchmark={name}  numElements={}  numThreads={n_threads}  testLength={}s -----",
            cfg.elements, cfg.seconds
        );
        println!("Ops/sec = {ops}");
        println!("retained_nodes = {mem}");
    }

    ops_per_run.sort_unstable();
    mem_per_run.sort_unstable();
    let median_ops = ops_per_run[cfg.runs / 2];
    let median_mem = mem_per_run[cfg.runs / 2];
    let (min_ops, max_ops) = (ops_per_run[0], ops_per_run[cfg.runs - 1]);
    let (min_mem, max_mem) = (mem_per_run[0], mem_per_run[cfg.runs - 1]);
    let ops_delta = if median_ops == 0 {
        0
    } else {
        100 * (max_ops - min_ops) / median_ops
    };
    let mem_delta = if median_mem == 0 {
        0
    } else {
        100 * (max_mem - min_mem) / median_mem
    };

    println!(
        "\n----- Benchmark={name}  numElements={}  numThreads={n_threads}  testLength={}s -----",
        cfg.elements, cfg.seconds
    );
    println!("Ops/sec = {median_ops}   delta = {ops_delta}%   min = {min_ops}   max = {max_ops}");
    println!(
        "retained_nodes = {median_mem}   delta = {mem_delta}%   min = {min_mem}   max = {max_mem}"
    );

    Outcome {
        ops_per_sec: median_ops,
        retained: median_mem,
    }
}
