//! Benchmark driver binary.
//!
//! `list` measures the Harris–Michael and Harris lists side by side,
//! `list-wf` swaps the Harris list for its wait-free variant, `tree`
//! measures the Natarajan–Mittal tree. One data point per thread count,
//! finished by a CSV-like block for chart scripts.

mod config;
mod workload;

use config::{Config, DataStructure, Scheme};
use workload::{benchmark, BenchSet, Outcome};

use smrkit::NoReclaim;
use smrkit_list::{
    HarrisListEbr, HarrisListHyaline, HarrisListIbr, HarrisListNr, HazardHarrisListHe,
    HazardHarrisListHp, HazardMichaelListHe, HazardMichaelListHp, MichaelListEbr,
    MichaelListHyaline, MichaelListIbr, MichaelListNr, WfHarrisList, WfHarrisListEbr,
    WfHarrisListHyaline, WfHarrisListIbr,
};
use smrkit_tree::{
    HazardNatarajanTreeHe, HazardNatarajanTreeHp, NatarajanTreeEbr, NatarajanTreeHyaline,
    NatarajanTreeIbr, NatarajanTreeNr,
};

type Key = u64;

type MlNr = MichaelListNr<'static, Key>;
type MlEbr = MichaelListEbr<'static, Key>;
type MlIbr = MichaelListIbr<'static, Key>;
type MlHy = MichaelListHyaline<'static, Key>;
type HmlHp = HazardMichaelListHp<'static, Key>;
type HmlHe = HazardMichaelListHe<'static, Key>;

type HlNr = HarrisListNr<'static, Key>;
type HlEbr = HarrisListEbr<'static, Key>;
type HlIbr = HarrisListIbr<'static, Key>;
type HlHy = HarrisListHyaline<'static, Key>;
type HhlHp = HazardHarrisListHp<'static, Key>;
type HhlHe = HazardHarrisListHe<'static, Key>;

type WflNr = WfHarrisList<'static, Key, (), NoReclaim>;
type WflEbr = WfHarrisListEbr<'static, Key>;
type WflIbr = WfHarrisListIbr<'static, Key>;
type WflHy = WfHarrisListHyaline<'static, Key>;

type NtNr = NatarajanTreeNr<'static, Key>;
type NtEbr = NatarajanTreeEbr<'static, Key>;
type NtIbr = NatarajanTreeIbr<'static, Key>;
type NtHy = NatarajanTreeHyaline<'static, Key>;
type HntHp = HazardNatarajanTreeHp<'static, Key>;
type HntHe = HazardNatarajanTreeHe<'static, Key>;

macro_rules! impl_bench_set {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl BenchSet for $ty {
                fn with_threads(max_threads: usize) -> Self {
                    Self::new(max_threads)
                }
                #[inline]
                fn search(&self, key: &'static u64, tid: usize) -> bool {
                    Self::search(self, key, tid)
                }
                #[inline]
                fn insert(&self, key: &'static u64, tid: usize) -> bool {
                    Self::insert(self, key, tid)
                }
                #[inline]
                fn remove(&self, key: &'static u64, tid: usize) -> bool {
                    Self::remove(self, key, tid)
                }
                #[inline]
                fn calculate_space(&self, tid: usize) -> i64 {
                    Self::calculate_space(self, tid)
                }
            }
        )+
    };
}

impl_bench_set!(
    MlNr, MlEbr, MlIbr, MlHy, HmlHp, HmlHe, HlNr, HlEbr, HlIbr, HlHy, HhlHp, HhlHe, WflNr,
    WflEbr, WflIbr, WflHy, NtNr, NtEbr, NtIbr, NtHy, HntHp, HntHe,
);

fn thread_ladder(cfg: &Config) -> Vec<usize> {
    match cfg.threads {
        Some(t) => vec![t],
        None => vec![1, 16, 32, 64, 128, 256, 384],
    }
}

fn print_final(names: &[&str], rows: &[(usize, Vec<Outcome>)], cfg: &Config) {
    println!("\n\nFINAL RESULTS (FOR CHARTS):\n");
    println!(
        "Results in ops per second for numRuns={}, length={}s",
        cfg.runs, cfg.seconds
    );
    println!("Number of elements: {}\n", cfg.elements);

    let mut header = String::from("Threads");
    for name in names {
        header.push_str(", ");
        header.push_str(name);
    }
    for name in names {
        header.push_str(", ");
        header.push_str(name);
        header.push_str("_Retained");
    }
    println!("{header}");

    for (threads, outcomes) in rows {
        let mut line = threads.to_string();
        for outcome in outcomes {
            line.push_str(&format!(", {}", outcome.ops_per_sec));
        }
        for outcome in outcomes {
            line.push_str(&format!(", {}", outcome.retained));
        }
        println!("{line}");
    }
}

fn sweep_pair<A: BenchSet, B: BenchSet>(
    name_a: &str,
    name_b: &str,
    cfg: &Config,
    pool: &'static [u64],
) {
    let mut rows = Vec::new();
    for &n_threads in &thread_ladder(cfg) {
        let a = benchmark::<A>(name_a, cfg, n_threads, pool);
        let b = benchmark::<B>(name_b, cfg, n_threads, pool);
        rows.push((n_threads, vec![a, b]));
    }
    print_final(&[name_a, name_b], &rows, cfg);
}

fn sweep_single<A: BenchSet>(name: &str, cfg: &Config, pool: &'static [u64]) {
    let mut rows = Vec::new();
    for &n_threads in &thread_ladder(cfg) {
        let outcome = benchmark::<A>(name, cfg, n_threads, pool);
        rows.push((n_threads, vec![outcome]));
    }
    print_final(&[name], &rows, cfg);
}

fn main() {
    env_logger::init();

    let matches = match config::command().try_get_matches() {
        Ok(m) => m,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    let cfg = match config::parse(&matches) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("smrkit-bench: {e}");
            std::process::exit(1);
        }
    };

    // The key pool outlives every container and worker thread.
    let pool: &'static [u64] =
        Box::leak((0..cfg.elements as u64).collect::<Vec<_>>().into_boxed_slice());

    match (cfg.ds, cfg.scheme) {
        (DataStructure::List, Scheme::Nr) => {
            sweep_pair::<MlNr, HlNr>("HarrisMichaelList/NR", "HarrisList/NR", &cfg, pool)
        }
        (DataStructure::List, Scheme::Ebr) => {
            sweep_pair::<MlEbr, HlEbr>("HarrisMichaelList/EBR", "HarrisList/EBR", &cfg, pool)
        }
        (DataStructure::List, Scheme::Ibr) => {
            sweep_pair::<MlIbr, HlIbr>("HarrisMichaelList/IBR", "HarrisList/IBR", &cfg, pool)
        }
        (DataStructure::List, Scheme::Hyaline) => sweep_pair::<MlHy, HlHy>(
            "HarrisMichaelList/HYALINE",
            "HarrisList/HYALINE",
            &cfg,
            pool,
        ),
        (DataStructure::List, Scheme::Hp) => {
            sweep_pair::<HmlHp, HhlHp>("HarrisMichaelList/HP", "HarrisList/HP", &cfg, pool)
        }
        (DataStructure::List, Scheme::He) => {
            sweep_pair::<HmlHe, HhlHe>("HarrisMichaelList/HE", "HarrisList/HE", &cfg, pool)
        }

        (DataStructure::ListWf, Scheme::Nr) => {
            sweep_pair::<MlNr, WflNr>("HarrisMichaelList/NR", "WfHarrisList/NR", &cfg, pool)
        }
        (DataStructure::ListWf, Scheme::Ebr) => {
            sweep_pair::<MlEbr, WflEbr>("HarrisMichaelList/EBR", "WfHarrisList/EBR", &cfg, pool)
        }
        (DataStructure::ListWf, Scheme::Ibr) => {
            sweep_pair::<MlIbr, WflIbr>("HarrisMichaelList/IBR", "WfHarrisList/IBR", &cfg, pool)
        }
        (DataStructure::ListWf, Scheme::Hyaline) => sweep_pair::<MlHy, WflHy>(
            "HarrisMichaelList/HYALINE",
            "WfHarrisList/HYALINE",
            &cfg,
            pool,
        ),
        (DataStructure::ListWf, _) => unreachable!("rejected during argument validation"),

        (DataStructure::Tree, Scheme::Nr) => sweep_single::<NtNr>("NatarajanTree/NR", &cfg, pool),
        (DataStructure::Tree, Scheme::Ebr) => {
            sweep_single::<NtEbr>("NatarajanTree/EBR", &cfg, pool)
        }
        (DataStructure::Tree, Scheme::Ibr) => {
            sweep_single::<NtIbr>("NatarajanTree/IBR", &cfg, pool)
        }
        (DataStructure::Tree, Scheme::Hyaline) => {
            sweep_single::<NtHy>("NatarajanTree/HYALINE", &cfg, pool)
        }
        (DataStructure::Tree, Scheme::Hp) => {
            sweep_single::<HntHp>("NatarajanTree/HP", &cfg, pool)
        }
        (DataStructure::Tree, Scheme::He) => {
            sweep_single::<HntHe>("NatarajanTree/HE", &cfg, pool)
        }
    }
}
