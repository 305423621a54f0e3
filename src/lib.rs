//! smrkit: safe memory reclamation engines for lock-free data structures.
//!
//! Five reclamation engines behind two protection-family traits, plus a
//! wait-free helping layer that upgrades lock-free searches to wait-free:
//!
//! - **EBR** — epoch-based reclamation with per-thread reader versions
//! - **IBR** — interval-based reclamation (2GE variant, birth/retire stamps)
//! - **HP** — hazard pointers with a re-observation protect loop
//! - **HE** — hazard eras, publishing era values instead of pointers
//! - **Hyaline** — slot-based, batch reference-counted reclamation
//! - **NoReclaim** — leaking baseline for comparison runs
//!
//! Engines that frame whole operations (`start_op`/`end_op`) implement
//! [`EpochReclaim`]; engines that publish per-pointer protection slots
//! implement [`SlotReclaim`]. Containers pick the family they are written
//! against and stay generic within it.
//!
//! All per-thread state is sharded by an integer thread slot `tid` handed to
//! every call. A `tid` must be used by at most one OS thread at a time; the
//! engines are written for the benchmark discipline where slots are assigned
//! once at spawn.
//!
//! # Example
//!
//! ```rust,ignore
//! use smrkit::{Atomic, Ebr, EpochReclaim};
//!
//! let ebr = Ebr::<MyNode>::with_threads(8);
//! ebr.start_op(tid);
//! let ptr = ebr.protect(&shared, tid);
//! // traverse safely...
//! ebr.end_op(tid);
//! ```

#![warn(missing_docs)]

mod atomic;
mod ebr;
mod he;
mod hp;
mod hyaline;
mod ibr;
mod nr;
mod reclaim;
mod wait_free;

pub use atomic::{is_marked, tag_of, untagged, with_tag, without_tag, Atomic, FLG, MARK, TAG};
pub use ebr::{Ebr, EbrHeader};
pub use he::{He, HeHeader};
pub use hp::Hp;
pub use hyaline::{Hyaline, HyalineHeader};
pub use ibr::{Ibr, IbrHeader};
pub use nr::NoReclaim;
pub use reclaim::{EpochReclaim, Retirable, SlotReclaim};
pub use wait_free::{HelpRequest, WaitFree, WF_THRESHOLD};

/// Retirement cadence shared by the epoch-stamping engines: the global
/// counter advances once every `EPOCH_FREQ * max_threads` stamped events.
pub(crate) const EPOCH_FREQ: u64 = 12;

/// How many retirements accumulate before a drain attempt.
pub(crate) const EMPTY_FREQ: u64 = 128;
