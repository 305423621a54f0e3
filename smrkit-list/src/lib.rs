//! Lock-free ordered lists over pluggable reclamation engines.
//!
//! Two list families, each in an epoch-framed and a hazard-slot flavor:
//!
//! - [`HarrisList`] / [`HazardHarrisList`] — Harris's algorithm: marked
//!   runs are skipped during traversal and unlinked in one CAS, then
//!   retired as a batch.
//! - [`MichaelList`] / [`HazardMichaelList`] — the Harris–Michael variant:
//!   every marked node is unlinked and retired as soon as it is met.
//! - [`WfHarrisList`] — the Harris list paired with the wait-free helping
//!   layer, giving searches a bounded step count under contention.
//!
//! Keys are borrowed from an embedder-owned universe (`&'k K`); the head
//! sentinel holds no key. All operations are linearizable; `insert` and
//! `remove` are lock-free, `search` is lock-free or wait-free depending on
//! the variant.

mod harris;
mod harris_hazard;
mod harris_wf;
mod michael;
mod michael_hazard;
mod node;

pub use harris::{
    HarrisList, HarrisListEbr, HarrisListHyaline, HarrisListIbr, HarrisListNr,
};
pub use harris_hazard::{HazardHarrisList, HazardHarrisListHe, HazardHarrisListHp};
pub use harris_wf::{
    WfHarrisList, WfHarrisListEbr, WfHarrisListHyaline, WfHarrisListIbr,
};
pub use michael::{
    MichaelList, MichaelListEbr, MichaelListHyaline, MichaelListIbr, MichaelListNr,
};
pub use michael_hazard::{HazardMichaelList, HazardMichaelListHe, HazardMichaelListHp};
pub use node::ListNode;
