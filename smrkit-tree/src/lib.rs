//! Natarajan–Mittal lock-free external binary search tree over pluggable
//! reclamation engines.
//!
//! All real keys live at leaves; internal nodes only route. Removal is
//! two-phase: an *injection* CAS flags the parent→leaf edge, then *cleanup*
//! tags the sibling edge and splices the grandparent directly onto the
//! surviving sibling, retiring everything that became unreachable. Any
//! thread that trips over a flagged or tagged edge helps finish the
//! cleanup.
//!
//! [`NatarajanTree`] pairs the tree with an epoch-framed engine;
//! [`HazardNatarajanTree`] carries the five-slot protection dance for
//! hazard pointers and hazard eras.

mod node;
mod tree;
mod tree_hazard;

pub use node::TreeNode;
pub use tree::{
    NatarajanTree, NatarajanTreeEbr, NatarajanTreeHyaline, NatarajanTreeIbr, NatarajanTreeNr,
};
pub use tree_hazard::{HazardNatarajanTree, HazardNatarajanTreeHe, HazardNatarajanTreeHp};
