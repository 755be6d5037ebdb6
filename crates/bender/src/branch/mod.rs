//! Ray branches: the segment chains between two fixed anchors.
//!
//! Purpose
//! - A branch runs from one fixed node (source, receiver, or bounce point) to
//!   the next. Up- and down-going branches cross one layer per segment; bottom
//!   branches add a turning segment between a down-going and an up-going run;
//!   top-side reflection branches put a fixed three-node reflection there.
//! - Each branch carries its own inner/outer convergence state so that the
//!   levels of a bottoming leg and the branches of a multi-bounce ray can be
//!   stepped in lock step by their owners.
//!
//! Why this design
//! - One [`Branch`] struct with a [`BranchKind`] tag; the only per-kind
//!   behavior is the Snell sweep order in `enforce_snells_law`.
//! - The down run, turning segment and up run are kept as separate id lists
//!   so the sweeps can start at the turning point and walk outward.

mod build;
mod optimize;
mod types;

pub(crate) use build::{bottom, direct, down_going, top_side_reflection, up_going, BottomPlan};
pub(crate) use types::Branch;
pub use types::{BranchKind, BranchMetrics};

#[cfg(test)]
mod tests;
