//! A leg between two anchors: one branch, or the candidate levels of a
//! refraction leg represented by their fastest valid branch.

use crate::bottom_levels::BottomLevels;
use crate::branch::{Branch, BranchMetrics};
use crate::cfg::RayCtx;
use crate::error::Result;
use crate::segment::Mesh;

#[derive(Clone, Debug)]
pub(crate) enum Leg {
    Branch(Branch),
    Levels(BottomLevels),
}

impl Leg {
    /// Branch representing the leg; `None` once every level is invalid.
    pub(crate) fn fastest(&self) -> Option<&Branch> {
        match self {
            Leg::Branch(b) => Some(b),
            Leg::Levels(l) => l.fastest(),
        }
    }

    pub(crate) fn valid_levels(&self, mesh: &Mesh) -> usize {
        match self {
            Leg::Branch(b) => usize::from(!b.is_invalid(mesh)),
            Leg::Levels(l) => l.valid().count(),
        }
    }

    pub(crate) fn metrics(&self) -> BranchMetrics {
        self.fastest().map(|b| b.metrics).unwrap_or_default()
    }

    pub(crate) fn inner_converged(&self) -> bool {
        self.fastest().is_some_and(|b| b.state.inner_converged)
    }

    pub(crate) fn outer_converged(&self) -> bool {
        self.fastest().is_some_and(|b| b.state.outer_converged)
    }

    pub(crate) fn dt_outer(&self) -> f64 {
        self.fastest().map(|b| b.state.dt_outer).unwrap_or(0.0)
    }

    pub(crate) fn outer_before_inner(&mut self, mesh: &Mesh) -> Result<()> {
        match self {
            Leg::Branch(b) => b.outer_before_inner(),
            Leg::Levels(l) => l.outer_before_inner(mesh),
        }
    }

    pub(crate) fn inner_initialize(&mut self) {
        match self {
            Leg::Branch(b) => b.inner_initialize(),
            Leg::Levels(l) => l.inner_initialize(),
        }
    }

    pub(crate) fn inner(&mut self, mesh: &mut Mesh, ctx: &RayCtx) -> Result<bool> {
        match self {
            Leg::Branch(b) => b.inner(mesh, ctx, true),
            Leg::Levels(l) => l.inner(mesh, ctx),
        }
    }

    pub(crate) fn outer_after_inner(&mut self, mesh: &mut Mesh, ctx: &RayCtx) -> Result<bool> {
        match self {
            Leg::Branch(b) => b.outer_after_inner(mesh, ctx),
            Leg::Levels(l) => l.outer_after_inner(mesh, ctx),
        }
    }

    pub(crate) fn optimize(&mut self, mesh: &mut Mesh, ctx: &RayCtx) -> Result<()> {
        match self {
            Leg::Branch(b) => b.optimize(mesh, ctx),
            Leg::Levels(l) => l.optimize(mesh, ctx),
        }
    }

    pub(crate) fn reset_state(&mut self) {
        match self {
            Leg::Branch(b) => b.reset_state(),
            Leg::Levels(l) => l.reset_state(),
        }
    }

    pub(crate) fn reset_to_initial_node_density(&mut self, mesh: &mut Mesh, ctx: &RayCtx) {
        match self {
            Leg::Branch(b) => {
                b.reset_to_initial_node_density(mesh);
                b.evaluate(mesh, ctx);
            }
            Leg::Levels(l) => l.reset_to_initial_node_density(mesh, ctx),
        }
    }
}
