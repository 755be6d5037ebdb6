//! Candidate turning levels of one refraction leg.
//!
//! Purpose
//! - Build one bottom branch per level of a [`LevelSet`], deepest first, each
//!   seeded with the pierce points of the branch built just below it.
//! - Step every level in lock step and keep the valid ones sorted by travel
//!   time. The fastest valid level represents the leg.
//!
//! Why this design
//! - Levels share the ray's [`Mesh`] and its anchor nodes; only the segments
//!   differ. A bounce point moved by the ray is therefore seen by every level.
//! - Validation runs after every inner and outer stage because a level can
//!   change its classification (refraction, reflection, diffraction) while it
//!   relaxes.

use crate::branch::{self, BottomPlan, Branch};
use crate::cfg::RayCtx;
use crate::error::{BenderError, Result};
use crate::segment::{Mesh, RayType};

/// Bottom branches of one refraction leg, one per buildable level.
#[derive(Clone, Debug)]
pub(crate) struct BottomLevels {
    /// Built levels, deepest first.
    pub levels: Vec<Branch>,
    /// Indices into `levels` of the valid entries, fastest first.
    valid: Vec<usize>,
    /// Levels already reported as dropped.
    reported: Vec<bool>,
}

impl BottomLevels {
    /// Build every level of `plan.levels`. Levels that cannot be built are
    /// skipped; a fatal construction error aborts.
    pub(crate) fn build(mesh: &mut Mesh, ctx: &RayCtx, plan: &BottomPlan) -> Result<Self> {
        let mut levels: Vec<Branch> = Vec::with_capacity(plan.levels.len());
        for index in 0..plan.levels.len() {
            let p = BottomPlan { index, ..*plan };
            match branch::bottom(mesh, ctx, &p, levels.last()) {
                Ok(mut b) => {
                    b.evaluate(mesh, ctx);
                    b.evaluate_ray_type(mesh, ctx);
                    levels.push(b);
                }
                Err(e) if !e.is_fatal() => {
                    let name = plan
                        .levels
                        .get(index)
                        .map(|l| l.name(ctx.model))
                        .unwrap_or_default();
                    tracing::debug!(level = %name, error = %e, "bottom level skipped");
                }
                Err(e) => return Err(e),
            }
        }
        if levels.is_empty() {
            return Err(BenderError::nonfatal(
                "no bottom level of the refraction leg could be built",
            ));
        }
        let n = levels.len();
        let mut set = Self {
            levels,
            valid: Vec::new(),
            reported: vec![false; n],
        };
        set.validate(mesh, ctx)?;
        Ok(set)
    }

    pub(crate) fn fastest_index(&self) -> Option<usize> {
        self.valid.first().copied()
    }

    pub(crate) fn fastest(&self) -> Option<&Branch> {
        self.fastest_index().map(|i| &self.levels[i])
    }

    /// Valid levels, fastest first.
    pub(crate) fn valid(&self) -> impl Iterator<Item = &Branch> + '_ {
        self.valid.iter().map(|&i| &self.levels[i])
    }

    /// Reload the valid subset, apply the classification rules and sort by
    /// travel time.
    fn validate(&mut self, mesh: &Mesh, ctx: &RayCtx) -> Result<()> {
        let model = ctx.model;
        let mut valid: Vec<usize> = Vec::with_capacity(self.levels.len());
        for (i, b) in self.levels.iter().enumerate() {
            if !b.is_invalid(mesh) {
                valid.push(i);
                continue;
            }
            if !self.reported[i] {
                self.reported[i] = true;
                let name = b.level.map(|l| l.name(model)).unwrap_or_default();
                tracing::warn!(level = %name, "bottom level invalid, dropped");
            }
        }

        for w in valid.windows(2) {
            let (lo, hi) = (&self.levels[w[0]], &self.levels[w[1]]);
            if lo.ray_type(mesh) == RayType::Reflection
                && hi.ray_type(mesh) == RayType::BottomSideDiffraction
                && lo.ray_interface(mesh) == hi.ray_interface(mesh)
            {
                let name = hi
                    .ray_interface(mesh)
                    .map(|l| l.name(model))
                    .unwrap_or_default();
                return Err(BenderError::fatal(format!(
                    "reflection followed by a bottom side diffraction along {name}"
                )));
            }
        }

        valid.retain(|&i| {
            let b = &self.levels[i];
            let major = b.ray_interface(mesh).is_some_and(|l| l.is_major_interface());
            major
                || !matches!(
                    b.ray_type(mesh),
                    RayType::TopSideDiffraction | RayType::Reflection
                )
        });
        valid.sort_by(|&a, &b| {
            self.levels[a]
                .metrics
                .travel_time
                .total_cmp(&self.levels[b].metrics.travel_time)
        });
        self.valid = valid;
        Ok(())
    }

    fn require_fastest(&self) -> Result<()> {
        if self.valid.is_empty() {
            return Err(BenderError::nonfatal("every bottom level is invalid"));
        }
        Ok(())
    }

    pub(crate) fn outer_before_inner(&mut self, mesh: &Mesh) -> Result<()> {
        for b in self.levels.iter_mut().filter(|b| !b.is_invalid(mesh)) {
            b.outer_before_inner()?;
        }
        Ok(())
    }

    pub(crate) fn inner_initialize(&mut self) {
        for b in &mut self.levels {
            b.inner_initialize();
        }
    }

    /// One inner step of every level. Done when every level is done.
    pub(crate) fn inner(&mut self, mesh: &mut Mesh, ctx: &RayCtx) -> Result<bool> {
        let fastest = self.fastest_index();
        let mut done = true;
        for (i, b) in self.levels.iter_mut().enumerate() {
            if b.is_invalid(mesh) {
                continue;
            }
            match b.inner(mesh, ctx, Some(i) == fastest) {
                Ok(d) => done &= d,
                Err(e @ BenderError::NonFatal(_)) => {
                    tracing::debug!(error = %e, "bottom level failed its inner step");
                    b.invalidate(mesh);
                }
                Err(e) => return Err(e),
            }
        }
        self.validate(mesh, ctx)?;
        self.require_fastest()?;
        Ok(done)
    }

    /// Close one outer step of every level. Done when every level is done.
    pub(crate) fn outer_after_inner(&mut self, mesh: &mut Mesh, ctx: &RayCtx) -> Result<bool> {
        let mut done = true;
        for b in self.levels.iter_mut() {
            if b.is_invalid(mesh) {
                continue;
            }
            done &= b.outer_after_inner(mesh, ctx)?;
        }
        self.validate(mesh, ctx)?;
        self.require_fastest()?;
        Ok(done)
    }

    /// Run the lock-step loops until every level is done.
    pub(crate) fn optimize(&mut self, mesh: &mut Mesh, ctx: &RayCtx) -> Result<()> {
        loop {
            self.outer_before_inner(mesh)?;
            self.inner_initialize();
            while !self.inner(mesh, ctx)? {}
            if self.outer_after_inner(mesh, ctx)? {
                return Ok(());
            }
        }
    }

    pub(crate) fn reset_state(&mut self) {
        for b in &mut self.levels {
            b.reset_state();
        }
    }

    pub(crate) fn reset_to_initial_node_density(&mut self, mesh: &mut Mesh, ctx: &RayCtx) {
        for b in &mut self.levels {
            b.reset_to_initial_node_density(mesh);
            b.evaluate(mesh, ctx);
        }
    }
}
