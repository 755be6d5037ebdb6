//! The ray-level optimization loop.
//!
//! Legs run their own inner/outer loops in lock step. Rays with bounce
//! points first shape the coarse legs for a few inner steps with the bounce
//! points frozen, then alternate one Snell move of every bounce point with
//! one inner step of every leg until the inner loops settle.

use crate::branch::BranchMetrics;
use crate::cfg::{
    RayCtx, BOUNCE_MAX_FLIP_ITERATIONS, BOUNCE_WARMUP_ITERATIONS, MIN_RAY_POINT_SPACING,
};
use crate::error::{BenderError, Result};

use super::{RayPath, RayStatus};

/// Outcome of one pass over the bounce points.
#[derive(Clone, Copy, Debug, Default)]
struct BounceStep {
    /// At least one point was moved.
    updated: bool,
    /// At least one point reversed its direction of motion.
    flipped: bool,
}

impl RayPath {
    /// Sum of the legs' metrics; shared anchors are counted once.
    pub(crate) fn metrics(&self) -> BranchMetrics {
        let mut total = BranchMetrics {
            n_points: 1,
            ..BranchMetrics::default()
        };
        for m in self.legs.iter().map(|l| l.metrics()) {
            total.travel_time += m.travel_time;
            total.path_length += m.path_length;
            total.n_points += m.n_points.saturating_sub(1);
        }
        total
    }

    fn outer_before_inner(&mut self) -> Result<()> {
        for leg in &mut self.legs {
            leg.outer_before_inner(&self.mesh)?;
        }
        Ok(())
    }

    fn inner_initialize(&mut self) {
        for leg in &mut self.legs {
            leg.inner_initialize();
        }
    }

    /// One inner step of every leg. Done when every leg is done.
    fn inner(&mut self, ctx: &RayCtx) -> Result<bool> {
        let mut done = true;
        for leg in &mut self.legs {
            done &= leg.inner(&mut self.mesh, ctx)?;
        }
        Ok(done)
    }

    fn outer_after_inner(&mut self, ctx: &RayCtx) -> Result<bool> {
        let mut done = true;
        for leg in &mut self.legs {
            done &= leg.outer_after_inner(&mut self.mesh, ctx)?;
        }
        Ok(done)
    }

    fn fast_inner_converged(&self) -> bool {
        self.legs.iter().all(|l| l.inner_converged())
    }

    fn fast_outer_converged(&self) -> bool {
        self.legs.iter().all(|l| l.outer_converged())
    }

    fn max_dt_outer(&self) -> f64 {
        self.legs.iter().map(|l| l.dt_outer()).fold(0.0, f64::max)
    }

    /// Points are too dense to double again. Fatal while the travel time
    /// is still moving by more than three tolerances.
    pub(super) fn spacing_exhausted(&self, ctx: &RayCtx) -> Result<bool> {
        if self.metrics().point_spacing() >= MIN_RAY_POINT_SPACING {
            return Ok(false);
        }
        let dt_outer = self.max_dt_outer();
        if dt_outer > 3.0 * ctx.cfg.tt_tolerance {
            return Err(BenderError::fatal(format!(
                "ray did not converge (dt_outer = {dt_outer:.3e} s) and its point \
                 spacing is below {MIN_RAY_POINT_SPACING} km"
            )));
        }
        Ok(true)
    }

    /// Move every bounce point whose neighbouring legs have not both settled.
    fn update_bounce_points(&mut self, ctx: &RayCtx) -> Result<BounceStep> {
        let mut step = BounceStep::default();
        for (i, bp) in self.bounces.iter_mut().enumerate() {
            let (Some(prev), Some(next)) = (
                self.legs.get(i).and_then(|l| l.fastest()),
                self.legs.get(i + 1).and_then(|l| l.fastest()),
            ) else {
                continue;
            };
            if prev.state.inner_converged && next.state.inner_converged {
                continue;
            }
            let (Some(prev_last), Some(next_first)) = (prev.last_segment(), next.first_segment())
            else {
                continue;
            };
            let origin = self.mesh.nodes.pos(prev.anchors.first);
            step.flipped |= bp.relax(&mut self.mesh, (prev_last, next_first), &origin, ctx)?;
            step.updated = true;
        }
        if step.updated {
            self.status = RayStatus::Snell;
        }
        Ok(step)
    }

    pub(crate) fn optimize(&mut self, ctx: &RayCtx) -> Result<()> {
        if self.bounces.is_empty() {
            self.status = RayStatus::InnerLoop;
            for leg in &mut self.legs {
                leg.optimize(&mut self.mesh, ctx)?;
            }
            return Ok(());
        }

        let mut warm_up = true;
        loop {
            self.outer_before_inner()?;
            self.inner_initialize();
            self.status = RayStatus::InnerLoop;

            // shape the coarse legs with the bounce points frozen
            if warm_up {
                for _ in 0..BOUNCE_WARMUP_ITERATIONS {
                    if self.inner(ctx)? || self.fast_inner_converged() {
                        break;
                    }
                }
                self.inner_initialize();
                warm_up = false;
            }

            let mut pass = 0usize;
            loop {
                let step = self.update_bounce_points(ctx)?;
                let done = self.inner(ctx)?;
                if done || !step.updated || (step.flipped && pass > BOUNCE_MAX_FLIP_ITERATIONS) {
                    break;
                }
                pass += 1;
            }

            self.status = RayStatus::OuterLoop;
            if self.outer_after_inner(ctx)? || self.fast_outer_converged() {
                break;
            }
            if self.spacing_exhausted(ctx)? {
                break;
            }
        }
        Ok(())
    }

    pub(crate) fn reset_state(&mut self) {
        for leg in &mut self.legs {
            leg.reset_state();
        }
    }

    pub(crate) fn reset_to_initial_node_density(&mut self, ctx: &RayCtx) {
        for leg in &mut self.legs {
            leg.reset_to_initial_node_density(&mut self.mesh, ctx);
        }
    }
}
