//! Inner/outer relaxation of one branch.
//!
//! One inner step places every boundary node by Snell's law (the sweep
//! direction alternates with the step parity) and then bends every segment.
//! The inner loop ends when the travel time stops changing; the outer loop
//! then doubles node density until the time is stable and the points are
//! dense enough.

use crate::cfg::{
    RayCtx, FORCE_BRENTS_MAX_LAYER, MAX_BRANCH_NODES, MAX_INCREASING_TT, MAX_INNER_ITERATIONS,
    MAX_OUTER_ITERATIONS, MAX_TT_FLIP_FLOPS, RELAXED_INNER_AFTER,
};
use crate::error::{BenderError, Result};
use crate::geometry::{unit_and_len, Vec3};
use crate::node::chord_point;
use crate::segment::{
    check_reflection, is_middle_only_active_node, update_ray_type, Mesh, RayType, SegmentId,
    SegmentKind,
};
use crate::snell::{snells_law, Anchors, Direction};

use super::types::{Branch, BranchKind, BranchMetrics, LoopState};

/// Down-going boundary nodes: the first node of every segment but the first.
/// `backward` sweeps from the deep end up.
fn relax_down(
    mesh: &mut Mesh,
    ids: &[SegmentId],
    anchors: &Anchors,
    ctx: &RayCtx,
    backward: bool,
    force_brents: bool,
) -> Result<()> {
    let n = ids.len();
    let order: Vec<usize> = if backward {
        (1..n).rev().collect()
    } else {
        (1..n).collect()
    };
    for i in order {
        let node = mesh.seg(ids[i]).first();
        snells_law(mesh, ids[i], node, Direction::Down, anchors, ctx, force_brents)?;
    }
    Ok(())
}

/// Up-going boundary nodes: the last node of every segment but the last.
/// `backward` sweeps from the shallow end down.
fn relax_up(
    mesh: &mut Mesh,
    ids: &[SegmentId],
    anchors: &Anchors,
    ctx: &RayCtx,
    backward: bool,
    force_brents: bool,
) -> Result<()> {
    let n = ids.len();
    let order: Vec<usize> = if backward {
        (0..n.saturating_sub(1)).rev().collect()
    } else {
        (0..n.saturating_sub(1)).collect()
    };
    for i in order {
        let node = mesh.seg(ids[i]).last();
        snells_law(mesh, ids[i], node, Direction::Up, anchors, ctx, force_brents)?;
    }
    Ok(())
}

impl Branch {
    /// Snell placement of every boundary node of the branch.
    pub(crate) fn enforce_snells_law(&self, mesh: &mut Mesh, ctx: &RayCtx, even: bool) -> Result<()> {
        let anchors = self.anchors;
        match self.kind {
            BranchKind::DownGoing => relax_down(mesh, &self.down, &anchors, ctx, even, false),
            BranchKind::UpGoing => relax_up(mesh, &self.up, &anchors, ctx, even, false),
            BranchKind::TopSideReflection => {
                if let Some(turn) = self.turn {
                    let middle = mesh.seg(turn).second();
                    snells_law(mesh, turn, middle, Direction::Reflection, &anchors, ctx, false)?;
                }
                if even {
                    relax_up(mesh, &self.up, &anchors, ctx, false, false)?;
                    relax_down(mesh, &self.down, &anchors, ctx, true, false)
                } else {
                    relax_down(mesh, &self.down, &anchors, ctx, true, false)?;
                    relax_up(mesh, &self.up, &anchors, ctx, false, false)
                }
            }
            BranchKind::Bottom => self.enforce_bottom(mesh, ctx, even),
        }
    }

    fn enforce_bottom(&self, mesh: &mut Mesh, ctx: &RayCtx, even: bool) -> Result<()> {
        let Some(turn) = self.turn else {
            return Ok(());
        };
        let anchors = self.anchors;
        let ends = (mesh.nodes.pos(anchors.first), mesh.nodes.pos(anchors.last));
        check_reflection(mesh, turn, ctx, ends);
        if self.down.is_empty() && self.up.is_empty() {
            return Ok(());
        }
        let force = self
            .level
            .is_some_and(|l| l.major_layer() <= FORCE_BRENTS_MAX_LAYER);

        let up_side = |mesh: &mut Mesh, up: &[SegmentId]| -> Result<()> {
            if up.is_empty() {
                return Ok(());
            }
            let node = mesh.seg(turn).last();
            snells_law(mesh, turn, node, Direction::Up, &anchors, ctx, force)?;
            relax_up(mesh, up, &anchors, ctx, false, force)
        };
        let down_side = |mesh: &mut Mesh, down: &[SegmentId]| -> Result<()> {
            if down.is_empty() {
                return Ok(());
            }
            let node = mesh.seg(turn).first();
            snells_law(mesh, turn, node, Direction::Down, &anchors, ctx, force)?;
            relax_down(mesh, down, &anchors, ctx, true, force)
        };
        if even {
            up_side(mesh, &self.up)?;
            down_side(mesh, &self.down)
        } else {
            down_side(mesh, &self.down)?;
            up_side(mesh, &self.up)
        }
    }

    fn bend(&self, mesh: &mut Mesh, ctx: &RayCtx) {
        for id in self.segments() {
            mesh.bend(id, ctx);
        }
    }

    pub(crate) fn relax(&mut self, mesh: &mut Mesh, ctx: &RayCtx, even: bool) -> Result<()> {
        self.enforce_snells_law(mesh, ctx, even)?;
        self.bend(mesh, ctx);
        Ok(())
    }

    /// Travel time, path length and point count at the current geometry.
    pub(crate) fn measure(&self, mesh: &mut Mesh, ctx: &RayCtx) -> BranchMetrics {
        let mut m = BranchMetrics {
            n_points: 1,
            ..BranchMetrics::default()
        };
        let ids: Vec<SegmentId> = self.timed_segments(mesh).collect();
        for id in ids {
            m.travel_time += mesh.travel_time(id, ctx.model);
            m.path_length += mesh.path_length(id, ctx.model);
            m.n_points += mesh.seg(id).nodes.len().saturating_sub(1);
        }
        m
    }

    pub(crate) fn evaluate(&mut self, mesh: &mut Mesh, ctx: &RayCtx) -> BranchMetrics {
        self.metrics = self.measure(mesh, ctx);
        self.metrics
    }

    /// Reclassify the bottom segment. An invalid branch stays invalid.
    pub(crate) fn evaluate_ray_type(&self, mesh: &mut Mesh, ctx: &RayCtx) {
        let Some(turn) = self.turn.filter(|_| self.kind == BranchKind::Bottom) else {
            return;
        };
        if mesh.seg(turn).ray_type() == RayType::Invalid {
            return;
        }
        let Mesh { nodes, segs } = mesh;
        update_ray_type(&mut segs[turn.0], nodes, ctx);
    }

    fn is_middle_only_active_node(&self, mesh: &Mesh, ctx: &RayCtx) -> bool {
        self.turn
            .filter(|_| self.kind == BranchKind::Bottom)
            .is_some_and(|t| is_middle_only_active_node(mesh.seg(t), &mesh.nodes, ctx))
    }

    pub(crate) fn invalidate(&self, mesh: &mut Mesh) {
        let Some(turn) = self.turn else {
            return;
        };
        if let Some(b) = mesh.seg_mut(turn).bottom_state_mut() {
            b.ray_type = RayType::Invalid;
        }
    }

    /// Double the nodes of every segment whose spacing exceeds half the
    /// branch's mean point spacing.
    pub(crate) fn double_nodes(&mut self, mesh: &mut Mesh, ctx: &RayCtx) {
        let threshold = self.measure(mesh, ctx).point_spacing() / 2.0;
        for id in self.ids() {
            mesh.double_nodes(id, ctx, threshold);
        }
        self.evaluate(mesh, ctx);
    }

    pub(crate) fn outer_before_inner(&mut self) -> Result<()> {
        if self.state.outer_converged {
            return Ok(());
        }
        self.state.n_outer += 1;
        if self.state.n_outer > MAX_OUTER_ITERATIONS {
            return Err(BenderError::fatal("too many iterations in outer loop"));
        }
        Ok(())
    }

    pub(crate) fn inner_initialize(&mut self) {
        if self.state.outer_converged {
            return;
        }
        let st = &mut self.state;
        st.inner_converged = false;
        st.dt_inner = 0.0;
        st.tt_inner = 0.0;
        st.n_inner = 0;
        st.n_increasing = 0;
        st.n_flipflop = 0;
    }

    /// One inner step. `fastest` says whether this branch currently
    /// represents its leg; only then may travel-time oscillation double nodes.
    /// Returns whether the inner loop is done.
    pub(crate) fn inner(&mut self, mesh: &mut Mesh, ctx: &RayCtx, fastest: bool) -> Result<bool> {
        if self.state.inner_converged {
            return Ok(true);
        }
        self.state.n_inner += 1;
        if let Err(e) = ctx.check_deadline() {
            self.invalidate(mesh);
            return Err(e);
        }
        if self.state.n_increasing > MAX_INCREASING_TT {
            self.state.n_increasing = 0;
            self.double_nodes(mesh, ctx);
        }
        if self.state.n_inner > MAX_INNER_ITERATIONS {
            return Err(BenderError::fatal("too many iterations in inner loop"));
        }

        self.relax(mesh, ctx, self.state.n_inner % 2 == 0)?;
        let tt = self.evaluate(mesh, ctx).travel_time;
        self.evaluate_ray_type(mesh, ctx);

        let tol = ctx.cfg.tt_tolerance;
        let st = &mut self.state;
        st.dt_inner = (st.tt_inner - tt).abs();
        st.inner_converged = (st.n_inner > 2 && st.dt_inner < tol)
            || (st.n_inner > RELAXED_INNER_AFTER && st.dt_inner < 3.0 * tol);
        let flipped = if st.tt_inner < tt {
            st.n_increasing += 1;
            std::mem::replace(&mut st.tt_sign, false)
        } else {
            !std::mem::replace(&mut st.tt_sign, true)
        };
        st.tt_inner = tt;
        if flipped {
            st.n_flipflop += 1;
            if st.n_flipflop > MAX_TT_FLIP_FLOPS {
                st.n_flipflop = 0;
                if fastest {
                    self.double_nodes(mesh, ctx);
                }
            }
        }

        let done = self.state.inner_converged || self.is_invalid(mesh);
        if ctx.cfg.verbosity > 2 && !done {
            self.log_row(mesh, ctx, "inner");
        }
        Ok(done)
    }

    /// Close one outer step. Returns whether the outer loop is done.
    pub(crate) fn outer_after_inner(&mut self, mesh: &mut Mesh, ctx: &RayCtx) -> Result<bool> {
        if self.state.outer_converged {
            return Ok(true);
        }
        let m = self.evaluate(mesh, ctx);
        let st = &mut self.state;
        st.dt_outer = (st.tt_outer - m.travel_time).abs();
        st.outer_converged =
            st.dt_outer < ctx.cfg.tt_tolerance && m.point_spacing() < ctx.cfg.min_node_spacing;
        st.tt_outer = m.travel_time;
        let converged = st.outer_converged;

        let invalid = self.is_invalid(mesh);
        let done = converged || invalid || m.n_points > MAX_BRANCH_NODES;
        if done && !converged {
            self.close_unconverged(mesh, ctx, invalid)?;
        }

        if ctx.cfg.verbosity > 1 || (ctx.cfg.verbosity == 1 && done) {
            self.log_row(mesh, ctx, "outer");
        }
        if !done {
            self.double_nodes(mesh, ctx);
        }
        Ok(done)
    }

    /// Settle a branch whose outer loop stopped without converging. An
    /// invalid branch is fatal unless only its turning node reached the
    /// level; such a refraction is dropped instead.
    pub(crate) fn close_unconverged(
        &self,
        mesh: &mut Mesh,
        ctx: &RayCtx,
        invalid: bool,
    ) -> Result<()> {
        let middle_only = self.is_middle_only_active_node(mesh, ctx);
        if invalid && !middle_only {
            return Err(BenderError::fatal("failure to converge in branch optimization"));
        }
        if middle_only && self.ray_type(mesh) == RayType::Refraction {
            self.invalidate(mesh);
        }
        Ok(())
    }

    /// A lone bend segment in a homogeneous layer is solved by its chord when
    /// the chord stays inside the layer. Moves the interior nodes onto the
    /// chord and returns true; leaves the mesh alone otherwise.
    fn settle_on_chord(&self, mesh: &mut Mesh, ctx: &RayCtx) -> bool {
        let mut ids = self.segments();
        let (Some(id), None) = (ids.next(), ids.next()) else {
            return false;
        };
        let seg = mesh.seg(id);
        if !matches!(seg.kind, SegmentKind::Bend) || !ctx.model.is_homogeneous(seg.major) {
            return false;
        }
        let (major, nodes) = (seg.major, seg.nodes.clone());
        let n = nodes.len();
        if n < 3 {
            return n == 2;
        }
        let (a, b) = (mesh.nodes.pos(nodes[0]), mesh.nodes.pos(nodes[n - 1]));
        let points: Vec<Vec3> = (1..n - 1)
            .map(|k| chord_point(&a, &b, k as f64 / (n - 1) as f64))
            .collect();
        let inside = points.iter().all(|p| {
            unit_and_len(p).is_some_and(|(u, r)| r >= ctx.model.radius_bottom(major, &u))
        });
        if !inside {
            return false;
        }
        for (&node, p) in nodes[1..n - 1].iter().zip(points) {
            mesh.nodes[node].pos = p;
        }
        mesh.seg_mut(id).invalidate();
        true
    }

    /// Run the nested loops to convergence.
    pub(crate) fn optimize(&mut self, mesh: &mut Mesh, ctx: &RayCtx) -> Result<()> {
        if self.settle_on_chord(mesh, ctx) {
            self.evaluate(mesh, ctx);
            self.state.inner_converged = true;
            self.state.outer_converged = true;
            return Ok(());
        }
        let mut done = false;
        while !done && !self.state.outer_converged {
            self.outer_before_inner()?;
            self.inner_initialize();
            while !self.inner(mesh, ctx, true)? && !self.state.inner_converged {}
            done = self.outer_after_inner(mesh, ctx)?;
        }
        Ok(())
    }

    /// Forget convergence so the loops run again from the current geometry.
    pub(crate) fn reset_state(&mut self) {
        self.state = LoopState::default();
    }

    /// Thin every segment back toward its construction density.
    pub(crate) fn reset_to_initial_node_density(&mut self, mesh: &mut Mesh) {
        for id in self.ids() {
            mesh.seg_mut(id).reset_to_initial_node_density();
        }
        self.reset_state();
    }

    fn log_row(&self, mesh: &Mesh, ctx: &RayCtx, stage: &'static str) {
        let st = &self.state;
        let m = &self.metrics;
        let level = self
            .level
            .map(|l| l.name(ctx.model))
            .unwrap_or_else(|| "NA".to_string());
        tracing::debug!(
            branch = self.kind.as_str(),
            level = %level,
            outer = st.n_outer,
            inner = st.n_inner,
            tt = m.travel_time,
            dt_inner = st.dt_inner,
            dt_outer = st.dt_outer,
            spacing = m.point_spacing(),
            points = m.n_points,
            ray_type = self.ray_type(mesh).as_str(),
            "{stage}"
        );
    }
}
