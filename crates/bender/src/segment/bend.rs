//! Um & Thurber bending of interior nodes and node doubling.
//!
//! The node is first put at the chord midpoint of its two neighbours, then
//! pushed along the component of the velocity gradient normal to the chord by
//! the closed-form arc offset
//! `rc = sqrt(rc0² + L²/(8·c·v)) − rc0`, `rc0 = (c·v + 1)/(4·c·(n·g))`,
//! where `L` spans both neighbours (hence 8 instead of 4), `c` is the mean
//! neighbour slowness and `v` the velocity at the midpoint.

use crate::cfg::{RayCtx, BOUNDARY_OFFSET, MAX_THICKNESS_ONLY_BEND, MIN_THICKNESS_NO_BEND};
use crate::model::WaveType;
use crate::node::{chord_point, NodeArena, NodeId};

use super::Segment;

/// Push `node` off the boundaries of `major` and report whether the
/// neighbours are too close together to bend.
pub(super) fn check_radius(
    major: usize,
    arena: &mut NodeArena,
    ctx: &RayCtx,
    prev: NodeId,
    node: NodeId,
    next: NodeId,
) -> bool {
    let n = &mut arena[node];
    let r = n.radius();
    let lo = n.radius_bottom(ctx.model, major);
    let hi = n.radius_top(ctx.model, major);
    if r <= lo {
        n.set_radius(lo + BOUNDARY_OFFSET);
    } else if r >= hi {
        n.set_radius(hi - BOUNDARY_OFFSET);
    }
    (arena.pos(next) - arena.pos(prev)).norm() < 1e-6
}

/// One Um & Thurber update of `node` between fixed `prev` and `next`.
pub(super) fn bend_node(
    major: usize,
    wave: WaveType,
    arena: &mut NodeArena,
    ctx: &RayCtx,
    prev: NodeId,
    node: NodeId,
    next: NodeId,
) {
    let model = ctx.model;
    let p = arena.pos(node);
    let s = model.slowness(&p, major, wave);
    if !(s > 0.0) {
        return;
    }
    // velocity gradient from the slowness gradient: ∇v = -∇s / s²
    let g = model.slowness_gradient(&p, major, wave) * (-1.0 / (s * s));
    if g.norm_squared() <= 1e-16 {
        return;
    }
    let vmid = 1.0 / s;
    let x = arena.pos(next) - arena.pos(prev);
    let xlen = x.norm();
    if xlen < 1e-6 {
        return;
    }
    let xhat = x / xlen;
    let n = g - xhat * xhat.dot(&g);
    let nlen = n.norm();
    if nlen <= 0.0 {
        return;
    }
    let n = n / nlen;
    let c = 0.5
        * (model.slowness(&arena.pos(prev), major, wave)
            + model.slowness(&arena.pos(next), major, wave));
    let rc0 = (c * vmid + 1.0) / (4.0 * c * n.dot(&g));
    let rc = (rc0 * rc0 + xlen * xlen / (8.0 * c * vmid)).sqrt() - rc0;
    if rc.is_finite() {
        arena[node].pos = p + n * rc;
    }
}

/// Place `node` at the chord midpoint, bend it as far as the local layer
/// thickness allows and keep it inside `major`.
pub(super) fn bend3(
    major: usize,
    wave: WaveType,
    arena: &mut NodeArena,
    ctx: &RayCtx,
    prev: NodeId,
    node: NodeId,
    next: NodeId,
) {
    let mid = chord_point(&arena.pos(prev), &arena.pos(next), 0.5);
    arena[node].pos = mid;
    if ctx.model.is_homogeneous(major) || check_radius(major, arena, ctx, prev, node, next) {
        return;
    }

    let thickness = arena[node].layer_thickness(ctx.model);
    if thickness <= MIN_THICKNESS_NO_BEND {
        return;
    }
    if thickness >= MAX_THICKNESS_ONLY_BEND {
        bend_node(major, wave, arena, ctx, prev, node, next);
    } else {
        let avg = arena.pos(node);
        bend_node(major, wave, arena, ctx, prev, node, next);
        let f = (thickness - MIN_THICKNESS_NO_BEND)
            / (MAX_THICKNESS_ONLY_BEND - MIN_THICKNESS_NO_BEND);
        arena[node].pos = chord_point(&avg, &arena.pos(node), f);
    }

    let n = &mut arena[node];
    let lo = n.radius_bottom(ctx.model, major);
    let hi = n.radius_top(ctx.model, major);
    let r = n.radius();
    if r < lo {
        n.set_radius(lo);
    } else if r > hi {
        n.set_radius(hi);
    }
}

/// Insert a bent midpoint after every node when the mean spacing exceeds
/// `threshold`.
pub(super) fn double_nodes(seg: &mut Segment, arena: &mut NodeArena, ctx: &RayCtx, threshold: f64) {
    if ctx.model.is_homogeneous(seg.major) || seg.nodes.len() < 2 {
        return;
    }
    if seg.spacing(arena, ctx.model) <= threshold {
        return;
    }
    let old = std::mem::take(&mut seg.nodes);
    let mut doubled = Vec::with_capacity(2 * old.len() - 1);
    doubled.push(old[0]);
    for w in old.windows(2) {
        let id = arena.duplicate(w[0]);
        arena[id].layer = seg.major;
        bend3(seg.major, seg.wave, arena, ctx, w[0], id, w[1]);
        doubled.push(id);
        doubled.push(w[1]);
    }
    seg.nodes = doubled;
    seg.invalidate();
}
