//! Bottom segments: the turning part of a refraction leg.
//!
//! The turning node (`middle`) is held at or below the active level and never
//! sinks below the level beneath it. When no node penetrates the active level
//! the segment collapses to a three-node reflection; a reflection whose
//! incidence angles exceed the critical angles is split open again.

use crate::cfg::{
    RayCtx, MAX_THICKNESS_ONLY_BEND, MIN_LAYER_THICKNESS, MIN_THICKNESS_NO_BEND,
    REFLECTION_DISTANCE, TOP_SIDE_DIFFRACTION_TOL,
};
use crate::geometry::{angle, GreatCircle, Vec3};
use crate::level::Level;
use crate::model::WaveType;
use crate::node::{chord_point, NodeArena, NodeId};

use super::bend::{bend_node, check_radius};
use super::{BottomState, Mesh, RayType, Segment, SegmentId, SegmentKind};

/// Radial shift (in units of the pinch-out thickness) applied to the turning
/// node when a reflection is split open.
const REFLECTION_SPLIT_DROP: f64 = 1.00001;

#[allow(clippy::too_many_arguments)]
pub(super) fn bend3(
    b: &BottomState,
    major: usize,
    wave: WaveType,
    arena: &mut NodeArena,
    ctx: &RayCtx,
    prev: NodeId,
    node: NodeId,
    next: NodeId,
) {
    let model = ctx.model;
    let mid = chord_point(&arena.pos(prev), &arena.pos(next), 0.5);
    arena[node].pos = mid;
    if model.is_homogeneous(major) || check_radius(major, arena, ctx, prev, node, next) {
        return;
    }

    if node == b.middle {
        let ra = b.active.radius(model, &arena[node].unit());
        if arena.radius(node) > ra {
            arena[node].set_radius(ra);
        }
    }

    let thickness = arena[node].layer_thickness(model);
    if thickness < MIN_THICKNESS_NO_BEND {
        return;
    }
    if thickness < MAX_THICKNESS_ONLY_BEND {
        let avg = arena.pos(node);
        bend_node(major, wave, arena, ctx, prev, node, next);
        let f = (thickness - MIN_THICKNESS_NO_BEND)
            / (MAX_THICKNESS_ONLY_BEND - MIN_THICKNESS_NO_BEND);
        arena[node].pos = chord_point(&avg, &arena.pos(node), f);
    } else {
        bend_node(major, wave, arena, ctx, prev, node, next);
    }

    let rbottom = b.previous.radius(model, &arena[node].unit());
    if arena.radius(node) < rbottom {
        arena[node].set_radius(rbottom);
    }

    if node == b.middle && !b.first_deep && !b.last_deep {
        let rtop = b.active.radius(model, &arena[node].unit());
        if arena.radius(node) > rtop {
            if !b.active.is_major_interface() {
                let z1 = (arena.radius(prev) - b.active.radius(model, &arena[prev].unit())).abs();
                let z2 = (arena.radius(next) - b.active.radius(model, &arena[next].unit())).abs();
                let f = if z1 + z2 < 1e-6 { 0.5 } else { z1 / (z1 + z2) };
                arena[node].pos = chord_point(&arena.pos(prev), &arena.pos(next), f);
            }
            let ra = b.active.radius(model, &arena[node].unit());
            arena[node].set_radius(ra);
        }
    } else {
        let rtop = arena[node].radius_top(model, major);
        if arena.radius(node) > rtop {
            arena[node].set_radius(rtop);
        }
    }
}

/// Double the down-going and up-going halves separately. Each half is split
/// when its mean spacing exceeds half the mean spacing of the whole segment.
pub(super) fn double_nodes(seg: &mut Segment, arena: &mut NodeArena, ctx: &RayCtx) {
    let Some(b) = seg.bottom_state().cloned() else {
        return;
    };
    if b.is_reflection || ctx.model.is_homogeneous(seg.major) || seg.nodes.len() < 2 {
        return;
    }
    let Some(mid) = seg.nodes.iter().position(|&id| id == b.middle) else {
        return;
    };

    let (mut l1, mut l2, mut total) = (0.0, 0.0, 0.0);
    let (mut n1, mut n2) = (0usize, 0usize);
    for (i, w) in seg.nodes.windows(2).enumerate() {
        let len = (arena.pos(w[1]) - arena.pos(w[0])).norm();
        total += len;
        if i >= mid {
            n2 += 1;
            l2 += len;
        } else {
            n1 += 1;
            l1 += len;
        }
    }
    let threshold = total / (2 * (n1 + n2)) as f64;
    if n1 > 1 {
        l1 /= n1 as f64;
    }
    if n2 > 1 {
        l2 /= n2 as f64;
    }
    let split_down = l1 > threshold;
    let split_up = l2 > threshold;
    if !split_down && !split_up {
        return;
    }

    let old = std::mem::take(&mut seg.nodes);
    let mut doubled = Vec::with_capacity(2 * old.len());
    for (i, w) in old.windows(2).enumerate() {
        doubled.push(w[0]);
        if (i < mid && split_down) || (i >= mid && split_up) {
            let id = arena.duplicate(w[0]);
            arena[id].layer = seg.major;
            bend3(&b, seg.major, seg.wave, arena, ctx, w[0], id, w[1]);
            doubled.push(id);
        }
    }
    if let Some(&last) = old.last() {
        doubled.push(last);
    }
    seg.nodes = doubled;
    seg.invalidate();
}

/// Reclassify the bottom segment from its current node positions.
pub(crate) fn update_ray_type(seg: &mut Segment, arena: &NodeArena, ctx: &RayCtx) -> RayType {
    let model = ctx.model;
    let major = seg.major;
    let interior: Vec<NodeId> = seg
        .nodes
        .get(1..seg.nodes.len().saturating_sub(1))
        .map(<[NodeId]>::to_vec)
        .unwrap_or_default();
    let Some(b) = seg.bottom_state_mut() else {
        return RayType::Refraction;
    };
    if b.is_reflection {
        b.ray_interface = b.active;
        b.ray_type = RayType::Reflection;
        return b.ray_type;
    }

    b.ray_type = RayType::Refraction;
    b.ray_interface = Level::top_of(major);
    let mut in_layer = 0;
    for id in interior {
        let n = &arena[id];
        let u = n.unit();
        let r = n.radius();
        if r >= model.radius_top(major, &u) {
            b.ray_type = RayType::BottomSideDiffraction;
            if id == b.middle {
                return b.ray_type;
            }
        } else if r <= b.previous.radius(model, &u) + TOP_SIDE_DIFFRACTION_TOL {
            b.ray_type = RayType::TopSideDiffraction;
            b.ray_interface = b.previous;
            return b.ray_type;
        }
        if r < b.active.radius(model, &u) {
            in_layer += 1;
        }
    }

    if b.first_deep || b.last_deep {
        return b.ray_type;
    }
    if in_layer == 0 {
        b.ray_interface = b.active;
        b.ray_type = RayType::Reflection;
    }
    b.ray_type
}

/// A refraction whose only node below the active level is the turning node.
pub(crate) fn is_middle_only_active_node(seg: &Segment, arena: &NodeArena, ctx: &RayCtx) -> bool {
    let Some(b) = seg.bottom_state() else {
        return false;
    };
    let Some(mid) = seg.nodes.iter().position(|&id| id == b.middle) else {
        return false;
    };
    if mid == 0 || mid + 1 >= seg.nodes.len() || b.ray_type != RayType::Refraction {
        return false;
    }
    let above = |id: NodeId| arena.radius(id) > b.active.radius(ctx.model, &arena[id].unit());
    !above(b.middle) && above(seg.nodes[mid - 1]) && above(seg.nodes[mid + 1])
}

/// Collapse the bottom segment into a reflection, or split an existing
/// reflection open when its incidence angles pass the critical angles.
///
/// `anchors` are the branch's first and last anchor positions; they orient
/// the great circle used to place the split pierce points. Returns the
/// reflection flag after the check.
pub(crate) fn check_reflection(
    mesh: &mut Mesh,
    id: SegmentId,
    ctx: &RayCtx,
    anchors: (Vec3, Vec3),
) -> bool {
    let model = ctx.model;
    let seg = mesh.seg(id);
    let Some(b) = seg.bottom_state() else {
        return false;
    };
    if seg.prev.is_none() || seg.next.is_none() {
        return false;
    }
    let (major, wave, middle, is_reflection) = (seg.major, seg.wave, b.middle, b.is_reflection);
    let (first, last) = (seg.first(), seg.last());

    let u_mid = mesh.nodes[middle].unit();
    let layer_above = model.next_layer(major, &u_mid, MIN_LAYER_THICKNESS);
    let prev = mesh
        .prev_where(id, |s| s.major == layer_above)
        .map(|s| mesh.seg(s).next_to_last());
    let next = mesh
        .next_where(id, |s| s.major == layer_above)
        .map(|s| mesh.seg(s).second());

    if is_reflection {
        let (Some(prev), Some(next)) = (prev, next) else {
            return true;
        };
        let layer_below = if model.layer_thickness(major, &u_mid) >= MIN_LAYER_THICKNESS {
            major
        } else {
            model.previous_layer(major, &u_mid, MIN_LAYER_THICKNESS)
        };
        let p_mid = mesh.nodes.pos(middle);
        let p_prev = mesh.nodes.pos(prev);
        let p_next = mesh.nodes.pos(next);

        let slow_above = model.slowness_bottom(layer_above, &u_mid, wave);
        let slow_below = model.slowness_top(layer_below, &u_mid, wave);
        let slow_prev = 0.5 * (model.slowness(&p_prev, layer_above, wave) + slow_above);
        let slow_next = 0.5 * (model.slowness(&p_next, layer_above, wave) + slow_above);
        let theta_prev = (slow_below / slow_prev).asin();
        let theta_next = (slow_below / slow_next).asin();

        let v_prev = p_prev - p_mid;
        let v_next = p_next - p_mid;
        if !(angle(&v_prev, &v_next) > theta_prev + theta_next) {
            return true;
        }
        let x_prev = v_prev.norm() * theta_prev.sin();
        let x_next = v_next.norm() * theta_next.sin();
        let slope = model.layer_normal(major, &u_mid).dot(&u_mid);
        let r_top = model.radius_top(major, &u_mid);
        let mut dist = angle(&p_prev, &p_next) * r_top / slope - x_prev - x_next;
        if dist <= REFLECTION_DISTANCE {
            return true;
        }
        let Some(gc) = GreatCircle::new(&anchors.0, &anchors.1) else {
            return true;
        };
        let f = x_prev / (x_prev + x_next);
        dist *= slope / r_top;
        let d = angle(&gc.first, &u_mid);
        let u_first = gc.point(d - dist * (1.0 - f));
        let u_last = gc.point(d + dist * f);
        mesh.nodes[first].pos = u_first * model.radius_top(major, &u_first);
        mesh.nodes[last].pos = u_last * model.radius_top(major, &u_last);
        let r_mid = mesh.nodes.radius(middle);
        mesh.nodes[middle].set_radius(r_mid - REFLECTION_SPLIT_DROP * MIN_LAYER_THICKNESS);

        let seg = mesh.seg_mut(id);
        if let SegmentKind::Bottom(b) = &mut seg.kind {
            b.is_reflection = false;
        }
        seg.invalidate();
        return false;
    }

    let u_first = mesh.nodes[first].unit();
    let u_last = mesh.nodes[last].unit();
    let crossed = GreatCircle::new(&anchors.0, &anchors.1)
        .map(|gc| u_first.cross(&u_last).dot(&gc.normal) <= 0.0)
        .unwrap_or(false);
    let close = (mesh.nodes.pos(first) - mesh.nodes.pos(last)).norm() <= REFLECTION_DISTANCE;
    if !close && !crossed {
        return false;
    }

    let height = |id: NodeId| {
        let n = &mesh.nodes[id];
        n.radius() - n.radius_top(model, major)
    };
    let f = match (prev, next) {
        (Some(p), Some(n)) => {
            let (hp, hn) = (height(p), height(n));
            if hp + hn > 1.0 {
                hp / (hp + hn)
            } else {
                0.5
            }
        }
        _ => 0.5,
    };
    let p = chord_point(&mesh.nodes.pos(first), &mesh.nodes.pos(last), f);
    mesh.nodes[middle].pos = p;
    mesh.nodes.copy(middle, first);
    mesh.nodes.copy(middle, last);

    let seg = mesh.seg_mut(id);
    seg.nodes = vec![first, middle, last];
    if let SegmentKind::Bottom(b) = &mut seg.kind {
        b.is_reflection = true;
    }
    seg.invalidate();
    true
}
