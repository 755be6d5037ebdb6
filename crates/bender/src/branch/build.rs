//! Initial geometry of every branch kind.
//!
//! Runs cross one layer boundary per segment. Boundary nodes are placed where
//! the straight source-receiver chord reaches the mean boundary radius below
//! the two ends, then snapped radially onto the boundary. Bottom branches
//! start their pierce points 1 % and 99 % along the arc between the anchors
//! (or copy them from the branch built for the level below) and put the
//! turning node 1 km above the level below.

use crate::cfg::{
    RayCtx, BOTTOM_MIDDLE_START_HEIGHT, BOTTOM_NODES_PER_SIDE, BOTTOM_PIERCE_FRACTIONS,
    INITIAL_SEGMENT_PARTS, MAX_BRANCH_NODES, MIN_LAYER_THICKNESS, ON_BOUNDARY_TOL,
};
use crate::error::{BenderError, Result};
use crate::geometry::{slerp, unit_and_len, Vec3};
use crate::level::{Level, LevelSet};
use crate::model::{VelocityModel, WaveType};
use crate::node::{arc_point, chord_point, Node, NodeId};
use crate::segment::{
    BottomState, Mesh, RayType, ReflectionSide, Segment, SegmentId, SegmentKind,
};
use crate::snell::Anchors;

use super::types::{Branch, BranchKind};

fn unit(mesh: &Mesh, id: NodeId) -> Vec3 {
    mesh.nodes[id].unit()
}

fn on_top(model: &dyn VelocityModel, node: &Node, layer: usize) -> bool {
    (node.radius() - node.radius_top(model, layer)).abs() <= ON_BOUNDARY_TOL
}

/// Bending segment from `from` to `to` with evenly spaced interior nodes.
fn initial_segment(
    mesh: &mut Mesh,
    ctx: &RayCtx,
    from: NodeId,
    to: NodeId,
    wave: WaveType,
) -> SegmentId {
    let major = mesh.nodes[from].layer.max(mesh.nodes[to].layer);
    let (pa, pb) = (mesh.nodes.pos(from), mesh.nodes.pos(to));
    let parts = ctx
        .cfg
        .initial_separation(major)
        .map(|sep| ((pa - pb).norm() / sep).ceil() as usize)
        .unwrap_or(0)
        .clamp(INITIAL_SEGMENT_PARTS, MAX_BRANCH_NODES);
    let mut nodes = Vec::with_capacity(parts + 1);
    nodes.push(from);
    for k in 1..parts {
        let p = arc_point(&pa, &pb, k as f64 / parts as f64);
        nodes.push(mesh.nodes.push(Node::new(p, major)));
    }
    nodes.push(to);
    mesh.push(Segment::with_kind(nodes, major, wave, SegmentKind::Bend))
}

/// `count` interior nodes evenly spaced along the arc from `a` to `b`.
fn interior_nodes(mesh: &mut Mesh, a: NodeId, b: NodeId, count: usize, layer: usize) -> Vec<NodeId> {
    let (pa, pb) = (mesh.nodes.pos(a), mesh.nodes.pos(b));
    (1..=count)
        .map(|k| {
            let p = arc_point(&pa, &pb, k as f64 / (count + 1) as f64);
            mesh.nodes.push(Node::new(p, layer))
        })
        .collect()
}

/// Segments of a monotone run from `first` to `last`, one per layer crossed.
fn run(
    mesh: &mut Mesh,
    ctx: &RayCtx,
    first: NodeId,
    last: NodeId,
    wave: WaveType,
    going_down: bool,
) -> Result<Vec<SegmentId>> {
    let model = ctx.model;
    let (a, b) = (mesh.nodes[first].layer, mesh.nodes[last].layer);
    if (going_down && b > a) || (!going_down && b < a) {
        let dir = if going_down { "down-going" } else { "up-going" };
        return Err(BenderError::nonfatal(format!(
            "{dir} branch starts in layer {a} and ends in layer {b}"
        )));
    }

    let crossings: Vec<usize> = if going_down {
        let ends_on_top = on_top(model, &mesh.nodes[last], b);
        (b..a).rev().filter(|&j| !(j == b && ends_on_top)).collect()
    } else {
        let starts_on_top = on_top(model, &mesh.nodes[first], a);
        (a..b).filter(|&j| !(j == a && starts_on_top)).collect()
    };

    let (p0, p1) = (mesh.nodes.pos(first), mesh.nodes.pos(last));
    let (u0, u1) = (unit(mesh, first), unit(mesh, last));
    let nf = 1.0 / (p1.norm() - p0.norm());
    let mut ends = Vec::with_capacity(crossings.len() + 2);
    ends.push(first);
    for j in crossings {
        let ravg = 0.5 * (model.radius_top(j, &u0) + model.radius_top(j, &u1));
        let f = nf * (ravg - p0.norm());
        let f = if f.is_finite() { f.clamp(0.0, 1.0) } else { 0.5 };
        let dir = unit_and_len(&chord_point(&p0, &p1, f))
            .map(|(u, _)| u)
            .unwrap_or(u0);
        ends.push(mesh.nodes.push(Node::on_top(model, j, &dir)));
    }
    ends.push(last);
    Ok(ends
        .windows(2)
        .map(|w| initial_segment(mesh, ctx, w[0], w[1], wave))
        .collect())
}

/// Link the branch's segments and collapse bending segments in pinched layers.
fn finish(mesh: &mut Mesh, ctx: &RayCtx, branch: Branch) -> Branch {
    let ids = branch.ids();
    mesh.chain(&ids);
    for id in ids {
        let s = mesh.seg(id);
        if !matches!(s.kind, SegmentKind::Bend) {
            continue;
        }
        let u = mesh.nodes[s.first()].unit();
        if ctx.model.layer_thickness(s.major, &u) <= MIN_LAYER_THICKNESS {
            mesh.make_thin(id);
        }
    }
    branch
}

/// Up-going run from `first` to `last`.
pub(crate) fn up_going(
    mesh: &mut Mesh,
    ctx: &RayCtx,
    first: NodeId,
    last: NodeId,
    wave: WaveType,
) -> Result<Branch> {
    let mut b = Branch::new(BranchKind::UpGoing, Anchors::single(first, last, wave));
    b.up = run(mesh, ctx, first, last, wave, false)?;
    Ok(finish(mesh, ctx, b))
}

/// Down-going run from `first` to `last`.
pub(crate) fn down_going(
    mesh: &mut Mesh,
    ctx: &RayCtx,
    first: NodeId,
    last: NodeId,
    wave: WaveType,
) -> Result<Branch> {
    let mut b = Branch::new(BranchKind::DownGoing, Anchors::single(first, last, wave));
    b.down = run(mesh, ctx, first, last, wave, true)?;
    Ok(finish(mesh, ctx, b))
}

/// Straight source-to-receiver branch, up or down by the end radii.
pub(crate) fn direct(
    mesh: &mut Mesh,
    ctx: &RayCtx,
    first: NodeId,
    last: NodeId,
    wave: WaveType,
) -> Result<Branch> {
    if mesh.nodes.radius(last) >= mesh.nodes.radius(first) {
        up_going(mesh, ctx, first, last, wave)
    } else {
        down_going(mesh, ctx, first, last, wave)
    }
}

/// Reflection off the top of `layer`, hit from above.
pub(crate) fn top_side_reflection(
    mesh: &mut Mesh,
    ctx: &RayCtx,
    first: NodeId,
    last: NodeId,
    layer: usize,
    waves: (WaveType, WaveType),
) -> Result<Branch> {
    let model = ctx.model;
    for (id, end) in [(first, "First"), (last, "Last")] {
        if mesh.nodes[id].layer <= layer {
            return Err(BenderError::nonfatal(format!(
                "{end} Point of Top Side Reflection Branch is below the reflecting {} top",
                model.layer_name(layer)
            )));
        }
    }
    let u = slerp(&unit(mesh, first), &unit(mesh, last), 0.5);
    let hit = mesh.nodes.push(Node::on_top(model, layer, &u));
    let middle = mesh.nodes.duplicate(hit);
    let leave = mesh.nodes.duplicate(hit);

    let anchors = Anchors {
        first,
        last,
        first_wave: waves.0,
        last_wave: waves.1,
    };
    let mut b = Branch::new(BranchKind::TopSideReflection, anchors);
    b.down = run(mesh, ctx, first, hit, waves.0, true)?;
    b.turn = Some(mesh.push(Segment::with_kind(
        vec![hit, middle, leave],
        layer,
        waves.1,
        SegmentKind::FixedReflection(ReflectionSide::TopSide),
    )));
    b.up = run(mesh, ctx, leave, last, waves.1, false)?;
    Ok(finish(mesh, ctx, b))
}

/// Everything needed to build the bottom branch of one level.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BottomPlan<'a> {
    pub first: NodeId,
    pub last: NodeId,
    pub levels: &'a LevelSet,
    pub index: usize,
    pub down_wave: WaveType,
    pub up_wave: WaveType,
    /// The first anchor is the ray source (and may be nudged off the level).
    pub first_is_source: bool,
    pub last_is_receiver: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum End {
    First,
    Last,
}

impl End {
    fn name(self) -> &'static str {
        match self {
            End::First => "First",
            End::Last => "Last",
        }
    }
}

/// Move an end point sitting just above a major level clear of it: the
/// source drops below the level, the receiver rises above it.
fn nudge_end(mesh: &mut Mesh, ctx: &RayCtx, id: NodeId, active: Level, end: End) -> Option<NodeId> {
    let model = ctx.model;
    let u = unit(mesh, id);
    let r_active = active.radius(model, &u);
    let height = mesh.nodes.radius(id) - r_active;
    if !active.is_major_interface() || height <= 0.0 || height > MIN_LAYER_THICKNESS {
        return None;
    }
    let delta = 2.0 * MIN_LAYER_THICKNESS + 1e-6;
    let moved = mesh.nodes.duplicate(id);
    let node = &mut mesh.nodes[moved];
    match end {
        End::First => {
            node.layer = node.layer.saturating_sub(1);
            node.set_radius(r_active - delta);
        }
        End::Last => node.set_radius(r_active + delta),
    }
    tracing::debug!(end = end.name(), height, "end point nudged off {}", active.name(model));
    Some(moved)
}

/// Radius below which a bottom branch turning at `active` may not reach: the
/// level below, but never under the bottom of the active level's layer.
fn floor_radius(model: &dyn VelocityModel, active: Level, previous: Level, u: &Vec3) -> f64 {
    previous
        .radius(model, u)
        .max(model.radius_bottom(active.major_layer(), u))
}

/// End points must lie inside the model and above the level below the active one.
fn validate_end(
    mesh: &mut Mesh,
    ctx: &RayCtx,
    id: NodeId,
    (active, previous): (Level, Level),
    end: End,
) -> Result<()> {
    let model = ctx.model;
    let top = model.n_layers().saturating_sub(1);
    let u = unit(mesh, id);
    let layer = model.interface_index(&mesh.nodes.pos(id));
    mesh.nodes[id].layer = layer.min(top);
    if layer > top && mesh.nodes.radius(id) > model.radius_top(top, &u) + ON_BOUNDARY_TOL {
        return Err(BenderError::nonfatal(format!(
            "{} Point of Bottom Branch is shallower than surface of model",
            end.name()
        )));
    }
    if mesh.nodes.radius(id) < floor_radius(model, active, previous, &u) {
        return Err(BenderError::nonfatal(format!(
            "{} Point of Bottom Branch is deeper than requested bottom layer \
             ({} point in layer {}, bottom interface {})",
            end.name(),
            end.name(),
            model.layer_name(layer.min(top)),
            previous.name(model)
        )));
    }
    Ok(())
}

/// Bottom branch turning at `plan.levels[plan.index]`. With `seed` (the
/// branch built for the level below) the pierce points of the new bottom
/// segment copy the seed's nodes on the same boundary.
pub(crate) fn bottom(
    mesh: &mut Mesh,
    ctx: &RayCtx,
    plan: &BottomPlan,
    seed: Option<&Branch>,
) -> Result<Branch> {
    let model = ctx.model;
    let Some(active) = plan.levels.get(plan.index) else {
        return Err(BenderError::nonfatal(format!(
            "bottom level {} outside a level set of {}",
            plan.index,
            plan.levels.len()
        )));
    };
    let previous = plan.levels.previous(plan.index);
    let major = active.major_layer();
    let (mut first, mut last) = (plan.first, plan.last);

    let is_deep = |mesh: &Mesh, id: NodeId| {
        mesh.nodes.radius(id) < active.radius(model, &unit(mesh, id))
    };
    let first_deep = is_deep(mesh, first);
    let last_deep = is_deep(mesh, last);

    if plan.first_is_source {
        if let Some(id) = nudge_end(mesh, ctx, first, active, End::First) {
            first = id;
        }
    }
    if plan.last_is_receiver {
        if let Some(id) = nudge_end(mesh, ctx, last, active, End::Last) {
            last = id;
        }
    }
    validate_end(mesh, ctx, first, (active, previous), End::First)?;
    validate_end(mesh, ctx, last, (active, previous), End::Last)?;

    let (u_first, u_last) = (unit(mesh, first), unit(mesh, last));
    let bottom_first = if mesh.nodes[first].layer > major {
        match seed.and_then(|s| s.last_node_at_layer(mesh, major)) {
            Some(id) => mesh.nodes.duplicate(id),
            None => {
                let u = slerp(&u_first, &u_last, BOTTOM_PIERCE_FRACTIONS.0);
                mesh.nodes.push(Node::on_top(model, major, &u))
            }
        }
    } else {
        first
    };
    let bottom_last = if mesh.nodes[last].layer > major {
        match seed.and_then(|s| s.first_node_at_layer(mesh, major)) {
            Some(id) => mesh.nodes.duplicate(id),
            None => {
                let u = slerp(&u_first, &u_last, BOTTOM_PIERCE_FRACTIONS.1);
                mesh.nodes.push(Node::on_top(model, major, &u))
            }
        }
    } else {
        last
    };

    let u_mid = slerp(&unit(mesh, bottom_first), &unit(mesh, bottom_last), 0.5);
    let r_prev = floor_radius(model, active, previous, &u_mid);
    let r_active = active.radius(model, &u_mid);
    let r_mid = (r_prev + BOTTOM_MIDDLE_START_HEIGHT).min(0.5 * (r_prev + r_active));
    let middle = mesh.nodes.push(Node::new(u_mid * r_mid, major));

    let mut nodes = vec![bottom_first];
    nodes.extend(interior_nodes(mesh, bottom_first, middle, BOTTOM_NODES_PER_SIDE, major));
    nodes.push(middle);
    nodes.extend(interior_nodes(mesh, middle, bottom_last, BOTTOM_NODES_PER_SIDE, major));
    nodes.push(bottom_last);
    let state = BottomState {
        active,
        previous,
        first_deep,
        last_deep,
        middle,
        is_reflection: false,
        ray_type: RayType::Refraction,
        ray_interface: active,
    };

    let anchors = Anchors {
        first,
        last,
        first_wave: plan.down_wave,
        last_wave: plan.up_wave,
    };
    let mut b = Branch::new(BranchKind::Bottom, anchors);
    b.level = Some(active);
    if bottom_first != first {
        b.down = run(mesh, ctx, first, bottom_first, plan.down_wave, true)?;
    }
    b.turn = Some(mesh.push(Segment::with_kind(
        nodes,
        major,
        plan.down_wave,
        SegmentKind::Bottom(state),
    )));
    if bottom_last != last {
        b.up = run(mesh, ctx, bottom_last, last, plan.up_wave, false)?;
    }
    Ok(finish(mesh, ctx, b))
}
