use super::*;
use crate::cfg::{
    BenderCfg, RayCtx, MAX_INCREASING_TT, MAX_INNER_ITERATIONS, MAX_TT_FLIP_FLOPS,
    RELAXED_INNER_AFTER,
};
use crate::error::ErrorKind;
use crate::geometry::{unit_from_lat_lon_deg, GreatCircle, Vec3};
use crate::level::{Level, LevelSet};
use crate::model::{LayerSpec, LayeredModel, VelocityModel, WaveType};
use crate::node::{Node, NodeId};
use crate::segment::{Mesh, RayType, SegmentKind};
use proptest::prelude::*;

fn at(lon: f64, r: f64) -> Vec3 {
    unit_from_lat_lon_deg(0.0, lon) * r
}

/// End node on the equator, layer from its radius.
fn end_node(mesh: &mut Mesh, m: &dyn VelocityModel, lon: f64, r: f64) -> NodeId {
    let p = at(lon, r);
    let layer = m.interface_index(&p).min(m.n_layers() - 1);
    mesh.nodes.push(Node::new(p, layer))
}

fn sin_from_normal(v: Vec3, n: Vec3) -> f64 {
    let c = v.normalize().dot(&n);
    (1.0 - c * c).max(0.0).sqrt()
}

fn plan<'a>(levels: &'a LevelSet, index: usize, first: NodeId, last: NodeId) -> BottomPlan<'a> {
    BottomPlan {
        first,
        last,
        levels,
        index,
        down_wave: WaveType::P,
        up_wave: WaveType::P,
        first_is_source: true,
        last_is_receiver: true,
    }
}

#[test]
fn up_going_run_crosses_one_layer_per_segment() {
    let m = LayeredModel::simple_earth();
    let cfg = BenderCfg::default();
    let ctx = RayCtx::new(&m, &cfg);
    let mut mesh = Mesh::new();
    let src = end_node(&mut mesh, &m, 0.0, 5000.0);
    let rcv = end_node(&mut mesh, &m, 10.0, 6371.0);
    let b = up_going(&mut mesh, &ctx, src, rcv, WaveType::P).unwrap();

    assert_eq!(b.kind, BranchKind::UpGoing);
    assert!(b.down.is_empty() && b.turn.is_none());
    let majors: Vec<usize> = b.up.iter().map(|&id| mesh.seg(id).major).collect();
    assert_eq!(majors, vec![1, 2, 3]);
    let r1 = mesh.nodes.radius(mesh.seg(b.up[0]).last());
    let r2 = mesh.nodes.radius(mesh.seg(b.up[1]).last());
    assert!((r1 - 5711.0).abs() < 1e-9, "{r1}");
    assert!((r2 - 6336.0).abs() < 1e-9, "{r2}");
    for &id in &b.up {
        assert_eq!(mesh.seg(id).nodes.len(), 3);
    }
    // boundaries shared between neighbours, links in chain order
    assert_eq!(mesh.seg(b.up[0]).last(), mesh.seg(b.up[1]).first());
    assert_eq!(mesh.seg(b.up[1]).prev, Some(b.up[0]));
    assert_eq!(mesh.seg(b.up[1]).next, Some(b.up[2]));
    assert_eq!(b.top_layer(&mesh), 3);
    assert_eq!(b.bottom_layer(&mesh), 1);
}

#[test]
fn direct_branch_picks_direction_by_radius() {
    let m = LayeredModel::simple_earth();
    let cfg = BenderCfg::default();
    let ctx = RayCtx::new(&m, &cfg);
    let mut mesh = Mesh::new();
    let deep = end_node(&mut mesh, &m, 0.0, 6000.0);
    let surf = end_node(&mut mesh, &m, 5.0, 6371.0);
    let down = direct(&mut mesh, &ctx, surf, deep, WaveType::S).unwrap();
    assert_eq!(down.kind, BranchKind::DownGoing);
    let majors: Vec<usize> = down.down.iter().map(|&id| mesh.seg(id).major).collect();
    assert_eq!(majors, vec![3, 2]);
    assert!(down.down.iter().all(|&id| mesh.seg(id).wave == WaveType::S));

    let up = direct(&mut mesh, &ctx, deep, surf, WaveType::S).unwrap();
    assert_eq!(up.kind, BranchKind::UpGoing);

    let err = down_going(&mut mesh, &ctx, deep, surf, WaveType::P).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NonFatal);
}

#[test]
fn configured_separation_adds_initial_nodes() {
    let m = LayeredModel::simple_earth();
    let mut cfg = BenderCfg::default();
    cfg.initial_node_separation.insert(3, 5.0);
    let ctx = RayCtx::new(&m, &cfg);
    let mut mesh = Mesh::new();
    let src = end_node(&mut mesh, &m, 0.0, 6350.0);
    let rcv = end_node(&mut mesh, &m, 0.5, 6371.0);
    let b = up_going(&mut mesh, &ctx, src, rcv, WaveType::P).unwrap();
    assert_eq!(b.up.len(), 1);
    let len = (mesh.nodes.pos(rcv) - mesh.nodes.pos(src)).norm();
    let parts = (len / 5.0).ceil() as usize;
    assert_eq!(mesh.seg(b.up[0]).nodes.len(), parts + 1);
}

#[test]
fn vertical_ray_time_is_depth_over_speed() {
    let m = LayeredModel::two_layer(6371.0, 20.0, 5.0, 8.0).unwrap();
    let cfg = BenderCfg::default();
    let ctx = RayCtx::new(&m, &cfg);
    let mut mesh = Mesh::new();
    let src = end_node(&mut mesh, &m, 10.0, 6341.0);
    let rcv = end_node(&mut mesh, &m, 10.0, 6371.0);
    let mut b = up_going(&mut mesh, &ctx, src, rcv, WaveType::P).unwrap();
    b.optimize(&mut mesh, &ctx).unwrap();

    let expected = 10.0 / 8.0 + 20.0 / 5.0;
    assert!((b.metrics.travel_time - expected).abs() < 1e-9, "{:?}", b.metrics);
    assert!((b.metrics.path_length - 30.0).abs() < 1e-9);
    assert!(b.state.outer_converged);
    let gc = GreatCircle::new(&at(10.0, 1.0), &at(11.0, 1.0)).unwrap();
    assert!(b.out_of_plane(&mesh, &gc) < 1e-9);
}

#[test]
fn lone_homogeneous_segment_settles_on_its_chord() {
    let m = LayeredModel::new(vec![LayerSpec::constant("MANTLE", 6371.0, 8.0, 4.6).homogeneous()])
        .unwrap();
    let cfg = BenderCfg::default();
    let ctx = RayCtx::new(&m, &cfg);
    let mut mesh = Mesh::new();
    let src = end_node(&mut mesh, &m, 0.0, 6300.0);
    let rcv = end_node(&mut mesh, &m, 2.0, 6371.0);
    let mut b = up_going(&mut mesh, &ctx, src, rcv, WaveType::P).unwrap();
    assert_eq!(b.up.len(), 1);
    b.optimize(&mut mesh, &ctx).unwrap();

    let chord = (mesh.nodes.pos(rcv) - mesh.nodes.pos(src)).norm();
    assert!((b.metrics.path_length - chord).abs() < 1e-9, "{:?}", b.metrics);
    assert!((b.metrics.travel_time - chord / 8.0).abs() < 1e-9);
    assert_eq!((b.state.n_outer, b.state.n_inner), (0, 0));
    assert!(b.state.outer_converged);
}

#[test]
fn up_going_refraction_obeys_snell_after_optimize() {
    let m = LayeredModel::two_layer(6371.0, 20.0, 5.0, 8.0).unwrap();
    let cfg = BenderCfg::default().with_min_node_spacing(5.0);
    let ctx = RayCtx::new(&m, &cfg);
    let mut mesh = Mesh::new();
    let src = end_node(&mut mesh, &m, 0.0, 6331.0);
    let rcv = end_node(&mut mesh, &m, 0.3, 6371.0);
    let mut b = up_going(&mut mesh, &ctx, src, rcv, WaveType::P).unwrap();
    let straight = b.measure(&mut mesh, &ctx).travel_time;
    b.optimize(&mut mesh, &ctx).unwrap();
    assert!(b.metrics.travel_time <= straight + 1e-9);
    assert!(b.metrics.point_spacing() < 5.0);

    let lower = mesh.seg(b.up[0]);
    let x = lower.last();
    let below = mesh.nodes.pos(lower.next_to_last());
    let above = mesh.nodes.pos(mesh.seg(b.up[1]).second());
    let p = mesh.nodes.pos(x);
    assert!((p.norm() - 6351.0).abs() < 1e-6);
    let n = p.normalize();
    let sa = sin_from_normal(above - p, n);
    let sb = sin_from_normal(below - p, n);
    assert!((sa / 5.0 - sb / 8.0).abs() < 1e-3, "{sa} {sb}");

    let before = b.node_positions(&mesh, false).len();
    b.reset_to_initial_node_density(&mut mesh);
    assert!(b.up.iter().all(|&id| mesh.seg(id).nodes.len() == 3));
    assert!(b.node_positions(&mesh, false).len() < before);
    assert!(!b.state.outer_converged);
}

#[test]
fn node_positions_skip_shared_boundaries() {
    let m = LayeredModel::simple_earth();
    let cfg = BenderCfg::default();
    let ctx = RayCtx::new(&m, &cfg);
    let mut mesh = Mesh::new();
    let src = end_node(&mut mesh, &m, 0.0, 5000.0);
    let rcv = end_node(&mut mesh, &m, 10.0, 6371.0);
    let b = up_going(&mut mesh, &ctx, src, rcv, WaveType::P).unwrap();
    let all = b.node_positions(&mesh, false);
    let dedup = b.node_positions(&mesh, true);
    assert_eq!(all.len(), 9);
    assert_eq!(dedup.len(), 7);
    assert_eq!(dedup[0], mesh.nodes.pos(src));
    assert_eq!(dedup[6], mesh.nodes.pos(rcv));
}

#[test]
fn bottom_branch_construction() {
    let m = LayeredModel::simple_earth();
    let cfg = BenderCfg::default();
    let ctx = RayCtx::new(&m, &cfg);
    let mut mesh = Mesh::new();
    let src = end_node(&mut mesh, &m, 0.0, 6371.0);
    let rcv = end_node(&mut mesh, &m, 30.0, 6371.0);
    let levels = LevelSet::new(vec![Level::bottom_of(2), Level::top_of(2)]);
    let b = bottom(&mut mesh, &ctx, &plan(&levels, 1, src, rcv), None).unwrap();

    assert_eq!(b.kind, BranchKind::Bottom);
    assert_eq!(b.level, Some(Level::top_of(2)));
    assert_eq!((b.down.len(), b.up.len()), (1, 1));
    let turn = mesh.seg(b.turn.unwrap());
    assert_eq!(turn.nodes.len(), 2 * 1 + 3);
    assert_eq!(turn.major, 2);
    let state = turn.bottom_state().unwrap();
    assert_eq!(turn.nodes[2], state.middle);
    assert_eq!(state.previous, Level::bottom_of(2));
    assert!(!state.first_deep && !state.last_deep);
    assert!((mesh.nodes.radius(state.middle) - 5712.0).abs() < 1e-9);
    assert!((mesh.nodes.radius(turn.first()) - 6336.0).abs() < 1e-9);
    assert!((mesh.nodes.radius(turn.last()) - 6336.0).abs() < 1e-9);
    // bottom segment is linked to both runs
    assert_eq!(turn.prev, Some(b.down[0]));
    assert_eq!(turn.next, Some(b.up[0]));
    assert_eq!(b.ray_type(&mesh), RayType::Refraction);
    assert_eq!(b.deepest_node(&mesh), state.middle);
}

#[test]
fn seeded_bottom_branch_copies_pierce_points() {
    let m = LayeredModel::simple_earth();
    let cfg = BenderCfg::default();
    let ctx = RayCtx::new(&m, &cfg);
    let mut mesh = Mesh::new();
    let src = end_node(&mut mesh, &m, 0.0, 6371.0);
    let rcv = end_node(&mut mesh, &m, 30.0, 6371.0);
    let levels = LevelSet::new(vec![
        Level::bottom_of(2),
        Level::Radius {
            layer: 2,
            radius: 6000.0,
        },
        Level::top_of(2),
    ]);
    let seed = bottom(&mut mesh, &ctx, &plan(&levels, 1, src, rcv), None).unwrap();
    // move the seed's pierce points so the copy is observable
    let seed_turn = seed.turn.unwrap();
    let (f, l) = (mesh.seg(seed_turn).first(), mesh.seg(seed_turn).last());
    mesh.nodes[f].pos = at(4.0, 6336.0);
    mesh.nodes[l].pos = at(26.0, 6336.0);

    let b = bottom(&mut mesh, &ctx, &plan(&levels, 2, src, rcv), Some(&seed)).unwrap();
    let turn = mesh.seg(b.turn.unwrap());
    assert_ne!(turn.first(), f);
    assert_eq!(mesh.nodes.pos(turn.first()), at(4.0, 6336.0));
    assert_eq!(mesh.nodes.pos(turn.last()), at(26.0, 6336.0));
    // anchors are shared, not copied
    assert_eq!((b.anchors.first, b.anchors.last), (src, rcv));
}

#[test]
fn bottom_branch_rejects_ends_outside_the_level_range() {
    let m = LayeredModel::simple_earth();
    let cfg = BenderCfg::default();
    let ctx = RayCtx::new(&m, &cfg);
    let mut mesh = Mesh::new();
    let levels = LevelSet::new(vec![Level::bottom_of(2), Level::top_of(2)]);

    let src = end_node(&mut mesh, &m, 0.0, 6371.0);
    let deep = end_node(&mut mesh, &m, 30.0, 5000.0);
    let err = bottom(&mut mesh, &ctx, &plan(&levels, 1, src, deep), None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NonFatal);
    assert!(err.to_string().contains("Last Point of Bottom Branch is deeper"), "{err}");

    let high = mesh.nodes.push(Node::new(at(0.0, 6400.0), 3));
    let rcv = end_node(&mut mesh, &m, 30.0, 6371.0);
    let err = bottom(&mut mesh, &ctx, &plan(&levels, 1, high, rcv), None).unwrap_err();
    assert!(err.to_string().contains("First Point of Bottom Branch is shallower"), "{err}");

    let err = bottom(&mut mesh, &ctx, &plan(&levels, 7, src, rcv), None).unwrap_err();
    assert!(!err.is_fatal());
}

#[test]
fn source_just_above_major_interface_is_nudged_below() {
    let m = LayeredModel::simple_earth();
    let cfg = BenderCfg::default();
    let ctx = RayCtx::new(&m, &cfg);
    let mut mesh = Mesh::new();
    let src = end_node(&mut mesh, &m, 0.0, 6336.005);
    assert_eq!(mesh.nodes[src].layer, 3);
    let rcv = end_node(&mut mesh, &m, 30.0, 6371.0);
    let levels = LevelSet::new(vec![Level::bottom_of(2), Level::top_of(2)]);
    let b = bottom(&mut mesh, &ctx, &plan(&levels, 1, src, rcv), None).unwrap();

    let moved = b.anchors.first;
    assert_ne!(moved, src);
    assert_eq!(mesh.nodes[moved].layer, 2);
    assert!((mesh.nodes.radius(moved) - (6336.0 - 0.020001)).abs() < 1e-9);
    // the original node is untouched
    assert!((mesh.nodes.radius(src) - 6336.005).abs() < 1e-9);
    assert!(b.down.is_empty());
    assert_eq!(mesh.seg(b.turn.unwrap()).first(), moved);
}

#[test]
fn top_side_reflection_construction_and_mirror() {
    let m = LayeredModel::two_layer(6371.0, 20.0, 5.0, 8.0).unwrap();
    let cfg = BenderCfg::default().with_min_node_spacing(5.0);
    let ctx = RayCtx::new(&m, &cfg);
    let mut mesh = Mesh::new();
    let src = end_node(&mut mesh, &m, 0.0, 6361.0);
    let rcv = end_node(&mut mesh, &m, 0.5, 6371.0);
    let mut b =
        top_side_reflection(&mut mesh, &ctx, src, rcv, 0, (WaveType::P, WaveType::P)).unwrap();

    assert_eq!(b.kind, BranchKind::TopSideReflection);
    assert_eq!((b.down.len(), b.up.len()), (1, 1));
    let turn = b.turn.unwrap();
    assert!(matches!(
        mesh.seg(turn).kind,
        SegmentKind::FixedReflection(_)
    ));
    assert_eq!(mesh.seg(turn).nodes.len(), 3);
    assert_eq!(b.ray_type(&mesh), RayType::Reflection);

    b.optimize(&mut mesh, &ctx).unwrap();
    let seg = mesh.seg(turn);
    let hit = mesh.nodes.pos(seg.second());
    assert!((hit.norm() - 6351.0).abs() < 1e-6);
    assert_eq!(mesh.nodes.pos(seg.first()), hit);
    assert_eq!(mesh.nodes.pos(seg.last()), hit);
    let n = hit.normalize();
    let into = mesh.nodes.pos(mesh.seg(b.down[0]).next_to_last()) - hit;
    let out = mesh.nodes.pos(mesh.seg(b.up[0]).second()) - hit;
    let (si, so) = (sin_from_normal(into, n), sin_from_normal(out, n));
    assert!((si - so).abs() < 1e-3, "{si} {so}");
    // the fixed segment carries no time of its own
    let m2 = b.measure(&mut mesh, &ctx);
    assert_eq!(m2.n_points, b.metrics.n_points);
}

#[test]
fn top_side_reflection_needs_both_ends_above() {
    let m = LayeredModel::two_layer(6371.0, 20.0, 5.0, 8.0).unwrap();
    let cfg = BenderCfg::default();
    let ctx = RayCtx::new(&m, &cfg);
    let mut mesh = Mesh::new();
    let src = end_node(&mut mesh, &m, 0.0, 6341.0);
    let rcv = end_node(&mut mesh, &m, 0.5, 6371.0);
    let err = top_side_reflection(&mut mesh, &ctx, src, rcv, 0, (WaveType::P, WaveType::S))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NonFatal);
    assert!(err.to_string().contains("First Point"), "{err}");
}

#[test]
fn outer_loop_counts_are_capped() {
    let m = LayeredModel::simple_earth();
    let cfg = BenderCfg::default();
    let ctx = RayCtx::new(&m, &cfg);
    let mut mesh = Mesh::new();
    let src = end_node(&mut mesh, &m, 0.0, 6000.0);
    let rcv = end_node(&mut mesh, &m, 3.0, 6371.0);
    let mut b = up_going(&mut mesh, &ctx, src, rcv, WaveType::P).unwrap();
    b.state.n_outer = crate::cfg::MAX_OUTER_ITERATIONS;
    let err = b.outer_before_inner().unwrap_err();
    assert!(err.is_fatal());
    b.reset_state();
    assert!(b.outer_before_inner().is_ok());
    assert_eq!(b.state.n_outer, 1);
}

#[test]
fn inner_step_on_expired_deadline_invalidates_bottom() {
    let m = LayeredModel::simple_earth();
    let mut cfg = BenderCfg::default();
    cfg.max_elapsed_s = Some(1e-9);
    let ctx = RayCtx::new(&m, &cfg);
    let mut mesh = Mesh::new();
    let src = end_node(&mut mesh, &m, 0.0, 6371.0);
    let rcv = end_node(&mut mesh, &m, 30.0, 6371.0);
    let levels = LevelSet::new(vec![Level::bottom_of(2), Level::top_of(2)]);
    let mut b = bottom(&mut mesh, &ctx, &plan(&levels, 1, src, rcv), None).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(2));
    b.inner_initialize();
    let err = b.inner(&mut mesh, &ctx, true).unwrap_err();
    assert!(!err.is_fatal());
    assert!(b.is_invalid(&mesh));
    // invalid is sticky through reclassification
    b.evaluate_ray_type(&mut mesh, &ctx);
    assert!(b.is_invalid(&mesh));
}

/// Bottom branch whose turning node is the only node below the level.
fn middle_only_bottom(mesh: &mut Mesh, ctx: &RayCtx, levels: &LevelSet) -> Branch {
    let m = ctx.model;
    let src = end_node(mesh, m, 0.0, 6371.0);
    let rcv = end_node(mesh, m, 30.0, 6371.0);
    let b = bottom(mesh, ctx, &plan(levels, 1, src, rcv), None).unwrap();
    let turn = mesh.seg(b.turn.unwrap()).nodes.clone();
    assert_eq!(turn.len(), 5);
    for id in [turn[1], turn[3]] {
        mesh.nodes[id].set_radius(6340.0);
    }
    b
}

#[test]
fn unconverged_middle_only_refraction_is_dropped() {
    let m = LayeredModel::simple_earth();
    let cfg = BenderCfg::default();
    let ctx = RayCtx::new(&m, &cfg);
    let levels = LevelSet::new(vec![Level::bottom_of(2), Level::top_of(2)]);
    let mut mesh = Mesh::new();
    let b = middle_only_bottom(&mut mesh, &ctx, &levels);
    assert_eq!(b.ray_type(&mesh), RayType::Refraction);
    b.close_unconverged(&mut mesh, &ctx, false).unwrap();
    assert!(b.is_invalid(&mesh));
}

#[test]
fn unconverged_bottom_of_other_type_is_kept() {
    let m = LayeredModel::simple_earth();
    let cfg = BenderCfg::default();
    let ctx = RayCtx::new(&m, &cfg);
    let levels = LevelSet::new(vec![Level::bottom_of(2), Level::top_of(2)]);
    let mut mesh = Mesh::new();
    let b = middle_only_bottom(&mut mesh, &ctx, &levels);
    let turn = b.turn.unwrap();
    if let Some(s) = mesh.seg_mut(turn).bottom_state_mut() {
        s.ray_type = RayType::TopSideDiffraction;
    }
    b.close_unconverged(&mut mesh, &ctx, false).unwrap();
    assert_eq!(b.ray_type(&mesh), RayType::TopSideDiffraction);

    // an invalid branch that is not middle-only cannot be recovered
    b.invalidate(&mut mesh);
    let err = b.close_unconverged(&mut mesh, &ctx, true).unwrap_err();
    assert!(err.is_fatal());
}

fn shallow_up_going(mesh: &mut Mesh, ctx: &RayCtx) -> Branch {
    let m = ctx.model;
    let src = end_node(mesh, m, 0.0, 6331.0);
    let rcv = end_node(mesh, m, 0.3, 6371.0);
    let mut b = up_going(mesh, ctx, src, rcv, WaveType::P).unwrap();
    b.evaluate(mesh, ctx);
    b.inner_initialize();
    b
}

#[test]
fn inner_loop_stops_at_iteration_cap() {
    let m = LayeredModel::two_layer(6371.0, 20.0, 5.0, 8.0).unwrap();
    let cfg = BenderCfg::default();
    let ctx = RayCtx::new(&m, &cfg);
    let mut mesh = Mesh::new();
    let mut b = shallow_up_going(&mut mesh, &ctx);
    b.state.n_inner = MAX_INNER_ITERATIONS - 1;
    assert!(b.inner(&mut mesh, &ctx, true).is_ok());
    let err = b.inner(&mut mesh, &ctx, true).unwrap_err();
    assert!(err.is_fatal());
    assert!(err.to_string().contains("inner loop"), "{err}");
}

#[test]
fn rising_travel_time_doubles_nodes() {
    let m = LayeredModel::two_layer(6371.0, 20.0, 5.0, 8.0).unwrap();
    let cfg = BenderCfg::default();
    let ctx = RayCtx::new(&m, &cfg);
    let mut mesh = Mesh::new();
    let mut b = shallow_up_going(&mut mesh, &ctx);
    let before = b.metrics.n_points;

    b.state.n_increasing = MAX_INCREASING_TT;
    b.inner(&mut mesh, &ctx, true).unwrap();
    assert_eq!(b.metrics.n_points, before);

    b.inner_initialize();
    b.state.n_increasing = MAX_INCREASING_TT + 1;
    b.inner(&mut mesh, &ctx, true).unwrap();
    assert!(b.metrics.n_points > before, "{} {before}", b.metrics.n_points);
    assert!(b.state.n_increasing <= 1);
}

/// One inner step that reverses the travel-time trend with the flip-flop
/// counter at its limit.
fn flip_at_limit(fastest: bool) -> (usize, usize, usize) {
    let m = LayeredModel::two_layer(6371.0, 20.0, 5.0, 8.0).unwrap();
    let cfg = BenderCfg::default();
    let ctx = RayCtx::new(&m, &cfg);
    let mut mesh = Mesh::new();
    let mut b = shallow_up_going(&mut mesh, &ctx);
    let before = b.metrics.n_points;
    b.state.n_flipflop = MAX_TT_FLIP_FLOPS;
    b.state.tt_sign = false;
    b.state.tt_inner = 1e9;
    b.inner(&mut mesh, &ctx, fastest).unwrap();
    (before, b.metrics.n_points, b.state.n_flipflop)
}

#[test]
fn oscillating_travel_time_doubles_only_the_fastest_branch() {
    let (before, after, flips) = flip_at_limit(true);
    assert!(after > before, "{after} {before}");
    assert_eq!(flips, 0);

    let (before, after, flips) = flip_at_limit(false);
    assert_eq!(after, before);
    assert_eq!(flips, 0);
}

#[test]
fn travel_time_trend_change_counts_one_flip() {
    let m = LayeredModel::two_layer(6371.0, 20.0, 5.0, 8.0).unwrap();
    let cfg = BenderCfg::default();
    let ctx = RayCtx::new(&m, &cfg);
    let mut mesh = Mesh::new();
    let mut b = shallow_up_going(&mut mesh, &ctx);
    b.state.tt_sign = false;
    b.state.tt_inner = 1e9;
    b.inner(&mut mesh, &ctx, true).unwrap();
    assert_eq!(b.state.n_flipflop, 1);
    assert!(b.state.tt_sign);
}

#[test]
fn inner_tolerance_relaxes_after_many_steps() {
    let m = LayeredModel::two_layer(6371.0, 20.0, 5.0, 8.0).unwrap();
    let cfg = BenderCfg::default();
    let tol = cfg.tt_tolerance;
    let ctx = RayCtx::new(&m, &cfg);
    let mut mesh = Mesh::new();
    // a vertical ray keeps its time exactly under relaxation
    let src = end_node(&mut mesh, &m, 10.0, 6341.0);
    let rcv = end_node(&mut mesh, &m, 10.0, 6371.0);
    let mut b = up_going(&mut mesh, &ctx, src, rcv, WaveType::P).unwrap();
    let tt = b.evaluate(&mut mesh, &ctx).travel_time;

    b.inner_initialize();
    b.state.n_inner = 10;
    b.state.tt_inner = tt + 2.0 * tol;
    assert!(!b.inner(&mut mesh, &ctx, true).unwrap());
    assert!(!b.state.inner_converged);

    b.inner_initialize();
    b.state.n_inner = RELAXED_INNER_AFTER;
    b.state.tt_inner = tt + 2.0 * tol;
    assert!(b.inner(&mut mesh, &ctx, true).unwrap());
    assert!(b.state.inner_converged);

    b.inner_initialize();
    b.state.n_inner = RELAXED_INNER_AFTER;
    b.state.tt_inner = tt + 4.0 * tol;
    assert!(!b.inner(&mut mesh, &ctx, true).unwrap());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn travel_time_settles_monotonically(
        dlon in 0.05f64..1.5,
        depth in 22.0f64..60.0,
    ) {
        let m = LayeredModel::two_layer(6371.0, 20.0, 5.0, 8.0).unwrap();
        let cfg = BenderCfg::default();
        let ctx = RayCtx::new(&m, &cfg);
        let mut mesh = Mesh::new();
        let src = end_node(&mut mesh, &m, 0.0, 6371.0 - depth);
        let rcv = end_node(&mut mesh, &m, dlon, 6371.0);
        let mut b = up_going(&mut mesh, &ctx, src, rcv, WaveType::P).unwrap();

        let mut outer_times = Vec::new();
        loop {
            b.outer_before_inner().unwrap();
            b.inner_initialize();
            let mut times = Vec::new();
            let mut deltas = Vec::new();
            for _ in 0..200 {
                let done = b.inner(&mut mesh, &ctx, false).unwrap();
                times.push(b.state.tt_inner);
                deltas.push(b.state.dt_inner);
                if done {
                    break;
                }
            }
            prop_assert!(b.state.inner_converged);
            for w in times.windows(2) {
                prop_assert!(w[1] <= w[0] + 1e-9, "{times:?}");
            }
            // the first delta of a pass is measured from zero
            for w in deltas[1..].windows(2) {
                prop_assert!(w[1] <= w[0] + 1e-6, "{deltas:?}");
            }
            let done = b.outer_after_inner(&mut mesh, &ctx).unwrap();
            outer_times.push(b.state.tt_outer);
            if done {
                break;
            }
        }
        prop_assert!(b.state.outer_converged);
        for w in outer_times.windows(2) {
            prop_assert!(w[1] <= w[0] + 1e-9, "{outer_times:?}");
        }
    }
}
