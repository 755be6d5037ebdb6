//! End-to-end rays through the public API, checked against closed-form
//! travel times in constant-velocity layers.

use bender::api::*;
use bender::Vec3;

fn two_layer() -> LayeredModel {
    LayeredModel::two_layer(6371.0, 20.0, 5.0, 8.0).unwrap()
}

fn head_wave_levels() -> LevelSet {
    LevelSet::new(vec![
        Level::Radius {
            layer: 0,
            radius: 6345.0,
        },
        Level::top_of(0),
    ])
}

fn rel(a: f64, b: f64) -> f64 {
    (a - b).abs() / b.abs()
}

fn sin_from_normal(v: Vec3, n: Vec3) -> f64 {
    let c = v.normalize().dot(&n);
    (1.0 - c * c).max(0.0).sqrt()
}

#[test]
fn vertical_ray_reports_depth_over_speed() {
    let m = two_layer();
    let src = position(&m, 30.0, 40.0, 0.0);
    let rcv = position(&m, 30.0, 40.0, 30.0);
    let phase = PhaseTopology::direct(WaveType::P);
    let info = trace_ray(&m, &BenderCfg::default(), src, rcv, &phase).unwrap();

    assert_eq!(info.status, RayStatus::FinalRay);
    assert!((info.travel_time - 5.25).abs() < 1e-9, "{}", info.travel_time);
    assert!((info.max_depth_km - 30.0).abs() < 1e-6);
    assert_eq!(info.nodes.len(), info.n_points);
    assert!(info.azimuth_deg.is_none());
    assert!(info.error.is_none());
}

#[test]
fn head_wave_matches_the_flat_layer_estimate() {
    let m = two_layer();
    let src = position(&m, 0.0, 0.0, 5.0);
    let rcv = position(&m, 0.0, 2.0, 5.0);
    let phase = PhaseTopology::refracted(head_wave_levels(), WaveType::P);
    let info = trace_ray(&m, &BenderCfg::default(), src, rcv, &phase).unwrap();
    assert_eq!(info.status, RayStatus::FinalRay, "{:?}", info.error);

    // interface arc at 8 km/s plus two critical legs through 15 km of the
    // 5 km/s layer
    let crit = (5.0f64 / 8.0).asin();
    let offset = 15.0 * crit.tan();
    let arc = 2.0f64.to_radians() * 6351.0 - 2.0 * offset;
    let expected = arc / 8.0 + 2.0 * 15.0 / crit.cos() / 5.0;
    assert!(rel(info.travel_time, expected) < 0.01, "{} vs {expected}", info.travel_time);

    let direct = (rcv - src).norm() / 5.0;
    assert!(info.travel_time < direct);
    // the turning chord dips below the interface
    assert!(info.max_depth_km > 20.0, "{}", info.max_depth_km);
    assert_eq!(info.ray_type, "REFRACTION");
    assert_eq!(info.branches.len(), 1);
    assert!(info.branches[0].valid_levels >= 1);

    // sin(i)/v matches on both sides of every crossing of the interface
    let pts: Vec<Vec3> = info
        .nodes
        .iter()
        .map(|g| position(&m, g.lat_deg, g.lon_deg, g.depth_km))
        .collect();
    let mut crossings = 0;
    for (i, g) in info.nodes.iter().enumerate().take(pts.len() - 1).skip(1) {
        if (g.depth_km - 20.0).abs() > 1e-6 {
            continue;
        }
        let (a, b) = (info.nodes[i - 1].depth_km, info.nodes[i + 1].depth_km);
        let (above, below) = match (a < 20.0, b < 20.0) {
            (true, false) => (pts[i - 1], pts[i + 1]),
            (false, true) => (pts[i + 1], pts[i - 1]),
            _ => continue,
        };
        let n = pts[i].normalize();
        let sa = sin_from_normal(above - pts[i], n);
        let sb = sin_from_normal(below - pts[i], n);
        assert!((sa / 5.0 - sb / 8.0).abs() < 2e-3, "node {i}: {sa} {sb}");
        crossings += 1;
    }
    assert_eq!(crossings, 2);
}

#[test]
fn vertical_ray_in_a_homogeneous_layer_needs_no_bending() {
    let m = LayeredModel::new(vec![LayerSpec::constant("MANTLE", 6371.0, 8.0, 4.6).homogeneous()])
        .unwrap();
    let src = position(&m, -12.0, 130.0, 0.0);
    let rcv = position(&m, -12.0, 130.0, 40.0);
    let phase = PhaseTopology::direct(WaveType::P);
    let info = trace_ray(&m, &BenderCfg::default(), src, rcv, &phase).unwrap();

    assert_eq!(info.status, RayStatus::FinalRay, "{:?}", info.error);
    assert!((info.travel_time - 5.0).abs() < 1e-9, "{}", info.travel_time);
    assert_eq!(info.branches.len(), 1);
    let b = &info.branches[0];
    assert!(b.converged);
    assert_eq!((b.outer_iterations, b.inner_iterations), (0, 0));
    // one straight segment
    assert_eq!(info.n_points, 3);
    for g in &info.nodes {
        assert!((g.lat_deg + 12.0).abs() < 1e-9 && (g.lon_deg - 130.0).abs() < 1e-9, "{g:?}");
    }
}

#[test]
fn swapping_the_ends_keeps_the_travel_time() {
    let m = two_layer();
    let a = position(&m, 0.0, 0.0, 5.0);
    let b = position(&m, 0.5, 1.8, 8.0);
    let phase = PhaseTopology::refracted(head_wave_levels(), WaveType::P);
    let cfg = BenderCfg::default();
    let ab = trace_ray(&m, &cfg, a, b, &phase).unwrap();
    let ba = trace_ray(&m, &cfg, b, a, &phase).unwrap();
    assert_eq!(ab.status, RayStatus::FinalRay);
    assert_eq!(ba.status, RayStatus::FinalRay);
    assert!(rel(ab.travel_time, ba.travel_time) < 1e-3);
    assert!((ab.azimuth_deg.unwrap() - ba.back_azimuth_deg.unwrap()).abs() < 1.0);
}

#[test]
fn reoptimizing_a_converged_ray_barely_moves_it() {
    let m = two_layer();
    let src = position(&m, 0.0, 0.0, 5.0);
    let rcv = position(&m, 0.0, 2.0, 5.0);
    let phase = PhaseTopology::refracted(head_wave_levels(), WaveType::P);
    let cfg = BenderCfg::default();
    let mut ray = Ray::new(&m, &cfg, src, rcv, &phase).unwrap();
    ray.optimize().unwrap();
    let tt = ray.travel_time();

    ray.reoptimize(cfg.tt_tolerance, cfg.min_node_spacing).unwrap();
    assert_eq!(ray.status(), RayStatus::FinalRay);
    assert!((ray.travel_time() - tt).abs() < 1e-2);
}

#[test]
fn surface_bounce_sits_halfway_on_the_surface() {
    let m = two_layer();
    let src = position(&m, 0.0, 0.0, 10.0);
    let rcv = position(&m, 0.0, 0.5, 10.0);
    let phase = PhaseTopology::new(vec![
        PhaseEvent::new(Event::Source, WaveType::P),
        PhaseEvent::new(Event::BottomSideReflection { layer: 1 }, WaveType::P),
        PhaseEvent::new(Event::Receiver, WaveType::P),
    ])
    .unwrap();
    let info = trace_ray(&m, &BenderCfg::default(), src, rcv, &phase).unwrap();
    assert_eq!(info.status, RayStatus::FinalRay, "{:?}", info.error);
    assert_eq!(info.ray_type, "UPGOING : DOWNGOING");

    assert_eq!(info.bounce_points.len(), 1);
    let bp = &info.bounce_points[0];
    assert_eq!(bp.interface, "UPPER");
    assert!((bp.position.lon_deg - 0.25).abs() < 0.01, "{}", bp.position.lon_deg);
    assert!(bp.position.depth_km.abs() < 1e-6);
    assert!(bp.out_of_plane_deg.abs() < 1e-3);
    assert!(bp.moves > 0);
    assert!(bp.fitness.abs() < 1e-2, "{}", bp.fitness);

    let mirror: Vec3 = position(&m, 0.0, 0.25, 0.0);
    let expected = ((mirror - src).norm() + (rcv - mirror).norm()) / 5.0;
    assert!(rel(info.travel_time, expected) < 1e-3, "{} vs {expected}", info.travel_time);
}

#[test]
fn top_side_reflection_mirrors_off_the_interface() {
    let m = two_layer();
    let src = position(&m, 0.0, 0.0, 5.0);
    let rcv = position(&m, 0.0, 1.0, 5.0);
    let phase = PhaseTopology::reflected(0, WaveType::P);
    let info = trace_ray(&m, &BenderCfg::default(), src, rcv, &phase).unwrap();
    assert_eq!(info.status, RayStatus::FinalRay, "{:?}", info.error);
    assert_eq!(info.ray_type, "TOP_SIDE_REFLECTION");

    let p = position(&m, 0.0, 0.5, 20.0);
    let expected = ((p - src).norm() + (rcv - p).norm()) / 5.0;
    assert!(rel(info.travel_time, expected) < 1e-3, "{} vs {expected}", info.travel_time);
    assert!((info.max_depth_km - 20.0).abs() < 0.1);
}
