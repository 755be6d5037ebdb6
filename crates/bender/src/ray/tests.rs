use super::*;
use crate::geometry::{lat_lon_deg, unit_from_lat_lon_deg};
use crate::level::{Level, LevelSet};
use crate::model::{LayeredModel, WaveType};
use crate::phase::{Event, PhaseEvent};

fn at(lon: f64, r: f64) -> Vec3 {
    unit_from_lat_lon_deg(0.0, lon) * r
}

fn two_layer() -> LayeredModel {
    LayeredModel::two_layer(6371.0, 20.0, 5.0, 8.0).unwrap()
}

fn surface_bounce(layer: usize) -> PhaseTopology {
    PhaseTopology::new(vec![
        PhaseEvent::new(Event::Source, WaveType::P),
        PhaseEvent::new(Event::BottomSideReflection { layer }, WaveType::P),
        PhaseEvent::new(Event::Receiver, WaveType::P),
    ])
    .unwrap()
}

#[test]
fn vertical_down_ray_time_is_depth_over_speed() {
    let m = two_layer();
    let cfg = BenderCfg::default();
    let phase = PhaseTopology::direct(WaveType::P);
    let mut ray = Ray::new(&m, &cfg, at(0.0, 6371.0), at(0.0, 6341.0), &phase).unwrap();
    assert_eq!(ray.status(), RayStatus::InitialRay);
    ray.optimize().unwrap();

    assert_eq!(ray.status(), RayStatus::FinalRay);
    assert!((ray.travel_time() - (20.0 / 5.0 + 10.0 / 8.0)).abs() < 1e-9);
    assert!((ray.path_length() - 30.0).abs() < 1e-9);
    assert_eq!(ray.ray_type(), RayType::Refraction);
    assert_eq!(ray.ray_type_string(), "DOWNGOING");
    assert_eq!(ray.n_points(), ray.node_positions(true).len());
    assert!((ray.max_depth() - 30.0).abs() < 1e-9);
    assert!(ray.azimuth_deg().is_none());
    assert!(ray.back_azimuth_deg().is_none());
    assert_eq!(ray.out_of_plane(), 0.0);
    assert!(ray.error().is_none());
}

#[test]
fn ends_above_the_model_are_nonfatal() {
    let m = two_layer();
    let cfg = BenderCfg::default();
    let phase = PhaseTopology::direct(WaveType::P);
    let Err(err) = Ray::new(&m, &cfg, at(0.0, 6380.0), at(1.0, 6371.0), &phase) else {
        panic!("source above the surface accepted");
    };
    assert!(!err.is_fatal());
    assert!(err.to_string().contains("Source is shallower"), "{err}");

    let Err(err) = Ray::new(&m, &cfg, at(0.0, 6360.0), at(1.0, 6372.0), &phase) else {
        panic!("receiver above the surface accepted");
    };
    assert!(err.to_string().contains("Receiver is shallower"), "{err}");
}

#[test]
fn azimuths_look_along_the_ray() {
    let m = two_layer();
    let cfg = BenderCfg::default();
    let phase = PhaseTopology::direct(WaveType::P);
    let ray = Ray::new(&m, &cfg, at(0.0, 6341.0), at(0.1, 6371.0), &phase).unwrap();
    let az = ray.azimuth_deg().unwrap();
    let baz = ray.back_azimuth_deg().unwrap();
    assert!((az - 90.0).abs() < 1e-9, "{az}");
    assert!((baz - 270.0).abs() < 1e-9, "{baz}");
    assert!(ray.out_of_plane() < 1e-9);
}

#[test]
fn bounce_leg_gets_a_connector_on_the_surface() {
    let m = two_layer();
    let cfg = BenderCfg::default();
    let ray = Ray::new(&m, &cfg, at(0.0, 6361.0), at(0.5, 6361.0), &surface_bounce(1)).unwrap();
    let path = &ray.path;
    assert_eq!(path.legs.len(), 2);
    assert_eq!(path.bounces.len(), 1);

    let bp = &path.bounces[0];
    let c = path.mesh.seg(bp.connector);
    assert_eq!(c.nodes.len(), 3);
    assert_ne!(c.nodes[0], c.nodes[1]);
    assert_ne!(c.nodes[1], c.nodes[2]);
    let p = path.mesh.nodes.pos(bp.middle(&path.mesh));
    assert!((p.norm() - 6371.0).abs() < 1e-9);
    let (_, lon) = lat_lon_deg(&(p / p.norm()));
    assert!((lon - 0.25).abs() < 1e-9, "{lon}");

    let up = path.legs[0].fastest().unwrap();
    let down = path.legs[1].fastest().unwrap();
    assert_eq!(up.anchors.last, c.nodes[0]);
    assert_eq!(down.anchors.first, c.nodes[2]);
    assert_eq!(ray.ray_type_string(), "UPGOING : DOWNGOING");
    assert_eq!(ray.ray_type(), RayType::Reflection);

    // one segment of three nodes per leg, the bounce point counted once
    assert_eq!(ray.n_points(), 5);
    assert_eq!(ray.node_positions(true).len(), 5);
    assert_eq!(ray.node_positions(false).len(), 6);
}

#[test]
fn steep_refraction_is_built_as_one_up_going_branch() {
    let m = two_layer();
    let cfg = BenderCfg::default();
    let levels = LevelSet::new(vec![
        Level::Radius {
            layer: 0,
            radius: 6345.0,
        },
        Level::top_of(0),
    ]);
    let phase = PhaseTopology::refracted(levels, WaveType::P);

    let steep = Ray::new(&m, &cfg, at(0.0, 6341.0), at(0.01, 6371.0), &phase).unwrap();
    match steep.path.legs.as_slice() {
        [Leg::Branch(b)] => assert_eq!(b.kind, BranchKind::UpGoing),
        other => panic!("expected one up-going branch, got {other:?}"),
    }

    let wide = Ray::new(&m, &cfg, at(0.0, 6366.0), at(2.0, 6366.0), &phase).unwrap();
    match wide.path.legs.as_slice() {
        [Leg::Levels(l)] => assert!(l.fastest().is_some()),
        other => panic!("expected bottom levels, got {other:?}"),
    }
}

#[test]
fn bottomed_up_going_ray_is_rejected() {
    let m = two_layer();
    let cfg = BenderCfg::default();
    let phase = PhaseTopology::direct(WaveType::P);
    let mut ray = Ray::new(&m, &cfg, at(0.0, 6341.0), at(0.5, 6371.0), &phase).unwrap();
    assert!(ray.check_depth_phase().is_ok());

    let b = ray.path.legs[0].fastest().unwrap();
    let first = b.first_segment().unwrap();
    let second = ray.path.mesh.seg(first).second();
    ray.path.mesh.nodes[second].set_radius(6340.0);
    let err = ray.check_depth_phase().unwrap_err();
    assert!(!err.is_fatal());
    assert!(err.to_string().contains("upgoing only ray has a bottom"));
}

#[test]
fn reset_returns_to_the_construction_density() {
    let m = two_layer();
    let cfg = BenderCfg::default().with_min_node_spacing(2.0);
    let phase = PhaseTopology::direct(WaveType::P);
    let mut ray = Ray::new(&m, &cfg, at(0.0, 6371.0), at(0.0, 6341.0), &phase).unwrap();
    let initial = ray.n_points();
    ray.optimize().unwrap();
    assert!(ray.n_points() > initial);

    ray.reset_to_initial_node_density();
    assert_eq!(ray.n_points(), initial);
    assert_eq!(ray.status(), RayStatus::InitialRay);
    assert!((ray.travel_time() - 5.25).abs() < 1e-9);
}

#[test]
fn expired_deadline_invalidates_the_ray() {
    let m = two_layer();
    let mut cfg = BenderCfg::default();
    cfg.max_elapsed_s = Some(1e-9);
    let levels = LevelSet::new(vec![
        Level::Radius {
            layer: 0,
            radius: 6345.0,
        },
        Level::top_of(0),
    ]);
    let phase = PhaseTopology::refracted(levels, WaveType::P);
    let mut ray = Ray::new(&m, &cfg, at(0.0, 6366.0), at(2.0, 6366.0), &phase).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let err = ray.optimize().unwrap_err();
    assert!(!err.is_fatal());
    assert_eq!(ray.status(), RayStatus::Invalid);
    assert_eq!(ray.ray_type(), RayType::Invalid);
    assert!(ray.error().is_some());
    assert_eq!(ray.info().status, RayStatus::Invalid);
}

#[test]
fn dense_points_without_convergence_are_fatal() {
    let m = two_layer();
    let cfg = BenderCfg::default();
    let ctx = RayCtx::new(&m, &cfg);
    let mut ray = Ray::new(&m, &cfg, at(0.0, 6361.0), at(0.5, 6361.0), &surface_bounce(1)).unwrap();
    assert!(!ray.path.spacing_exhausted(&ctx).unwrap());

    for leg in &mut ray.path.legs {
        if let Leg::Branch(b) = leg {
            b.metrics.path_length = 0.1;
            b.state.dt_outer = 1.0;
        }
    }
    assert!(ray.path.metrics().point_spacing() < crate::cfg::MIN_RAY_POINT_SPACING);
    let err = ray.path.spacing_exhausted(&ctx).unwrap_err();
    assert!(err.is_fatal());
    assert!(err.to_string().contains("did not converge"), "{err}");

    for leg in &mut ray.path.legs {
        if let Leg::Branch(b) = leg {
            b.state.dt_outer = 2.0 * cfg.tt_tolerance;
        }
    }
    assert!(ray.path.spacing_exhausted(&ctx).unwrap());
}

#[test]
fn depth_phase_from_the_reflecting_surface_is_nonfatal() {
    let m = two_layer();
    let cfg = BenderCfg::default();
    let phase = PhaseTopology::depth_phase(1, LevelSet::top_of(0), WaveType::P);
    let Err(err) = Ray::new(&m, &cfg, at(0.0, 6371.0), at(10.0, 6371.0), &phase) else {
        panic!("depth phase from a surface source accepted");
    };
    assert!(!err.is_fatal());
    assert!(err.to_string().contains("Source is not below"), "{err}");
    assert!(Ray::new(&m, &cfg, at(0.0, 6361.0), at(10.0, 6371.0), &phase).is_ok());

    let Err(err) = Ray::new(&m, &cfg, at(0.0, 6361.0), at(0.5, 6371.0), &surface_bounce(1)) else {
        panic!("surface bounce into a surface receiver accepted");
    };
    assert!(!err.is_fatal());
    assert!(err.to_string().contains("Receiver is not below"), "{err}");
}
