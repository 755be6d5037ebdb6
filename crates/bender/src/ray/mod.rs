//! Two-point rays: legs built from a phase topology, optimized together.
//!
//! Purpose
//! - [`Ray::new`] builds the initial geometry between a source and a
//!   receiver; [`Ray::optimize`] bends it to a stationary travel time and the
//!   accessors report travel time, path length, turning point, azimuths and
//!   the node list of the converged path.
//!
//! Why this design
//! - All legs of a ray share one [`Mesh`]. A leg is a single branch, or the
//!   bottom levels of a refraction leg represented by their fastest branch.
//!   Consecutive legs meet at bounce points owned by the ray.
//! - The ray owns its copy of [`BenderCfg`] so that [`Ray::reoptimize`] can
//!   tighten tolerances without rebuilding the geometry.
//!
//! References
//! - Um, J. & Thurber, C. (1987), BSSA 77(3), "A fast algorithm for
//!   two-point seismic ray tracing".

mod bounce;
mod build;
mod leg;
mod optimize;

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::branch::{Branch, BranchKind, BranchMetrics};
use crate::cfg::{BenderCfg, RayCtx};
use crate::error::{BenderError, Result};
use crate::geometry::{angle, azimuth, GreatCircle, Vec3};
use crate::model::VelocityModel;
use crate::node::NodeId;
use crate::phase::PhaseTopology;
use crate::result::{BouncePointInfo, BranchInfo, GeoPoint, RayInfo};
use crate::segment::{Mesh, RayType};

use bounce::BouncePoint;
use leg::Leg;

/// Where a ray is in its life cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RayStatus {
    Initialized,
    /// Geometry built, not optimized.
    InitialRay,
    /// Bounce points being moved.
    Snell,
    InnerLoop,
    OuterLoop,
    FinalRay,
    Invalid,
}

impl RayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RayStatus::Initialized => "INITIALIZED",
            RayStatus::InitialRay => "INITIAL_RAY",
            RayStatus::Snell => "SNELL",
            RayStatus::InnerLoop => "INNER_LOOP",
            RayStatus::OuterLoop => "OUTER_LOOP",
            RayStatus::FinalRay => "FINAL_RAY",
            RayStatus::Invalid => "INVALID",
        }
    }
}

/// Legs, bounce points and the mesh they live in.
#[derive(Clone, Debug)]
pub(crate) struct RayPath {
    mesh: Mesh,
    legs: Vec<Leg>,
    bounces: Vec<BouncePoint>,
    source: NodeId,
    receiver: NodeId,
    status: RayStatus,
}

impl RayPath {
    fn branches(&self) -> impl Iterator<Item = &Branch> + '_ {
        self.legs.iter().filter_map(|l| l.fastest())
    }
}

/// A ray between a source and a receiver through `model`.
pub struct Ray<'a> {
    model: &'a dyn VelocityModel,
    cfg: BenderCfg,
    started: Instant,
    path: RayPath,
    gc: Option<GreatCircle>,
    error: Option<String>,
}

impl<'a> Ray<'a> {
    /// Build the initial ray for `phase`. Positions are Cartesian km.
    pub fn new(
        model: &'a dyn VelocityModel,
        cfg: &BenderCfg,
        source: Vec3,
        receiver: Vec3,
        phase: &PhaseTopology,
    ) -> Result<Self> {
        let cfg = cfg.clone();
        let started = Instant::now();
        let ctx = RayCtx {
            model,
            cfg: &cfg,
            started,
        };
        let path = RayPath::build(&ctx, source, receiver, phase)?;
        Ok(Self {
            model,
            cfg,
            started,
            path,
            gc: GreatCircle::new(&source, &receiver),
            error: None,
        })
    }

    pub fn cfg(&self) -> &BenderCfg {
        &self.cfg
    }

    /// Bend the ray to convergence. On error the ray is flagged invalid and
    /// the error is returned.
    pub fn optimize(&mut self) -> Result<()> {
        let src = GeoPoint::from_pos(self.model, &self.source());
        tracing::info!(
            legs = self.path.legs.len(),
            bounces = self.path.bounces.len(),
            lat = src.lat_deg,
            lon = src.lon_deg,
            depth = src.depth_km,
            "ray optimization started"
        );
        let ctx = RayCtx {
            model: self.model,
            cfg: &self.cfg,
            started: self.started,
        };
        let outcome = self
            .path
            .optimize(&ctx)
            .and_then(|()| self.check_depth_phase());
        match &outcome {
            Ok(()) => self.path.status = RayStatus::FinalRay,
            Err(e) => {
                self.path.status = RayStatus::Invalid;
                self.error = Some(e.to_string());
                tracing::warn!(error = %e, "ray invalid");
            }
        }
        let m = self.metrics();
        tracing::info!(
            status = self.status().as_str(),
            travel_time = m.travel_time,
            points = m.n_points,
            elapsed_s = self.started.elapsed().as_secs_f64(),
            "ray optimization finished"
        );
        outcome
    }

    /// Optimize again from the current geometry with new convergence settings.
    pub fn reoptimize(&mut self, tt_tolerance: f64, min_node_spacing: f64) -> Result<()> {
        self.cfg.tt_tolerance = tt_tolerance;
        self.cfg.min_node_spacing = min_node_spacing;
        self.path.reset_state();
        self.started = Instant::now();
        self.error = None;
        self.optimize()
    }

    /// Thin every segment back toward its construction density, keeping the
    /// current boundary positions, and forget convergence.
    pub fn reset_to_initial_node_density(&mut self) {
        let ctx = RayCtx {
            model: self.model,
            cfg: &self.cfg,
            started: self.started,
        };
        self.path.reset_to_initial_node_density(&ctx);
        if self.path.status != RayStatus::Invalid {
            self.path.status = RayStatus::InitialRay;
        }
    }

    /// A single up-going (down-going) branch must leave its first (reach its
    /// last) node moving away from (toward) the center; otherwise it has
    /// turned and belongs to a bottoming phase.
    fn check_depth_phase(&self) -> Result<()> {
        let [leg] = self.path.legs.as_slice() else {
            return Ok(());
        };
        let Some(b) = leg.fastest() else {
            return Ok(());
        };
        let nodes = b.node_positions(&self.path.mesh, true);
        let bottomed = match (b.kind, nodes.as_slice()) {
            (BranchKind::UpGoing, [first, second, ..]) => first.norm() > second.norm(),
            (BranchKind::DownGoing, [.., before, last]) => last.norm() > before.norm(),
            _ => false,
        };
        if bottomed {
            return Err(BenderError::nonfatal("upgoing only ray has a bottom"));
        }
        Ok(())
    }

    pub fn status(&self) -> RayStatus {
        self.path.status
    }

    /// Message of the error that invalidated the last optimization.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn source(&self) -> Vec3 {
        self.path.mesh.nodes.pos(self.path.source)
    }

    pub fn receiver(&self) -> Vec3 {
        self.path.mesh.nodes.pos(self.path.receiver)
    }

    fn metrics(&self) -> BranchMetrics {
        self.path.metrics()
    }

    /// Travel time (s) summed over the legs.
    pub fn travel_time(&self) -> f64 {
        self.metrics().travel_time
    }

    /// Path length (km) summed over the legs.
    pub fn path_length(&self) -> f64 {
        self.metrics().path_length
    }

    pub fn n_points(&self) -> usize {
        self.metrics().n_points
    }

    /// Mean distance (km) between consecutive ray points.
    pub fn point_spacing(&self) -> f64 {
        self.metrics().point_spacing()
    }

    /// Classification of the ray: the bottom segment type of a single
    /// refraction leg, `Reflection` for fixed reflections and multi-leg rays.
    pub fn ray_type(&self) -> RayType {
        let mesh = &self.path.mesh;
        if self.path.status == RayStatus::Invalid
            || self
                .path
                .legs
                .iter()
                .any(|l| !l.fastest().is_some_and(|b| !b.is_invalid(mesh)))
        {
            return RayType::Invalid;
        }
        match self.path.legs.as_slice() {
            [leg] => leg
                .fastest()
                .map(|b| b.ray_type(mesh))
                .unwrap_or(RayType::Invalid),
            _ => RayType::Reflection,
        }
    }

    /// Ray type of a single bottoming leg, otherwise `KIND[.TYPE]` per leg
    /// joined by `" : "`.
    pub fn ray_type_string(&self) -> String {
        let mesh = &self.path.mesh;
        if let [leg] = self.path.legs.as_slice() {
            if let Some(b) = leg.fastest().filter(|b| b.kind == BranchKind::Bottom) {
                return b.ray_type(mesh).as_str().to_string();
            }
        }
        self.path
            .legs
            .iter()
            .map(|l| match l.fastest() {
                Some(b) if b.kind == BranchKind::Bottom => {
                    format!("{}.{}", b.kind.as_str(), b.ray_type(mesh).as_str())
                }
                Some(b) => b.kind.as_str().to_string(),
                None => RayType::Invalid.as_str().to_string(),
            })
            .collect::<Vec<_>>()
            .join(" : ")
    }

    /// Ordered ray node positions. With `dedup`, nodes shared by two
    /// segments (and collapsed reflection nodes) appear once.
    pub fn node_positions(&self, dedup: bool) -> Vec<Vec3> {
        let mut out: Vec<Vec3> = Vec::new();
        for b in self.path.branches() {
            for p in b.node_positions(&self.path.mesh, dedup) {
                if dedup && out.last().is_some_and(|q| (q - p).norm() < 1e-9) {
                    continue;
                }
                out.push(p);
            }
        }
        out
    }

    /// Deepest ray node.
    pub fn turning_point(&self) -> Vec3 {
        let mesh = &self.path.mesh;
        self.path
            .branches()
            .map(|b| b.deepest_node(mesh))
            .min_by(|&a, &b| mesh.nodes.radius(a).total_cmp(&mesh.nodes.radius(b)))
            .map(|id| mesh.nodes.pos(id))
            .unwrap_or_else(|| self.source())
    }

    /// Depth (km) of the turning point below the model surface.
    pub fn max_depth(&self) -> f64 {
        GeoPoint::from_pos(self.model, &self.turning_point()).depth_km
    }

    /// Azimuth (degrees) at the source toward the first node off its radial.
    pub fn azimuth_deg(&self) -> Option<f64> {
        let nodes = self.node_positions(true);
        let (first, rest) = nodes.split_first()?;
        rest.iter()
            .find_map(|p| azimuth(first, p))
            .map(f64::to_degrees)
    }

    /// Azimuth (degrees) at the receiver back toward the last node off its
    /// radial.
    pub fn back_azimuth_deg(&self) -> Option<f64> {
        let nodes = self.node_positions(true);
        let (last, rest) = nodes.split_last()?;
        rest.iter()
            .rev()
            .find_map(|p| azimuth(last, p))
            .map(f64::to_degrees)
    }

    /// Largest distance (km) of a ray node from the source-receiver plane;
    /// zero when source and receiver share a radial.
    pub fn out_of_plane(&self) -> f64 {
        let Some(gc) = &self.gc else {
            return 0.0;
        };
        self.path
            .branches()
            .map(|b| b.out_of_plane(&self.path.mesh, gc))
            .fold(0.0, f64::max)
    }

    /// Position, Snell misfit and motion history of every bounce point.
    pub fn bounce_points(&mut self) -> Result<Vec<BouncePointInfo>> {
        let ctx = RayCtx {
            model: self.model,
            cfg: &self.cfg,
            started: self.started,
        };
        let path = &mut self.path;
        let mut out = Vec::with_capacity(path.bounces.len());
        for (i, bp) in path.bounces.iter().enumerate() {
            let segs = path.legs[i]
                .fastest()
                .and_then(|b| b.last_segment())
                .zip(path.legs[i + 1].fastest().and_then(|b| b.first_segment()));
            let Some(segs) = segs else {
                continue;
            };
            let fitness = bp.fitness(&mut path.mesh, segs, &ctx)?;
            let p = path.mesh.nodes.pos(bp.middle(&path.mesh));
            let out_of_plane_deg = self
                .gc
                .map(|gc| angle(&gc.normal, &p).to_degrees() - 90.0)
                .unwrap_or(0.0);
            out.push(BouncePointInfo {
                interface: self.model.layer_name(bp.layer),
                position: GeoPoint::from_pos(self.model, &p),
                fitness,
                out_of_plane_deg,
                total_move_km: bp.total_move,
                moves: bp.moves,
                still_moving: bp.is_moving(),
            });
        }
        Ok(out)
    }

    /// Per-leg summaries, each from the leg's fastest branch.
    pub fn branch_infos(&self) -> Vec<BranchInfo> {
        let mesh = &self.path.mesh;
        self.path
            .legs
            .iter()
            .filter_map(|l| {
                let b = l.fastest()?;
                Some(BranchInfo {
                    kind: b.kind,
                    level: b.level.map(|lv| lv.name(self.model)),
                    ray_type: b.ray_type(mesh).as_str().to_string(),
                    travel_time: b.metrics.travel_time,
                    path_length: b.metrics.path_length,
                    n_points: b.metrics.n_points,
                    outer_iterations: b.state.n_outer,
                    inner_iterations: b.state.n_inner,
                    converged: b.state.outer_converged,
                    valid_levels: l.valid_levels(mesh),
                })
            })
            .collect()
    }

    /// Serializable summary of the ray in its current state.
    pub fn info(&mut self) -> RayInfo {
        let bounce_points = self.bounce_points().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "bounce point fitness unavailable");
            Vec::new()
        });
        let model = self.model;
        RayInfo {
            status: self.status(),
            ray_type: self.ray_type_string(),
            travel_time: self.travel_time(),
            path_length: self.path_length(),
            n_points: self.n_points(),
            turning_point: GeoPoint::from_pos(model, &self.turning_point()),
            max_depth_km: self.max_depth(),
            azimuth_deg: self.azimuth_deg(),
            back_azimuth_deg: self.back_azimuth_deg(),
            out_of_plane_km: self.out_of_plane(),
            branches: self.branch_infos(),
            bounce_points,
            nodes: self
                .node_positions(true)
                .iter()
                .map(|p| GeoPoint::from_pos(model, p))
                .collect(),
            error: self.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests;
