//! Serializable summary of a traced ray.
//!
//! Everything here is plain data: [`crate::ray::Ray::info`] fills it from the
//! converged geometry and the CLI prints it as JSON.

use serde::{Deserialize, Serialize};

use crate::branch::BranchKind;
use crate::geometry::{lat_lon_deg, Vec3};
use crate::model::VelocityModel;
use crate::ray::RayStatus;

/// Geographic position with depth below the model surface (km).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub depth_km: f64,
}

impl GeoPoint {
    /// Position of Cartesian point `p`; depth is measured from the top of the
    /// outermost layer directly above it.
    pub fn from_pos(model: &dyn VelocityModel, p: &Vec3) -> Self {
        let r = p.norm();
        let u = if r > 0.0 { p / r } else { Vec3::z() };
        let (lat_deg, lon_deg) = lat_lon_deg(&u);
        let surface = model.radius_top(model.n_layers().saturating_sub(1), &u);
        Self {
            lat_deg,
            lon_deg,
            depth_km: surface - r,
        }
    }
}

/// One leg of the ray, as represented by its fastest branch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BranchInfo {
    pub kind: BranchKind,
    /// Turning level name of a bottom branch.
    pub level: Option<String>,
    pub ray_type: String,
    pub travel_time: f64,
    pub path_length: f64,
    pub n_points: usize,
    pub outer_iterations: usize,
    /// Inner steps of the last outer iteration.
    pub inner_iterations: usize,
    pub converged: bool,
    /// Levels of a refraction leg still valid after optimization.
    pub valid_levels: usize,
}

/// A bottom-side reflection point between two legs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BouncePointInfo {
    pub interface: String,
    pub position: GeoPoint,
    /// Snell misfit at the current position.
    pub fitness: f64,
    /// Angle (degrees) of the point out of the source-receiver plane.
    pub out_of_plane_deg: f64,
    /// Distance (km) moved since construction.
    pub total_move_km: f64,
    /// Snell moves applied.
    pub moves: usize,
    pub still_moving: bool,
}

/// Everything reported about one ray.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RayInfo {
    pub status: RayStatus,
    /// Bottom classification, or `KIND.TYPE : KIND ...` for multi-leg rays.
    pub ray_type: String,
    pub travel_time: f64,
    pub path_length: f64,
    pub n_points: usize,
    pub turning_point: GeoPoint,
    pub max_depth_km: f64,
    /// Degrees clockwise from north at the source, looking along the ray.
    pub azimuth_deg: Option<f64>,
    /// Degrees clockwise from north at the receiver, looking back at the source.
    pub back_azimuth_deg: Option<f64>,
    /// Largest distance (km) of a ray node from the source-receiver plane.
    pub out_of_plane_km: f64,
    pub branches: Vec<BranchInfo>,
    pub bounce_points: Vec<BouncePointInfo>,
    pub nodes: Vec<GeoPoint>,
    /// Message of the error that invalidated the ray.
    pub error: Option<String>,
}
