//! Curated entry points for callers that want one ray traced and reported.
//!
//! Important
//! - The building blocks stay public in their modules; this file only
//!   collects the common path: place the end points, build, optimize, report.

pub use crate::cfg::{BenderCfg, SearchMethod};
pub use crate::error::{BenderError, ErrorKind, Result};
pub use crate::level::{Level, LevelSet};
pub use crate::model::{LayerSpec, LayeredModel, VelocityModel, WaveType};
pub use crate::phase::{Event, PhaseEvent, PhaseTopology};
pub use crate::ray::{Ray, RayStatus};
pub use crate::result::{BouncePointInfo, BranchInfo, GeoPoint, RayInfo};

use crate::geometry::{unit_from_lat_lon_deg, Vec3};

/// Cartesian position (km) of a point `depth_km` below the top of the
/// outermost layer of `model`.
pub fn position(model: &dyn VelocityModel, lat_deg: f64, lon_deg: f64, depth_km: f64) -> Vec3 {
    let u = unit_from_lat_lon_deg(lat_deg, lon_deg);
    let surface = model.radius_top(model.n_layers().saturating_sub(1), &u);
    u * (surface - depth_km)
}

/// Build and optimize one ray and report it.
///
/// Construction errors and fatal optimization errors are returned. A ray
/// invalidated by a nonfatal optimization error is reported with status
/// [`RayStatus::Invalid`] and the error message.
pub fn trace_ray(
    model: &dyn VelocityModel,
    cfg: &BenderCfg,
    source: Vec3,
    receiver: Vec3,
    phase: &PhaseTopology,
) -> Result<RayInfo> {
    let mut ray = Ray::new(model, cfg, source, receiver, phase)?;
    match ray.optimize() {
        Err(e) if e.is_fatal() => Err(e),
        _ => Ok(ray.info()),
    }
}
