//! Two-point seismic ray bending.
//!
//! A ray from a source to a receiver is split into branches of segments, one
//! segment per layer crossed. Boundary nodes are placed by Snell's law,
//! interior nodes are bent toward the minimum-time path, and node density is
//! doubled until the travel time is stable. Refraction legs try several
//! turning levels and keep the fastest valid one.
//!
//! Layout
//! - `model`, `level`, `phase`: inputs (velocity field, turning levels, event list).
//! - `node`, `segment`, `snell`, `branch`, `bottom_levels`: the solver.
//! - `ray`, `result`, `api`: building, optimizing and reporting a whole ray.
//!
//! API Policy
//! - Workspace-internal; the CLI is the only consumer. Breaking changes are
//!   fine when they make the solver clearer.

pub mod api;
pub(crate) mod bottom_levels;
pub mod branch;
pub mod cfg;
pub mod error;
pub mod geometry;
pub mod level;
pub mod model;
pub mod node;
pub mod phase;
pub mod ray;
pub mod result;
pub mod segment;
pub(crate) mod snell;

/// Library version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use cfg::BenderCfg;
pub use error::{BenderError, ErrorKind, Result};
pub use geometry::Vec3;
pub use ray::{Ray, RayStatus};
pub use result::RayInfo;

/// Common exports for quick imports in callers.
pub mod prelude {
    pub use crate::api::{position, trace_ray};
    pub use crate::cfg::{BenderCfg, SearchMethod};
    pub use crate::level::{Level, LevelSet};
    pub use crate::model::{LayeredModel, VelocityModel, WaveType};
    pub use crate::phase::{Event, PhaseEvent, PhaseTopology};
    pub use crate::ray::{Ray, RayStatus};
    pub use crate::result::RayInfo;
    pub use crate::Vec3;
}
