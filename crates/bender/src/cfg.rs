//! Solver tolerances, iteration caps and the user-facing configuration.
//!
//! Policy
//! - Algorithm constants are fixed `pub(crate)` values. They encode numerical
//!   behavior of the bending/Snell iteration and are not meant to be tuned per
//!   ray. The few knobs a caller legitimately needs live in [`BenderCfg`].
//! - `BenderCfg` is built once and passed by reference into every ray; it is
//!   immutable during optimization, so rays on different threads can share it.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{BenderError, Result};
use crate::model::VelocityModel;

/// Layers thinner than this (km) are treated as pinched out.
pub(crate) const MIN_LAYER_THICKNESS: f64 = 0.01;
/// Endpoint separation (km) below which a bottom segment collapses to a reflection.
pub(crate) const REFLECTION_DISTANCE: f64 = 0.1;

/// Below this local layer thickness (km) a node stays at its chord midpoint.
pub(crate) const MIN_THICKNESS_NO_BEND: f64 = 0.1;
/// Above this local layer thickness (km) the full Um & Thurber update is applied.
pub(crate) const MAX_THICKNESS_ONLY_BEND: f64 = 1.0;
/// Radius offset (km) used to push interior nodes off their layer boundaries.
pub(crate) const BOUNDARY_OFFSET: f64 = 0.001;

pub(crate) const MAX_BRANCH_NODES: usize = 30_000;
pub(crate) const MAX_OUTER_ITERATIONS: usize = 100;
pub(crate) const MAX_INNER_ITERATIONS: usize = 25_000;
pub(crate) const MAX_INCREASING_TT: usize = 7;
pub(crate) const MAX_TT_FLIP_FLOPS: usize = 50;
/// Inner iteration count after which the relaxed `3 × tol` criterion applies.
pub(crate) const RELAXED_INNER_AFTER: usize = 5_000;

/// Interior nodes placed on each side of the turning node of a new bottom segment.
pub(crate) const BOTTOM_NODES_PER_SIDE: usize = 1;
/// Sub-intervals of a freshly built bending segment without a configured separation.
pub(crate) const INITIAL_SEGMENT_PARTS: usize = 2;
/// End nodes closer than this (km) to a boundary radius count as sitting on it.
pub(crate) const ON_BOUNDARY_TOL: f64 = 1.0e-6;
/// Height (km) above the level below at which a new turning node starts.
pub(crate) const BOTTOM_MIDDLE_START_HEIGHT: f64 = 1.0;
/// Interior nodes this close (km) to the level below diffract along it.
pub(crate) const TOP_SIDE_DIFFRACTION_TOL: f64 = 1.0e-3;
/// Great-circle fractions of the first and last bottom pierce points of a new branch.
pub(crate) const BOTTOM_PIERCE_FRACTIONS: (f64, f64) = (0.01, 0.99);
/// Bottoming levels whose major layer index is at or below this force Brent's in AUTO mode.
pub(crate) const FORCE_BRENTS_MAX_LAYER: usize = 3;

/// Neighbor offsets (km) from the interface below which AUTO always uses Brent's.
pub(crate) const BRENTS_THIN_OFFSET: f64 = 0.1;
/// |normal · out_of_plane| below this (sin 3°) keeps AUTO on Brent's.
pub(crate) const BRENTS_MAX_OUT_OF_PLANE: f64 = 0.052335956242944;
/// Brent's out-of-plane signal fires when `normal_above · normal` drops below `1 - this`.
pub(crate) const BRENTS_OUT_OF_PLANE_EPS: f64 = 5.0e-5;
pub(crate) const BRENTS_X_TOL: f64 = 1.0e-12;
pub(crate) const BRENTS_MAX_ITER: usize = 200;

pub(crate) const SIMPLEX_TOLERANCE: f64 = 1.0e-6;
pub(crate) const SIMPLEX_MAX_ITER: usize = 2_000;
pub(crate) const SIMPLEX_MAX_TRIES: usize = 100;
pub(crate) const SIMPLEX_INITIAL_SIZE: f64 = 0.4999;

/// Chord-to-vertical angle (degrees) under which a refraction leg is built up-going only.
pub(crate) const MIN_UPGOING_ONLY_ANGLE_DEG: f64 = 30.0;
/// Warm-up inner iterations before bounce points start moving.
pub(crate) const BOUNCE_WARMUP_ITERATIONS: usize = 20;
/// Oscillating bounce points stop the bounce loop after this many iterations.
pub(crate) const BOUNCE_MAX_FLIP_ITERATIONS: usize = 100;
/// Point spacing (km) under which a still-unconverged multi-branch ray is abandoned.
pub(crate) const MIN_RAY_POINT_SPACING: f64 = 0.5;

/// Minimization method used to place a node on an interface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    /// 1-D root of the Snell misfit along the neighbor great circle.
    Brents,
    /// 2-D downhill simplex in the interface tangent plane.
    Simplex,
    /// Brent's unless the interface normal is far out of the ray plane.
    #[default]
    Auto,
}

/// Per-ray solver settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenderCfg {
    /// Travel-time convergence tolerance (s) for inner and outer loops.
    pub tt_tolerance: f64,
    /// Outer convergence requires mean node spacing (km) below this.
    pub min_node_spacing: f64,
    pub search_method: SearchMethod,
    /// 0 = quiet, 1 = per-branch summary, 2 = outer rows, 3 = every inner row.
    pub verbosity: u8,
    /// Wall-clock budget per ray (seconds). `None` disables the deadline.
    pub max_elapsed_s: Option<f64>,
    /// Layer index → maximum spacing (km) of the nodes placed in a freshly built
    /// segment of that layer. Layers not listed get the default two or three
    /// nodes per segment.
    pub initial_node_separation: BTreeMap<usize, f64>,
}

impl Default for BenderCfg {
    fn default() -> Self {
        Self {
            tt_tolerance: 0.001,
            min_node_spacing: 30.0,
            search_method: SearchMethod::Auto,
            verbosity: 0,
            max_elapsed_s: None,
            initial_node_separation: BTreeMap::new(),
        }
    }
}

impl BenderCfg {
    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.tt_tolerance = tol;
        self
    }

    pub fn with_min_node_spacing(mut self, spacing: f64) -> Self {
        self.min_node_spacing = spacing;
        self
    }

    pub fn with_search_method(mut self, method: SearchMethod) -> Self {
        self.search_method = method;
        self
    }

    pub fn max_elapsed(&self) -> Option<Duration> {
        self.max_elapsed_s
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(Duration::from_secs_f64)
    }

    /// Spacing for the initial nodes of a segment in `layer`, if configured.
    pub fn initial_separation(&self, layer: usize) -> Option<f64> {
        self.initial_node_separation
            .get(&layer)
            .copied()
            .filter(|d| *d > 0.0)
    }
}

/// Borrowed per-ray context threaded through every segment and branch call.
#[derive(Clone, Copy)]
pub(crate) struct RayCtx<'a> {
    pub model: &'a dyn VelocityModel,
    pub cfg: &'a BenderCfg,
    pub started: Instant,
}

impl<'a> RayCtx<'a> {
    pub fn new(model: &'a dyn VelocityModel, cfg: &'a BenderCfg) -> Self {
        Self {
            model,
            cfg,
            started: Instant::now(),
        }
    }

    /// Nonfatal [`BenderError::WallClock`] once the configured budget is spent.
    pub fn check_deadline(&self) -> Result<()> {
        let Some(budget) = self.cfg.max_elapsed() else {
            return Ok(());
        };
        let elapsed = self.started.elapsed();
        if elapsed > budget {
            return Err(BenderError::WallClock {
                elapsed_s: elapsed.as_secs_f64(),
                budget_s: budget.as_secs_f64(),
            });
        }
        Ok(())
    }
}
