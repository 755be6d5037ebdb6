//! Velocity-model interface consumed by the solver.
//!
//! Purpose
//! - The solver never models the velocity field itself. It asks a
//!   [`VelocityModel`] for layer geometry (boundary radii and normals) and for
//!   slowness and its gradient at a 3D point, per layer and wave type.
//!
//! Why this design
//! - Layer index `i` counts from the Earth center outward; layer `n-1` is the
//!   outermost. The boundary "top of layer `i`" is shared with "bottom of layer
//!   `i+1`". Every lookup is explicit about the layer so that a point sitting on
//!   a boundary can be evaluated on either side.
//! - Radii are functions of the lateral direction so laterally varying
//!   interfaces (topography, dipping Moho) fit the same trait.
//!
//! References
//! - Um, J. & Thurber, C. (1987), "A fast algorithm for two-point seismic ray
//!   tracing", BSSA 77(3). The bending update needs slowness and its gradient.

mod layered;

pub use layered::{LayerSpec, LayeredModel};

use serde::{Deserialize, Serialize};

use crate::geometry::Vec3;

/// Seismic wave type carried by a segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WaveType {
    P,
    S,
}

impl WaveType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaveType::P => "P",
            WaveType::S => "S",
        }
    }
}

/// Velocity field accessor (slowness in s/km, geometry in km).
pub trait VelocityModel {
    fn n_layers(&self) -> usize;

    /// Radius of the top of `layer` below unit direction `dir`.
    fn radius_top(&self, layer: usize, dir: &Vec3) -> f64;

    /// Radius of the bottom of `layer`; zero for the innermost layer.
    fn radius_bottom(&self, layer: usize, dir: &Vec3) -> f64 {
        if layer == 0 {
            0.0
        } else {
            self.radius_top(layer - 1, dir)
        }
    }

    fn layer_thickness(&self, layer: usize, dir: &Vec3) -> f64 {
        self.radius_top(layer, dir) - self.radius_bottom(layer, dir)
    }

    /// Slowness at `pos`, evaluated with the velocity law of `layer`.
    fn slowness(&self, pos: &Vec3, layer: usize, wave: WaveType) -> f64;

    /// Gradient of slowness at `pos` within `layer` (s/km²).
    fn slowness_gradient(&self, pos: &Vec3, layer: usize, wave: WaveType) -> Vec3;

    /// Slowness at the top of `layer` below `dir`.
    fn slowness_top(&self, layer: usize, dir: &Vec3, wave: WaveType) -> f64 {
        self.slowness(&(dir * self.radius_top(layer, dir)), layer, wave)
    }

    /// Slowness at the bottom of `layer` below `dir`.
    fn slowness_bottom(&self, layer: usize, dir: &Vec3, wave: WaveType) -> f64 {
        self.slowness(&(dir * self.radius_bottom(layer, dir)), layer, wave)
    }

    /// Outward unit normal of the top boundary of `layer` below `dir`.
    fn layer_normal(&self, layer: usize, dir: &Vec3) -> Vec3 {
        let _ = layer;
        *dir
    }

    /// Constant-velocity layers flagged here (water, ice) are never bent or doubled.
    fn is_homogeneous(&self, layer: usize) -> bool {
        let _ = layer;
        false
    }

    fn layer_name(&self, layer: usize) -> String {
        format!("L{layer}")
    }

    /// Index of the layer containing `pos`; `n_layers()` when above the model.
    ///
    /// A point exactly on a boundary belongs to the layer below it.
    fn interface_index(&self, pos: &Vec3) -> usize {
        let r = pos.norm();
        let dir = if r > 0.0 { pos / r } else { Vec3::z() };
        (0..self.n_layers())
            .find(|&i| r <= self.radius_top(i, &dir))
            .unwrap_or(self.n_layers())
    }

    /// Index of the first layer above `layer` thicker than `min_thickness`,
    /// clamped to the outermost layer.
    fn next_layer(&self, layer: usize, dir: &Vec3, min_thickness: f64) -> usize {
        let n = self.n_layers();
        let mut i = layer + 1;
        while i < n && self.layer_thickness(i, dir) < min_thickness {
            i += 1;
        }
        if i < n {
            return i;
        }
        // above the model: walk back down to the outermost layer with substance
        let mut j = n - 1;
        while j > 0 && self.layer_thickness(j, dir) < min_thickness {
            j -= 1;
        }
        j
    }

    /// Index of the first layer below `layer` thicker than `min_thickness`.
    fn previous_layer(&self, layer: usize, dir: &Vec3, min_thickness: f64) -> usize {
        let mut i = layer;
        while i > 0 {
            i -= 1;
            if self.layer_thickness(i, dir) >= min_thickness {
                return i;
            }
        }
        0
    }
}
