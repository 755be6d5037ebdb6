//! Spherically layered reference model with linear-in-radius velocities.
//!
//! Each layer carries P and S velocities at its top and bottom and an optional
//! "relief" on its top boundary: `r_top(u) = r0 + relief_km * (u · relief_axis)`,
//! which tilts the interface toward `relief_axis`. Relief makes the interface
//! normal leave the radial direction, which is what drives the out-of-plane
//! branch of the Snell search.

use serde::{Deserialize, Serialize};

use crate::error::{BenderError, Result};
use crate::geometry::Vec3;

use super::{VelocityModel, WaveType};

/// One layer of a [`LayeredModel`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub name: String,
    /// Radius (km) of the top boundary where the relief term vanishes.
    pub radius_top: f64,
    pub vp_top: f64,
    pub vp_bottom: f64,
    pub vs_top: f64,
    pub vs_bottom: f64,
    #[serde(default)]
    pub homogeneous: bool,
    #[serde(default)]
    pub relief_km: f64,
    #[serde(default = "default_axis")]
    pub relief_axis: [f64; 3],
}

fn default_axis() -> [f64; 3] {
    [0.0, 0.0, 1.0]
}

impl LayerSpec {
    /// Layer with constant P and S velocity.
    pub fn constant(name: &str, radius_top: f64, vp: f64, vs: f64) -> Self {
        Self::gradient(name, radius_top, (vp, vp), (vs, vs))
    }

    /// Layer with `(top, bottom)` velocities interpolated linearly in radius.
    pub fn gradient(name: &str, radius_top: f64, vp: (f64, f64), vs: (f64, f64)) -> Self {
        Self {
            name: name.to_string(),
            radius_top,
            vp_top: vp.0,
            vp_bottom: vp.1,
            vs_top: vs.0,
            vs_bottom: vs.1,
            homogeneous: false,
            relief_km: 0.0,
            relief_axis: default_axis(),
        }
    }

    pub fn with_relief(mut self, relief_km: f64, axis: [f64; 3]) -> Self {
        self.relief_km = relief_km;
        self.relief_axis = axis;
        self
    }

    pub fn homogeneous(mut self) -> Self {
        self.homogeneous = true;
        self
    }

    fn axis(&self) -> Vec3 {
        let a = Vec3::new(self.relief_axis[0], self.relief_axis[1], self.relief_axis[2]);
        let n = a.norm();
        if n > 0.0 {
            a / n
        } else {
            Vec3::z()
        }
    }

    fn top_at(&self, dir: &Vec3) -> f64 {
        if self.relief_km == 0.0 {
            self.radius_top
        } else {
            self.radius_top + self.relief_km * dir.dot(&self.axis())
        }
    }

    fn velocities(&self, wave: WaveType) -> (f64, f64) {
        match wave {
            WaveType::P => (self.vp_top, self.vp_bottom),
            WaveType::S => (self.vs_top, self.vs_bottom),
        }
    }
}

/// Concentric (optionally tilted) shells, innermost first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayeredModel {
    layers: Vec<LayerSpec>,
}

impl LayeredModel {
    /// Validate and build. Layers are listed from the center outward.
    pub fn new(layers: Vec<LayerSpec>) -> Result<Self> {
        if layers.is_empty() {
            return Err(BenderError::fatal("layered model needs at least one layer"));
        }
        let mut prev = 0.0;
        for l in &layers {
            if !(l.radius_top >= prev) {
                return Err(BenderError::fatal(format!(
                    "layer {} top radius {} is below the layer beneath ({prev})",
                    l.name, l.radius_top
                )));
            }
            let speeds = [l.vp_top, l.vp_bottom, l.vs_top, l.vs_bottom];
            if speeds.iter().any(|v| !(v.is_finite() && *v > 0.0)) {
                return Err(BenderError::fatal(format!(
                    "layer {} has a non-positive velocity",
                    l.name
                )));
            }
            prev = l.radius_top;
        }
        Ok(Self { layers })
    }

    /// Two constant-velocity layers: a slow layer of `thickness` km over a fast
    /// half-space, on a planet of `radius` km. Use a large radius to mimic flat
    /// layering.
    pub fn two_layer(radius: f64, thickness: f64, v_upper: f64, v_lower: f64) -> Result<Self> {
        Self::new(vec![
            LayerSpec::constant("LOWER", radius - thickness, v_lower, v_lower / 3f64.sqrt()),
            LayerSpec::constant("UPPER", radius, v_upper, v_upper / 3f64.sqrt()),
        ])
    }

    /// A four-layer Earth (core, lower mantle, upper mantle, crust) with
    /// linear velocity gradients, loosely following ak135 averages.
    pub fn simple_earth() -> Self {
        Self {
            layers: vec![
                LayerSpec::gradient("CORE", 3479.5, (8.0, 11.0), (3.5, 3.5)),
                LayerSpec::gradient("LOWER_MANTLE", 5711.0, (10.75, 13.66), (5.95, 7.28)),
                LayerSpec::gradient("UPPER_MANTLE", 6336.0, (8.04, 10.2), (4.48, 5.6)),
                LayerSpec::gradient("CRUST", 6371.0, (5.8, 6.5), (3.46, 3.75)),
            ],
        }
    }

    pub fn layers(&self) -> &[LayerSpec] {
        &self.layers
    }

    pub fn surface_radius(&self) -> f64 {
        self.layers.last().map(|l| l.radius_top).unwrap_or(0.0)
    }

    fn velocity(&self, r: f64, dir: &Vec3, layer: usize, wave: WaveType) -> (f64, f64) {
        let spec = &self.layers[layer];
        let (v_top, v_bot) = spec.velocities(wave);
        let r_top = spec.top_at(dir);
        let r_bot = self.radius_bottom(layer, dir);
        let h = r_top - r_bot;
        if h <= 1e-9 || v_top == v_bot {
            return (v_top, 0.0);
        }
        let dvdr = (v_top - v_bot) / h;
        let rc = r.clamp(r_bot, r_top);
        (v_bot + dvdr * (rc - r_bot), dvdr)
    }
}

impl VelocityModel for LayeredModel {
    fn n_layers(&self) -> usize {
        self.layers.len()
    }

    fn radius_top(&self, layer: usize, dir: &Vec3) -> f64 {
        let layer = layer.min(self.layers.len() - 1);
        self.layers[layer].top_at(dir)
    }

    fn slowness(&self, pos: &Vec3, layer: usize, wave: WaveType) -> f64 {
        let layer = layer.min(self.layers.len() - 1);
        let r = pos.norm();
        let dir = if r > 0.0 { pos / r } else { Vec3::z() };
        let (v, _) = self.velocity(r, &dir, layer, wave);
        1.0 / v
    }

    fn slowness_gradient(&self, pos: &Vec3, layer: usize, wave: WaveType) -> Vec3 {
        let layer = layer.min(self.layers.len() - 1);
        let r = pos.norm();
        if r <= 0.0 {
            return Vec3::zeros();
        }
        let dir = pos / r;
        let (v, dvdr) = self.velocity(r, &dir, layer, wave);
        // s = 1/v(r)  =>  ∇s = -(dv/dr) / v² · r̂
        dir * (-dvdr / (v * v))
    }

    fn layer_normal(&self, layer: usize, dir: &Vec3) -> Vec3 {
        let layer = layer.min(self.layers.len() - 1);
        let spec = &self.layers[layer];
        if spec.relief_km == 0.0 {
            return *dir;
        }
        // F(p) = |p| - r_top(p/|p|);  ∇F ∝ u - relief (k - (k·u) u) / r
        let k = spec.axis();
        let r = spec.top_at(dir);
        let tangential = (k - dir * k.dot(dir)) * (spec.relief_km / r);
        let n = dir - tangential;
        let len = n.norm();
        if len > 0.0 {
            n / len
        } else {
            *dir
        }
    }

    fn is_homogeneous(&self, layer: usize) -> bool {
        self.layers.get(layer).map(|l| l.homogeneous).unwrap_or(false)
    }

    fn layer_name(&self, layer: usize) -> String {
        self.layers
            .get(layer)
            .map(|l| l.name.clone())
            .unwrap_or_else(|| format!("L{layer}"))
    }
}
