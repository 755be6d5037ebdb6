//! Candidate turning surfaces for a refraction leg.
//!
//! A [`Level`] is either one side of a major layer boundary or a synthetic
//! radius inside a thick layer. A [`LevelSet`] lists the levels a bottoming
//! leg may turn at, ordered deepest first; the level before index 0 is the
//! Earth center.

use serde::{Deserialize, Serialize};

use crate::geometry::Vec3;
use crate::model::VelocityModel;

/// Which side of a major layer a boundary level sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerSide {
    Top,
    Bottom,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Level {
    /// Top or bottom boundary of `layer`.
    Interface { layer: usize, side: LayerSide },
    /// Synthetic turning radius (km) inside `layer`.
    Radius { layer: usize, radius: f64 },
    EarthCenter,
}

impl Level {
    pub fn top_of(layer: usize) -> Self {
        Level::Interface {
            layer,
            side: LayerSide::Top,
        }
    }

    pub fn bottom_of(layer: usize) -> Self {
        Level::Interface {
            layer,
            side: LayerSide::Bottom,
        }
    }

    /// Layer the bottom segment of a branch turning at this level lives in.
    pub fn major_layer(&self) -> usize {
        match *self {
            Level::Interface { layer, .. } | Level::Radius { layer, .. } => layer,
            Level::EarthCenter => 0,
        }
    }

    pub fn is_major_interface(&self) -> bool {
        matches!(self, Level::Interface { .. })
    }

    /// Radius of the level below unit direction `dir`. Synthetic radii are
    /// clamped into their layer.
    pub fn radius(&self, model: &dyn VelocityModel, dir: &Vec3) -> f64 {
        match *self {
            Level::Interface {
                layer,
                side: LayerSide::Top,
            } => model.radius_top(layer, dir),
            Level::Interface {
                layer,
                side: LayerSide::Bottom,
            } => model.radius_bottom(layer, dir),
            Level::Radius { layer, radius } => {
                let lo = model.radius_bottom(layer, dir);
                let hi = model.radius_top(layer, dir);
                radius.clamp(lo, hi.max(lo))
            }
            Level::EarthCenter => 0.0,
        }
    }

    pub fn name(&self, model: &dyn VelocityModel) -> String {
        match *self {
            Level::Interface {
                layer,
                side: LayerSide::Top,
            } => format!("{}_TOP", model.layer_name(layer)),
            Level::Interface {
                layer,
                side: LayerSide::Bottom,
            } => format!("{}_BOTTOM", model.layer_name(layer)),
            Level::Radius { layer, radius } => {
                format!("{}@{radius:.1}", model.layer_name(layer))
            }
            Level::EarthCenter => "EARTH_CENTER".to_string(),
        }
    }
}

/// Levels of one refraction leg, deepest first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LevelSet {
    levels: Vec<Level>,
}

impl LevelSet {
    pub fn new(levels: Vec<Level>) -> Self {
        Self { levels }
    }

    /// Single level: turn along the top of `layer`.
    pub fn top_of(layer: usize) -> Self {
        Self::new(vec![Level::top_of(layer)])
    }

    /// Every level from `bottom_layer` up to `top_layer`: for each layer its
    /// bottom side (above the center), `per_layer` evenly spaced synthetic
    /// radii, and its top side for all but `top_layer`. Radii are taken below
    /// `dir`.
    pub fn through_layers(
        model: &dyn VelocityModel,
        dir: &Vec3,
        bottom_layer: usize,
        top_layer: usize,
        per_layer: usize,
    ) -> Self {
        let top_layer = top_layer.min(model.n_layers().saturating_sub(1));
        let mut levels = Vec::new();
        for layer in bottom_layer..=top_layer {
            if layer > 0 {
                levels.push(Level::bottom_of(layer));
            }
            let lo = model.radius_bottom(layer, dir);
            let hi = model.radius_top(layer, dir);
            for k in 1..=per_layer {
                let radius = lo + (hi - lo) * k as f64 / (per_layer + 1) as f64;
                levels.push(Level::Radius { layer, radius });
            }
            if layer < top_layer {
                levels.push(Level::top_of(layer));
            }
        }
        Self::new(levels)
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<Level> {
        self.levels.get(i).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Level> {
        self.levels.iter()
    }

    /// The level just below index `i`; the Earth center below the first.
    pub fn previous(&self, i: usize) -> Level {
        if i == 0 {
            Level::EarthCenter
        } else {
            self.levels.get(i - 1).copied().unwrap_or(Level::EarthCenter)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LayeredModel;

    #[test]
    fn radius_by_side() {
        let m = LayeredModel::simple_earth();
        let u = Vec3::z();
        assert_eq!(Level::top_of(2).radius(&m, &u), 6336.0);
        assert_eq!(Level::bottom_of(2).radius(&m, &u), 5711.0);
        assert_eq!(Level::EarthCenter.radius(&m, &u), 0.0);
        let clamped = Level::Radius {
            layer: 3,
            radius: 7000.0,
        };
        assert_eq!(clamped.radius(&m, &u), 6371.0);
        assert!(!clamped.is_major_interface());
        assert_eq!(Level::bottom_of(1).name(&m), "LOWER_MANTLE_BOTTOM");
    }

    #[test]
    fn through_layers_is_ordered_deepest_first() {
        let m = LayeredModel::simple_earth();
        let u = Vec3::x();
        let set = LevelSet::through_layers(&m, &u, 1, 2, 2);
        // bottom(1), 2 radii, top(1), bottom(2), 2 radii
        assert_eq!(set.len(), 7);
        let radii: Vec<f64> = set.iter().map(|l| l.radius(&m, &u)).collect();
        assert!(radii.windows(2).all(|w| w[0] <= w[1]), "{radii:?}");
        assert_eq!(set.previous(0), Level::EarthCenter);
        assert_eq!(set.previous(1), Level::bottom_of(1));
        assert_eq!(set.get(3), Some(Level::top_of(1)));
        assert_eq!(set.get(3).map(|l| l.major_layer()), Some(1));
    }
}
