//! Small spherical-geometry helpers on Earth-centered Cartesian vectors.
//!
//! Positions are `Vector3<f64>` in km with the origin at the Earth center and
//! `z` through the north pole. Directions on the sphere are unit vectors.

use nalgebra::Vector3;

pub type Vec3 = Vector3<f64>;

/// Normalize `v`, returning the unit vector and the original length.
/// Returns `None` for (numerically) zero vectors.
pub fn unit_and_len(v: &Vec3) -> Option<(Vec3, f64)> {
    let len = v.norm();
    if len > 0.0 && len.is_finite() {
        Some((v / len, len))
    } else {
        None
    }
}

/// Unit normal of `a × b` together with `|a × b|` before normalization.
///
/// For unit inputs the length is the sine of the angle between them.
pub fn cross_normal(a: &Vec3, b: &Vec3) -> (Vec3, f64) {
    let c = a.cross(b);
    let len = c.norm();
    if len > 0.0 {
        (c / len, len)
    } else {
        (Vec3::zeros(), 0.0)
    }
}

/// Angle (radians) between two vectors, stable for tiny and near-π angles.
pub fn angle(a: &Vec3, b: &Vec3) -> f64 {
    a.cross(b).norm().atan2(a.dot(b))
}

/// Point at fraction `f` of the great-circle arc from unit vector `u1` to `u2`.
///
/// `f` outside `[0, 1]` extrapolates along the same circle. Coincident inputs
/// return `u1`; antipodal inputs fall back to a normalized chord.
pub fn slerp(u1: &Vec3, u2: &Vec3, f: f64) -> Vec3 {
    let theta = angle(u1, u2);
    if theta < 1e-15 {
        return *u1;
    }
    let s = theta.sin();
    if s < 1e-12 {
        let v = u1 * (1.0 - f) + u2 * f;
        return unit_and_len(&v).map(|(u, _)| u).unwrap_or(*u1);
    }
    let a = ((1.0 - f) * theta).sin() / s;
    let b = (f * theta).sin() / s;
    let v = u1 * a + u2 * b;
    unit_and_len(&v).map(|(u, _)| u).unwrap_or(*u1)
}

/// Any unit vector tangent to the sphere at unit vector `u`; prefers north.
pub fn any_tangent(u: &Vec3) -> Vec3 {
    let north = Vec3::new(-u.z * u.x, -u.z * u.y, u.x * u.x + u.y * u.y);
    if let Some((t, _)) = unit_and_len(&north).filter(|(_, l)| *l > 1e-12) {
        return t;
    }
    Vec3::x()
}

/// Geographic latitude/longitude (degrees) of unit vector `u` (spherical Earth).
pub fn lat_lon_deg(u: &Vec3) -> (f64, f64) {
    let lat = u.z.clamp(-1.0, 1.0).asin().to_degrees();
    let lon = u.y.atan2(u.x).to_degrees();
    (lat, lon)
}

/// Unit vector for a geographic latitude/longitude in degrees.
pub fn unit_from_lat_lon_deg(lat: f64, lon: f64) -> Vec3 {
    let (la, lo) = (lat.to_radians(), lon.to_radians());
    Vec3::new(la.cos() * lo.cos(), la.cos() * lo.sin(), la.sin())
}

/// Azimuth (radians, clockwise from north in `[0, 2π)`) from `from` toward `to`.
///
/// Returns `None` when the points coincide or `from` is a pole with an
/// undefined north direction.
pub fn azimuth(from: &Vec3, to: &Vec3) -> Option<f64> {
    let (uf, _) = unit_and_len(from)?;
    let (ut, _) = unit_and_len(to)?;
    let east = Vec3::new(-uf.y, uf.x, 0.0);
    let (east, le) = unit_and_len(&east)?;
    if le < 1e-12 {
        return None;
    }
    let north = uf.cross(&east);
    let d = ut - uf * ut.dot(&uf);
    if d.norm() < 1e-15 {
        return None;
    }
    let az = d.dot(&east).atan2(d.dot(&north));
    Some(if az < 0.0 {
        az + 2.0 * std::f64::consts::PI
    } else {
        az
    })
}

/// Great circle through two unit vectors, with a local frame where `x`/`y`
/// span the circle plane and `z` points along `first × last`.
#[derive(Clone, Copy, Debug)]
pub struct GreatCircle {
    pub first: Vec3,
    pub last: Vec3,
    pub normal: Vec3,
    /// Angular length (radians) from `first` to `last`.
    pub distance: f64,
    tangent: Vec3,
}

impl GreatCircle {
    /// Returns `None` when the endpoints coincide or are antipodal.
    pub fn new(first: &Vec3, last: &Vec3) -> Option<Self> {
        let (first, _) = unit_and_len(first)?;
        let (last, _) = unit_and_len(last)?;
        let (normal, len) = cross_normal(&first, &last);
        if len < 1e-12 {
            return None;
        }
        let tangent = normal.cross(&first);
        Some(Self {
            first,
            last,
            normal,
            distance: angle(&first, &last),
            tangent,
        })
    }

    /// Unit vector at angular distance `dist` (radians) from `first` toward `last`.
    pub fn point(&self, dist: f64) -> Vec3 {
        self.first * dist.cos() + self.tangent * dist.sin()
    }

    /// Coordinates of `p` in the circle frame: `(x, y)` in plane, `z` out of plane.
    pub fn transform(&self, p: &Vec3) -> Vec3 {
        Vec3::new(p.dot(&self.first), p.dot(&self.tangent), p.dot(&self.normal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn slerp_midpoint_on_equator() {
        let a = Vec3::x();
        let b = Vec3::y();
        let m = slerp(&a, &b, 0.5);
        let s = std::f64::consts::FRAC_1_SQRT_2;
        assert!((m - Vec3::new(s, s, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn slerp_randomized_stays_on_circle() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let a = unit_from_lat_lon_deg(rng.gen_range(-80.0..80.0), rng.gen_range(-180.0..180.0));
            let b = unit_from_lat_lon_deg(rng.gen_range(-80.0..80.0), rng.gen_range(-180.0..180.0));
            let f: f64 = rng.gen_range(0.0..1.0);
            let p = slerp(&a, &b, f);
            assert!((p.norm() - 1.0).abs() < 1e-12);
            // in-plane and at the expected fraction of the arc
            let (n, _) = cross_normal(&a, &b);
            assert!(p.dot(&n).abs() < 1e-9);
            assert!((angle(&a, &p) - f * angle(&a, &b)).abs() < 1e-9);
        }
    }

    #[test]
    fn azimuth_cardinal_directions() {
        let o = unit_from_lat_lon_deg(0.0, 0.0);
        let n = unit_from_lat_lon_deg(1.0, 0.0);
        let e = unit_from_lat_lon_deg(0.0, 1.0);
        assert!(azimuth(&o, &n).unwrap().abs() < 1e-9);
        assert!((azimuth(&o, &e).unwrap() - std::f64::consts::FRAC_PI_2).abs() < 1e-9);
        assert!(azimuth(&o, &o).is_none());
    }

    #[test]
    fn great_circle_frame() {
        let a = unit_from_lat_lon_deg(0.0, 0.0);
        let b = unit_from_lat_lon_deg(0.0, 40.0);
        let gc = GreatCircle::new(&a, &b).unwrap();
        assert!((gc.distance - 40f64.to_radians()).abs() < 1e-12);
        assert!((gc.point(gc.distance) - b).norm() < 1e-12);
        let off = unit_from_lat_lon_deg(1.0, 20.0) * 6371.0;
        let t = gc.transform(&off);
        assert!(t.z > 0.0);
        assert!(GreatCircle::new(&a, &a).is_none());
    }

    #[test]
    fn lat_lon_round_trip_samples() {
        for (lat, lon) in [(10.0, 20.0), (-45.0, 170.0), (89.0, -30.0)] {
            let u = unit_from_lat_lon_deg(lat, lon);
            let (la, lo) = lat_lon_deg(&u);
            assert!((la - lat).abs() < 1e-9 && (lo - lon).abs() < 1e-9);
        }
    }
}
