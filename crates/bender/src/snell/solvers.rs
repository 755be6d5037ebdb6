//! Generic 1-D root and 2-D minimum finders used by the Snell search.
//!
//! Both take a fallible objective so that errors raised while evaluating the
//! misfit (NaN slowness, out-of-plane signal) abort the search and surface to
//! the caller unchanged.

const TINY: f64 = 1.0e-10;

/// Brent's root of `f` on `[a, b]`.
///
/// When the end values do not bracket a root the end with the smaller
/// `|f|` is returned; callers treat an end-point answer as "no interior root".
pub(crate) fn brent_root<E>(
    mut f: impl FnMut(f64) -> Result<f64, E>,
    a: f64,
    b: f64,
    tol: f64,
    max_iter: usize,
) -> Result<f64, E> {
    let (mut a, mut b) = (a, b);
    let mut fa = f(a)?;
    let mut fb = f(b)?;
    if fa == 0.0 {
        return Ok(a);
    }
    if fb == 0.0 {
        return Ok(b);
    }
    if fa.signum() == fb.signum() {
        return Ok(if fa.abs() < fb.abs() { a } else { b });
    }

    let (mut c, mut fc) = (b, fb);
    let mut d = b - a;
    let mut e = d;
    for _ in 0..max_iter {
        if fb.signum() == fc.signum() {
            c = a;
            fc = fa;
            d = b - a;
            e = d;
        }
        if fc.abs() < fb.abs() {
            a = b;
            b = c;
            c = a;
            fa = fb;
            fb = fc;
            fc = fa;
        }
        let tol1 = 2.0 * f64::EPSILON * b.abs() + 0.5 * tol;
        let xm = 0.5 * (c - b);
        if xm.abs() <= tol1 || fb == 0.0 {
            return Ok(b);
        }
        if e.abs() >= tol1 && fa.abs() > fb.abs() {
            // inverse quadratic interpolation, secant when only two points
            let s = fb / fa;
            let (mut p, mut q);
            if a == c {
                p = 2.0 * xm * s;
                q = 1.0 - s;
            } else {
                let qq = fa / fc;
                let r = fb / fc;
                p = s * (2.0 * xm * qq * (qq - r) - (b - a) * (r - 1.0));
                q = (qq - 1.0) * (r - 1.0) * (s - 1.0);
            }
            if p > 0.0 {
                q = -q;
            }
            p = p.abs();
            let min1 = 3.0 * xm * q - (tol1 * q).abs();
            let min2 = (e * q).abs();
            if 2.0 * p < min1.min(min2) {
                e = d;
                d = p / q;
            } else {
                d = xm;
                e = d;
            }
        } else {
            d = xm;
            e = d;
        }
        a = b;
        fa = fb;
        b += if d.abs() > tol1 { d } else { tol1.copysign(xm) };
        fb = f(b)?;
    }
    Ok(b)
}

fn lerp(a: &[f64; 2], b: &[f64; 2], t: f64) -> [f64; 2] {
    [a[0] + (b[0] - a[0]) * t, a[1] + (b[1] - a[1]) * t]
}

/// Final triangle of a [`nelder_mead`] search.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct SimplexMin {
    pub x: [f64; 2],
    pub fx: f64,
    /// Value at the worst vertex.
    pub worst: f64,
}

/// Downhill simplex (Nelder–Mead) minimum of `f` from the triangle `start`.
///
/// Stops when the relative spread of the vertex values drops below `ftol`
/// or after `max_evals` evaluations, and returns the best vertex either way.
pub(crate) fn nelder_mead<E>(
    mut f: impl FnMut(&[f64; 2]) -> Result<f64, E>,
    start: [[f64; 2]; 3],
    ftol: f64,
    max_evals: usize,
) -> Result<SimplexMin, E> {
    let mut p = start;
    let mut y = [f(&p[0])?, f(&p[1])?, f(&p[2])?];
    let mut evals = 3;
    loop {
        let mut idx = [0usize, 1, 2];
        idx.sort_by(|&i, &j| y[i].total_cmp(&y[j]));
        let (lo, nh, hi) = (idx[0], idx[1], idx[2]);
        let spread = 2.0 * (y[hi] - y[lo]).abs() / (y[hi].abs() + y[lo].abs() + TINY);
        if spread < ftol || evals >= max_evals {
            return Ok(SimplexMin {
                x: p[lo],
                fx: y[lo],
                worst: y[hi],
            });
        }

        let centroid = lerp(&p[lo], &p[nh], 0.5);
        let xr = lerp(&centroid, &p[hi], -1.0);
        let yr = f(&xr)?;
        evals += 1;
        if yr < y[lo] {
            let xe = lerp(&centroid, &p[hi], -2.0);
            let ye = f(&xe)?;
            evals += 1;
            if ye < yr {
                (p[hi], y[hi]) = (xe, ye);
            } else {
                (p[hi], y[hi]) = (xr, yr);
            }
        } else if yr < y[nh] {
            (p[hi], y[hi]) = (xr, yr);
        } else {
            let xc = if yr < y[hi] {
                lerp(&centroid, &xr, 0.5)
            } else {
                lerp(&centroid, &p[hi], 0.5)
            };
            let yc = f(&xc)?;
            evals += 1;
            if yc < y[hi].min(yr) {
                (p[hi], y[hi]) = (xc, yc);
            } else {
                for i in [nh, hi] {
                    p[i] = lerp(&p[lo], &p[i], 0.5);
                    y[i] = f(&p[i])?;
                }
                evals += 2;
            }
        }
    }
}

/// Restart `search` until the worst vertex of its final triangle is within
/// ten tolerances of zero; a flat triangle above that is a local minimum.
/// Errors are skipped except on the last try. Returns the last best value.
pub(crate) fn restarted_simplex<E>(
    max_tries: usize,
    tol: f64,
    mut search: impl FnMut(usize) -> Result<SimplexMin, E>,
) -> Result<f64, E> {
    let mut fitness = f64::INFINITY;
    for attempt in 1..=max_tries {
        match search(attempt) {
            Ok(found) => {
                fitness = found.fx;
                if found.worst < 10.0 * tol {
                    break;
                }
            }
            Err(e) if attempt == max_tries => return Err(e),
            Err(_) => {}
        }
    }
    Ok(fitness)
}
