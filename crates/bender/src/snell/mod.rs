//! Snell's-law placement of nodes on layer boundaries.
//!
//! Purpose
//! - Move a boundary node along its interface until the ray bends there
//!   according to Snell's law (`sin i_a · s_a = sin i_b · s_b`), or obeys the
//!   mirror condition at a reflection.
//!
//! Why this design
//! - The node being placed is copied into a [`Search`] together with the
//!   positions of its neighbours above and below; the search mutates only that
//!   copy and the caller writes the result back. The neighbours are found by
//!   walking the segment links of the [`Mesh`].
//! - Brent's 1-D root along the neighbour great circle is tried first. When
//!   it lands on an end point, or the interface normal leaves the plane of the
//!   two neighbours, a 2-D downhill simplex over the interface takes over.
//!
//! Fitness
//! - `v_a`, `v_b`: unit vectors from the node to the neighbours; `n` the
//!   interface normal; `h = normalize(normalize(v_a × v_b) × n)` the head-wave
//!   direction. Neighbours on the wrong side of `h` get a penalty of
//!   `2(1 + |v·h|)`, signed so that Brent's still sees a sign change.
//! - Otherwise `err = sin_a·s_a − sin_b·s_b` with each side's slowness the mean
//!   of the neighbour and the node evaluated in that side's layer. Brent's
//!   returns `err`; the simplex returns `(1 − n_a·n) + |err|` where `n_a` is
//!   the normal implied by the two ray directions.

mod solvers;

pub(crate) use solvers::{brent_root, nelder_mead, restarted_simplex, SimplexMin};

use crate::cfg::{
    RayCtx, SearchMethod, BRENTS_MAX_ITER, BRENTS_MAX_OUT_OF_PLANE, BRENTS_OUT_OF_PLANE_EPS,
    BRENTS_THIN_OFFSET, BRENTS_X_TOL, MIN_LAYER_THICKNESS, REFLECTION_DISTANCE,
    SIMPLEX_INITIAL_SIZE, SIMPLEX_MAX_ITER, SIMPLEX_MAX_TRIES, SIMPLEX_TOLERANCE,
};
use crate::error::{BenderError, Result};
use crate::geometry::{angle, any_tangent, cross_normal, slerp, unit_and_len, Vec3};
use crate::model::WaveType;
use crate::node::{Node, NodeArena, NodeId};
use crate::segment::{Mesh, ReflectionSide, SegmentId, SegmentKind};

/// Which side of the boundary the relaxed segment approaches from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Direction {
    /// Boundary node at the end of the segment below it.
    Up,
    /// Boundary node at the start of the segment below it.
    Down,
    Reflection,
}

/// Branch end nodes used when no segment in the layer above exists.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Anchors {
    pub first: NodeId,
    pub last: NodeId,
    pub first_wave: WaveType,
    pub last_wave: WaveType,
}

impl Anchors {
    /// Anchors of a branch carrying one wave type end to end.
    pub fn single(first: NodeId, last: NodeId, wave: WaveType) -> Self {
        Self {
            first,
            last,
            first_wave: wave,
            last_wave: wave,
        }
    }
}

/// Minimum length (km) of a node-to-neighbour vector.
const MIN_NEIGHBOR_VECTOR: f64 = 1.0e-7;
/// Below this cross-product length the two ray directions are parallel.
const MIN_CROSS: f64 = 1.0e-6;
/// Start of the odd-try triangle, as a fraction of the search radius.
const SIMPLEX_NEAR_START: f64 = 1.0e-4;
const SIMPLEX_FAR_START: f64 = 0.999;
const MIN_SEARCH_RADIUS: f64 = 1.0e-4;
/// Neighbour directions closer than this (radians) are treated as one radial.
const COINCIDENT_ANGLE: f64 = 1.0e-12;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Method {
    Brents,
    Simplex,
}

/// Why a fitness evaluation did not produce a value.
#[derive(Debug)]
enum Signal {
    /// Interface normal is out of the neighbour plane; Brent's cannot be trusted.
    OutOfPlane,
    Fail(BenderError),
}

impl From<BenderError> for Signal {
    fn from(e: BenderError) -> Self {
        Signal::Fail(e)
    }
}

impl Signal {
    fn into_error(self) -> BenderError {
        match self {
            Signal::OutOfPlane => {
                BenderError::nonfatal("interface normal out of the neighbour plane")
            }
            Signal::Fail(e) => e,
        }
    }
}

struct Neighbor {
    pos: Vec3,
    wave: WaveType,
}

/// One Snell placement in progress.
struct Search<'a> {
    ctx: RayCtx<'a>,
    node: Node,
    above: Neighbor,
    below: Neighbor,
    major: usize,
    layer_above: usize,
    reflection: bool,
    /// Layer whose velocity law both sides of a reflection use.
    reflection_layer: usize,
    /// In-plane tangent at `above` pointing toward `below`.
    vtp: Vec3,
    /// Unit normal of the `above`/`below` plane.
    oop: Vec3,
    normal_above_dot_normal: f64,
    err_snell: f64,
    /// False when the last evaluation returned a penalty or a degenerate zero.
    misfit_evaluated: bool,
}

impl<'a> Search<'a> {
    fn new(
        ctx: RayCtx<'a>,
        node: Node,
        above: Neighbor,
        below: Neighbor,
        layer_above: usize,
        reflection: Option<usize>,
    ) -> Self {
        let major = node.layer;
        Self {
            ctx,
            node,
            above,
            below,
            major,
            layer_above,
            reflection: reflection.is_some(),
            reflection_layer: reflection.unwrap_or(layer_above),
            vtp: Vec3::x(),
            oop: Vec3::z(),
            normal_above_dot_normal: 1.0,
            err_snell: 0.0,
            misfit_evaluated: false,
        }
    }

    fn set_on_top(&mut self, u: &Vec3) {
        let model = self.ctx.model;
        self.node.pos = u * model.radius_top(self.major, u);
        self.node.layer = self.major;
    }

    /// Run the search and return the final fitness; `self.node` holds the placement.
    fn run(&mut self, force_brents: bool) -> Result<f64> {
        let model = self.ctx.model;
        let top = model.n_layers().saturating_sub(1);
        let above_index = model.interface_index(&self.above.pos).min(top);
        if self.layer_above < above_index {
            self.layer_above = above_index;
            if self.reflection_layer > self.major {
                self.reflection_layer = above_index;
            }
        }

        let ua = unit_of(&self.above.pos);
        let ub = unit_of(&self.below.pos);
        let thick_above = (self.above.pos.norm() - model.radius_top(self.major, &ua)).abs();
        let thick_below = (self.below.pos.norm() - model.radius_top(self.major, &ub)).abs();

        if thick_above < MIN_LAYER_THICKNESS && thick_below < MIN_LAYER_THICKNESS {
            let u = slerp(&ua, &ub, 0.5);
            self.set_on_top(&u);
            return Ok(0.0);
        }
        // neighbours on one radial (vertical rays, coincident reflection legs)
        if angle(&ua, &ub) < COINCIDENT_ANGLE {
            self.set_on_top(&ua);
            return Ok(0.0);
        }
        if !self.reflection
            && thick_below < MIN_LAYER_THICKNESS
            && (self.node.pos - self.below.pos).norm() <= REFLECTION_DISTANCE
        {
            self.set_on_top(&ub);
            return Ok(0.0);
        }

        let (oop, _) = cross_normal(&ua, &ub);
        self.oop = oop;
        let (vtp, len) = cross_normal(&oop, &ua);
        self.vtp = if len == 0.0 { any_tangent(&ua) } else { vtp };

        let mut method = match self.ctx.cfg.search_method {
            SearchMethod::Brents => Method::Brents,
            SearchMethod::Simplex => Method::Simplex,
            SearchMethod::Auto => Method::Brents,
        };
        if thick_above < BRENTS_THIN_OFFSET || thick_below < BRENTS_THIN_OFFSET {
            method = Method::Brents;
        } else if self.ctx.cfg.search_method == SearchMethod::Auto && !force_brents {
            let u = slerp(&ua, &ub, 0.5);
            let normal = model.layer_normal(self.major, &u);
            if normal.dot(&oop).abs() >= BRENTS_MAX_OUT_OF_PLANE {
                method = Method::Simplex;
            }
        }

        let fitness = match method {
            Method::Brents => match self.brents() {
                Ok(Some(f)) => f,
                Ok(None) | Err(Signal::OutOfPlane) => self.simplex()?,
                Err(Signal::Fail(e)) => return Err(e),
            },
            Method::Simplex => self.simplex()?,
        };
        Ok(fitness)
    }

    /// Brent's root along the neighbour great circle; `None` when the root
    /// sits on an end point.
    fn brents(&mut self) -> std::result::Result<Option<f64>, Signal> {
        let x = brent_root(|x| self.brents_at(x), 0.0, 1.0, BRENTS_X_TOL, BRENTS_MAX_ITER)?;
        if x == 0.0 || x == 1.0 {
            return Ok(None);
        }
        self.brents_at(x).map(Some)
    }

    fn brents_at(&mut self, x: f64) -> std::result::Result<f64, Signal> {
        let u = slerp(&unit_of(&self.above.pos), &unit_of(&self.below.pos), x);
        self.set_on_top(&u);
        self.fitness(Method::Brents)
    }

    /// Restarted downhill simplex; alternates triangles near `above` and far
    /// from it and halves their size every second try.
    fn simplex(&mut self) -> Result<f64> {
        let distance = angle(&self.above.pos, &self.below.pos);
        let radius = MIN_SEARCH_RADIUS.max(distance / 2.0);
        let mut d = SIMPLEX_INITIAL_SIZE;
        restarted_simplex(SIMPLEX_MAX_TRIES, SIMPLEX_TOLERANCE, |attempt| -> Result<SimplexMin> {
            let start = if attempt % 2 == 1 {
                [
                    [0.0, radius * SIMPLEX_NEAR_START],
                    [-radius * d, radius * d],
                    [radius * d, radius * d],
                ]
            } else {
                let tri = [
                    [0.0, radius * SIMPLEX_FAR_START],
                    [-radius * d, radius * (1.0 - d)],
                    [radius * d, radius * (1.0 - d)],
                ];
                d *= 0.5;
                tri
            };
            let found = nelder_mead(
                |x| self.simplex_at(x),
                start,
                SIMPLEX_TOLERANCE,
                SIMPLEX_MAX_ITER,
            )?;
            // leave the node at the best vertex
            let fx = self.simplex_at(&found.x)?;
            Ok(SimplexMin { fx, ..found })
        })
    }

    /// `x[1]`: angle from `above` toward `below`; `x[0]`: rotation out of
    /// the neighbour plane.
    fn simplex_at(&mut self, x: &[f64; 2]) -> Result<f64> {
        let ua = unit_of(&self.above.pos);
        let u = self.vtp * x[1].sin() + (ua * x[0].cos() + self.oop * x[0].sin()) * x[1].cos();
        let u = unit_of(&u);
        self.set_on_top(&u);
        self.fitness(Method::Simplex).map_err(Signal::into_error)
    }

    /// Nudge the node off `near` toward `far` when it sits on a neighbour.
    fn move_off(&mut self, near: Vec3, far: Vec3) -> Result<Vec3> {
        let un = unit_of(&near);
        let uf = unit_of(&far);
        let (t, len) = cross_normal(&un.cross(&uf), &un);
        let t = if len == 0.0 { any_tangent(&un) } else { t };
        let u = unit_of(&(near + t * (2.0 * MIN_NEIGHBOR_VECTOR)));
        self.set_on_top(&u);
        match unit_and_len(&(near - self.node.pos)) {
            Some((v, l)) if l >= MIN_NEIGHBOR_VECTOR => Ok(v),
            _ => Err(BenderError::nonfatal(format!(
                "node on layer {} produces a zero length neighbour vector",
                self.major
            ))),
        }
    }

    fn fitness(&mut self, method: Method) -> std::result::Result<f64, Signal> {
        let model = self.ctx.model;
        self.misfit_evaluated = false;

        let (above, below) = (self.above.pos, self.below.pos);
        let mut va = match unit_and_len(&(above - self.node.pos)) {
            Some((v, l)) if l >= MIN_NEIGHBOR_VECTOR => v,
            _ => self.move_off(above, below)?,
        };
        let vb = match unit_and_len(&(below - self.node.pos)) {
            Some((v, l)) if l >= MIN_NEIGHBOR_VECTOR => v,
            _ => {
                let v = self.move_off(below, above)?;
                if let Some((v2, _)) = unit_and_len(&(above - self.node.pos)) {
                    va = v2;
                }
                v
            }
        };
        let u = self.node.unit();
        let normal = model.layer_normal(self.major, &u);
        let na = va.dot(&normal);
        let nb = vb.dot(&normal);

        let (mut oop, len) = cross_normal(&va, &vb);
        if len < MIN_CROSS {
            let (o, l) = cross_normal(&va, &normal);
            if l < MIN_CROSS {
                return Ok(0.0);
            }
            oop = o;
        }
        let (mut head, _) = cross_normal(&oop, &normal);

        let (slow_above, slow_below);
        if self.reflection {
            if na <= 0.0 && nb <= 0.0 {
                oop = -oop;
                head = -head;
            }
            let da = va.dot(&head);
            let db = vb.dot(&head);
            if da > 0.0 {
                let f = -2.0 * (1.0 + da);
                return Ok(if method == Method::Simplex { -f } else { f });
            } else if db < 0.0 {
                return Ok(2.0 * (1.0 - db));
            }
            let layer = self.reflection_layer;
            let node_side = self.node_slowness(layer, self.above.wave);
            slow_above = 0.5 * model.slowness(&above, layer, self.above.wave) + 0.5 * node_side;
            let node_side = self.node_slowness(layer, self.below.wave);
            slow_below = 0.5 * model.slowness(&below, layer, self.below.wave) + 0.5 * node_side;
        } else {
            let mut da = va.dot(&head);
            let mut db = vb.dot(&head);
            let flip = if da >= 0.0 && db >= 0.0 {
                na.abs() < nb.abs()
            } else {
                da >= 0.0
            };
            if flip {
                oop = -oop;
                head = -head;
                da = -da;
                db = -db;
            }
            if da > 0.0 {
                let f = 2.0 * (1.0 + da);
                return Ok(if method == Method::Brents { -f } else { f });
            } else if db < 0.0 {
                return Ok(2.0 * (1.0 - db));
            }
            let la = self.layer_above;
            slow_above = 0.5 * model.slowness(&above, la, self.above.wave)
                + 0.5 * self.node_slowness(la, self.above.wave);
            slow_below = 0.5 * model.slowness(&below, self.major, self.below.wave)
                + 0.5 * model.slowness_top(self.major, &u, self.below.wave);
        }

        let sin = |c: f64| if c * c < 1.0 { (1.0 - c * c).sqrt() } else { 0.0 };
        let err = sin(na) * slow_above - sin(nb) * slow_below;
        let (normal_above, _) = cross_normal(&head, &oop);
        let nan_dot = normal_above.dot(&normal);
        if err.is_nan() {
            let what = if slow_above.is_nan() {
                "slowness (above) evaluation was NaN"
            } else if slow_below.is_nan() {
                "slowness (below) evaluation was NaN"
            } else {
                "Snell's law misfit evaluation was NaN"
            };
            return Err(BenderError::fatal(what).into());
        }
        self.err_snell = err;
        self.normal_above_dot_normal = nan_dot;
        self.misfit_evaluated = true;

        match method {
            Method::Brents => {
                if nan_dot < 1.0 - BRENTS_OUT_OF_PLANE_EPS {
                    return Err(Signal::OutOfPlane);
                }
                Ok(err)
            }
            Method::Simplex => Ok((1.0 - nan_dot) + err.abs()),
        }
    }

    /// Slowness at the node in `layer`: the layer's bottom when the layer
    /// lies above the node's interface, its top otherwise.
    fn node_slowness(&self, layer: usize, wave: WaveType) -> f64 {
        let u = self.node.unit();
        if layer > self.major {
            self.ctx.model.slowness_bottom(layer, &u, wave)
        } else {
            self.ctx.model.slowness_top(layer, &u, wave)
        }
    }
}

fn unit_of(v: &Vec3) -> Vec3 {
    unit_and_len(v).map(|(u, _)| u).unwrap_or_else(Vec3::z)
}

/// First layer above `major` thick enough to carry a ray, clamped to the top.
fn layer_above(ctx: &RayCtx, major: usize, u: &Vec3) -> usize {
    ctx.model.next_layer(major, u, MIN_LAYER_THICKNESS)
}

fn neighbor(arena: &NodeArena, id: NodeId, wave: WaveType) -> Neighbor {
    Neighbor {
        pos: arena.pos(id),
        wave,
    }
}

fn invalidate_around(mesh: &mut Mesh, id: SegmentId) {
    let (prev, next) = (mesh.seg(id).prev, mesh.seg(id).next);
    for s in [Some(id), prev, next].into_iter().flatten() {
        mesh.seg_mut(s).invalidate();
    }
}

/// Place boundary `node` of segment `seg` by Snell's law and return the fitness.
///
/// Down-going nodes are the first node of the segment below the boundary,
/// up-going nodes the last. Reflection segments (collapsed bottom segments
/// and fixed top-side reflections) always place their middle node and copy it
/// onto both ends.
pub(crate) fn snells_law(
    mesh: &mut Mesh,
    seg: SegmentId,
    node: NodeId,
    dir: Direction,
    anchors: &Anchors,
    ctx: &RayCtx,
    force_brents: bool,
) -> Result<f64> {
    let model = ctx.model;
    let s = mesh.seg(seg);
    let u_node = mesh.nodes[node].unit();
    let major = mesh.nodes[node].layer;

    if matches!(s.kind, SegmentKind::Bend)
        && model.layer_thickness(major, &u_node) <= MIN_LAYER_THICKNESS
    {
        mesh.make_thin(seg);
        invalidate_around(mesh, seg);
        mesh.seg_mut(seg).fitness = 0.0;
        return Ok(0.0);
    }
    if !s.active {
        // the layer opened up again
        mesh.reactivate(seg);
    }
    let s = mesh.seg(seg);
    let la = layer_above(ctx, major, &u_node);

    let mut target = node;
    let mut reflection = None;
    let mut above = None;
    let mut below = None;
    match &s.kind {
        SegmentKind::FixedReflection(side) => {
            target = s.nodes[1.min(s.nodes.len() - 1)];
            reflection = Some(match side {
                ReflectionSide::TopSide => la,
                ReflectionSide::BottomSide => major,
            });
            if let Some(p) = s.prev {
                let p = mesh.seg(p);
                above = Some(neighbor(&mesh.nodes, p.next_to_last(), p.wave));
            }
            if let Some(n) = s.next {
                let n = mesh.seg(n);
                below = Some(neighbor(&mesh.nodes, n.second(), n.wave));
            }
        }
        SegmentKind::Bottom(b) if b.is_reflection => {
            target = b.middle;
            reflection = Some(la);
            let p = mesh.prev_where(seg, |x| x.major == la).map(|p| mesh.seg(p));
            let n = mesh.next_where(seg, |x| x.major == la).map(|n| mesh.seg(n));
            let (Some(p), Some(n)) = (p, n) else {
                return Ok(0.0);
            };
            above = Some(neighbor(&mesh.nodes, p.next_to_last(), p.wave));
            below = Some(neighbor(&mesh.nodes, n.second(), n.wave));
        }
        _ => match dir {
            Direction::Up | Direction::Reflection => {
                below = Some(neighbor(&mesh.nodes, s.next_to_last(), s.wave));
                if let Some(n) = mesh.next_where(seg, |x| x.major == la) {
                    let n = mesh.seg(n);
                    above = Some(neighbor(&mesh.nodes, n.second(), n.wave));
                }
            }
            Direction::Down => {
                below = Some(neighbor(&mesh.nodes, s.second(), s.wave));
                if let Some(p) = mesh.prev_where(seg, |x| x.major == la) {
                    let p = mesh.seg(p);
                    above = Some(neighbor(&mesh.nodes, p.next_to_last(), p.wave));
                }
            }
        },
    }

    let going_up = dir == Direction::Up;
    let above = above.unwrap_or_else(|| {
        if going_up {
            neighbor(&mesh.nodes, anchors.last, anchors.last_wave)
        } else {
            neighbor(&mesh.nodes, anchors.first, anchors.first_wave)
        }
    });
    let below = below.unwrap_or_else(|| {
        if going_up {
            neighbor(&mesh.nodes, anchors.first, anchors.first_wave)
        } else {
            neighbor(&mesh.nodes, anchors.last, anchors.last_wave)
        }
    });

    let mut start = mesh.nodes[target];
    start.layer = major;
    let mut search = Search::new(*ctx, start, above, below, la, reflection);
    let fitness = search.run(force_brents)?;
    mesh.nodes[target] = search.node;
    if reflection.is_some() {
        let (first, last) = (mesh.seg(seg).first(), mesh.seg(seg).last());
        mesh.nodes.copy(target, first);
        mesh.nodes.copy(target, last);
    }
    mesh.seg_mut(seg).fitness = fitness;
    invalidate_around(mesh, seg);
    Ok(fitness)
}

/// Bounce point of a bottom-side reflection connector between two branches.
///
/// The connector's middle node is reflected off the underside of its
/// interface. Neighbours come from the nearest segments at or below the layer
/// above, walking back from `prev_last` and forward from `next_first`. With
/// `fitness_only` the node is left in place and only its current misfit
/// `(1 − n_a·n) + |err|` is returned.
pub(crate) fn bounce_point(
    mesh: &mut Mesh,
    connector: SegmentId,
    prev_last: SegmentId,
    next_first: SegmentId,
    ctx: &RayCtx,
    fitness_only: bool,
) -> Result<f64> {
    let model = ctx.model;
    let c = mesh.seg(connector);
    let middle = c.nodes[1.min(c.nodes.len() - 1)];
    let (first, last) = (c.first(), c.last());
    let start = mesh.nodes[middle];
    let major = start.layer;
    let u = start.unit();
    if model.layer_thickness(major, &u) <= MIN_LAYER_THICKNESS {
        return Ok(0.0);
    }
    let la = layer_above(ctx, major, &u);

    let p = if mesh.seg(prev_last).major <= la {
        prev_last
    } else {
        mesh.prev_where(prev_last, |s| s.major <= la).unwrap_or(prev_last)
    };
    let n = if mesh.seg(next_first).major <= la {
        next_first
    } else {
        mesh.next_where(next_first, |s| s.major <= la).unwrap_or(next_first)
    };
    let (p, n) = (mesh.seg(p), mesh.seg(n));
    let above = neighbor(&mesh.nodes, p.next_to_last(), p.wave);
    let below = neighbor(&mesh.nodes, n.second(), n.wave);

    let mut search = Search::new(*ctx, start, above, below, la, Some(major));
    if fitness_only {
        return match search.fitness(Method::Brents) {
            Ok(f) if !search.misfit_evaluated => Ok(f.abs()),
            Ok(_) | Err(Signal::OutOfPlane) => {
                Ok((1.0 - search.normal_above_dot_normal) + search.err_snell.abs())
            }
            Err(Signal::Fail(e)) => Err(e),
        };
    }

    let fitness = search.run(false)?;
    mesh.nodes[middle] = search.node;
    mesh.nodes.copy(middle, first);
    mesh.nodes.copy(middle, last);
    let c = mesh.seg_mut(connector);
    c.fitness = fitness;
    c.invalidate();
    mesh.seg_mut(prev_last).invalidate();
    mesh.seg_mut(next_first).invalidate();
    Ok(fitness)
}
