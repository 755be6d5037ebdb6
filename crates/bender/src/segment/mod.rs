//! Ray segments: node chains spanning one layer.
//!
//! Purpose
//! - A [`Segment`] is an ordered list of [`NodeId`]s whose end nodes sit on
//!   layer boundaries (or are the ray's source/receiver). Adjacent segments
//!   share their boundary node by id.
//! - Three kinds: plain bending segments, the bottom segment of a refraction
//!   leg (turning node plus ray-type classification), and three-node fixed
//!   reflection segments at bounce points.
//!
//! Why this design
//! - Segments live in a per-ray [`Mesh`] next to the node arena and link to
//!   their neighbours by [`SegmentId`]. The "nearest segment in direction"
//!   walks are index-chasing loops over these links; every chain ends in
//!   `None` at the branch anchors.
//! - Each segment carries two link pairs: the initial chain, fixed once the
//!   branch is built, and the active chain, which skips pinched-out segments.
//!   A pinched-out segment is collapsed in place (see [`Segment::make_thin`])
//!   and unlinked from the active chain only; its own links keep pointing at
//!   its old neighbours so walks starting from it still work.
//!
//! References
//! - Um, J. & Thurber, C. (1987), BSSA 77(3): bending update, see `bend.rs`.

mod bend;
mod bottom;

use serde::{Deserialize, Serialize};

use crate::cfg::RayCtx;
use crate::level::Level;
use crate::model::{VelocityModel, WaveType};
use crate::node::{NodeArena, NodeId};

/// Index of a segment in its ray's [`Mesh`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SegmentId(pub usize);

/// Classification of a bottom segment (and of a whole ray).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RayType {
    Refraction,
    Reflection,
    TopSideDiffraction,
    BottomSideDiffraction,
    Invalid,
}

impl RayType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RayType::Refraction => "REFRACTION",
            RayType::Reflection => "REFLECTION",
            RayType::TopSideDiffraction => "TOP_SIDE_DIFFRACTION",
            RayType::BottomSideDiffraction => "BOTTOM_SIDE_DIFFRACTION",
            RayType::Invalid => "INVALID",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReflectionSide {
    TopSide,
    BottomSide,
}

/// Turning-point bookkeeping of a bottom segment.
#[derive(Clone, Debug, PartialEq)]
pub struct BottomState {
    /// Level the branch turns at.
    pub active: Level,
    /// Level just below `active`; nodes never sink below it.
    pub previous: Level,
    /// Branch first/last anchor starts below the active level.
    pub first_deep: bool,
    pub last_deep: bool,
    /// Turning node.
    pub middle: NodeId,
    pub is_reflection: bool,
    pub ray_type: RayType,
    /// Level the current `ray_type` refers to.
    pub ray_interface: Level,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SegmentKind {
    Bend,
    Bottom(BottomState),
    FixedReflection(ReflectionSide),
}

#[derive(Clone, Debug)]
pub struct Segment {
    pub nodes: Vec<NodeId>,
    /// Layer whose velocity law applies along the segment.
    pub major: usize,
    pub wave: WaveType,
    pub kind: SegmentKind,
    /// Neighbours on the active chain.
    pub prev: Option<SegmentId>,
    pub next: Option<SegmentId>,
    /// Neighbours as built; never rewired.
    pub initial_prev: Option<SegmentId>,
    pub initial_next: Option<SegmentId>,
    /// Member of the active chain.
    pub active: bool,
    /// Last Snell fitness of the node this segment relaxes.
    pub fitness: f64,
    travel_time: Option<f64>,
    path_length: Option<f64>,
}

impl Segment {
    /// Bending segment; its major layer is the larger end layer index.
    pub fn bend(nodes: Vec<NodeId>, arena: &NodeArena, wave: WaveType) -> Self {
        let major = match (nodes.first(), nodes.last()) {
            (Some(&a), Some(&b)) => arena[a].layer.max(arena[b].layer),
            _ => 0,
        };
        Self::with_kind(nodes, major, wave, SegmentKind::Bend)
    }

    pub fn with_kind(nodes: Vec<NodeId>, major: usize, wave: WaveType, kind: SegmentKind) -> Self {
        Self {
            nodes,
            major,
            wave,
            kind,
            prev: None,
            next: None,
            initial_prev: None,
            initial_next: None,
            active: true,
            fitness: 0.0,
            travel_time: None,
            path_length: None,
        }
    }

    pub fn first(&self) -> NodeId {
        self.nodes[0]
    }

    pub fn last(&self) -> NodeId {
        self.nodes[self.nodes.len() - 1]
    }

    /// Second node; the last node of a two-node segment.
    pub fn second(&self) -> NodeId {
        self.nodes[1.min(self.nodes.len() - 1)]
    }

    pub fn next_to_last(&self) -> NodeId {
        self.nodes[self.nodes.len().saturating_sub(2)]
    }

    pub fn is_bottom(&self) -> bool {
        matches!(self.kind, SegmentKind::Bottom(_))
    }

    pub fn bottom_state(&self) -> Option<&BottomState> {
        match &self.kind {
            SegmentKind::Bottom(b) => Some(b),
            _ => None,
        }
    }

    pub fn bottom_state_mut(&mut self) -> Option<&mut BottomState> {
        match &mut self.kind {
            SegmentKind::Bottom(b) => Some(b),
            _ => None,
        }
    }

    /// Drop cached travel time and path length after any node moved.
    pub fn invalidate(&mut self) {
        self.travel_time = None;
        self.path_length = None;
    }

    fn evaluate(&mut self, arena: &NodeArena, model: &dyn VelocityModel) {
        let mut tt = 0.0;
        let mut len = 0.0;
        let mut prev = arena[self.nodes[0]].pos;
        let mut s1 = model.slowness(&prev, self.major, self.wave);
        for &id in &self.nodes[1..] {
            let p = arena[id].pos;
            let dkm = (p - prev).norm();
            len += dkm;
            let s2 = model.slowness(&p, self.major, self.wave);
            if s1 > 1e-6 && s2 > 1e-6 {
                tt += dkm * 0.5 * (s1 + s2);
            }
            s1 = s2;
            prev = p;
        }
        self.travel_time = Some(tt);
        self.path_length = Some(len);
    }

    /// Trapezoid travel time (s) along the chain, cached until invalidated.
    pub fn travel_time(&mut self, arena: &NodeArena, model: &dyn VelocityModel) -> f64 {
        match self.travel_time {
            Some(t) => t,
            None => {
                self.evaluate(arena, model);
                self.travel_time.unwrap_or(0.0)
            }
        }
    }

    pub fn path_length(&mut self, arena: &NodeArena, model: &dyn VelocityModel) -> f64 {
        match self.path_length {
            Some(l) => l,
            None => {
                self.evaluate(arena, model);
                self.path_length.unwrap_or(0.0)
            }
        }
    }

    /// Mean node spacing (km).
    pub fn spacing(&mut self, arena: &NodeArena, model: &dyn VelocityModel) -> f64 {
        let n = self.nodes.len().saturating_sub(1).max(1);
        self.path_length(arena, model) / n as f64
    }

    /// Collapse a pinched-out segment onto one boundary: keep only the end
    /// nodes and move the end with the larger layer index onto the other.
    pub fn make_thin(&mut self, arena: &mut NodeArena) {
        if self.nodes.len() > 2 {
            let (f, l) = (self.first(), self.last());
            self.nodes = vec![f, l];
        }
        let (f, l) = (self.first(), self.last());
        let (lf, ll) = (arena[f].layer, arena[l].layer);
        if lf > ll {
            arena.copy(l, f);
        } else if ll > lf {
            arena.copy(f, l);
        }
        self.invalidate();
    }

    /// Bend every interior node, from the chain midpoint outward.
    pub(crate) fn bend_nodes(&mut self, arena: &mut NodeArena, ctx: &RayCtx) {
        match &self.kind {
            SegmentKind::Bend => {}
            SegmentKind::Bottom(b) if !b.is_reflection => {}
            _ => return,
        }
        let size = self.nodes.len();
        if size <= 2 {
            return;
        }
        self.invalidate();
        let n = size / 2;
        let dec = usize::from(size % 2 == 0);
        for i in n..n + (n - dec) {
            self.bend3(arena, ctx, i);
        }
        for i in (1..n).rev() {
            self.bend3(arena, ctx, i);
        }
    }

    fn bend3(&mut self, arena: &mut NodeArena, ctx: &RayCtx, i: usize) {
        let (prev, node, next) = (self.nodes[i - 1], self.nodes[i], self.nodes[i + 1]);
        match &self.kind {
            SegmentKind::Bottom(b) => bottom::bend3(b, self.major, self.wave, arena, ctx, prev, node, next),
            _ => bend::bend3(self.major, self.wave, arena, ctx, prev, node, next),
        }
    }

    /// Split every node pair when mean spacing exceeds `threshold` (bottom
    /// segments use their own per-side threshold) and bend the new nodes.
    pub(crate) fn double_nodes(&mut self, arena: &mut NodeArena, ctx: &RayCtx, threshold: f64) {
        match self.kind {
            SegmentKind::Bend => bend::double_nodes(self, arena, ctx, threshold),
            SegmentKind::Bottom(_) => bottom::double_nodes(self, arena, ctx),
            SegmentKind::FixedReflection(_) => {}
        }
    }

    /// Thin the chain back toward the node count it was built with.
    pub(crate) fn reset_to_initial_node_density(&mut self) {
        match &self.kind {
            SegmentKind::Bend if self.nodes.len() > 3 => {
                let n = self.nodes.len();
                self.nodes = vec![self.nodes[0], self.nodes[(n - 1) / 2], self.nodes[n - 1]];
                self.invalidate();
            }
            SegmentKind::Bottom(b) if self.nodes.len() > 5 => {
                let n = self.nodes.len();
                let Some(mid) = self.nodes.iter().position(|&id| id == b.middle) else {
                    return;
                };
                let down = mid / 2;
                let up = (n - 1 - mid) / 2 + mid;
                let mut keep = vec![0, down, mid, up, n - 1];
                keep.dedup();
                self.nodes = keep.into_iter().map(|i| self.nodes[i]).collect();
                self.invalidate();
            }
            _ => {}
        }
    }

    /// Current ray type; only bottom segments classify, others refract.
    pub fn ray_type(&self) -> RayType {
        self.bottom_state()
            .map(|b| b.ray_type)
            .unwrap_or(RayType::Refraction)
    }
}

/// Node arena plus segment arena of one ray.
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub nodes: NodeArena,
    pub segs: Vec<Segment>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, seg: Segment) -> SegmentId {
        self.segs.push(seg);
        SegmentId(self.segs.len() - 1)
    }

    /// Link `ids` into one chain, initial and active alike; the ends keep
    /// whatever links they had outward.
    pub fn chain(&mut self, ids: &[SegmentId]) {
        for w in ids.windows(2) {
            let (a, b) = (w[0].0, w[1].0);
            self.segs[a].next = Some(w[1]);
            self.segs[a].initial_next = Some(w[1]);
            self.segs[b].prev = Some(w[0]);
            self.segs[b].initial_prev = Some(w[0]);
        }
    }

    /// Unlink `id` from the active chain. Its neighbours are joined.
    pub fn deactivate(&mut self, id: SegmentId) {
        let seg = &mut self.segs[id.0];
        if !seg.active {
            return;
        }
        seg.active = false;
        let (prev, next) = (seg.prev, seg.next);
        if let Some(p) = prev {
            self.segs[p.0].next = next;
        }
        if let Some(n) = next {
            self.segs[n.0].prev = prev;
        }
    }

    /// Put `id` back between its nearest active neighbours on the initial
    /// chain.
    pub fn reactivate(&mut self, id: SegmentId) {
        if self.segs[id.0].active {
            return;
        }
        let mut prev = self.segs[id.0].initial_prev;
        while let Some(p) = prev.filter(|p| !self.segs[p.0].active) {
            prev = self.segs[p.0].initial_prev;
        }
        let mut next = self.segs[id.0].initial_next;
        while let Some(n) = next.filter(|n| !self.segs[n.0].active) {
            next = self.segs[n.0].initial_next;
        }
        let seg = &mut self.segs[id.0];
        seg.active = true;
        seg.prev = prev;
        seg.next = next;
        if let Some(p) = prev {
            self.segs[p.0].next = Some(id);
        }
        if let Some(n) = next {
            self.segs[n.0].prev = Some(id);
        }
    }

    pub fn seg(&self, id: SegmentId) -> &Segment {
        &self.segs[id.0]
    }

    pub fn seg_mut(&mut self, id: SegmentId) -> &mut Segment {
        &mut self.segs[id.0]
    }

    /// Nearest segment before `from` (exclusive) satisfying `pred`.
    pub fn prev_where(
        &self,
        from: SegmentId,
        pred: impl Fn(&Segment) -> bool,
    ) -> Option<SegmentId> {
        let mut cur = self.segs[from.0].prev;
        while let Some(id) = cur {
            if pred(&self.segs[id.0]) {
                return Some(id);
            }
            cur = self.segs[id.0].prev;
        }
        None
    }

    /// Nearest segment after `from` (exclusive) satisfying `pred`.
    pub fn next_where(
        &self,
        from: SegmentId,
        pred: impl Fn(&Segment) -> bool,
    ) -> Option<SegmentId> {
        let mut cur = self.segs[from.0].next;
        while let Some(id) = cur {
            if pred(&self.segs[id.0]) {
                return Some(id);
            }
            cur = self.segs[id.0].next;
        }
        None
    }

    pub fn travel_time(&mut self, id: SegmentId, model: &dyn VelocityModel) -> f64 {
        let Mesh { nodes, segs } = self;
        segs[id.0].travel_time(nodes, model)
    }

    pub fn path_length(&mut self, id: SegmentId, model: &dyn VelocityModel) -> f64 {
        let Mesh { nodes, segs } = self;
        segs[id.0].path_length(nodes, model)
    }

    pub(crate) fn bend(&mut self, id: SegmentId, ctx: &RayCtx) {
        let Mesh { nodes, segs } = self;
        segs[id.0].bend_nodes(nodes, ctx);
    }

    pub(crate) fn double_nodes(&mut self, id: SegmentId, ctx: &RayCtx, threshold: f64) {
        let Mesh { nodes, segs } = self;
        segs[id.0].double_nodes(nodes, ctx, threshold);
    }

    /// Collapse a pinched-out segment and drop it from the active chain.
    pub(crate) fn make_thin(&mut self, id: SegmentId) {
        let Mesh { nodes, segs } = self;
        segs[id.0].make_thin(nodes);
        self.deactivate(id);
    }
}

pub(crate) use bottom::{check_reflection, is_middle_only_active_node, update_ray_type};
