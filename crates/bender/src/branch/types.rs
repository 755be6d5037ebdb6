//! Branch data: segment lists, anchors and convergence counters.

use serde::{Deserialize, Serialize};

use crate::geometry::{GreatCircle, Vec3};
use crate::level::Level;
use crate::node::NodeId;
use crate::segment::{Mesh, RayType, SegmentId, SegmentKind};
use crate::snell::Anchors;

/// Direction tag of a branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchKind {
    UpGoing,
    DownGoing,
    /// Down-going run, bottom segment, up-going run.
    Bottom,
    /// Down-going run, fixed reflection off the top of a layer, up-going run.
    TopSideReflection,
}

impl BranchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchKind::UpGoing => "UPGOING",
            BranchKind::DownGoing => "DOWNGOING",
            BranchKind::Bottom => "BOTTOM",
            BranchKind::TopSideReflection => "TOP_SIDE_REFLECTION",
        }
    }
}

/// Iteration counters and travel-time bookkeeping of one branch.
#[derive(Clone, Debug, Default)]
pub(crate) struct LoopState {
    pub n_outer: usize,
    pub n_inner: usize,
    pub n_increasing: usize,
    pub n_flipflop: usize,
    /// Direction of the last inner travel-time change; `true` = not increasing.
    pub tt_sign: bool,
    pub tt_inner: f64,
    pub tt_outer: f64,
    pub dt_inner: f64,
    pub dt_outer: f64,
    pub inner_converged: bool,
    pub outer_converged: bool,
}

/// Travel time, length and point count of a branch at its current geometry.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BranchMetrics {
    pub travel_time: f64,
    pub path_length: f64,
    pub n_points: usize,
}

impl BranchMetrics {
    /// Mean distance (km) between consecutive ray points.
    pub fn point_spacing(&self) -> f64 {
        self.path_length / self.n_points.max(1) as f64
    }
}

/// One branch of a ray. Segment ids index the ray's [`Mesh`].
#[derive(Clone, Debug)]
pub(crate) struct Branch {
    pub kind: BranchKind,
    /// Down-going run, source side first.
    pub down: Vec<SegmentId>,
    /// Bottom segment or fixed top-side reflection.
    pub turn: Option<SegmentId>,
    /// Up-going run, ending at the last anchor.
    pub up: Vec<SegmentId>,
    pub anchors: Anchors,
    /// Turning level of a bottom branch.
    pub level: Option<Level>,
    pub state: LoopState,
    pub metrics: BranchMetrics,
}

impl Branch {
    pub(crate) fn new(kind: BranchKind, anchors: Anchors) -> Self {
        Self {
            kind,
            down: Vec::new(),
            turn: None,
            up: Vec::new(),
            anchors,
            level: None,
            state: LoopState::default(),
            metrics: BranchMetrics::default(),
        }
    }

    /// Segment ids in chain order.
    pub(crate) fn segments(&self) -> impl DoubleEndedIterator<Item = SegmentId> + '_ {
        self.down
            .iter()
            .copied()
            .chain(self.turn)
            .chain(self.up.iter().copied())
    }

    pub(crate) fn ids(&self) -> Vec<SegmentId> {
        self.segments().collect()
    }

    pub(crate) fn first_segment(&self) -> Option<SegmentId> {
        self.segments().next()
    }

    pub(crate) fn last_segment(&self) -> Option<SegmentId> {
        self.segments().next_back()
    }

    /// Ray type of the turning segment; runs count as refractions.
    pub(crate) fn ray_type(&self, mesh: &Mesh) -> RayType {
        match (self.kind, self.turn) {
            (BranchKind::TopSideReflection, _) => RayType::Reflection,
            (BranchKind::Bottom, Some(t)) => mesh.seg(t).ray_type(),
            _ => RayType::Refraction,
        }
    }

    pub(crate) fn is_invalid(&self, mesh: &Mesh) -> bool {
        self.ray_type(mesh) == RayType::Invalid
    }

    /// Level the current ray type refers to (bottom branches only).
    pub(crate) fn ray_interface(&self, mesh: &Mesh) -> Option<Level> {
        self.turn
            .and_then(|t| mesh.seg(t).bottom_state())
            .map(|b| b.ray_interface)
    }

    /// Last node of the first segment, walking forward, that ends on `layer`.
    pub(crate) fn last_node_at_layer(&self, mesh: &Mesh, layer: usize) -> Option<NodeId> {
        self.segments()
            .map(|id| mesh.seg(id).last())
            .find(|&n| mesh.nodes[n].layer == layer)
    }

    /// First node of the first segment, walking backward, that starts on `layer`.
    pub(crate) fn first_node_at_layer(&self, mesh: &Mesh, layer: usize) -> Option<NodeId> {
        self.segments()
            .rev()
            .map(|id| mesh.seg(id).first())
            .find(|&n| mesh.nodes[n].layer == layer)
    }

    /// Node with the smallest radius.
    pub(crate) fn deepest_node(&self, mesh: &Mesh) -> NodeId {
        self.segments()
            .flat_map(|id| mesh.seg(id).nodes.iter().copied())
            .min_by(|&a, &b| mesh.nodes.radius(a).total_cmp(&mesh.nodes.radius(b)))
            .unwrap_or(self.anchors.first)
    }

    /// Largest major layer index along the branch.
    pub(crate) fn top_layer(&self, mesh: &Mesh) -> usize {
        self.segments().map(|id| mesh.seg(id).major).max().unwrap_or(0)
    }

    /// Smallest major layer index along the branch.
    pub(crate) fn bottom_layer(&self, mesh: &Mesh) -> usize {
        self.segments().map(|id| mesh.seg(id).major).min().unwrap_or(0)
    }

    /// Largest distance (km) of any node but the first from the plane of `gc`.
    pub(crate) fn out_of_plane(&self, mesh: &Mesh, gc: &GreatCircle) -> f64 {
        self.segments()
            .flat_map(|id| mesh.seg(id).nodes.iter().copied())
            .filter(|&n| n != self.anchors.first)
            .map(|n| gc.transform(&mesh.nodes.pos(n)).z.abs())
            .fold(0.0, f64::max)
    }

    /// Node positions in chain order. With `dedup` a node equal to the one
    /// before it (shared boundaries, collapsed reflections) is skipped.
    pub(crate) fn node_positions(&self, mesh: &Mesh, dedup: bool) -> Vec<Vec3> {
        let mut out: Vec<Vec3> = Vec::new();
        for id in self.segments() {
            for &n in &mesh.seg(id).nodes {
                let p = mesh.nodes.pos(n);
                if dedup && out.last().is_some_and(|q| (q - p).norm() < 1e-9) {
                    continue;
                }
                out.push(p);
            }
        }
        out
    }

    /// Segment ids excluding fixed reflections, whose nodes carry no travel time.
    pub(crate) fn timed_segments<'a>(
        &'a self,
        mesh: &'a Mesh,
    ) -> impl Iterator<Item = SegmentId> + 'a {
        self.segments()
            .filter(|&id| !matches!(mesh.seg(id).kind, SegmentKind::FixedReflection(_)))
    }
}
