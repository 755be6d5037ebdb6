//! Bottom-side reflection points between consecutive legs.
//!
//! The bounce node lives in a three-node fixed-reflection connector segment:
//! its first node is the last anchor of the leg before, its last node the
//! first anchor of the leg after, and the middle node is the one Snell's law
//! moves. Every move is recorded so the ray loop can detect a point that
//! oscillates between two positions.

use crate::cfg::RayCtx;
use crate::error::Result;
use crate::geometry::Vec3;
use crate::node::NodeId;
use crate::segment::{Mesh, SegmentId};
use crate::snell::bounce_point;

/// A point is still moving while its last move exceeds this fraction of its
/// first move and [`STILL_MOVING_KM`].
const STILL_MOVING_FRACTION: f64 = 0.005;
const STILL_MOVING_KM: f64 = 0.003;

#[derive(Clone, Debug)]
pub(crate) struct BouncePoint {
    pub connector: SegmentId,
    /// Layer whose top the ray reflects off from below.
    pub layer: usize,
    first_pos: Option<Vec3>,
    /// Signed length (km) of the last and first moves; negative when the
    /// point moved toward the start of the leg before it.
    last_move: f64,
    first_move: f64,
    pub total_move: f64,
    pub moves: usize,
}

impl BouncePoint {
    pub(crate) fn new(connector: SegmentId, layer: usize) -> Self {
        Self {
            connector,
            layer,
            first_pos: None,
            last_move: 0.0,
            first_move: 0.0,
            total_move: 0.0,
            moves: 0,
        }
    }

    pub(crate) fn middle(&self, mesh: &Mesh) -> NodeId {
        let nodes = &mesh.seg(self.connector).nodes;
        nodes[1.min(nodes.len() - 1)]
    }

    pub(crate) fn is_moving(&self) -> bool {
        self.first_move == 0.0
            || ((self.last_move / self.first_move).abs() > STILL_MOVING_FRACTION
                && self.last_move.abs() > STILL_MOVING_KM)
    }

    /// Move the point by Snell's law between segment `prev_last` (end of the
    /// leg before) and `next_first` (start of the leg after). `origin` is the
    /// first anchor of the leg before. Returns whether the move reversed the
    /// direction of the previous one.
    pub(crate) fn relax(
        &mut self,
        mesh: &mut Mesh,
        (prev_last, next_first): (SegmentId, SegmentId),
        origin: &Vec3,
        ctx: &RayCtx,
    ) -> Result<bool> {
        let middle = self.middle(mesh);
        let pre = mesh.nodes.pos(middle);
        let first = *self.first_pos.get_or_insert(pre);
        bounce_point(mesh, self.connector, prev_last, next_first, ctx, false)?;
        let post = mesh.nodes.pos(middle);

        let mut dist = (post - pre).norm();
        if (pre - origin).norm() > (post - origin).norm() {
            dist = -dist;
        }
        let flipped = self.last_move != 0.0 && dist * self.last_move < 0.0;
        self.last_move = dist;
        if self.first_move == 0.0 {
            self.first_move = dist;
        }
        self.total_move = (post - first).norm();
        self.moves += 1;
        Ok(flipped)
    }

    /// Current Snell misfit without moving the point.
    pub(crate) fn fitness(
        &self,
        mesh: &mut Mesh,
        (prev_last, next_first): (SegmentId, SegmentId),
        ctx: &RayCtx,
    ) -> Result<f64> {
        bounce_point(mesh, self.connector, prev_last, next_first, ctx, true)
    }
}
