//! Ray nodes and the per-ray node arena.
//!
//! A node is a Cartesian position (km, Earth centered) plus the index of the
//! layer it sits at or within. A node on the top boundary of layer `i` carries
//! index `i`. Boundary nodes live once in the arena; the two segments that meet
//! there both hold the same [`NodeId`], so moving the node moves both segment
//! ends. Only the segment or Snell step currently relaxing a node writes to it.

use std::ops::{Index, IndexMut};

use crate::geometry::{slerp, unit_and_len, Vec3};
use crate::model::VelocityModel;

/// Index of a node in its ray's [`NodeArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Node {
    pub pos: Vec3,
    pub layer: usize,
}

impl Node {
    pub fn new(pos: Vec3, layer: usize) -> Self {
        Self { pos, layer }
    }

    /// Node on the top boundary of `layer` below unit direction `dir`.
    pub fn on_top(model: &dyn VelocityModel, layer: usize, dir: &Vec3) -> Self {
        Self {
            pos: dir * model.radius_top(layer, dir),
            layer,
        }
    }

    pub fn radius(&self) -> f64 {
        self.pos.norm()
    }

    /// Unit direction of the node; `z` for a node at the Earth center.
    pub fn unit(&self) -> Vec3 {
        unit_and_len(&self.pos).map(|(u, _)| u).unwrap_or_else(Vec3::z)
    }

    /// Keep the direction, change the radius.
    pub fn set_radius(&mut self, r: f64) {
        self.pos = self.unit() * r;
    }

    /// Snap radially onto the top boundary of `layer` and take its index.
    pub fn set_top(&mut self, model: &dyn VelocityModel, layer: usize) {
        let u = self.unit();
        self.layer = layer;
        self.pos = u * model.radius_top(layer, &u);
    }

    pub fn radius_top(&self, model: &dyn VelocityModel, layer: usize) -> f64 {
        model.radius_top(layer, &self.unit())
    }

    pub fn radius_bottom(&self, model: &dyn VelocityModel, layer: usize) -> f64 {
        model.radius_bottom(layer, &self.unit())
    }

    /// Thickness of the node's own layer below the node.
    pub fn layer_thickness(&self, model: &dyn VelocityModel) -> f64 {
        model.layer_thickness(self.layer, &self.unit())
    }

    pub fn distance(&self, other: &Node) -> f64 {
        (self.pos - other.pos).norm()
    }
}

/// Point at fraction `f` of the straight chord from `a` to `b`.
pub fn chord_point(a: &Vec3, b: &Vec3, f: f64) -> Vec3 {
    a + (b - a) * f
}

/// Point at fraction `f` along the great circle from `a` to `b` with the radius
/// interpolated linearly between the two end radii.
pub fn arc_point(a: &Vec3, b: &Vec3, f: f64) -> Vec3 {
    let (ra, rb) = (a.norm(), b.norm());
    let ua = unit_and_len(a).map(|(u, _)| u).unwrap_or_else(Vec3::z);
    let ub = unit_and_len(b).map(|(u, _)| u).unwrap_or(ua);
    slerp(&ua, &ub, f) * (ra + (rb - ra) * f)
}

/// Arena owning every node of one ray.
#[derive(Clone, Debug, Default)]
pub struct NodeArena {
    nodes: Vec<Node>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn pos(&self, id: NodeId) -> Vec3 {
        self.nodes[id.0].pos
    }

    pub fn radius(&self, id: NodeId) -> f64 {
        self.nodes[id.0].radius()
    }

    /// Copy position and layer of `from` onto `to`.
    pub fn copy(&mut self, from: NodeId, to: NodeId) {
        if from != to {
            self.nodes[to.0] = self.nodes[from.0];
        }
    }

    /// Copy only the position of `from` onto `to`.
    pub fn copy_pos(&mut self, from: NodeId, to: NodeId) {
        let p = self.nodes[from.0].pos;
        self.nodes[to.0].pos = p;
    }

    /// New node with the same position and layer as `id`.
    pub fn duplicate(&mut self, id: NodeId) -> NodeId {
        let n = self.nodes[id.0];
        self.push(n)
    }
}

impl Index<NodeId> for NodeArena {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }
}

impl IndexMut<NodeId> for NodeArena {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }
}
