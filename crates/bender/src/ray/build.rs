//! Initial ray geometry from a phase topology.
//!
//! Legs are built left to right. A leg that ends on a bottom-side reflection
//! gets a bounce node on top of the reflecting layer, spread evenly along the
//! source-receiver arc, plus the connector segment whose last node anchors
//! the next leg.

use crate::bottom_levels::BottomLevels;
use crate::branch::{self, BottomPlan};
use crate::cfg::{RayCtx, MIN_LAYER_THICKNESS, MIN_UPGOING_ONLY_ANGLE_DEG, ON_BOUNDARY_TOL};
use crate::error::{BenderError, Result};
use crate::geometry::{angle, slerp, unit_and_len, Vec3};
use crate::model::{VelocityModel, WaveType};
use crate::node::{Node, NodeId};
use crate::phase::{LegEnd, LegPlan, PhaseTopology};
use crate::segment::{Mesh, ReflectionSide, Segment, SegmentKind};

use super::bounce::BouncePoint;
use super::leg::Leg;
use super::{RayPath, RayStatus};

/// Ray end point; a point above the top of the model is rejected.
fn end_node(mesh: &mut Mesh, model: &dyn VelocityModel, pos: Vec3, name: &str) -> Result<NodeId> {
    let top = model.n_layers().saturating_sub(1);
    let layer = model.interface_index(&pos);
    if layer > top {
        let u = unit_and_len(&pos).map(|(u, _)| u).unwrap_or_else(Vec3::z);
        if pos.norm() > model.radius_top(top, &u) + ON_BOUNDARY_TOL {
            return Err(BenderError::nonfatal(format!(
                "{name} is shallower than surface of model"
            )));
        }
    }
    Ok(mesh.nodes.push(Node::new(pos, layer.min(top))))
}

/// Layer of the bottom-side reflection a leg ends on.
fn bounce_layer(plan: &LegPlan) -> Option<usize> {
    match plan {
        LegPlan::Refraction {
            end: LegEnd::BottomSideReflection { layer },
            ..
        }
        | LegPlan::TopSideReflection {
            end: LegEnd::BottomSideReflection { layer },
            ..
        }
        | LegPlan::UpGoing { layer, .. } => Some(*layer),
        _ => None,
    }
}

/// A ray end next to a bounce must lie below the top of the reflecting layer.
fn check_below_bounce(
    mesh: &Mesh,
    model: &dyn VelocityModel,
    end: NodeId,
    layer: usize,
    name: &str,
) -> Result<()> {
    let u = mesh.nodes[end].unit();
    if mesh.nodes.radius(end) > model.radius_top(layer, &u) - MIN_LAYER_THICKNESS {
        return Err(BenderError::nonfatal(format!(
            "{name} is not below the reflecting interface of layer {layer}"
        )));
    }
    Ok(())
}

/// Wave type of the last branch of a leg.
fn arriving_wave(plan: &LegPlan) -> WaveType {
    match *plan {
        LegPlan::Direct { wave } | LegPlan::UpGoing { wave, .. } | LegPlan::DownGoing { wave } => {
            wave
        }
        LegPlan::Refraction { up_wave, .. } | LegPlan::TopSideReflection { up_wave, .. } => {
            up_wave
        }
    }
}

/// The chord from `first` to `last` leaves `first` within a small angle of
/// its vertical: the leg cannot turn and goes straight up.
fn is_upgoing_only(mesh: &Mesh, first: NodeId, last: NodeId) -> bool {
    let chord = mesh.nodes.pos(last) - mesh.nodes.pos(first);
    let Some((d, _)) = unit_and_len(&chord) else {
        return false;
    };
    angle(&d, &mesh.nodes[first].unit()).to_degrees() <= MIN_UPGOING_ONLY_ANGLE_DEG
}

fn build_leg(
    mesh: &mut Mesh,
    ctx: &RayCtx,
    plan: &LegPlan,
    (first, last): (NodeId, NodeId),
    (first_is_source, last_is_receiver): (bool, bool),
) -> Result<Leg> {
    let b = match *plan {
        LegPlan::Direct { wave } => branch::direct(mesh, ctx, first, last, wave)?,
        LegPlan::UpGoing { wave, .. } => branch::up_going(mesh, ctx, first, last, wave)?,
        LegPlan::DownGoing { wave } => branch::down_going(mesh, ctx, first, last, wave)?,
        LegPlan::TopSideReflection {
            layer,
            down_wave,
            up_wave,
            ..
        } => branch::top_side_reflection(mesh, ctx, first, last, layer, (down_wave, up_wave))?,
        LegPlan::Refraction {
            levels,
            down_wave,
            up_wave,
            ..
        } => {
            if is_upgoing_only(mesh, first, last) {
                tracing::debug!("refraction leg built as a single up-going branch");
                branch::up_going(mesh, ctx, first, last, down_wave)?
            } else {
                let plan = BottomPlan {
                    first,
                    last,
                    levels,
                    index: 0,
                    down_wave,
                    up_wave,
                    first_is_source,
                    last_is_receiver,
                };
                return Ok(Leg::Levels(BottomLevels::build(mesh, ctx, &plan)?));
            }
        }
    };
    Ok(Leg::Branch(b))
}

impl RayPath {
    /// Build every leg of `phase` between `source` and `receiver`.
    pub(crate) fn build(
        ctx: &RayCtx,
        source: Vec3,
        receiver: Vec3,
        phase: &PhaseTopology,
    ) -> Result<Self> {
        let model = ctx.model;
        let mut mesh = Mesh::new();
        let src = end_node(&mut mesh, model, source, "Source")?;
        let rcv = end_node(&mut mesh, model, receiver, "Receiver")?;
        let plans = phase.legs()?;
        let n_bounces = phase.bottom_side_reflection_count();
        let (u_src, u_rcv) = (mesh.nodes[src].unit(), mesh.nodes[rcv].unit());

        let mut legs = Vec::with_capacity(plans.len());
        let mut bounces: Vec<BouncePoint> = Vec::with_capacity(n_bounces);
        let mut first = src;
        for plan in &plans {
            let end = bounce_layer(plan);
            match (plan, end, bounces.last()) {
                (LegPlan::UpGoing { .. }, Some(layer), _) if first == src => {
                    check_below_bounce(&mesh, model, src, layer, "Source")?;
                }
                (LegPlan::DownGoing { .. }, None, Some(bp)) => {
                    check_below_bounce(&mesh, model, rcv, bp.layer, "Receiver")?;
                }
                _ => {}
            }
            let last = match end {
                Some(layer) => {
                    let f = (bounces.len() + 1) as f64 / (n_bounces + 1) as f64;
                    let u = slerp(&u_src, &u_rcv, f);
                    mesh.nodes.push(Node::on_top(model, layer, &u))
                }
                None => rcv,
            };
            let leg = build_leg(
                &mut mesh,
                ctx,
                plan,
                (first, last),
                (first == src, last == rcv),
            )?;

            if let Some(layer) = end {
                let wave = arriving_wave(plan);
                let middle = mesh.nodes.duplicate(last);
                let next = mesh.nodes.duplicate(last);
                let connector = mesh.push(Segment::with_kind(
                    vec![last, middle, next],
                    layer,
                    wave,
                    SegmentKind::FixedReflection(ReflectionSide::BottomSide),
                ));
                bounces.push(BouncePoint::new(connector, layer));
                first = next;
            }
            legs.push(leg);
        }

        Ok(Self {
            mesh,
            legs,
            bounces,
            source: src,
            receiver: rcv,
            status: RayStatus::InitialRay,
        })
    }
}
