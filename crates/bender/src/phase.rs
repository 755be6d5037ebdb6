//! Phase topology: the ordered direction-change events of a ray.
//!
//! Purpose
//! - Describe a seismic phase as `Source`, zero or more bottoming and
//!   reflection events, and `Receiver`. Each event carries the wave type of
//!   the leg that leaves it.
//!
//! Why this design
//! - Phase-name parsing lives outside the solver. Callers build a
//!   [`PhaseTopology`] directly (or through the small constructors below) and
//!   the ray builder walks it through [`PhaseTopology::legs`], which rejects
//!   illegal event pairs with distinct nonfatal messages.

use serde::{Deserialize, Serialize};

use crate::error::{BenderError, Result};
use crate::level::LevelSet;
use crate::model::WaveType;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Source,
    /// Refraction leg turning at one of `levels`.
    Bottom { levels: LevelSet },
    /// Reflection off the top of `layer`, hit from above.
    TopSideReflection { layer: usize },
    /// Reflection off the underside of the top of `layer`, hit from below.
    BottomSideReflection { layer: usize },
    Receiver,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Source => "SOURCE",
            Event::Bottom { .. } => "BOTTOM",
            Event::TopSideReflection { .. } => "TOP_SIDE_REFLECTION",
            Event::BottomSideReflection { .. } => "BOTTOM_SIDE_REFLECTION",
            Event::Receiver => "RECEIVER",
        }
    }
}

/// An event plus the wave type of the leg leaving it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseEvent {
    pub event: Event,
    pub wave: WaveType,
}

impl PhaseEvent {
    pub fn new(event: Event, wave: WaveType) -> Self {
        Self { event, wave }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseTopology {
    pub events: Vec<PhaseEvent>,
}

/// Where a leg ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LegEnd {
    Receiver,
    /// Bounce point on the underside of the top of `layer`.
    BottomSideReflection { layer: usize },
}

/// One branch to build, derived from a pair (or triple) of events.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum LegPlan<'a> {
    /// `Source → Receiver`: straight up or down depending on the endpoint radii.
    Direct { wave: WaveType },
    Refraction {
        levels: &'a LevelSet,
        down_wave: WaveType,
        up_wave: WaveType,
        end: LegEnd,
    },
    TopSideReflection {
        layer: usize,
        down_wave: WaveType,
        up_wave: WaveType,
        end: LegEnd,
    },
    /// Up to a bottom-side bounce point.
    UpGoing { wave: WaveType, layer: usize },
    /// Down from a bottom-side bounce point to the receiver.
    DownGoing { wave: WaveType },
}

impl PhaseTopology {
    pub fn new(events: Vec<PhaseEvent>) -> Result<Self> {
        let topo = Self { events };
        topo.legs()?;
        Ok(topo)
    }

    /// Straight source-to-receiver ray.
    pub fn direct(wave: WaveType) -> Self {
        Self {
            events: vec![
                PhaseEvent::new(Event::Source, wave),
                PhaseEvent::new(Event::Receiver, wave),
            ],
        }
    }

    /// One refraction leg turning at one of `levels`.
    pub fn refracted(levels: LevelSet, wave: WaveType) -> Self {
        Self {
            events: vec![
                PhaseEvent::new(Event::Source, wave),
                PhaseEvent::new(Event::Bottom { levels }, wave),
                PhaseEvent::new(Event::Receiver, wave),
            ],
        }
    }

    /// Depth phase (pP style): up to the underside of the top of
    /// `surface_layer`, then a refraction leg to the receiver.
    pub fn depth_phase(surface_layer: usize, levels: LevelSet, wave: WaveType) -> Self {
        Self {
            events: vec![
                PhaseEvent::new(Event::Source, wave),
                PhaseEvent::new(
                    Event::BottomSideReflection {
                        layer: surface_layer,
                    },
                    wave,
                ),
                PhaseEvent::new(Event::Bottom { levels }, wave),
                PhaseEvent::new(Event::Receiver, wave),
            ],
        }
    }

    /// Reflection off the top of `layer` (PcP style).
    pub fn reflected(layer: usize, wave: WaveType) -> Self {
        Self {
            events: vec![
                PhaseEvent::new(Event::Source, wave),
                PhaseEvent::new(Event::TopSideReflection { layer }, wave),
                PhaseEvent::new(Event::Receiver, wave),
            ],
        }
    }

    pub fn bottom_side_reflection_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e.event, Event::BottomSideReflection { .. }))
            .count()
    }

    /// Walk the events left to right and return the branches to build.
    pub(crate) fn legs(&self) -> Result<Vec<LegPlan<'_>>> {
        let ev = &self.events;
        if ev.len() < 2 {
            return Err(BenderError::nonfatal(
                "phase needs at least a source and a receiver",
            ));
        }
        if ev[0].event != Event::Source {
            return Err(BenderError::nonfatal("phase must start with SOURCE"));
        }
        if ev[ev.len() - 1].event != Event::Receiver {
            return Err(BenderError::nonfatal("phase must end with RECEIVER"));
        }

        let mut legs = Vec::new();
        let mut cur = 0;
        while cur + 1 < ev.len() {
            let from = &ev[cur];
            let next = &ev[cur + 1];
            match &next.event {
                Event::Bottom { levels } => {
                    let end = leg_end(ev, cur + 2, next)?;
                    legs.push(LegPlan::Refraction {
                        levels,
                        down_wave: from.wave,
                        up_wave: next.wave,
                        end,
                    });
                    cur += 2;
                }
                Event::TopSideReflection { layer } => {
                    let end = leg_end(ev, cur + 2, next)?;
                    legs.push(LegPlan::TopSideReflection {
                        layer: *layer,
                        down_wave: from.wave,
                        up_wave: next.wave,
                        end,
                    });
                    cur += 2;
                }
                Event::BottomSideReflection { layer } => {
                    if matches!(from.event, Event::BottomSideReflection { .. }) {
                        return Err(BenderError::nonfatal(format!(
                            "two consecutive BOTTOM_SIDE_REFLECTION events at index {}",
                            cur + 1
                        )));
                    }
                    legs.push(LegPlan::UpGoing {
                        wave: from.wave,
                        layer: *layer,
                    });
                    cur += 1;
                }
                Event::Receiver => {
                    match from.event {
                        Event::Source => legs.push(LegPlan::Direct { wave: from.wave }),
                        Event::BottomSideReflection { .. } => {
                            legs.push(LegPlan::DownGoing { wave: from.wave })
                        }
                        _ => {
                            return Err(BenderError::nonfatal(format!(
                                "RECEIVER cannot follow {}",
                                from.event.name()
                            )))
                        }
                    }
                    cur += 1;
                }
                Event::Source => {
                    return Err(BenderError::nonfatal(format!(
                        "SOURCE found inside the phase at index {}",
                        cur + 1
                    )));
                }
            }
        }
        Ok(legs)
    }
}

/// End of the up-going side of a bottoming or top-side reflection leg.
fn leg_end(ev: &[PhaseEvent], idx: usize, turn: &PhaseEvent) -> Result<LegEnd> {
    let Some(end) = ev.get(idx) else {
        return Err(BenderError::nonfatal(format!(
            "{} is not followed by an end event",
            turn.event.name()
        )));
    };
    match (&turn.event, &end.event) {
        (_, Event::Receiver) => Ok(LegEnd::Receiver),
        (_, Event::BottomSideReflection { layer }) => {
            Ok(LegEnd::BottomSideReflection { layer: *layer })
        }
        (Event::TopSideReflection { .. }, Event::Bottom { .. }) => Err(BenderError::nonfatal(
            "TOP_SIDE_REFLECTION immediately followed by a refraction",
        )),
        (_, Event::Bottom { .. }) => {
            Err(BenderError::nonfatal("two consecutive BOTTOM refractions"))
        }
        (_, Event::TopSideReflection { .. }) => Err(BenderError::nonfatal(format!(
            "TOP_SIDE_REFLECTION cannot be the up-going end of a {} leg",
            turn.event.name()
        ))),
        (_, Event::Source) => Err(BenderError::nonfatal(format!(
            "SOURCE found inside the phase at index {idx}"
        ))),
    }
}
