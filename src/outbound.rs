//! Outbound state pipeline – four independently gated channels.
//!
//! | Channel   | Gate                               | Hint       |
//! |-----------|------------------------------------|------------|
//! | movement  | time window (130 ms default)       | unreliable |
//! | animation | change counter advanced, name set  | unreliable |
//! | look      | race menu closing edge             | reliable   |
//! | equipment | dirty flag from equip hooks        | reliable   |
//!
//! [`OutboundPipeline::run`] polls them once per tick in that order.

use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::engine::{AnimationSource, HostEngine, RACE_MENU};
use crate::error::Result;
use crate::protocol::{Animation, Equipment, Look, Movement, OutboundMessage, Reliability};

/// Anything that can carry an outbound message upstream.
pub trait SendTarget {
    fn send(&mut self, msg: &OutboundMessage, reliability: Reliability) -> Result<()>;
}

/// What a channel decided to emit this tick.
pub type Emission = Option<(OutboundMessage, Reliability)>;

// ---------------------------------------------------------------------------
// Movement
// ---------------------------------------------------------------------------

/// Time-gated only: no payload diffing.
#[derive(Debug)]
pub struct MovementChannel {
    interval: Duration,
    last_sent: Option<Instant>,
}

impl MovementChannel {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
        }
    }

    pub fn poll(&mut self, now: Instant, sample: impl FnOnce() -> Movement) -> Emission {
        let due = match self.last_sent {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.interval,
        };
        if !due {
            return None;
        }
        self.last_sent = Some(now);
        Some((
            OutboundMessage::UpdateMovement(sample()),
            Reliability::Unreliable,
        ))
    }
}

// ---------------------------------------------------------------------------
// Animation
// ---------------------------------------------------------------------------

/// Counter-gated.  The observer is bound lazily on the first poll.
#[derive(Default)]
pub struct AnimationChannel {
    source: Option<Box<dyn AnimationSource>>,
    last_sent: Option<Animation>,
}

impl AnimationChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poll(&mut self, bind: impl FnOnce() -> Box<dyn AnimationSource>) -> Emission {
        let source = self.source.get_or_insert_with(bind);
        let anim = source.animation();

        let advanced = self
            .last_sent
            .as_ref()
            .map_or(true, |last| anim.num_changes > last.num_changes);
        if !advanced || anim.anim_event_name.is_empty() {
            return None;
        }

        self.last_sent = Some(anim.clone());
        Some((OutboundMessage::UpdateAnimation(anim), Reliability::Unreliable))
    }

    pub fn last_sent(&self) -> Option<&Animation> {
        self.last_sent.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Look
// ---------------------------------------------------------------------------

/// Fires on the closing edge of the race menu.
#[derive(Debug, Default)]
pub struct LookChannel {
    menu_shown: bool,
}

impl LookChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poll(&mut self, shown: bool, sample: impl FnOnce() -> Look) -> Emission {
        if shown == self.menu_shown {
            return None;
        }
        self.menu_shown = shown;
        if shown {
            return None;
        }
        info!("Exited from race menu");
        Some((OutboundMessage::UpdateLook(sample()), Reliability::Reliable))
    }
}

// ---------------------------------------------------------------------------
// Equipment
// ---------------------------------------------------------------------------

/// Fires once per dirty mark, each time with the next revision.
#[derive(Debug, Default)]
pub struct EquipmentChannel {
    dirty: bool,
    revision: u32,
}

impl EquipmentChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn poll(&mut self, sample: impl FnOnce(u32) -> Equipment) -> Emission {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        self.revision += 1;

        let mut eq = sample(self.revision);
        eq.num_changes = self.revision;
        debug!("equipment revision {}: {}", eq.num_changes, eq.inv);
        Some((OutboundMessage::UpdateEquipment(eq), Reliability::Reliable))
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct OutboundPipeline {
    movement: MovementChannel,
    animation: AnimationChannel,
    look: LookChannel,
    equipment: EquipmentChannel,
}

impl OutboundPipeline {
    pub fn new(movement_interval: Duration) -> Self {
        Self {
            movement: MovementChannel::new(movement_interval),
            animation: AnimationChannel::new(),
            look: LookChannel::new(),
            equipment: EquipmentChannel::new(),
        }
    }

    pub fn mark_equipment_dirty(&mut self) {
        self.equipment.mark_dirty();
    }

    pub fn equipment(&self) -> &EquipmentChannel {
        &self.equipment
    }

    /// Poll every channel once, in fixed order, and send what they emit.
    ///
    /// Returns how many messages were handed to `target`.  Send failures are
    /// logged and do not stop the remaining channels.
    pub fn run<E: HostEngine + ?Sized>(
        &mut self,
        now: Instant,
        engine: &mut E,
        target: &mut dyn SendTarget,
    ) -> usize {
        let emissions = [
            self.movement.poll(now, || engine.movement()),
            self.animation.poll(|| engine.animation_source()),
            self.look.poll(engine.is_menu_open(RACE_MENU), || engine.look()),
            self.equipment.poll(|revision| engine.equipment(revision)),
        ];

        let mut sent = 0;
        for (msg, reliability) in emissions.into_iter().flatten() {
            match target.send(&msg, reliability) {
                Ok(()) => sent += 1,
                Err(e) => warn!("Failed to send {}: {}", msg.msg_type().name(), e),
            }
        }
        sent
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
