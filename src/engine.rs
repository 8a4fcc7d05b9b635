//! Host-engine touchpoints.
//!
//! The sync engine never talks to the game directly: it samples local state
//! through [`HostEngine`] and is told about engine hooks via
//! [`EngineEvent`].  [`HeadlessEngine`] is an in-memory implementation used
//! by the bundled client binary and by tests.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use serde_json::Value;

use crate::protocol::{Animation, Equipment, Look, Movement};

/// Character-customization menu watched by the look channel.
pub const RACE_MENU: &str = "RaceSex Menu";

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Observer of the local actor's animation events.
pub trait AnimationSource {
    fn animation(&mut self) -> Animation;
}

pub trait HostEngine {
    /// Current locomotion state of the local player.
    fn movement(&self) -> Movement;

    /// Bind a fresh animation observer to the local player.
    fn animation_source(&mut self) -> Box<dyn AnimationSource>;

    fn look(&self) -> Look;

    /// Current equipment, tagged with `revision`.
    fn equipment(&self, revision: u32) -> Equipment;

    fn is_menu_open(&self, menu: &str) -> bool;

    /// Blocking user-facing notification.
    fn message_box(&mut self, text: &str);

    /// Force the local player out of character creation.
    fn leave_character_creation(&mut self);
}

/// Engine hooks forwarded to the controller between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    Equip { actor: u32 },
    Unequip { actor: u32 },
    /// A save was loaded.  `caused_by_platform` is true when our own
    /// engine-level hooks triggered the load.
    LoadGame { caused_by_platform: bool },
}

// ---------------------------------------------------------------------------
// HeadlessEngine
// ---------------------------------------------------------------------------

/// Engine stand-in with directly settable state.
#[derive(Debug, Default)]
pub struct HeadlessEngine {
    pub movement: Movement,
    pub look: Look,
    pub inventory: Value,
    /// Every notification shown, in order.
    pub message_boxes: Vec<String>,
    /// How many times character creation was force-exited.
    pub chargen_exits: u32,
    /// How many animation observers were bound.
    pub animation_sources: u32,
    open_menus: HashSet<String>,
    animation: Rc<RefCell<Animation>>,
}

impl HeadlessEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one animation event on the local player.
    pub fn play_animation(&mut self, event: &str) {
        let mut anim = self.animation.borrow_mut();
        anim.num_changes += 1;
        anim.anim_event_name = event.to_string();
    }

    pub fn open_menu(&mut self, menu: &str) {
        self.open_menus.insert(menu.to_string());
    }

    pub fn close_menu(&mut self, menu: &str) {
        self.open_menus.remove(menu);
    }
}

struct SharedAnimation(Rc<RefCell<Animation>>);

impl AnimationSource for SharedAnimation {
    fn animation(&mut self) -> Animation {
        self.0.borrow().clone()
    }
}

impl HostEngine for HeadlessEngine {
    fn movement(&self) -> Movement {
        self.movement.clone()
    }

    fn animation_source(&mut self) -> Box<dyn AnimationSource> {
        self.animation_sources += 1;
        Box::new(SharedAnimation(self.animation.clone()))
    }

    fn look(&self) -> Look {
        self.look.clone()
    }

    fn equipment(&self, revision: u32) -> Equipment {
        Equipment {
            num_changes: revision,
            inv: self.inventory.clone(),
        }
    }

    fn is_menu_open(&self, menu: &str) -> bool {
        self.open_menus.contains(menu)
    }

    fn message_box(&mut self, text: &str) {
        log::info!("[engine] message box: {}", text);
        self.message_boxes.push(text.to_string());
    }

    fn leave_character_creation(&mut self) {
        self.chargen_exits += 1;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn animation_source_sees_later_events() {
        let mut engine = HeadlessEngine::new();
        let mut source = engine.animation_source();
        assert_eq!(source.animation().num_changes, 0);

        engine.play_animation("JumpUp");
        let anim = source.animation();
        assert_eq!(anim.num_changes, 1);
        assert_eq!(anim.anim_event_name, "JumpUp");
        assert_eq!(engine.animation_sources, 1);
    }

    #[test]
    fn menus_open_and_close() {
        let mut engine = HeadlessEngine::new();
        assert!(!engine.is_menu_open(RACE_MENU));
        engine.open_menu(RACE_MENU);
        assert!(engine.is_menu_open(RACE_MENU));
        engine.close_menu(RACE_MENU);
        assert!(!engine.is_menu_open(RACE_MENU));
    }

    #[test]
    fn equipment_is_tagged_with_revision() {
        let mut engine = HeadlessEngine::new();
        engine.inventory = serde_json::json!({ "entries": [{ "baseId": 0x12eb7, "count": 1 }] });
        let eq = engine.equipment(4);
        assert_eq!(eq.num_changes, 4);
        assert_eq!(eq.inv["entries"][0]["count"], 1);
    }
}
