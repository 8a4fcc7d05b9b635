//! Core types shared across all modules.

use serde::{Deserialize, Serialize};

/// Form id of the local player actor in the host engine.
///
/// Equip / unequip hooks fire for every actor; only this one feeds the
/// equipment channel.
pub const PLAYER_FORM_ID: u32 = 0x14;

/// Server-assigned index of a remote form (actor) in the world model.
pub type FormIdx = u32;

// ---------------------------------------------------------------------------
// Basic math
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}
