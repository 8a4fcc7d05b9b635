//! Wire protocol between the client and the remote authority.
//!
//! This module owns **every message that crosses the connection**.
//!
//! ## Framing
//!
//! Every frame is one JSON object.  Its logical type is carried either by a
//! string field `type` (server-originated world messages) or by a numeric
//! field `t` resolved through [`MsgType`].  Both forms name the same
//! [`MessageKind`]:
//!
//! ```text
//! {"t": 2, "idx": 7, "data": {...}}           → UpdateMovement
//! {"type": "UpdateMovement", "idx": 7, ...}   → UpdateMovement
//! {"type": "createActor", "idx": 7, ...}      → createActor (string only)
//! ```
//!
//! Outbound frames are always `{"t": <index>, "data": {...}}`.
//!
//! ## Design rules
//!
//! 1. Payload schemas are opaque state blobs; only the fields the sync
//!    engine reasons about (`numChanges`, `animEventName`) are load-bearing.
//! 2. Unknown fields are ignored on decode.
//! 3. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SyncError};
use crate::types::{FormIdx, Vec3};

// ---------------------------------------------------------------------------
// Reliability hint
// ---------------------------------------------------------------------------

/// Delivery semantics requested for one outbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reliability {
    /// Ordered and guaranteed.
    Reliable,
    /// Best effort, may be dropped or reordered.
    Unreliable,
}

impl Reliability {
    pub fn is_reliable(self) -> bool {
        matches!(self, Reliability::Reliable)
    }
}

// ---------------------------------------------------------------------------
// Numeric type table
// ---------------------------------------------------------------------------

/// The fixed numeric message-type table (wire field `t`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    CustomPacket = 1,
    UpdateMovement = 2,
    UpdateAnimation = 3,
    UpdateLook = 4,
    UpdateEquipment = 5,
    Activate = 6,
    UpdateProperty = 7,
    PutItem = 8,
    TakeItem = 9,
}

impl MsgType {
    pub const ALL: [MsgType; 9] = [
        MsgType::CustomPacket,
        MsgType::UpdateMovement,
        MsgType::UpdateAnimation,
        MsgType::UpdateLook,
        MsgType::UpdateEquipment,
        MsgType::Activate,
        MsgType::UpdateProperty,
        MsgType::PutItem,
        MsgType::TakeItem,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(index: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|t| u64::from(t.index()) == index)
    }

    pub fn name(self) -> &'static str {
        match self {
            MsgType::CustomPacket => "CustomPacket",
            MsgType::UpdateMovement => "UpdateMovement",
            MsgType::UpdateAnimation => "UpdateAnimation",
            MsgType::UpdateLook => "UpdateLook",
            MsgType::UpdateEquipment => "UpdateEquipment",
            MsgType::Activate => "Activate",
            MsgType::UpdateProperty => "UpdateProperty",
            MsgType::PutItem => "PutItem",
            MsgType::TakeItem => "TakeItem",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

// ---------------------------------------------------------------------------
// Logical message kinds
// ---------------------------------------------------------------------------

/// Every inbound logical type: the numeric table plus the string-only
/// world messages the server sends by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Msg(MsgType),
    CreateActor,
    DestroyActor,
    SetInventory,
    SetRaceMenuOpen,
}

impl MessageKind {
    pub fn name(self) -> &'static str {
        match self {
            MessageKind::Msg(t) => t.name(),
            MessageKind::CreateActor => "createActor",
            MessageKind::DestroyActor => "destroyActor",
            MessageKind::SetInventory => "setInventory",
            MessageKind::SetRaceMenuOpen => "setRaceMenuOpen",
        }
    }

    /// Exact, case-sensitive lookup.
    pub fn from_name(name: &str) -> Option<Self> {
        if let Some(t) = MsgType::from_name(name) {
            return Some(MessageKind::Msg(t));
        }
        match name {
            "createActor" => Some(MessageKind::CreateActor),
            "destroyActor" => Some(MessageKind::DestroyActor),
            "setInventory" => Some(MessageKind::SetInventory),
            "setRaceMenuOpen" => Some(MessageKind::SetRaceMenuOpen),
            // Server-side scripts name custom packets in lower camel case.
            "customPacket" => Some(MessageKind::Msg(MsgType::CustomPacket)),
            _ => None,
        }
    }

    pub fn from_index(index: u64) -> Option<Self> {
        MsgType::from_index(index).map(MessageKind::Msg)
    }

    /// Numeric index, if this kind is part of the fixed table.
    pub fn index(self) -> Option<u8> {
        match self {
            MessageKind::Msg(t) => Some(t.index()),
            _ => None,
        }
    }
}

impl From<MsgType> for MessageKind {
    fn from(t: MsgType) -> Self {
        MessageKind::Msg(t)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// State blobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    #[default]
    Standing,
    Walking,
    Running,
    Sprinting,
}

/// Sampled locomotion state of one actor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Movement {
    pub world_or_cell: u32,
    pub pos: Vec3,
    pub rot: Vec3,
    pub run_mode: RunMode,
    pub direction: f32,
    pub health_percentage: f32,
    pub is_in_jump_state: bool,
    pub is_sneaking: bool,
    pub is_blocking: bool,
    pub is_weap_drawn: bool,
}

/// Latest animation event of one actor.
///
/// `num_changes` grows by one for every animation event the observer sees.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Animation {
    pub num_changes: u64,
    pub anim_event_name: String,
}

/// Appearance of one actor (race, face, tint…), kept opaque.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Look(pub Map<String, Value>);

/// Worn items of one actor, tagged with its revision number.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Equipment {
    pub num_changes: u32,
    pub inv: Value,
}

// ---------------------------------------------------------------------------
// Inbound payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Transform {
    pub pos: Vec3,
    pub rot: Vec3,
    pub world_or_cell: u32,
}

/// A remote actor entered the client's view (or the client's own actor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateActor {
    pub idx: FormIdx,
    #[serde(default)]
    pub ref_id: Option<u32>,
    #[serde(default)]
    pub base_id: Option<u32>,
    #[serde(default)]
    pub transform: Transform,
    #[serde(default)]
    pub is_me: bool,
    #[serde(default)]
    pub look: Option<Look>,
    #[serde(default)]
    pub equipment: Option<Equipment>,
    #[serde(default)]
    pub props: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyActor {
    pub idx: FormIdx,
}

/// Per-form channel update (`UpdateMovement`, `UpdateLook`, …).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormUpdate<T> {
    pub idx: FormIdx,
    pub data: T,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProperty {
    pub idx: FormIdx,
    pub prop_name: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetInventory {
    pub inventory: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetRaceMenuOpen {
    pub open: bool,
}

/// One decoded inbound message.  Closed set: one variant per [`MessageKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    CreateActor(CreateActor),
    DestroyActor(DestroyActor),
    UpdateMovement(FormUpdate<Movement>),
    UpdateAnimation(FormUpdate<Animation>),
    UpdateLook(FormUpdate<Look>),
    UpdateEquipment(FormUpdate<Equipment>),
    UpdateProperty(UpdateProperty),
    SetInventory(SetInventory),
    SetRaceMenuOpen(SetRaceMenuOpen),
    /// Opaque kinds carry the whole frame.
    CustomPacket(Value),
    Activate(Value),
    PutItem(Value),
    TakeItem(Value),
}

impl InboundMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            InboundMessage::CreateActor(_) => MessageKind::CreateActor,
            InboundMessage::DestroyActor(_) => MessageKind::DestroyActor,
            InboundMessage::UpdateMovement(_) => MsgType::UpdateMovement.into(),
            InboundMessage::UpdateAnimation(_) => MsgType::UpdateAnimation.into(),
            InboundMessage::UpdateLook(_) => MsgType::UpdateLook.into(),
            InboundMessage::UpdateEquipment(_) => MsgType::UpdateEquipment.into(),
            InboundMessage::UpdateProperty(_) => MsgType::UpdateProperty.into(),
            InboundMessage::SetInventory(_) => MessageKind::SetInventory,
            InboundMessage::SetRaceMenuOpen(_) => MessageKind::SetRaceMenuOpen,
            InboundMessage::CustomPacket(_) => MsgType::CustomPacket.into(),
            InboundMessage::Activate(_) => MsgType::Activate.into(),
            InboundMessage::PutItem(_) => MsgType::PutItem.into(),
            InboundMessage::TakeItem(_) => MsgType::TakeItem.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound messages
// ---------------------------------------------------------------------------

/// Local state pushed upstream by the outbound pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    UpdateMovement(Movement),
    UpdateAnimation(Animation),
    UpdateLook(Look),
    UpdateEquipment(Equipment),
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    t: u8,
    data: &'a T,
}

#[derive(Deserialize)]
struct RawEnvelope {
    t: u64,
    data: Value,
}

impl OutboundMessage {
    pub fn msg_type(&self) -> MsgType {
        match self {
            OutboundMessage::UpdateMovement(_) => MsgType::UpdateMovement,
            OutboundMessage::UpdateAnimation(_) => MsgType::UpdateAnimation,
            OutboundMessage::UpdateLook(_) => MsgType::UpdateLook,
            OutboundMessage::UpdateEquipment(_) => MsgType::UpdateEquipment,
        }
    }

    /// Serialise as `{"t": <index>, "data": {...}}`.
    pub fn to_wire(&self) -> Result<String> {
        let t = self.msg_type().index();
        let encoded = match self {
            OutboundMessage::UpdateMovement(data) => serde_json::to_string(&Envelope { t, data }),
            OutboundMessage::UpdateAnimation(data) => {
                serde_json::to_string(&Envelope { t, data })
            }
            OutboundMessage::UpdateLook(data) => serde_json::to_string(&Envelope { t, data }),
            OutboundMessage::UpdateEquipment(data) => {
                serde_json::to_string(&Envelope { t, data })
            }
        };
        encoded.map_err(SyncError::Encode)
    }

    /// Parse an outbound frame (authority side, and tests).
    pub fn from_wire(text: &str) -> Result<Self> {
        let raw: RawEnvelope = serde_json::from_str(text).map_err(SyncError::InvalidJson)?;
        let kind = MsgType::from_index(raw.t)
            .ok_or_else(|| SyncError::UnknownMessageType(raw.t.to_string()))?;
        let malformed = |source| SyncError::MalformedMessage {
            kind: kind.into(),
            source,
        };
        let msg = match kind {
            MsgType::UpdateMovement => {
                OutboundMessage::UpdateMovement(serde_json::from_value(raw.data).map_err(malformed)?)
            }
            MsgType::UpdateAnimation => OutboundMessage::UpdateAnimation(
                serde_json::from_value(raw.data).map_err(malformed)?,
            ),
            MsgType::UpdateLook => {
                OutboundMessage::UpdateLook(serde_json::from_value(raw.data).map_err(malformed)?)
            }
            MsgType::UpdateEquipment => OutboundMessage::UpdateEquipment(
                serde_json::from_value(raw.data).map_err(malformed)?,
            ),
            other => return Err(SyncError::UnknownMessageType(other.name().into())),
        };
        Ok(msg)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ---------------------------------------------------------------
    // Type table
    // ---------------------------------------------------------------

    #[test]
    fn index_and_name_agree_for_every_msg_type() {
        for t in MsgType::ALL {
            assert_eq!(MsgType::from_index(u64::from(t.index())), Some(t));
            assert_eq!(MsgType::from_name(t.name()), Some(t));
        }
    }

    #[test]
    fn index_zero_and_out_of_range_do_not_resolve() {
        assert_eq!(MsgType::from_index(0), None);
        assert_eq!(MsgType::from_index(10), None);
        assert_eq!(MsgType::from_index(u64::MAX), None);
    }

    #[test]
    fn kind_names_are_case_sensitive() {
        assert_eq!(
            MessageKind::from_name("createActor"),
            Some(MessageKind::CreateActor)
        );
        assert_eq!(MessageKind::from_name("CreateActor"), None);
        assert_eq!(MessageKind::from_name("updateMovement"), None);
    }

    #[test]
    fn string_only_kinds_have_no_index() {
        assert_eq!(MessageKind::CreateActor.index(), None);
        assert_eq!(MessageKind::SetRaceMenuOpen.index(), None);
        assert_eq!(MessageKind::Msg(MsgType::UpdateLook).index(), Some(4));
    }

    // ---------------------------------------------------------------
    // Outbound envelope
    // ---------------------------------------------------------------

    #[test]
    fn outbound_movement_uses_numeric_tag() {
        let msg = OutboundMessage::UpdateMovement(Movement::default());
        let v: Value = serde_json::from_str(&msg.to_wire().unwrap()).unwrap();
        assert_eq!(v["t"], 2);
        assert_eq!(v["data"]["runMode"], "Standing");
        assert!(v.get("type").is_none());
    }

    #[test]
    fn outbound_equipment_carries_revision() {
        let msg = OutboundMessage::UpdateEquipment(Equipment {
            num_changes: 3,
            inv: serde_json::json!({ "entries": [] }),
        });
        let v: Value = serde_json::from_str(&msg.to_wire().unwrap()).unwrap();
        assert_eq!(v["t"], 5);
        assert_eq!(v["data"]["numChanges"], 3);
    }

    #[test]
    fn from_wire_decodes_animation() {
        let msg = OutboundMessage::from_wire(
            r#"{"t":3,"data":{"numChanges":4,"animEventName":"JumpUp"}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            OutboundMessage::UpdateAnimation(Animation {
                num_changes: 4,
                anim_event_name: "JumpUp".into()
            })
        );
    }

    #[test]
    fn from_wire_rejects_non_channel_type() {
        assert!(matches!(
            OutboundMessage::from_wire(r#"{"t":6,"data":{}}"#),
            Err(SyncError::UnknownMessageType(_))
        ));
    }

    #[test]
    fn look_is_an_opaque_object() {
        let look: Look = serde_json::from_str(r#"{"raceId":7,"isFemale":true}"#).unwrap();
        assert_eq!(look.0["raceId"], 7);
        assert_eq!(serde_json::to_value(&look).unwrap()["isFemale"], true);
    }
}
