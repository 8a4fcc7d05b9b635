//! Inbound message routing.
//!
//! Every frame received from the remote authority goes through
//! [`dispatch`]:
//!
//! ```text
//!   raw JSON ──► resolve_kind ──► (log) ──► decode ──► MsgHandler::<kind>
//!                 type | t          info      serde       &mut WorldModel
//! ```
//!
//! | Step          | Failure                     | Outcome                 |
//! |---------------|-----------------------------|-------------------------|
//! | resolve_kind  | neither `type` nor `t` known | logged, dropped        |
//! | decode        | payload does not fit schema | logged, dropped         |
//! | handler       | kind has no handler          | default: debug log     |
//!
//! No failure in this module ever propagates to the caller.

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::protocol::{
    Animation, CreateActor, DestroyActor, Equipment, FormUpdate, InboundMessage, Look,
    MessageKind, Movement, MsgType, SetInventory, SetRaceMenuOpen, UpdateProperty,
};
use crate::world::WorldModel;

/// Log target for per-message traffic lines.
pub const DISPATCH_LOG_TARGET: &str = "world_sync::dispatch";

// ---------------------------------------------------------------------------
// Type resolution
// ---------------------------------------------------------------------------

/// Logical kind of a raw frame.
///
/// A non-empty string `type` wins; only when it is absent is the numeric
/// `t` looked up in the [`MsgType`] table.  An unknown `type` does not fall
/// back to `t`.
pub fn resolve_kind(raw: &Value) -> Option<MessageKind> {
    match raw.get("type").and_then(Value::as_str) {
        Some(name) if !name.is_empty() => MessageKind::from_name(name),
        _ => raw
            .get("t")
            .and_then(Value::as_u64)
            .and_then(MessageKind::from_index),
    }
}

/// Whether traffic of this kind gets an info-level log line.
/// Movement is far too chatty.
pub fn is_logged(kind: MessageKind) -> bool {
    kind != MessageKind::Msg(MsgType::UpdateMovement)
}

fn describe_tag(raw: &Value) -> String {
    match (raw.get("type"), raw.get("t")) {
        (Some(Value::String(name)), _) if !name.is_empty() => format!("\"{name}\""),
        (_, Some(t)) => t.to_string(),
        _ => "<missing>".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

fn payload<T: DeserializeOwned>(kind: MessageKind, raw: Value) -> Result<T> {
    serde_json::from_value(raw).map_err(|source| SyncError::MalformedMessage { kind, source })
}

/// Decode `raw` as a message of an already-resolved `kind`.
pub fn decode_as(kind: MessageKind, raw: Value) -> Result<InboundMessage> {
    let msg = match kind {
        MessageKind::CreateActor => InboundMessage::CreateActor(payload(kind, raw)?),
        MessageKind::DestroyActor => InboundMessage::DestroyActor(payload(kind, raw)?),
        MessageKind::SetInventory => InboundMessage::SetInventory(payload(kind, raw)?),
        MessageKind::SetRaceMenuOpen => InboundMessage::SetRaceMenuOpen(payload(kind, raw)?),
        MessageKind::Msg(t) => match t {
            MsgType::UpdateMovement => InboundMessage::UpdateMovement(payload(kind, raw)?),
            MsgType::UpdateAnimation => InboundMessage::UpdateAnimation(payload(kind, raw)?),
            MsgType::UpdateLook => InboundMessage::UpdateLook(payload(kind, raw)?),
            MsgType::UpdateEquipment => InboundMessage::UpdateEquipment(payload(kind, raw)?),
            MsgType::UpdateProperty => InboundMessage::UpdateProperty(payload(kind, raw)?),
            MsgType::CustomPacket => InboundMessage::CustomPacket(raw),
            MsgType::Activate => InboundMessage::Activate(raw),
            MsgType::PutItem => InboundMessage::PutItem(raw),
            MsgType::TakeItem => InboundMessage::TakeItem(raw),
        },
    };
    Ok(msg)
}

/// Resolve and decode one raw frame.
pub fn decode(raw: Value) -> Result<InboundMessage> {
    let kind =
        resolve_kind(&raw).ok_or_else(|| SyncError::UnknownMessageType(describe_tag(&raw)))?;
    decode_as(kind, raw)
}

/// Parse a text frame and decode it.
pub fn decode_str(text: &str) -> Result<InboundMessage> {
    let raw: Value = serde_json::from_str(text).map_err(SyncError::InvalidJson)?;
    decode(raw)
}

// ---------------------------------------------------------------------------
// Handler capability
// ---------------------------------------------------------------------------

fn unhandled(kind: MessageKind) {
    debug!("unhandled message {}", kind);
}

/// One method per inbound kind.  Every method has a default that only logs,
/// so a handler implements exactly the kinds it cares about.
pub trait MsgHandler {
    fn create_actor(&mut self, _world: &mut WorldModel, _msg: CreateActor) {
        unhandled(MessageKind::CreateActor)
    }

    fn destroy_actor(&mut self, _world: &mut WorldModel, _msg: DestroyActor) {
        unhandled(MessageKind::DestroyActor)
    }

    fn update_movement(&mut self, _world: &mut WorldModel, _msg: FormUpdate<Movement>) {
        unhandled(MsgType::UpdateMovement.into())
    }

    fn update_animation(&mut self, _world: &mut WorldModel, _msg: FormUpdate<Animation>) {
        unhandled(MsgType::UpdateAnimation.into())
    }

    fn update_look(&mut self, _world: &mut WorldModel, _msg: FormUpdate<Look>) {
        unhandled(MsgType::UpdateLook.into())
    }

    fn update_equipment(&mut self, _world: &mut WorldModel, _msg: FormUpdate<Equipment>) {
        unhandled(MsgType::UpdateEquipment.into())
    }

    fn update_property(&mut self, _world: &mut WorldModel, _msg: UpdateProperty) {
        unhandled(MsgType::UpdateProperty.into())
    }

    fn set_inventory(&mut self, _world: &mut WorldModel, _msg: SetInventory) {
        unhandled(MessageKind::SetInventory)
    }

    fn set_race_menu_open(&mut self, _world: &mut WorldModel, _msg: SetRaceMenuOpen) {
        unhandled(MessageKind::SetRaceMenuOpen)
    }

    fn custom_packet(&mut self, _world: &mut WorldModel, _msg: Value) {
        unhandled(MsgType::CustomPacket.into())
    }

    fn activate(&mut self, _world: &mut WorldModel, _msg: Value) {
        unhandled(MsgType::Activate.into())
    }

    fn put_item(&mut self, _world: &mut WorldModel, _msg: Value) {
        unhandled(MsgType::PutItem.into())
    }

    fn take_item(&mut self, _world: &mut WorldModel, _msg: Value) {
        unhandled(MsgType::TakeItem.into())
    }

    /// The remote authority accepted the session.
    fn connection_accepted(&mut self, _world: &mut WorldModel) {}

    /// The session ended (disconnect, or failure while connecting).
    fn connection_lost(&mut self, _world: &mut WorldModel) {}
}

/// Hand an already-decoded message to its handler method.
pub fn route(msg: InboundMessage, handler: &mut dyn MsgHandler, world: &mut WorldModel) {
    match msg {
        InboundMessage::CreateActor(m) => handler.create_actor(world, m),
        InboundMessage::DestroyActor(m) => handler.destroy_actor(world, m),
        InboundMessage::UpdateMovement(m) => handler.update_movement(world, m),
        InboundMessage::UpdateAnimation(m) => handler.update_animation(world, m),
        InboundMessage::UpdateLook(m) => handler.update_look(world, m),
        InboundMessage::UpdateEquipment(m) => handler.update_equipment(world, m),
        InboundMessage::UpdateProperty(m) => handler.update_property(world, m),
        InboundMessage::SetInventory(m) => handler.set_inventory(world, m),
        InboundMessage::SetRaceMenuOpen(m) => handler.set_race_menu_open(world, m),
        InboundMessage::CustomPacket(m) => handler.custom_packet(world, m),
        InboundMessage::Activate(m) => handler.activate(world, m),
        InboundMessage::PutItem(m) => handler.put_item(world, m),
        InboundMessage::TakeItem(m) => handler.take_item(world, m),
    }
}

/// Resolve, log, decode and route one raw frame.
///
/// Returns the kind that reached a handler, or `None` when the frame was
/// dropped.
pub fn dispatch(
    raw: Value,
    handler: &mut dyn MsgHandler,
    world: &mut WorldModel,
) -> Option<MessageKind> {
    let Some(kind) = resolve_kind(&raw) else {
        warn!("dropping message of unknown type {}", describe_tag(&raw));
        return None;
    };

    if is_logged(kind) {
        info!(target: DISPATCH_LOG_TARGET, "{} {}", kind, raw);
    }

    match decode_as(kind, raw) {
        Ok(msg) => {
            route(msg, handler, world);
            Some(kind)
        }
        Err(e) => {
            warn!("dropping message: {}", e);
            None
        }
    }
}

/// [`dispatch`] for a text frame.  Invalid JSON is logged and dropped.
pub fn dispatch_str(
    text: &str,
    handler: &mut dyn MsgHandler,
    world: &mut WorldModel,
) -> Option<MessageKind> {
    match serde_json::from_str::<Value>(text) {
        Ok(raw) => dispatch(raw, handler, world),
        Err(e) => {
            warn!("dropping frame that is not JSON: {}", e);
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
