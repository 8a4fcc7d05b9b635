//! `WorldModel`: local mirror of everything the remote authority told us.
//!
//! State and behavior are kept apart:
//!
//! ```text
//!   RemoteServer
//!   ├── world:   WorldModel          (survives controller reconstruction)
//!   └── handler: Box<dyn MsgHandler> (replaced on reconstruction)
//! ```
//!
//! [`WorldReconciler`] is the stock handler; it is the only thing that
//! mutates the model in normal operation.  Views only ever read it.

use std::collections::BTreeMap;

use log::{debug, info};
use serde_json::{Map, Value};

use crate::dispatcher::{self, MsgHandler};
use crate::protocol::{
    Animation, CreateActor, DestroyActor, Equipment, FormUpdate, Look, MessageKind, Movement,
    MsgType, SetInventory, SetRaceMenuOpen, UpdateProperty,
};
use crate::types::FormIdx;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Snapshot of one remote form (actor).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormModel {
    pub idx: FormIdx,
    pub ref_id: Option<u32>,
    pub base_id: Option<u32>,
    pub movement: Option<Movement>,
    pub animation: Option<Animation>,
    pub look: Option<Look>,
    pub equipment: Option<Equipment>,
    pub props: Map<String, Value>,
    /// Movement updates applied since the form was created.
    pub num_movement_changes: u64,
    /// Look updates applied since the form was created.
    pub num_look_changes: u64,
    /// True for the form that represents the local player.
    pub is_me: bool,
}

impl FormModel {
    /// Whether an equipment update tagged `revision` may replace the
    /// current one.  Older revisions are stale.
    pub fn accepts_equipment_revision(&self, revision: u32) -> bool {
        self.equipment
            .as_ref()
            .map_or(true, |current| revision >= current.num_changes)
    }
}

impl From<CreateActor> for FormModel {
    fn from(msg: CreateActor) -> Self {
        let movement = Movement {
            pos: msg.transform.pos,
            rot: msg.transform.rot,
            world_or_cell: msg.transform.world_or_cell,
            ..Movement::default()
        };
        Self {
            idx: msg.idx,
            ref_id: msg.ref_id,
            base_id: msg.base_id,
            movement: Some(movement),
            animation: None,
            look: msg.look,
            equipment: msg.equipment,
            props: msg.props.unwrap_or_default(),
            num_movement_changes: 0,
            num_look_changes: 0,
            is_me: msg.is_me,
        }
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldModel {
    /// Known forms, keyed by server-assigned index.
    pub forms: BTreeMap<FormIdx, FormModel>,
    /// Index of the form that is the local player, once the server said so.
    pub player_character_form_idx: Option<FormIdx>,
    /// Last inventory pushed by the server for the local player.
    pub inventory: Option<Value>,
    /// Server-driven character-creation menu state.
    pub race_menu_open: bool,
}

impl WorldModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn form(&self, idx: FormIdx) -> Option<&FormModel> {
        self.forms.get(&idx)
    }

    pub fn form_mut(&mut self, idx: FormIdx) -> Option<&mut FormModel> {
        self.forms.get_mut(&idx)
    }

    pub fn player_character(&self) -> Option<&FormModel> {
        self.player_character_form_idx
            .and_then(|idx| self.forms.get(&idx))
    }

    pub fn form_count(&self) -> usize {
        self.forms.len()
    }

    /// Reset all state (called on connect and disconnect).
    pub fn clear(&mut self) {
        self.forms.clear();
        self.player_character_form_idx = None;
        self.inventory = None;
        self.race_menu_open = false;
    }
}

// ---------------------------------------------------------------------------
// Stock handler
// ---------------------------------------------------------------------------

/// Applies server world messages to the model.
///
/// Updates for unknown forms are dropped with a debug line; the server is
/// free to race a destroy against in-flight updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct WorldReconciler;

fn missing_form(kind: MessageKind, idx: FormIdx) {
    debug!("{} for unknown form {}", kind, idx);
}

impl MsgHandler for WorldReconciler {
    fn create_actor(&mut self, world: &mut WorldModel, msg: CreateActor) {
        let form = FormModel::from(msg);
        if form.is_me {
            world.player_character_form_idx = Some(form.idx);
        }
        world.forms.insert(form.idx, form);
    }

    fn destroy_actor(&mut self, world: &mut WorldModel, msg: DestroyActor) {
        if world.forms.remove(&msg.idx).is_none() {
            missing_form(MessageKind::DestroyActor, msg.idx);
        }
        if world.player_character_form_idx == Some(msg.idx) {
            world.player_character_form_idx = None;
        }
    }

    fn update_movement(&mut self, world: &mut WorldModel, msg: FormUpdate<Movement>) {
        match world.form_mut(msg.idx) {
            Some(form) => {
                form.movement = Some(msg.data);
                form.num_movement_changes += 1;
            }
            None => missing_form(MsgType::UpdateMovement.into(), msg.idx),
        }
    }

    fn update_animation(&mut self, world: &mut WorldModel, msg: FormUpdate<Animation>) {
        match world.form_mut(msg.idx) {
            Some(form) => form.animation = Some(msg.data),
            None => missing_form(MsgType::UpdateAnimation.into(), msg.idx),
        }
    }

    fn update_look(&mut self, world: &mut WorldModel, msg: FormUpdate<Look>) {
        match world.form_mut(msg.idx) {
            Some(form) => {
                form.look = Some(msg.data);
                form.num_look_changes += 1;
            }
            None => missing_form(MsgType::UpdateLook.into(), msg.idx),
        }
    }

    fn update_equipment(&mut self, world: &mut WorldModel, msg: FormUpdate<Equipment>) {
        let Some(form) = world.form_mut(msg.idx) else {
            missing_form(MsgType::UpdateEquipment.into(), msg.idx);
            return;
        };
        if form.accepts_equipment_revision(msg.data.num_changes) {
            form.equipment = Some(msg.data);
        } else {
            debug!(
                "stale equipment revision {} for form {}",
                msg.data.num_changes, msg.idx
            );
        }
    }

    fn update_property(&mut self, world: &mut WorldModel, msg: UpdateProperty) {
        match world.form_mut(msg.idx) {
            Some(form) => {
                form.props.insert(msg.prop_name, msg.data);
            }
            None => missing_form(MsgType::UpdateProperty.into(), msg.idx),
        }
    }

    fn set_inventory(&mut self, world: &mut WorldModel, msg: SetInventory) {
        world.inventory = Some(msg.inventory);
    }

    fn set_race_menu_open(&mut self, world: &mut WorldModel, msg: SetRaceMenuOpen) {
        world.race_menu_open = msg.open;
    }

    fn connection_accepted(&mut self, world: &mut WorldModel) {
        world.clear();
    }

    fn connection_lost(&mut self, world: &mut WorldModel) {
        world.clear();
    }
}

// ---------------------------------------------------------------------------
// RemoteServer
// ---------------------------------------------------------------------------

/// Canonical world model plus the behavior that mutates it.
pub struct RemoteServer {
    world: WorldModel,
    handler: Box<dyn MsgHandler>,
}

impl RemoteServer {
    /// Empty world, stock handler.
    pub fn new() -> Self {
        Self::with_handler(Box::new(WorldReconciler))
    }

    pub fn with_handler(handler: Box<dyn MsgHandler>) -> Self {
        Self {
            world: WorldModel::default(),
            handler,
        }
    }

    /// Keep the accumulated world of `previous` (if any) and adopt the
    /// behavior of `fresh`.
    pub fn merge(previous: Option<RemoteServer>, fresh: RemoteServer) -> RemoteServer {
        match previous {
            Some(previous) => {
                info!("Restore previous RemoteServer");
                RemoteServer {
                    world: previous.world,
                    handler: fresh.handler,
                }
            }
            None => {
                info!("Creating RemoteServer");
                fresh
            }
        }
    }

    pub fn world(&self) -> &WorldModel {
        &self.world
    }

    /// Route one parsed frame.  See [`dispatcher::dispatch`].
    pub fn dispatch(&mut self, raw: Value) -> Option<MessageKind> {
        dispatcher::dispatch(raw, self.handler.as_mut(), &mut self.world)
    }

    /// Route one text frame.  Non-JSON text is logged and dropped.
    pub fn dispatch_raw(&mut self, text: &str) -> Option<MessageKind> {
        dispatcher::dispatch_str(text, self.handler.as_mut(), &mut self.world)
    }

    pub fn connection_accepted(&mut self) {
        self.handler.connection_accepted(&mut self.world);
    }

    pub fn connection_lost(&mut self) {
        self.handler.connection_lost(&mut self.world);
    }
}

impl Default for RemoteServer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RemoteServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteServer")
            .field("world", &self.world)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
