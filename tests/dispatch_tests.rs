//! Inbound dispatch integration tests

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::{json, Value};
    use world_sync::{
        dispatcher::{dispatch, resolve_kind},
        protocol::{Animation, CreateActor, Equipment, FormUpdate, Look, Movement, UpdateProperty},
        MessageKind, MsgHandler, MsgType, OutboundMessage, RemoteServer, WorldModel,
    };

    type Calls = Rc<RefCell<Vec<&'static str>>>;

    /// Names the handler method that ran for each message.
    struct Tracer {
        calls: Calls,
    }

    impl Tracer {
        fn record(&self, name: &'static str) {
            self.calls.borrow_mut().push(name);
        }
    }

    impl MsgHandler for Tracer {
        fn update_movement(&mut self, _w: &mut WorldModel, _m: FormUpdate<Movement>) {
            self.record("update_movement");
        }
        fn update_animation(&mut self, _w: &mut WorldModel, _m: FormUpdate<Animation>) {
            self.record("update_animation");
        }
        fn update_look(&mut self, _w: &mut WorldModel, _m: FormUpdate<Look>) {
            self.record("update_look");
        }
        fn update_equipment(&mut self, _w: &mut WorldModel, _m: FormUpdate<Equipment>) {
            self.record("update_equipment");
        }
        fn update_property(&mut self, _w: &mut WorldModel, _m: UpdateProperty) {
            self.record("update_property");
        }
        fn custom_packet(&mut self, _w: &mut WorldModel, _m: Value) {
            self.record("custom_packet");
        }
        fn activate(&mut self, _w: &mut WorldModel, _m: Value) {
            self.record("activate");
        }
        fn put_item(&mut self, _w: &mut WorldModel, _m: Value) {
            self.record("put_item");
        }
        fn take_item(&mut self, _w: &mut WorldModel, _m: Value) {
            self.record("take_item");
        }
        fn create_actor(&mut self, _w: &mut WorldModel, _m: CreateActor) {
            self.record("create_actor");
        }
    }

    /// A body every kind in the numeric table accepts.
    fn body() -> Value {
        json!({ "idx": 1, "propName": "health", "data": {} })
    }

    fn with_tag(key: &str, tag: Value) -> Value {
        let mut v = body();
        v[key] = tag;
        v
    }

    // -----------------------------------------------------------------------
    // Numeric / string equivalence
    // -----------------------------------------------------------------------

    #[test]
    fn numeric_and_string_tags_reach_the_same_handler() {
        for t in MsgType::ALL {
            let calls = Calls::default();
            let mut handler = Tracer {
                calls: calls.clone(),
            };
            let mut world = WorldModel::default();

            let by_index = dispatch(
                with_tag("t", json!(t.index())),
                &mut handler,
                &mut world,
            );
            let by_name = dispatch(with_tag("type", json!(t.name())), &mut handler, &mut world);

            assert_eq!(by_index, Some(MessageKind::Msg(t)), "{}", t.name());
            assert_eq!(by_index, by_name, "{}", t.name());
            let calls = calls.borrow();
            assert_eq!(calls.len(), 2, "{}", t.name());
            assert_eq!(calls[0], calls[1], "{}", t.name());
        }
    }

    #[test]
    fn every_kind_has_a_distinct_handler() {
        let calls = Calls::default();
        let mut handler = Tracer {
            calls: calls.clone(),
        };
        let mut world = WorldModel::default();
        for t in MsgType::ALL {
            dispatch(with_tag("t", json!(t.index())), &mut handler, &mut world);
        }
        let mut names = calls.borrow().clone();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), MsgType::ALL.len());
    }

    #[test]
    fn lowercase_custom_packet_alias() {
        assert_eq!(
            resolve_kind(&json!({ "type": "customPacket" })),
            Some(MessageKind::Msg(MsgType::CustomPacket))
        );
    }

    #[test]
    fn outbound_frames_resolve_to_their_type() {
        let frames = [
            OutboundMessage::UpdateMovement(Movement::default()),
            OutboundMessage::UpdateAnimation(Animation {
                num_changes: 1,
                anim_event_name: "JumpUp".into(),
            }),
            OutboundMessage::UpdateLook(Look::default()),
            OutboundMessage::UpdateEquipment(Equipment::default()),
        ];
        for msg in frames {
            let wire: Value = serde_json::from_str(&msg.to_wire().expect("encodes")).expect("json");
            assert_eq!(resolve_kind(&wire), Some(MessageKind::Msg(msg.msg_type())));
        }
    }

    // -----------------------------------------------------------------------
    // Robustness
    // -----------------------------------------------------------------------

    #[test]
    fn bad_frames_do_not_stop_later_ones() {
        let mut server = RemoteServer::new();
        let frames = [
            r#"{"t": 99}"#,
            r#"{"type": "spawnDragon"}"#,
            "not json at all",
            r#"{"type": "createActor"}"#,
            r#"{"type": "createActor", "idx": 4}"#,
        ];
        let routed: Vec<_> = frames.iter().map(|f| server.dispatch_raw(f)).collect();
        assert_eq!(routed, vec![None, None, None, None, Some(MessageKind::CreateActor)]);
        assert_eq!(server.world().form_count(), 1);
    }

    #[test]
    fn default_handler_methods_accept_everything() {
        struct Silent;
        impl MsgHandler for Silent {}

        let mut server = RemoteServer::with_handler(Box::new(Silent));
        for t in MsgType::ALL {
            assert!(server.dispatch(with_tag("t", json!(t.index()))).is_some());
        }
        for name in ["createActor", "destroyActor", "setInventory", "setRaceMenuOpen"] {
            let frame = json!({ "type": name, "idx": 1, "inventory": {}, "open": true });
            assert!(server.dispatch(frame).is_some(), "{}", name);
        }
        assert_eq!(server.world(), &WorldModel::default());
    }

    // -----------------------------------------------------------------------
    // Continuity
    // -----------------------------------------------------------------------

    #[test]
    fn merged_server_keeps_forms_and_uses_fresh_handler() {
        let mut previous = RemoteServer::new();
        for idx in 0..4 {
            previous.dispatch(json!({ "type": "createActor", "idx": idx }));
        }

        let calls = Calls::default();
        let fresh = RemoteServer::with_handler(Box::new(Tracer {
            calls: calls.clone(),
        }));
        let mut merged = RemoteServer::merge(Some(previous), fresh);
        assert_eq!(merged.world().form_count(), 4);

        merged.dispatch(json!({ "type": "createActor", "idx": 9 }));
        assert_eq!(*calls.borrow(), vec!["create_actor"]);
        // The tracer does not mutate, so the world is unchanged.
        assert_eq!(merged.world().form_count(), 4);
    }
}
