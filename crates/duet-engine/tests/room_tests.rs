//! Server and client rooms exchanging bytes in process.

use duet_ecs::entity::EntityId;
use duet_engine::action::{Action, ActionKind, MovePlayer, ResetLevel, Vec2};
use duet_engine::components::{Rigidbody, Transform};
use duet_engine::config::EngineConfig;
use duet_engine::duet_sync::message::{ClientMessage, ServerMessage};
use duet_engine::room::{ClientRoom, ServerRoom};
use duet_engine::EngineError;

const DT: f64 = 1.0 / 60.0;

struct Harness {
    server: ServerRoom,
    clients: Vec<ClientRoom>,
}

impl Harness {
    fn new(sessions: &[&str]) -> Self {
        let config = EngineConfig::default();
        let mut server = ServerRoom::new(config.clone()).unwrap();
        let mut clients = Vec::new();
        for session in sessions {
            let mut client = ClientRoom::new(config.clone(), *session).unwrap();
            client.receive(&server.join(session, session).unwrap());
            clients.push(client);
        }
        Self { server, clients }
    }

    fn client(&mut self, session: &str) -> &mut ClientRoom {
        self.clients
            .iter_mut()
            .find(|c| c.session() == session)
            .unwrap()
    }

    /// Run `frames` client frames and server advances of equal length.
    fn pump(&mut self, frames: usize) {
        self.pump_lossy(frames, |_, _| false);
    }

    /// Like `pump`, but server messages for which `lose` answers true never
    /// arrive.
    fn pump_lossy(&mut self, frames: usize, mut lose: impl FnMut(&str, &ServerMessage) -> bool) {
        for _ in 0..frames {
            for client in &mut self.clients {
                for bytes in client.frame(DT).unwrap() {
                    self.server.receive(client.session(), &bytes);
                }
            }
            for (session, bytes) in self.server.advance(DT * 1000.0).unwrap() {
                if lose(&session, &ServerMessage::decode(&bytes).unwrap()) {
                    continue;
                }
                if let Some(client) = self.clients.iter_mut().find(|c| c.session() == session) {
                    client.receive(&bytes);
                }
            }
        }
    }

    fn avatar(&self, session: &str) -> EntityId {
        self.server.room().players[session].entity.clone().unwrap()
    }
}

fn send_action(server: &mut ServerRoom, session: &str, action: &Action) {
    let bytes = ClientMessage::PerformAction(action.to_wire())
        .encode()
        .unwrap();
    server.receive(session, &bytes);
}

#[test]
fn room_starts_with_two_players() {
    let mut h = Harness::new(&["alice"]);
    h.pump(3);
    assert!(!h.server.room().meta.started);
    assert!(!h.client("alice").registry().room().meta.started);

    let mut bob = ClientRoom::new(EngineConfig::default(), "bob").unwrap();
    bob.receive(&h.server.join("bob", "Bob").unwrap());
    h.clients.push(bob);
    h.pump(6);
    assert!(h.server.room().meta.started);
    for client in &h.clients {
        assert!(client.registry().room().meta.started);
        assert_eq!(client.registry().room().players.len(), 2);
    }
}

#[test]
fn third_player_is_turned_away() {
    let mut h = Harness::new(&["alice", "bob"]);
    let err = h.server.join("carol", "Carol").unwrap_err();
    assert!(matches!(err, EngineError::RoomFull { .. }));
    // A seated session may rejoin.
    h.server.join("bob", "Bob").unwrap();
    assert_eq!(h.server.room().players.len(), 2);
}

#[test]
fn client_mirrors_server_entities() {
    let mut h = Harness::new(&["alice", "bob"]);
    h.pump(12);
    let server_ids: Vec<EntityId> = h.server.registry().world().entities().cloned().collect();
    for client in &h.clients {
        let world = client.registry().world();
        assert_eq!(world.entity_count(), server_ids.len());
        assert!(server_ids.iter().all(|id| world.has(id)));
        assert_eq!(client.mirror().entity_count(), server_ids.len());
    }
}

#[test]
fn held_input_moves_avatar_on_every_side() {
    let mut h = Harness::new(&["alice", "bob"]);
    h.pump(6);
    let avatar = h.avatar("alice");
    let start_x = h.server.registry().world().get::<Transform>(&avatar).unwrap().x;

    h.client("alice").input_mut().move_x = 1.0;
    h.pump(30);

    let server_x = h.server.registry().world().get::<Transform>(&avatar).unwrap().x;
    assert!(server_x > start_x + 1.0, "server x {start_x} -> {server_x}");
    for client in &h.clients {
        let x = client.registry().world().get::<Transform>(&avatar).unwrap().x;
        assert!(x > start_x + 1.0, "{} sees x = {x}", client.session());
    }

    // Releasing the key stops the avatar.
    h.client("alice").input_mut().move_x = 0.0;
    h.pump(6);
    let vx = h.server.registry().world().get::<Rigidbody>(&avatar).unwrap().vx;
    assert!(vx.abs() < 0.5, "vx = {vx}");
}

#[test]
fn replicated_components_keep_identity() {
    let mut h = Harness::new(&["alice", "bob"]);
    h.pump(6);
    let avatar = h.avatar("bob");
    let before = h
        .client("alice")
        .registry()
        .world()
        .get::<Transform>(&avatar)
        .unwrap() as *const Transform;
    h.client("bob").input_mut().move_x = -1.0;
    h.pump(12);
    let alice = h.client("alice");
    let after = alice.registry().world().get::<Transform>(&avatar).unwrap();
    assert!(std::ptr::eq(before, after));
}

#[test]
fn actions_are_dropped_until_started() {
    let mut h = Harness::new(&["alice"]);
    h.pump(6);
    let avatar = h.avatar("alice");
    let action = Action::MovePlayer(MovePlayer {
        player: 0,
        dir: Vec2::new(1.0, 0.0),
    });
    send_action(&mut h.server, "alice", &action);
    h.pump(1);
    let vx = h.server.registry().world().get::<Rigidbody>(&avatar).unwrap().vx;
    assert!(vx.abs() < 1e-3);
}

#[test]
fn actions_for_another_player_are_dropped() {
    let mut h = Harness::new(&["alice", "bob"]);
    h.pump(6);
    let bob = h.avatar("bob");
    let spoof = Action::MovePlayer(MovePlayer {
        player: 1,
        dir: Vec2::new(1.0, 0.0),
    });
    send_action(&mut h.server, "alice", &spoof);
    send_action(&mut h.server, "mallory", &spoof);
    h.server.receive("alice", &[0xff, 0x00, 0x13]);
    h.pump(1);
    let vx = h.server.registry().world().get::<Rigidbody>(&bob).unwrap().vx;
    assert!(vx.abs() < 1e-3);

    send_action(&mut h.server, "bob", &spoof);
    h.pump(1);
    let vx = h.server.registry().world().get::<Rigidbody>(&bob).unwrap().vx;
    assert!(vx > 1.0);
}

#[test]
fn ping_measures_latency() {
    let mut h = Harness::new(&["alice", "bob"]);
    assert!(h.client("alice").latency_ms().is_none());
    h.pump(3);
    let rtt = h.client("alice").latency_ms().unwrap();
    assert!(rtt >= 0.0 && rtt < 100.0, "rtt = {rtt}");
}

#[test]
fn leaving_removes_avatar_everywhere() {
    let mut h = Harness::new(&["alice", "bob"]);
    h.pump(6);
    let bob = h.avatar("bob");
    h.server.leave("bob").unwrap();
    assert!(!h.server.room().meta.started);
    assert!(matches!(
        h.server.leave("bob"),
        Err(EngineError::UnknownSession { .. })
    ));
    h.pump(6);
    let alice = h.client("alice");
    assert!(!alice.registry().world().has(&bob));
    assert!(!alice.registry().room().players.contains_key("bob"));
    assert!(!alice.registry().room().meta.started);
}

#[test]
fn late_joiner_gets_current_state() {
    let mut h = Harness::new(&["alice"]);
    h.pump(12);
    let seq = h.server.patch_seq();
    assert!(seq > 0);

    let mut bob = ClientRoom::new(EngineConfig::default(), "bob").unwrap();
    bob.receive(&h.server.join("bob", "Bob").unwrap());
    h.clients.push(bob);
    h.pump(6);

    let server_count = h.server.registry().world().entity_count();
    let bob = h.client("bob");
    assert_eq!(bob.registry().world().entity_count(), server_count);
    assert!(bob.mirror().last_seq().unwrap() > seq);
}

#[test]
fn lost_patch_is_recovered_with_a_baseline() {
    let mut h = Harness::new(&["alice", "bob"]);
    h.pump(6);
    h.client("bob").input_mut().move_x = 1.0;
    h.pump(6);

    let mut lost = false;
    h.pump_lossy(6, |session, message| {
        let lose = !lost && session == "alice" && matches!(message, ServerMessage::Patch(_));
        lost |= lose;
        lose
    });
    assert!(lost);

    // The next delta is out of order, so alice drops her world and asks
    // for a baseline.
    let mut resynced = false;
    for _ in 0..12 {
        h.pump(1);
        resynced |= h.client("alice").is_resyncing();
    }
    assert!(resynced);

    h.client("bob").input_mut().move_x = 0.0;
    h.pump(30);
    let alice = h.client("alice");
    alice.frame(DT).unwrap();
    assert!(!alice.is_resyncing());

    let server_seq = h.server.patch_seq();
    let server_ids: Vec<EntityId> = h.server.registry().world().entities().cloned().collect();
    let bob = h.avatar("bob");
    let server_x = h.server.registry().world().get::<Transform>(&bob).unwrap().x;
    let alice = h.client("alice");
    assert_eq!(alice.mirror().last_seq(), Some(server_seq));
    let world = alice.registry().world();
    assert_eq!(world.entity_count(), server_ids.len());
    assert!(server_ids.iter().all(|id| world.has(id)));
    let x = world.get::<Transform>(&bob).unwrap().x;
    assert!((x - server_x).abs() < 0.05, "alice sees bob at {x}, server has {server_x}");
    assert!(alice.registry().room().meta.started);
}

#[test]
fn resync_from_a_stranger_is_ignored() {
    let mut h = Harness::new(&["alice", "bob"]);
    h.pump(3);
    h.server
        .receive("mallory", &ClientMessage::Resync.encode().unwrap());
    let out = h.server.advance(DT * 1000.0).unwrap();
    assert!(out.iter().all(|(session, _)| session != "mallory"));
}

#[test]
fn failed_tick_keeps_replies_for_next_advance() {
    let mut h = Harness::new(&["alice", "bob"]);
    h.pump(6);
    h.server
        .registry_mut()
        .actions_mut()
        .register(ActionKind::ResetLevel, |_ctx, _action, _dt| {
            Err(EngineError::Level("broken level".into()))
        });
    send_action(&mut h.server, "alice", &Action::ResetLevel(ResetLevel {}));
    let ping = ClientMessage::Ping { client_time_ms: 7 }.encode().unwrap();
    h.server.receive("bob", &ping);

    // Two frames of host time, so at least one fixed tick runs.
    let err = h.server.advance(DT * 2000.0).unwrap_err();
    assert!(matches!(err, EngineError::Level(_)));

    let out = h.server.advance(DT * 1000.0).unwrap();
    let pongs = out
        .iter()
        .filter(|(session, bytes)| {
            session == "bob"
                && ServerMessage::decode(bytes).unwrap() == ServerMessage::Pong { client_time_ms: 7 }
        })
        .count();
    assert_eq!(pongs, 1);
}
