//! Server and client room hosts.
//!
//! Both hosts are transport-agnostic: they take inbound bytes with
//! `receive` and hand back outbound bytes from `advance` / `frame`. Inbound
//! messages are only queued on receipt; they take effect at the next
//! advance or frame, never in the middle of a tick.
//!
//! The server applies queued actions before its next fixed tick and emits a
//! patch every `patch_interval_ms` of host time, independent of the tick rate.
//! The client applies buffered patches at the start of its next frame, then
//! runs its state update and frame step. A rejected patch makes the client
//! drop its mirrored world and ask for a fresh baseline; deltas that arrive
//! before that baseline are ignored.

use std::collections::VecDeque;
use std::fmt;

use duet_ecs::component::ComponentCatalog;
use duet_ecs::entity::EntityId;
use duet_ecs::query::Query;
use duet_sync::encoder::PatchEncoder;
use duet_sync::message::{ClientMessage, ServerMessage};
use duet_sync::mirror::{Mirror, WorldSink};
use duet_sync::patch::Patch;
use duet_sync::room::{PlayerRecord, RoomState};

use crate::action::Action;
use crate::config::EngineConfig;
use crate::game;
use crate::game::components::Portal;
use crate::game::levels::{self, LevelSet};
use crate::input::InputContext;
use crate::registry::{Registry, RegistryKind};
use crate::EngineError;

/// Players needed before actions are accepted.
pub const ROOM_CAPACITY: usize = 2;

/// How often a client measures round-trip time.
const PING_INTERVAL_MS: f64 = 1000.0;

/// How long a desynced client waits for a baseline before asking again.
const RESYNC_RETRY_MS: f64 = 500.0;

// ---------------------------------------------------------------------------
// ServerRoom
// ---------------------------------------------------------------------------

/// The authoritative side of a room.
pub struct ServerRoom {
    registry: Registry,
    encoder: PatchEncoder,
    inbox: VecDeque<(String, ClientMessage)>,
    since_patch_ms: f64,
    /// Replies built by an advance whose fixed loop failed.
    held: Vec<(String, Vec<u8>)>,
}

impl ServerRoom {
    /// A room with the game installed and the first level built.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let mut registry = Registry::new(RegistryKind::Server, config);
        game::install(&mut registry)?;
        Ok(Self {
            registry,
            encoder: PatchEncoder::new(),
            inbox: VecDeque::new(),
            since_patch_ms: 0.0,
            held: Vec::new(),
        })
    }

    /// Seat `session`, spawning its avatar, and return the encoded baseline
    /// message for its client.
    ///
    /// A session that is already seated is marked connected again.
    pub fn join(&mut self, session: &str, name: &str) -> Result<Vec<u8>, EngineError> {
        let (world, room) = self.registry.state_mut();
        if let Some(record) = room.players.get_mut(session) {
            record.connected = true;
            tracing::info!(session, "player reconnected");
        } else {
            let index = room
                .free_index()
                .filter(|_| room.players.len() < ROOM_CAPACITY)
                .ok_or_else(|| EngineError::RoomFull {
                    session: session.to_owned(),
                })?;
            let set = LevelSet::embedded()?;
            let (_, level) = set.get(room.meta.level);
            let entity = levels::spawn_player(world, index, level.spawn(index))?;
            room.players.insert(
                session.to_owned(),
                PlayerRecord {
                    player_index: index,
                    name: name.to_owned(),
                    connected: true,
                    entity: Some(entity),
                },
            );
            tracing::info!(session, player = index, "player joined");
        }
        refresh_started(room);
        self.baseline_message()
    }

    fn baseline_message(&self) -> Result<Vec<u8>, EngineError> {
        let baseline = self.encoder.baseline(self.registry.tick());
        Ok(ServerMessage::Patch(baseline.encode()?).encode()?)
    }

    /// Remove `session`, its avatar, and its portal.
    pub fn leave(&mut self, session: &str) -> Result<(), EngineError> {
        let (world, room) = self.registry.state_mut();
        let record = room
            .players
            .remove(session)
            .ok_or_else(|| EngineError::UnknownSession {
                session: session.to_owned(),
            })?;
        if let Some(entity) = record.entity.filter(|e| world.has(e)) {
            world.destroy(&entity)?;
        }
        for id in world.scan(&Query::all().with::<Portal>()) {
            if world.get::<Portal>(&id)?.owner == record.player_index {
                world.destroy(&id)?;
            }
        }
        refresh_started(room);
        tracing::info!(session, player = record.player_index, "player left");
        Ok(())
    }

    /// Queue an inbound message from `session`. Undecodable bytes are dropped.
    pub fn receive(&mut self, session: &str, bytes: &[u8]) {
        match ClientMessage::decode(bytes) {
            Ok(message) => self.inbox.push_back((session.to_owned(), message)),
            Err(err) => tracing::debug!(session, %err, "dropping undecodable client message"),
        }
    }

    /// Apply queued messages, run the fixed ticks due for `elapsed_ms` of
    /// host time, and return outbound `(session, bytes)` pairs.
    ///
    /// If the fixed loop fails, replies already built are held back and
    /// returned by the next call; the patch that was due goes out then too.
    pub fn advance(&mut self, elapsed_ms: f64) -> Result<Vec<(String, Vec<u8>)>, EngineError> {
        let mut outbound = std::mem::take(&mut self.held);
        while let Some((session, message)) = self.inbox.pop_front() {
            match message {
                ClientMessage::Ping { client_time_ms } => {
                    let pong = ServerMessage::Pong { client_time_ms }.encode()?;
                    outbound.push((session, pong));
                }
                ClientMessage::PerformAction(wire) => self.accept_action(&session, &wire),
                ClientMessage::Resync => {
                    if self.registry.room().players.contains_key(&session) {
                        tracing::debug!(session, seq = self.encoder.seq(), "resending baseline");
                        let baseline = self.baseline_message()?;
                        outbound.push((session, baseline));
                    } else {
                        tracing::debug!(session, "resync from unseated session dropped");
                    }
                }
            }
        }

        self.since_patch_ms += elapsed_ms;
        if let Err(err) = self.registry.run_fixed(elapsed_ms / 1000.0) {
            self.held = outbound;
            return Err(err);
        }

        let interval = f64::from(self.registry.config().patch_interval_ms);
        if self.since_patch_ms >= interval {
            self.since_patch_ms %= interval.max(1.0);
            let tick = self.registry.tick();
            if let Some(patch) = self
                .encoder
                .encode(tick, self.registry.world(), self.registry.room())
            {
                let bytes = ServerMessage::Patch(patch.encode()?).encode()?;
                for (session, record) in &self.registry.room().players {
                    if record.connected {
                        outbound.push((session.clone(), bytes.clone()));
                    }
                }
            }
        }
        Ok(outbound)
    }

    fn accept_action(&mut self, session: &str, wire: &duet_sync::message::WireAction) {
        let room = self.registry.room();
        if !room.meta.started {
            tracing::trace!(session, kind = %wire.kind, "room not started, action dropped");
            return;
        }
        let Some(record) = room.players.get(session) else {
            tracing::debug!(session, "action from unseated session dropped");
            return;
        };
        let Some(action) = Action::from_wire(wire) else {
            tracing::debug!(session, kind = %wire.kind, "unrecognized action dropped");
            return;
        };
        if action.player().is_some_and(|p| p != record.player_index) {
            tracing::debug!(session, ?action, "action for another player dropped");
            return;
        }
        self.registry.actions_mut().enqueue(action);
    }

    /// The authoritative registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Mutable access to the authoritative registry, for hosts and tests.
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Seats and shared metadata.
    pub fn room(&self) -> &RoomState {
        self.registry.room()
    }

    /// Sequence number of the last emitted patch.
    pub fn patch_seq(&self) -> u64 {
        self.encoder.seq()
    }
}

impl fmt::Debug for ServerRoom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerRoom")
            .field("registry", &self.registry)
            .field("patch_seq", &self.encoder.seq())
            .field("inbox", &self.inbox.len())
            .finish()
    }
}

fn refresh_started(room: &mut RoomState) {
    let started = room.players.len() == ROOM_CAPACITY;
    if room.meta.started != started {
        room.meta.started = started;
        tracing::info!(started, "room state changed");
    }
}

// ---------------------------------------------------------------------------
// ClientRoom
// ---------------------------------------------------------------------------

/// One player's view of a room.
pub struct ClientRoom {
    session: String,
    registry: Registry,
    mirror: Mirror,
    catalog: ComponentCatalog,
    inbound: VecDeque<ServerMessage>,
    clock_ms: f64,
    since_ping_ms: f64,
    latency_ms: Option<f64>,
    /// Time since the last resync request, while waiting for a baseline.
    resync_wait_ms: Option<f64>,
}

impl ClientRoom {
    /// A client for `session` with the game installed and an empty world.
    pub fn new(config: EngineConfig, session: impl Into<String>) -> Result<Self, EngineError> {
        config.validate()?;
        let mut registry = Registry::new(RegistryKind::Client, config);
        game::install(&mut registry)?;
        Ok(Self {
            session: session.into(),
            registry,
            mirror: Mirror::new(),
            catalog: game::components::catalog()?,
            inbound: VecDeque::new(),
            clock_ms: 0.0,
            // First frame pings right away.
            since_ping_ms: PING_INTERVAL_MS,
            latency_ms: None,
            resync_wait_ms: None,
        })
    }

    /// Buffer an inbound server message. Undecodable bytes are dropped.
    pub fn receive(&mut self, bytes: &[u8]) {
        match ServerMessage::decode(bytes) {
            Ok(message) => self.inbound.push_back(message),
            Err(err) => tracing::debug!(session = %self.session, %err, "dropping undecodable server message"),
        }
    }

    /// Run one rendered frame of `dt` seconds. Returns encoded messages for
    /// the server.
    pub fn frame(&mut self, dt: f64) -> Result<Vec<Vec<u8>>, EngineError> {
        self.clock_ms += dt * 1000.0;

        let mut patched = false;
        while let Some(message) = self.inbound.pop_front() {
            match message {
                ServerMessage::Patch(bytes) => patched |= self.apply_patch(&bytes)?,
                ServerMessage::Pong { client_time_ms } => {
                    let rtt = (self.clock_ms - client_time_ms as f64).max(0.0);
                    self.latency_ms = Some(rtt);
                    tracing::trace!(session = %self.session, rtt_ms = rtt, "pong");
                }
            }
        }
        if patched && !self.is_resyncing() {
            *self.registry.room_mut() = self.mirror.room().clone();
            let player = self
                .mirror
                .room()
                .players
                .get(&self.session)
                .map(|p| p.player_index);
            self.registry.input_mut().player = player;
            self.registry.state_update()?;
        }

        self.registry.step_frame(dt)?;

        let mut outbound = Vec::new();
        for wire in self.registry.drain_outbox() {
            outbound.push(ClientMessage::PerformAction(wire).encode()?);
        }
        if let Some(wait) = self.resync_wait_ms.as_mut() {
            *wait += dt * 1000.0;
            if *wait >= RESYNC_RETRY_MS {
                *wait = 0.0;
                outbound.push(ClientMessage::Resync.encode()?);
            }
        }
        self.since_ping_ms += dt * 1000.0;
        if self.since_ping_ms >= PING_INTERVAL_MS {
            self.since_ping_ms = 0.0;
            outbound.push(
                ClientMessage::Ping {
                    client_time_ms: self.clock_ms as u64,
                }
                .encode()?,
            );
        }
        Ok(outbound)
    }

    /// Returns whether the patch was applied.
    fn apply_patch(&mut self, bytes: &[u8]) -> Result<bool, EngineError> {
        let patch = match Patch::decode(bytes) {
            Ok(patch) => patch,
            Err(err) => {
                tracing::debug!(session = %self.session, %err, "dropping undecodable patch");
                return Ok(false);
            }
        };
        if self.is_resyncing() && !patch.full {
            tracing::trace!(session = %self.session, seq = patch.seq, "waiting for baseline, delta ignored");
            return Ok(false);
        }
        let mut sink = WorldSink::new(self.registry.world_mut(), &self.catalog);
        match self.mirror.apply(&patch, &mut sink) {
            Ok(()) => {
                if self.resync_wait_ms.take().is_some() {
                    tracing::info!(session = %self.session, seq = patch.seq, "resynced");
                }
                Ok(true)
            }
            Err(err) => {
                tracing::warn!(session = %self.session, seq = patch.seq, %err, "patch rejected, requesting baseline");
                self.drop_mirror()?;
                Ok(false)
            }
        }
    }

    /// Forget all mirrored state. The next frame asks for a baseline.
    fn drop_mirror(&mut self) -> Result<(), EngineError> {
        let world = self.registry.world_mut();
        let ids: Vec<EntityId> = world.entities().cloned().collect();
        for id in &ids {
            world.destroy(id)?;
        }
        self.mirror = Mirror::new();
        self.resync_wait_ms = Some(RESYNC_RETRY_MS);
        Ok(())
    }

    /// Whether the client is waiting for a baseline after a rejected patch.
    pub fn is_resyncing(&self) -> bool {
        self.resync_wait_ms.is_some()
    }

    /// The session this client speaks for.
    pub fn session(&self) -> &str {
        &self.session
    }

    /// The client registry, holding the mirrored world.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Local input state read by the input system.
    pub fn input_mut(&mut self) -> &mut InputContext {
        self.registry.input_mut()
    }

    /// Last measured round trip, once a pong has arrived.
    pub fn latency_ms(&self) -> Option<f64> {
        self.latency_ms
    }

    /// Replication state of the mirrored world.
    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }
}

impl fmt::Debug for ClientRoom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRoom")
            .field("session", &self.session)
            .field("registry", &self.registry)
            .field("last_seq", &self.mirror.last_seq())
            .field("resyncing", &self.is_resyncing())
            .finish()
    }
}
