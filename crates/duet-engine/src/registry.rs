//! The system registry: one per process side, owning the store and driving
//! every system through its update phases.
//!
//! A [`Registry`] holds the [`World`], the replicated [`RoomState`], the
//! [`PhysicsWorld`], the [`ActionQueue`], and an ordered list of [`System`]s.
//! Systems are sorted by descending [`priority`](System::priority); ties keep
//! insertion order. Three phases exist:
//!
//! - [`update`](Registry::update): once per rendered frame, variable `dt`.
//! - [`fixed_update`](Registry::fixed_update): once per fixed tick. The action
//!   queue is flushed first, then systems run, so every handler's effects are
//!   visible to the tick that follows its flush.
//! - [`state_update`](Registry::state_update): after a replication patch has
//!   been applied (client) or on demand.
//!
//! Each system receives the members of its [`Query`], resolved from the
//! store's query index just before the call.
//!
//! # Example
//!
//! ```
//! use duet_engine::config::EngineConfig;
//! use duet_engine::registry::{Registry, RegistryKind, System, SystemContext};
//! use duet_engine::EngineError;
//! use duet_ecs::prelude::*;
//!
//! struct Counter(u32);
//!
//! impl System for Counter {
//!     fn name(&self) -> &str {
//!         "counter"
//!     }
//!     fn query(&self) -> Query {
//!         Query::all()
//!     }
//!     fn fixed_update(
//!         &mut self,
//!         _ctx: &mut SystemContext<'_>,
//!         _entities: &[EntityId],
//!         _dt: f32,
//!     ) -> Result<(), EngineError> {
//!         self.0 += 1;
//!         Ok(())
//!     }
//! }
//!
//! let mut registry = Registry::new(RegistryKind::Server, EngineConfig::default());
//! assert!(registry.add_system(Counter(0)));
//! registry.run_fixed(0.05).unwrap();
//! assert_eq!(registry.tick(), 3);
//! ```

use std::cmp::Reverse;
use std::fmt;

use duet_ecs::entity::EntityId;
use duet_ecs::query::{Query, QueryKey};
use duet_ecs::world::World;
use duet_sync::message::WireAction;
use duet_sync::room::RoomState;

use crate::action::{ActionContext, ActionQueue};
use crate::config::EngineConfig;
use crate::input::InputContext;
use crate::physics::PhysicsWorld;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Kinds and targets
// ---------------------------------------------------------------------------

/// Which side of the connection a registry runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryKind {
    Server,
    Client,
}

/// Which registries a system accepts being installed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemTarget {
    Server,
    Client,
    Both,
}

impl SystemTarget {
    pub fn accepts(self, kind: RegistryKind) -> bool {
        matches!(
            (self, kind),
            (SystemTarget::Both, _)
                | (SystemTarget::Server, RegistryKind::Server)
                | (SystemTarget::Client, RegistryKind::Client)
        )
    }
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

/// Everything a system may touch during one call.
pub struct SystemContext<'a> {
    pub world: &'a mut World,
    pub room: &'a mut RoomState,
    pub physics: &'a mut PhysicsWorld,
    pub actions: &'a mut ActionQueue,
    pub input: &'a mut InputContext,
    /// Wire actions to send to the server (client registries only).
    pub outbox: &'a mut Vec<WireAction>,
    pub config: &'a EngineConfig,
    pub tick: u64,
    pub kind: RegistryKind,
}

/// A unit of gameplay logic bound to one entity query.
///
/// Every callback has an empty default, so a system only implements the
/// phases it uses.
pub trait System {
    /// Unique within a registry.
    fn name(&self) -> &str;

    /// Entities this system iterates.
    fn query(&self) -> Query;

    fn target(&self) -> SystemTarget {
        SystemTarget::Both
    }

    /// Higher runs earlier.
    fn priority(&self) -> i32 {
        0
    }

    fn update(
        &mut self,
        _ctx: &mut SystemContext<'_>,
        _entities: &[EntityId],
        _dt: f32,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    fn fixed_update(
        &mut self,
        _ctx: &mut SystemContext<'_>,
        _entities: &[EntityId],
        _dt: f32,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    fn state_update(
        &mut self,
        _ctx: &mut SystemContext<'_>,
        _entities: &[EntityId],
    ) -> Result<(), EngineError> {
        Ok(())
    }

    /// Called once when the system is removed from its registry.
    fn dispose(&mut self, _ctx: &mut SystemContext<'_>) {}
}

struct SystemEntry {
    system: Box<dyn System>,
    key: QueryKey,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Update,
    Fixed,
    State,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Owns the simulation state of one side and runs its systems.
pub struct Registry {
    kind: RegistryKind,
    config: EngineConfig,
    world: World,
    room: RoomState,
    physics: PhysicsWorld,
    actions: ActionQueue,
    input: InputContext,
    outbox: Vec<WireAction>,
    systems: Vec<SystemEntry>,
    tick: u64,
    accumulator: f64,
}

impl Registry {
    /// Create an empty registry.
    ///
    /// # Panics
    ///
    /// Panics if `config.fixed_dt` is not positive and finite.
    pub fn new(kind: RegistryKind, config: EngineConfig) -> Self {
        assert!(
            config.fixed_dt > 0.0 && config.fixed_dt.is_finite(),
            "fixed_dt must be positive and finite, got {}",
            config.fixed_dt
        );
        Self {
            kind,
            world: World::with_seed(config.entity_seed),
            room: RoomState::new(),
            physics: PhysicsWorld::new(config.physics.gravity_x, config.physics.gravity_y),
            actions: ActionQueue::new(),
            input: InputContext::new(),
            outbox: Vec::new(),
            systems: Vec::new(),
            tick: 0,
            accumulator: 0.0,
            config,
        }
    }

    /// Install `system` if its target accepts this registry's kind.
    ///
    /// Returns `false` (and installs nothing) on a target mismatch. The
    /// system's query is registered with the store's index.
    ///
    /// # Panics
    ///
    /// Panics if a system with the same name is already installed.
    pub fn add_system<S: System + 'static>(&mut self, system: S) -> bool {
        if !system.target().accepts(self.kind) {
            tracing::debug!(system = system.name(), kind = ?self.kind, "system skipped for registry kind");
            return false;
        }
        let name = system.name().to_owned();
        assert!(
            !self.systems.iter().any(|e| e.system.name() == name),
            "duplicate system name: {name:?}"
        );
        let key = self.world.register_query(&system.query());
        self.systems.push(SystemEntry {
            system: Box::new(system),
            key,
        });
        // Stable: equal priorities keep insertion order.
        self.systems.sort_by_key(|e| Reverse(e.system.priority()));
        tracing::debug!(system = %name, "system added");
        true
    }

    /// Remove the system called `name`, release its query, and dispose it.
    pub fn remove_system(&mut self, name: &str) -> bool {
        let Some(pos) = self.systems.iter().position(|e| e.system.name() == name) else {
            return false;
        };
        let mut entry = self.systems.remove(pos);
        self.world.release_query(&entry.key);
        let mut ctx = SystemContext {
            world: &mut self.world,
            room: &mut self.room,
            physics: &mut self.physics,
            actions: &mut self.actions,
            input: &mut self.input,
            outbox: &mut self.outbox,
            config: &self.config,
            tick: self.tick,
            kind: self.kind,
        };
        entry.system.dispose(&mut ctx);
        tracing::debug!(system = name, "system removed");
        true
    }

    /// Run every system's variable-rate update.
    pub fn update(&mut self, dt: f32) -> Result<(), EngineError> {
        self.run_phase(Phase::Update, dt)
    }

    /// Run every system's state update.
    pub fn state_update(&mut self) -> Result<(), EngineError> {
        self.run_phase(Phase::State, 0.0)
    }

    /// One fixed tick: advance the action clock, flush actions, run systems.
    pub fn fixed_update(&mut self, dt: f32) -> Result<(), EngineError> {
        self.actions.advance_clock(f64::from(dt) * 1000.0);
        let mut ctx = ActionContext {
            world: &mut self.world,
            room: &mut self.room,
            physics: &mut self.physics,
            config: &self.config,
            outbox: &mut self.outbox,
            tick: self.tick,
        };
        let handled = self.actions.flush(&mut ctx, dt).map_err(|err| {
            tracing::error!(tick = self.tick, %err, "action handler failed");
            err
        })?;
        if handled > 0 {
            tracing::trace!(tick = self.tick, handled, "actions flushed");
        }
        self.run_phase(Phase::Fixed, dt)?;
        self.tick += 1;
        Ok(())
    }

    /// Client frame: one variable update, then as many fixed ticks as the
    /// accumulated time allows. Returns the number of fixed ticks run.
    pub fn step_frame(&mut self, frame_dt: f64) -> Result<u32, EngineError> {
        self.update(frame_dt as f32)?;
        self.run_fixed(frame_dt)
    }

    /// Accumulate `elapsed` seconds and run the fixed ticks now due, at most
    /// `max_substeps`. Time beyond the cap is dropped.
    pub fn run_fixed(&mut self, elapsed: f64) -> Result<u32, EngineError> {
        if elapsed.is_finite() && elapsed > 0.0 {
            self.accumulator += elapsed;
        }
        let fixed_dt = self.config.fixed_dt;
        let dt = self.config.fixed_dt_f32();
        let mut ran = 0;
        // Small tolerance so that accumulated f64 error cannot swallow a tick.
        while self.accumulator + 1e-9 >= fixed_dt && ran < self.config.max_substeps {
            self.fixed_update(dt)?;
            self.accumulator = (self.accumulator - fixed_dt).max(0.0);
            ran += 1;
        }
        if self.accumulator >= fixed_dt {
            tracing::warn!(
                behind_s = self.accumulator,
                max_substeps = self.config.max_substeps,
                "fixed loop behind, dropping time"
            );
            self.accumulator %= fixed_dt;
        }
        Ok(ran)
    }

    fn run_phase(&mut self, phase: Phase, dt: f32) -> Result<(), EngineError> {
        let Self {
            kind,
            config,
            world,
            room,
            physics,
            actions,
            input,
            outbox,
            systems,
            tick,
            ..
        } = self;
        for entry in systems.iter_mut() {
            let entities = world.matching(&entry.key);
            let mut ctx = SystemContext {
                world: &mut *world,
                room: &mut *room,
                physics: &mut *physics,
                actions: &mut *actions,
                input: &mut *input,
                outbox: &mut *outbox,
                config: &*config,
                tick: *tick,
                kind: *kind,
            };
            let result = match phase {
                Phase::Update => entry.system.update(&mut ctx, &entities, dt),
                Phase::Fixed => entry.system.fixed_update(&mut ctx, &entities, dt),
                Phase::State => entry.system.state_update(&mut ctx, &entities),
            };
            if let Err(err) = result {
                tracing::error!(system = entry.system.name(), ?phase, tick = *tick, %err, "system failed");
                return Err(err);
            }
        }
        Ok(())
    }

    /// BLAKE3 hex digest of the bincode encoding of the world snapshot and
    /// room state.
    pub fn state_hash(&self) -> Result<String, EngineError> {
        let bytes = duet_sync::patch::encode(&(self.world.capture_snapshot(), &self.room))?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }

    // -- accessors ----------------------------------------------------------

    pub fn kind(&self) -> RegistryKind {
        self.kind
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn room(&self) -> &RoomState {
        &self.room
    }

    pub fn room_mut(&mut self) -> &mut RoomState {
        &mut self.room
    }

    /// The world and room together, for code that mutates both.
    pub fn state_mut(&mut self) -> (&mut World, &mut RoomState) {
        (&mut self.world, &mut self.room)
    }

    pub fn physics(&self) -> &PhysicsWorld {
        &self.physics
    }

    pub fn physics_mut(&mut self) -> &mut PhysicsWorld {
        &mut self.physics
    }

    pub fn actions(&self) -> &ActionQueue {
        &self.actions
    }

    pub fn actions_mut(&mut self) -> &mut ActionQueue {
        &mut self.actions
    }

    pub fn input(&self) -> &InputContext {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut InputContext {
        &mut self.input
    }

    /// Take every wire action produced since the last drain.
    pub fn drain_outbox(&mut self) -> Vec<WireAction> {
        std::mem::take(&mut self.outbox)
    }

    /// Number of completed fixed ticks.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Installed system names in execution order.
    pub fn system_names(&self) -> Vec<&str> {
        self.systems.iter().map(|e| e.system.name()).collect()
    }

    pub fn system_count(&self) -> usize {
        self.systems.len()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("tick", &self.tick)
            .field("systems", &self.system_names())
            .field("entities", &self.world.entity_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::action::{Action, ActionKind, MovePlayer, Vec2};
    use crate::components::Transform;

    type Log = Rc<RefCell<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        priority: i32,
        target: SystemTarget,
        log: Log,
    }

    impl Recorder {
        fn new(name: &'static str, priority: i32, log: &Log) -> Self {
            Self {
                name,
                priority,
                target: SystemTarget::Both,
                log: Rc::clone(log),
            }
        }
    }

    impl System for Recorder {
        fn name(&self) -> &str {
            self.name
        }
        fn query(&self) -> Query {
            Query::all().with::<Transform>()
        }
        fn target(&self) -> SystemTarget {
            self.target
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn update(&mut self, _: &mut SystemContext<'_>, e: &[EntityId], _: f32) -> Result<(), EngineError> {
            self.log.borrow_mut().push(format!("{}:update:{}", self.name, e.len()));
            Ok(())
        }
        fn fixed_update(&mut self, _: &mut SystemContext<'_>, e: &[EntityId], _: f32) -> Result<(), EngineError> {
            self.log.borrow_mut().push(format!("{}:fixed:{}", self.name, e.len()));
            Ok(())
        }
        fn state_update(&mut self, _: &mut SystemContext<'_>, _: &[EntityId]) -> Result<(), EngineError> {
            self.log.borrow_mut().push(format!("{}:state", self.name));
            Ok(())
        }
        fn dispose(&mut self, _: &mut SystemContext<'_>) {
            self.log.borrow_mut().push(format!("{}:dispose", self.name));
        }
    }

    fn registry() -> Registry {
        Registry::new(RegistryKind::Server, EngineConfig::default())
    }

    #[test]
    #[should_panic(expected = "fixed_dt must be positive")]
    fn zero_dt_panics() {
        let config = EngineConfig {
            fixed_dt: 0.0,
            ..Default::default()
        };
        let _ = Registry::new(RegistryKind::Server, config);
    }

    #[test]
    #[should_panic(expected = "duplicate system name")]
    fn duplicate_system_name_panics() {
        let log = Log::default();
        let mut r = registry();
        r.add_system(Recorder::new("a", 0, &log));
        r.add_system(Recorder::new("a", 1, &log));
    }

    #[test]
    fn priority_orders_systems_stably() {
        let log = Log::default();
        let mut r = registry();
        r.add_system(Recorder::new("low", -5, &log));
        r.add_system(Recorder::new("first", 10, &log));
        r.add_system(Recorder::new("mid_a", 0, &log));
        r.add_system(Recorder::new("mid_b", 0, &log));
        assert_eq!(r.system_names(), vec!["first", "mid_a", "mid_b", "low"]);
    }

    #[test]
    fn target_mismatch_is_rejected() {
        let log = Log::default();
        let mut r = registry();
        let mut client_only = Recorder::new("render", 0, &log);
        client_only.target = SystemTarget::Client;
        assert!(!r.add_system(client_only));
        assert_eq!(r.system_count(), 0);
    }

    #[test]
    fn systems_receive_query_members() {
        let log = Log::default();
        let mut r = registry();
        r.add_system(Recorder::new("p", 0, &log));
        let e = r.world_mut().create();
        r.world_mut().create();
        r.world_mut().add(&e, Transform::default()).unwrap();
        r.fixed_update(1.0 / 60.0).unwrap();
        r.update(0.01).unwrap();
        r.state_update().unwrap();
        assert_eq!(
            log.borrow().as_slice(),
            &["p:fixed:1", "p:update:1", "p:state"]
        );
        assert_eq!(r.tick(), 1);
    }

    #[test]
    fn remove_releases_query_and_disposes() {
        let log = Log::default();
        let mut r = registry();
        r.add_system(Recorder::new("p", 0, &log));
        assert_eq!(r.world().query_index().len(), 1);
        assert!(r.remove_system("p"));
        assert!(!r.remove_system("p"));
        assert_eq!(r.world().query_index().len(), 0);
        assert_eq!(log.borrow().last().map(String::as_str), Some("p:dispose"));
    }

    #[test]
    fn actions_flush_before_systems() {
        let log = Log::default();
        let mut r = registry();
        r.add_system(Recorder::new("p", 0, &log));
        let sink = Rc::clone(&log);
        r.actions_mut()
            .register(ActionKind::MovePlayer, move |_ctx, _a, _dt| {
                sink.borrow_mut().push("handler".into());
                Ok(())
            });
        r.actions_mut().enqueue(Action::MovePlayer(MovePlayer {
            player: 0,
            dir: Vec2::new(1.0, 0.0),
        }));
        r.fixed_update(1.0 / 60.0).unwrap();
        assert_eq!(log.borrow().as_slice(), &["handler", "p:fixed:0"]);
    }

    #[test]
    fn accumulator_runs_due_ticks_and_caps() {
        let mut r = Registry::new(
            RegistryKind::Client,
            EngineConfig {
                fixed_dt: 0.01,
                max_substeps: 3,
                ..Default::default()
            },
        );
        assert_eq!(r.step_frame(0.005).unwrap(), 0);
        assert_eq!(r.step_frame(0.005).unwrap(), 1);
        assert_eq!(r.step_frame(0.025).unwrap(), 2);
        // Far behind: capped, surplus dropped.
        assert_eq!(r.step_frame(1.0).unwrap(), 3);
        assert_eq!(r.step_frame(0.0).unwrap(), 0);
        assert_eq!(r.tick(), 6);
    }

    #[test]
    fn state_hash_tracks_world_and_room() {
        let mut r = registry();
        let h0 = r.state_hash().unwrap();
        assert_eq!(h0.len(), 64);
        r.room_mut().meta.level = 2;
        let h1 = r.state_hash().unwrap();
        assert_ne!(h0, h1);
        r.world_mut().create();
        assert_ne!(h1, r.state_hash().unwrap());
    }
}
