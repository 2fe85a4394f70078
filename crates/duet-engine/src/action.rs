//! Gameplay actions and the deferred action queue.
//!
//! An [`Action`] is the only way external input reaches simulation state.
//! Each variant carries a typed payload and has a pure validator
//! ([`Action::validate`]). Producers [`enqueue`](ActionQueue::enqueue) actions,
//! optionally after a delay measured on the queue's own clock; the registry
//! [`flush`](ActionQueue::flush)es the queue once per fixed tick, before any
//! system runs.
//!
//! Flushing looks up the handler registered for the action's
//! [`ActionKind`]. An unregistered kind is skipped and a payload that fails
//! validation is dropped; neither is an error.
//!
//! ```
//! use duet_engine::action::{Action, MovePlayer, Vec2};
//!
//! let ok = Action::MovePlayer(MovePlayer { player: 0, dir: Vec2::new(1.0, 0.0) });
//! let bad = Action::MovePlayer(MovePlayer { player: 0, dir: Vec2::new(2.0, 0.0) });
//! assert!(ok.validate());
//! assert!(!bad.validate());
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use duet_ecs::world::World;
use duet_sync::message::WireAction;
use duet_sync::room::RoomState;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::physics::PhysicsWorld;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// A 2D direction or aim vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Both components finite and within `[-1, 1]`.
    pub fn in_unit_range(self) -> bool {
        [self.x, self.y]
            .iter()
            .all(|v| v.is_finite() && (-1.0..=1.0).contains(v))
    }

    pub fn is_zero(self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Unit vector in the same direction, or `None` for the zero vector.
    pub fn normalized(self) -> Option<Self> {
        let len = self.length();
        (len > 0.0).then(|| Self::new(self.x / len, self.y / len))
    }
}

/// Move and/or jump. `dir.x` drives horizontal speed; `dir.y > 0` jumps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovePlayer {
    pub player: u8,
    pub dir: Vec2,
}

/// Fire a portal along `aim`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShootPortal {
    pub player: u8,
    pub aim: Vec2,
}

/// Launch a projectile along `aim`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attack {
    pub player: u8,
    pub aim: Vec2,
}

/// Rebuild the current level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResetLevel {}

/// Highest valid player slot.
pub const MAX_PLAYER_INDEX: u8 = 1;

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Tag identifying an action type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionKind {
    MovePlayer,
    ShootPortal,
    Attack,
    ResetLevel,
}

impl ActionKind {
    pub const ALL: [ActionKind; 4] = [
        ActionKind::MovePlayer,
        ActionKind::ShootPortal,
        ActionKind::Attack,
        ActionKind::ResetLevel,
    ];

    /// Wire tag for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::MovePlayer => "move_player",
            ActionKind::ShootPortal => "shoot_portal",
            ActionKind::Attack => "attack",
            ActionKind::ResetLevel => "reset_level",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == tag)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A gameplay command with its typed payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    MovePlayer(MovePlayer),
    ShootPortal(ShootPortal),
    Attack(Attack),
    ResetLevel(ResetLevel),
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::MovePlayer(_) => ActionKind::MovePlayer,
            Action::ShootPortal(_) => ActionKind::ShootPortal,
            Action::Attack(_) => ActionKind::Attack,
            Action::ResetLevel(_) => ActionKind::ResetLevel,
        }
    }

    /// The player slot the action is issued for, if any.
    pub fn player(&self) -> Option<u8> {
        match self {
            Action::MovePlayer(a) => Some(a.player),
            Action::ShootPortal(a) => Some(a.player),
            Action::Attack(a) => Some(a.player),
            Action::ResetLevel(_) => None,
        }
    }

    /// Payload schema check. Pure: depends on nothing but the payload.
    pub fn validate(&self) -> bool {
        match self {
            Action::MovePlayer(a) => a.player <= MAX_PLAYER_INDEX && a.dir.in_unit_range(),
            Action::ShootPortal(a) => {
                a.player <= MAX_PLAYER_INDEX && a.aim.in_unit_range() && !a.aim.is_zero()
            }
            Action::Attack(a) => {
                a.player <= MAX_PLAYER_INDEX && a.aim.in_unit_range() && !a.aim.is_zero()
            }
            Action::ResetLevel(_) => true,
        }
    }

    /// Decode a wire action. Unknown tags and payloads that do not parse
    /// yield `None`; range checks are left to [`validate`](Self::validate).
    pub fn from_wire(wire: &WireAction) -> Option<Self> {
        let kind = ActionKind::from_tag(&wire.kind)?;
        let payload = wire.payload.clone();
        let action = match kind {
            ActionKind::MovePlayer => Action::MovePlayer(serde_json::from_value(payload).ok()?),
            ActionKind::ShootPortal => Action::ShootPortal(serde_json::from_value(payload).ok()?),
            ActionKind::Attack => Action::Attack(serde_json::from_value(payload).ok()?),
            ActionKind::ResetLevel => Action::ResetLevel(serde_json::from_value(payload).ok()?),
        };
        Some(action)
    }

    /// Encode for the wire.
    pub fn to_wire(&self) -> WireAction {
        let payload = match self {
            Action::MovePlayer(a) => serde_json::to_value(a),
            Action::ShootPortal(a) => serde_json::to_value(a),
            Action::Attack(a) => serde_json::to_value(a),
            Action::ResetLevel(a) => serde_json::to_value(a),
        };
        // Plain structs of numbers always serialize.
        WireAction::new(self.kind().as_str(), payload.unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Handler context
// ---------------------------------------------------------------------------

/// Mutable world access handed to action handlers.
pub struct ActionContext<'a> {
    pub world: &'a mut World,
    pub room: &'a mut RoomState,
    pub physics: &'a mut PhysicsWorld,
    pub config: &'a EngineConfig,
    /// Wire actions bound for the server (client registries only).
    pub outbox: &'a mut Vec<WireAction>,
    pub tick: u64,
}

/// Handler invoked for each accepted action: `(context, action, dt)`.
pub type ActionHandler =
    Box<dyn FnMut(&mut ActionContext<'_>, &Action, f32) -> Result<(), EngineError>>;

// ---------------------------------------------------------------------------
// ActionQueue
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct DelayedAction {
    due_ms: f64,
    seq: u64,
    action: Action,
}

/// FIFO buffer of actions plus a set of delayed ones waiting for their time.
pub struct ActionQueue {
    handlers: BTreeMap<ActionKind, ActionHandler>,
    pending: VecDeque<Action>,
    delayed: Vec<DelayedAction>,
    clock_ms: f64,
    next_seq: u64,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
            pending: VecDeque::new(),
            delayed: Vec::new(),
            clock_ms: 0.0,
            next_seq: 0,
        }
    }

    /// Register (or replace) the handler for `kind`.
    pub fn register<F>(&mut self, kind: ActionKind, handler: F)
    where
        F: FnMut(&mut ActionContext<'_>, &Action, f32) -> Result<(), EngineError> + 'static,
    {
        self.handlers.insert(kind, Box::new(handler));
    }

    /// Append `action` to the pending queue.
    pub fn enqueue(&mut self, action: Action) {
        tracing::trace!(action = %action.kind(), "action enqueued");
        self.pending.push_back(action);
    }

    /// Append `action` after `delay_ms` of queue time. A zero delay is the
    /// same as [`enqueue`](Self::enqueue).
    pub fn enqueue_delayed(&mut self, action: Action, delay_ms: u32) {
        if delay_ms == 0 {
            self.enqueue(action);
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.delayed.push(DelayedAction {
            due_ms: self.clock_ms + f64::from(delay_ms),
            seq,
            action,
        });
    }

    /// Advance the queue clock and release every delayed action now due, in
    /// due-time order (ties in enqueue order).
    pub fn advance_clock(&mut self, elapsed_ms: f64) {
        self.clock_ms += elapsed_ms;
        if self.delayed.is_empty() {
            return;
        }
        let now = self.clock_ms;
        let (mut due, waiting): (Vec<_>, Vec<_>) =
            self.delayed.drain(..).partition(|d| d.due_ms <= now);
        self.delayed = waiting;
        due.sort_by(|a, b| a.due_ms.total_cmp(&b.due_ms).then(a.seq.cmp(&b.seq)));
        for d in due {
            self.enqueue(d.action);
        }
    }

    /// Run every pending action through its validator and handler, in FIFO
    /// order, then clear the queue. Returns the number of handler calls.
    ///
    /// Actions enqueued by a handler during the flush wait for the next one.
    pub fn flush(&mut self, ctx: &mut ActionContext<'_>, dt: f32) -> Result<usize, EngineError> {
        let batch = std::mem::take(&mut self.pending);
        let mut invoked = 0;
        for action in batch {
            let kind = action.kind();
            let Some(handler) = self.handlers.get_mut(&kind) else {
                tracing::trace!(action = %kind, "no handler registered, skipped");
                continue;
            };
            if !action.validate() {
                tracing::debug!(action = %kind, ?action, "payload rejected by validator");
                continue;
            }
            handler(ctx, &action, dt)?;
            invoked += 1;
        }
        Ok(invoked)
    }

    /// Validate and handle `action` immediately, bypassing the queue.
    ///
    /// For re-entrant dispatch from engine code only; producers use
    /// [`enqueue`](Self::enqueue).
    pub fn fire(
        &mut self,
        ctx: &mut ActionContext<'_>,
        action: &Action,
        dt: f32,
    ) -> Result<bool, EngineError> {
        let Some(handler) = self.handlers.get_mut(&action.kind()) else {
            return Ok(false);
        };
        if !action.validate() {
            return Ok(false);
        }
        handler(ctx, action, dt)?;
        Ok(true)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn delayed_len(&self) -> usize {
        self.delayed.len()
    }

    /// Queue time in milliseconds.
    pub fn clock_ms(&self) -> f64 {
        self.clock_ms
    }
}

impl Default for ActionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ActionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionQueue")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("pending", &self.pending)
            .field("delayed", &self.delayed)
            .field("clock_ms", &self.clock_ms)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
