//! rapier2d physics adapter.
//!
//! The [`PhysicsWorld`] keeps one rapier body per entity carrying both a
//! [`Transform`] and a [`Rigidbody`] (plus an optional [`Collider`]). Each
//! fixed tick [`PhysicsWorld::step`]:
//!
//! 1. drops bodies whose entity no longer matches,
//! 2. creates missing bodies and rebuilds any whose shape parameters changed,
//! 3. pushes component values that differ from what the body last held,
//! 4. creates or drops [`Joint`] constraints,
//! 5. steps rapier and turns collider events into [`CollisionContact`]s,
//!    calling [`CollisionListener::Instant`] listeners as events are drained,
//! 6. writes position, rotation and velocity of dynamic bodies back,
//! 7. flushes [`CollisionListener::Queued`] listeners, which may mutate the
//!    world.
//!
//! Ray queries ([`PhysicsWorld::cast_ray`]) intersect the current body shapes
//! directly without stepping.
//!
//! # Determinism
//!
//! rapier2d is compiled with `enhanced-determinism`. Bodies are kept in entity
//! id order, collision pairs are sorted before dispatch, and ray hits are
//! sorted by distance then id, so a run is reproducible on the same platform.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use duet_ecs::entity::EntityId;
use duet_ecs::query::Query;
use duet_ecs::world::World;
use duet_sync::room::RoomState;
use rapier2d::parry::query::RayCast;
use rapier2d::prelude::*;

use crate::components::{collider, joint, Collider, Joint, Rigidbody, Transform};
use crate::config::EngineConfig;
use crate::registry::{System, SystemContext, SystemTarget};
use crate::EngineError;

/// Name of the system that steps the physics world.
pub const PHYSICS_SYSTEM_NAME: &str = "physics";

// ---------------------------------------------------------------------------
// Collision eventing
// ---------------------------------------------------------------------------

/// Which part of a contact's lifetime an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CollisionPhase {
    /// The pair started touching during this step.
    Start,
    /// The pair was touching before this step and still is.
    Active,
    /// The pair stopped touching during this step.
    End,
}

/// One side of a collision, as seen by the collider whose listener runs.
///
/// `this` always owns the collider the listener is registered for; `other` is
/// the entity it touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollisionContact {
    pub this: EntityId,
    pub other: EntityId,
    pub phase: CollisionPhase,
}

/// Mutable state handed to queued listeners.
pub struct ListenerContext<'a> {
    pub world: &'a mut World,
    pub room: &'a mut RoomState,
    pub config: &'a EngineConfig,
    pub tick: u64,
}

/// Callback attached to a collider listener label.
pub enum CollisionListener {
    /// Runs while solver events are drained. Read-only.
    Instant(Box<dyn Fn(&World, &CollisionContact)>),
    /// Runs once after the step and write-back. May mutate the world.
    Queued(Box<dyn Fn(&mut ListenerContext<'_>, &CollisionContact) -> Result<(), EngineError>>),
}

impl fmt::Debug for CollisionListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollisionListener::Instant(_) => f.write_str("Instant(..)"),
            CollisionListener::Queued(_) => f.write_str("Queued(..)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Ray queries
// ---------------------------------------------------------------------------

/// Options for [`PhysicsWorld::cast_ray`].
#[derive(Debug, Clone, Default)]
pub struct RayFilter {
    /// Entity whose body is ignored, usually the caster.
    pub exclude: Option<EntityId>,
    /// Whether sensor colliders can be hit.
    pub include_sensors: bool,
}

impl RayFilter {
    /// Ignore `entity` and all sensors.
    pub fn excluding(entity: &EntityId) -> Self {
        Self {
            exclude: Some(entity.clone()),
            include_sensors: false,
        }
    }
}

/// One body intersected by a ray.
#[derive(Debug, Clone, PartialEq)]
pub struct RayHit {
    pub entity: EntityId,
    pub point: (f32, f32),
    /// Outward surface normal at `point`.
    pub normal: (f32, f32),
    /// Distance from the ray origin.
    pub distance: f32,
}

// ---------------------------------------------------------------------------
// Body bookkeeping
// ---------------------------------------------------------------------------

/// Everything that forces a body to be rebuilt when it changes.
#[derive(Debug, Clone, PartialEq)]
struct ShapeKey {
    is_static: bool,
    fixed_rotation: bool,
    collider: Option<(u8, f32, f32, f32, bool)>,
}

impl ShapeKey {
    fn new(rb: &Rigidbody, col: Option<&Collider>) -> Self {
        Self {
            is_static: rb.is_static,
            fixed_rotation: rb.fixed_rotation,
            collider: col.map(|c| (c.shape, c.width, c.height, c.radius, c.is_sensor)),
        }
    }
}

/// Component values last exchanged with the body.
#[derive(Debug, Clone, Copy, PartialEq)]
struct BodyState {
    x: f32,
    y: f32,
    rotation: f32,
    vx: f32,
    vy: f32,
    angular_velocity: f32,
    friction: f32,
    restitution: f32,
    gravity_scale: f32,
}

impl BodyState {
    fn new(t: &Transform, rb: &Rigidbody) -> Self {
        Self {
            x: t.x,
            y: t.y,
            rotation: t.rotation,
            vx: rb.vx,
            vy: rb.vy,
            angular_velocity: rb.angular_velocity,
            friction: rb.friction,
            restitution: rb.restitution,
            gravity_scale: rb.gravity_scale,
        }
    }
}

#[derive(Debug)]
struct BodyRecord {
    body: RigidBodyHandle,
    collider: Option<ColliderHandle>,
    shape: ShapeKey,
    synced: BodyState,
    listener: String,
}

#[derive(Debug)]
struct JointRecord {
    handle: ImpulseJointHandle,
    endpoints: (EntityId, EntityId),
    anchors: [f32; 4],
}

// ---------------------------------------------------------------------------
// PhysicsWorld
// ---------------------------------------------------------------------------

/// Owns the rapier simulation and its mapping to entities.
pub struct PhysicsWorld {
    pipeline: PhysicsPipeline,
    gravity: Vector<Real>,
    integration_params: IntegrationParameters,
    island_manager: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    rigid_body_set: RigidBodySet,
    collider_set: ColliderSet,
    impulse_joint_set: ImpulseJointSet,
    multibody_joint_set: MultibodyJointSet,
    ccd_solver: CCDSolver,
    bodies: BTreeMap<EntityId, BodyRecord>,
    collider_to_entity: HashMap<ColliderHandle, EntityId>,
    joints: BTreeMap<EntityId, JointRecord>,
    /// Unordered pairs currently in contact, stored as `(min, max)`.
    touching: BTreeSet<(EntityId, EntityId)>,
    listeners: BTreeMap<String, Vec<(CollisionPhase, CollisionListener)>>,
}

impl PhysicsWorld {
    pub fn new(gravity_x: f32, gravity_y: f32) -> Self {
        Self {
            pipeline: PhysicsPipeline::new(),
            gravity: vector![gravity_x as Real, gravity_y as Real],
            integration_params: IntegrationParameters::default(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            bodies: BTreeMap::new(),
            collider_to_entity: HashMap::new(),
            joints: BTreeMap::new(),
            touching: BTreeSet::new(),
            listeners: BTreeMap::new(),
        }
    }

    /// Attach `listener` to every collider labelled `label`, for `phase`.
    pub fn add_listener(
        &mut self,
        label: impl Into<String>,
        phase: CollisionPhase,
        listener: CollisionListener,
    ) {
        self.listeners
            .entry(label.into())
            .or_default()
            .push((phase, listener));
    }

    pub fn has_body(&self, entity: &EntityId) -> bool {
        self.bodies.contains_key(entity)
    }

    pub fn body_count(&self) -> usize {
        self.rigid_body_set.len()
    }

    pub fn joint_count(&self) -> usize {
        self.impulse_joint_set.len()
    }

    /// Whether the two entities are currently in contact.
    pub fn touching(&self, a: &EntityId, b: &EntityId) -> bool {
        self.touching.contains(&ordered(a, b))
    }

    /// Drop every body and joint. Listeners stay registered.
    pub fn clear(&mut self) {
        let ids: Vec<EntityId> = self.bodies.keys().cloned().collect();
        for id in ids {
            self.remove_body(&id);
        }
        self.touching.clear();
    }

    // -- body lifecycle -----------------------------------------------------

    fn create_body(&mut self, id: &EntityId, t: &Transform, rb: &Rigidbody, col: Option<&Collider>) {
        let builder = if rb.is_static {
            RigidBodyBuilder::fixed()
        } else {
            RigidBodyBuilder::dynamic()
        };
        let mut builder = builder
            .translation(vector![t.x, t.y])
            .rotation(t.rotation)
            .linvel(vector![rb.vx, rb.vy])
            .angvel(rb.angular_velocity)
            .gravity_scale(rb.gravity_scale);
        if rb.fixed_rotation {
            builder = builder.lock_rotations();
        }
        let body = self.rigid_body_set.insert(builder.build());

        let collider_handle = col.map(|c| {
            let shape = match c.shape {
                collider::CIRCLE => SharedShape::ball(c.radius),
                _ => SharedShape::cuboid(c.width * 0.5, c.height * 0.5),
            };
            let built = ColliderBuilder::new(shape)
                .friction(rb.friction)
                .restitution(rb.restitution)
                .sensor(c.is_sensor)
                .active_events(ActiveEvents::COLLISION_EVENTS)
                .build();
            let handle =
                self.collider_set
                    .insert_with_parent(built, body, &mut self.rigid_body_set);
            self.collider_to_entity.insert(handle, id.clone());
            handle
        });

        tracing::debug!(entity = %id, is_static = rb.is_static, "physics body created");
        self.bodies.insert(
            id.clone(),
            BodyRecord {
                body,
                collider: collider_handle,
                shape: ShapeKey::new(rb, col),
                synced: BodyState::new(t, rb),
                listener: col.map(|c| c.listener.clone()).unwrap_or_default(),
            },
        );
    }

    fn remove_body(&mut self, id: &EntityId) {
        let Some(record) = self.bodies.remove(id) else {
            return;
        };
        if let Some(handle) = record.collider {
            self.collider_to_entity.remove(&handle);
        }
        // Joints attached to the body go with it.
        self.joints
            .retain(|_, j| j.endpoints.0 != *id && j.endpoints.1 != *id);
        self.rigid_body_set.remove(
            record.body,
            &mut self.island_manager,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            true,
        );
        self.touching.retain(|(a, b)| a != id && b != id);
        tracing::debug!(entity = %id, "physics body removed");
    }

    /// Bring bodies in line with the components of `entities`.
    fn sync_bodies(&mut self, world: &World, entities: &[EntityId]) {
        let live: BTreeSet<&EntityId> = entities.iter().collect();
        let stale: Vec<EntityId> = self
            .bodies
            .keys()
            .filter(|id| !live.contains(id) || !world.has(id))
            .cloned()
            .collect();
        for id in &stale {
            self.remove_body(id);
        }

        for id in entities {
            let (Some(t), Some(rb)) = (world.try_get::<Transform>(id), world.try_get::<Rigidbody>(id))
            else {
                continue;
            };
            let col = world.try_get::<Collider>(id);
            let key = ShapeKey::new(rb, col);
            let rebuild = self.bodies.get(id).map_or(true, |r| r.shape != key);
            if rebuild {
                if self.bodies.contains_key(id) {
                    tracing::debug!(entity = %id, "shape changed, rebuilding body");
                    self.remove_body(id);
                }
                self.create_body(id, t, rb, col);
                continue;
            }

            let Some(record) = self.bodies.get_mut(id) else {
                continue;
            };
            if let Some(c) = col {
                if record.listener != c.listener {
                    record.listener = c.listener.clone();
                }
            }
            let wanted = BodyState::new(t, rb);
            if wanted == record.synced {
                continue;
            }
            let old = record.synced;
            if let Some(body) = self.rigid_body_set.get_mut(record.body) {
                if (wanted.x, wanted.y, wanted.rotation) != (old.x, old.y, old.rotation) {
                    body.set_position(Isometry::new(vector![wanted.x, wanted.y], wanted.rotation), true);
                }
                if (wanted.vx, wanted.vy) != (old.vx, old.vy) {
                    body.set_linvel(vector![wanted.vx, wanted.vy], true);
                }
                if wanted.angular_velocity != old.angular_velocity {
                    body.set_angvel(wanted.angular_velocity, true);
                }
                if wanted.gravity_scale != old.gravity_scale {
                    body.set_gravity_scale(wanted.gravity_scale, true);
                }
            }
            if (wanted.friction, wanted.restitution) != (old.friction, old.restitution) {
                if let Some(c) = record.collider.and_then(|h| self.collider_set.get_mut(h)) {
                    c.set_friction(wanted.friction);
                    c.set_restitution(wanted.restitution);
                }
            }
            record.synced = wanted;
        }
    }

    /// Create joints whose endpoints both have bodies; drop the rest.
    fn sync_joints(&mut self, world: &World) {
        let mut wanted: BTreeMap<EntityId, (EntityId, EntityId, [f32; 4])> = BTreeMap::new();
        for id in world.entities() {
            if let Some(j) = world.try_get::<Joint>(id) {
                let (a, b) = joint::endpoints(j);
                if a != b && self.bodies.contains_key(&a) && self.bodies.contains_key(&b) {
                    let anchors = [j.anchor_ax, j.anchor_ay, j.anchor_bx, j.anchor_by];
                    wanted.insert(id.clone(), (a, b, anchors));
                }
            }
        }

        let dropped: Vec<EntityId> = self
            .joints
            .iter()
            .filter(|(id, rec)| {
                wanted
                    .get(*id)
                    .map_or(true, |(a, b, anchors)| {
                        (a, b) != (&rec.endpoints.0, &rec.endpoints.1) || *anchors != rec.anchors
                    })
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in dropped {
            if let Some(rec) = self.joints.remove(&id) {
                self.impulse_joint_set.remove(rec.handle, true);
                tracing::debug!(entity = %id, "joint removed");
            }
        }

        for (id, (a, b, anchors)) in wanted {
            if self.joints.contains_key(&id) {
                continue;
            }
            let (Some(ra), Some(rb)) = (self.bodies.get(&a), self.bodies.get(&b)) else {
                continue;
            };
            let built = RevoluteJointBuilder::new()
                .local_anchor1(point![anchors[0], anchors[1]])
                .local_anchor2(point![anchors[2], anchors[3]]);
            let handle = self.impulse_joint_set.insert(ra.body, rb.body, built, true);
            tracing::debug!(entity = %id, a = %a, b = %b, "joint created");
            self.joints.insert(
                id,
                JointRecord {
                    handle,
                    endpoints: (a, b),
                    anchors,
                },
            );
        }
    }

    // -- stepping -----------------------------------------------------------

    /// Advance the simulation one fixed step for `entities`.
    ///
    /// `entities` are the members of the physics query; bodies of entities
    /// not in the list are dropped first.
    pub fn step(
        &mut self,
        world: &mut World,
        room: &mut RoomState,
        config: &EngineConfig,
        entities: &[EntityId],
        dt: f32,
        tick: u64,
    ) -> Result<(), EngineError> {
        self.sync_bodies(world, entities);
        self.sync_joints(world);
        self.integration_params.dt = dt as Real;

        let (collision_send, collision_recv) =
            rapier2d::crossbeam::channel::unbounded::<CollisionEvent>();
        let (force_send, _force_recv) =
            rapier2d::crossbeam::channel::unbounded::<ContactForceEvent>();
        let event_handler = ChannelEventCollector::new(collision_send, force_send);

        self.pipeline.step(
            &self.gravity,
            &self.integration_params,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            None,
            &(),
            &event_handler,
        );

        let mut started = BTreeSet::new();
        let mut stopped = BTreeSet::new();
        while let Ok(event) = collision_recv.try_recv() {
            let (h1, h2) = (event.collider1(), event.collider2());
            let (Some(a), Some(b)) = (self.collider_to_entity.get(&h1), self.collider_to_entity.get(&h2))
            else {
                continue;
            };
            if a == b {
                continue;
            }
            let pair = ordered(a, b);
            if event.started() {
                stopped.remove(&pair);
                started.insert(pair);
            } else {
                started.remove(&pair);
                stopped.insert(pair);
            }
        }

        let persisting: Vec<(EntityId, EntityId)> = self
            .touching
            .iter()
            .filter(|p| !stopped.contains(*p) && !started.contains(*p))
            .cloned()
            .collect();

        let mut contacts = Vec::new();
        for (a, b) in &started {
            self.touching.insert((a.clone(), b.clone()));
            contacts.extend(self.contacts_for(a, b, CollisionPhase::Start));
        }
        for pair in &stopped {
            if self.touching.remove(pair) {
                contacts.extend(self.contacts_for(&pair.0, &pair.1, CollisionPhase::End));
            }
        }

        for (a, b) in &persisting {
            contacts.extend(self.contacts_for(a, b, CollisionPhase::Active));
        }

        for contact in &contacts {
            self.dispatch_instant(world, contact);
        }

        self.write_back(world);

        let mut ctx = ListenerContext {
            world,
            room,
            config,
            tick,
        };
        for contact in &contacts {
            self.dispatch_queued(&mut ctx, contact)?;
        }
        tracing::trace!(tick, bodies = self.bodies.len(), contacts = contacts.len(), "physics stepped");
        Ok(())
    }

    /// Both sides of a pair, each addressed to the collider that owns it.
    fn contacts_for(&self, a: &EntityId, b: &EntityId, phase: CollisionPhase) -> Vec<CollisionContact> {
        [(a, b), (b, a)]
            .into_iter()
            .filter(|(this, _)| {
                self.bodies
                    .get(*this)
                    .is_some_and(|r| self.listeners.contains_key(&r.listener))
            })
            .map(|(this, other)| CollisionContact {
                this: this.clone(),
                other: other.clone(),
                phase,
            })
            .collect()
    }

    fn listeners_for(&self, entity: &EntityId) -> &[(CollisionPhase, CollisionListener)] {
        self.bodies
            .get(entity)
            .and_then(|r| self.listeners.get(&r.listener))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn dispatch_instant(&self, world: &World, contact: &CollisionContact) {
        for (phase, listener) in self.listeners_for(&contact.this) {
            if *phase != contact.phase {
                continue;
            }
            if let CollisionListener::Instant(f) = listener {
                f(world, contact);
            }
        }
    }

    fn dispatch_queued(
        &self,
        ctx: &mut ListenerContext<'_>,
        contact: &CollisionContact,
    ) -> Result<(), EngineError> {
        for (phase, listener) in self.listeners_for(&contact.this) {
            if *phase != contact.phase {
                continue;
            }
            if let CollisionListener::Queued(f) = listener {
                // An earlier listener may have destroyed either side.
                if !ctx.world.has(&contact.this) || !ctx.world.has(&contact.other) {
                    return Ok(());
                }
                f(ctx, contact)?;
            }
        }
        Ok(())
    }

    /// Copy solver results into the components of dynamic bodies.
    fn write_back(&mut self, world: &mut World) {
        for (id, record) in &mut self.bodies {
            let Some(body) = self.rigid_body_set.get(record.body) else {
                continue;
            };
            if !body.is_dynamic() {
                continue;
            }
            let pos = body.translation();
            let vel = body.linvel();
            let rotation = body.rotation().angle();
            let angvel = body.angvel();
            if let Some(t) = world.try_get_mut::<Transform>(id) {
                t.x = pos.x;
                t.y = pos.y;
                t.rotation = rotation;
            }
            if let Some(rb) = world.try_get_mut::<Rigidbody>(id) {
                rb.vx = vel.x;
                rb.vy = vel.y;
                rb.angular_velocity = angvel;
            }
            record.synced.x = pos.x;
            record.synced.y = pos.y;
            record.synced.rotation = rotation;
            record.synced.vx = vel.x;
            record.synced.vy = vel.y;
            record.synced.angular_velocity = angvel;
        }
    }

    // -- queries ------------------------------------------------------------

    /// Every body hit by the ray from `origin` along `dir`, up to
    /// `max_distance`, nearest first.
    ///
    /// `dir` need not be normalized; a zero direction hits nothing. Bodies
    /// whose entity is gone from `world` are skipped even before the next
    /// step releases them.
    pub fn cast_ray(
        &self,
        world: &World,
        origin: (f32, f32),
        dir: (f32, f32),
        max_distance: f32,
        filter: &RayFilter,
    ) -> Vec<RayHit> {
        let len = (dir.0 * dir.0 + dir.1 * dir.1).sqrt();
        if len == 0.0 || !len.is_finite() || max_distance <= 0.0 {
            return Vec::new();
        }
        let ray = Ray::new(point![origin.0, origin.1], vector![dir.0 / len, dir.1 / len]);

        let mut hits = Vec::new();
        for (id, record) in &self.bodies {
            if filter.exclude.as_ref() == Some(id) || !world.has(id) {
                continue;
            }
            let Some(c) = record.collider.and_then(|h| self.collider_set.get(h)) else {
                continue;
            };
            if c.is_sensor() && !filter.include_sensors {
                continue;
            }
            let Some(body) = self.rigid_body_set.get(record.body) else {
                continue;
            };
            if let Some(hit) = c
                .shape()
                .cast_ray_and_get_normal(body.position(), &ray, max_distance, true)
            {
                let p = ray.point_at(hit.time_of_impact);
                hits.push(RayHit {
                    entity: id.clone(),
                    point: (p.x, p.y),
                    normal: (hit.normal.x, hit.normal.y),
                    distance: hit.time_of_impact,
                });
            }
        }
        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.entity.cmp(&b.entity))
        });
        hits
    }
}

impl fmt::Debug for PhysicsWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicsWorld")
            .field("bodies", &self.bodies.len())
            .field("joints", &self.joints.len())
            .field("touching", &self.touching)
            .field("listeners", &self.listeners.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn ordered(a: &EntityId, b: &EntityId) -> (EntityId, EntityId) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

// ---------------------------------------------------------------------------
// PhysicsSystem
// ---------------------------------------------------------------------------

/// Steps the registry's [`PhysicsWorld`] once per fixed tick, after every
/// other fixed-update system.
#[derive(Debug)]
pub struct PhysicsSystem {
    target: SystemTarget,
}

impl PhysicsSystem {
    pub fn new(target: SystemTarget) -> Self {
        Self { target }
    }
}

impl Default for PhysicsSystem {
    fn default() -> Self {
        Self::new(SystemTarget::Server)
    }
}

impl System for PhysicsSystem {
    fn name(&self) -> &str {
        PHYSICS_SYSTEM_NAME
    }

    fn query(&self) -> Query {
        Query::all().with::<Transform>().with::<Rigidbody>()
    }

    fn target(&self) -> SystemTarget {
        self.target
    }

    fn priority(&self) -> i32 {
        -100
    }

    fn fixed_update(
        &mut self,
        ctx: &mut SystemContext<'_>,
        entities: &[EntityId],
        dt: f32,
    ) -> Result<(), EngineError> {
        ctx.physics
            .step(ctx.world, ctx.room, ctx.config, entities, dt, ctx.tick)
    }

    fn dispose(&mut self, ctx: &mut SystemContext<'_>) {
        ctx.physics.clear();
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

    use crate::components::rigidbody;

    struct Scene {
        world: World,
        room: RoomState,
        config: EngineConfig,
        physics: PhysicsWorld,
    }

    impl Scene {
        fn new(gravity_y: f32) -> Self {
            Self {
                world: World::with_seed(7),
                room: RoomState::new(),
                config: EngineConfig::default(),
                physics: PhysicsWorld::new(0.0, gravity_y),
            }
        }

        fn spawn(&mut self, x: f32, y: f32, rb: Rigidbody, col: Option<Collider>) -> EntityId {
            let id = self.world.create();
            self.world
                .add(&id, Transform { x, y, ..Default::default() })
                .unwrap();
            self.world.add(&id, rb).unwrap();
            if let Some(c) = col {
                self.world.add(&id, c).unwrap();
            }
            id
        }

        fn step(&mut self) {
            let query = Query::all().with::<Transform>().with::<Rigidbody>();
            let members = self.world.scan(&query);
            self.physics
                .step(&mut self.world, &mut self.room, &self.config, &members, 1.0 / 60.0, 0)
                .unwrap();
        }
    }

    #[test]
    fn bodies_follow_query_membership() {
        let mut s = Scene::new(0.0);
        let a = s.spawn(0.0, 0.0, Rigidbody::default(), Some(collider::circle(0.5)));
        s.step();
        assert!(s.physics.has_body(&a));
        assert_eq!(s.physics.body_count(), 1);

        s.world.remove_component::<Rigidbody>(&a).unwrap();
        s.step();
        assert!(!s.physics.has_body(&a));
        assert_eq!(s.physics.body_count(), 0);
    }

    #[test]
    fn dynamic_body_moves_and_writes_back() {
        let mut s = Scene::new(0.0);
        let mut rb = Rigidbody::default();
        rigidbody::set_velocity(&mut rb, 6.0, 0.0);
        let a = s.spawn(0.0, 0.0, rb, Some(collider::circle(0.5)));
        s.step();
        s.step();
        let t = s.world.get::<Transform>(&a).unwrap();
        assert!(t.x > 0.1, "x = {}", t.x);
        assert!((s.world.get::<Rigidbody>(&a).unwrap().vx - 6.0).abs() < 1e-3);
    }

    #[test]
    fn component_edit_is_pushed_to_body() {
        let mut s = Scene::new(0.0);
        let a = s.spawn(0.0, 0.0, Rigidbody::default(), Some(collider::circle(0.5)));
        s.step();
        s.world.get_mut::<Transform>(&a).unwrap().x = 10.0;
        s.step();
        assert!((s.world.get::<Transform>(&a).unwrap().x - 10.0).abs() < 1e-3);
    }

    #[test]
    fn gravity_pulls_dynamic_but_not_static() {
        let mut s = Scene::new(-10.0);
        let falling = s.spawn(0.0, 5.0, Rigidbody::default(), Some(collider::circle(0.5)));
        let fixed = s.spawn(10.0, 5.0, rigidbody::fixed(), Some(collider::rect(1.0, 1.0)));
        for _ in 0..10 {
            s.step();
        }
        assert!(s.world.get::<Transform>(&falling).unwrap().y < 5.0);
        assert_eq!(s.world.get::<Transform>(&fixed).unwrap().y, 5.0);
    }

    #[test]
    fn shape_change_rebuilds_body() {
        let mut s = Scene::new(0.0);
        let a = s.spawn(0.0, 0.0, rigidbody::fixed(), Some(collider::rect(1.0, 1.0)));
        s.step();
        let before = s
            .physics
            .cast_ray(&s.world, (-5.0, 0.0), (1.0, 0.0), 10.0, &RayFilter::default());
        assert!((before[0].distance - 4.5).abs() < 1e-3);

        collider::set_rect(s.world.get_mut::<Collider>(&a).unwrap(), 4.0, 1.0);
        s.step();
        let after = s
            .physics
            .cast_ray(&s.world, (-5.0, 0.0), (1.0, 0.0), 10.0, &RayFilter::default());
        assert!((after[0].distance - 3.0).abs() < 1e-3);
        assert_eq!(s.physics.body_count(), 1);
    }

    #[test]
    fn ray_hits_sorted_nearest_first_with_exclusion() {
        let mut s = Scene::new(0.0);
        let caster = s.spawn(0.0, 0.0, Rigidbody::default(), Some(collider::rect(1.0, 1.0)));
        let far = s.spawn(0.0, -6.0, rigidbody::fixed(), Some(collider::rect(4.0, 1.0)));
        let near = s.spawn(0.0, -3.0, rigidbody::fixed(), Some(collider::rect(4.0, 1.0)));
        let mut sensor = collider::rect(4.0, 1.0);
        collider::set_sensor(&mut sensor, true);
        s.spawn(0.0, -2.0, rigidbody::fixed(), Some(sensor));
        s.step();

        let hits = s
            .physics
            .cast_ray(&s.world, (0.0, 0.0), (0.0, -1.0), 20.0, &RayFilter::excluding(&caster));
        let ids: Vec<_> = hits.iter().map(|h| h.entity.clone()).collect();
        assert_eq!(ids, vec![near, far]);
        assert!((hits[0].normal.1 - 1.0).abs() < 1e-4);
        assert!(hits[0].distance < hits[1].distance);

        let with_sensors = s.physics.cast_ray(
            &s.world,
            (0.0, 0.0),
            (0.0, -1.0),
            20.0,
            &RayFilter {
                exclude: Some(caster),
                include_sensors: true,
            },
        );
        assert_eq!(with_sensors.len(), 3);
        assert!(s
            .physics
            .cast_ray(&s.world, (0.0, 0.0), (0.0, 0.0), 20.0, &RayFilter::default())
            .is_empty());
    }

    #[test]
    fn queued_listener_sees_start_then_end_for_owner() {
        let mut s = Scene::new(0.0);
        let seen: Rc<RefCell<Vec<CollisionContact>>> = Rc::default();
        let sink = Rc::clone(&seen);
        for phase in [CollisionPhase::Start, CollisionPhase::End] {
            let sink = Rc::clone(&sink);
            s.physics.add_listener(
                "zone",
                phase,
                CollisionListener::Queued(Box::new(move |_ctx, c| {
                    sink.borrow_mut().push(c.clone());
                    Ok(())
                })),
            );
        }
        let mut zone_col = collider::rect(2.0, 2.0);
        collider::set_sensor(&mut zone_col, true);
        collider::set_listener(&mut zone_col, "zone");
        let zone = s.spawn(0.0, 0.0, rigidbody::fixed(), Some(zone_col));
        let ball = s.spawn(0.0, 0.0, Rigidbody::default(), Some(collider::circle(0.25)));
        s.step();
        s.step();
        assert_eq!(
            seen.borrow().as_slice(),
            &[CollisionContact {
                this: zone.clone(),
                other: ball.clone(),
                phase: CollisionPhase::Start,
            }]
        );
        assert!(s.physics.touching(&ball, &zone));

        s.world.get_mut::<Transform>(&ball).unwrap().x = 20.0;
        s.step();
        s.step();
        assert_eq!(seen.borrow().last().map(|c| c.phase), Some(CollisionPhase::End));
        assert!(!s.physics.touching(&ball, &zone));
    }

    #[test]
    fn instant_listener_fires_during_step() {
        let mut s = Scene::new(0.0);
        let count = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&count);
        s.physics.add_listener(
            "hit",
            CollisionPhase::Start,
            CollisionListener::Instant(Box::new(move |world, c| {
                assert!(world.has(&c.this));
                *sink.borrow_mut() += 1;
            })),
        );
        let mut col = collider::circle(1.0);
        collider::set_listener(&mut col, "hit");
        s.spawn(0.0, 0.0, rigidbody::fixed(), Some(col));
        s.spawn(0.5, 0.0, Rigidbody::default(), Some(collider::circle(1.0)));
        s.step();
        s.step();
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn both_listener_kinds_see_active_contacts() {
        let mut s = Scene::new(0.0);
        let instant = Rc::new(RefCell::new(0));
        let queued = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&instant);
        s.physics.add_listener(
            "zone",
            CollisionPhase::Active,
            CollisionListener::Instant(Box::new(move |_world, c| {
                assert_eq!(c.phase, CollisionPhase::Active);
                *sink.borrow_mut() += 1;
            })),
        );
        let sink = Rc::clone(&queued);
        s.physics.add_listener(
            "zone",
            CollisionPhase::Active,
            CollisionListener::Queued(Box::new(move |_ctx, _c| {
                *sink.borrow_mut() += 1;
                Ok(())
            })),
        );
        let mut zone_col = collider::rect(2.0, 2.0);
        collider::set_sensor(&mut zone_col, true);
        collider::set_listener(&mut zone_col, "zone");
        s.spawn(0.0, 0.0, rigidbody::fixed(), Some(zone_col));
        s.spawn(0.0, 0.0, Rigidbody::default(), Some(collider::circle(0.25)));
        for _ in 0..6 {
            s.step();
        }
        assert!(*queued.borrow() > 0);
        assert_eq!(*instant.borrow(), *queued.borrow());
    }

    #[test]
    fn destroyed_entity_is_not_hit_before_next_step() {
        let mut s = Scene::new(0.0);
        let wall = s.spawn(0.0, 0.0, rigidbody::fixed(), Some(collider::rect(1.0, 4.0)));
        s.step();
        let through = |s: &Scene| {
            s.physics
                .cast_ray(&s.world, (-5.0, 0.0), (1.0, 0.0), 10.0, &RayFilter::default())
        };
        assert_eq!(through(&s).len(), 1);

        s.world.destroy(&wall).unwrap();
        assert!(s.physics.has_body(&wall));
        assert!(through(&s).is_empty());
        s.step();
        assert!(!s.physics.has_body(&wall));
    }

    #[test]
    fn joint_needs_both_bodies() {
        let mut s = Scene::new(0.0);
        let a = s.spawn(0.0, 0.0, rigidbody::fixed(), Some(collider::rect(0.2, 0.2)));
        let b = s.spawn(0.0, -2.0, Rigidbody::default(), Some(collider::rect(0.2, 2.0)));
        let pin = s.world.create();
        s.world
            .add(&pin, joint::pin(&a, &b, (0.0, 0.0), (0.0, 1.0)))
            .unwrap();
        s.step();
        assert_eq!(s.physics.joint_count(), 1);

        s.world.destroy(&a).unwrap();
        s.step();
        assert_eq!(s.physics.joint_count(), 0);
    }
}
