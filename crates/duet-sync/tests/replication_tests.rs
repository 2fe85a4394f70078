//! End-to-end replication tests: server world -> encoder -> bytes -> mirror
//! -> client world.

use duet_ecs::prelude::*;
use duet_sync::prelude::*;
use proptest::prelude::*;

duet_ecs::component! {
    struct Transform: 191, "transform" {
        x: f32 = 0.0,
        y: f32 = 0.0,
        rotation: f32 = 0.0,
    }
}

duet_ecs::component! {
    struct Rigidbody: 195, "rigidbody" {
        vx: f32 = 0.0,
        vy: f32 = 0.0,
        is_static: bool = false,
    }
}

duet_ecs::component! {
    struct Player: 0, "player" {
        index: u8 = 0,
        name: String = String::new(),
    }
}

fn catalog() -> ComponentCatalog {
    let mut catalog = ComponentCatalog::new();
    catalog.register::<Transform>(TypeOrigin::Engine).unwrap();
    catalog.register::<Rigidbody>(TypeOrigin::Engine).unwrap();
    catalog.register::<Player>(TypeOrigin::Game).unwrap();
    catalog
}

/// Server and client halves wired through the binary codec.
struct Link {
    server: World,
    room: RoomState,
    encoder: PatchEncoder,
    client: World,
    mirror: Mirror,
    catalog: ComponentCatalog,
    tick: u64,
}

impl Link {
    fn new() -> Self {
        Self {
            server: World::with_seed(99),
            room: RoomState::new(),
            encoder: PatchEncoder::new(),
            client: World::new(),
            mirror: Mirror::new(),
            catalog: catalog(),
            tick: 0,
        }
    }

    /// Emit a patch (if anything changed) and apply it on the client.
    fn sync(&mut self) -> Vec<MirrorEvent> {
        self.tick += 1;
        let Some(patch) = self.encoder.encode(self.tick, &self.server, &self.room) else {
            return Vec::new();
        };
        let msg = ServerMessage::Patch(patch.encode().unwrap()).encode().unwrap();
        let ServerMessage::Patch(bytes) = ServerMessage::decode(&msg).unwrap() else {
            panic!("expected a patch message");
        };
        let patch = Patch::decode(&bytes).unwrap();
        let mut sink = WorldSink::new(&mut self.client, &self.catalog);
        self.mirror.apply(&patch, &mut sink).unwrap();
        sink.into_events()
    }
}

#[test]
fn identity_round_trip() {
    let mut link = Link::new();
    let a = link.server.create();
    link.server.add(&a, Transform { x: 1.0, y: 2.0, rotation: 0.0 }).unwrap();
    link.server.add(&a, Rigidbody::default()).unwrap();
    let b = link.server.create();
    link.server.add(&b, Transform::default()).unwrap();
    link.sync();

    assert_eq!(
        link.client.get::<Transform>(&a).unwrap(),
        link.server.get::<Transform>(&a).unwrap()
    );
    assert!(link.client.has_type::<Rigidbody>(&a));
    assert!(!link.client.has_type::<Rigidbody>(&b));

    let a_transform = link.client.get::<Transform>(&a).unwrap() as *const Transform;
    let a_body = link.client.get::<Rigidbody>(&a).unwrap() as *const Rigidbody;
    let b_transform = link.client.get::<Transform>(&b).unwrap() as *const Transform;

    link.server.get_mut::<Transform>(&a).unwrap().x = 42.0;
    let events = link.sync();

    assert_eq!(
        events,
        vec![MirrorEvent::FieldChanged(a.clone(), ComponentTypeId(191), 0)]
    );
    let mirrored = link.client.get::<Transform>(&a).unwrap();
    assert_eq!(mirrored, &Transform { x: 42.0, y: 2.0, rotation: 0.0 });
    assert_eq!(mirrored as *const Transform, a_transform);
    assert_eq!(link.client.get::<Rigidbody>(&a).unwrap() as *const Rigidbody, a_body);
    assert_eq!(link.client.get::<Transform>(&b).unwrap() as *const Transform, b_transform);
}

#[test]
fn client_queries_follow_mirrored_structure() {
    let mut link = Link::new();
    let key = link
        .client
        .register_query(&Query::all().with::<Transform>().with::<Rigidbody>());

    let a = link.server.create();
    link.server.add(&a, Transform::default()).unwrap();
    link.sync();
    assert!(link.client.matching(&key).is_empty());

    link.server.add(&a, Rigidbody::default()).unwrap();
    link.sync();
    assert_eq!(link.client.matching(&key), vec![a.clone()]);

    link.server.destroy(&a).unwrap();
    let events = link.sync();
    assert_eq!(events, vec![MirrorEvent::EntityRemoved(a)]);
    assert!(link.client.matching(&key).is_empty());
}

#[test]
fn late_joiner_catches_up_from_baseline() {
    let mut link = Link::new();
    let a = link.server.create();
    link.server.add(&a, Player { index: 1, name: "p2".into() }).unwrap();
    link.room.meta.started = true;
    link.sync();

    // Changes after the last emission are not in the baseline...
    link.server.get_mut::<Player>(&a).unwrap().name = "renamed".into();

    let mut late = World::new();
    let mut mirror = Mirror::new();
    let base = Patch::decode(&link.encoder.baseline(link.tick).encode().unwrap()).unwrap();
    mirror
        .apply(&base, &mut WorldSink::new(&mut late, &link.catalog))
        .unwrap();
    assert_eq!(late.get::<Player>(&a).unwrap().name, "p2");
    assert!(mirror.room().meta.started);

    // ...but the next delta applies cleanly on top of it.
    let next = link.encoder.encode(link.tick + 1, &link.server, &link.room).unwrap();
    mirror
        .apply(&next, &mut WorldSink::new(&mut late, &link.catalog))
        .unwrap();
    assert_eq!(late.get::<Player>(&a).unwrap().name, "renamed");
}

// ---------------------------------------------------------------------------
// Convergence under random mutation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Mutation {
    Create,
    Destroy(usize),
    Move(usize, i16),
    AddBody(usize),
    RemoveBody(usize),
    Rename(usize, u8),
    Sync,
}

fn mutation() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        3 => Just(Mutation::Create),
        1 => any::<usize>().prop_map(Mutation::Destroy),
        3 => (any::<usize>(), any::<i16>()).prop_map(|(i, v)| Mutation::Move(i, v)),
        1 => any::<usize>().prop_map(Mutation::AddBody),
        1 => any::<usize>().prop_map(Mutation::RemoveBody),
        1 => (any::<usize>(), any::<u8>()).prop_map(|(i, n)| Mutation::Rename(i, n)),
        2 => Just(Mutation::Sync),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn mirror_converges_after_every_sync(steps in prop::collection::vec(mutation(), 1..60)) {
        let mut link = Link::new();
        let mut alive: Vec<EntityId> = Vec::new();

        for step in steps {
            let pick = |alive: &Vec<EntityId>, i: usize| {
                (!alive.is_empty()).then(|| alive[i % alive.len()].clone())
            };
            match step {
                Mutation::Create => {
                    let e = link.server.create();
                    link.server.add(&e, Transform::default()).unwrap();
                    alive.push(e);
                }
                Mutation::Destroy(i) => {
                    if let Some(e) = pick(&alive, i) {
                        link.server.destroy(&e).unwrap();
                        alive.retain(|x| *x != e);
                    }
                }
                Mutation::Move(i, v) => {
                    if let Some(e) = pick(&alive, i) {
                        link.server.get_mut::<Transform>(&e).unwrap().x = f32::from(v) * 0.5;
                    }
                }
                Mutation::AddBody(i) => {
                    if let Some(e) = pick(&alive, i) {
                        link.server.add(&e, Rigidbody { vx: 1.0, ..Default::default() }).unwrap();
                    }
                }
                Mutation::RemoveBody(i) => {
                    if let Some(e) = pick(&alive, i) {
                        link.server.remove_component::<Rigidbody>(&e).unwrap();
                    }
                }
                Mutation::Rename(i, n) => {
                    if let Some(e) = pick(&alive, i) {
                        link.server.add(&e, Player { index: n % 2, name: format!("p{n}") }).unwrap();
                    }
                }
                Mutation::Sync => {
                    link.sync();
                    prop_assert_eq!(link.client.capture_snapshot(), link.server.capture_snapshot());
                }
            }
        }
        link.sync();
        prop_assert_eq!(link.client.capture_snapshot(), link.server.capture_snapshot());
    }
}
