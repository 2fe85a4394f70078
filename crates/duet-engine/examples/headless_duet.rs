//! Headless two-player session -- a server and two clients in one process.
//!
//! Run with:
//!   cargo run --example headless_duet -p duet-engine
//!
//! Both bots run toward their goal on the first level, with an optional
//! simulated latency in milliseconds as the first argument:
//!   cargo run --example headless_duet -p duet-engine -- 120

use anyhow::{Context, Result};
use duet_engine::components::Transform;
use duet_engine::config::EngineConfig;
use duet_engine::room::{ClientRoom, ServerRoom};

const FRAME_DT: f64 = 1.0 / 60.0;
const FRAMES: usize = 600;

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

struct Session {
    server: ServerRoom,
    clients: Vec<ClientRoom>,
}

impl Session {
    fn frame(&mut self) -> Result<()> {
        for client in &mut self.clients {
            for bytes in client.frame(FRAME_DT)? {
                self.server.receive(client.session(), &bytes);
            }
        }
        for (session, bytes) in self.server.advance(FRAME_DT * 1000.0)? {
            if let Some(client) = self.clients.iter_mut().find(|c| c.session() == session) {
                client.receive(&bytes);
            }
        }
        Ok(())
    }

    /// Steer each bot toward its own goal on the first level.
    fn drive(&mut self) {
        for client in &mut self.clients {
            let direction = match client.registry().input().player {
                Some(0) => -1.0,
                Some(_) => 1.0,
                None => 0.0,
            };
            client.input_mut().move_x = direction;
        }
    }
}

fn main() -> Result<()> {
    duet_engine::logging::init_tracing("info,duet_engine=debug");

    let latency: u32 = match std::env::args().nth(1) {
        Some(arg) => arg.parse().context("latency must be a whole number of ms")?,
        None => 0,
    };
    let config = EngineConfig {
        simulated_latency_ms: latency,
        ..Default::default()
    };

    let mut server = ServerRoom::new(config.clone())?;
    let mut clients = Vec::new();
    for (session, name) in [("s-alice", "Alice"), ("s-bob", "Bob")] {
        let mut client = ClientRoom::new(config.clone(), session)?;
        client.receive(&server.join(session, name)?);
        clients.push(client);
    }
    let mut session = Session { server, clients };

    for frame in 0..FRAMES {
        session.drive();
        session.frame()?;

        if frame % 60 == 0 {
            let room = session.server.room();
            let positions: Vec<String> = room
                .players
                .values()
                .filter_map(|p| p.entity.as_ref())
                .filter_map(|id| session.server.registry().world().try_get::<Transform>(id))
                .map(|t| format!("({:.2}, {:.2})", t.x, t.y))
                .collect();
            tracing::info!(
                frame,
                tick = session.server.registry().tick(),
                level = room.meta.level,
                completed = room.meta.completed_levels,
                players = ?positions,
                "status"
            );
        }
    }

    for client in &session.clients {
        tracing::info!(
            session = client.session(),
            entities = client.registry().world().entity_count(),
            latency_ms = ?client.latency_ms(),
            "client summary"
        );
    }
    let hash = session.server.registry().state_hash()?;
    tracing::info!(completed = session.server.room().meta.completed_levels, %hash, "done");
    Ok(())
}
