//! The replicated root's non-entity half: room metadata and player records.
//!
//! Together with the entity collection held by the [`World`](duet_ecs::world::World),
//! a [`RoomState`] is everything a client can observe about a room.

use std::collections::BTreeMap;

use duet_ecs::entity::EntityId;
use serde::{Deserialize, Serialize};

/// Room-wide metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMeta {
    /// Index of the level currently built.
    pub level: u32,
    /// How many levels have been completed since the room opened.
    pub completed_levels: u32,
    /// Whether enough players have joined for the simulation to accept actions.
    pub started: bool,
}

/// One connected (or recently connected) player.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    /// Player slot, `0` or `1`.
    pub player_index: u8,
    pub name: String,
    pub connected: bool,
    /// The avatar entity, once spawned.
    pub entity: Option<EntityId>,
}

/// Room metadata plus player records keyed by session id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomState {
    pub meta: RoomMeta,
    pub players: BTreeMap<String, PlayerRecord>,
}

impl RoomState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The record for player slot `index`, with its session id.
    pub fn player_by_index(&self, index: u8) -> Option<(&str, &PlayerRecord)> {
        self.players
            .iter()
            .find(|(_, p)| p.player_index == index)
            .map(|(s, p)| (s.as_str(), p))
    }

    /// The lowest player slot not taken by any record.
    pub fn free_index(&self) -> Option<u8> {
        (0..2u8).find(|i| self.players.values().all(|p| p.player_index != *i))
    }
}
