//! Messages exchanged between a client and the server.
//!
//! Two kinds cross the wire in each direction: gameplay traffic (actions up,
//! patches down) and a ping/pong pair for round-trip measurement. Both
//! directions use the same bincode configuration as patches.

use serde::{Deserialize, Serialize};

use crate::patch::{decode, encode};
use crate::SyncError;

/// A loosely typed action as sent by a client.
///
/// The payload is checked and turned into a typed action by the receiver; a
/// payload that does not parse is dropped there, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireAction {
    pub kind: String,
    #[serde(with = "json_text")]
    pub payload: serde_json::Value,
}

impl WireAction {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// Client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    PerformAction(WireAction),
    Ping { client_time_ms: u64 },
    /// The client dropped its mirror and wants a full baseline.
    Resync,
}

/// Server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// An encoded [`Patch`](crate::patch::Patch).
    Patch(Vec<u8>),
    Pong { client_time_ms: u64 },
}

impl ClientMessage {
    pub fn encode(&self) -> Result<Vec<u8>, SyncError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SyncError> {
        decode(bytes)
    }
}

impl ServerMessage {
    pub fn encode(&self) -> Result<Vec<u8>, SyncError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SyncError> {
        decode(bytes)
    }
}

/// JSON payloads travel as text: bincode cannot carry self-describing values.
mod json_text {
    use serde::{de, ser, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &serde_json::Value, s: S) -> Result<S::Ok, S::Error> {
        let text = serde_json::to_string(value).map_err(ser::Error::custom)?;
        s.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<serde_json::Value, D::Error> {
        let text = String::deserialize(d)?;
        serde_json::from_str(&text).map_err(de::Error::custom)
    }
}
