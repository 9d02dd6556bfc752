//! Data models for livesync
//!
//! Defines the identifiers shared by every transport: which transport a
//! subscription travels over, what kind of entity it tracks, and the shape of
//! subscribe and publish requests. Payloads themselves are opaque JSON.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A transport that can carry subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Persistent WebSocket connection
    Socket,
    /// Periodic HTTP polling
    Polling,
}

impl TransportMode {
    /// Name used in config files and log output
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Socket => "socket",
            TransportMode::Polling => "polling",
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "socket" | "websocket" | "ws" => Ok(TransportMode::Socket),
            "polling" | "poll" | "http" => Ok(TransportMode::Polling),
            other => Err(format!(
                "Unknown transport mode '{}'. Valid modes: socket, polling",
                other
            )),
        }
    }
}

/// Kind of entity being synchronized
///
/// Sent as `dataType` on socket frames and `type` on HTTP requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Division,
    Team,
    Player,
    Game,
    Tournament,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Division => "division",
            EntityType::Team => "team",
            EntityType::Player => "player",
            EntityType::Game => "game",
            EntityType::Tournament => "tournament",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "division" => Ok(EntityType::Division),
            "team" => Ok(EntityType::Team),
            "player" => Ok(EntityType::Player),
            "game" => Ok(EntityType::Game),
            "tournament" => Ok(EntityType::Tournament),
            other => Err(format!(
                "Unknown entity type '{}'. Valid types: division, team, player, game, tournament",
                other
            )),
        }
    }
}

/// Request to start receiving updates for one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    /// Entity identifier
    pub id: String,
    /// Kind of entity
    pub entity_type: EntityType,
}

impl SubscribeRequest {
    pub fn new(id: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            id: id.into(),
            entity_type,
        }
    }
}

/// A local change to push to the update source
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    /// Entity identifier
    pub id: String,
    /// Kind of entity
    pub entity_type: EntityType,
    /// New value
    pub data: Value,
}

impl Publication {
    pub fn new(id: impl Into<String>, entity_type: EntityType, data: Value) -> Self {
        Self {
            id: id.into(),
            entity_type,
            data,
        }
    }
}
