//! Socket protocol frame types
//!
//! Frames exchanged with the update server as JSON text messages. Client
//! frames use lowercase tags, server frames use capitalized tags.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::EntityType;

/// Frames sent to the update server
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    /// Begin receiving updates for an entity
    Subscribed { id: String },

    /// Stop receiving updates for an entity
    Unsubscribed { id: String },

    /// Client-originated change
    Update {
        id: String,
        #[serde(rename = "dataType")]
        data_type: EntityType,
        data: Value,
    },

    /// Reply to a `Marco` liveness check
    Polo,
}

/// Frames received from the update server
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// New data for one entity, or for every subscription when `id` is absent
    Update {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        data: Value,
    },

    /// Liveness check, must be answered with `polo`
    Marco,

    /// Heartbeat reply
    Polo,

    /// Delivery failure for one entity, or for every subscription when `id` is absent
    Error {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        message: String,
    },

    /// Any frame type this client does not understand
    #[serde(other)]
    Unknown,
}

impl ClientFrame {
    pub fn subscribed(id: &str) -> Self {
        ClientFrame::Subscribed { id: id.to_string() }
    }

    pub fn unsubscribed(id: &str) -> Self {
        ClientFrame::Unsubscribed { id: id.to_string() }
    }

    pub fn update(id: &str, data_type: EntityType, data: Value) -> Self {
        ClientFrame::Update {
            id: id.to_string(),
            data_type,
            data,
        }
    }

    /// Encode frame as JSON text
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ServerFrame {
    /// Decode frame from JSON text
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
