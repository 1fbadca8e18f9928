//! Messages the application posts to the gateway, and the replies.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::Operation;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayMessage {
    /// Promote the waiting version now
    SkipWaiting,
    /// Drop every response cache
    ClearCache,
    /// Queue an operation built by the application
    QueueOfflineOperation { operation: Operation },
    /// Ask for the queue to be drained
    SyncOfflineOperations,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageReply {
    pub ok: bool,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl MessageReply {
    pub fn ok() -> Self {
        Self {
            ok: true,
            data: Map::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: Map::new(),
        }
        .with("error", message.into())
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}
