//! Calls accepted from clients.

use provd_core::Settings;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identity of a connected client, supplied by the interface layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Wraps an identity supplied by a transport.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh unique identity.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the identity as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A call on the broker's RPC surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum Call {
    /// Opens a session, or queues behind the current holder.
    Start {
        /// IMSI-like discriminator; may be empty.
        #[serde(default)]
        context_id: String,
    },
    /// Closes the caller's session.
    End,
    /// Reads one value.
    Get {
        /// Key to read.
        key: String,
    },
    /// Reads every value at or below a key.
    GetAll {
        /// Prefix to read below.
        key: String,
    },
    /// Writes one value.
    Set {
        /// Key to write.
        key: String,
        /// Value to write.
        value: String,
    },
    /// Writes several values, reporting the keys that failed.
    SetAll {
        /// Values to write.
        settings: Settings,
    },
    /// Removes a key or subtree.
    Delete {
        /// Key to remove.
        key: String,
    },
}

impl Call {
    /// Returns the method name.
    pub fn method(&self) -> &'static str {
        match self {
            Call::Start { .. } => "Start",
            Call::End => "End",
            Call::Get { .. } => "Get",
            Call::GetAll { .. } => "GetAll",
            Call::Set { .. } => "Set",
            Call::SetAll { .. } => "SetAll",
            Call::Delete { .. } => "Delete",
        }
    }
}
