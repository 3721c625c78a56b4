//! # Queue Message Envelope
//!
//! The core treats payloads as opaque bytes. The only structure it relies on
//! is the user property map (where the causality header lives) and the
//! broker-assigned delivery metadata used for settlement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Broker-assigned token identifying one peek-locked delivery of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockToken(Uuid);

impl LockToken {
    /// Generate a fresh lock token
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The empty token used when a message carries no lock
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for LockToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for LockToken {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// A message as delivered by the broker: opaque body plus a header map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Broker-wide message identifier
    pub message_id: Uuid,

    /// Opaque payload
    pub body: Vec<u8>,

    /// Optional MIME type of the body
    pub content_type: Option<String>,

    /// Application header map
    pub user_properties: HashMap<String, serde_json::Value>,

    /// Lock held by the current receiver, set by the broker on delivery
    pub lock_token: Option<LockToken>,

    /// Number of times the broker has handed this message out
    pub delivery_count: u32,

    /// When the message was accepted by the broker
    pub enqueued_at: DateTime<Utc>,
}

impl QueueMessage {
    /// Create a new message with the given body
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            body: body.into(),
            content_type: None,
            user_properties: HashMap::new(),
            lock_token: None,
            delivery_count: 0,
            enqueued_at: Utc::now(),
        }
    }

    /// Set the content type
    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Add a user property
    pub fn with_property<K: Into<String>, V: Into<serde_json::Value>>(
        mut self,
        key: K,
        value: V,
    ) -> Self {
        self.user_properties.insert(key.into(), value.into());
        self
    }

    /// Look up a user property
    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.user_properties.get(key)
    }

    /// Body as UTF-8 text, if it is valid UTF-8
    pub fn body_as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// The token to settle this delivery with; nil when the broker set none
    pub fn settlement_token(&self) -> LockToken {
        self.lock_token.unwrap_or_else(LockToken::nil)
    }
}
