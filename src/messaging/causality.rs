//! # Causality Tagging
//!
//! Correlates a message with the function invocation that produced it by
//! carrying the owner's identifier in a reserved user property.

use super::message::QueueMessage;
use tracing::debug;
use uuid::Uuid;

/// Reserved user property holding the parent invocation id
pub const PARENT_CAUSALITY_KEY: &str = "$ParentCausalityId";

/// Write `owner` into the message's causality header.
///
/// An existing, well-formed identifier naming a different owner is left in
/// place. Missing or malformed values are overwritten.
pub fn tag(owner: Uuid, message: &mut QueueMessage) {
    if let Some(existing) = self::owner(message) {
        if existing != owner {
            debug!(
                message_id = %message.message_id,
                existing_owner = %existing,
                requested_owner = %owner,
                "Causality header already owned, leaving it untouched"
            );
            return;
        }
    }

    message.user_properties.insert(
        PARENT_CAUSALITY_KEY.to_string(),
        serde_json::Value::String(owner.to_string()),
    );
}

/// Read the owner of a message; absent when the header is missing or malformed.
pub fn owner(message: &QueueMessage) -> Option<Uuid> {
    message
        .property(PARENT_CAUSALITY_KEY)
        .and_then(|value| value.as_str())
        .and_then(|raw| Uuid::parse_str(raw).ok())
}
