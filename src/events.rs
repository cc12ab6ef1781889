use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Action tag of the only webhook event class that produces an alert
pub const SPEEDING_EVENT_CREATED: &str = "speeding_event_created";

/// Motive `speeding_event_created` webhook payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedingEvent {
    pub action: String,
    pub id: i64,
    pub max_over_speed_in_kph: f64,
    pub max_posted_speed_limit_in_kph: f64,
    pub max_vehicle_speed: f64,
    pub driver_id: i64,
    pub vehicle_id: i64,
    #[serde(default)]
    pub status: Option<String>,
}

/// Outcome of classifying a verified webhook body
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookPayload {
    /// A speeding event that should be relayed
    Speeding(SpeedingEvent),
    /// Any other action; acknowledged and dropped
    Ignored { action: Option<String> },
}

/// Why a verified body could not be turned into a [`WebhookPayload`]
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("Invalid JSON payload")]
    InvalidJson(#[source] serde_json::Error),
    #[error("Invalid payload structure: expected a JSON object")]
    NotAnObject,
    #[error("Invalid payload structure: {0}")]
    InvalidStructure(#[source] serde_json::Error),
}

impl WebhookPayload {
    /// Parse a raw body in two steps: first read the action tag so unknown
    /// event classes are ignored regardless of their shape, then validate the
    /// full speeding event.
    pub fn parse(body: &[u8]) -> Result<Self, PayloadError> {
        let value: Value = serde_json::from_slice(body).map_err(PayloadError::InvalidJson)?;
        if !value.is_object() {
            return Err(PayloadError::NotAnObject);
        }

        // Non-string tags are kept in their JSON rendering for the ignore reason
        let action = match value.get("action") {
            None | Some(Value::Null) => None,
            Some(Value::String(action)) => Some(action.clone()),
            Some(other) => Some(other.to_string()),
        };

        if action.as_deref() != Some(SPEEDING_EVENT_CREATED) {
            return Ok(WebhookPayload::Ignored { action });
        }

        let event = SpeedingEvent::deserialize(value).map_err(PayloadError::InvalidStructure)?;
        Ok(WebhookPayload::Speeding(event))
    }
}
