use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::dispatcher::EnqueueError;
use crate::events::{PayloadError, WebhookPayload};
use crate::signature::{self, SIGNATURE_HEADER};
use crate::web::AppState;

/// Reasons a webhook delivery is refused. Only these reach the sender;
/// everything that goes wrong after the event is queued stays internal.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Missing {} header", SIGNATURE_HEADER)]
    MissingSignature,
    #[error("Invalid webhook signature")]
    InvalidSignature,
    #[error(transparent)]
    MalformedPayload(#[from] PayloadError),
    #[error("Alert queue unavailable")]
    QueueUnavailable,
}

impl WebhookError {
    fn status(&self) -> StatusCode {
        match self {
            WebhookError::MissingSignature | WebhookError::InvalidSignature => {
                StatusCode::FORBIDDEN
            }
            WebhookError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            WebhookError::QueueUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            detail: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Response body for a delivery that was acknowledged
#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WebhookAck {
    Accepted { event_id: i64, message: String },
    Ignored { reason: String },
}

/// POST /webhook/motive
/// Verify, classify and queue a Motive webhook delivery
pub async fn motive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, WebhookError> {
    metrics::counter!("webhook.received").increment(1);
    let start = Instant::now();

    let result = handle_delivery(&state, &headers, &body);

    match &result {
        Ok(WebhookAck::Accepted { .. }) => metrics::counter!("webhook.accepted").increment(1),
        Ok(WebhookAck::Ignored { .. }) => metrics::counter!("webhook.ignored").increment(1),
        Err(WebhookError::MissingSignature | WebhookError::InvalidSignature) => {
            metrics::counter!("webhook.signature_invalid").increment(1)
        }
        Err(WebhookError::MalformedPayload(_)) => {
            metrics::counter!("webhook.malformed").increment(1)
        }
        Err(WebhookError::QueueUnavailable) => {}
    }
    metrics::histogram!("webhook.handle_ms").record(start.elapsed().as_secs_f64() * 1000.0);

    result.map(Json)
}

fn handle_delivery(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<WebhookAck, WebhookError> {
    // Signature first: nothing in the body is trusted before this
    let provided = match headers.get(SIGNATURE_HEADER) {
        Some(value) if !value.as_bytes().trim_ascii().is_empty() => value.to_str().ok(),
        _ => {
            warn!("Webhook rejected: missing signature header");
            return Err(WebhookError::MissingSignature);
        }
    };
    if !signature::verify(body, &state.webhook_secret, provided) {
        warn!(body_len = body.len(), "Webhook rejected: invalid signature");
        return Err(WebhookError::InvalidSignature);
    }

    let payload = WebhookPayload::parse(body).inspect_err(|e| {
        warn!(error = %e, "Webhook rejected: malformed payload");
    })?;

    match payload {
        WebhookPayload::Ignored { action } => {
            let action = action.as_deref().unwrap_or("None");
            debug!(action, "Ignoring unsupported webhook action");
            Ok(WebhookAck::Ignored {
                reason: format!("Action '{}' not processed", action),
            })
        }
        WebhookPayload::Speeding(event) => {
            let event_id = event.id;
            match state.dispatcher.enqueue(event) {
                // A full queue drops the alert but still acknowledges the sender
                Ok(()) | Err(EnqueueError::QueueFull) => {}
                Err(EnqueueError::Closed) => return Err(WebhookError::QueueUnavailable),
            }
            info!(event_id, "Speeding event queued for delivery");
            Ok(WebhookAck::Accepted {
                event_id,
                message: "Event queued for processing".to_string(),
            })
        }
    }
}
