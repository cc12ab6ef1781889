//! Shared helpers for driving the webhook router in-process.
//!
//! `TestApp` wires the real router, dispatcher and driver name cache to an
//! in-memory message sender, so tests can assert on exactly what would have
//! been posted to Telegram.

#![allow(dead_code)]

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, Response},
};
use http_body_util::BodyExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

use safety_alert_bot::alerts::OutboundMessage;
use safety_alert_bot::dispatcher::{AlertDispatcher, DispatcherConfig};
use safety_alert_bot::driver_names::{DriverDirectory, DriverNameCache};
use safety_alert_bot::signature::{self, SIGNATURE_HEADER};
use safety_alert_bot::telegram_client::MessageSender;
use safety_alert_bot::web::{self, AppState};

pub const SECRET: &str = "test-webhook-secret";
pub const CHAT_ID: &str = "-1001234567890";

pub const SAMPLE_EVENT: &str = r#"{"action":"speeding_event_created","id":435681,"max_over_speed_in_kph":12.5,"max_posted_speed_limit_in_kph":80.0,"max_vehicle_speed":92.5,"driver_id":101,"vehicle_id":25,"status":"pending_review"}"#;

/// Sender that records every message instead of calling Telegram
#[derive(Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<OutboundMessage>>,
    /// Artificial delivery latency
    pub delay: Duration,
    pub fail: bool,
}

impl RecordingSender {
    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send_message(&self, message: &OutboundMessage) -> Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(anyhow!("Telegram API error 400 Bad Request: chat not found"));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Directory that knows a fixed set of drivers and fails for the rest
#[derive(Default)]
pub struct StaticDirectory {
    pub names: Vec<(i64, &'static str)>,
    pub calls: Mutex<Vec<i64>>,
}

#[async_trait]
impl DriverDirectory for StaticDirectory {
    async fn driver_name(&self, driver_id: i64) -> Result<String> {
        self.calls.lock().unwrap().push(driver_id);
        self.names
            .iter()
            .find(|(id, _)| *id == driver_id)
            .map(|(_, name)| name.to_string())
            .ok_or_else(|| anyhow!("Motive API error 404 Not Found"))
    }
}

pub struct TestApp {
    pub router: Router,
    pub sender: Arc<RecordingSender>,
    pub directory: Arc<StaticDirectory>,
    pub dispatcher: AlertDispatcher,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with(RecordingSender::default(), StaticDirectory::default())
    }

    pub fn with(sender: RecordingSender, directory: StaticDirectory) -> Self {
        Self::with_config(DispatcherConfig::default(), sender, directory)
    }

    pub fn with_config(
        config: DispatcherConfig,
        sender: RecordingSender,
        directory: StaticDirectory,
    ) -> Self {
        let sender = Arc::new(sender);
        let directory = Arc::new(directory);
        let dispatcher = AlertDispatcher::start(
            config,
            CHAT_ID,
            DriverNameCache::new(directory.clone()),
            sender.clone(),
        );
        let router = web::router(AppState::new(SECRET, dispatcher.clone()));
        Self {
            router,
            sender,
            directory,
            dispatcher,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Wait until `count` messages were sent, or panic after two seconds
    pub async fn wait_for_messages(&self, count: usize) -> Vec<OutboundMessage> {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let messages = self.sender.messages();
                if messages.len() >= count {
                    return messages;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for messages")
    }

    /// Let background workers run, then return everything sent so far
    pub async fn settle(&self) -> Vec<OutboundMessage> {
        self.dispatcher.drain(Duration::from_secs(2)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.sender.messages()
    }
}

pub fn signed_webhook(body: &str) -> Request<Body> {
    webhook_with_signature(body, Some(&signature::sign(body.as_bytes(), SECRET)))
}

pub fn webhook_with_signature(body: &str, signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhook/motive")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
