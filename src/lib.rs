//! Safety alert relay
//!
//! Receives signed Motive webhooks, filters speeding events and relays them
//! to a Telegram chat from a background worker pool, resolving driver names
//! through a small LRU cache.

pub mod actions;
pub mod alerts;
pub mod config;
pub mod dispatcher;
pub mod driver_names;
pub mod events;
pub mod metrics;
pub mod motive_client;
pub mod signature;
pub mod telegram_client;
pub mod telemetry;
pub mod web;

pub use config::AppConfig;
pub use dispatcher::{AlertDispatcher, DispatcherConfig, RetryPolicy};
pub use driver_names::{DriverDirectory, DriverNameCache, PlaceholderDirectory};
pub use events::{SpeedingEvent, WebhookPayload};
pub use telegram_client::{MessageSender, TelegramClient};
pub use web::AppState;
