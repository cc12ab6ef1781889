//! Background delivery of speeding alerts.
//!
//! The webhook handler hands accepted events to [`AlertDispatcher::enqueue`]
//! and answers the sender right away. A fixed pool of workers drains the
//! bounded queue: resolve the driver name, format the alert, send it.
//! Failed deliveries are logged and dropped; [`RetryPolicy`] controls how
//! many attempts are made before giving up (one by default).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};

use crate::alerts::OutboundMessage;
use crate::driver_names::DriverNameCache;
use crate::events::SpeedingEvent;
use crate::telegram_client::MessageSender;

/// How often a failed delivery is attempted again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; values below 1 are treated as 1
    pub max_attempts: u32,
    /// Fixed pause between attempts
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Single attempt, failures are dropped
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub workers: usize,
    pub queue_size: usize,
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_size: 1000,
            retry: RetryPolicy::none(),
        }
    }
}

/// Why an accepted event could not be queued
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("delivery queue is full")]
    QueueFull,
    #[error("delivery queue is closed")]
    Closed,
}

/// Everything a worker needs to turn an event into a delivered message
#[derive(Clone)]
struct DeliveryContext {
    chat_id: Arc<str>,
    driver_names: DriverNameCache,
    sender: Arc<dyn MessageSender>,
    retry: RetryPolicy,
}

impl DeliveryContext {
    async fn deliver(&self, event: &SpeedingEvent) {
        let start = Instant::now();
        let driver_name = self.driver_names.resolve(event.driver_id).await;
        let message = OutboundMessage::speeding_alert(&self.chat_id, event, &driver_name);

        let attempts = self.retry.attempts();
        for attempt in 1..=attempts {
            match self.sender.send_message(&message).await {
                Ok(()) => {
                    metrics::counter!("alerts.delivered").increment(1);
                    metrics::histogram!("alerts.delivery_ms")
                        .record(start.elapsed().as_secs_f64() * 1000.0);
                    info!(attempt, "Speeding alert delivered");
                    return;
                }
                Err(e) if attempt < attempts => {
                    warn!(attempt, error = %e, "Alert delivery failed, retrying");
                    tokio::time::sleep(self.retry.backoff).await;
                }
                Err(e) => {
                    metrics::counter!("alerts.delivery_failed").increment(1);
                    error!(attempt, error = %e, "Alert delivery failed, dropping alert");
                }
            }
        }
    }
}

/// Handle to the delivery queue. Cloning shares the same queue and workers.
#[derive(Clone)]
pub struct AlertDispatcher {
    tx: flume::Sender<SpeedingEvent>,
    rx: flume::Receiver<SpeedingEvent>,
    closed: Arc<AtomicBool>,
    /// Events accepted by `enqueue` whose delivery has not finished yet.
    /// Counted before the send so a worker can never hold an uncounted event.
    pending: Arc<AtomicUsize>,
    workers: Arc<Vec<JoinHandle<()>>>,
}

impl AlertDispatcher {
    /// Create the queue and spawn `config.workers` delivery workers on the
    /// current Tokio runtime.
    pub fn start(
        config: DispatcherConfig,
        chat_id: impl Into<String>,
        driver_names: DriverNameCache,
        sender: Arc<dyn MessageSender>,
    ) -> Self {
        let (tx, rx) = flume::bounded(config.queue_size.max(1));
        let chat_id: String = chat_id.into();
        let context = DeliveryContext {
            chat_id: Arc::from(chat_id),
            driver_names,
            sender,
            retry: config.retry,
        };

        let pending = Arc::new(AtomicUsize::new(0));
        let num_workers = config.workers.max(1);
        info!("Spawning {} alert delivery workers", num_workers);
        let workers = (0..num_workers)
            .map(|worker_id| {
                spawn_delivery_worker(worker_id, rx.clone(), context.clone(), pending.clone())
            })
            .collect();

        Self {
            tx,
            rx,
            closed: Arc::new(AtomicBool::new(false)),
            pending,
            workers: Arc::new(workers),
        }
    }

    /// Queue an event for delivery without waiting
    pub fn enqueue(&self, event: SpeedingEvent) -> Result<(), EnqueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EnqueueError::Closed);
        }
        self.pending.fetch_add(1, Ordering::AcqRel);
        let result = self.tx.try_send(event);
        if result.is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }
        match result {
            Ok(()) => {
                metrics::gauge!("alerts.queue.depth").set(self.tx.len() as f64);
                Ok(())
            }
            Err(flume::TrySendError::Full(event)) => {
                metrics::counter!("alerts.dropped_queue_full").increment(1);
                warn!(event_id = event.id, "Delivery queue full, dropping alert");
                Err(EnqueueError::QueueFull)
            }
            Err(flume::TrySendError::Disconnected(_)) => Err(EnqueueError::Closed),
        }
    }

    /// Refuse further events. Queued events are still delivered.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Number of events waiting for a worker
    pub fn queue_depth(&self) -> usize {
        self.rx.len()
    }

    /// Number of accepted events not yet delivered, queued or in a worker
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Wait up to `timeout` for every accepted event to finish delivery.
    /// Returns whether they did.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let depth = self.queue_depth();
            let pending = self.pending();
            if pending == 0 {
                info!("Delivery queue drained");
                return true;
            }
            if Instant::now() >= deadline {
                warn!(
                    queued = depth,
                    pending, "Delivery queue not drained before timeout"
                );
                return false;
            }
            info!(queued = depth, pending, "Waiting for delivery queue to drain");
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(remaining.min(Duration::from_millis(250))).await;
        }
    }

    /// Stop all workers. Events still queued and in-flight deliveries are lost.
    pub fn abort(&self) {
        for worker in self.workers.iter() {
            worker.abort();
        }
    }
}

fn spawn_delivery_worker(
    worker_id: usize,
    rx: flume::Receiver<SpeedingEvent>,
    context: DeliveryContext,
    pending: Arc<AtomicUsize>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok(event) = rx.recv_async().await {
            metrics::gauge!("worker.active", "type" => "alerts").increment(1.0);
            let span = info_span!(
                "deliver_alert",
                event_id = event.id,
                driver_id = event.driver_id,
                vehicle_id = event.vehicle_id
            );
            context.deliver(&event).instrument(span).await;
            pending.fetch_sub(1, Ordering::AcqRel);
            metrics::gauge!("worker.active", "type" => "alerts").decrement(1.0);
            metrics::gauge!("alerts.queue.depth").set(rx.len() as f64);
        }
        info!("Alert delivery worker {} stopped", worker_id);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver_names::PlaceholderDirectory;
    use crate::events::SPEEDING_EVENT_CREATED;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;

    /// Sender that fails the first `failures` calls and records the rest
    #[derive(Default)]
    struct FlakySender {
        failures: u32,
        delay: Duration,
        calls: AtomicU32,
        sent: Mutex<Vec<OutboundMessage>>,
    }

    #[async_trait]
    impl MessageSender for FlakySender {
        async fn send_message(&self, message: &OutboundMessage) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if call < self.failures {
                return Err(anyhow!("telegram unavailable"));
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn event(id: i64) -> SpeedingEvent {
        SpeedingEvent {
            action: SPEEDING_EVENT_CREATED.to_string(),
            id,
            max_over_speed_in_kph: 10.0,
            max_posted_speed_limit_in_kph: 50.0,
            max_vehicle_speed: 60.0,
            driver_id: 7,
            vehicle_id: 3,
            status: None,
        }
    }

    fn dispatcher(sender: Arc<FlakySender>, config: DispatcherConfig) -> AlertDispatcher {
        AlertDispatcher::start(
            config,
            "-100123",
            DriverNameCache::new(Arc::new(PlaceholderDirectory)),
            sender,
        )
    }

    async fn wait_for_calls(sender: &FlakySender, calls: u32) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while sender.calls.load(Ordering::SeqCst) < calls {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("sender was not called in time");
    }

    #[tokio::test]
    async fn test_delivers_each_event_once() {
        let sender = Arc::new(FlakySender::default());
        let dispatcher = dispatcher(sender.clone(), DispatcherConfig::default());

        for id in 0..5 {
            dispatcher.enqueue(event(id)).unwrap();
        }
        wait_for_calls(&sender, 5).await;
        assert!(dispatcher.drain(Duration::from_secs(1)).await);

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 5);
        assert!(sent.iter().all(|m| m.chat_id == "-100123"));
        assert!(sent.iter().all(|m| m.text.contains("Driver #7")));
    }

    #[tokio::test]
    async fn test_failed_delivery_is_not_retried_by_default() {
        let sender = Arc::new(FlakySender {
            failures: 1,
            ..Default::default()
        });
        let dispatcher = dispatcher(sender.clone(), DispatcherConfig::default());

        dispatcher.enqueue(event(1)).unwrap();
        wait_for_calls(&sender, 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(sender.calls.load(Ordering::SeqCst), 1);
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_policy_retries_until_success() {
        let sender = Arc::new(FlakySender {
            failures: 2,
            ..Default::default()
        });
        let config = DispatcherConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                backoff: Duration::from_millis(1),
            },
            ..Default::default()
        };
        let dispatcher = dispatcher(sender.clone(), config);

        dispatcher.enqueue(event(1)).unwrap();
        wait_for_calls(&sender, 3).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(sender.calls.load(Ordering::SeqCst), 3);
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_blocking() {
        let sender = Arc::new(FlakySender::default());
        let dispatcher = dispatcher(
            sender,
            DispatcherConfig {
                workers: 1,
                queue_size: 1,
                retry: RetryPolicy::none(),
            },
        );
        // Stop the worker so nothing drains the queue
        dispatcher.abort();
        tokio::task::yield_now().await;

        assert_eq!(dispatcher.enqueue(event(1)), Ok(()));
        assert_eq!(dispatcher.pending(), 1);
        assert_eq!(dispatcher.enqueue(event(2)), Err(EnqueueError::QueueFull));
        assert_eq!(dispatcher.queue_depth(), 1);
        assert_eq!(dispatcher.pending(), 1);
        assert!(!dispatcher.drain(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_event_taken_by_worker_still_counts_as_pending() {
        let sender = Arc::new(FlakySender {
            delay: Duration::from_millis(200),
            ..Default::default()
        });
        let dispatcher = dispatcher(
            sender.clone(),
            DispatcherConfig {
                workers: 1,
                ..Default::default()
            },
        );

        dispatcher.enqueue(event(1)).unwrap();
        wait_for_calls(&sender, 1).await;

        // Out of the queue, but the delivery is not finished
        assert_eq!(dispatcher.queue_depth(), 0);
        assert_eq!(dispatcher.pending(), 1);
        assert!(!dispatcher.drain(Duration::from_millis(10)).await);

        assert!(dispatcher.drain(Duration::from_secs(2)).await);
        assert_eq!(dispatcher.pending(), 0);
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_closed_dispatcher_refuses_events() {
        let sender = Arc::new(FlakySender::default());
        let dispatcher = dispatcher(sender.clone(), DispatcherConfig::default());

        dispatcher.close();
        assert_eq!(dispatcher.enqueue(event(1)), Err(EnqueueError::Closed));
        assert_eq!(dispatcher.pending(), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sender.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_retry_policy_always_attempts_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            backoff: Duration::ZERO,
        };
        assert_eq!(policy.attempts(), 1);
        assert_eq!(RetryPolicy::default(), RetryPolicy::none());
    }
}
