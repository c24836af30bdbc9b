//! At-least-once event dispatcher.
//!
//! Committed events are queued on an unbounded channel, so publishing never
//! blocks the entity that emitted them. Every delivery runs as its own task and
//! is retried per handler until acknowledged. No ordering is guaranteed between
//! deliveries.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use sagaledger_common::Result;
use sagaledger_ledger::LedgerEvent;

use crate::config::DispatcherConfig;
use crate::metrics::SharedMetrics;
use crate::transaction_mediator::MediatorEvent;

/// Receives events right after they are committed.
pub trait EventSink<E>: Send + Sync {
    /// Hand over one committed event. Must not block.
    fn publish(&self, stream: &str, sequence: u64, event: &E);
}

/// Sink that drops everything.
pub struct DiscardSink;

impl<E> EventSink<E> for DiscardSink {
    fn publish(&self, _stream: &str, _sequence: u64, _event: &E) {}
}

/// Any event the dispatcher can route.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    Ledger(LedgerEvent),
    Mediator(MediatorEvent),
}

impl DomainEvent {
    /// Short event name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::Ledger(event) => event.name(),
            DomainEvent::Mediator(event) => event.name(),
        }
    }
}

impl From<LedgerEvent> for DomainEvent {
    fn from(event: LedgerEvent) -> Self {
        DomainEvent::Ledger(event)
    }
}

impl From<MediatorEvent> for DomainEvent {
    fn from(event: MediatorEvent) -> Self {
        DomainEvent::Mediator(event)
    }
}

/// One event on its way to the handlers.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Source stream.
    pub stream: String,
    /// Position in the source stream.
    pub sequence: u64,
    /// The event.
    pub event: DomainEvent,
    /// Whether this is an injected duplicate.
    pub redelivery: bool,
}

/// Cross-entity reaction to delivered events.
///
/// Handlers must be idempotent: the same delivery may arrive more than once.
/// Returning an error schedules a retry.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handler name for logs.
    fn name(&self) -> &'static str;

    /// React to one event. Events the handler does not care about are acknowledged.
    async fn handle(&self, event: &DomainEvent) -> Result<()>;
}

/// Publishing side of the dispatcher.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::UnboundedSender<Delivery>,
    in_flight: Arc<AtomicUsize>,
}

impl DispatcherHandle {
    /// Deliveries queued or running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn enqueue(&self, delivery: Delivery) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(delivery).is_err() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            warn!("Dispatcher stopped, delivery dropped");
        }
    }

    fn done(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<E> EventSink<E> for DispatcherHandle
where
    E: Clone + Into<DomainEvent> + Send + Sync,
{
    fn publish(&self, stream: &str, sequence: u64, event: &E) {
        self.enqueue(Delivery {
            stream: stream.to_string(),
            sequence,
            event: event.clone().into(),
            redelivery: false,
        });
    }
}

/// Consuming side of the dispatcher.
pub struct Dispatcher {
    config: DispatcherConfig,
    rx: mpsc::UnboundedReceiver<Delivery>,
    handle: DispatcherHandle,
    handlers: Vec<Arc<dyn EventHandler>>,
    metrics: SharedMetrics,
}

/// Create a connected handle and dispatcher.
pub fn channel(config: DispatcherConfig, metrics: SharedMetrics) -> (DispatcherHandle, Dispatcher) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = DispatcherHandle {
        tx,
        in_flight: Arc::new(AtomicUsize::new(0)),
    };
    let dispatcher = Dispatcher {
        config,
        rx,
        handle: handle.clone(),
        handlers: Vec::new(),
        metrics,
    };
    (handle, dispatcher)
}

impl Dispatcher {
    /// Register a handler. Every delivery goes to every handler.
    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        info!(handler = handler.name(), "Event handler registered");
        self.handlers.push(handler);
    }

    /// Route deliveries until a shutdown signal arrives.
    pub async fn run(mut self, mut shutdown: mpsc::Receiver<()>) {
        let handlers: Arc<[Arc<dyn EventHandler>]> = self.handlers.into();
        info!(handlers = handlers.len(), "Dispatcher running");

        loop {
            tokio::select! {
                delivery = self.rx.recv() => {
                    let Some(delivery) = delivery else { break };
                    let handlers = handlers.clone();
                    let handle = self.handle.clone();
                    let config = self.config.clone();
                    let metrics = self.metrics.clone();
                    tokio::spawn(async move {
                        deliver(delivery, &handlers, &handle, &config, &metrics).await;
                    });
                }
                _ = shutdown.recv() => {
                    info!(in_flight = self.handle.in_flight(), "Dispatcher shutting down");
                    break;
                }
            }
        }
    }
}

async fn deliver(
    delivery: Delivery,
    handlers: &[Arc<dyn EventHandler>],
    handle: &DispatcherHandle,
    config: &DispatcherConfig,
    metrics: &SharedMetrics,
) {
    metrics.delivery();
    debug!(
        stream = %delivery.stream,
        sequence = delivery.sequence,
        event = delivery.event.name(),
        redelivery = delivery.redelivery,
        "Delivering event"
    );

    for handler in handlers {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match handler.handle(&delivery.event).await {
                Ok(()) => break,
                Err(e) => {
                    if config.max_delivery_attempts.is_some_and(|max| attempt >= max) {
                        error!(
                            handler = handler.name(),
                            stream = %delivery.stream,
                            sequence = delivery.sequence,
                            attempt,
                            error = %e,
                            "Delivery dead-lettered"
                        );
                        metrics.dead_letter();
                        break;
                    }
                    let delay = backoff(config, attempt);
                    warn!(
                        handler = handler.name(),
                        stream = %delivery.stream,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Delivery failed, retrying"
                    );
                    metrics.delivery_retry();
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    let duplicate = !delivery.redelivery
        && config.duplicate_delivery_rate > 0.0
        && rand::thread_rng().gen_bool(config.duplicate_delivery_rate);
    if duplicate {
        metrics.redelivery();
        handle.enqueue(Delivery {
            redelivery: true,
            ..delivery
        });
    }

    handle.done();
}

fn backoff(config: &DispatcherConfig, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
    config
        .retry_backoff_base
        .saturating_mul(factor)
        .min(config.retry_backoff_max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use parking_lot::Mutex;
    use sagaledger_common::{AccountId, SagaError};

    struct Flaky {
        failures_left: Mutex<u32>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventHandler for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn handle(&self, event: &DomainEvent) -> Result<()> {
            {
                let mut left = self.failures_left.lock();
                if *left > 0 {
                    *left -= 1;
                    return Err(SagaError::DeliveryFailed("not yet".into()));
                }
            }
            self.seen.lock().push(event.name().to_string());
            Ok(())
        }
    }

    fn created(account: &str) -> LedgerEvent {
        LedgerEvent::Created {
            account: AccountId::new(account),
        }
    }

    async fn wait_idle(handle: &DispatcherHandle) {
        for _ in 0..500 {
            if handle.in_flight() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("dispatcher did not settle");
    }

    fn fast_config() -> DispatcherConfig {
        DispatcherConfig {
            retry_backoff_base: Duration::from_millis(1),
            retry_backoff_max: Duration::from_millis(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_retries_until_acknowledged() {
        let metrics = Arc::new(Metrics::new());
        let (handle, mut dispatcher) = channel(fast_config(), metrics.clone());
        let flaky = Arc::new(Flaky {
            failures_left: Mutex::new(3),
            seen: Mutex::new(Vec::new()),
        });
        dispatcher.register(flaky.clone());
        let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
        tokio::spawn(dispatcher.run(shutdown_rx));

        handle.publish("ledger-a", 1, &created("a"));
        wait_idle(&handle).await;

        assert_eq!(*flaky.seen.lock(), vec!["Created".to_string()]);
        assert_eq!(metrics.snapshot().delivery_retries, 3);
    }

    #[tokio::test]
    async fn test_dead_letter_after_max_attempts() {
        let metrics = Arc::new(Metrics::new());
        let config = DispatcherConfig {
            max_delivery_attempts: Some(2),
            ..fast_config()
        };
        let (handle, mut dispatcher) = channel(config, metrics.clone());
        let flaky = Arc::new(Flaky {
            failures_left: Mutex::new(10),
            seen: Mutex::new(Vec::new()),
        });
        dispatcher.register(flaky.clone());
        let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
        tokio::spawn(dispatcher.run(shutdown_rx));

        handle.publish("ledger-a", 1, &created("a"));
        wait_idle(&handle).await;

        assert!(flaky.seen.lock().is_empty());
        assert_eq!(metrics.snapshot().dead_letters, 1);
    }

    #[tokio::test]
    async fn test_duplicate_injection() {
        let metrics = Arc::new(Metrics::new());
        let config = DispatcherConfig {
            duplicate_delivery_rate: 1.0,
            ..fast_config()
        };
        let (handle, mut dispatcher) = channel(config, metrics.clone());
        let flaky = Arc::new(Flaky {
            failures_left: Mutex::new(0),
            seen: Mutex::new(Vec::new()),
        });
        dispatcher.register(flaky.clone());
        let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
        tokio::spawn(dispatcher.run(shutdown_rx));

        handle.publish("ledger-a", 1, &created("a"));
        wait_idle(&handle).await;

        assert_eq!(flaky.seen.lock().len(), 2);
        assert_eq!(metrics.snapshot().redeliveries, 1);
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = DispatcherConfig {
            retry_backoff_base: Duration::from_millis(10),
            retry_backoff_max: Duration::from_millis(100),
            ..Default::default()
        };
        assert_eq!(backoff(&config, 1), Duration::from_millis(10));
        assert_eq!(backoff(&config, 3), Duration::from_millis(40));
        assert_eq!(backoff(&config, 30), Duration::from_millis(100));
    }
}
