//! Background delivery driver for a message store
//!
//! A processor polls its store on a fixed interval. Each cycle claims up to
//! `concurrency` messages and runs the `on_process` sequence for each one. A
//! claimed message stays in the store for the whole attempt: success removes
//! it, failure rewrites it at the tail with an incremented retry counter, or
//! moves it to the dead-letter store once `max_retries` is exceeded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use esb_common::{properties, MediationError, StoreError, StoredMessage};
use esb_mediation::{MediationEnvironment, MessageContext, SequenceRef};

use crate::store::MessageStore;

/// `tokio::time::interval` rejects a zero period
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub name: String,
    pub poll_interval: Duration,
    /// Failed attempts tolerated before a message is dead-lettered
    pub max_retries: u32,
    /// Messages attempted concurrently per poll cycle
    pub concurrency: usize,
    pub parameters: HashMap<String, String>,
}

impl ProcessorConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            poll_interval: Duration::from_secs(1),
            max_retries: 3,
            concurrency: 1,
            parameters: HashMap::new(),
        }
    }
}

/// Result of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { message_id: String },
    Retrying { message_id: String, retry_count: u32 },
    DeadLettered { message_id: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessorStatus {
    pub name: String,
    pub started: bool,
    pub store: String,
    pub store_size: Option<usize>,
    pub dead_letter_store: String,
    pub dead_letter_size: Option<usize>,
    pub attempts: u64,
    pub successes: u64,
    pub retries: u64,
    pub dead_lettered: u64,
    pub submitted: u64,
}

struct Worker {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Counters {
    attempts: AtomicU64,
    successes: AtomicU64,
    retries: AtomicU64,
    dead_lettered: AtomicU64,
    submitted: AtomicU64,
}

pub struct MessageProcessor {
    config: ProcessorConfig,
    store: Arc<dyn MessageStore>,
    dead_letter_store: Arc<dyn MessageStore>,
    on_process: SequenceRef,
    on_submit: Option<SequenceRef>,
    environment: Arc<MediationEnvironment>,
    started: AtomicBool,
    worker: Mutex<Option<Worker>>,
    counters: Counters,
}

impl MessageProcessor {
    pub fn new(
        config: ProcessorConfig,
        store: Arc<dyn MessageStore>,
        dead_letter_store: Arc<dyn MessageStore>,
        on_process: SequenceRef,
        environment: Arc<MediationEnvironment>,
    ) -> Self {
        Self {
            config,
            store,
            dead_letter_store,
            on_process,
            on_submit: None,
            environment,
            started: AtomicBool::new(false),
            worker: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    /// Sequence run once when a message is first submitted
    pub fn with_on_submit(mut self, on_submit: SequenceRef) -> Self {
        self.on_submit = Some(on_submit);
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn dead_letter_store(&self) -> &Arc<dyn MessageStore> {
        &self.dead_letter_store
    }

    pub fn environment(&self) -> &Arc<MediationEnvironment> {
        &self.environment
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Begin polling. Calling this on a started processor does nothing.
    pub async fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            debug!(processor = %self.config.name, "Processor already started");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let processor = Arc::clone(self);
        let interval = self.config.poll_interval.max(MIN_POLL_INTERVAL);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => {
                        info!(processor = %processor.config.name, "Processor poll loop shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        processor.run_cycle().await;
                    }
                }
            }
        });

        *worker = Some(Worker { shutdown_tx, handle });
        self.started.store(true, Ordering::SeqCst);
        info!(
            processor = %self.config.name,
            store = %self.store.name(),
            interval_ms = interval.as_millis() as u64,
            "Processor started"
        );
    }

    /// Stop polling and wait for an in-flight cycle to finish
    pub async fn stop(&self) {
        let mut worker = self.worker.lock().await;
        let Some(Worker { shutdown_tx, handle }) = worker.take() else {
            return;
        };

        let _ = shutdown_tx.send(());
        if let Err(e) = handle.await {
            error!(processor = %self.config.name, error = %e, "Processor poll loop panicked");
        }
        self.started.store(false, Ordering::SeqCst);
        info!(processor = %self.config.name, "Processor stopped");
    }

    /// Run one poll cycle
    ///
    /// A store failure while claiming messages ends the cycle early; the
    /// next tick tries again.
    pub async fn run_cycle(&self) -> Vec<DeliveryOutcome> {
        let mut claimed = Vec::with_capacity(self.config.concurrency);
        for _ in 0..self.config.concurrency.max(1) {
            match self.store.dequeue_next().await {
                Ok(Some(message)) => claimed.push(message),
                Ok(None) => break,
                Err(e) => {
                    warn!(
                        processor = %self.config.name,
                        store = %self.store.name(),
                        error = %e,
                        "Message store unavailable, skipping poll cycle"
                    );
                    break;
                }
            }
        }

        if claimed.is_empty() {
            return Vec::new();
        }

        futures::future::join_all(claimed.into_iter().map(|message| self.attempt(message))).await
    }

    async fn attempt(&self, message: StoredMessage) -> DeliveryOutcome {
        self.counters.attempts.fetch_add(1, Ordering::Relaxed);
        let message_id = message.message_id.clone();
        let retry_count = message.retry_count();
        let mut ctx = MessageContext::restore(message, self.environment.clone());

        let result = match self.on_process.resolve(&self.environment) {
            Some(sequence) => sequence.mediate(&mut ctx).await,
            None => Err(MediationError::configuration(format!(
                "On-process sequence '{}' not found",
                self.on_process.describe()
            ))),
        };

        match result {
            Ok(_) => {
                if let Err(e) = self.store.remove(&message_id).await {
                    error!(
                        processor = %self.config.name,
                        message_id = %message_id,
                        error = %e,
                        "Failed to remove delivered message, it may be delivered again"
                    );
                    self.release(&message_id).await;
                }
                self.counters.successes.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(
                    "esb_processor_deliveries_total",
                    "processor" => self.config.name.clone(),
                    "outcome" => "delivered"
                )
                .increment(1);
                debug!(processor = %self.config.name, message_id = %message_id, "Message delivered");
                DeliveryOutcome::Delivered { message_id }
            }
            Err(e) => self.record_failure(ctx, retry_count + 1, e).await,
        }
    }

    async fn record_failure(
        &self,
        ctx: MessageContext,
        retry_count: u32,
        error: MediationError,
    ) -> DeliveryOutcome {
        let mut message = ctx.snapshot();
        let message_id = message.message_id.clone();
        message.set_retry_count(retry_count);
        message.set_property(properties::LAST_ERROR, error.to_string());

        metrics::counter!(
            "esb_processor_deliveries_total",
            "processor" => self.config.name.clone(),
            "outcome" => "failed"
        )
        .increment(1);

        if retry_count > self.config.max_retries {
            message.set_property(properties::PROCESSOR_NAME, self.config.name.clone());
            match self.dead_letter_store.enqueue(message.clone()).await {
                Ok(()) => {
                    if let Err(e) = self.store.remove(&message_id).await {
                        error!(
                            processor = %self.config.name,
                            message_id = %message_id,
                            error = %e,
                            "Failed to remove dead-lettered message from the primary store"
                        );
                        self.release(&message_id).await;
                    }
                    self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!(
                        "esb_processor_dead_lettered_total",
                        "processor" => self.config.name.clone()
                    )
                    .increment(1);
                    warn!(
                        processor = %self.config.name,
                        message_id = %message_id,
                        retry_count,
                        error = %error,
                        "Retries exhausted, message moved to dead-letter store"
                    );
                    return DeliveryOutcome::DeadLettered { message_id };
                }
                Err(e) => {
                    error!(
                        processor = %self.config.name,
                        message_id = %message_id,
                        error = %e,
                        "Dead-letter store rejected message, keeping it in the primary store"
                    );
                }
            }
        }

        self.counters.retries.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.store.enqueue(message).await {
            error!(
                processor = %self.config.name,
                message_id = %message_id,
                error = %e,
                "Failed to re-enqueue message after delivery failure"
            );
            self.release(&message_id).await;
        } else {
            debug!(
                processor = %self.config.name,
                message_id = %message_id,
                retry_count,
                error = %error,
                "Delivery failed, message re-enqueued"
            );
        }
        DeliveryOutcome::Retrying { message_id, retry_count }
    }

    /// Hand a claimed message back so a later cycle picks it up again
    async fn release(&self, message_id: &str) {
        if let Err(e) = self.store.release(message_id).await {
            warn!(
                processor = %self.config.name,
                message_id = %message_id,
                error = %e,
                "Failed to release message claim"
            );
        }
    }

    /// Place a message into the store for the first time
    ///
    /// Runs `on_submit` once before persisting; a failure there keeps the
    /// message out of the store.
    pub async fn submit(&self, ctx: &mut MessageContext) -> Result<(), MediationError> {
        if let Some(on_submit) = &self.on_submit {
            let sequence = on_submit.resolve(&self.environment).ok_or_else(|| {
                MediationError::configuration(format!(
                    "On-submit sequence '{}' not found",
                    on_submit.describe()
                ))
            })?;
            sequence.mediate(ctx).await?;
        }

        let mut message = ctx.snapshot();
        message.set_retry_count(0);
        self.store.enqueue(message).await?;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        debug!(processor = %self.config.name, message_id = %ctx.message_id(), "Message submitted");
        Ok(())
    }

    /// Re-enqueue a dead-lettered message with a fresh retry budget
    pub async fn resubmit(&self, mut message: StoredMessage) -> Result<(), StoreError> {
        message.set_retry_count(0);
        message.remove_property(properties::LAST_ERROR);
        message.remove_property(properties::PROCESSOR_NAME);
        self.store.enqueue(message).await
    }

    pub async fn status(&self) -> ProcessorStatus {
        ProcessorStatus {
            name: self.config.name.clone(),
            started: self.is_started(),
            store: self.store.name().to_string(),
            store_size: self.store.size().await.ok(),
            dead_letter_store: self.dead_letter_store.name().to_string(),
            dead_letter_size: self.dead_letter_store.size().await.ok(),
            attempts: self.counters.attempts.load(Ordering::Relaxed),
            successes: self.counters.successes.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            dead_lettered: self.counters.dead_lettered.load(Ordering::Relaxed),
            submitted: self.counters.submitted.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryMessageStore;
    use esb_common::Envelope;

    fn processor(on_process: SequenceRef) -> (Arc<MessageProcessor>, Arc<InMemoryMessageStore>, Arc<InMemoryMessageStore>) {
        let env = MediationEnvironment::builder().build();
        let store = Arc::new(InMemoryMessageStore::new("orders"));
        let dlc = Arc::new(InMemoryMessageStore::new("orders-dlc"));
        let mut config = ProcessorConfig::new("orders-processor");
        config.poll_interval = Duration::from_millis(10);
        config.max_retries = 1;
        let processor = Arc::new(MessageProcessor::new(
            config,
            store.clone(),
            dlc.clone(),
            on_process,
            env,
        ));
        (processor, store, dlc)
    }

    #[tokio::test]
    async fn test_missing_on_process_sequence_counts_as_failure() {
        let (processor, store, dlc) = processor(SequenceRef::named("absent"));
        store.enqueue(StoredMessage::new("m1", Envelope::text("x"))).await.unwrap();

        let outcomes = processor.run_cycle().await;
        assert_eq!(
            outcomes,
            vec![DeliveryOutcome::Retrying { message_id: "m1".into(), retry_count: 1 }]
        );
        let stored = store.get("m1").await.unwrap().unwrap();
        assert!(stored
            .property(properties::LAST_ERROR)
            .and_then(|v| v.as_str())
            .unwrap()
            .contains("absent"));

        assert_eq!(
            processor.run_cycle().await,
            vec![DeliveryOutcome::DeadLettered { message_id: "m1".into() }]
        );
        let dead = dlc.get("m1").await.unwrap().unwrap();
        assert_eq!(dead.processor_name(), Some("orders-processor"));
    }

    #[tokio::test]
    async fn test_empty_store_cycle_is_noop() {
        let (processor, _, _) = processor(SequenceRef::named("absent"));
        assert!(processor.run_cycle().await.is_empty());
        assert_eq!(processor.status().await.attempts, 0);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_resets() {
        let (processor, _, _) = processor(SequenceRef::named("absent"));

        processor.start().await;
        processor.start().await;
        assert!(processor.is_started());

        processor.stop().await;
        assert!(!processor.is_started());
        processor.stop().await;
    }

    #[tokio::test]
    async fn test_zero_poll_interval_still_polls() {
        let (processor, store, _) = processor(SequenceRef::named("absent"));
        let mut config = processor.config().clone();
        config.poll_interval = Duration::ZERO;
        let processor = Arc::new(MessageProcessor::new(
            config,
            store.clone(),
            processor.dead_letter_store().clone(),
            SequenceRef::named("absent"),
            processor.environment().clone(),
        ));
        store.enqueue(StoredMessage::new("m1", Envelope::text("x"))).await.unwrap();

        processor.start().await;
        for _ in 0..100 {
            if processor.status().await.attempts > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        processor.stop().await;

        assert!(processor.status().await.attempts > 0);
    }

    #[tokio::test]
    async fn test_resubmit_resets_retry_budget() {
        let (processor, store, _) = processor(SequenceRef::named("absent"));
        let mut message = StoredMessage::new("m1", Envelope::text("x"));
        message.set_retry_count(5);
        message.set_property(properties::LAST_ERROR, "boom");

        processor.resubmit(message).await.unwrap();

        let stored = store.get("m1").await.unwrap().unwrap();
        assert_eq!(stored.retry_count(), 0);
        assert!(stored.property(properties::LAST_ERROR).is_none());
    }
}
