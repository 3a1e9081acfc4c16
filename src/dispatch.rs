//! Outbound event dispatch
//!
//! The scan loop hands events to a bounded queue and never waits on delivery.
//! When the queue is full, submitting waits for room instead of dropping the
//! event. A dispatcher task drains the queue into a small pool of concurrent
//! publish tasks (bounded by a semaphore) and records the outcome of every
//! trigger in the store.
//!
//! Delivery is best effort: a trigger that cannot be published, or that is
//! submitted after the dispatcher stopped, is marked `Failed` and not retried.

use crate::config::SinkConfig;
use crate::error::ConnectorError;
use crate::records::{DispatchStatus, OutboundEvent, Trigger};
use crate::store::ConnectorStore;
use async_trait::async_trait;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendError};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Destination of outbound events.
#[async_trait]
pub trait TriggerSink: Send + Sync {
    async fn publish(&self, event: &OutboundEvent) -> Result<(), ConnectorError>;
}

/// Writes one JSON document per line to stdout.
pub struct StdoutSink;

#[async_trait]
impl TriggerSink for StdoutSink {
    async fn publish(&self, event: &OutboundEvent) -> Result<(), ConnectorError> {
        let line = serde_json::to_string(event)?;
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", line)
            .map_err(|e| ConnectorError::Connectivity(format!("stdout closed: {}", e)))
    }
}

/// POSTs each event as JSON to a URL.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: String, timeout: Duration) -> Result<Self, ConnectorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectorError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl TriggerSink for WebhookSink {
    async fn publish(&self, event: &OutboundEvent) -> Result<(), ConnectorError> {
        self.client
            .post(&self.url)
            .json(event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Build the sink described by the service config.
pub fn build_sink(config: &SinkConfig, timeout: Duration) -> Result<Arc<dyn TriggerSink>, ConnectorError> {
    Ok(match config {
        SinkConfig::Stdout => Arc::new(StdoutSink),
        SinkConfig::Webhook { url } => Arc::new(WebhookSink::new(url.clone(), timeout)?),
    })
}

/// Cloneable entry point of the dispatcher.
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::Sender<OutboundEvent>,
    store: Arc<dyn ConnectorStore>,
}

impl DispatchHandle {
    /// Queue an event for delivery, waiting for room when the queue is full.
    /// Returns false when it was dropped because the dispatcher is gone.
    pub async fn submit(&self, event: OutboundEvent) -> bool {
        match self.tx.send(event).await {
            Ok(()) => true,
            Err(SendError(event)) => {
                warn!("Dispatcher stopped, dropping event");
                self.mark_dropped(&event);
                false
            }
        }
    }

    fn mark_dropped(&self, event: &OutboundEvent) {
        if let OutboundEvent::Trigger(trigger) = event {
            record_status(self.store.as_ref(), trigger, DispatchStatus::Failed);
        }
    }
}

/// Owns the dispatcher task.
pub struct Dispatcher {
    handle: DispatchHandle,
    task: JoinHandle<()>,
}

impl Dispatcher {
    /// Spawn the dispatcher on the current tokio runtime.
    pub fn spawn(
        sink: Arc<dyn TriggerSink>,
        store: Arc<dyn ConnectorStore>,
        workers: usize,
        queue_capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let task = tokio::spawn(run_dispatcher(rx, sink, store.clone(), workers.max(1)));
        Self {
            handle: DispatchHandle { tx, store },
            task,
        }
    }

    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    /// Stop accepting events and wait for queued and in-flight deliveries.
    ///
    /// Every other `DispatchHandle` must have been dropped first, otherwise
    /// the queue never closes.
    pub async fn shutdown(self) {
        let Dispatcher { handle, task } = self;
        drop(handle);
        if let Err(e) = task.await {
            warn!("Dispatcher task failed: {}", e);
        }
    }
}

async fn run_dispatcher(
    mut rx: mpsc::Receiver<OutboundEvent>,
    sink: Arc<dyn TriggerSink>,
    store: Arc<dyn ConnectorStore>,
    workers: usize,
) {
    let semaphore = Arc::new(Semaphore::new(workers));

    while let Some(event) = rx.recv().await {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let sink = sink.clone();
        let store = store.clone();
        tokio::spawn(async move {
            deliver(sink.as_ref(), store.as_ref(), &event).await;
            drop(permit);
        });
    }

    // Wait for in-flight deliveries
    let _ = semaphore.acquire_many(workers as u32).await;
}

async fn deliver(sink: &dyn TriggerSink, store: &dyn ConnectorStore, event: &OutboundEvent) {
    let result = sink.publish(event).await;
    match event {
        OutboundEvent::Trigger(trigger) => {
            let status = match &result {
                Ok(()) => {
                    debug!(
                        rule_id = trigger.rule_id,
                        transaction_id = trigger.transaction_id,
                        "Trigger dispatched"
                    );
                    DispatchStatus::Dispatched
                }
                Err(e) => {
                    warn!(
                        rule_id = trigger.rule_id,
                        transaction_id = trigger.transaction_id,
                        "Trigger dispatch failed: {}",
                        e
                    );
                    DispatchStatus::Failed
                }
            };
            record_status(store, trigger, status);
        }
        OutboundEvent::WatermarkAdvanced { rule_id, .. } => {
            if let Err(e) = result {
                warn!(rule_id, "Watermark notification failed: {}", e);
            }
        }
    }
}

fn record_status(store: &dyn ConnectorStore, trigger: &Trigger, status: DispatchStatus) {
    if let Err(e) = store.set_dispatch_status(
        trigger.contract_address,
        trigger.network_id,
        trigger.transaction_id,
        trigger.trigger_kind,
        status,
    ) {
        warn!(
            transaction_id = trigger.transaction_id,
            "Failed to record dispatch status: {:#}",
            e
        );
    }
}
