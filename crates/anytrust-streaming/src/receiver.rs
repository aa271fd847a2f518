//! Server side of the streaming protocol
//!
//! A [`DataStreamReceiver`] serves many senders at once. It authenticates
//! every protocol message, enforces the start-request clock window and replay
//! cache, and reassembles chunks through a [`MessageStore`]. A background
//! reaper, started and stopped explicitly, drops messages that stopped making
//! progress and purges the replay cache on the same cycle.

use crate::config::DataStreamReceiverConfig;
use crate::message_store::{
    CompletedMessage, ExpirationCallback, MessageId, MessageStore, ReapReport,
};
use crate::rpc::HexU64;
use crate::signing::PayloadVerifier;
use anytrust_core::effects::{
    MetricsEffects, NoopMetrics, PhysicalTime, PhysicalTimeEffects, RandomEffects,
};
use anytrust_core::{hash, AnytrustError, ConfigValidation, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EXPIRED_METRIC: &str = "anytrust/streaming/receiver/expired/total";
const PENDING_METRIC: &str = "anytrust/streaming/receiver/pending";

/// Result of a start call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartStreamingResult {
    /// Serialized as `BatchId` for compatibility with deployed senders
    #[serde(rename = "BatchId")]
    pub message_id: HexU64,
}

struct ReaperHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Receiving endpoint of the chunked streaming protocol
pub struct DataStreamReceiver {
    verifier: PayloadVerifier,
    store: MessageStore,
    config: DataStreamReceiverConfig,
    time: Arc<dyn PhysicalTimeEffects>,
    random: Arc<dyn RandomEffects>,
    metrics: Arc<dyn MetricsEffects>,
    reaper: Mutex<Option<ReaperHandle>>,
}

impl DataStreamReceiver {
    /// Receiver accepting messages signed by keys `verifier` trusts
    pub fn new(
        verifier: PayloadVerifier,
        config: DataStreamReceiverConfig,
        time: Arc<dyn PhysicalTimeEffects>,
        random: Arc<dyn RandomEffects>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            verifier,
            store: Self::build_store(&config, None),
            config,
            time,
            random,
            metrics: Arc::new(NoopMetrics),
            reaper: Mutex::new(None),
        })
    }

    /// Report pending and expired counts to `metrics`
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsEffects>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Call `callback` for every message dropped by the reaper
    pub fn with_expiration_callback(mut self, callback: ExpirationCallback) -> Self {
        self.store = Self::build_store(&self.config, Some(callback));
        self
    }

    fn build_store(
        config: &DataStreamReceiverConfig,
        callback: Option<ExpirationCallback>,
    ) -> MessageStore {
        MessageStore::new(
            config.max_pending_messages,
            config.message_collection_expiry_ms,
            config.request_validity_ms,
            callback,
        )
        .with_max_message_size(config.max_message_size)
    }

    /// Settings in effect
    pub fn config(&self) -> &DataStreamReceiverConfig {
        &self.config
    }

    /// Messages currently being collected
    pub fn pending_messages(&self) -> usize {
        self.store.pending_count()
    }

    /// Open a protocol instance; `timestamp` is unix seconds at signing
    pub async fn start_receiving(
        &self,
        timestamp: u64,
        n_chunks: u64,
        chunk_size: u64,
        total_size: u64,
        timeout: u64,
        signature: &[u8],
    ) -> Result<StartStreamingResult> {
        self.verifier
            .verify(
                signature,
                &[],
                &[timestamp, n_chunks, chunk_size, total_size, timeout],
            )
            .await?;

        let now = self.time.physical_time().await?;
        let request_time = PhysicalTime {
            ts_ms: timestamp.saturating_mul(1000),
        };
        // Symmetric window tolerates senders whose clocks run ahead
        if now.ts_ms.abs_diff(request_time.ts_ms) > self.config.request_validity_ms {
            warn!(timestamp, now_ms = now.ts_ms, "start request outside validity window");
            return Err(AnytrustError::protocol_violation(
                "too much time has elapsed since request was signed",
            ));
        }
        self.store.record_request(hash(signature), request_time)?;

        let id = self
            .store
            .register_new_message(
                self.random.as_ref(),
                n_chunks,
                timeout,
                chunk_size,
                total_size,
                now,
            )
            .await?;
        self.metrics
            .set_gauge(PENDING_METRIC, self.store.pending_count() as f64);
        debug!(message_id = %id, n_chunks, chunk_size, total_size, "started receiving message");
        Ok(StartStreamingResult {
            message_id: HexU64(id.0),
        })
    }

    /// Accept one chunk
    pub async fn receive_chunk(
        &self,
        message_id: MessageId,
        chunk_id: u64,
        data: Vec<u8>,
        signature: &[u8],
    ) -> Result<()> {
        self.verifier
            .verify(signature, &data, &[message_id.0, chunk_id])
            .await?;
        let now = self.time.physical_time().await?;
        self.store.add_new_chunk(message_id, chunk_id, data, now)?;
        debug!(message_id = %message_id, chunk_id, "received chunk");
        Ok(())
    }

    /// Close a protocol instance and hand back the reassembled payload
    pub async fn finalize_receiving(
        &self,
        message_id: MessageId,
        signature: &[u8],
    ) -> Result<CompletedMessage> {
        self.verifier
            .verify(signature, &[], &[message_id.0])
            .await?;
        let completed = self.store.finalize_message(message_id);
        self.metrics
            .set_gauge(PENDING_METRIC, self.store.pending_count() as f64);
        let completed = completed?;
        info!(
            message_id = %message_id,
            size = completed.data.len(),
            "finished receiving message"
        );
        Ok(completed)
    }

    /// One reaper sweep at the current time
    pub async fn reap_once(&self) -> Result<ReapReport> {
        let now = self.time.physical_time().await?;
        let report = self.store.reap(now);
        if !report.expired.is_empty() {
            for id in &report.expired {
                warn!(message_id = %id, "message collection expired");
            }
            self.metrics
                .increment_counter(EXPIRED_METRIC, report.expired.len() as u64);
        }
        self.metrics
            .set_gauge(PENDING_METRIC, self.store.pending_count() as f64);
        Ok(report)
    }

    /// Spawn the periodic reaper; no-op if it is already running
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.reaper.lock();
        if slot.is_some() {
            return;
        }
        let (shutdown, mut shutdown_rx) = oneshot::channel();
        let receiver: Weak<Self> = Arc::downgrade(self);
        let interval = Duration::from_millis(self.config.reap_interval_ms);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let Some(receiver) = receiver.upgrade() else { break };
                        if let Err(err) = receiver.reap_once().await {
                            warn!(error = %err, "reaper sweep failed");
                        }
                    }
                }
            }
            debug!("reaper stopped");
        });
        *slot = Some(ReaperHandle { shutdown, task });
    }

    /// Stop the reaper and wait for a sweep in progress to finish
    pub async fn stop(&self) {
        let handle = self.reaper.lock().take();
        if let Some(handle) = handle {
            let _ = handle.shutdown.send(());
            if let Err(err) = handle.task.await {
                warn!(error = %err, "reaper task ended abnormally");
            }
        }
    }

    /// Whether the background reaper is running
    pub fn is_reaping(&self) -> bool {
        self.reaper.lock().is_some()
    }
}
