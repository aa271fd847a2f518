//! Receiver-side table of in-flight messages
//!
//! Locking: the table lock guards insert, lookup and removal of messages and
//! the replay cache. Each message has its own lock over its chunk slots.
//! Locks are always taken table first, then message, and neither is held
//! across an `.await`.

use anytrust_core::effects::{PhysicalTime, RandomEffects};
use anytrust_core::{AnytrustError, Hash32, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Attempts at drawing an unused message id before giving up
pub const MAX_ID_ATTEMPTS: usize = 16;

/// Default cap on the announced size of one message, in bytes
pub const DEFAULT_MAX_MESSAGE_SIZE: u64 = 64 * 1024 * 1024;

/// Receiver-assigned handle for one protocol instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Invoked for every message dropped by the reaper
pub type ExpirationCallback = Arc<dyn Fn(MessageId) + Send + Sync>;

/// A fully reassembled message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedMessage {
    /// Reassembled payload
    pub data: Vec<u8>,
    /// Timeout supplied by the sender at start
    pub timeout: u64,
    /// Receiver time at which the message was opened
    pub start_time: PhysicalTime,
}

#[derive(Debug)]
struct PartialMessage {
    // Filled as chunks arrive; never sized from the sender's claim
    chunks: BTreeMap<u64, Vec<u8>>,
    n_chunks: u64,
    expected_chunk_size: u64,
    expected_total_size: u64,
    timeout: u64,
    start_time: PhysicalTime,
    last_update_time: PhysicalTime,
    aborted: bool,
}

impl PartialMessage {
    fn expected_len(&self, chunk_id: u64) -> u64 {
        if chunk_id + 1 == self.n_chunks {
            // Exact multiples end in a full-size chunk, not an empty one
            (self.expected_total_size - 1) % self.expected_chunk_size + 1
        } else {
            self.expected_chunk_size
        }
    }
}

#[derive(Default)]
struct Table {
    messages: HashMap<MessageId, Arc<Mutex<PartialMessage>>>,
    seen_requests: HashMap<Hash32, u64>,
}

/// Outcome of one reaper sweep
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Messages dropped for inactivity
    pub expired: Vec<MessageId>,
    /// Replay-cache entries older than the validity window
    pub purged_requests: usize,
}

/// In-flight message table plus start-request replay cache
pub struct MessageStore {
    table: Mutex<Table>,
    max_pending_messages: usize,
    message_collection_expiry_ms: u64,
    request_validity_ms: u64,
    max_message_size: u64,
    expiration_callback: Option<ExpirationCallback>,
}

impl MessageStore {
    /// Empty table with the default message size cap
    pub fn new(
        max_pending_messages: usize,
        message_collection_expiry_ms: u64,
        request_validity_ms: u64,
        expiration_callback: Option<ExpirationCallback>,
    ) -> Self {
        Self {
            table: Mutex::new(Table::default()),
            max_pending_messages,
            message_collection_expiry_ms,
            request_validity_ms,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            expiration_callback,
        }
    }

    /// Reject messages announcing more than `max_message_size` bytes
    pub fn with_max_message_size(mut self, max_message_size: u64) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Number of messages being collected
    pub fn pending_count(&self) -> usize {
        self.table.lock().messages.len()
    }

    /// Remember a start request; fails if the same request was seen before
    pub fn record_request(&self, request_key: Hash32, request_time: PhysicalTime) -> Result<()> {
        let mut table = self.table.lock();
        if table.seen_requests.contains_key(&request_key) {
            return Err(AnytrustError::protocol_violation(
                "we have already seen this request; aborting replayed protocol",
            ));
        }
        table.seen_requests.insert(request_key, request_time.ts_ms);
        Ok(())
    }

    /// Open a new message and return its id
    pub async fn register_new_message<R: RandomEffects + ?Sized>(
        &self,
        random: &R,
        n_chunks: u64,
        timeout: u64,
        chunk_size: u64,
        total_size: u64,
        now: PhysicalTime,
    ) -> Result<MessageId> {
        if n_chunks == 0 || chunk_size == 0 || total_size == 0 {
            return Err(AnytrustError::protocol_violation(
                "can't start collecting new message: neither number of chunks, total size or chunk size can be zero",
            ));
        }
        if n_chunks != total_size.div_ceil(chunk_size) {
            return Err(AnytrustError::protocol_violation(format!(
                "can't start collecting new message: {n_chunks} chunks of {chunk_size} bytes cannot carry {total_size} bytes"
            )));
        }
        if total_size > self.max_message_size {
            return Err(AnytrustError::protocol_violation(format!(
                "can't start collecting new message: {total_size} bytes exceeds the limit of {}",
                self.max_message_size
            )));
        }

        for attempt in 0..MAX_ID_ATTEMPTS {
            let id = MessageId(random.random_u64().await);
            let mut table = self.table.lock();
            if table.messages.len() >= self.max_pending_messages {
                return Err(AnytrustError::protocol_violation(format!(
                    "can't start collecting new message: already {} pending",
                    table.messages.len()
                )));
            }
            if table.messages.contains_key(&id) {
                debug!(message_id = %id, attempt, "message id collision, drawing again");
                continue;
            }
            table.messages.insert(
                id,
                Arc::new(Mutex::new(PartialMessage {
                    chunks: BTreeMap::new(),
                    n_chunks,
                    expected_chunk_size: chunk_size,
                    expected_total_size: total_size,
                    timeout,
                    start_time: now,
                    last_update_time: now,
                    aborted: false,
                })),
            );
            return Ok(id);
        }
        Err(AnytrustError::internal(format!(
            "could not allocate a free message id after {MAX_ID_ATTEMPTS} attempts"
        )))
    }

    /// Store one chunk of a message
    pub fn add_new_chunk(
        &self,
        id: MessageId,
        chunk_id: u64,
        chunk: Vec<u8>,
        now: PhysicalTime,
    ) -> Result<()> {
        let message = self.lookup(id)?;
        {
            let mut message = message.lock();
            if message.aborted {
                return Err(unknown_message(id));
            }
            let n_chunks = message.n_chunks;
            if chunk_id >= n_chunks {
                return Err(AnytrustError::protocol_violation(format!(
                    "message({id}): chunk({chunk_id}) out of range - expected {n_chunks} chunks"
                )));
            }
            let conflicting = match message.chunks.get(&chunk_id).map(Vec::as_slice) {
                // Identical resend is absorbed
                Some(existing) if existing == chunk.as_slice() => return Ok(()),
                Some(_) => true,
                None => false,
            };
            if !conflicting {
                let expected = message.expected_len(chunk_id);
                if chunk.len() as u64 != expected {
                    return Err(AnytrustError::protocol_violation(format!(
                        "message({id}): chunk({chunk_id}) has incorrect size ({} bytes) - expecting {expected} bytes",
                        chunk.len()
                    )));
                }
                message.chunks.insert(chunk_id, chunk);
                message.last_update_time = now;
                return Ok(());
            }
            message.aborted = true;
        }

        // Message lock released above; now drop it from the table
        self.table.lock().messages.remove(&id);
        warn!(message_id = %id, chunk_id, "conflicting chunk data, protocol aborted");
        Err(AnytrustError::protocol_violation(
            "received different chunk data than previously; aborting protocol",
        ))
    }

    /// Remove a message and return its reassembled payload
    ///
    /// The message leaves the table even when it turns out to be incomplete.
    pub fn finalize_message(&self, id: MessageId) -> Result<CompletedMessage> {
        let message = self
            .table
            .lock()
            .messages
            .remove(&id)
            .ok_or_else(|| unknown_message(id))?;

        let message = message.lock();
        if message.aborted {
            return Err(unknown_message(id));
        }
        let n_chunks = message.n_chunks;
        if message.chunks.len() as u64 != n_chunks {
            return Err(AnytrustError::protocol_violation(format!(
                "incomplete message({id}): got {}/{n_chunks} chunks",
                message.chunks.len()
            )));
        }
        let mut data = Vec::with_capacity(message.expected_total_size as usize);
        for chunk in message.chunks.values() {
            data.extend_from_slice(chunk);
        }
        Ok(CompletedMessage {
            data,
            timeout: message.timeout,
            start_time: message.start_time,
        })
    }

    /// Drop idle messages and stale replay-cache entries
    pub fn reap(&self, now: PhysicalTime) -> ReapReport {
        let mut report = ReapReport::default();
        {
            let mut table = self.table.lock();
            let expiry = self.message_collection_expiry_ms;
            table.messages.retain(|id, message| {
                let idle = now.elapsed_since(message.lock().last_update_time);
                if idle > expiry {
                    report.expired.push(*id);
                    false
                } else {
                    true
                }
            });

            let cutoff = now.ts_ms.saturating_sub(self.request_validity_ms);
            let before = table.seen_requests.len();
            table.seen_requests.retain(|_, seen_at| *seen_at >= cutoff);
            report.purged_requests = before - table.seen_requests.len();
        }

        if let Some(callback) = &self.expiration_callback {
            for id in &report.expired {
                callback(*id);
            }
        }
        report
    }

    fn lookup(&self, id: MessageId) -> Result<Arc<Mutex<PartialMessage>>> {
        self.table
            .lock()
            .messages
            .get(&id)
            .cloned()
            .ok_or_else(|| unknown_message(id))
    }
}

fn unknown_message(id: MessageId) -> AnytrustError {
    AnytrustError::protocol_violation(format!("unknown message({id})"))
}
