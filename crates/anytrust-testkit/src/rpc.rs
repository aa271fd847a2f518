//! Transport fixtures

use anytrust_streaming::{RpcClient, RpcError, RpcParams};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Fails the first `failures` calls of one method with a retryable error
pub struct FlakyClient {
    inner: Arc<dyn RpcClient>,
    method: String,
    remaining: AtomicU32,
}

impl FlakyClient {
    /// Fails the first `failures` calls to `method` as unavailable
    pub fn new(inner: Arc<dyn RpcClient>, method: impl Into<String>, failures: u32) -> Self {
        Self {
            inner,
            method: method.into(),
            remaining: AtomicU32::new(failures),
        }
    }

    /// Injected failures not yet consumed
    pub fn remaining_failures(&self) -> u32 {
        self.remaining.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RpcClient for FlakyClient {
    async fn call(&self, method: &str, params: RpcParams) -> Result<Value, RpcError> {
        if method == self.method
            && self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(RpcError::unavailable(format!("{method} temporarily unavailable")));
        }
        self.inner.call(method, params).await
    }
}
