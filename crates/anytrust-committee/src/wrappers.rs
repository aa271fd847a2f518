//! Backend decorators
//!
//! Both wrappers forward all three capabilities. [`TimeoutWrapper`] bounds
//! every call with a deadline and [`PanicWrapper`] turns a panicking backend
//! into an ordinary error so one misbehaving member cannot take down the
//! aggregator.

use crate::backend::{DasReader, DasWriter, HealthCheck};
use anytrust_core::{AnytrustError, DataAvailabilityCertificate, ExpirationPolicy, Hash32, Result};
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::error;

/// Fails any call that outlives `timeout`
pub struct TimeoutWrapper<S> {
    inner: S,
    timeout: Duration,
}

impl<S> TimeoutWrapper<S> {
    /// Bound every call on `inner` by `timeout`
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(&self, operation: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, fut).await.map_err(|_| {
            AnytrustError::transport(format!("{operation} timed out after {:?}", self.timeout))
        })?
    }
}

#[async_trait]
impl<S: DasWriter> DasWriter for TimeoutWrapper<S> {
    async fn store(&self, message: &[u8], timeout: u64) -> Result<DataAvailabilityCertificate> {
        self.bounded("store", self.inner.store(message, timeout)).await
    }
}

#[async_trait]
impl<S: DasReader> DasReader for TimeoutWrapper<S> {
    async fn get_by_hash(&self, hash: Hash32) -> Result<Vec<u8>> {
        self.bounded("get_by_hash", self.inner.get_by_hash(hash)).await
    }

    async fn expiration_policy(&self) -> Result<ExpirationPolicy> {
        self.bounded("expiration_policy", self.inner.expiration_policy())
            .await
    }
}

#[async_trait]
impl<S: HealthCheck> HealthCheck for TimeoutWrapper<S> {
    async fn health_check(&self) -> Result<()> {
        self.bounded("health_check", self.inner.health_check()).await
    }
}

/// Converts panics inside the wrapped backend into errors
pub struct PanicWrapper<S> {
    inner: S,
    label: String,
}

impl<S> PanicWrapper<S> {
    /// Wrap `inner`; `label` names it in errors
    pub fn new(inner: S, label: impl Into<String>) -> Self {
        Self {
            inner,
            label: label.into(),
        }
    }

    async fn guarded<T>(&self, operation: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(backend = %self.label, operation, reason = %reason, "backend panicked");
                Err(AnytrustError::internal(format!(
                    "panic in {operation} of {}: {reason}",
                    self.label
                )))
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[async_trait]
impl<S: DasWriter> DasWriter for PanicWrapper<S> {
    async fn store(&self, message: &[u8], timeout: u64) -> Result<DataAvailabilityCertificate> {
        self.guarded("store", self.inner.store(message, timeout)).await
    }
}

#[async_trait]
impl<S: DasReader> DasReader for PanicWrapper<S> {
    async fn get_by_hash(&self, hash: Hash32) -> Result<Vec<u8>> {
        self.guarded("get_by_hash", self.inner.get_by_hash(hash)).await
    }

    async fn expiration_policy(&self) -> Result<ExpirationPolicy> {
        self.guarded("expiration_policy", self.inner.expiration_policy())
            .await
    }
}

#[async_trait]
impl<S: HealthCheck> HealthCheck for PanicWrapper<S> {
    async fn health_check(&self) -> Result<()> {
        self.guarded("health_check", self.inner.health_check()).await
    }
}
