//! Building an aggregator from configuration

use crate::aggregator::{Aggregator, AggregatorEffects};
use crate::backend::DasService;
use crate::config::AggregatorConfig;
use crate::registry::{BackendRegistry, ServiceDetails};
use crate::rpc_client::DasRpcClient;
use crate::strategy::ExploreExploitStrategy;
use crate::wrappers::{PanicWrapper, TimeoutWrapper};
use anytrust_core::{AnytrustError, ConfigValidation, Result};
use anytrust_streaming::{PayloadSigner, RetryingClient, RpcClient};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Opens an RPC channel to a backend URL
pub trait RpcConnector: Send + Sync {
    fn connect(&self, url: &str) -> Result<Arc<dyn RpcClient>>;
}

/// Metric-path-safe name for a backend URL
pub fn backend_label(url: &str) -> String {
    let trimmed = url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    trimmed
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

impl Aggregator {
    /// Connect to every configured backend and build the committee
    ///
    /// Backend `i` gets signer mask `1 << i`. Each client is wrapped as
    /// `PanicWrapper(TimeoutWrapper(client))`.
    pub fn from_config(
        config: &AggregatorConfig,
        connector: &dyn RpcConnector,
        signer: PayloadSigner,
        effects: AggregatorEffects,
    ) -> Result<Self> {
        if !config.enable {
            return Err(AnytrustError::configuration("aggregator is not enabled"));
        }
        config.validate()?;

        let request_timeout = Duration::from_millis(config.request_timeout_ms);
        let mut services = Vec::with_capacity(config.backends.len());
        for (i, backend) in config.backends.iter().enumerate() {
            let label = backend_label(&backend.url);
            let transport: Arc<dyn RpcClient> = Arc::new(RetryingClient::new(
                connector.connect(&backend.url)?,
                config.rpc_client.retries,
                config.rpc_client.retry_delay_ms,
                effects.time.clone(),
            ));
            let client = DasRpcClient::new(
                label.clone(),
                transport,
                signer.clone(),
                &config.rpc_client,
                effects.time.clone(),
            )?
            .with_metrics(effects.metrics.clone());
            let service: Arc<dyn DasService> = Arc::new(PanicWrapper::new(
                TimeoutWrapper::new(client, request_timeout),
                label.clone(),
            ));
            services.push(ServiceDetails::new(
                service,
                backend.public_key()?,
                1u64 << i,
                label,
            )?);
        }

        let registry = BackendRegistry::new(services, config.assumed_honest)?;
        let strategy = Arc::new(ExploreExploitStrategy::new(
            registry.len(),
            &config.strategy,
            effects.random.clone(),
        ));
        info!(
            backends = registry.len(),
            assumed_honest = registry.assumed_honest(),
            required = registry.required_signers(),
            keyset_hash = %registry.keyset_hash(),
            "aggregator configured"
        );
        Ok(Self::new(
            registry,
            strategy,
            request_timeout,
            config.strategy.stats_window,
            effects,
        ))
    }
}
