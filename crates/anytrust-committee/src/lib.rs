//! # AnyTrust Committee
//!
//! Stores payloads on a committee of `N` backends under the assumption that
//! at least `H` of them are honest. A store succeeds once `K = N + 1 - H`
//! members returned valid signatures, which guarantees that at least one
//! honest member holds the data.
//!
//! - [`backend`]: the capability traits every member implements
//! - [`registry`]: members, signer masks, quorum parameters, keyset
//! - [`strategy`] and [`stats`]: which members to ask first
//! - [`aggregator`]: concurrent quorum store, reads, health, policy
//! - [`rpc_client`] / [`rpc_server`]: members reached over RPC
//! - [`wrappers`]: timeout and panic isolation
//! - [`local`]: in-memory sign-after-store member

#![forbid(unsafe_code)]

pub mod aggregator;
pub mod backend;
pub mod config;
pub mod factory;
pub mod local;
pub mod registry;
pub mod rpc_client;
pub mod rpc_server;
pub mod stats;
pub mod strategy;
pub mod wrappers;

pub use aggregator::{Aggregator, AggregatorEffects, CertificateAccumulator, QuorumSignatures};
pub use backend::{DasReader, DasService, DasWriter, HealthCheck};
pub use config::{AggregatorConfig, BackendConfig, BackendConfigList, RpcClientConfig};
pub use factory::{backend_label, RpcConnector};
pub use local::{MemoryStorageService, SignAfterStoreWriter, StorageService};
pub use registry::{BackendRegistry, ServiceDetails};
pub use rpc_client::{DasRpcClient, StoreResult};
pub use rpc_server::DasRpcServer;
pub use stats::{ReaderStats, StatsSnapshot, StatsSummary};
pub use strategy::{
    exponential_batches, AggregatorStrategy, BackendBatches, ExploreExploitStrategy,
    SequentialStrategy, StrategyConfig,
};
pub use wrappers::{PanicWrapper, TimeoutWrapper};
