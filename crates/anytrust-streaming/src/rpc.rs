//! JSON-RPC call seam
//!
//! The protocol only needs "call a named method with positional JSON params".
//! [`RpcClient`] is that seam. An HTTP transport implements it in a deployment;
//! [`LoopbackClient`] implements it in-process by dispatching into an
//! [`RpcRouter`], encoding every request and response through JSON on the way
//! so that body-size limits and wire encodings behave as they would remotely.
//!
//! Numbers and byte strings travel as `0x`-prefixed hex ([`HexU64`],
//! [`HexBytes`]).

use anytrust_core::effects::PhysicalTimeEffects;
use anytrust_core::AnytrustError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

/// Positional call parameters
pub type RpcParams = Vec<Value>;

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("rpc error {code}: {message}")]
pub struct RpcError {
    /// JSON-RPC error code
    pub code: i64,
    /// Human readable message
    pub message: String,
    /// Structured payload; carries the serialized [`AnytrustError`] when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Method does not exist
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Params could not be decoded
    pub const INVALID_PARAMS: i64 = -32602;
    /// Handler returned an error
    pub const SERVER_ERROR: i64 = -32000;
    /// Endpoint unreachable; safe to retry
    pub const UNAVAILABLE: i64 = -32001;
    /// Request body over the endpoint limit
    pub const REQUEST_TOO_LARGE: i64 = -32002;

    /// Error without structured data
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Standard "method not found" error
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            Self::METHOD_NOT_FOUND,
            format!("the method {method} does not exist/is not available"),
        )
    }

    /// Params failed to decode
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PARAMS, message)
    }

    /// Transient transport failure
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Self::UNAVAILABLE, message)
    }

    /// True for [`Self::METHOD_NOT_FOUND`]
    pub fn is_method_not_found(&self) -> bool {
        self.code == Self::METHOD_NOT_FOUND
    }

    /// True when the call may succeed on retry
    pub fn is_retryable(&self) -> bool {
        self.code == Self::UNAVAILABLE
    }
}

impl From<AnytrustError> for RpcError {
    fn from(err: AnytrustError) -> Self {
        let code = match &err {
            AnytrustError::MethodNotFound { .. } => Self::METHOD_NOT_FOUND,
            AnytrustError::Transport { .. } => Self::UNAVAILABLE,
            _ => Self::SERVER_ERROR,
        };
        Self {
            code,
            message: err.to_string(),
            data: serde_json::to_value(&err).ok(),
        }
    }
}

impl From<RpcError> for AnytrustError {
    fn from(err: RpcError) -> Self {
        if let Some(inner) = err
            .data
            .as_ref()
            .and_then(|data| serde_json::from_value::<AnytrustError>(data.clone()).ok())
        {
            return inner;
        }
        match err.code {
            RpcError::METHOD_NOT_FOUND => {
                let method = err
                    .message
                    .strip_prefix("the method ")
                    .and_then(|rest| rest.split_whitespace().next())
                    .unwrap_or(err.message.as_str());
                AnytrustError::method_not_found(method)
            }
            RpcError::INVALID_PARAMS => AnytrustError::serialization(err.message),
            _ => AnytrustError::transport(err.message),
        }
    }
}

/// Caller side of a JSON-RPC endpoint
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Invoke `method` with positional `params`
    async fn call(&self, method: &str, params: RpcParams) -> Result<Value, RpcError>;
}

#[async_trait]
impl<T: RpcClient + ?Sized> RpcClient for Arc<T> {
    async fn call(&self, method: &str, params: RpcParams) -> Result<Value, RpcError> {
        (**self).call(method, params).await
    }
}

/// Call a method and decode its result
pub async fn call_typed<C, R>(client: &C, method: &str, params: RpcParams) -> anytrust_core::Result<R>
where
    C: RpcClient + ?Sized,
    R: DeserializeOwned,
{
    let value = client.call(method, params).await?;
    serde_json::from_value(value).map_err(|e| {
        AnytrustError::serialization(format!("malformed result from {method}: {e}"))
    })
}

/// Decode positional param `index`
pub fn param<T: DeserializeOwned>(params: &[Value], index: usize) -> Result<T, RpcError> {
    let value = params
        .get(index)
        .ok_or_else(|| RpcError::invalid_params(format!("missing value for required argument {index}")))?;
    serde_json::from_value(value.clone())
        .map_err(|e| RpcError::invalid_params(format!("invalid argument {index}: {e}")))
}

/// Encode a value as a positional param
pub fn to_param<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send>>;
type Handler = Arc<dyn Fn(RpcParams) -> HandlerFuture + Send + Sync>;

/// Method table for an in-process endpoint
#[derive(Clone, Default)]
pub struct RpcRouter {
    handlers: HashMap<String, Handler>,
}

impl RpcRouter {
    /// Router with no methods
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `method`, replacing any previous handler
    pub fn register<F, Fut>(&mut self, method: impl Into<String>, handler: F)
    where
        F: Fn(RpcParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |params| -> HandlerFuture { Box::pin(handler(params)) });
        self.handlers.insert(method.into(), handler);
    }

    /// Drop a method; later calls get "method not found"
    pub fn unregister(&mut self, method: &str) {
        self.handlers.remove(method);
    }

    /// Whether `method` is registered
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Run the handler for `method`
    pub async fn dispatch(&self, method: &str, params: RpcParams) -> Result<Value, RpcError> {
        let handler = self
            .handlers
            .get(method)
            .cloned()
            .ok_or_else(|| RpcError::method_not_found(method))?;
        handler(params).await
    }
}

#[derive(Serialize)]
struct RequestEnvelope<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a [Value],
}

/// Size of the JSON-RPC request envelope around `params`
pub fn request_body_len(method: &str, params: &[Value]) -> usize {
    serde_json::to_vec(&RequestEnvelope {
        jsonrpc: "2.0",
        id: u64::MAX,
        method,
        params,
    })
    .map(|body| body.len())
    .unwrap_or(usize::MAX)
}

/// In-process client that dispatches into a router through a JSON round trip
pub struct LoopbackClient {
    router: Arc<RpcRouter>,
    max_body_size: Option<usize>,
    calls: Mutex<BTreeMap<String, u64>>,
}

impl LoopbackClient {
    /// Client with no body size limit
    pub fn new(router: Arc<RpcRouter>) -> Self {
        Self {
            router,
            max_body_size: None,
            calls: Mutex::new(BTreeMap::new()),
        }
    }

    /// Reject requests whose encoded body exceeds `limit` bytes
    pub fn with_max_body_size(mut self, limit: usize) -> Self {
        self.max_body_size = Some(limit);
        self
    }

    /// Number of calls made to `method`
    pub fn call_count(&self, method: &str) -> u64 {
        self.calls.lock().get(method).copied().unwrap_or(0)
    }

    /// Call counts for every method seen
    pub fn call_counts(&self) -> BTreeMap<String, u64> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RpcClient for LoopbackClient {
    async fn call(&self, method: &str, params: RpcParams) -> Result<Value, RpcError> {
        *self.calls.lock().entry(method.to_string()).or_default() += 1;

        let body_len = request_body_len(method, &params);
        if let Some(limit) = self.max_body_size {
            if body_len > limit {
                return Err(RpcError::new(
                    RpcError::REQUEST_TOO_LARGE,
                    format!("request body of {body_len} bytes exceeds limit of {limit}"),
                ));
            }
        }
        // Re-decode params so handlers only see what survives the wire
        let wire = serde_json::to_string(&params)
            .map_err(|e| RpcError::invalid_params(e.to_string()))?;
        let params: RpcParams =
            serde_json::from_str(&wire).map_err(|e| RpcError::invalid_params(e.to_string()))?;

        debug!(method, body_len, "loopback rpc call");
        let result = self.router.dispatch(method, params).await?;
        let wire = serde_json::to_string(&result)
            .map_err(|e| RpcError::new(RpcError::SERVER_ERROR, e.to_string()))?;
        serde_json::from_str(&wire).map_err(|e| RpcError::new(RpcError::SERVER_ERROR, e.to_string()))
    }
}

/// Retries calls that failed with a retryable error
///
/// Protocol calls are idempotent on the receiver as long as the same bytes
/// are re-sent, so an unreachable endpoint can be retried transparently.
pub struct RetryingClient<C> {
    inner: C,
    retries: u32,
    retry_delay_ms: u64,
    time: Arc<dyn PhysicalTimeEffects>,
}

impl<C: RpcClient> RetryingClient<C> {
    /// `retries` extra attempts after the first; zero means a single attempt
    pub fn new(inner: C, retries: u32, retry_delay_ms: u64, time: Arc<dyn PhysicalTimeEffects>) -> Self {
        Self {
            inner,
            retries,
            retry_delay_ms,
            time,
        }
    }
}

#[async_trait]
impl<C: RpcClient> RpcClient for RetryingClient<C> {
    async fn call(&self, method: &str, params: RpcParams) -> Result<Value, RpcError> {
        let mut attempt = 0;
        loop {
            match self.inner.call(method, params.clone()).await {
                Err(err) if err.is_retryable() && attempt < self.retries => {
                    attempt += 1;
                    debug!(method, attempt, error = %err, "retrying rpc call");
                    if self.retry_delay_ms > 0 {
                        self.time
                            .sleep_ms(self.retry_delay_ms)
                            .await
                            .map_err(RpcError::from)?;
                    }
                }
                other => return other,
            }
        }
    }
}

/// `u64` encoded as a `0x`-prefixed hex string
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HexU64(pub u64);

impl Serialize for HexU64 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:#x}", self.0))
    }
}

impl<'de> Deserialize<'de> for HexU64 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let digits = s
            .strip_prefix("0x")
            .ok_or_else(|| D::Error::custom("hex string without 0x prefix"))?;
        if digits.is_empty() || (digits.len() > 1 && digits.starts_with('0')) {
            return Err(D::Error::custom("hex number with leading zero digits"));
        }
        u64::from_str_radix(digits, 16)
            .map(HexU64)
            .map_err(D::Error::custom)
    }
}

/// Byte string encoded as a `0x`-prefixed hex string
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct HexBytes(pub Vec<u8>);

impl Serialize for HexBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(&self.0)))
    }
}

impl<'de> Deserialize<'de> for HexBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let digits = s
            .strip_prefix("0x")
            .ok_or_else(|| D::Error::custom("hex string without 0x prefix"))?;
        hex::decode(digits).map(HexBytes).map_err(D::Error::custom)
    }
}

impl From<Vec<u8>> for HexBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}
