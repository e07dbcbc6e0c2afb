//! Thin async JSON-RPC provider used by every pipeline stage that talks to a node.
//!
//! All requests go through a single `alloy` HTTP RPC client and are bounded by a
//! request timeout, so an unresponsive endpoint surfaces as [`EthError::RpcTimeout`]
//! instead of hanging the caller.

use alloy::rpc::client::{ClientBuilder, ReqwestClient};
use alloy::rpc::json_rpc::{RpcParam, RpcReturn};
use alloy::rpc::types::request::{TransactionInput, TransactionRequest};
pub use alloy_primitives::{Address, Bytes, TxHash, B256, U256};
use serde::Deserialize;
use std::borrow::Cow;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Default timeout applied to every request when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors returned by [`Provider`] calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EthError {
    /// The node answered with a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    RpcError { code: i64, message: String },
    /// The request did not complete within the configured timeout.
    #[error("rpc request timed out")]
    RpcTimeout,
    /// The node answered, but the result could not be decoded.
    #[error("malformed rpc response: {0}")]
    RpcMalformedResponse(String),
    /// The endpoint could not be reached.
    #[error("transport error: {0}")]
    Transport(String),
    /// The caller passed an argument the provider cannot use.
    #[error("invalid params: {0}")]
    InvalidParams(String),
}

impl EthError {
    /// JSON-RPC error code, when the node returned one.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::RpcError { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockFees {
    base_fee_per_gas: Option<U256>,
}

/// JSON-RPC provider bound to one endpoint.
#[derive(Debug, Clone)]
pub struct Provider {
    client: ReqwestClient,
    url: Url,
    timeout: Duration,
}

impl Provider {
    /// Create a provider for `url` with the default request timeout.
    pub fn new(url: Url) -> Self {
        Self::with_timeout(url, DEFAULT_TIMEOUT)
    }

    /// Create a provider for `url`, bounding every request by `timeout`.
    pub fn with_timeout(url: Url, timeout: Duration) -> Self {
        let client = ClientBuilder::default().http(url.clone());
        Self {
            client,
            url,
            timeout,
        }
    }

    /// Parse `endpoint` and create a provider for it.
    pub fn connect(endpoint: &str, timeout: Duration) -> Result<Self, EthError> {
        let url = Url::parse(endpoint)
            .map_err(|e| EthError::InvalidParams(format!("invalid endpoint {endpoint}: {e}")))?;
        Ok(Self::with_timeout(url, timeout))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Send a raw JSON-RPC request and decode its result.
    pub async fn request<P, R>(
        &self,
        method: impl Into<Cow<'static, str>>,
        params: P,
    ) -> Result<R, EthError>
    where
        P: RpcParam,
        R: RpcReturn,
    {
        let method = method.into();
        debug!(url = %self.url, method = %method, "sending rpc request");
        let call = self.client.request::<P, R>(method, params);
        match tokio::time::timeout(self.timeout, call).await {
            Err(_) => Err(EthError::RpcTimeout),
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                if let Some(payload) = e.as_error_resp() {
                    return Err(EthError::RpcError {
                        code: payload.code,
                        message: payload.message.to_string(),
                    });
                }
                if e.is_ser_error() || e.is_deser_error() {
                    return Err(EthError::RpcMalformedResponse(e.to_string()));
                }
                Err(EthError::Transport(e.to_string()))
            }
        }
    }

    /// Execute a read-only call against `to` at the latest block.
    pub async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, EthError> {
        let tx = TransactionRequest::default()
            .to(to)
            .input(TransactionInput::new(data));
        self.request("eth_call", (tx, "latest")).await
    }

    /// Base fee of the latest block, if the chain has one.
    pub async fn latest_base_fee(&self) -> Result<Option<U256>, EthError> {
        let block: Option<BlockFees> = self
            .request("eth_getBlockByNumber", ("latest", false))
            .await?;
        Ok(block.and_then(|b| b.base_fee_per_gas))
    }

    /// The node's suggested priority fee.
    pub async fn max_priority_fee_per_gas(&self) -> Result<U256, EthError> {
        self.request("eth_maxPriorityFeePerGas", ()).await
    }

    /// Broadcast a signed transaction and return its hash.
    pub async fn send_raw_transaction(&self, tx: Bytes) -> Result<TxHash, EthError> {
        self.request("eth_sendRawTransaction", (tx,)).await
    }
}
