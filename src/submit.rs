//! Submission of signed artifacts.
//!
//! A signed transaction goes to a node's broadcast method; a signed UserOperation goes to
//! an ERC-4337 bundler's mempool. Each [`Dispatcher::submit`] makes exactly one network
//! attempt.

use crate::eth::{EthError, Provider};
use crate::signer::SignedArtifact;
use crate::user_operation::UserOperation;
use alloy_primitives::{hex, Address, Bytes};
use alloy_sol_types::{sol, SolCall};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

sol! {
    interface IEntryPoint {
        struct PackedUserOperation {
            address sender;
            uint256 nonce;
            bytes initCode;
            bytes callData;
            uint256 callGasLimit;
            uint256 verificationGasLimit;
            uint256 preVerificationGas;
            uint256 maxFeePerGas;
            uint256 maxPriorityFeePerGas;
            bytes paymasterAndData;
            bytes signature;
        }

        function handleOps(PackedUserOperation[] calldata ops, address beneficiary) external;
    }
}

impl From<&UserOperation> for IEntryPoint::PackedUserOperation {
    fn from(op: &UserOperation) -> Self {
        Self {
            sender: op.sender,
            nonce: op.nonce,
            initCode: op.init_code.clone(),
            callData: op.call_data.clone(),
            callGasLimit: op.call_gas_limit,
            verificationGasLimit: op.verification_gas_limit,
            preVerificationGas: op.pre_verification_gas,
            maxFeePerGas: op.max_fee_per_gas,
            maxPriorityFeePerGas: op.max_priority_fee_per_gas,
            paymasterAndData: op.paymaster_and_data.clone(),
            signature: op.signature.clone(),
        }
    }
}

/// Calldata for `EntryPoint.handleOps(ops, beneficiary)`.
///
/// The result can be fed to the transaction assembler as raw calldata to execute the
/// operations directly against the EntryPoint.
pub fn handle_ops_call(ops: &[UserOperation], beneficiary: Address) -> Bytes {
    IEntryPoint::handleOpsCall {
        ops: ops.iter().map(Into::into).collect(),
        beneficiary,
    }
    .abi_encode()
    .into()
}

/// Where a signed artifact is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Destination {
    /// `eth_sendRawTransaction` on a node.
    RawBroadcast,
    /// `eth_sendUserOperation` on a bundler.
    #[serde(rename_all = "camelCase")]
    Mempool { entry_point: Address },
    /// A direct `handleOps` call against the EntryPoint.
    #[serde(rename_all = "camelCase")]
    EntryPoint {
        entry_point: Address,
        beneficiary: Address,
    },
}

impl Destination {
    fn name(&self) -> &'static str {
        match self {
            Self::RawBroadcast => "raw broadcast",
            Self::Mempool { .. } => "mempool",
            Self::EntryPoint { .. } => "entry point",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    /// Transaction hash for broadcasts, the bundler's response for mempool submissions.
    pub transaction_hash: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("submission timed out")]
    Timeout,

    #[error("submission rejected ({code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("malformed submission response: {0}")]
    MalformedResponse(String),

    #[error("a {artifact} cannot be sent to the {destination} destination")]
    ArtifactMismatch {
        artifact: &'static str,
        destination: &'static str,
    },

    #[error("{0} submission is not implemented")]
    NotImplemented(&'static str),
}

impl From<EthError> for SubmissionError {
    fn from(e: EthError) -> Self {
        match e {
            EthError::RpcError { code, message } => Self::Rejected { code, message },
            EthError::RpcTimeout => Self::Timeout,
            EthError::RpcMalformedResponse(msg) => Self::MalformedResponse(msg),
            EthError::Transport(msg) => Self::Unreachable(msg),
            EthError::InvalidParams(msg) => Self::InvalidEndpoint(msg),
        }
    }
}

fn artifact_name(artifact: &SignedArtifact) -> &'static str {
    match artifact {
        SignedArtifact::RawTransaction(_) => "signed transaction",
        SignedArtifact::UserOperation(_) => "user operation",
    }
}

/// Sends signed artifacts to their destination.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    timeout: Duration,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(crate::eth::DEFAULT_TIMEOUT)
    }
}

impl Dispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn submit(
        &self,
        artifact: &SignedArtifact,
        destination: &Destination,
        endpoint_url: &str,
    ) -> Result<SubmissionResult, SubmissionError> {
        match (artifact, destination) {
            (SignedArtifact::RawTransaction(raw), Destination::RawBroadcast) => {
                let provider = Provider::connect(endpoint_url, self.timeout)?;
                let hash = provider.send_raw_transaction(raw.clone()).await?;
                info!(%hash, endpoint = endpoint_url, "broadcast transaction");
                Ok(SubmissionResult {
                    transaction_hash: hex::encode_prefixed(hash),
                })
            }
            (SignedArtifact::UserOperation(op), Destination::Mempool { entry_point }) => {
                let provider = Provider::connect(endpoint_url, self.timeout)?;
                let response: serde_json::Value = provider
                    .request("eth_sendUserOperation", (op.clone(), *entry_point))
                    .await?;
                let transaction_hash = match response {
                    serde_json::Value::String(id) => id,
                    other => other.to_string(),
                };
                info!(
                    user_op_hash = %op.hash(),
                    response = %transaction_hash,
                    endpoint = endpoint_url,
                    "sent user operation to mempool"
                );
                Ok(SubmissionResult { transaction_hash })
            }
            (_, Destination::EntryPoint { .. }) => {
                warn!("direct entry point submission requested");
                Err(SubmissionError::NotImplemented("direct entry point"))
            }
            (artifact, destination) => Err(SubmissionError::ArtifactMismatch {
                artifact: artifact_name(artifact),
                destination: destination.name(),
            }),
        }
    }
}
