//! ERC-4337 UserOperations: the record itself, its canonical hash, and assembly from an
//! unsigned transaction plus a network fee snapshot.

use crate::config::UserOpDefaults;
use crate::eth::{EthError, Provider};
use crate::transaction::UnsignedTransaction;
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Priority fee assumed by the oracle when the node does not suggest one.
const ORACLE_FALLBACK_PRIORITY_FEE: u128 = 1_000_000_000;

/// A pre-v0.7 ERC-4337 UserOperation. Numeric fields serialize as hex quantities.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// Canonical hash: keccak256 over the tightly packed
    /// `(sender, nonce, keccak(initCode), keccak(callData), callGasLimit,
    /// verificationGasLimit, preVerificationGas, maxFeePerGas, maxPriorityFeePerGas,
    /// keccak(paymasterAndData))`.
    pub fn hash(&self) -> B256 {
        let mut packed = Vec::with_capacity(20 + 32 * 9);
        packed.extend_from_slice(self.sender.as_slice());
        packed.extend_from_slice(&self.nonce.to_be_bytes::<32>());
        packed.extend_from_slice(keccak256(&self.init_code).as_slice());
        packed.extend_from_slice(keccak256(&self.call_data).as_slice());
        for word in [
            self.call_gas_limit,
            self.verification_gas_limit,
            self.pre_verification_gas,
            self.max_fee_per_gas,
            self.max_priority_fee_per_gas,
        ] {
            packed.extend_from_slice(&word.to_be_bytes::<32>());
        }
        packed.extend_from_slice(keccak256(&self.paymaster_and_data).as_slice());
        keccak256(&packed)
    }

    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }

    /// Attach a signature, consuming the unsigned operation.
    pub fn with_signature(self, signature: Bytes) -> Self {
        Self { signature, ..self }
    }
}

#[derive(Debug, Error)]
pub enum FeeQueryError {
    #[error("fee oracle unreachable: {0}")]
    Unreachable(#[from] EthError),
}

/// A snapshot of network fees. Either field may be absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeeData {
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
}

#[async_trait]
pub trait FeeOracle: Send + Sync {
    async fn fee_data(&self) -> Result<FeeData, FeeQueryError>;
}

#[async_trait]
impl FeeOracle for Provider {
    /// `maxFeePerGas = 2 * baseFee + priorityFee`; no data on chains without a base fee.
    async fn fee_data(&self) -> Result<FeeData, FeeQueryError> {
        let Some(base_fee) = self.latest_base_fee().await? else {
            return Ok(FeeData::default());
        };
        let base_fee: u128 = base_fee.saturating_to();
        let priority_fee = match self.max_priority_fee_per_gas().await {
            Ok(fee) => fee.saturating_to(),
            Err(e) => {
                debug!(error = %e, "no priority fee suggestion, using 1 gwei");
                ORACLE_FALLBACK_PRIORITY_FEE
            }
        };
        Ok(FeeData {
            max_fee_per_gas: Some(base_fee.saturating_mul(2).saturating_add(priority_fee)),
            max_priority_fee_per_gas: Some(priority_fee),
        })
    }
}

/// Builds unsigned UserOperations from unsigned transactions.
#[derive(Clone)]
pub struct UserOpBuilder {
    defaults: UserOpDefaults,
    fee_oracle: Arc<dyn FeeOracle>,
}

impl std::fmt::Debug for UserOpBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserOpBuilder")
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl UserOpBuilder {
    pub fn new(defaults: UserOpDefaults, fee_oracle: Arc<dyn FeeOracle>) -> Self {
        Self {
            defaults,
            fee_oracle,
        }
    }

    pub fn defaults(&self) -> &UserOpDefaults {
        &self.defaults
    }

    /// Assemble an unsigned UserOperation. Fee oracle failures fall back to the configured
    /// defaults field by field and are never returned.
    pub async fn assemble(
        &self,
        sender: Address,
        nonce: U256,
        transaction: &UnsignedTransaction,
    ) -> UserOperation {
        let fees = match self.fee_oracle.fee_data().await {
            Ok(fees) => fees,
            Err(e) => {
                warn!(error = %e, "fee query failed, using default fees");
                FeeData::default()
            }
        };
        let max_fee_per_gas = fees
            .max_fee_per_gas
            .unwrap_or(self.defaults.default_max_fee_per_gas);
        let max_priority_fee_per_gas = fees
            .max_priority_fee_per_gas
            .unwrap_or(self.defaults.default_max_priority_fee_per_gas);

        UserOperation {
            sender,
            nonce,
            init_code: Bytes::new(),
            call_data: transaction.data.clone(),
            call_gas_limit: self.defaults.default_call_gas_limit,
            verification_gas_limit: self.defaults.default_verification_gas_limit,
            pre_verification_gas: self.defaults.default_pre_verification_gas,
            max_fee_per_gas: U256::from(max_fee_per_gas),
            max_priority_fee_per_gas: U256::from(max_priority_fee_per_gas),
            paymaster_and_data: Bytes::new(),
            signature: Bytes::new(),
        }
    }
}
