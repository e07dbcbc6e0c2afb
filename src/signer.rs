//! Ethereum signer functionality.
//!
//! The [`Signer`] trait is the single capability every signing back-end exposes. Callers
//! hand it a [`SigningPayload`] and get a [`SignedArtifact`] back without ever branching
//! on which back-end they hold. [`LocalSigner`] signs with a raw private key held in
//! memory; the external wallet back-end lives in [`crate::wallet`].

use crate::transaction::{FeeModel, UnsignedTransaction};
use crate::user_operation::UserOperation;
use alloy::{
    consensus::{SignableTransaction, TxEip1559, TxEnvelope, TxLegacy},
    network::eip2718::Encodable2718,
    network::TxSignerSync,
    signers::{local::PrivateKeySigner, SignerSync},
};
use alloy_primitives::{eip191_hash_message, hex, Address as EthAddress, Bytes, TxKind, B256};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// A transaction plus the replay-protection fields the signer needs.
///
/// Chain id and nonce are always explicit; nothing is filled in behind the caller's back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionData {
    pub transaction: UnsignedTransaction,
    pub chain_id: u64,
    pub nonce: u64,
}

/// What gets signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningPayload {
    UserOperation(UserOperation),
    Transaction(TransactionData),
}

/// The output of signing, as consumed by the submission dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum SignedArtifact {
    /// EIP-2718 encoded signed transaction.
    RawTransaction(Bytes),
    /// UserOperation with its signature populated.
    UserOperation(UserOperation),
}

/// Errors that can occur during signing operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignerError {
    #[error("no signer available: {0}")]
    SignerUnavailable(String),

    #[error("wallet capability is not available")]
    WalletUnavailable,

    #[error("user rejected the signature request")]
    UserRejected,

    #[error("invalid private key format: {0}")]
    KeyFormatInvalid(String),

    #[error("failed to sign transaction or message: {0}")]
    SigningFailed(String),
}

/// The Signer trait defines the interface for all signing implementations
#[async_trait]
pub trait Signer: Send + Sync {
    /// Get the Ethereum address associated with this signer
    async fn address(&self) -> Result<EthAddress, SignerError>;

    /// Sign a message following Ethereum's personal_sign format
    async fn sign_message(&self, message: &[u8]) -> Result<Bytes, SignerError>;

    /// Sign a transaction, returning the EIP-2718 encoded signed envelope
    async fn sign_transaction(&self, tx: &TransactionData) -> Result<Bytes, SignerError>;

    /// Sign a payload. UserOperations are signed over their canonical hash.
    async fn sign(&self, payload: SigningPayload) -> Result<SignedArtifact, SignerError> {
        match payload {
            SigningPayload::UserOperation(op) => {
                let hash = op.hash();
                debug!(user_op_hash = %hash, "signing user operation");
                let signature = self.sign_message(hash.as_slice()).await?;
                Ok(SignedArtifact::UserOperation(op.with_signature(signature)))
            }
            SigningPayload::Transaction(tx) => {
                debug!(chain_id = tx.chain_id, nonce = tx.nonce, "signing transaction");
                let raw = self.sign_transaction(&tx).await?;
                Ok(SignedArtifact::RawTransaction(raw))
            }
        }
    }
}

/// Local signer implementation using a private key stored in memory
#[derive(Debug, Clone)]
pub struct LocalSigner {
    inner: PrivateKeySigner,
}

impl LocalSigner {
    /// Create a signer from a private key in hexadecimal string format
    pub fn from_private_key(private_key: &str) -> Result<Self, SignerError> {
        let clean_key = private_key.trim().trim_start_matches("0x");

        if clean_key.len() != 64 {
            return Err(SignerError::KeyFormatInvalid(
                "Private key must be 32 bytes (64 hex characters)".to_string(),
            ));
        }

        let key_bytes =
            hex::decode(clean_key).map_err(|e| SignerError::KeyFormatInvalid(e.to_string()))?;

        let inner = PrivateKeySigner::from_bytes(&B256::from_slice(&key_bytes))
            .map_err(|e| SignerError::KeyFormatInvalid(e.to_string()))?;

        Ok(Self { inner })
    }

    pub fn address(&self) -> EthAddress {
        self.inner.address()
    }

    fn sign_transaction_sync(&self, tx_data: &TransactionData) -> Result<Bytes, SignerError> {
        let unsigned = &tx_data.transaction;
        let input = unsigned.data.clone();
        let to = TxKind::Call(unsigned.to);

        let signed = match unsigned.fee {
            FeeModel::Legacy { gas_price } => {
                let mut tx = TxLegacy {
                    chain_id: Some(tx_data.chain_id),
                    nonce: tx_data.nonce,
                    gas_price,
                    gas_limit: unsigned.gas_limit,
                    to,
                    value: unsigned.value,
                    input,
                };
                let sig = self
                    .inner
                    .sign_transaction_sync(&mut tx)
                    .map_err(|e| SignerError::SigningFailed(e.to_string()))?;
                TxEnvelope::from(tx.into_signed(sig))
            }
            FeeModel::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let mut tx = TxEip1559 {
                    chain_id: tx_data.chain_id,
                    nonce: tx_data.nonce,
                    gas_limit: unsigned.gas_limit,
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                    to,
                    value: unsigned.value,
                    input,
                    ..Default::default()
                };
                let sig = self
                    .inner
                    .sign_transaction_sync(&mut tx)
                    .map_err(|e| SignerError::SigningFailed(e.to_string()))?;
                TxEnvelope::from(tx.into_signed(sig))
            }
        };

        let mut buf = vec![];
        signed.encode_2718(&mut buf);
        Ok(buf.into())
    }
}

#[async_trait]
impl Signer for LocalSigner {
    async fn address(&self) -> Result<EthAddress, SignerError> {
        Ok(self.inner.address())
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Bytes, SignerError> {
        let hash = eip191_hash_message(message);
        self.inner
            .sign_hash_sync(&hash)
            .map(|signature| Bytes::copy_from_slice(&signature.as_bytes()))
            .map_err(|e| SignerError::SigningFailed(e.to_string()))
    }

    async fn sign_transaction(&self, tx: &TransactionData) -> Result<Bytes, SignerError> {
        self.sign_transaction_sync(tx)
    }
}

/// Sign `payload` with a raw private key. The key is parsed, used once and dropped before
/// this returns.
pub async fn sign_with_private_key(
    private_key: &str,
    payload: SigningPayload,
) -> Result<SignedArtifact, SignerError> {
    let signer = LocalSigner::from_private_key(private_key)?;
    signer.sign(payload).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::consensus::TxEnvelope;
    use alloy::network::eip2718::Decodable2718;
    use alloy_primitives::{address, PrimitiveSignature, U256};

    const KEY_ONE: &str = "0x0000000000000000000000000000000000000000000000000000000000000001";
    const ADDRESS_ONE: EthAddress = address!("7E5F4552091A69125d5DfCb7b8C2659029395Bdf");

    fn recover(signature: &PrimitiveSignature, prehash: B256) -> EthAddress {
        signature.recover_address_from_prehash(&prehash).unwrap()
    }

    fn unsigned(fee: FeeModel) -> UnsignedTransaction {
        UnsignedTransaction {
            to: EthAddress::with_last_byte(1),
            data: Bytes::from_static(&[0xde, 0xad]),
            value: U256::from(5),
            gas_limit: 100_000,
            fee,
        }
    }

    #[test]
    fn key_format_is_checked() {
        assert_eq!(LocalSigner::from_private_key(KEY_ONE).unwrap().address(), ADDRESS_ONE);
        assert!(matches!(
            LocalSigner::from_private_key("0x1234"),
            Err(SignerError::KeyFormatInvalid(_))
        ));
        assert!(matches!(
            LocalSigner::from_private_key(&"zz".repeat(32)),
            Err(SignerError::KeyFormatInvalid(_))
        ));
        // zero is not a valid secp256k1 scalar
        assert!(matches!(
            LocalSigner::from_private_key(&"00".repeat(32)),
            Err(SignerError::KeyFormatInvalid(_))
        ));
    }

    #[tokio::test]
    async fn user_operation_signature_recovers_signer() {
        let op = UserOperation {
            sender: address!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
            ..Default::default()
        };
        let hash = op.hash();
        let artifact = sign_with_private_key(KEY_ONE, SigningPayload::UserOperation(op))
            .await
            .unwrap();
        let SignedArtifact::UserOperation(signed) = artifact else {
            panic!("expected a user operation");
        };
        assert_eq!(signed.signature.len(), 65);
        assert_eq!(signed.hash(), hash);

        let signature = PrimitiveSignature::try_from(signed.signature.as_ref()).unwrap();
        let recovered = signature.recover_address_from_msg(hash.as_slice()).unwrap();
        assert_eq!(recovered, ADDRESS_ONE);
    }

    #[tokio::test]
    async fn transaction_uses_explicit_chain_and_nonce() {
        for fee in [
            FeeModel::Legacy { gas_price: 1_000 },
            FeeModel::Eip1559 {
                max_fee_per_gas: 2_000,
                max_priority_fee_per_gas: 100,
            },
        ] {
            let payload = SigningPayload::Transaction(TransactionData {
                transaction: unsigned(fee),
                chain_id: 8453,
                nonce: 9,
            });
            let SignedArtifact::RawTransaction(raw) =
                sign_with_private_key(KEY_ONE, payload).await.unwrap()
            else {
                panic!("expected a raw transaction");
            };

            let envelope = TxEnvelope::decode_2718(&mut raw.as_ref()).unwrap();
            match (&envelope, fee) {
                (TxEnvelope::Legacy(signed), FeeModel::Legacy { .. }) => {
                    assert_eq!(signed.tx().chain_id, Some(8453));
                    assert_eq!(signed.tx().nonce, 9);
                    assert_eq!(signed.tx().gas_limit, 100_000);
                    assert_eq!(recover(signed.signature(), signed.signature_hash()), ADDRESS_ONE);
                }
                (TxEnvelope::Eip1559(signed), FeeModel::Eip1559 { .. }) => {
                    assert_eq!(signed.tx().chain_id, 8453);
                    assert_eq!(signed.tx().nonce, 9);
                    assert_eq!(signed.tx().max_priority_fee_per_gas, 100);
                    assert_eq!(recover(signed.signature(), signed.signature_hash()), ADDRESS_ONE);
                }
                _ => panic!("fee model and envelope type disagree"),
            }
        }
    }
}
