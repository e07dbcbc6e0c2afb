//! Smart wallet deployment through the Coinbase Smart Wallet factory.
//!
//! Owners are given either as addresses or as raw 64-byte public keys. Both are converted
//! to the `bytes` form the factory expects before the call is encoded.

use crate::abi::{parse_address, ContractReader};
use crate::encoder::decode_hex;
use crate::eth::EthError;
use alloy_primitives::{address, Address, Bytes, U256};
use alloy_sol_types::{sol, SolCall, SolValue};
use thiserror::Error;
use tracing::debug;

/// Coinbase Smart Wallet factory, deployed at the same address on every supported chain.
pub const SMART_WALLET_FACTORY: Address = address!("0BA5ED0c6AA8c49038F819E587E2633c4A9F428a");

const PUBLIC_KEY_LEN: usize = 64;

sol! {
    interface ISmartWalletFactory {
        function createAccount(bytes[] calldata owners, uint256 nonce) external payable returns (address account);
        function getAddress(bytes[] calldata owners, uint256 nonce) external view returns (address);
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeployError {
    #[error("owner must be an address or a 64-byte public key: {0:?}")]
    InvalidOwner(String),

    #[error("at least one owner is required")]
    NoOwners,

    #[error("factory call failed: {0}")]
    Call(#[from] EthError),

    #[error("factory returned malformed data: {0}")]
    MalformedResponse(String),
}

/// Convert one owner input to its factory `bytes` form.
///
/// Addresses are ABI-encoded to a 32-byte word; public keys pass through unchanged.
pub fn owner_bytes(input: &str) -> Result<Bytes, DeployError> {
    let trimmed = input.trim();
    if let Some(owner) = parse_address(trimmed) {
        return Ok(owner.abi_encode().into());
    }
    let is_public_key = trimmed.len() == 2 + 2 * PUBLIC_KEY_LEN && trimmed.starts_with("0x");
    if !is_public_key {
        return Err(DeployError::InvalidOwner(input.to_string()));
    }
    decode_hex(trimmed)
        .map(Bytes::from)
        .map_err(|_| DeployError::InvalidOwner(input.to_string()))
}

fn owners_bytes(owners: &[String]) -> Result<Vec<Bytes>, DeployError> {
    if owners.is_empty() {
        return Err(DeployError::NoOwners);
    }
    owners.iter().map(|o| owner_bytes(o)).collect()
}

/// Calldata for `createAccount(owners, nonce)`, to be sent to [`SMART_WALLET_FACTORY`].
pub fn create_account_call(owners: &[String], nonce: U256) -> Result<Bytes, DeployError> {
    let call = ISmartWalletFactory::createAccountCall {
        owners: owners_bytes(owners)?,
        nonce,
    };
    Ok(call.abi_encode().into())
}

/// Ask `factory` for the counterfactual address of a wallet with these owners and nonce.
pub async fn predict_address(
    reader: &dyn ContractReader,
    factory: Address,
    owners: &[String],
    nonce: U256,
) -> Result<Address, DeployError> {
    let call = ISmartWalletFactory::getAddressCall {
        owners: owners_bytes(owners)?,
        nonce,
    };
    let output = reader.call(factory, call.abi_encode().into()).await?;
    let predicted = ISmartWalletFactory::getAddressCall::abi_decode_returns(&output, true)
        .map_err(|e| DeployError::MalformedResponse(e.to_string()))?
        ._0;
    debug!(%factory, %predicted, "predicted smart wallet address");
    Ok(predicted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedReader(Bytes);

    #[async_trait]
    impl ContractReader for FixedReader {
        async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, EthError> {
            assert_eq!(to, SMART_WALLET_FACTORY);
            assert_eq!(&data[..4], &[0x25, 0x0b, 0x1b, 0x41]);
            Ok(self.0.clone())
        }
    }

    #[test]
    fn address_owner_is_padded_to_a_word() {
        let encoded = owner_bytes("0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf").unwrap();
        assert_eq!(encoded.len(), 32);
        assert_eq!(&encoded[..12], &[0u8; 12]);
        assert_eq!(
            Address::from_slice(&encoded[12..]),
            address!("7E5F4552091A69125d5DfCb7b8C2659029395Bdf")
        );
    }

    #[test]
    fn public_key_owner_passes_through() {
        let key = format!("0x{}", "ab".repeat(PUBLIC_KEY_LEN));
        let encoded = owner_bytes(&key).unwrap();
        assert_eq!(encoded.len(), PUBLIC_KEY_LEN);
        assert!(encoded.iter().all(|b| *b == 0xab));
    }

    #[test]
    fn invalid_owners_are_rejected() {
        let not_hex = format!("0x{}", "zz".repeat(PUBLIC_KEY_LEN));
        for bad in ["", "0x1234", "alice.eth", not_hex.as_str()] {
            assert!(
                matches!(owner_bytes(bad), Err(DeployError::InvalidOwner(_))),
                "{bad} should be rejected"
            );
        }
        assert_eq!(create_account_call(&[], U256::ZERO), Err(DeployError::NoOwners));
    }

    #[test]
    fn create_account_layout() {
        let owners = vec!["0x0000000000000000000000000000000000000001".to_string()];
        let data = create_account_call(&owners, U256::from(2)).unwrap();
        assert_eq!(&data[..4], &[0x3f, 0xfb, 0xa3, 0x6f]);
        assert_eq!(U256::from_be_slice(&data[36..68]), U256::from(2));

        let decoded = ISmartWalletFactory::createAccountCall::abi_decode(&data, true).unwrap();
        assert_eq!(decoded.owners.len(), 1);
        assert_eq!(decoded.owners[0].len(), 32);
        assert_eq!(decoded.owners[0][31], 1);
    }

    #[tokio::test]
    async fn predicts_through_the_factory() {
        let expected = Address::with_last_byte(0x42);
        let reader = FixedReader(expected.abi_encode().into());
        let owners = vec!["0x0000000000000000000000000000000000000001".to_string()];
        let predicted = predict_address(&reader, SMART_WALLET_FACTORY, &owners, U256::ZERO)
            .await
            .unwrap();
        assert_eq!(predicted, expected);

        let short = FixedReader(Bytes::from_static(&[1, 2, 3]));
        assert!(matches!(
            predict_address(&short, SMART_WALLET_FACTORY, &owners, U256::ZERO).await,
            Err(DeployError::MalformedResponse(_))
        ));
    }
}
