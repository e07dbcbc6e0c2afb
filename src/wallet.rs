//! External wallet signing.
//!
//! An external wallet holds its own keys. The pipeline only ever sees the capability it
//! exposes through [`WalletCapability`], and [`ExternalWalletSigner`] adapts that
//! capability to the common [`Signer`] trait. [`RpcWallet`] talks to a wallet over an
//! EIP-1193 style JSON-RPC endpoint.

use crate::eth::{EthError, Provider};
use crate::signer::{Signer, SignerError, TransactionData};
use crate::transaction::FeeModel;
use alloy::rpc::types::request::{TransactionInput, TransactionRequest};
use alloy_primitives::{Address as EthAddress, Bytes, TxHash, TxKind};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// EIP-1193 "user rejected request" error code.
pub const USER_REJECTED_CODE: i64 = 4001;

/// What an external wallet can do for us. Implementations never expose key material.
#[async_trait]
pub trait WalletCapability: Send + Sync {
    /// Ask the wallet to expose its accounts, prompting the user if needed.
    async fn request_accounts(&self) -> Result<Vec<EthAddress>, SignerError>;

    /// The account currently selected in the wallet, if the user has connected one.
    async fn selected_address(&self) -> Result<Option<EthAddress>, SignerError>;

    /// `personal_sign` of `message` by `account`.
    async fn sign_message(&self, account: EthAddress, message: &[u8])
        -> Result<Bytes, SignerError>;

    /// Sign without broadcasting. Returns the raw signed transaction.
    async fn sign_transaction(
        &self,
        account: EthAddress,
        tx: &TransactionData,
    ) -> Result<Bytes, SignerError>;

    /// Sign and broadcast in one step.
    async fn send_transaction(
        &self,
        account: EthAddress,
        tx: &TransactionData,
    ) -> Result<TxHash, SignerError>;
}

/// [`Signer`] backed by an external wallet.
#[derive(Clone, Default)]
pub struct ExternalWalletSigner {
    wallet: Option<Arc<dyn WalletCapability>>,
}

impl std::fmt::Debug for ExternalWalletSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalWalletSigner")
            .field("connected", &self.wallet.is_some())
            .finish()
    }
}

impl ExternalWalletSigner {
    pub fn new(wallet: Arc<dyn WalletCapability>) -> Self {
        Self {
            wallet: Some(wallet),
        }
    }

    /// A signer with no wallet behind it; every call fails with
    /// [`SignerError::WalletUnavailable`].
    pub fn unavailable() -> Self {
        Self::default()
    }

    fn wallet(&self) -> Result<&Arc<dyn WalletCapability>, SignerError> {
        self.wallet.as_ref().ok_or(SignerError::WalletUnavailable)
    }

    async fn account(&self) -> Result<EthAddress, SignerError> {
        let wallet = self.wallet()?;
        if let Some(address) = wallet.selected_address().await? {
            return Ok(address);
        }
        debug!("no account selected, requesting accounts from wallet");
        wallet
            .request_accounts()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SignerError::SignerUnavailable("wallet exposed no accounts".into()))
    }

    /// Sign and broadcast through the wallet itself.
    pub async fn send_transaction(&self, tx: &TransactionData) -> Result<TxHash, SignerError> {
        let account = self.account().await?;
        self.wallet()?.send_transaction(account, tx).await
    }
}

#[async_trait]
impl Signer for ExternalWalletSigner {
    async fn address(&self) -> Result<EthAddress, SignerError> {
        self.account().await
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Bytes, SignerError> {
        let account = self.account().await?;
        self.wallet()?.sign_message(account, message).await
    }

    async fn sign_transaction(&self, tx: &TransactionData) -> Result<Bytes, SignerError> {
        let account = self.account().await?;
        self.wallet()?.sign_transaction(account, tx).await
    }
}

/// Wallet reached over JSON-RPC (`eth_requestAccounts`, `personal_sign`, ...).
#[derive(Debug, Clone)]
pub struct RpcWallet {
    provider: Provider,
}

impl RpcWallet {
    pub fn new(provider: Provider) -> Self {
        Self { provider }
    }
}

fn wallet_error(e: EthError) -> SignerError {
    match e {
        EthError::RpcError { code, .. } if code == USER_REJECTED_CODE => SignerError::UserRejected,
        EthError::Transport(_) | EthError::RpcTimeout => {
            warn!(error = %e, "wallet endpoint unreachable");
            SignerError::WalletUnavailable
        }
        other => SignerError::SigningFailed(other.to_string()),
    }
}

/// JSON-RPC transaction object for `eth_signTransaction` / `eth_sendTransaction`.
fn transaction_request(from: EthAddress, tx_data: &TransactionData) -> TransactionRequest {
    let tx = &tx_data.transaction;
    let mut request = TransactionRequest {
        from: Some(from),
        to: Some(TxKind::Call(tx.to)),
        value: Some(tx.value),
        gas: Some(tx.gas_limit),
        input: TransactionInput::new(tx.data.clone()),
        nonce: Some(tx_data.nonce),
        chain_id: Some(tx_data.chain_id),
        ..Default::default()
    };
    match tx.fee {
        FeeModel::Legacy { gas_price } => request.gas_price = Some(gas_price),
        FeeModel::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        } => {
            request.max_fee_per_gas = Some(max_fee_per_gas);
            request.max_priority_fee_per_gas = Some(max_priority_fee_per_gas);
        }
    }
    request
}

#[async_trait]
impl WalletCapability for RpcWallet {
    async fn request_accounts(&self) -> Result<Vec<EthAddress>, SignerError> {
        self.provider
            .request("eth_requestAccounts", ())
            .await
            .map_err(wallet_error)
    }

    async fn selected_address(&self) -> Result<Option<EthAddress>, SignerError> {
        let accounts: Vec<EthAddress> = self
            .provider
            .request("eth_accounts", ())
            .await
            .map_err(wallet_error)?;
        Ok(accounts.into_iter().next())
    }

    async fn sign_message(
        &self,
        account: EthAddress,
        message: &[u8],
    ) -> Result<Bytes, SignerError> {
        self.provider
            .request("personal_sign", (Bytes::copy_from_slice(message), account))
            .await
            .map_err(wallet_error)
    }

    async fn sign_transaction(
        &self,
        account: EthAddress,
        tx: &TransactionData,
    ) -> Result<Bytes, SignerError> {
        self.provider
            .request("eth_signTransaction", (transaction_request(account, tx),))
            .await
            .map_err(wallet_error)
    }

    async fn send_transaction(
        &self,
        account: EthAddress,
        tx: &TransactionData,
    ) -> Result<TxHash, SignerError> {
        self.provider
            .request("eth_sendTransaction", (transaction_request(account, tx),))
            .await
            .map_err(wallet_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::{SignedArtifact, SigningPayload};
    use crate::transaction::UnsignedTransaction;
    use crate::user_operation::UserOperation;
    use alloy_primitives::{bytes, U256};
    use parking_lot::Mutex;

    /// Records what it was asked to sign.
    #[derive(Default)]
    struct FakeWallet {
        selected: Option<EthAddress>,
        accounts: Vec<EthAddress>,
        reject: bool,
        signed: Mutex<Vec<(EthAddress, Vec<u8>)>>,
    }

    #[async_trait]
    impl WalletCapability for FakeWallet {
        async fn request_accounts(&self) -> Result<Vec<EthAddress>, SignerError> {
            Ok(self.accounts.clone())
        }

        async fn selected_address(&self) -> Result<Option<EthAddress>, SignerError> {
            Ok(self.selected)
        }

        async fn sign_message(
            &self,
            account: EthAddress,
            message: &[u8],
        ) -> Result<Bytes, SignerError> {
            if self.reject {
                return Err(SignerError::UserRejected);
            }
            self.signed.lock().push((account, message.to_vec()));
            Ok(Bytes::from(vec![0x11; 65]))
        }

        async fn sign_transaction(
            &self,
            _account: EthAddress,
            _tx: &TransactionData,
        ) -> Result<Bytes, SignerError> {
            Ok(bytes!("02f8"))
        }

        async fn send_transaction(
            &self,
            _account: EthAddress,
            _tx: &TransactionData,
        ) -> Result<TxHash, SignerError> {
            Ok(TxHash::ZERO)
        }
    }

    #[tokio::test]
    async fn missing_wallet_is_unavailable() {
        let signer = ExternalWalletSigner::unavailable();
        assert_eq!(signer.address().await, Err(SignerError::WalletUnavailable));
        let err = signer
            .sign(SigningPayload::UserOperation(UserOperation::default()))
            .await
            .unwrap_err();
        assert_eq!(err, SignerError::WalletUnavailable);
    }

    #[tokio::test]
    async fn signs_user_operation_hash_with_selected_account() {
        let account = EthAddress::with_last_byte(9);
        let wallet = Arc::new(FakeWallet {
            selected: Some(account),
            ..Default::default()
        });
        let signer = ExternalWalletSigner::new(wallet.clone());

        let op = UserOperation::default();
        let hash = op.hash();
        let SignedArtifact::UserOperation(signed) = signer
            .sign(SigningPayload::UserOperation(op))
            .await
            .unwrap()
        else {
            panic!("expected a user operation");
        };
        assert_eq!(signed.signature.len(), 65);

        let calls = wallet.signed.lock();
        assert_eq!(calls.as_slice(), &[(account, hash.to_vec())]);
    }

    #[tokio::test]
    async fn falls_back_to_requested_accounts() {
        let account = EthAddress::with_last_byte(3);
        let signer = ExternalWalletSigner::new(Arc::new(FakeWallet {
            accounts: vec![account],
            ..Default::default()
        }));
        assert_eq!(signer.address().await.unwrap(), account);

        let empty = ExternalWalletSigner::new(Arc::new(FakeWallet::default()));
        assert!(matches!(
            empty.address().await,
            Err(SignerError::SignerUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn rejection_is_surfaced() {
        let signer = ExternalWalletSigner::new(Arc::new(FakeWallet {
            selected: Some(EthAddress::ZERO),
            reject: true,
            ..Default::default()
        }));
        assert_eq!(
            signer.sign_message(b"hi").await,
            Err(SignerError::UserRejected)
        );
    }

    #[test]
    fn request_carries_explicit_chain_and_nonce() {
        let tx = TransactionData {
            transaction: UnsignedTransaction {
                to: EthAddress::with_last_byte(1),
                data: bytes!("abcd"),
                value: U256::from(10),
                gas_limit: 50_000,
                fee: FeeModel::Eip1559 {
                    max_fee_per_gas: 3,
                    max_priority_fee_per_gas: 1,
                },
            },
            chain_id: 10,
            nonce: 4,
        };
        let request = transaction_request(EthAddress::with_last_byte(2), &tx);
        assert_eq!(request.chain_id, Some(10));
        assert_eq!(request.nonce, Some(4));
        assert_eq!(request.gas, Some(50_000));
        assert_eq!(request.max_fee_per_gas, Some(3));
        assert_eq!(request.gas_price, None);
    }

    #[test]
    fn rejection_code_maps_to_user_rejected() {
        let rejected = EthError::RpcError {
            code: USER_REJECTED_CODE,
            message: "User denied".into(),
        };
        assert_eq!(wallet_error(rejected), SignerError::UserRejected);
        assert_eq!(
            wallet_error(EthError::RpcTimeout),
            SignerError::WalletUnavailable
        );
        assert!(matches!(
            wallet_error(EthError::RpcError {
                code: -32000,
                message: "nope".into()
            }),
            SignerError::SigningFailed(_)
        ));
    }
}
