//! Build Ethereum transactions and ERC-4337 UserOperations without writing calldata by
//! hand.
//!
//! The stages, in order:
//!
//! 1. [`abi`]: resolve a contract's interface from a block explorer, following proxies.
//! 2. [`encoder`]: turn a function name and string arguments into calldata.
//! 3. [`transaction`]: assemble an unsigned legacy or EIP-1559 transaction.
//! 4. [`user_operation`]: wrap that transaction into an ERC-4337 UserOperation.
//! 5. [`signer`] / [`wallet`]: sign with a raw key or an external wallet.
//! 6. [`submit`]: broadcast the signed transaction or hand the UserOperation to a bundler.
//!
//! [`pipeline::Pipeline`] ties the stages together and keeps the last good output of each.

pub mod abi;
pub mod config;
pub mod deployer;
pub mod encoder;
pub mod eth;
pub mod generation;
pub mod pipeline;
pub mod signer;
pub mod submit;
pub mod transaction;
pub mod user_operation;
pub mod wallet;

pub use abi::{AbiResolver, ContractInterface, ResolutionError};
pub use config::{PipelineConfig, UserOpDefaults, ENTRY_POINT_ADDRESS};
pub use encoder::{encode, EncodedCall, EncodingError};
pub use eth::{EthError, Provider};
pub use pipeline::{Pipeline, PipelineError, PipelineSnapshot, TransactionFields};
pub use signer::{LocalSigner, SignedArtifact, Signer, SignerError, SigningPayload};
pub use submit::{Destination, Dispatcher, SubmissionError, SubmissionResult};
pub use transaction::{AssemblyError, UnsignedTransaction};
pub use user_operation::{UserOpBuilder, UserOperation};
pub use wallet::{ExternalWalletSigner, RpcWallet, WalletCapability};

/// Install a global `tracing` subscriber and the `color-eyre` panic and error hooks.
///
/// `RUST_LOG` overrides `level` when set. With `json` every event is written as one JSON
/// object per line.
#[cfg(feature = "logging")]
pub fn init_logging(level: tracing::Level, json: bool) -> anyhow::Result<()> {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::{
        filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
    };

    color_eyre::install().map_err(|e| anyhow::anyhow!("installing color-eyre: {e}"))?;

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(ErrorLayer::default());

    if json {
        registry.with(fmt::layer().json()).try_init()?;
    } else {
        registry.with(fmt::layer()).try_init()?;
    }
    Ok(())
}
