//! The construction pipeline: resolve, encode, assemble, sign and submit.
//!
//! [`Pipeline`] keeps the last-known-good output of every stage. Synchronous stages
//! (encoding and transaction assembly) recompute as soon as one of their inputs changes.
//! Async stages are guarded by generation tickets so that a result computed from
//! superseded input is dropped instead of overwriting newer state.

use crate::abi::{AbiResolver, ContractInterface, ExplorerClient, ResolutionError};
use crate::config::PipelineConfig;
use crate::encoder::{encode, EncodedCall, EncodingError};
use crate::eth::Provider;
use crate::generation::{Generations, Stage, Ticket};
use crate::signer::{SignedArtifact, Signer, SignerError, SigningPayload, TransactionData};
use crate::submit::{Destination, Dispatcher, SubmissionError, SubmissionResult};
use crate::transaction::{
    assemble, AssemblyError, Calldata, FeeInput, TransactionInput, UnsignedTransaction,
};
use crate::user_operation::{UserOpBuilder, UserOperation};
use alloy_primitives::{Address, U256};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Signing(#[from] SignerError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error("building HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("nothing to {0} yet")]
    MissingInput(Stage),

    #[error("{stage} result discarded, its input changed while it was in flight")]
    Stale { stage: Stage },
}

/// Transaction fields as entered by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionFields {
    pub to: String,
    pub value_eth: String,
    pub gas_limit: String,
    pub fees: FeeInput,
    /// Hand-written calldata. When absent the current encoded call is used.
    pub raw_data: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    generations: Generations,
    contract_address: String,
    interface: Option<ContractInterface>,
    function: Option<String>,
    arguments: BTreeMap<String, String>,
    encoded: Option<EncodedCall>,
    fields: Option<TransactionFields>,
    transaction: Option<UnsignedTransaction>,
    user_operation: Option<UserOperation>,
    signed: Option<SignedArtifact>,
    submission: Option<SubmissionResult>,
}

impl State {
    /// Re-encode the selected call.
    ///
    /// Until every parameter has a value there is nothing to encode and the call is
    /// cleared. Any other failure leaves the previous encoding in place.
    fn reencode(&mut self) -> Result<Option<EncodedCall>, PipelineError> {
        self.generations.advance(Stage::Encode);
        let (Some(interface), Some(function)) = (&self.interface, &self.function) else {
            self.replace_encoded(None);
            return Ok(None);
        };
        let call = match encode(interface, function, &self.arguments) {
            Ok(call) => call,
            Err(EncodingError::MissingArgument { param, .. }) => {
                debug!(function = %function, %param, "waiting for arguments");
                self.replace_encoded(None);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        debug!(function = %function, calldata = %call, "encoded call");
        self.replace_encoded(Some(call.clone()));
        Ok(Some(call))
    }

    /// Store a new encoding and rebuild the transaction when it carries encoded calldata.
    ///
    /// A transaction that fails to rebuild stays as it was, along with everything signed
    /// from it.
    fn replace_encoded(&mut self, call: Option<EncodedCall>) {
        if self.encoded == call {
            return;
        }
        self.encoded = call;
        if matches!(&self.fields, Some(f) if f.raw_data.is_none()) {
            if let Err(e) = self.reassemble() {
                warn!(error = %e, "transaction not rebuilt, keeping the previous one");
            }
        }
    }

    fn reassemble(&mut self) -> Result<Option<UnsignedTransaction>, PipelineError> {
        self.generations.advance(Stage::Transaction);
        let Some(fields) = &self.fields else {
            return Ok(None);
        };
        let data = match (&fields.raw_data, &self.encoded) {
            (Some(raw), _) => Calldata::Raw(raw.clone()),
            (None, Some(call)) => Calldata::Encoded(call.clone()),
            (None, None) => Calldata::Raw(String::new()),
        };
        let transaction = assemble(&TransactionInput {
            to: fields.to.clone(),
            data,
            value_eth: fields.value_eth.clone(),
            gas_limit: fields.gas_limit.clone(),
            fees: fields.fees.clone(),
        })?;
        if self.transaction.as_ref() != Some(&transaction) {
            self.transaction = Some(transaction.clone());
            self.clear_after(Stage::Transaction);
        }
        Ok(Some(transaction))
    }

    /// Drop the stored outputs of every stage after `stage`.
    fn clear_after(&mut self, stage: Stage) {
        for s in stage.and_downstream().skip(1) {
            let cleared = match s {
                Stage::Resolve => false,
                Stage::Encode => self.encoded.take().is_some(),
                Stage::Transaction => self.transaction.take().is_some(),
                Stage::UserOperation => self.user_operation.take().is_some(),
                Stage::Sign => self.signed.take().is_some(),
                Stage::Submit => self.submission.take().is_some(),
            };
            if cleared {
                debug!(stage = %s, "cleared output built from superseded input");
            }
        }
    }

    fn check(&self, ticket: Ticket) -> Result<(), PipelineError> {
        if self.generations.is_current(ticket) {
            Ok(())
        } else {
            debug!(stage = %ticket.stage, "discarding stale result");
            Err(PipelineError::Stale {
                stage: ticket.stage,
            })
        }
    }
}

/// Last-known-good outputs of every stage.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSnapshot {
    pub contract_address: String,
    pub interface: Option<ContractInterface>,
    pub function: Option<String>,
    pub arguments: BTreeMap<String, String>,
    /// `0x`-prefixed calldata of the current encoded call.
    pub calldata_preview: Option<String>,
    pub transaction: Option<UnsignedTransaction>,
    pub user_operation: Option<UserOperation>,
    pub signed: Option<SignedArtifact>,
    pub submission: Option<SubmissionResult>,
}

/// Drives a call from contract address to submitted transaction or UserOperation.
///
/// Each stage keeps its last good output. Replacing an output clears everything that was
/// built from the old one, so signing and submission always act on current input.
pub struct Pipeline {
    resolver: AbiResolver,
    user_ops: UserOpBuilder,
    dispatcher: Dispatcher,
    state: Mutex<State>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("resolver", &self.resolver)
            .field("user_ops", &self.user_ops)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Wire up the explorer, node and bundler clients described by `config`.
    pub fn new(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let timeout = config.request_timeout();
        let explorer = ExplorerClient::new(
            config.explorer_url.clone(),
            config.explorer_api_key.clone(),
            timeout,
        )?;
        let provider = Arc::new(Provider::with_timeout(config.rpc_url.clone(), timeout));
        Ok(Self::with_components(
            AbiResolver::new(Arc::new(explorer), provider.clone()),
            UserOpBuilder::new(config.user_op.clone(), provider),
            Dispatcher::new(timeout),
        ))
    }

    /// Assemble a pipeline from already configured stage clients.
    pub fn with_components(
        resolver: AbiResolver,
        user_ops: UserOpBuilder,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            resolver,
            user_ops,
            dispatcher,
            state: Mutex::new(State::default()),
        }
    }

    /// Point the pipeline at a contract and resolve its interface.
    ///
    /// An input that is not an address yields `Ok(None)` and leaves the previous
    /// interface in place.
    pub async fn set_contract(
        &self,
        address: &str,
    ) -> Result<Option<ContractInterface>, PipelineError> {
        let ticket = {
            let mut state = self.state.lock();
            state.contract_address = address.to_string();
            state.generations.advance(Stage::Resolve)
        };

        let resolved = self.resolver.resolve(address).await;

        let mut state = self.state.lock();
        state.check(ticket)?;
        let Some(interface) = resolved? else {
            return Ok(None);
        };
        info!(
            address = %interface.address,
            functions = interface.functions.len(),
            "contract interface resolved"
        );
        if let Some(function) = &state.function {
            if interface.function(function).is_none() {
                warn!(%function, "selected function is not part of the new interface");
                state.function = None;
                state.arguments.clear();
            }
        }
        state.interface = Some(interface.clone());
        if let Err(e) = state.reencode() {
            warn!(error = %e, "selected call no longer encodes against the new interface");
            state.replace_encoded(None);
        }
        Ok(Some(interface))
    }

    /// Select the function to call. Arguments entered for a previous function are dropped.
    ///
    /// Returns `Ok(None)` while some of the function's parameters have no value yet.
    pub fn select_function(&self, name: &str) -> Result<Option<EncodedCall>, PipelineError> {
        let mut state = self.state.lock();
        let known = state
            .interface
            .as_ref()
            .is_some_and(|iface| iface.function(name).is_some());
        if !known {
            return Err(EncodingError::UnknownFunction(name.to_string()).into());
        }
        if state.function.as_deref() != Some(name) {
            state.function = Some(name.to_string());
            state.arguments.clear();
        }
        state.reencode()
    }

    /// Set one argument, keyed by parameter name (or position for unnamed parameters).
    ///
    /// A value that does not coerce to its parameter's type is an error and the last good
    /// encoding is kept.
    pub fn set_argument(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Option<EncodedCall>, PipelineError> {
        let mut state = self.state.lock();
        state.arguments.insert(key.to_string(), value.to_string());
        state.reencode()
    }

    /// Replace the transaction fields and reassemble.
    ///
    /// On failure the previous transaction stays current.
    pub fn set_transaction_fields(
        &self,
        fields: TransactionFields,
    ) -> Result<UnsignedTransaction, PipelineError> {
        let mut state = self.state.lock();
        state.fields = Some(fields);
        state
            .reassemble()?
            .ok_or(PipelineError::MissingInput(Stage::Transaction))
    }

    /// Wrap the current transaction's calldata in an unsigned UserOperation for `sender`.
    pub async fn build_user_operation(
        &self,
        sender: Address,
        nonce: U256,
    ) -> Result<UserOperation, PipelineError> {
        let (ticket, transaction) = {
            let mut state = self.state.lock();
            let transaction = state
                .transaction
                .clone()
                .ok_or(PipelineError::MissingInput(Stage::UserOperation))?;
            (state.generations.advance(Stage::UserOperation), transaction)
        };

        let op = self.user_ops.assemble(sender, nonce, &transaction).await;

        let mut state = self.state.lock();
        state.check(ticket)?;
        info!(user_op_hash = %op.hash(), "user operation assembled");
        if state.user_operation.as_ref() != Some(&op) {
            state.user_operation = Some(op.clone());
            state.clear_after(Stage::UserOperation);
        }
        Ok(op)
    }

    /// Sign the current UserOperation with `signer`.
    pub async fn sign_user_operation(
        &self,
        signer: &dyn Signer,
    ) -> Result<SignedArtifact, PipelineError> {
        let (ticket, op) = {
            let mut state = self.state.lock();
            let op = state
                .user_operation
                .clone()
                .ok_or(PipelineError::MissingInput(Stage::Sign))?;
            (state.generations.advance(Stage::Sign), op)
        };
        self.sign(ticket, signer, SigningPayload::UserOperation(op))
            .await
    }

    /// Sign the current transaction. Chain id and nonce are always given by the caller.
    pub async fn sign_transaction(
        &self,
        signer: &dyn Signer,
        chain_id: u64,
        nonce: u64,
    ) -> Result<SignedArtifact, PipelineError> {
        let (ticket, transaction) = {
            let mut state = self.state.lock();
            let transaction = state
                .transaction
                .clone()
                .ok_or(PipelineError::MissingInput(Stage::Sign))?;
            (state.generations.advance(Stage::Sign), transaction)
        };
        let payload = SigningPayload::Transaction(TransactionData {
            transaction,
            chain_id,
            nonce,
        });
        self.sign(ticket, signer, payload).await
    }

    async fn sign(
        &self,
        ticket: Ticket,
        signer: &dyn Signer,
        payload: SigningPayload,
    ) -> Result<SignedArtifact, PipelineError> {
        let signed = signer.sign(payload).await;

        let mut state = self.state.lock();
        state.check(ticket)?;
        let signed = signed?;
        if state.signed.as_ref() != Some(&signed) {
            state.signed = Some(signed.clone());
            state.clear_after(Stage::Sign);
        }
        Ok(signed)
    }

    /// Send the last signed artifact to `destination`.
    pub async fn submit(
        &self,
        destination: &Destination,
        endpoint_url: &str,
    ) -> Result<SubmissionResult, PipelineError> {
        let (ticket, artifact) = {
            let mut state = self.state.lock();
            let artifact = state
                .signed
                .clone()
                .ok_or(PipelineError::MissingInput(Stage::Submit))?;
            (state.generations.advance(Stage::Submit), artifact)
        };

        let result = self
            .dispatcher
            .submit(&artifact, destination, endpoint_url)
            .await;

        let mut state = self.state.lock();
        state.check(ticket)?;
        let result = result?;
        state.submission = Some(result.clone());
        Ok(result)
    }

    /// Copy out the current output of every stage.
    pub fn snapshot(&self) -> PipelineSnapshot {
        let state = self.state.lock();
        PipelineSnapshot {
            contract_address: state.contract_address.clone(),
            interface: state.interface.clone(),
            function: state.function.clone(),
            arguments: state.arguments.clone(),
            calldata_preview: state.encoded.as_ref().map(ToString::to_string),
            transaction: state.transaction.clone(),
            user_operation: state.user_operation.clone(),
            signed: state.signed.clone(),
            submission: state.submission.clone(),
        }
    }
}
