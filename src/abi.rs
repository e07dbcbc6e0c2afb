//! Contract interface resolution.
//!
//! Fetches a contract's ABI from a block-explorer style API and, when the contract looks
//! like a proxy, follows exactly one level of indirection to the implementation's ABI.

use crate::eth::{Address, Bytes, EthError, Provider};
use alloy::json_abi::Function;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

/// Getters probed on a proxy, in priority order.
pub const PROXY_GETTERS: [&str; 3] = ["implementation", "getImplementation", "masterCopy"];

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("failed to fetch interface for {address}: {reason}")]
    Fetch { address: Address, reason: String },

    #[error("explorer rejected interface request for {address}: {message}")]
    Explorer { address: Address, message: String },

    #[error("malformed interface document for {address}: {reason}")]
    MalformedAbi { address: Address, reason: String },

    #[error("proxy {proxy} exposes no working implementation getter")]
    ProxyUnresolvable { proxy: Address },
}

/// A single function parameter, as declared in the ABI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDescriptor {
    pub name: String,
    /// Canonical Solidity type, tuples expanded (e.g. `(address,uint256)[]`).
    pub ty: String,
}

/// A callable function of a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub name: String,
    pub inputs: Vec<ParamDescriptor>,
    pub selector: [u8; 4],
    pub signature: String,
    pub state_mutability: String,
}

impl FunctionDescriptor {
    /// Key under which the encoder expects the argument for input `index`.
    pub fn argument_key(&self, index: usize) -> String {
        match self.inputs.get(index) {
            Some(param) if !param.name.is_empty() => param.name.clone(),
            _ => index.to_string(),
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.state_mutability.as_str(), "view" | "pure")
    }
}

impl From<&Function> for FunctionDescriptor {
    fn from(f: &Function) -> Self {
        Self {
            name: f.name.clone(),
            inputs: f
                .inputs
                .iter()
                .map(|p| ParamDescriptor {
                    name: p.name.clone(),
                    ty: p.selector_type().into_owned(),
                })
                .collect(),
            selector: f.selector().0,
            signature: f.signature(),
            state_mutability: f.state_mutability.as_json_str().to_string(),
        }
    }
}

/// The callable surface of a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractInterface {
    /// Address the interface was resolved for (the proxy, when there is one).
    pub address: Address,
    /// Implementation whose ABI was used, when `address` is a proxy.
    pub implementation: Option<Address>,
    pub functions: Vec<FunctionDescriptor>,
}

impl ContractInterface {
    /// Build an interface from a raw ABI JSON array. Only `type: "function"` entries are
    /// kept; for overloaded names the first declaration wins.
    pub fn from_abi_json(address: Address, abi: &str) -> Result<Self, ResolutionError> {
        let malformed = |reason: String| ResolutionError::MalformedAbi { address, reason };

        let items: Vec<serde_json::Value> =
            serde_json::from_str(abi).map_err(|e| malformed(e.to_string()))?;

        let mut functions: Vec<FunctionDescriptor> = Vec::new();
        for item in items {
            if item.get("type").and_then(|t| t.as_str()) != Some("function") {
                continue;
            }
            let function: Function =
                serde_json::from_value(item).map_err(|e| malformed(e.to_string()))?;
            if functions.iter().any(|f| f.name == function.name) {
                warn!(%address, name = %function.name, "skipping overloaded function");
                continue;
            }
            functions.push(FunctionDescriptor::from(&function));
        }

        Ok(Self {
            address,
            implementation: None,
            functions,
        })
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDescriptor> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().map(|f| f.name.as_str())
    }

    /// Whether any proxy marker appears among the function names.
    pub fn is_proxy(&self) -> bool {
        PROXY_GETTERS.iter().any(|g| self.function(g).is_some())
    }
}

/// Parse a 20-byte hex address. Mixed-case input must carry a valid EIP-55 checksum.
pub fn parse_address(input: &str) -> Option<Address> {
    let input = input.trim();
    let hex = input.strip_prefix("0x").or_else(|| input.strip_prefix("0X"))?;
    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let address = Address::from_str(hex).ok()?;
    let has_lower = hex.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = hex.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper && address.to_checksum(None) != format!("0x{hex}") {
        return None;
    }
    Some(address)
}

/// Source of raw ABI documents.
#[async_trait]
pub trait AbiSource: Send + Sync {
    async fn fetch_abi(&self, address: Address) -> Result<ContractInterface, ResolutionError>;
}

/// Executes read-only contract calls.
#[async_trait]
pub trait ContractReader: Send + Sync {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, EthError>;
}

#[async_trait]
impl ContractReader for Provider {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, EthError> {
        Provider::call(self, to, data).await
    }
}

#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    status: String,
    #[serde(default)]
    message: String,
    result: serde_json::Value,
}

/// Etherscan-compatible explorer client (`module=contract&action=getabi`).
#[derive(Debug, Clone)]
pub struct ExplorerClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl ExplorerClient {
    /// Every request made through the client is bounded by `timeout`.
    pub fn new(
        base_url: Url,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    fn endpoint(&self) -> Url {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path().trim_end_matches('/').to_string();
            path.push_str("/api");
            url.set_path(&path);
        }
        url
    }
}

#[async_trait]
impl AbiSource for ExplorerClient {
    async fn fetch_abi(&self, address: Address) -> Result<ContractInterface, ResolutionError> {
        let fetch = |reason: String| ResolutionError::Fetch { address, reason };

        let address_param = address.to_string();
        let mut query = vec![
            ("module", "contract"),
            ("action", "getabi"),
            ("address", address_param.as_str()),
        ];
        if let Some(key) = &self.api_key {
            query.push(("apikey", key.as_str()));
        }

        debug!(%address, "fetching contract interface");
        let response = self
            .http
            .get(self.endpoint())
            .query(&query)
            .send()
            .await
            .map_err(|e| fetch(e.to_string()))?
            .error_for_status()
            .map_err(|e| fetch(e.to_string()))?;

        let body: ExplorerResponse = response.json().await.map_err(|e| {
            ResolutionError::MalformedAbi {
                address,
                reason: e.to_string(),
            }
        })?;

        let result = body.result.as_str().unwrap_or_default();
        if body.status != "1" {
            let message = if result.is_empty() {
                body.message
            } else {
                result.to_string()
            };
            return Err(ResolutionError::Explorer { address, message });
        }

        ContractInterface::from_abi_json(address, result)
    }
}

/// Resolves contract interfaces, following one level of proxy indirection.
#[derive(Clone)]
pub struct AbiResolver {
    source: Arc<dyn AbiSource>,
    reader: Arc<dyn ContractReader>,
}

impl std::fmt::Debug for AbiResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbiResolver").finish_non_exhaustive()
    }
}

impl AbiResolver {
    pub fn new(source: Arc<dyn AbiSource>, reader: Arc<dyn ContractReader>) -> Self {
        Self { source, reader }
    }

    /// Resolve the interface for `address`.
    ///
    /// Returns `Ok(None)` without touching the network when `address` is not a valid
    /// 20-byte hex identifier.
    pub async fn resolve(&self, address: &str) -> Result<Option<ContractInterface>, ResolutionError> {
        let Some(address) = parse_address(address) else {
            debug!(input = address, "not an address, skipping resolution");
            return Ok(None);
        };

        let interface = self.source.fetch_abi(address).await?;
        if !interface.is_proxy() {
            return Ok(Some(interface));
        }

        info!(%address, "proxy markers found, looking up implementation");
        let implementation = self
            .find_implementation(&interface)
            .await
            .ok_or(ResolutionError::ProxyUnresolvable { proxy: address })?;

        info!(proxy = %address, %implementation, "resolved proxy implementation");
        let resolved = self.source.fetch_abi(implementation).await?;
        Ok(Some(ContractInterface {
            address,
            implementation: Some(implementation),
            functions: resolved.functions,
        }))
    }

    /// First getter, in [`PROXY_GETTERS`] order, whose call yields a non-zero address.
    async fn find_implementation(&self, proxy: &ContractInterface) -> Option<Address> {
        for getter in PROXY_GETTERS {
            let Some(function) = proxy.function(getter) else {
                continue;
            };
            let data = Bytes::copy_from_slice(&function.selector);
            match self.reader.call(proxy.address, data).await {
                Ok(output) => match decode_address_word(&output) {
                    Some(implementation) => return Some(implementation),
                    None => debug!(getter, "getter returned no usable address"),
                },
                Err(e) => debug!(getter, error = %e, "getter call failed"),
            }
        }
        None
    }
}

/// Decode an ABI-encoded `address` return value. The zero address counts as absent.
fn decode_address_word(output: &[u8]) -> Option<Address> {
    let word = output.get(..32)?;
    if word[..12].iter().any(|b| *b != 0) {
        return None;
    }
    let address = Address::from_slice(&word[12..]);
    (!address.is_zero()).then_some(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ERC20_ABI: &str = r#"[
        {"type":"constructor","inputs":[{"name":"supply","type":"uint256"}]},
        {"type":"function","name":"transfer","stateMutability":"nonpayable",
         "inputs":[{"name":"to","type":"address"},{"name":"amount","type":"uint256"}],
         "outputs":[{"name":"","type":"bool"}]},
        {"type":"event","name":"Transfer","anonymous":false,
         "inputs":[{"name":"from","type":"address","indexed":true}]},
        {"type":"function","name":"balanceOf","stateMutability":"view",
         "inputs":[{"name":"owner","type":"address"}],
         "outputs":[{"name":"","type":"uint256"}]}
    ]"#;

    #[test]
    fn keeps_only_functions_in_declaration_order() {
        let iface = ContractInterface::from_abi_json(Address::ZERO, ERC20_ABI).unwrap();
        let names: Vec<_> = iface.function_names().collect();
        assert_eq!(names, vec!["transfer", "balanceOf"]);

        let transfer = iface.function("transfer").unwrap();
        assert_eq!(transfer.selector, [0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(transfer.signature, "transfer(address,uint256)");
        assert!(!transfer.is_read_only());
        assert!(iface.function("balanceOf").unwrap().is_read_only());
        assert!(!iface.is_proxy());
    }

    #[test]
    fn first_overload_wins() {
        let abi = r#"[
            {"type":"function","name":"mint","stateMutability":"nonpayable","inputs":[{"name":"to","type":"address"}],"outputs":[]},
            {"type":"function","name":"mint","stateMutability":"nonpayable","inputs":[],"outputs":[]}
        ]"#;
        let iface = ContractInterface::from_abi_json(Address::ZERO, abi).unwrap();
        assert_eq!(iface.functions.len(), 1);
        assert_eq!(iface.functions[0].inputs.len(), 1);
    }

    #[test]
    fn tuple_params_use_canonical_type() {
        let abi = r#"[{"type":"function","name":"exec","stateMutability":"nonpayable",
            "inputs":[{"name":"calls","type":"tuple[]","components":[
                {"name":"target","type":"address"},{"name":"data","type":"bytes"}]}],
            "outputs":[]}]"#;
        let iface = ContractInterface::from_abi_json(Address::ZERO, abi).unwrap();
        assert_eq!(iface.functions[0].inputs[0].ty, "(address,bytes)[]");
    }

    #[test]
    fn unnamed_params_are_keyed_by_position() {
        let abi = r#"[{"type":"function","name":"f","stateMutability":"nonpayable",
            "inputs":[{"name":"","type":"uint8"},{"name":"b","type":"bool"}],"outputs":[]}]"#;
        let iface = ContractInterface::from_abi_json(Address::ZERO, abi).unwrap();
        let f = iface.function("f").unwrap();
        assert_eq!(f.argument_key(0), "0");
        assert_eq!(f.argument_key(1), "b");
    }

    #[test]
    fn malformed_abi_is_rejected() {
        let err = ContractInterface::from_abi_json(Address::ZERO, "Contract source code not verified")
            .unwrap_err();
        assert!(matches!(err, ResolutionError::MalformedAbi { .. }));
    }

    #[test]
    fn address_validation() {
        assert!(parse_address("0x0000000000000000000000000000000000000001").is_some());
        assert!(parse_address("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").is_some());
        assert!(parse_address("0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789").is_some());
        // checksum broken by lowering one letter
        assert!(parse_address("0x5fF137D4b0FDCD49DcA30c7CF57E578a026d2789").is_none());
        assert!(parse_address("0x1234").is_none());
        assert!(parse_address("0000000000000000000000000000000000000001").is_none());
        assert!(parse_address("0xzz00000000000000000000000000000000000001").is_none());
        assert!(parse_address("").is_none());
    }

    #[test]
    fn address_word_decoding() {
        let mut word = [0u8; 32];
        assert_eq!(decode_address_word(&word), None);
        word[31] = 0x42;
        assert_eq!(
            decode_address_word(&word),
            Some(Address::from_str("0x0000000000000000000000000000000000000042").unwrap())
        );
        word[0] = 1;
        assert_eq!(decode_address_word(&word), None);
        assert_eq!(decode_address_word(&[0u8; 20]), None);
    }
}
