//! Pipeline configuration.
//!
//! Every fixed constant the assemblers rely on lives here so that it can be injected and
//! overridden instead of being inlined at the call site.

use alloy_primitives::{address, Address, U256};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// ERC-4337 v0.6 EntryPoint singleton.
pub const ENTRY_POINT_ADDRESS: Address = address!("5FF137D4b0FDCD49DcA30c7CF57E578a026d2789");

const GWEI: u128 = 1_000_000_000;

/// Fallback gas and fee values used when building UserOperations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserOpDefaults {
    pub default_call_gas_limit: U256,
    pub default_verification_gas_limit: U256,
    pub default_pre_verification_gas: U256,
    /// Used when the fee oracle has no max fee.
    pub default_max_fee_per_gas: u128,
    /// Used when the fee oracle has no priority fee.
    pub default_max_priority_fee_per_gas: u128,
}

impl Default for UserOpDefaults {
    fn default() -> Self {
        Self {
            default_call_gas_limit: U256::from(300_000),
            default_verification_gas_limit: U256::from(200_000),
            default_pre_verification_gas: U256::from(50_000),
            default_max_fee_per_gas: 50 * GWEI,
            default_max_priority_fee_per_gas: 1_500_000_000,
        }
    }
}

impl UserOpDefaults {
    pub fn new() -> Self {
        Default::default()
    }
    pub fn with_call_gas_limit(mut self, gas: u64) -> Self {
        self.default_call_gas_limit = U256::from(gas);
        self
    }
    pub fn with_verification_gas_limit(mut self, gas: u64) -> Self {
        self.default_verification_gas_limit = U256::from(gas);
        self
    }
    pub fn with_pre_verification_gas(mut self, gas: u64) -> Self {
        self.default_pre_verification_gas = U256::from(gas);
        self
    }
    pub fn with_fees(mut self, max_fee_per_gas: u128, max_priority_fee_per_gas: u128) -> Self {
        self.default_max_fee_per_gas = max_fee_per_gas;
        self.default_max_priority_fee_per_gas = max_priority_fee_per_gas;
        self
    }
}

/// Endpoints and defaults shared by all pipeline stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Base URL of an Etherscan-compatible explorer; `/api` is appended.
    pub explorer_url: Url,
    pub explorer_api_key: Option<String>,
    /// Node used for proxy getter calls and fee data.
    pub rpc_url: Url,
    pub entry_point: Address,
    pub request_timeout_secs: u64,
    pub user_op: UserOpDefaults,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            explorer_url: Url::parse("https://api.basescan.org").expect("static url"),
            explorer_api_key: None,
            rpc_url: Url::parse("https://mainnet.base.org").expect("static url"),
            entry_point: ENTRY_POINT_ADDRESS,
            request_timeout_secs: 30,
            user_op: UserOpDefaults::default(),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Default::default()
    }
    pub fn with_explorer(mut self, url: Url, api_key: Option<String>) -> Self {
        self.explorer_url = url;
        self.explorer_api_key = api_key;
        self
    }
    pub fn with_rpc_url(mut self, url: Url) -> Self {
        self.rpc_url = url;
        self
    }
    pub fn with_entry_point(mut self, entry_point: Address) -> Self {
        self.entry_point = entry_point;
        self
    }
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs().max(1);
        self
    }
    pub fn with_user_op_defaults(mut self, defaults: UserOpDefaults) -> Self {
        self.user_op = defaults;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Apply `TX_WORKBENCH_*` environment overrides on top of `self`.
    pub fn from_env(self) -> anyhow::Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        if let Some(url) = var("TX_WORKBENCH_EXPLORER_URL") {
            self.explorer_url = Url::parse(&url).context("TX_WORKBENCH_EXPLORER_URL")?;
        }
        if let Some(key) = var("TX_WORKBENCH_EXPLORER_API_KEY") {
            self.explorer_api_key = Some(key);
        }
        if let Some(url) = var("TX_WORKBENCH_RPC_URL") {
            self.rpc_url = Url::parse(&url).context("TX_WORKBENCH_RPC_URL")?;
        }
        if let Some(entry_point) = var("TX_WORKBENCH_ENTRY_POINT") {
            self.entry_point = entry_point
                .parse()
                .context("TX_WORKBENCH_ENTRY_POINT")?;
        }
        if let Some(secs) = var("TX_WORKBENCH_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = secs
                .parse()
                .context("TX_WORKBENCH_REQUEST_TIMEOUT_SECS")?;
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_values() {
        let d = UserOpDefaults::default();
        assert_eq!(d.default_call_gas_limit, U256::from(300_000));
        assert_eq!(d.default_verification_gas_limit, U256::from(200_000));
        assert_eq!(d.default_pre_verification_gas, U256::from(50_000));
        assert_eq!(d.default_max_fee_per_gas, 50_000_000_000);
        assert_eq!(d.default_max_priority_fee_per_gas, 1_500_000_000);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: PipelineConfig = serde_json::from_str(
            r#"{"explorerApiKey":"k","userOp":{"defaultCallGasLimit":"0x1"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.explorer_api_key.as_deref(), Some("k"));
        assert_eq!(cfg.user_op.default_call_gas_limit, U256::from(1));
        assert_eq!(cfg.user_op.default_verification_gas_limit, U256::from(200_000));
        assert_eq!(cfg.entry_point, ENTRY_POINT_ADDRESS);
    }

    #[test]
    fn env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("TX_WORKBENCH_RPC_URL", "http://localhost:8545"),
            ("TX_WORKBENCH_REQUEST_TIMEOUT_SECS", "5"),
        ]);
        let cfg = PipelineConfig::default()
            .with_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.rpc_url.as_str(), "http://localhost:8545/");
        assert_eq!(cfg.request_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.explorer_url.as_str(), "https://api.basescan.org/");

        let bad = PipelineConfig::default()
            .with_overrides(|k| (k == "TX_WORKBENCH_ENTRY_POINT").then(|| "nope".to_string()));
        assert!(bad.is_err());
    }
}
