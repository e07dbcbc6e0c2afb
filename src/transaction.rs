//! Unsigned transaction assembly.
//!
//! Pure conversion of user-facing strings (ETH amounts, gas fields, hex calldata) into an
//! [`UnsignedTransaction`]. Nothing here touches the network.

use crate::abi::parse_address;
use crate::encoder::{decode_hex, EncodedCall};
use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Wei per ETH.
pub const WEI_PER_ETH: u128 = 1_000_000_000_000_000_000;
const ETH_DECIMALS: usize = 18;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("invalid numeric input for {field}: {value:?}")]
    InvalidNumericInput { field: &'static str, value: String },

    #[error("invalid recipient address: {0:?}")]
    InvalidAddress(String),

    #[error("malformed calldata hex: {0}")]
    MalformedHex(String),
}

/// An amount of ETH held as an exact number of wei.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct EthAmount {
    wei_value: U256,
}

impl EthAmount {
    pub const fn from_wei(wei_value: U256) -> Self {
        Self { wei_value }
    }

    /// Parse a decimal ETH string such as `"1.5"` or `".25"` using 18-decimal fixed point.
    /// An empty string is zero.
    pub fn from_eth_str(input: &str) -> Result<Self, AssemblyError> {
        let invalid = || AssemblyError::InvalidNumericInput {
            field: "value",
            value: input.to_string(),
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }

        let (whole, fraction) = match trimmed.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (trimmed, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
        if !all_digits(whole) || !all_digits(fraction) || fraction.len() > ETH_DECIMALS {
            return Err(invalid());
        }

        let whole = if whole.is_empty() {
            U256::ZERO
        } else {
            U256::from_str_radix(whole, 10).map_err(|_| invalid())?
        };
        let padded = format!("{fraction:0<width$}", width = ETH_DECIMALS);
        let fraction = U256::from_str_radix(&padded, 10).map_err(|_| invalid())?;

        let wei_value = whole
            .checked_mul(U256::from(WEI_PER_ETH))
            .and_then(|w| w.checked_add(fraction))
            .ok_or_else(invalid)?;
        Ok(Self { wei_value })
    }

    pub fn as_wei(&self) -> U256 {
        self.wei_value
    }
}

impl fmt::Display for EthAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = U256::from(WEI_PER_ETH);
        let whole = self.wei_value / unit;
        let fraction = self.wei_value % unit;
        if fraction.is_zero() {
            return write!(f, "{whole} ETH");
        }
        let fraction = format!("{:0>width$}", fraction.to_string(), width = ETH_DECIMALS);
        write!(f, "{whole}.{} ETH", fraction.trim_end_matches('0'))
    }
}

/// Parse a decimal gas quantity.
pub fn parse_gas_u64(field: &'static str, input: &str) -> Result<u64, AssemblyError> {
    parse_decimal(field, input)?
        .try_into()
        .map_err(|_| AssemblyError::InvalidNumericInput {
            field,
            value: input.to_string(),
        })
}

/// Parse a decimal wei amount that must fit in 128 bits (fee fields).
pub fn parse_wei_u128(field: &'static str, input: &str) -> Result<u128, AssemblyError> {
    parse_decimal(field, input)?
        .try_into()
        .map_err(|_| AssemblyError::InvalidNumericInput {
            field,
            value: input.to_string(),
        })
}

fn parse_decimal(field: &'static str, input: &str) -> Result<U256, AssemblyError> {
    let trimmed = input.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Err(AssemblyError::InvalidNumericInput {
            field,
            value: input.to_string(),
        });
    }
    U256::from_str_radix(trimmed, 10).map_err(|_| AssemblyError::InvalidNumericInput {
        field,
        value: input.to_string(),
    })
}

/// Which fee model a transaction pays with. Exactly one is ever populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FeeModel {
    #[serde(rename_all = "camelCase")]
    Legacy { gas_price: u128 },
    #[serde(rename_all = "camelCase")]
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
}

/// Fee fields as typed by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeeInput {
    Legacy {
        gas_price: String,
    },
    Eip1559 {
        max_fee_per_gas: String,
        max_priority_fee_per_gas: String,
    },
}

impl FeeInput {
    fn parse(&self) -> Result<FeeModel, AssemblyError> {
        Ok(match self {
            Self::Legacy { gas_price } => FeeModel::Legacy {
                gas_price: parse_wei_u128("gasPrice", gas_price)?,
            },
            Self::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => FeeModel::Eip1559 {
                max_fee_per_gas: parse_wei_u128("maxFeePerGas", max_fee_per_gas)?,
                max_priority_fee_per_gas: parse_wei_u128(
                    "maxPriorityFeePerGas",
                    max_priority_fee_per_gas,
                )?,
            },
        })
    }
}

/// Calldata source: the encoder's output or hand-written hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Calldata {
    Encoded(EncodedCall),
    Raw(String),
}

impl Calldata {
    fn to_bytes(&self) -> Result<Bytes, AssemblyError> {
        match self {
            Self::Encoded(call) => Ok(call.calldata()),
            Self::Raw(hex) => {
                let trimmed = hex.trim();
                if trimmed.is_empty() {
                    return Ok(Bytes::new());
                }
                decode_hex(trimmed)
                    .map(Bytes::from)
                    .map_err(|e| AssemblyError::MalformedHex(e.to_string()))
            }
        }
    }
}

/// Everything the assembler needs, as entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInput {
    pub to: String,
    pub data: Calldata,
    pub value_eth: String,
    pub gas_limit: String,
    pub fees: FeeInput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedTransaction {
    pub to: Address,
    pub data: Bytes,
    /// Value in wei.
    pub value: U256,
    pub gas_limit: u64,
    pub fee: FeeModel,
}

/// Build an [`UnsignedTransaction`] from operator input.
pub fn assemble(input: &TransactionInput) -> Result<UnsignedTransaction, AssemblyError> {
    let to = parse_address(&input.to).ok_or_else(|| AssemblyError::InvalidAddress(input.to.clone()))?;
    Ok(UnsignedTransaction {
        to,
        data: input.data.to_bytes()?,
        value: EthAmount::from_eth_str(&input.value_eth)?.as_wei(),
        gas_limit: parse_gas_u64("gasLimit", &input.gas_limit)?,
        fee: input.fees.parse()?,
    })
}
