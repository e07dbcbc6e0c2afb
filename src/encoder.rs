//! Function call encoding.
//!
//! Turns a function name and string arguments keyed by parameter name into standard ABI
//! calldata, converting each string to the Solidity type declared in the interface.

use crate::abi::{parse_address, ContractInterface, FunctionDescriptor};
use alloy::dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{hex, Bytes, B256, U256};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodingError {
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("missing argument `{param}` for {function}")]
    MissingArgument { function: String, param: String },

    #[error("argument `{param}` ({ty}) cannot be parsed from {value:?}: {reason}")]
    ArgumentTypeMismatch {
        param: String,
        ty: String,
        value: String,
        reason: String,
    },

    #[error("unsupported solidity type: {0}")]
    UnsupportedType(String),

    #[error("malformed hex: {0}")]
    MalformedHex(String),
}

/// Calldata split into its selector and ABI-encoded arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedCall {
    pub function_selector: [u8; 4],
    pub argument_bytes: Bytes,
}

impl EncodedCall {
    /// Full calldata: `selector || arguments`.
    pub fn calldata(&self) -> Bytes {
        let mut out = Vec::with_capacity(4 + self.argument_bytes.len());
        out.extend_from_slice(&self.function_selector);
        out.extend_from_slice(&self.argument_bytes);
        out.into()
    }
}

impl fmt::Display for EncodedCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_prefixed(self.calldata()))
    }
}

/// Encode a call to `function_name` on `interface`.
pub fn encode(
    interface: &ContractInterface,
    function_name: &str,
    arguments: &BTreeMap<String, String>,
) -> Result<EncodedCall, EncodingError> {
    let function = interface
        .function(function_name)
        .ok_or_else(|| EncodingError::UnknownFunction(function_name.to_string()))?;
    encode_function(function, arguments)
}

/// Encode a call to an already looked-up function.
pub fn encode_function(
    function: &FunctionDescriptor,
    arguments: &BTreeMap<String, String>,
) -> Result<EncodedCall, EncodingError> {
    let mut values = Vec::with_capacity(function.inputs.len());
    for (index, param) in function.inputs.iter().enumerate() {
        let key = function.argument_key(index);
        let raw = arguments
            .get(&key)
            .ok_or_else(|| EncodingError::MissingArgument {
                function: function.signature.clone(),
                param: key.clone(),
            })?;
        let ty = DynSolType::parse(&param.ty)
            .map_err(|_| EncodingError::UnsupportedType(param.ty.clone()))?;
        let value = coerce(&ty, raw).map_err(|reason| EncodingError::ArgumentTypeMismatch {
            param: key,
            ty: param.ty.clone(),
            value: raw.clone(),
            reason,
        })?;
        values.push(value);
    }

    Ok(EncodedCall {
        function_selector: function.selector,
        argument_bytes: DynSolValue::Tuple(values).abi_encode_params().into(),
    })
}

/// Decode a `0x`-prefixed (or bare) hex string.
pub fn decode_hex(input: &str) -> Result<Vec<u8>, EncodingError> {
    let input = input.trim();
    let digits = input.strip_prefix("0x").unwrap_or(input);
    hex::decode(digits).map_err(|e| EncodingError::MalformedHex(format!("{input}: {e}")))
}

/// Convert a user-supplied string into a value of `ty`.
fn coerce(ty: &DynSolType, raw: &str) -> Result<DynSolValue, String> {
    let trimmed = raw.trim();
    match ty {
        DynSolType::Address => parse_address(trimmed)
            .map(DynSolValue::Address)
            .ok_or_else(|| "expected a 20-byte hex address".to_string()),
        DynSolType::Uint(bits) => {
            let value = parse_uint(trimmed)?;
            if *bits < 256 && value.bit_len() > *bits {
                return Err(format!("value does not fit in uint{bits}"));
            }
            Ok(DynSolValue::Uint(value, *bits))
        }
        DynSolType::Bool => match trimmed {
            "true" => Ok(DynSolValue::Bool(true)),
            "false" => Ok(DynSolValue::Bool(false)),
            _ => Err("expected `true` or `false`".to_string()),
        },
        DynSolType::Bytes => decode_hex(trimmed)
            .map(DynSolValue::Bytes)
            .map_err(|e| e.to_string()),
        DynSolType::FixedBytes(size) => {
            let bytes = decode_hex(trimmed).map_err(|e| e.to_string())?;
            if bytes.len() != *size {
                return Err(format!("expected {size} bytes, got {}", bytes.len()));
            }
            let mut word = B256::ZERO;
            word[..*size].copy_from_slice(&bytes);
            Ok(DynSolValue::FixedBytes(word, *size))
        }
        DynSolType::String => Ok(DynSolValue::String(raw.to_string())),
        // intN, arrays and tuples go through the dynamic ABI parser
        _ => ty.coerce_str(trimmed).map_err(|e| e.to_string()),
    }
}

/// Parse an unsigned integer given in decimal or `0x` hex.
fn parse_uint(input: &str) -> Result<U256, String> {
    let (digits, radix) = match input.strip_prefix("0x") {
        Some(hex) => (hex, 16),
        None => (input, 10),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return Err("expected an unsigned integer".to_string());
    }
    U256::from_str_radix(digits, radix as u64).map_err(|e| e.to_string())
}
