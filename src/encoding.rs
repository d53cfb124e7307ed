use crate::error::EncodingError;
use crate::types::PackedUserOperation;
use ethers::types::{Address, Bytes, H256, U256};

pub fn fmt_address(addr: Address) -> String {
    format!("0x{}", hex::encode(addr.as_bytes()))
}

pub fn fmt_h256(h: H256) -> String {
    format!("0x{}", hex::encode(h.as_bytes()))
}

/// JSON-RPC "quantity" encoding.
pub fn fmt_u256(v: U256) -> String {
    if v.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{:x}", v)
    }
}

pub fn fmt_bytes(b: &[u8]) -> String {
    format!("0x{}", hex::encode(b))
}

/// v0.7 packed shape: `factory`/`factoryData` only when the sender is undeployed.
pub fn user_op_to_json(op: &PackedUserOperation) -> serde_json::Value {
    let mut v = serde_json::json!({
        "sender": fmt_address(op.sender),
        "nonce": fmt_u256(op.nonce),
        "callData": fmt_bytes(&op.call_data),
        "accountGasLimits": fmt_bytes(op.account_gas_limits.as_bytes()),
        "preVerificationGas": fmt_u256(op.pre_verification_gas),
        "gasFees": fmt_bytes(op.gas_fees.as_bytes()),
        "paymasterAndData": fmt_bytes(&op.paymaster_and_data),
        "signature": fmt_bytes(&op.signature),
    });
    if let (Some(init), Some(obj)) = (&op.init, v.as_object_mut()) {
        obj.insert("factory".into(), fmt_address(init.factory).into());
        obj.insert("factoryData".into(), fmt_bytes(&init.factory_data).into());
    }
    v
}

pub fn parse_u256_quantity(s: &str) -> anyhow::Result<U256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(U256::zero());
    }
    Ok(U256::from_str_radix(s, 16)?)
}

pub fn parse_h256(s: &str) -> anyhow::Result<H256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s)?;
    if bytes.len() != 32 {
        anyhow::bail!("expected 32-byte hex, got {} bytes", bytes.len());
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(H256(arr))
}

/// `0x`-prefixed (or bare) hex to bytes. `"0x"` is empty.
pub fn parse_bytes(s: &str) -> Result<Bytes, EncodingError> {
    let s = s.trim();
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s)
        .map(Bytes::from)
        .map_err(|e| EncodingError::Hex(e.to_string()))
}
