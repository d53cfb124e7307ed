use crate::bundler_format::WireFormat;
use crate::encoding::{fmt_address, fmt_h256, parse_h256, parse_u256_quantity};
use crate::types::PackedUserOperation;
use anyhow::{anyhow, Context, Result};
use ethers::types::{Address, H256, U256};
use serde_json::Value;
use std::time::Duration;

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(1500);

/// ERC-4337 bundler JSON-RPC client.
#[derive(Debug, Clone)]
pub struct BundlerClient {
    url: String,
    format: WireFormat,
    http: reqwest::Client,
}

/// `eth_estimateUserOperationGas` result. Paymaster fields are only
/// returned for sponsored ops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GasEstimates {
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub paymaster_verification_gas_limit: Option<U256>,
    pub paymaster_post_op_gas_limit: Option<U256>,
}

impl BundlerClient {
    /// Client whose wire framing is picked from the URL.
    pub fn new(url: String) -> Self {
        let format = WireFormat::for_bundler_url(&url);
        Self::with_format(url, format)
    }

    pub fn with_format(url: String, format: WireFormat) -> Self {
        Self {
            url,
            format,
            http: reqwest::Client::new(),
        }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    pub async fn estimate_user_operation_gas(
        &self,
        user_op: &PackedUserOperation,
        entrypoint: Address,
    ) -> Result<GasEstimates> {
        let params = serde_json::json!([self.format.to_json(user_op)?, fmt_address(entrypoint)]);
        let res = self
            .rpc("eth_estimateUserOperationGas", params)
            .await
            .context("eth_estimateUserOperationGas failed")?;
        parse_gas_estimates(&res)
    }

    pub async fn send_user_operation(
        &self,
        user_op: &PackedUserOperation,
        entrypoint: Address,
    ) -> Result<H256> {
        let params = serde_json::json!([self.format.to_json(user_op)?, fmt_address(entrypoint)]);
        tracing::debug!(format = ?self.format, "eth_sendUserOperation");
        let res = self
            .rpc("eth_sendUserOperation", params)
            .await
            .context("eth_sendUserOperation failed")?;
        parse_userop_hash(&res)
    }

    /// `None` while the op is still pending.
    pub async fn get_user_operation_receipt(&self, user_op_hash: H256) -> Result<Option<Value>> {
        let params = serde_json::json!([fmt_h256(user_op_hash)]);
        let res = self.rpc("eth_getUserOperationReceipt", params).await?;
        Ok((!res.is_null()).then_some(res))
    }

    /// Poll for a receipt until timeout. A zero timeout waits forever.
    pub async fn wait_user_operation_receipt(
        &self,
        user_op_hash: H256,
        timeout: Duration,
    ) -> Result<Value> {
        let start = std::time::Instant::now();
        loop {
            if !timeout.is_zero() && start.elapsed() > timeout {
                return Err(anyhow!(
                    "timed out waiting for userOp receipt after {:?}",
                    timeout
                ));
            }

            match self.get_user_operation_receipt(user_op_hash).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                Err(e) => {
                    // transient errors are common on free-tier bundlers; keep polling
                    tracing::warn!(error = %e, "bundler receipt poll error");
                }
            }

            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        let req = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .with_context(|| format!("POST {} failed", self.url))?;

        let status = resp.status();
        let body: Value = resp.json().await.context("failed to decode JSON")?;

        if !status.is_success() {
            return Err(anyhow!("HTTP {}: {}", status, body));
        }

        if let Some(err) = body.get("error") {
            return Err(anyhow!("RPC error: {}", err));
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| anyhow!("missing result field"))
    }
}

fn parse_gas_estimates(res: &Value) -> Result<GasEstimates> {
    Ok(GasEstimates {
        call_gas_limit: parse_u256_field(res, "callGasLimit")?,
        verification_gas_limit: parse_u256_field(res, "verificationGasLimit")?,
        pre_verification_gas: parse_u256_field(res, "preVerificationGas")?,
        paymaster_verification_gas_limit: parse_optional_u256_field(
            res,
            "paymasterVerificationGasLimit",
        )?,
        paymaster_post_op_gas_limit: parse_optional_u256_field(res, "paymasterPostOpGasLimit")?,
    })
}

fn parse_u256_field(v: &Value, key: &str) -> Result<U256> {
    let s = v
        .get(key)
        .and_then(|x| x.as_str())
        .ok_or_else(|| anyhow!("missing or invalid field {key}"))?;
    parse_u256_quantity(s)
}

fn parse_optional_u256_field(v: &Value, key: &str) -> Result<Option<U256>> {
    match v.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(x) => {
            let s = x
                .as_str()
                .ok_or_else(|| anyhow!("invalid field {key}: {x}"))?;
            parse_u256_quantity(s).map(Some)
        }
    }
}

fn parse_userop_hash(res: &Value) -> Result<H256> {
    // Most bundlers return the userOpHash directly as a JSON string.
    // Alchemy's docs (and sometimes responses) wrap it in an object: { "result": "0x..." }.
    // Accept both shapes for maximum compatibility.
    let hash_str = if let Some(s) = res.as_str() {
        s
    } else if let Some(s) = res.get("result").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOpHash").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOperationHash").and_then(|v| v.as_str()) {
        s
    } else {
        return Err(anyhow!(
            "unexpected eth_sendUserOperation result shape (expected string or {{result: ...}}): {}",
            res
        ));
    };

    parse_h256(hash_str)
}
