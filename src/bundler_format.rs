use crate::error::EncodingError;
use crate::gas::PackedGasPair;
use crate::paymaster;
use crate::types::{AccountInit, PackedUserOperation};
use ethers::types::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

/// v0.7 UserOperation with every packed field split into its own hex value.
///
/// Same values as [`PackedUserOperation`], different framing. The hash is
/// always computed over the packed form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatUserOperation {
    pub sender: Address,
    pub nonce: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory_data: Option<Bytes>,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_verification_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_post_op_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_data: Option<Bytes>,
    pub signature: Bytes,
}

impl FlatUserOperation {
    /// Unpack the gas words and split `paymasterAndData`.
    pub fn from_packed(op: &PackedUserOperation) -> Result<Self, EncodingError> {
        let (verification_gas_limit, call_gas_limit) = op.account_gas_limits.unpack();
        let (max_priority_fee_per_gas, max_fee_per_gas) = op.gas_fees.unpack();
        let pm = paymaster::decode(&op.paymaster_and_data)?;

        Ok(Self {
            sender: op.sender,
            nonce: op.nonce,
            factory: op.factory(),
            factory_data: op.factory_data().cloned(),
            call_data: op.call_data.clone(),
            call_gas_limit: call_gas_limit.into(),
            verification_gas_limit: verification_gas_limit.into(),
            pre_verification_gas: op.pre_verification_gas,
            max_fee_per_gas: max_fee_per_gas.into(),
            max_priority_fee_per_gas: max_priority_fee_per_gas.into(),
            paymaster: pm.as_ref().map(|p| p.paymaster),
            paymaster_verification_gas_limit: pm
                .as_ref()
                .map(|p| p.verification_gas_limit.into()),
            paymaster_post_op_gas_limit: pm.as_ref().map(|p| p.post_op_gas_limit.into()),
            paymaster_data: pm.map(|p| p.paymaster_data),
            signature: op.signature.clone(),
        })
    }

    /// Inverse of [`FlatUserOperation::from_packed`].
    pub fn into_packed(self) -> Result<PackedUserOperation, EncodingError> {
        let init = match (self.factory, self.factory_data) {
            (Some(factory), Some(factory_data)) => Some(AccountInit {
                factory,
                factory_data,
            }),
            (None, None) => None,
            (None, Some(data)) if data.is_empty() => None,
            _ => return Err(EncodingError::Inconsistent("factory and factoryData must be set together")),
        };

        let paymaster_and_data = match self.paymaster {
            None => {
                if self.paymaster_data.as_ref().is_some_and(|d| !d.is_empty()) {
                    return Err(EncodingError::Inconsistent(
                        "paymasterData without paymaster",
                    ));
                }
                Bytes::new()
            }
            Some(pm) => {
                let gas = PackedGasPair::paymaster_gas_limits(
                    self.paymaster_verification_gas_limit.unwrap_or_default(),
                    self.paymaster_post_op_gas_limit.unwrap_or_default(),
                )?;
                paymaster::encode(pm, gas, &self.paymaster_data.unwrap_or_default())
            }
        };

        Ok(PackedUserOperation {
            sender: self.sender,
            nonce: self.nonce,
            init,
            call_data: self.call_data,
            account_gas_limits: PackedGasPair::account_gas_limits(
                self.verification_gas_limit,
                self.call_gas_limit,
            )?,
            pre_verification_gas: self.pre_verification_gas,
            gas_fees: PackedGasPair::gas_fees(
                self.max_priority_fee_per_gas,
                self.max_fee_per_gas,
            )?,
            paymaster_and_data,
            signature: self.signature,
        })
    }
}

/// JSON framing a bundler accepts for `eth_sendUserOperation`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WireFormat {
    /// `accountGasLimits` / `gasFees` / `paymasterAndData` as packed words.
    #[default]
    Packed,
    /// Every sub-field as its own hex quantity.
    Flat,
}

impl WireFormat {
    /// Bundlers known to reject the packed fields get [`WireFormat::Flat`].
    pub fn for_bundler_url(url: &str) -> Self {
        let url = url.to_ascii_lowercase();
        if url.contains("alchemy.com") {
            WireFormat::Flat
        } else {
            WireFormat::Packed
        }
    }

    pub fn to_json(&self, op: &PackedUserOperation) -> Result<serde_json::Value, EncodingError> {
        match self {
            WireFormat::Packed => Ok(crate::encoding::user_op_to_json(op)),
            WireFormat::Flat => {
                let flat = FlatUserOperation::from_packed(op)?;
                serde_json::to_value(flat).map_err(|e| EncodingError::Abi(e.to_string()))
            }
        }
    }
}
