use crate::error::EncodingError;
use ethers::types::{H256, U256};

/// Two 128-bit integers packed into one 32-byte word: `high << 128 | low`.
///
/// EntryPoint v0.7 uses this layout for `accountGasLimits`
/// (verificationGasLimit, callGasLimit), `gasFees`
/// (maxPriorityFeePerGas, maxFeePerGas) and the paymaster gas pair inside
/// `paymasterAndData` (paymasterVerificationGasLimit, paymasterPostOpGasLimit).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PackedGasPair([u8; 32]);

impl PackedGasPair {
    pub fn pack(high: U256, low: U256) -> Result<Self, EncodingError> {
        Self::pack_named(("high", high), ("low", low))
    }

    pub fn account_gas_limits(
        verification_gas_limit: U256,
        call_gas_limit: U256,
    ) -> Result<Self, EncodingError> {
        Self::pack_named(
            ("verificationGasLimit", verification_gas_limit),
            ("callGasLimit", call_gas_limit),
        )
    }

    pub fn gas_fees(
        max_priority_fee_per_gas: U256,
        max_fee_per_gas: U256,
    ) -> Result<Self, EncodingError> {
        Self::pack_named(
            ("maxPriorityFeePerGas", max_priority_fee_per_gas),
            ("maxFeePerGas", max_fee_per_gas),
        )
    }

    pub fn paymaster_gas_limits(
        verification_gas_limit: U256,
        post_op_gas_limit: U256,
    ) -> Result<Self, EncodingError> {
        Self::pack_named(
            ("paymasterVerificationGasLimit", verification_gas_limit),
            ("paymasterPostOpGasLimit", post_op_gas_limit),
        )
    }

    pub fn from_u128s(high: u128, low: u128) -> Self {
        let mut word = [0u8; 32];
        word[..16].copy_from_slice(&high.to_be_bytes());
        word[16..].copy_from_slice(&low.to_be_bytes());
        Self(word)
    }

    pub fn from_bytes(word: [u8; 32]) -> Self {
        Self(word)
    }

    pub fn unpack(&self) -> (u128, u128) {
        (self.high(), self.low())
    }

    pub fn high(&self) -> u128 {
        let mut half = [0u8; 16];
        half.copy_from_slice(&self.0[..16]);
        u128::from_be_bytes(half)
    }

    pub fn low(&self) -> u128 {
        let mut half = [0u8; 16];
        half.copy_from_slice(&self.0[16..]);
        u128::from_be_bytes(half)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_h256(self) -> H256 {
        H256(self.0)
    }

    fn pack_named(high: (&'static str, U256), low: (&'static str, U256)) -> Result<Self, EncodingError> {
        Ok(Self::from_u128s(
            to_u128(high.0, high.1)?,
            to_u128(low.0, low.1)?,
        ))
    }
}

/// Narrow a 256-bit value to 128 bits, rejecting anything that would truncate.
pub fn to_u128(field: &'static str, value: U256) -> Result<u128, EncodingError> {
    if value.bits() > 128 {
        return Err(EncodingError::OutOfRange {
            field,
            value,
            bits: 128,
        });
    }
    Ok(value.as_u128())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_high_then_low_big_endian() {
        let packed =
            PackedGasPair::account_gas_limits(U256::from(75_000u64), U256::from(150_000u64))
                .unwrap();
        assert_eq!(
            hex::encode(packed.as_bytes()),
            "000000000000000000000000000124f8000000000000000000000000000249f0"
        );
        assert_eq!(packed.unpack(), (75_000, 150_000));
    }

    #[test]
    fn round_trips_at_the_edges() {
        for (a, b) in [
            (0u128, 0u128),
            (u128::MAX, 0),
            (0, u128::MAX),
            (u128::MAX, u128::MAX),
            (1, 2_000_000_000),
        ] {
            let packed = PackedGasPair::pack(U256::from(a), U256::from(b)).unwrap();
            assert_eq!(packed.unpack(), (a, b));
        }
    }

    #[test]
    fn rejects_values_wider_than_128_bits() {
        let too_big = U256::from(u128::MAX) + 1;
        let err = PackedGasPair::gas_fees(U256::one(), too_big).unwrap_err();
        assert_eq!(
            err,
            EncodingError::OutOfRange {
                field: "maxFeePerGas",
                value: too_big,
                bits: 128,
            }
        );
        assert!(PackedGasPair::pack(too_big, U256::zero()).is_err());
    }
}
