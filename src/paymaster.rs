use crate::error::EncodingError;
use crate::gas::PackedGasPair;
use ethers::types::{Address, Bytes, U256};

/// `paymaster(20) ‖ paymasterVerificationGasLimit(16) ‖ paymasterPostOpGasLimit(16)`
pub const PAYMASTER_DATA_OFFSET: usize = 52;

const UINT48_BYTES: usize = 6;
const UINT48_MAX: u64 = (1 << 48) - 1;

/// Decoded form of a v0.7 `paymasterAndData` field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymasterAndData {
    pub paymaster: Address,
    pub verification_gas_limit: u128,
    pub post_op_gas_limit: u128,
    pub paymaster_data: Bytes,
}

impl PaymasterAndData {
    pub fn encode(&self) -> Bytes {
        encode(
            self.paymaster,
            PackedGasPair::from_u128s(self.verification_gas_limit, self.post_op_gas_limit),
            &self.paymaster_data,
        )
    }
}

/// Concatenate the paymaster address, its packed gas pair and the payload.
pub fn encode(paymaster: Address, gas: PackedGasPair, payload: &[u8]) -> Bytes {
    let mut v = Vec::with_capacity(PAYMASTER_DATA_OFFSET + payload.len());
    v.extend_from_slice(paymaster.as_bytes());
    v.extend_from_slice(gas.as_bytes());
    v.extend_from_slice(payload);
    Bytes::from(v)
}

/// Inverse of [`encode`]. Empty input means "no paymaster".
pub fn decode(data: &[u8]) -> Result<Option<PaymasterAndData>, EncodingError> {
    if data.is_empty() {
        return Ok(None);
    }
    if data.len() < PAYMASTER_DATA_OFFSET {
        return Err(EncodingError::TooShort {
            what: "paymasterAndData",
            expected: PAYMASTER_DATA_OFFSET,
            actual: data.len(),
        });
    }

    let mut word = [0u8; 32];
    word.copy_from_slice(&data[20..PAYMASTER_DATA_OFFSET]);
    let (verification_gas_limit, post_op_gas_limit) = PackedGasPair::from_bytes(word).unpack();

    Ok(Some(PaymasterAndData {
        paymaster: Address::from_slice(&data[..20]),
        verification_gas_limit,
        post_op_gas_limit,
        paymaster_data: Bytes::from(data[PAYMASTER_DATA_OFFSET..].to_vec()),
    }))
}

/// Scenario-specific bytes appended after the paymaster gas pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymasterPayload {
    /// PaymasterV4 flat-fee mode: the contract prices the op from its own state.
    Empty,
    /// PaymasterV4 deposit mode: `token(20) ‖ validUntil(6) ‖ validAfter(6)`.
    V4Deposit {
        token: Address,
        valid_until: u64,
        valid_after: u64,
    },
    /// SuperPaymaster: `operator(20) ‖ token(20)`.
    SuperPaymaster { operator: Address, token: Address },
}

impl PaymasterPayload {
    pub fn encode(&self) -> Result<Bytes, EncodingError> {
        match self {
            PaymasterPayload::Empty => Ok(Bytes::new()),
            PaymasterPayload::V4Deposit {
                token,
                valid_until,
                valid_after,
            } => {
                let mut v = Vec::with_capacity(20 + 2 * UINT48_BYTES);
                v.extend_from_slice(token.as_bytes());
                v.extend_from_slice(&uint48("validUntil", *valid_until)?);
                v.extend_from_slice(&uint48("validAfter", *valid_after)?);
                Ok(Bytes::from(v))
            }
            PaymasterPayload::SuperPaymaster { operator, token } => {
                let mut v = Vec::with_capacity(40);
                v.extend_from_slice(operator.as_bytes());
                v.extend_from_slice(token.as_bytes());
                Ok(Bytes::from(v))
            }
        }
    }

    /// Read an `operator ‖ token` payload back. Extra trailing bytes are ignored.
    pub fn decode_super_paymaster(payload: &[u8]) -> Result<(Address, Address), EncodingError> {
        if payload.len() < 40 {
            return Err(EncodingError::TooShort {
                what: "SuperPaymaster payload",
                expected: 40,
                actual: payload.len(),
            });
        }
        Ok((
            Address::from_slice(&payload[..20]),
            Address::from_slice(&payload[20..40]),
        ))
    }
}

fn uint48(field: &'static str, value: u64) -> Result<[u8; UINT48_BYTES], EncodingError> {
    if value > UINT48_MAX {
        return Err(EncodingError::OutOfRange {
            field,
            value: U256::from(value),
            bits: 48,
        });
    }
    let be = value.to_be_bytes();
    let mut out = [0u8; UINT48_BYTES];
    out.copy_from_slice(&be[8 - UINT48_BYTES..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    #[test]
    fn encodes_super_paymaster_layout() {
        let payload = PaymasterPayload::SuperPaymaster {
            operator: addr(6),
            token: addr(3),
        }
        .encode()
        .unwrap();
        let gas =
            PackedGasPair::paymaster_gas_limits(U256::from(100_000u64), U256::from(40_000u64))
                .unwrap();
        let pmd = encode(addr(5), gas, &payload);

        assert_eq!(
            hex::encode(&pmd),
            "0000000000000000000000000000000000000005\
             000000000000000000000000000186a0\
             00000000000000000000000000009c40\
             0000000000000000000000000000000000000006\
             0000000000000000000000000000000000000003"
        );

        let decoded = decode(&pmd).unwrap().unwrap();
        assert_eq!(decoded.paymaster, addr(5));
        assert_eq!(decoded.verification_gas_limit, 100_000);
        assert_eq!(decoded.post_op_gas_limit, 40_000);
        assert_eq!(
            PaymasterPayload::decode_super_paymaster(&decoded.paymaster_data).unwrap(),
            (addr(6), addr(3))
        );
        assert_eq!(decoded.encode(), pmd);
    }

    #[test]
    fn empty_payload_is_exactly_52_bytes() {
        let payload = PaymasterPayload::Empty.encode().unwrap();
        let pmd = encode(addr(5), PackedGasPair::from_u128s(1, 2), &payload);
        assert_eq!(pmd.len(), PAYMASTER_DATA_OFFSET);
        let decoded = decode(&pmd).unwrap().unwrap();
        assert!(decoded.paymaster_data.is_empty());
    }

    #[test]
    fn deposit_payload_packs_uint48_windows() {
        let payload = PaymasterPayload::V4Deposit {
            token: addr(3),
            valid_until: 0x0102_0304_0506,
            valid_after: 1,
        }
        .encode()
        .unwrap();
        assert_eq!(payload.len(), 32);
        assert_eq!(&payload[20..26], &[1, 2, 3, 4, 5, 6]);
        assert_eq!(&payload[26..], &[0, 0, 0, 0, 0, 1]);

        let err = PaymasterPayload::V4Deposit {
            token: addr(3),
            valid_until: 1 << 48,
            valid_after: 0,
        }
        .encode()
        .unwrap_err();
        assert!(matches!(err, EncodingError::OutOfRange { bits: 48, .. }));
    }

    #[test]
    fn decode_rejects_truncated_data() {
        assert_eq!(decode(&[]).unwrap(), None);
        let err = decode(&[0u8; 51]).unwrap_err();
        assert_eq!(
            err,
            EncodingError::TooShort {
                what: "paymasterAndData",
                expected: 52,
                actual: 51,
            }
        );
    }
}
