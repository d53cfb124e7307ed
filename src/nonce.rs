use crate::chain::ChainReader;
use crate::error::EncodingError;
use ethers::types::{Address, U256};
use rand::rngs::OsRng;
use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};

const KEY_BITS: u32 = 192;
const SEQUENCE_BITS: usize = 64;

/// The 192-bit key half of an ERC-4337 nonce. Each key is an independent
/// sequence lane on the EntryPoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct NonceKey(U256);

impl NonceKey {
    pub const DEFAULT: NonceKey = NonceKey(U256([0, 0, 0, 0]));

    pub fn new(key: U256) -> Result<Self, EncodingError> {
        if key.bits() > KEY_BITS as usize {
            return Err(EncodingError::OutOfRange {
                field: "nonceKey",
                value: key,
                bits: KEY_BITS,
            });
        }
        Ok(Self(key))
    }

    pub fn from_lane(lane: u64) -> Self {
        Self(U256::from(lane))
    }

    /// Key derived from the current unix time in milliseconds.
    pub fn from_timestamp() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self::from_lane(millis)
    }

    /// Uniformly random 192-bit key.
    pub fn random() -> Self {
        let mut bytes = [0u8; 24];
        OsRng.fill_bytes(&mut bytes);
        Self(U256::from_big_endian(&bytes))
    }

    pub fn as_u256(&self) -> U256 {
        self.0
    }

    /// `key << 64 | sequence`
    pub fn compose(&self, sequence: u64) -> U256 {
        (self.0 << SEQUENCE_BITS) | U256::from(sequence)
    }
}

/// Split a full 256-bit nonce into its key and sequence halves.
pub fn split_nonce(nonce: U256) -> (NonceKey, u64) {
    (NonceKey(nonce >> SEQUENCE_BITS), nonce.low_u64())
}

/// Read the sender's next nonce for `key` from the EntryPoint.
///
/// `EntryPoint.getNonce` already returns `key << 64 | seq`; only the sequence
/// half is trusted and recomposed with the requested key. Read failures are
/// returned unchanged and never retried.
pub async fn resolve_nonce(
    chain: &dyn ChainReader,
    entry_point: Address,
    sender: Address,
    key: NonceKey,
) -> anyhow::Result<U256> {
    let raw = chain.get_nonce(entry_point, sender, key.as_u256()).await?;
    let (_, sequence) = split_nonce(raw);
    Ok(key.compose(sequence))
}
