use crate::gas::PackedGasPair;
use ethers::types::{Address, Bytes, H256, U256};

/// Counterfactual deployment of the sender: the factory to call and the
/// calldata to call it with. Either both are present or the sender is
/// already deployed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountInit {
    pub factory: Address,
    pub factory_data: Bytes,
}

/// ERC-4337 UserOperation (EntryPoint v0.7 packed layout).
///
/// Gas fields are kept packed; use [`crate::bundler_format::FlatUserOperation`]
/// for bundlers that want them split out.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PackedUserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init: Option<AccountInit>,
    pub call_data: Bytes,
    pub account_gas_limits: PackedGasPair,
    pub pre_verification_gas: U256,
    pub gas_fees: PackedGasPair,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl PackedUserOperation {
    pub fn factory(&self) -> Option<Address> {
        self.init.as_ref().map(|i| i.factory)
    }

    pub fn factory_data(&self) -> Option<&Bytes> {
        self.init.as_ref().map(|i| &i.factory_data)
    }

    /// `factory ‖ factoryData`, or empty when the sender is deployed.
    pub fn init_code(&self) -> Bytes {
        match &self.init {
            Some(init) => {
                let mut v = Vec::with_capacity(20 + init.factory_data.len());
                v.extend_from_slice(init.factory.as_bytes());
                v.extend_from_slice(init.factory_data.as_ref());
                Bytes::from(v)
            }
            None => Bytes::new(),
        }
    }

    pub fn is_sponsored(&self) -> bool {
        !self.paymaster_and_data.is_empty()
    }

    /// Returns a tuple matching the Solidity `PackedUserOperation` layout,
    /// suitable for calling `EntryPoint.getUserOpHash((...))` or `handleOps`.
    #[allow(clippy::type_complexity)]
    pub fn as_abi_tuple(
        &self,
    ) -> (
        Address,
        U256,
        Bytes,
        Bytes,
        [u8; 32],
        U256,
        [u8; 32],
        Bytes,
        Bytes,
    ) {
        (
            self.sender,
            self.nonce,
            self.init_code(),
            self.call_data.clone(),
            *self.account_gas_limits.as_bytes(),
            self.pre_verification_gas,
            *self.gas_fees.as_bytes(),
            self.paymaster_and_data.clone(),
            self.signature.clone(),
        )
    }
}

/// Output of a scenario build: the signed operation and the hash that was signed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedUserOperation {
    pub user_op: PackedUserOperation,
    pub op_hash: H256,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_code_concatenates_factory_and_data() {
        let mut op = PackedUserOperation::default();
        assert!(op.init_code().is_empty());
        assert_eq!(op.factory(), None);

        op.init = Some(AccountInit {
            factory: Address::from_low_u64_be(9),
            factory_data: Bytes::from(vec![0x5f, 0xbf, 0xb9, 0xcf]),
        });
        let init_code = op.init_code();
        assert_eq!(init_code.len(), 24);
        assert_eq!(&init_code[..20], Address::from_low_u64_be(9).as_bytes());
        assert_eq!(&init_code[20..], &[0x5f, 0xbf, 0xb9, 0xcf]);
    }
}
