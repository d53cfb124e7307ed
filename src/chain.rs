use crate::types::PackedUserOperation;
use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::abi::{Abi, AbiParser};
use ethers::contract::Contract;
use ethers::providers::Middleware;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, H256, U256};
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;

/// Read-only chain access used while assembling a UserOperation.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Deployed bytecode at `address` (empty when nothing is deployed).
    async fn get_code(&self, address: Address) -> Result<Bytes>;

    /// `EntryPoint.getNonce(sender, key)`.
    async fn get_nonce(&self, entry_point: Address, sender: Address, key: U256) -> Result<U256>;

    /// Counterfactual account address: `factory.getAddress(owner, salt)`.
    async fn get_sender_address(
        &self,
        factory: Address,
        owner: Address,
        salt: U256,
    ) -> Result<Address>;

    async fn gas_price(&self) -> Result<U256>;

    /// `EntryPoint.getUserOpHash(op)`, for cross-checking the local hash.
    async fn get_user_op_hash(
        &self,
        entry_point: Address,
        op: &PackedUserOperation,
    ) -> Result<H256>;
}

/// Owner-side signing capability for a smart account.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait UserOpSigner: Send + Sync {
    /// Owner address, used as the `createAccount` owner for counterfactual deployment.
    fn address(&self) -> Address;

    /// EIP-191 personal-message signature over the raw 32-byte hash.
    async fn sign_hash(&self, hash: H256) -> Result<Bytes>;
}

#[async_trait]
impl UserOpSigner for LocalWallet {
    fn address(&self) -> Address {
        Signer::address(self)
    }

    async fn sign_hash(&self, hash: H256) -> Result<Bytes> {
        let sig = self
            .sign_message(hash.as_bytes())
            .await
            .context("failed to sign userOpHash")?;
        Ok(Bytes::from(sig.to_vec()))
    }
}

const GET_USER_OP_HASH_ABI: &str = r#"[{"inputs":[{"components":[{"internalType":"address","name":"sender","type":"address"},{"internalType":"uint256","name":"nonce","type":"uint256"},{"internalType":"bytes","name":"initCode","type":"bytes"},{"internalType":"bytes","name":"callData","type":"bytes"},{"internalType":"bytes32","name":"accountGasLimits","type":"bytes32"},{"internalType":"uint256","name":"preVerificationGas","type":"uint256"},{"internalType":"bytes32","name":"gasFees","type":"bytes32"},{"internalType":"bytes","name":"paymasterAndData","type":"bytes"},{"internalType":"bytes","name":"signature","type":"bytes"}],"internalType":"struct PackedUserOperation","name":"userOp","type":"tuple"}],"name":"getUserOpHash","outputs":[{"internalType":"bytes32","name":"","type":"bytes32"}],"stateMutability":"view","type":"function"}]"#;

/// [`ChainReader`] over any ethers [`Middleware`].
#[derive(Debug)]
pub struct EthersChainReader<M> {
    client: Arc<M>,
}

impl<M> EthersChainReader<M> {
    pub fn new(client: Arc<M>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<M> ChainReader for EthersChainReader<M>
where
    M: Middleware + 'static,
    M::Error: 'static,
{
    async fn get_code(&self, address: Address) -> Result<Bytes> {
        self.client
            .get_code(address, None)
            .await
            .context("eth_getCode failed")
    }

    async fn get_nonce(&self, entry_point: Address, sender: Address, key: U256) -> Result<U256> {
        let entrypoint_abi = AbiParser::default()
            .parse(&["function getNonce(address sender, uint192 key) view returns (uint256)"])?;
        let entrypoint_c = Contract::new(entry_point, entrypoint_abi, self.client.clone());

        let nonce: U256 = entrypoint_c
            .method("getNonce", (sender, key))?
            .call()
            .await
            .context("entryPoint.getNonce failed")?;
        Ok(nonce)
    }

    async fn get_sender_address(
        &self,
        factory: Address,
        owner: Address,
        salt: U256,
    ) -> Result<Address> {
        let factory_abi = AbiParser::default()
            .parse(&["function getAddress(address owner, uint256 salt) view returns (address)"])?;
        let factory = Contract::new(factory, factory_abi, self.client.clone());

        let account: Address = factory
            .method("getAddress", (owner, salt))?
            .call()
            .await
            .context("factory.getAddress failed")?;
        Ok(account)
    }

    async fn gas_price(&self) -> Result<U256> {
        self.client
            .get_gas_price()
            .await
            .context("failed to fetch gas price")
    }

    async fn get_user_op_hash(
        &self,
        entry_point: Address,
        op: &PackedUserOperation,
    ) -> Result<H256> {
        let entrypoint_abi: Abi =
            serde_json::from_str(GET_USER_OP_HASH_ABI).context("failed to parse EntryPoint ABI")?;
        let entrypoint_c = Contract::new(entry_point, entrypoint_abi, self.client.clone());

        let hash: H256 = entrypoint_c
            .method("getUserOpHash", (op.as_abi_tuple(),))?
            .call()
            .await
            .context("entryPoint.getUserOpHash failed")?;
        Ok(hash)
    }
}
