use crate::types::PackedUserOperation;
use ethers::{
    abi::{encode, Token},
    types::{Address, H256, U256},
    utils::keccak256,
};

/// EntryPoint v0.7 `getUserOpHash`.
///
/// Inner: `keccak256(abi.encode(sender, nonce, keccak(initCode), keccak(callData),
/// accountGasLimits, preVerificationGas, gasFees, keccak(paymasterAndData)))`.
/// Outer: `keccak256(abi.encode(inner, entryPoint, chainId))`.
/// The signature field is never part of the preimage.
pub fn user_op_hash(op: &PackedUserOperation, entry_point: Address, chain_id: u64) -> H256 {
    let inner = keccak256(encode_unsigned(op));

    keccak256(encode(&[
        Token::FixedBytes(inner.to_vec()),
        Token::Address(entry_point),
        Token::Uint(U256::from(chain_id)),
    ]))
    .into()
}

fn encode_unsigned(op: &PackedUserOperation) -> Vec<u8> {
    let hash_init_code = keccak256(op.init_code());
    let hash_call_data = keccak256(&op.call_data);
    let hash_paymaster_and_data = keccak256(&op.paymaster_and_data);

    encode(&[
        Token::Address(op.sender),
        Token::Uint(op.nonce),
        Token::FixedBytes(hash_init_code.to_vec()),
        Token::FixedBytes(hash_call_data.to_vec()),
        Token::FixedBytes(op.account_gas_limits.as_bytes().to_vec()),
        Token::Uint(op.pre_verification_gas),
        Token::FixedBytes(op.gas_fees.as_bytes().to_vec()),
        Token::FixedBytes(hash_paymaster_and_data.to_vec()),
    ])
}
