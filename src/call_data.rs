use crate::error::EncodingError;
use ethers::abi::{AbiParser, Function, Token};
use ethers::types::{Address, Bytes, H256, U256};

/// An application-level call routed through the smart account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountCall {
    /// ERC-20 `transfer(to, amount)` on `token`.
    Transfer {
        token: Address,
        to: Address,
        amount: U256,
    },
    /// ERC-1363 style `transferAndCall(to, amount, data)` on `token`.
    TransferAndCall {
        token: Address,
        to: Address,
        amount: U256,
        data: Bytes,
    },
    /// Registry `registerRole(roleId, user, data)`.
    RegisterRole {
        registry: Address,
        role_id: H256,
        user: Address,
        data: Bytes,
    },
    /// Registry `registerRoleSelf(roleId, data)`.
    RegisterRoleSelf {
        registry: Address,
        role_id: H256,
        data: Bytes,
    },
    /// Anything else, already encoded.
    Raw {
        target: Address,
        value: U256,
        data: Bytes,
    },
}

impl AccountCall {
    /// `(target, value, data)` as seen by the account.
    pub fn to_parts(&self) -> Result<(Address, U256, Bytes), EncodingError> {
        match self {
            AccountCall::Transfer { token, to, amount } => Ok((
                *token,
                U256::zero(),
                encode_call(
                    "function transfer(address to, uint256 amount) returns (bool)",
                    &[Token::Address(*to), Token::Uint(*amount)],
                )?,
            )),
            AccountCall::TransferAndCall {
                token,
                to,
                amount,
                data,
            } => Ok((
                *token,
                U256::zero(),
                encode_call(
                    "function transferAndCall(address to, uint256 amount, bytes data) returns (bool)",
                    &[
                        Token::Address(*to),
                        Token::Uint(*amount),
                        Token::Bytes(data.to_vec()),
                    ],
                )?,
            )),
            AccountCall::RegisterRole {
                registry,
                role_id,
                user,
                data,
            } => Ok((
                *registry,
                U256::zero(),
                encode_call(
                    "function registerRole(bytes32 roleId, address user, bytes roleData)",
                    &[
                        Token::FixedBytes(role_id.as_bytes().to_vec()),
                        Token::Address(*user),
                        Token::Bytes(data.to_vec()),
                    ],
                )?,
            )),
            AccountCall::RegisterRoleSelf {
                registry,
                role_id,
                data,
            } => Ok((
                *registry,
                U256::zero(),
                encode_call(
                    "function registerRoleSelf(bytes32 roleId, bytes roleData)",
                    &[
                        Token::FixedBytes(role_id.as_bytes().to_vec()),
                        Token::Bytes(data.to_vec()),
                    ],
                )?,
            )),
            AccountCall::Raw {
                target,
                value,
                data,
            } => Ok((*target, *value, data.clone())),
        }
    }
}

/// SimpleAccount `execute(address dest, uint256 value, bytes func)`.
pub fn encode_execute(call: &AccountCall) -> Result<Bytes, EncodingError> {
    let (target, value, data) = call.to_parts()?;
    encode_call(
        "function execute(address dest, uint256 value, bytes func)",
        &[
            Token::Address(target),
            Token::Uint(value),
            Token::Bytes(data.to_vec()),
        ],
    )
}

/// SimpleAccount (v0.7) `executeBatch(address[] dest, uint256[] value, bytes[] func)`.
pub fn encode_execute_batch(calls: &[AccountCall]) -> Result<Bytes, EncodingError> {
    let mut dests = Vec::with_capacity(calls.len());
    let mut values = Vec::with_capacity(calls.len());
    let mut funcs = Vec::with_capacity(calls.len());

    for call in calls {
        let (target, value, data) = call.to_parts()?;
        dests.push(Token::Address(target));
        values.push(Token::Uint(value));
        funcs.push(Token::Bytes(data.to_vec()));
    }

    encode_call(
        "function executeBatch(address[] dest, uint256[] value, bytes[] func)",
        &[
            Token::Array(dests),
            Token::Array(values),
            Token::Array(funcs),
        ],
    )
}

/// One call goes through `execute`, several through `executeBatch`.
pub fn encode_account_calls(calls: &[AccountCall]) -> Result<Bytes, EncodingError> {
    match calls {
        [single] => encode_execute(single),
        _ => encode_execute_batch(calls),
    }
}

/// SimpleAccountFactory `createAccount(address owner, uint256 salt)`.
pub fn encode_create_account(owner: Address, salt: U256) -> Result<Bytes, EncodingError> {
    encode_call(
        "function createAccount(address owner, uint256 salt) returns (address)",
        &[Token::Address(owner), Token::Uint(salt)],
    )
}

fn encode_call(signature: &str, args: &[Token]) -> Result<Bytes, EncodingError> {
    let function = parse_function(signature)?;
    function
        .encode_input(args)
        .map(Bytes::from)
        .map_err(|e| EncodingError::Abi(format!("{}: {e}", function.name)))
}

fn parse_function(signature: &str) -> Result<Function, EncodingError> {
    AbiParser::default()
        .parse_function(signature)
        .map_err(|e| EncodingError::Abi(format!("invalid signature {signature:?}: {e}")))
}
