//! ERC-4337 (EntryPoint v0.7) UserOperation assembly for token transfers
//! under native, PaymasterV4 and SuperPaymaster gas sponsorship.

pub mod bundler;
pub mod bundler_format;
pub mod call_data;
pub mod chain;
pub mod config;
pub mod encoding;
pub mod error;
pub mod gas;
pub mod hash;
pub mod nonce;
pub mod paymaster;
pub mod scenario;
pub mod types;

pub use bundler_format::{FlatUserOperation, WireFormat};
pub use chain::{ChainReader, EthersChainReader, UserOpSigner};
pub use error::{BuildStep, EncodingError, ScenarioError};
pub use gas::PackedGasPair;
pub use hash::user_op_hash;
pub use nonce::NonceKey;
pub use scenario::{build_transfer_scenario, Scenario, ScenarioParams};
pub use types::{PackedUserOperation, SignedUserOperation};
