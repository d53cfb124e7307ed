use ethers::types::U256;
use std::fmt;

/// Failure to pack or unpack one of the fixed-width UserOperation fields.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodingError {
    #[error("{field} = {value} does not fit in {bits} bits")]
    OutOfRange {
        field: &'static str,
        value: U256,
        bits: u32,
    },

    #[error("{what} too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("abi encoding failed: {0}")]
    Abi(String),

    #[error("invalid hex: {0}")]
    Hex(String),

    #[error("inconsistent fields: {0}")]
    Inconsistent(&'static str),
}

/// Pipeline step that produced a [`ScenarioError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStep {
    Validate,
    ResolveDeployment,
    ResolveNonce,
    BuildCallData,
    AssignGas,
    BuildPaymasterData,
    Hash,
    Sign,
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildStep::Validate => "validate",
            BuildStep::ResolveDeployment => "resolve deployment",
            BuildStep::ResolveNonce => "resolve nonce",
            BuildStep::BuildCallData => "build callData",
            BuildStep::AssignGas => "assign gas",
            BuildStep::BuildPaymasterData => "build paymasterAndData",
            BuildStep::Hash => "hash",
            BuildStep::Sign => "sign",
        };
        f.write_str(s)
    }
}

/// Every way a scenario build can fail. None of these leave a partial
/// UserOperation behind.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    /// A required scenario field is missing or inconsistent. Raised before any chain read.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("encoding failed during {step}: {source}")]
    Encoding {
        step: BuildStep,
        #[source]
        source: EncodingError,
    },

    #[error("chain read failed during {step}: {source:#}")]
    Transport {
        step: BuildStep,
        #[source]
        source: anyhow::Error,
    },

    #[error("signing failed: {0:#}")]
    Signing(#[source] anyhow::Error),
}

impl ScenarioError {
    pub fn step(&self) -> BuildStep {
        match self {
            ScenarioError::Validation(_) => BuildStep::Validate,
            ScenarioError::Encoding { step, .. } | ScenarioError::Transport { step, .. } => *step,
            ScenarioError::Signing(_) => BuildStep::Sign,
        }
    }

    pub(crate) fn encoding(step: BuildStep) -> impl FnOnce(EncodingError) -> Self {
        move |source| ScenarioError::Encoding { step, source }
    }

    pub(crate) fn transport(step: BuildStep) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| ScenarioError::Transport { step, source }
    }
}
