use crate::call_data::{encode_create_account, encode_execute, AccountCall};
use crate::chain::{ChainReader, UserOpSigner};
use crate::error::{BuildStep, ScenarioError};
use crate::gas::PackedGasPair;
use crate::hash::user_op_hash;
use crate::nonce::{resolve_nonce, NonceKey};
use crate::paymaster::{self, PaymasterPayload};
use crate::types::{AccountInit, PackedUserOperation, SignedUserOperation};
use ethers::types::{Address, Bytes, U256};
use std::fmt;
use std::str::FromStr;

/// How the UserOperation's gas is paid. Closed set; every match is exhaustive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scenario {
    /// Sender pays in native currency, no paymaster.
    Native,
    /// PaymasterV4 flat-fee community paymaster.
    GaslessV4,
    /// SuperPaymaster settled against the "B" community's token.
    SuperBpnt,
    /// SuperPaymaster settled against the "C" community's token.
    SuperCpnt,
    /// SuperPaymaster with operator and token supplied by the caller.
    SuperCustom,
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Scenario::Native,
        Scenario::GaslessV4,
        Scenario::SuperBpnt,
        Scenario::SuperCpnt,
        Scenario::SuperCustom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::Native => "NATIVE",
            Scenario::GaslessV4 => "GASLESS_V4",
            Scenario::SuperBpnt => "SUPER_BPNT",
            Scenario::SuperCpnt => "SUPER_CPNT",
            Scenario::SuperCustom => "SUPER_CUSTOM",
        }
    }

    pub fn is_sponsored(&self) -> bool {
        !matches!(self, Scenario::Native)
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown scenario {0:?} (expected one of NATIVE, GASLESS_V4, SUPER_BPNT, SUPER_CPNT, SUPER_CUSTOM)")]
pub struct UnknownScenario(String);

impl FromStr for Scenario {
    type Err = UnknownScenario;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Scenario::ALL
            .into_iter()
            .find(|sc| sc.as_str() == normalized)
            .ok_or_else(|| UnknownScenario(s.to_string()))
    }
}

/// A community whose token a SuperPaymaster can settle against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Community {
    pub operator: Option<Address>,
    pub token: Address,
}

/// Named communities backing `SUPER_BPNT` and `SUPER_CPNT`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommunityDirectory {
    pub bpnt: Option<Community>,
    pub cpnt: Option<Community>,
}

/// PaymasterV4 payload flavour.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GaslessMode {
    /// No payload; the paymaster prices the op from its own state.
    #[default]
    Flat,
    /// Pay from a deposit of `token` (defaults to the transfer token), valid in a time window.
    Deposit {
        token: Option<Address>,
        valid_until: u64,
        valid_after: u64,
    },
}

/// Where `maxFeePerGas`/`maxPriorityFeePerGas` come from when not overridden.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FeeStrategy {
    /// 2 gwei for both fields.
    #[default]
    Fixed,
    /// `eth_gasPrice * multiplier_bps / 10_000` for both fields.
    Network { multiplier_bps: u64 },
}

pub const DEFAULT_VERIFICATION_GAS_LIMIT: u64 = 75_000;
pub const DEFAULT_SPONSORED_VERIFICATION_GAS_LIMIT: u64 = 250_000;
pub const DEFAULT_CALL_GAS_LIMIT: u64 = 150_000;
pub const DEFAULT_PRE_VERIFICATION_GAS: u64 = 80_000;
pub const DEFAULT_FEE_PER_GAS: u64 = 2_000_000_000;
pub const DEFAULT_PAYMASTER_VERIFICATION_GAS_LIMIT: u64 = 100_000;
pub const DEFAULT_PAYMASTER_POST_OP_GAS_LIMIT: u64 = 40_000;

/// Optional gas overrides. Anything left `None` gets the scenario default.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GasSettings {
    pub verification_gas_limit: Option<U256>,
    pub call_gas_limit: Option<U256>,
    pub pre_verification_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub paymaster_verification_gas_limit: Option<U256>,
    pub paymaster_post_op_gas_limit: Option<U256>,
    pub fees: FeeStrategy,
}

/// SimpleAccountFactory used when the sender is not deployed yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccountFactory {
    pub address: Address,
    pub salt: U256,
}

/// Inputs to [`build_transfer_scenario`].
pub struct ScenarioParams<'a> {
    pub sender: Address,
    pub owner: &'a dyn UserOpSigner,
    pub chain: &'a dyn ChainReader,
    pub recipient: Address,
    pub token_address: Address,
    pub amount: U256,
    pub entry_point: Address,
    pub chain_id: u64,
    pub paymaster: Option<Address>,
    pub operator: Option<Address>,
    /// Token the paymaster charges, when different from the transfer token.
    pub gas_token: Option<Address>,
    pub nonce_key: Option<NonceKey>,
    /// Replaces the default `execute(token, 0, transfer(recipient, amount))`.
    pub call_data: Option<Bytes>,
    pub account_factory: Option<AccountFactory>,
    pub gas: GasSettings,
    pub gasless_mode: GaslessMode,
    pub communities: CommunityDirectory,
}

impl<'a> ScenarioParams<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sender: Address,
        owner: &'a dyn UserOpSigner,
        chain: &'a dyn ChainReader,
        recipient: Address,
        token_address: Address,
        amount: U256,
        entry_point: Address,
        chain_id: u64,
    ) -> Self {
        Self {
            sender,
            owner,
            chain,
            recipient,
            token_address,
            amount,
            entry_point,
            chain_id,
            paymaster: None,
            operator: None,
            gas_token: None,
            nonce_key: None,
            call_data: None,
            account_factory: None,
            gas: GasSettings::default(),
            gasless_mode: GaslessMode::default(),
            communities: CommunityDirectory::default(),
        }
    }

    pub fn with_paymaster(mut self, paymaster: Address) -> Self {
        self.paymaster = Some(paymaster);
        self
    }

    pub fn with_operator(mut self, operator: Address) -> Self {
        self.operator = Some(operator);
        self
    }

    pub fn with_gas_token(mut self, token: Address) -> Self {
        self.gas_token = Some(token);
        self
    }

    pub fn with_nonce_key(mut self, key: NonceKey) -> Self {
        self.nonce_key = Some(key);
        self
    }

    pub fn with_call_data(mut self, call_data: Bytes) -> Self {
        self.call_data = Some(call_data);
        self
    }

    pub fn with_account_factory(mut self, factory: AccountFactory) -> Self {
        self.account_factory = Some(factory);
        self
    }

    pub fn with_gas(mut self, gas: GasSettings) -> Self {
        self.gas = gas;
        self
    }

    pub fn with_gasless_mode(mut self, mode: GaslessMode) -> Self {
        self.gasless_mode = mode;
        self
    }

    pub fn with_communities(mut self, communities: CommunityDirectory) -> Self {
        self.communities = communities;
        self
    }
}

/// Validated sponsorship: a sponsored op always has a paymaster and a payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sponsorship {
    SelfFunded,
    Paymaster {
        paymaster: Address,
        payload: PaymasterPayload,
    },
}

/// Check the params against the scenario and resolve community defaults.
/// Pure: never touches the chain.
pub fn resolve_sponsorship(
    scenario: Scenario,
    params: &ScenarioParams<'_>,
) -> Result<Sponsorship, ScenarioError> {
    let paymaster = || {
        non_zero(params.paymaster)
            .ok_or_else(|| ScenarioError::Validation(format!("paymaster required for {scenario}")))
    };

    match scenario {
        Scenario::Native => {
            if params.paymaster.is_some() {
                return Err(ScenarioError::Validation(
                    "NATIVE does not take a paymaster".into(),
                ));
            }
            Ok(Sponsorship::SelfFunded)
        }
        Scenario::GaslessV4 => {
            let paymaster = paymaster()?;
            let payload = match params.gasless_mode {
                GaslessMode::Flat => PaymasterPayload::Empty,
                GaslessMode::Deposit {
                    token,
                    valid_until,
                    valid_after,
                } => {
                    if valid_until <= valid_after {
                        return Err(ScenarioError::Validation(format!(
                            "empty validity window: validUntil {valid_until} <= validAfter {valid_after}"
                        )));
                    }
                    let token = non_zero(token.or(params.gas_token))
                        .or(non_zero(Some(params.token_address)))
                        .ok_or_else(|| {
                            ScenarioError::Validation("gas token required for GASLESS_V4 deposit mode".into())
                        })?;
                    PaymasterPayload::V4Deposit {
                        token,
                        valid_until,
                        valid_after,
                    }
                }
            };
            Ok(Sponsorship::Paymaster { paymaster, payload })
        }
        Scenario::SuperBpnt | Scenario::SuperCpnt => {
            let paymaster = paymaster()?;
            let community = match scenario {
                Scenario::SuperBpnt => params.communities.bpnt,
                _ => params.communities.cpnt,
            };
            let operator = non_zero(params.operator)
                .or_else(|| non_zero(community.and_then(|c| c.operator)))
                .ok_or_else(|| ScenarioError::Validation(format!("operator required for {scenario}")))?;
            let token = non_zero(params.gas_token)
                .or_else(|| non_zero(community.map(|c| c.token)))
                .or_else(|| non_zero(Some(params.token_address)))
                .ok_or_else(|| ScenarioError::Validation(format!("token required for {scenario}")))?;
            Ok(Sponsorship::Paymaster {
                paymaster,
                payload: PaymasterPayload::SuperPaymaster { operator, token },
            })
        }
        Scenario::SuperCustom => {
            let paymaster = paymaster()?;
            let operator = non_zero(params.operator).ok_or_else(|| {
                ScenarioError::Validation("operator required for SUPER_CUSTOM".into())
            })?;
            let token = non_zero(params.gas_token.or(Some(params.token_address))).ok_or_else(|| {
                ScenarioError::Validation("token address required for SUPER_CUSTOM".into())
            })?;
            Ok(Sponsorship::Paymaster {
                paymaster,
                payload: PaymasterPayload::SuperPaymaster { operator, token },
            })
        }
    }
}

fn non_zero(addr: Option<Address>) -> Option<Address> {
    addr.filter(|a| !a.is_zero())
}

fn validate_gas(gas: &GasSettings) -> Result<(), ScenarioError> {
    if let (Some(priority), Some(max)) = (gas.max_priority_fee_per_gas, gas.max_fee_per_gas) {
        if priority > max {
            return Err(ScenarioError::Validation(format!(
                "maxPriorityFeePerGas {priority} exceeds maxFeePerGas {max}"
            )));
        }
    }
    if let FeeStrategy::Network { multiplier_bps: 0 } = gas.fees {
        return Err(ScenarioError::Validation(
            "fee multiplier must be positive".into(),
        ));
    }
    Ok(())
}

/// Assemble, hash and sign a token-transfer UserOperation for `scenario`.
///
/// Straight-line pipeline: validate, resolve deployment, resolve nonce, build
/// callData, assign gas, build paymasterAndData, hash, sign. Nothing is
/// written on-chain; on any failure no operation is returned.
pub async fn build_transfer_scenario(
    scenario: Scenario,
    params: &ScenarioParams<'_>,
) -> Result<SignedUserOperation, ScenarioError> {
    // 1. validate, before any I/O
    let sponsorship = resolve_sponsorship(scenario, params)?;
    validate_gas(&params.gas)?;
    tracing::debug!(%scenario, sender = ?params.sender, "scenario validated");

    // 2. deployment state
    let init = resolve_init(params).await?;

    // 3. nonce
    let key = params.nonce_key.unwrap_or_default();
    let nonce = resolve_nonce(params.chain, params.entry_point, params.sender, key)
        .await
        .map_err(ScenarioError::transport(BuildStep::ResolveNonce))?;
    tracing::debug!(%nonce, "nonce resolved");

    // 4. callData
    let call_data = match &params.call_data {
        Some(custom) => custom.clone(),
        None => encode_execute(&AccountCall::Transfer {
            token: params.token_address,
            to: params.recipient,
            amount: params.amount,
        })
        .map_err(ScenarioError::encoding(BuildStep::BuildCallData))?,
    };

    // 5. gas
    let gas = &params.gas;
    let default_verification = if scenario.is_sponsored() {
        DEFAULT_SPONSORED_VERIFICATION_GAS_LIMIT
    } else {
        DEFAULT_VERIFICATION_GAS_LIMIT
    };
    let (max_priority_fee_per_gas, max_fee_per_gas) = resolve_fees(params).await?;
    let account_gas_limits = PackedGasPair::account_gas_limits(
        gas.verification_gas_limit
            .unwrap_or_else(|| U256::from(default_verification)),
        gas.call_gas_limit
            .unwrap_or_else(|| U256::from(DEFAULT_CALL_GAS_LIMIT)),
    )
    .map_err(ScenarioError::encoding(BuildStep::AssignGas))?;
    let gas_fees = PackedGasPair::gas_fees(max_priority_fee_per_gas, max_fee_per_gas)
        .map_err(ScenarioError::encoding(BuildStep::AssignGas))?;
    let pre_verification_gas = gas
        .pre_verification_gas
        .unwrap_or_else(|| U256::from(DEFAULT_PRE_VERIFICATION_GAS));

    // 6. paymasterAndData
    let paymaster_and_data = match &sponsorship {
        Sponsorship::SelfFunded => Bytes::new(),
        Sponsorship::Paymaster { paymaster, payload } => {
            let pm_gas = PackedGasPair::paymaster_gas_limits(
                gas.paymaster_verification_gas_limit
                    .unwrap_or_else(|| U256::from(DEFAULT_PAYMASTER_VERIFICATION_GAS_LIMIT)),
                gas.paymaster_post_op_gas_limit
                    .unwrap_or_else(|| U256::from(DEFAULT_PAYMASTER_POST_OP_GAS_LIMIT)),
            )
            .map_err(ScenarioError::encoding(BuildStep::BuildPaymasterData))?;
            let payload = payload
                .encode()
                .map_err(ScenarioError::encoding(BuildStep::BuildPaymasterData))?;
            paymaster::encode(*paymaster, pm_gas, &payload)
        }
    };

    let mut user_op = PackedUserOperation {
        sender: params.sender,
        nonce,
        init,
        call_data,
        account_gas_limits,
        pre_verification_gas,
        gas_fees,
        paymaster_and_data,
        signature: Bytes::new(),
    };

    // 7. hash over the fully assembled op
    let op_hash = user_op_hash(&user_op, params.entry_point, params.chain_id);

    // 8. sign
    user_op.signature = params
        .owner
        .sign_hash(op_hash)
        .await
        .map_err(ScenarioError::Signing)?;

    tracing::info!(
        %scenario,
        sender = ?user_op.sender,
        nonce = %user_op.nonce,
        op_hash = ?op_hash,
        sponsored = user_op.is_sponsored(),
        "built user operation"
    );

    Ok(SignedUserOperation { user_op, op_hash })
}

async fn resolve_init(params: &ScenarioParams<'_>) -> Result<Option<AccountInit>, ScenarioError> {
    let code = params
        .chain
        .get_code(params.sender)
        .await
        .map_err(ScenarioError::transport(BuildStep::ResolveDeployment))?;
    if !code.is_empty() {
        return Ok(None);
    }

    let Some(factory) = params.account_factory else {
        tracing::warn!(
            sender = ?params.sender,
            "sender has no code and no account factory is configured; leaving initCode empty"
        );
        return Ok(None);
    };

    let factory_data = encode_create_account(params.owner.address(), factory.salt)
        .map_err(ScenarioError::encoding(BuildStep::ResolveDeployment))?;
    tracing::debug!(factory = ?factory.address, "sender not deployed; adding factory call");
    Ok(Some(AccountInit {
        factory: factory.address,
        factory_data,
    }))
}

async fn resolve_fees(params: &ScenarioParams<'_>) -> Result<(U256, U256), ScenarioError> {
    let gas = &params.gas;
    if let (Some(priority), Some(max)) = (gas.max_priority_fee_per_gas, gas.max_fee_per_gas) {
        return Ok((priority, max));
    }

    let base = match gas.fees {
        FeeStrategy::Fixed => U256::from(DEFAULT_FEE_PER_GAS),
        FeeStrategy::Network { multiplier_bps } => {
            let gas_price = params
                .chain
                .gas_price()
                .await
                .map_err(ScenarioError::transport(BuildStep::AssignGas))?;
            gas_price * U256::from(multiplier_bps) / U256::from(10_000u64)
        }
    };

    // an explicit value on one side wins over the derived value on the other
    let priority = gas.max_priority_fee_per_gas.unwrap_or(base);
    let max = gas.max_fee_per_gas.unwrap_or_else(|| base.max(priority));
    Ok((priority.min(max), max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MockChainReader, MockUserOpSigner};
    use crate::paymaster::decode;
    use mockall::predicate::eq;

    const SIG: [u8; 4] = [0x5e, 0x1f, 0x00, 0x01];

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn deployed_chain() -> MockChainReader {
        let mut chain = MockChainReader::new();
        chain
            .expect_get_code()
            .returning(|_| Ok(Bytes::from(vec![0x60, 0x80])));
        chain
            .expect_get_nonce()
            .returning(|_, _, key| Ok(key << 64));
        chain
    }

    fn fixed_signer() -> MockUserOpSigner {
        let mut signer = MockUserOpSigner::new();
        signer.expect_address().return_const(addr(10));
        signer
            .expect_sign_hash()
            .returning(|_| Ok(Bytes::from(SIG.to_vec())));
        signer
    }

    fn params<'a>(
        owner: &'a dyn UserOpSigner,
        chain: &'a dyn ChainReader,
    ) -> ScenarioParams<'a> {
        ScenarioParams::new(
            addr(1),
            owner,
            chain,
            addr(2),
            addr(3),
            U256::from(100u64),
            addr(4),
            1,
        )
    }

    #[tokio::test]
    async fn native_transfer_has_no_paymaster() {
        let chain = deployed_chain();
        let signer = fixed_signer();

        let out = build_transfer_scenario(Scenario::Native, &params(&signer, &chain))
            .await
            .unwrap();

        assert!(out.user_op.paymaster_and_data.is_empty());
        assert_eq!(out.user_op.signature, Bytes::from(SIG.to_vec()));
        assert_eq!(out.user_op.init, None);
        assert_eq!(out.user_op.account_gas_limits.unpack(), (75_000, 150_000));
        assert_eq!(
            out.user_op.gas_fees.unpack(),
            (2_000_000_000, 2_000_000_000)
        );
        assert_eq!(
            out.op_hash,
            user_op_hash(&out.user_op, addr(4), 1),
            "opHash must cover the returned op"
        );
    }

    #[tokio::test]
    async fn gasless_v4_carries_paymaster() {
        let chain = deployed_chain();
        let signer = fixed_signer();
        let p = params(&signer, &chain).with_paymaster(addr(5));

        let out = build_transfer_scenario(Scenario::GaslessV4, &p).await.unwrap();

        assert!(!out.user_op.paymaster_and_data.is_empty());
        let pmd = decode(&out.user_op.paymaster_and_data).unwrap().unwrap();
        assert_eq!(pmd.paymaster, addr(5));
        assert_eq!(pmd.verification_gas_limit, 100_000);
        assert_eq!(pmd.post_op_gas_limit, 40_000);
        assert!(pmd.paymaster_data.is_empty());
        assert_eq!(out.user_op.account_gas_limits.high(), 250_000);
    }

    #[tokio::test]
    async fn missing_paymaster_fails_before_any_read() {
        for scenario in [
            Scenario::GaslessV4,
            Scenario::SuperBpnt,
            Scenario::SuperCpnt,
            Scenario::SuperCustom,
        ] {
            let mut chain = MockChainReader::new();
            chain.expect_get_code().times(0);
            chain.expect_get_nonce().times(0);
            chain.expect_gas_price().times(0);
            let mut signer = MockUserOpSigner::new();
            signer.expect_sign_hash().times(0);

            let p = params(&signer, &chain).with_operator(addr(6));
            let err = build_transfer_scenario(scenario, &p).await.unwrap_err();
            assert!(
                matches!(err, ScenarioError::Validation(_)),
                "{scenario}: {err}"
            );
        }
    }

    #[tokio::test]
    async fn zero_paymaster_counts_as_missing() {
        let chain = MockChainReader::new();
        let signer = MockUserOpSigner::new();
        let p = params(&signer, &chain).with_paymaster(Address::zero());
        let err = build_transfer_scenario(Scenario::GaslessV4, &p)
            .await
            .unwrap_err();
        assert!(matches!(err, ScenarioError::Validation(_)));
    }

    #[tokio::test]
    async fn super_bpnt_encodes_operator_and_token() {
        let chain = deployed_chain();
        let signer = fixed_signer();
        let p = params(&signer, &chain)
            .with_paymaster(addr(5))
            .with_operator(addr(6));

        let out = build_transfer_scenario(Scenario::SuperBpnt, &p).await.unwrap();

        let pmd = decode(&out.user_op.paymaster_and_data).unwrap().unwrap();
        assert_eq!(
            PaymasterPayload::decode_super_paymaster(&pmd.paymaster_data).unwrap(),
            (addr(6), addr(3))
        );
    }

    #[tokio::test]
    async fn super_cpnt_defaults_to_community() {
        let chain = deployed_chain();
        let signer = fixed_signer();
        let communities = CommunityDirectory {
            bpnt: Some(Community {
                operator: Some(addr(0xb0)),
                token: addr(0xb1),
            }),
            cpnt: Some(Community {
                operator: Some(addr(0xc0)),
                token: addr(0xc1),
            }),
        };
        let p = params(&signer, &chain)
            .with_paymaster(addr(5))
            .with_communities(communities);

        let out = build_transfer_scenario(Scenario::SuperCpnt, &p).await.unwrap();
        let pmd = decode(&out.user_op.paymaster_and_data).unwrap().unwrap();
        assert_eq!(
            PaymasterPayload::decode_super_paymaster(&pmd.paymaster_data).unwrap(),
            (addr(0xc0), addr(0xc1))
        );
    }

    #[test]
    fn super_custom_requires_explicit_operator_even_with_communities() {
        let chain = MockChainReader::new();
        let signer = MockUserOpSigner::new();
        let communities = CommunityDirectory {
            bpnt: Some(Community {
                operator: Some(addr(0xb0)),
                token: addr(0xb1),
            }),
            cpnt: None,
        };
        let p = params(&signer, &chain)
            .with_paymaster(addr(5))
            .with_communities(communities);
        assert!(matches!(
            resolve_sponsorship(Scenario::SuperCustom, &p),
            Err(ScenarioError::Validation(_))
        ));

        let p = p.with_operator(addr(6)).with_gas_token(addr(7));
        assert_eq!(
            resolve_sponsorship(Scenario::SuperCustom, &p).unwrap(),
            Sponsorship::Paymaster {
                paymaster: addr(5),
                payload: PaymasterPayload::SuperPaymaster {
                    operator: addr(6),
                    token: addr(7),
                },
            }
        );
    }

    #[test]
    fn native_rejects_a_paymaster() {
        let chain = MockChainReader::new();
        let signer = MockUserOpSigner::new();
        let p = params(&signer, &chain).with_paymaster(addr(5));
        assert!(resolve_sponsorship(Scenario::Native, &p).is_err());
    }

    #[tokio::test]
    async fn identical_params_give_identical_hash() {
        let chain = deployed_chain();
        let signer = fixed_signer();
        let p = params(&signer, &chain).with_paymaster(addr(5));

        let a = build_transfer_scenario(Scenario::GaslessV4, &p).await.unwrap();
        let b = build_transfer_scenario(Scenario::GaslessV4, &p).await.unwrap();
        assert_eq!(a.op_hash, b.op_hash);
        assert_eq!(a.user_op, b.user_op);
    }

    #[tokio::test]
    async fn any_field_change_changes_hash() {
        let chain = deployed_chain();
        let signer = fixed_signer();
        let base = build_transfer_scenario(Scenario::Native, &params(&signer, &chain))
            .await
            .unwrap()
            .op_hash;

        let mut p = params(&signer, &chain);
        p.amount = U256::from(101u64);
        let amount = build_transfer_scenario(Scenario::Native, &p).await.unwrap();

        let mut p = params(&signer, &chain);
        p.recipient = addr(22);
        let recipient = build_transfer_scenario(Scenario::Native, &p).await.unwrap();

        let p = params(&signer, &chain).with_gas(GasSettings {
            call_gas_limit: Some(U256::from(150_001u64)),
            ..Default::default()
        });
        let gas = build_transfer_scenario(Scenario::Native, &p).await.unwrap();

        for changed in [amount.op_hash, recipient.op_hash, gas.op_hash] {
            assert_ne!(base, changed);
        }
    }

    #[tokio::test]
    async fn signature_covers_exactly_op_hash() {
        let chain = deployed_chain();
        let expected = build_transfer_scenario(
            Scenario::Native,
            &params(&fixed_signer(), &chain),
        )
        .await
        .unwrap()
        .op_hash;

        let mut signer = MockUserOpSigner::new();
        signer
            .expect_sign_hash()
            .with(eq(expected))
            .times(1)
            .returning(|h| Ok(Bytes::from(h.as_bytes().to_vec())));

        let out = build_transfer_scenario(Scenario::Native, &params(&signer, &chain))
            .await
            .unwrap();
        assert_eq!(out.user_op.signature.as_ref(), expected.as_bytes());
    }

    #[tokio::test]
    async fn undeployed_sender_gets_factory_call() {
        let mut chain = MockChainReader::new();
        chain.expect_get_code().returning(|_| Ok(Bytes::new()));
        chain.expect_get_nonce().returning(|_, _, _| Ok(U256::zero()));
        let signer = fixed_signer();
        let p = params(&signer, &chain).with_account_factory(AccountFactory {
            address: addr(9),
            salt: U256::zero(),
        });

        let out = build_transfer_scenario(Scenario::Native, &p).await.unwrap();
        let init = out.user_op.init.unwrap();
        assert_eq!(init.factory, addr(9));
        assert_eq!(
            init.factory_data,
            encode_create_account(addr(10), U256::zero()).unwrap()
        );
    }

    #[tokio::test]
    async fn nonce_key_is_passed_through() {
        let mut chain = MockChainReader::new();
        chain
            .expect_get_code()
            .returning(|_| Ok(Bytes::from(vec![1])));
        chain
            .expect_get_nonce()
            .with(eq(addr(4)), eq(addr(1)), eq(U256::from(77u64)))
            .times(1)
            .returning(|_, _, key| Ok((key << 64) | U256::from(2u64)));
        let signer = fixed_signer();
        let p = params(&signer, &chain).with_nonce_key(NonceKey::from_lane(77));

        let out = build_transfer_scenario(Scenario::Native, &p).await.unwrap();
        assert_eq!(out.user_op.nonce, NonceKey::from_lane(77).compose(2));
    }

    #[tokio::test]
    async fn transport_failure_aborts_with_step() {
        let mut chain = MockChainReader::new();
        chain
            .expect_get_code()
            .returning(|_| Err(anyhow::anyhow!("rpc down")));
        chain.expect_get_nonce().times(0);
        let mut signer = MockUserOpSigner::new();
        signer.expect_sign_hash().times(0);

        let err = build_transfer_scenario(Scenario::Native, &params(&signer, &chain))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScenarioError::Transport {
                step: BuildStep::ResolveDeployment,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn signing_failure_is_reported() {
        let chain = deployed_chain();
        let mut signer = MockUserOpSigner::new();
        signer
            .expect_sign_hash()
            .returning(|_| Err(anyhow::anyhow!("hardware wallet locked")));

        let err = build_transfer_scenario(Scenario::Native, &params(&signer, &chain))
            .await
            .unwrap_err();
        assert!(matches!(err, ScenarioError::Signing(_)));
    }

    #[tokio::test]
    async fn oversized_gas_override_is_an_encoding_error() {
        let chain = deployed_chain();
        let signer = fixed_signer();
        let p = params(&signer, &chain).with_gas(GasSettings {
            verification_gas_limit: Some(U256::one() << 128),
            ..Default::default()
        });
        let err = build_transfer_scenario(Scenario::Native, &p)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScenarioError::Encoding {
                step: BuildStep::AssignGas,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn network_fees_apply_multiplier() {
        let mut chain = deployed_chain();
        chain
            .expect_gas_price()
            .times(1)
            .returning(|| Ok(U256::from(1_000_000_000u64)));
        let signer = fixed_signer();
        let p = params(&signer, &chain).with_gas(GasSettings {
            fees: FeeStrategy::Network {
                multiplier_bps: 15_000,
            },
            ..Default::default()
        });

        let out = build_transfer_scenario(Scenario::Native, &p).await.unwrap();
        assert_eq!(
            out.user_op.gas_fees.unpack(),
            (1_500_000_000, 1_500_000_000)
        );
    }

    #[tokio::test]
    async fn gasless_deposit_mode_appends_token_and_window() {
        let chain = deployed_chain();
        let signer = fixed_signer();
        let p = params(&signer, &chain)
            .with_paymaster(addr(5))
            .with_gasless_mode(GaslessMode::Deposit {
                token: None,
                valid_until: 2_000_000_000,
                valid_after: 0,
            });

        let out = build_transfer_scenario(Scenario::GaslessV4, &p).await.unwrap();
        let pmd = decode(&out.user_op.paymaster_and_data).unwrap().unwrap();
        assert_eq!(pmd.paymaster_data.len(), 32);
        assert_eq!(&pmd.paymaster_data[..20], addr(3).as_bytes());
        assert_eq!(&pmd.paymaster_data[20..26], &[0x00, 0x00, 0x77, 0x35, 0x94, 0x00]);
        assert_eq!(&pmd.paymaster_data[26..], &[0u8; 6]);
    }

    #[test]
    fn deposit_window_must_be_open() {
        let chain = MockChainReader::new();
        let signer = MockUserOpSigner::new();
        let p = params(&signer, &chain)
            .with_paymaster(addr(5))
            .with_gasless_mode(GaslessMode::Deposit {
                token: None,
                valid_until: 10,
                valid_after: 10,
            });
        assert!(matches!(
            resolve_sponsorship(Scenario::GaslessV4, &p),
            Err(ScenarioError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn custom_call_data_replaces_transfer() {
        let chain = deployed_chain();
        let signer = fixed_signer();
        let custom = Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]);
        let p = params(&signer, &chain).with_call_data(custom.clone());

        let out = build_transfer_scenario(Scenario::Native, &p).await.unwrap();
        assert_eq!(out.user_op.call_data, custom);
    }

    #[test]
    fn priority_above_max_is_rejected() {
        let gas = GasSettings {
            max_priority_fee_per_gas: Some(U256::from(3u64)),
            max_fee_per_gas: Some(U256::from(2u64)),
            ..Default::default()
        };
        assert!(matches!(
            validate_gas(&gas),
            Err(ScenarioError::Validation(_))
        ));
    }

    #[test]
    fn scenario_names_round_trip() {
        for sc in Scenario::ALL {
            assert_eq!(sc.as_str().parse::<Scenario>().unwrap(), sc);
        }
        assert_eq!("super-bpnt".parse::<Scenario>().unwrap(), Scenario::SuperBpnt);
        assert!("SUPER_APNT".parse::<Scenario>().is_err());
    }
}
