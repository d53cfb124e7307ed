use aastar_userop::bundler::{BundlerClient, GasEstimates};
use aastar_userop::bundler_format::WireFormat;
use aastar_userop::chain::{ChainReader, EthersChainReader};
use aastar_userop::config::{load_deployment, Deployment};
use aastar_userop::encoding;
use aastar_userop::nonce::NonceKey;
use aastar_userop::paymaster::{self, PaymasterPayload};
use aastar_userop::scenario::{
    build_transfer_scenario, AccountFactory, FeeStrategy, GasSettings, Scenario, ScenarioParams,
};
use aastar_userop::types::SignedUserOperation;
use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

// In --json mode stdout carries exactly one JSON document; everything else goes to stderr.
macro_rules! outln {
    ($machine_mode:expr, $($arg:tt)*) => {{
        if $machine_mode {
            eprintln!($($arg)*);
        } else {
            println!($($arg)*);
        }
    }};
}

#[derive(Parser, Debug)]
#[command(name = "aastar-userop", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the counterfactual smart account address (and deployment status).
    Account(AccountArgs),

    /// Build, sign and (unless --dry-run) send a token transfer UserOperation.
    Transfer(TransferArgs),

    /// Decode a v0.7 paymasterAndData hex string.
    DecodePaymasterData(DecodeArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Deployment artifact (EntryPoint, factory, paymasters, communities).
    #[arg(long, default_value = "deployments/anvil.json")]
    deployment: PathBuf,

    /// Override the chain RPC URL (otherwise uses deployment JSON).
    #[arg(long, env = "AASTAR_RPC_URL")]
    rpc: Option<String>,

    /// Smart account owner private key.
    ///
    /// Recommended: set via env var AASTAR_OWNER_PRIVATE_KEY.
    #[arg(long, env = "AASTAR_OWNER_PRIVATE_KEY", hide_env_values = true)]
    owner_private_key: Option<String>,

    /// CREATE2 salt for the smart account.
    #[arg(long, default_value_t = 0)]
    salt: u64,

    /// Print a single JSON object to stdout; logs go to stderr.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct AccountArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum WireFormatArg {
    /// Flat for bundlers known to need it, packed otherwise.
    Auto,
    Packed,
    Flat,
}

#[derive(Args, Debug)]
struct TransferArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// NATIVE, GASLESS_V4, SUPER_BPNT, SUPER_CPNT or SUPER_CUSTOM.
    #[arg(long, default_value = "NATIVE")]
    scenario: Scenario,

    /// ERC-20 token to transfer.
    #[arg(long)]
    token: String,

    /// Recipient address.
    #[arg(long)]
    to: String,

    /// Amount in raw base units (decimal).
    #[arg(long)]
    amount: String,

    /// Smart account sending the transfer. Defaults to the counterfactual account of the owner.
    #[arg(long)]
    sender: Option<String>,

    /// Paymaster address. Defaults to the deployment's paymasterV4 / superPaymaster.
    #[arg(long)]
    paymaster: Option<String>,

    /// SuperPaymaster operator.
    #[arg(long)]
    operator: Option<String>,

    /// Token the paymaster charges, if different from --token.
    #[arg(long)]
    gas_token: Option<String>,

    /// Nonce lane (192-bit key, given as u64).
    #[arg(long, conflicts_with = "random_nonce_key")]
    nonce_key: Option<u64>,

    /// Use a random 192-bit nonce key.
    #[arg(long, default_value_t = false)]
    random_nonce_key: bool,

    /// Price gas from eth_gasPrice times this multiplier in basis points (e.g. 15000 = 1.5x).
    ///
    /// Without it both fee fields are 2 gwei.
    #[arg(long, env = "AASTAR_GAS_MULTIPLIER_BPS")]
    gas_multiplier_bps: Option<u64>,

    #[arg(long)]
    verification_gas_limit: Option<u64>,

    #[arg(long)]
    call_gas_limit: Option<u64>,

    #[arg(long)]
    pre_verification_gas: Option<u64>,

    /// Ask the bundler for gas limits and rebuild with them.
    #[arg(long, default_value_t = false)]
    estimate: bool,

    /// Cross-check the local userOpHash against EntryPoint.getUserOpHash.
    #[arg(long, default_value_t = false)]
    verify_hash: bool,

    /// Bundler RPC URL (must support ERC-4337 JSON-RPC methods).
    #[arg(long, env = "AASTAR_BUNDLER_URL")]
    bundler: Option<String>,

    #[arg(long, value_enum, default_value_t = WireFormatArg::Auto)]
    wire_format: WireFormatArg,

    /// Do not send the UserOperation; only build and sign it.
    #[arg(long)]
    dry_run: bool,

    /// Do not wait for the userOp receipt.
    #[arg(long)]
    no_wait: bool,

    /// Max seconds to wait for userOp receipt. Use 0 to disable timeout.
    #[arg(long, default_value_t = 180)]
    max_wait_seconds: u64,
}

#[derive(Args, Debug)]
struct DecodeArgs {
    /// 0x-prefixed paymasterAndData.
    data: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        // Always write logs to stderr so stdout can be used for script-friendly outputs.
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Account(args) => cmd_account(args).await,
        Command::Transfer(args) => cmd_transfer(args).await,
        Command::DecodePaymasterData(args) => cmd_decode_paymaster_data(args),
    }
}

async fn connect(common: &CommonArgs) -> Result<(Deployment, Arc<Provider<Http>>, LocalWallet)> {
    let dep = load_deployment(&common.deployment, common.rpc.clone())?;

    let provider =
        Provider::<Http>::try_from(dep.rpc_url.as_str())?.interval(Duration::from_millis(350));

    let chain_id = provider.get_chainid().await?.as_u64();
    if chain_id != dep.chain_id {
        return Err(anyhow!(
            "chainId mismatch: deployment has {}, RPC returned {}",
            dep.chain_id,
            chain_id
        ));
    }

    let owner_pk = common
        .owner_private_key
        .clone()
        .ok_or_else(|| anyhow!("missing AASTAR_OWNER_PRIVATE_KEY (or --owner-private-key)"))?;
    let wallet = LocalWallet::from_str(&owner_pk)
        .context("invalid owner private key")?
        .with_chain_id(chain_id);

    Ok((dep, Arc::new(provider), wallet))
}

async fn cmd_account(args: AccountArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let (dep, provider, wallet) = connect(&args.common).await?;
    let chain = EthersChainReader::new(provider);

    let factory = dep
        .account_factory
        .ok_or_else(|| anyhow!("deployment has no accountFactory"))?;
    let owner = Signer::address(&wallet);
    let account = chain
        .get_sender_address(factory, owner, U256::from(args.common.salt))
        .await?;
    let deployed = !chain.get_code(account).await?.is_empty();

    if machine_mode {
        let out = serde_json::json!({
            "owner": encoding::fmt_address(owner),
            "smartAccount": encoding::fmt_address(account),
            "isDeployed": deployed,
        });
        println!("{}", out);
    }

    outln!(machine_mode, "chainId:        {}", dep.chain_id);
    outln!(machine_mode, "entryPoint:     {:?}", dep.entry_point);
    outln!(machine_mode, "factory:        {:?}", factory);
    outln!(machine_mode, "owner:          {:?}", owner);
    outln!(machine_mode, "smartAccount:   {:?}", account);
    outln!(machine_mode, "isDeployed:     {}", deployed);

    Ok(())
}

async fn cmd_transfer(args: TransferArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let (dep, provider, wallet) = connect(&args.common).await?;
    let chain = EthersChainReader::new(provider);
    let owner = Signer::address(&wallet);
    let salt = U256::from(args.common.salt);

    let account_factory = dep
        .account_factory
        .map(|address| AccountFactory { address, salt });

    let sender = match args.sender.as_deref() {
        Some(s) => parse_addr(s, "--sender")?,
        None => {
            let factory = account_factory.ok_or_else(|| {
                anyhow!("--sender not given and deployment has no accountFactory")
            })?;
            chain
                .get_sender_address(factory.address, owner, salt)
                .await?
        }
    };

    let paymaster = match args.paymaster.as_deref() {
        Some(s) => Some(parse_addr(s, "--paymaster")?),
        None => match args.scenario {
            Scenario::Native => None,
            Scenario::GaslessV4 => dep.paymaster_v4,
            Scenario::SuperBpnt | Scenario::SuperCpnt | Scenario::SuperCustom => {
                dep.super_paymaster
            }
        },
    };

    let nonce_key = if args.random_nonce_key {
        Some(NonceKey::random())
    } else {
        args.nonce_key.map(NonceKey::from_lane)
    };

    let mut params = ScenarioParams::new(
        sender,
        &wallet,
        &chain,
        parse_addr(&args.to, "--to")?,
        parse_addr(&args.token, "--token")?,
        U256::from_dec_str(&args.amount).context("invalid --amount")?,
        dep.entry_point,
        dep.chain_id,
    )
    .with_communities(dep.communities);
    params.paymaster = paymaster;
    params.operator = args
        .operator
        .as_deref()
        .map(|s| parse_addr(s, "--operator"))
        .transpose()?;
    params.gas_token = args
        .gas_token
        .as_deref()
        .map(|s| parse_addr(s, "--gas-token"))
        .transpose()?;
    params.nonce_key = nonce_key;
    params.account_factory = account_factory;
    params.gas = GasSettings {
        verification_gas_limit: args.verification_gas_limit.map(U256::from),
        call_gas_limit: args.call_gas_limit.map(U256::from),
        pre_verification_gas: args.pre_verification_gas.map(U256::from),
        fees: match args.gas_multiplier_bps {
            Some(multiplier_bps) => FeeStrategy::Network { multiplier_bps },
            None => FeeStrategy::Fixed,
        },
        ..Default::default()
    };

    let bundler = args.bundler.clone().map(|url| match args.wire_format {
        WireFormatArg::Auto => BundlerClient::new(url),
        WireFormatArg::Packed => BundlerClient::with_format(url, WireFormat::Packed),
        WireFormatArg::Flat => BundlerClient::with_format(url, WireFormat::Flat),
    });

    let mut signed = build_transfer_scenario(args.scenario, &params).await?;

    if args.estimate {
        let bundler = bundler
            .as_ref()
            .ok_or_else(|| anyhow!("--estimate requires --bundler (or AASTAR_BUNDLER_URL)"))?;
        let est = bundler
            .estimate_user_operation_gas(&signed.user_op, dep.entry_point)
            .await
            .context("bundler gas estimate failed")?;
        apply_estimates(&mut params.gas, &est);
        signed = build_transfer_scenario(args.scenario, &params).await?;
    }

    if args.verify_hash {
        verify_hash(&chain, dep.entry_point, &signed).await?;
    }

    let format = match (&bundler, args.wire_format) {
        (Some(b), _) => b.format(),
        (None, WireFormatArg::Flat) => WireFormat::Flat,
        (None, _) => WireFormat::Packed,
    };

    outln!(machine_mode, "scenario:   {}", args.scenario);
    outln!(machine_mode, "sender:     {:?}", sender);
    outln!(machine_mode, "userOpHash: {}", encoding::fmt_h256(signed.op_hash));
    outln!(
        machine_mode,
        "\nUserOperation ({:?}):\n{}",
        format,
        serde_json::to_string_pretty(&format.to_json(&signed.user_op)?)?
    );

    if args.dry_run {
        outln!(machine_mode, "\n--dry-run set: not sending user operation.");
        if machine_mode {
            print_result_json(&signed, format, None)?;
        }
        return Ok(());
    }

    let bundler =
        bundler.ok_or_else(|| anyhow!("missing --bundler (or AASTAR_BUNDLER_URL)"))?;

    let user_op_hash = bundler
        .send_user_operation(&signed.user_op, dep.entry_point)
        .await
        .context("bundler send failed")?;
    if user_op_hash != signed.op_hash {
        tracing::warn!(
            local = %encoding::fmt_h256(signed.op_hash),
            bundler = %encoding::fmt_h256(user_op_hash),
            "bundler returned a different userOpHash"
        );
    }
    outln!(
        machine_mode,
        "\nsent; bundler userOpHash: {}",
        encoding::fmt_h256(user_op_hash)
    );

    let receipt = if args.no_wait {
        outln!(machine_mode, "--no-wait set: not waiting for receipt.");
        None
    } else {
        let receipt = bundler
            .wait_user_operation_receipt(user_op_hash, Duration::from_secs(args.max_wait_seconds))
            .await
            .context("failed waiting for userOp receipt")?;
        outln!(
            machine_mode,
            "\nUserOp receipt:\n{}",
            serde_json::to_string_pretty(&receipt)?
        );
        Some(receipt)
    };

    if machine_mode {
        print_result_json(&signed, format, receipt)?;
    }

    Ok(())
}

fn apply_estimates(gas: &mut GasSettings, est: &GasEstimates) {
    gas.call_gas_limit = Some(est.call_gas_limit);
    gas.verification_gas_limit = Some(est.verification_gas_limit);
    gas.pre_verification_gas = Some(est.pre_verification_gas);
    if est.paymaster_verification_gas_limit.is_some() {
        gas.paymaster_verification_gas_limit = est.paymaster_verification_gas_limit;
    }
    if est.paymaster_post_op_gas_limit.is_some() {
        gas.paymaster_post_op_gas_limit = est.paymaster_post_op_gas_limit;
    }
    tracing::info!(
        call_gas_limit = %est.call_gas_limit,
        verification_gas_limit = %est.verification_gas_limit,
        pre_verification_gas = %est.pre_verification_gas,
        "applied bundler gas estimates"
    );
}

async fn verify_hash(
    chain: &dyn ChainReader,
    entry_point: Address,
    signed: &SignedUserOperation,
) -> Result<()> {
    let onchain = chain
        .get_user_op_hash(entry_point, &signed.user_op)
        .await
        .context("hash cross-check failed")?;
    if onchain != signed.op_hash {
        bail!(
            "local userOpHash {} != EntryPoint.getUserOpHash {}",
            encoding::fmt_h256(signed.op_hash),
            encoding::fmt_h256(onchain)
        );
    }
    tracing::info!("userOpHash matches EntryPoint.getUserOpHash");
    Ok(())
}

fn print_result_json(
    signed: &SignedUserOperation,
    format: WireFormat,
    receipt: Option<serde_json::Value>,
) -> Result<()> {
    let out = serde_json::json!({
        "userOpHash": encoding::fmt_h256(signed.op_hash),
        "userOp": format.to_json(&signed.user_op)?,
        "receipt": receipt,
    });
    println!("{}", out);
    Ok(())
}

fn cmd_decode_paymaster_data(args: DecodeArgs) -> Result<()> {
    let data = encoding::parse_bytes(&args.data)?;
    let Some(pmd) = paymaster::decode(&data)? else {
        println!("{}", serde_json::json!({ "paymaster": null }));
        return Ok(());
    };

    let mut out = serde_json::json!({
        "paymaster": encoding::fmt_address(pmd.paymaster),
        "paymasterVerificationGasLimit": pmd.verification_gas_limit.to_string(),
        "paymasterPostOpGasLimit": pmd.post_op_gas_limit.to_string(),
        "paymasterData": encoding::fmt_bytes(&pmd.paymaster_data),
    });
    // operator ‖ token is the only fixed-size payload that decodes unambiguously
    if pmd.paymaster_data.len() == 40 {
        let (operator, token) = PaymasterPayload::decode_super_paymaster(&pmd.paymaster_data)?;
        out["superPaymaster"] = serde_json::json!({
            "operator": encoding::fmt_address(operator),
            "token": encoding::fmt_address(token),
        });
    }
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn parse_addr(s: &str, flag: &str) -> Result<Address> {
    Address::from_str(s).with_context(|| format!("invalid {flag} address"))
}
