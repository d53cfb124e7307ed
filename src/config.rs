use crate::scenario::{Community, CommunityDirectory};
use anyhow::{anyhow, Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::{env, fs, path::Path};

/// Canonical EntryPoint v0.7 deployment.
pub const ENTRY_POINT_V07: &str = "0x0000000071727De22E5E9d8BAf0edAc6f37da032";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRaw {
    pub chain_id: u64,
    pub rpc: String,
    #[serde(default)]
    pub rpc_env_var: Option<String>,
    #[serde(default)]
    pub entry_point: Option<String>,
    #[serde(default)]
    pub account_factory: Option<String>,
    #[serde(default)]
    pub paymaster_v4: Option<String>,
    #[serde(default)]
    pub super_paymaster: Option<String>,
    #[serde(default)]
    pub communities: CommunitiesRaw,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommunitiesRaw {
    #[serde(default)]
    pub bpnt: Option<CommunityRaw>,
    #[serde(default)]
    pub cpnt: Option<CommunityRaw>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommunityRaw {
    #[serde(default)]
    pub operator: Option<String>,
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct Deployment {
    pub chain_id: u64,
    pub rpc_url: String,
    pub entry_point: Address,
    pub account_factory: Option<Address>,
    pub paymaster_v4: Option<Address>,
    pub super_paymaster: Option<Address>,
    pub communities: CommunityDirectory,
}

pub fn load_deployment(path: &Path, rpc_override: Option<String>) -> Result<Deployment> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read deployment json at {}", path.display()))?;
    let raw: DeploymentRaw = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse deployment json at {}", path.display()))?;
    resolve_deployment(raw, rpc_override)
}

fn resolve_deployment(raw: DeploymentRaw, rpc_override: Option<String>) -> Result<Deployment> {
    let rpc_url = if let Some(rpc) = rpc_override {
        rpc
    } else if let Some(env_var) = raw.rpc_env_var.clone() {
        env::var(&env_var).unwrap_or(raw.rpc.clone())
    } else {
        raw.rpc.clone()
    };

    let entry_point = parse_addr(raw.entry_point.as_deref().unwrap_or(ENTRY_POINT_V07))
        .context("invalid entryPoint address")?;

    Ok(Deployment {
        chain_id: raw.chain_id,
        rpc_url,
        entry_point,
        account_factory: parse_opt_addr(raw.account_factory.as_deref())
            .context("invalid accountFactory address")?,
        paymaster_v4: parse_opt_addr(raw.paymaster_v4.as_deref())
            .context("invalid paymasterV4 address")?,
        super_paymaster: parse_opt_addr(raw.super_paymaster.as_deref())
            .context("invalid superPaymaster address")?,
        communities: CommunityDirectory {
            bpnt: parse_community(raw.communities.bpnt.as_ref()).context("invalid bpnt community")?,
            cpnt: parse_community(raw.communities.cpnt.as_ref()).context("invalid cpnt community")?,
        },
    })
}

fn parse_community(raw: Option<&CommunityRaw>) -> Result<Option<Community>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    Ok(Some(Community {
        operator: parse_opt_addr(raw.operator.as_deref()).context("invalid operator")?,
        token: parse_addr(&raw.token).context("invalid token")?,
    }))
}

fn parse_opt_addr(s: Option<&str>) -> Result<Option<Address>> {
    s.map(parse_addr).transpose()
}

fn parse_addr(s: &str) -> Result<Address> {
    s.parse::<Address>().map_err(|e| anyhow!("{e}: {s:?}"))
}
