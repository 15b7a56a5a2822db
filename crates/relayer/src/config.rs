use mystify_sdk::{
    compression::StateTreeInfo,
    validator::DEFAULT_MAX_COMPUTE_UNIT_PRICE,
    withdrawal::{DEFAULT_FEE_BPS, MAX_WITHDRAWAL_LAMPORTS, MIN_WITHDRAWAL_LAMPORTS},
    ValidatorConfig, WithdrawalBounds,
};
use solana_sdk::pubkey::Pubkey;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_RPC_URL: &str = "https://api.mainnet-beta.solana.com";

#[derive(Clone)]
pub struct RelayerConfig {
    pub rpc_url: String,
    /// Photon indexer endpoint; most providers serve it on the RPC URL
    pub compression_rpc_url: String,
    /// Fee payer secret, base58 or a JSON byte array. Checked per request.
    pub fee_payer_secret: Option<String>,
    pub host: String,
    pub port: u16,
    pub fee_bps: u16,
    pub bounds: WithdrawalBounds,
    /// Micro-lamports per compute unit
    pub max_compute_unit_price: u64,
    pub extra_allowed_programs: Vec<Pubkey>,
    pub state_tree: StateTreeInfo,
    pub gasless_enabled: bool,
}

impl fmt::Debug for RelayerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayerConfig")
            .field("rpc_url", &self.rpc_url)
            .field("compression_rpc_url", &self.compression_rpc_url)
            .field("fee_payer_secret", &self.fee_payer_secret.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("fee_bps", &self.fee_bps)
            .field("bounds", &self.bounds)
            .field("max_compute_unit_price", &self.max_compute_unit_price)
            .field("extra_allowed_programs", &self.extra_allowed_programs)
            .field("state_tree", &self.state_tree)
            .field("gasless_enabled", &self.gasless_enabled)
            .finish()
    }
}

impl RelayerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let rpc_url = var("RPC_URL").unwrap_or_else(|| DEFAULT_RPC_URL.to_string());
        let compression_rpc_url = var("COMPRESSION_RPC_URL").unwrap_or_else(|| rpc_url.clone());

        let fee_payer_secret = var("PROXY_WALLET_PRIVATE_KEY").filter(|s| !s.trim().is_empty());

        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = var("PORT").and_then(|s| s.parse().ok()).unwrap_or(8080);

        let fee_bps = var("FEE_BPS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_FEE_BPS); // 0.5% default

        let bounds = WithdrawalBounds {
            min: var("MIN_WITHDRAWAL_LAMPORTS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(MIN_WITHDRAWAL_LAMPORTS),
            max: var("MAX_WITHDRAWAL_LAMPORTS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(MAX_WITHDRAWAL_LAMPORTS),
        };
        if bounds.min > bounds.max {
            anyhow::bail!(
                "MIN_WITHDRAWAL_LAMPORTS ({}) exceeds MAX_WITHDRAWAL_LAMPORTS ({})",
                bounds.min,
                bounds.max
            );
        }

        let max_compute_unit_price = var("MAX_COMPUTE_UNIT_PRICE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_COMPUTE_UNIT_PRICE);

        let extra_allowed_programs = var("EXTRA_ALLOWED_PROGRAMS")
            .map(|list| parse_pubkey_list(&list))
            .transpose()?
            .unwrap_or_default();

        let state_tree = parse_state_tree(var("STATE_TREE"), var("NULLIFIER_QUEUE"))?;

        let gasless_enabled = var("GASLESS_WITHDRAW_ENABLED")
            .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            rpc_url,
            compression_rpc_url,
            fee_payer_secret,
            host,
            port,
            fee_bps,
            bounds,
            max_compute_unit_price,
            extra_allowed_programs,
            state_tree,
            gasless_enabled,
        })
    }

    pub fn validator_config(&self, fee_payer: Pubkey) -> ValidatorConfig {
        ValidatorConfig::new(fee_payer)
            .with_extra_programs(self.extra_allowed_programs.iter().copied())
            .with_max_compute_unit_price(self.max_compute_unit_price)
    }
}

fn parse_pubkey_list(list: &str) -> anyhow::Result<Vec<Pubkey>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Pubkey::from_str(s).map_err(|e| anyhow::anyhow!("Invalid program id {}: {}", s, e))
        })
        .collect()
}

fn parse_state_tree(tree: Option<String>, queue: Option<String>) -> anyhow::Result<StateTreeInfo> {
    let Some(tree) = tree else {
        return Ok(StateTreeInfo::default());
    };
    let tree = Pubkey::from_str(tree.trim())
        .map_err(|e| anyhow::anyhow!("Invalid STATE_TREE {}: {}", tree, e))?;

    match queue {
        Some(queue) => Ok(StateTreeInfo {
            tree,
            queue: Pubkey::from_str(queue.trim())
                .map_err(|e| anyhow::anyhow!("Invalid NULLIFIER_QUEUE {}: {}", queue, e))?,
        }),
        None => StateTreeInfo::for_tree(&tree).ok_or_else(|| {
            anyhow::anyhow!("NULLIFIER_QUEUE is required for unknown state tree {}", tree)
        }),
    }
}
