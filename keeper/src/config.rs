//! Application configuration loaded from environment variables.
//!
//! Required: `RAFFLE_PROGRAM_ID`, `RAFFLE_AUTHORITY`
//! Optional: `RPC_URL`, `WS_URL`, `KEEPER_KEYPAIR_PATH`, `CLUSTER`,
//!           `HTTP_PORT`, `MAX_RETRIES`, `INITIAL_RETRY_DELAY_MS`,
//!           `PRIORITY_FEE_MICRO_LAMPORTS`, `POLL_INTERVAL_MS`,
//!           `CALCULATING_ALARM_SECS`

use anyhow::{Context, Result};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{read_keypair_file, Keypair};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::raffle_account::raffle_address;

/// Application configuration for the raffle keeper.
#[derive(Clone)]
pub struct AppConfig {
    /// Solana JSON-RPC endpoint (HTTP).
    pub rpc_url: String,
    /// Solana PubSub endpoint (WebSocket) for log subscriptions.
    pub ws_url: String,
    /// Pays for and signs `perform_upkeep` transactions.
    pub keeper_keypair: Arc<Keypair>,
    /// The deployed raffle program ID.
    pub program_id: Pubkey,
    /// Creator of the raffle being kept.
    pub raffle_authority: Pubkey,
    /// Raffle PDA, derived from the program ID and authority.
    pub raffle: Pubkey,
    /// Cluster name for explorer URLs.
    pub cluster: String,
    /// HTTP server port.
    pub http_port: u16,
    /// Maximum send attempts per `perform_upkeep`.
    pub max_retries: u32,
    /// Initial retry delay in milliseconds.
    pub initial_retry_delay_ms: u64,
    /// Priority fee in micro-lamports per compute unit.
    pub priority_fee_micro_lamports: u64,
    /// Delay between upkeep checks.
    pub poll_interval: Duration,
    /// How long the raffle may sit in `Calculating` before alarming.
    pub calculating_alarm: Duration,
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn required_pubkey(name: &str) -> Result<Pubkey> {
    let value = std::env::var(name).with_context(|| format!("{name} env var must be set"))?;
    Pubkey::from_str(&value).with_context(|| format!("invalid {name}: {value}"))
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let rpc_url = std::env::var("RPC_URL").unwrap_or_else(|_| "http://127.0.0.1:8899".into());
        let ws_url = std::env::var("WS_URL").unwrap_or_else(|_| "ws://127.0.0.1:8900".into());

        let keypair_path = std::env::var("KEEPER_KEYPAIR_PATH")
            .unwrap_or_else(|_| "~/.config/solana/id.json".into());
        let keypair_path = shellexpand::tilde(&keypair_path).to_string();
        let keeper_keypair = read_keypair_file(&keypair_path)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("failed to read keypair from {keypair_path}"))?;

        let program_id = required_pubkey("RAFFLE_PROGRAM_ID")?;
        let raffle_authority = required_pubkey("RAFFLE_AUTHORITY")?;
        let raffle = raffle_address(&program_id, &raffle_authority);

        let cluster = std::env::var("CLUSTER").unwrap_or_else(|_| "devnet".into());

        Ok(Self {
            rpc_url,
            ws_url,
            keeper_keypair: Arc::new(keeper_keypair),
            program_id,
            raffle_authority,
            raffle,
            cluster,
            http_port: env_or("HTTP_PORT", 8080),
            max_retries: env_or("MAX_RETRIES", 5),
            initial_retry_delay_ms: env_or("INITIAL_RETRY_DELAY_MS", 500),
            priority_fee_micro_lamports: env_or("PRIORITY_FEE_MICRO_LAMPORTS", 0),
            poll_interval: Duration::from_millis(env_or("POLL_INTERVAL_MS", 5_000)),
            calculating_alarm: Duration::from_secs(env_or("CALCULATING_ALARM_SECS", 300)),
        })
    }

    /// Return the Solscan explorer URL for a given transaction signature.
    pub fn explorer_url(&self, signature: &str) -> String {
        explorer_url(&self.cluster, signature)
    }
}

fn explorer_url(cluster: &str, signature: &str) -> String {
    match cluster {
        "mainnet-beta" => format!("https://solscan.io/tx/{signature}"),
        cluster => format!("https://solscan.io/tx/{signature}?cluster={cluster}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explorer_url_omits_mainnet_cluster() {
        assert_eq!(explorer_url("mainnet-beta", "abc"), "https://solscan.io/tx/abc");
        assert_eq!(
            explorer_url("devnet", "abc"),
            "https://solscan.io/tx/abc?cluster=devnet"
        );
    }

    #[test]
    fn env_or_falls_back_when_unset() {
        assert_eq!(env_or("RAFFLE_KEEPER_TEST_UNSET_VAR", 42u32), 42);
    }
}
