//! Upkeep engine: polls the raffle and triggers draws when they are due.
//!
//! Each iteration:
//! 1. Reads the raffle account and updates `/status` and the stuck-draw watch.
//! 2. Simulates `check_upkeep` and decodes the returned `UpkeepCheck`.
//! 3. When upkeep is needed, reads the coordinator's `request_counter`,
//!    derives the coordinator request accounts and submits `perform_upkeep`
//!    (optionally preceded by a `set_compute_unit_price` instruction).
//!
//! Submissions are awaited, so at most one `perform_upkeep` is in flight.

use anyhow::{bail, Context, Result};
use base64::Engine;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSimulateTransactionConfig;
use solana_commitment_config::CommitmentConfig;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signer;
use solana_sdk::transaction::Transaction;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::codec::{instruction_discriminator, Reader};
use crate::config::AppConfig;
use crate::coordinator::{config_address, decode_request_counter, request_accounts};
use crate::metrics::Metrics;
use crate::raffle_account::{RaffleSnapshot, RaffleState};
use crate::status::{CalculatingWatch, KeeperStatus, RaffleView, WatchEvent};

/// `ComputeBudget111111111111111111111111111111`
const COMPUTE_BUDGET_PROGRAM_ID: Pubkey = Pubkey::new_from_array([
    3, 6, 70, 111, 229, 33, 23, 50, 255, 236, 173, 186, 114, 195, 155, 231, 188, 140, 229, 187,
    197, 247, 18, 107, 44, 67, 155, 58, 64, 0, 0, 0,
]);

/// Raffle program error codes (`6000 + variant index`).
const ERROR_UPKEEP_NOT_NEEDED: u32 = 6002;
const ERROR_INVALID_COORDINATOR: u32 = 6009;

/// Decoded `check_upkeep` return value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpkeepCheck {
    pub upkeep_needed: bool,
    pub perform_data: Vec<u8>,
}

/// Decode the Borsh `UpkeepCheck` from return data.
///
/// The runtime strips trailing zero bytes from return data, so a bare
/// `[1]` (or nothing at all) is a valid encoding. The input is padded back
/// to its declared length before decoding.
pub fn decode_upkeep_check(data: &[u8]) -> Result<UpkeepCheck> {
    const HEADER: usize = 1 + 4;
    let mut padded = data.to_vec();
    if padded.len() < HEADER {
        padded.resize(HEADER, 0);
    }
    let len = u32::from_le_bytes([padded[1], padded[2], padded[3], padded[4]]) as usize;
    let full = HEADER
        .checked_add(len)
        .context("perform_data length overflows")?;
    if padded.len() > full {
        bail!("trailing bytes after UpkeepCheck");
    }
    padded.resize(full, 0);

    let mut r = Reader::new(&padded);
    let upkeep_needed = match r.u8() {
        Some(0) => false,
        Some(1) => true,
        other => bail!("invalid bool in UpkeepCheck: {other:?}"),
    };
    let perform_data = r
        .vec(|r| r.u8())
        .context("malformed perform_data")?;
    Ok(UpkeepCheck {
        upkeep_needed,
        perform_data,
    })
}

/// How a failed `perform_upkeep` should be treated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Another keeper got there first, or the gate closed in between.
    NotNeeded,
    /// The coordinator on-chain does not match what was passed. Retrying
    /// cannot help.
    Misconfigured,
    /// Anything else; the next iteration tries again.
    Transient,
}

/// Classify an error string by program error name or hex code.
pub fn classify_failure(err_str: &str) -> FailureKind {
    let has_code = |code: u32| err_str.contains(&format!("custom program error: 0x{code:x}"));
    if err_str.contains("UpkeepNotNeeded") || has_code(ERROR_UPKEEP_NOT_NEEDED) {
        FailureKind::NotNeeded
    } else if err_str.contains("InvalidCoordinator") || has_code(ERROR_INVALID_COORDINATOR) {
        FailureKind::Misconfigured
    } else {
        FailureKind::Transient
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Main upkeep loop.
pub async fn run_upkeep_loop(
    config: AppConfig,
    status: Arc<RwLock<KeeperStatus>>,
    metrics: Arc<Metrics>,
) {
    let rpc_client = RpcClient::new_with_commitment(
        config.rpc_url.clone(),
        CommitmentConfig::confirmed(),
    );
    let mut watch = CalculatingWatch::new(config.calculating_alarm);

    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        raffle = %config.raffle,
        poll = ?config.poll_interval,
        "Upkeep loop started"
    );

    loop {
        ticker.tick().await;

        if let Err(e) = run_iteration(&rpc_client, &config, &mut watch, &status, &metrics).await {
            let err_str = format!("{e:#}");
            match classify_failure(&err_str) {
                FailureKind::NotNeeded => {
                    metrics.record_skip();
                    info!(reason = %err_str, "Upkeep no longer needed, skipping");
                }
                FailureKind::Misconfigured => {
                    metrics.record_failure();
                    error!(error = %err_str, "Raffle coordinator mismatch, check configuration");
                    status.write().await.last_error = Some(err_str);
                }
                FailureKind::Transient => {
                    metrics.record_failure();
                    error!(error = %err_str, "Upkeep iteration failed");
                    status.write().await.last_error = Some(err_str);
                }
            }
        }
    }
}

async fn run_iteration(
    rpc_client: &RpcClient,
    config: &AppConfig,
    watch: &mut CalculatingWatch,
    status: &RwLock<KeeperStatus>,
    metrics: &Metrics,
) -> Result<()> {
    let data = rpc_client
        .get_account_data(&config.raffle)
        .await
        .with_context(|| format!("failed to fetch raffle account {}", config.raffle))?;
    let snapshot = RaffleSnapshot::decode(&data)?;

    observe_state(watch, &snapshot);

    metrics.record_check();
    let check = simulate_check_upkeep(rpc_client, config).await?;

    {
        let now = Instant::now();
        let mut status = status.write().await;
        status.raffle = Some(RaffleView::new(&config.raffle, &snapshot, unix_now()));
        status.upkeep_needed = Some(check.upkeep_needed);
        status.last_checked_at = Some(unix_now());
        status.calculating_for_secs = watch.calculating_for(now).map(|d| d.as_secs());
        status.calculating_alarm = watch.alarmed();
    }

    if !check.upkeep_needed {
        debug!(
            state = ?snapshot.state,
            players = snapshot.players.len(),
            pot = snapshot.pot,
            seconds_until_due = snapshot.seconds_until_due(unix_now()),
            "Upkeep not needed"
        );
        return Ok(());
    }

    info!(
        players = snapshot.players.len(),
        pot = snapshot.pot,
        "Upkeep needed, requesting a winner"
    );

    let start = Instant::now();
    let signature = perform_upkeep(rpc_client, config, &snapshot, &check.perform_data).await?;
    let latency_ms = start.elapsed().as_millis() as u64;
    metrics.record_upkeep(latency_ms);

    info!(
        signature = %signature,
        latency_ms,
        explorer = %config.explorer_url(&signature),
        "Upkeep performed"
    );

    let mut status = status.write().await;
    status.last_upkeep_signature = Some(signature);
    status.last_error = None;
    Ok(())
}

fn observe_state(watch: &mut CalculatingWatch, snapshot: &RaffleSnapshot) {
    match watch.observe(snapshot.state, Instant::now()) {
        WatchEvent::Quiet => {}
        WatchEvent::Raised(waited) => error!(
            request_id = ?snapshot.pending_request_id,
            waited = ?waited,
            "Raffle stuck in Calculating, coordinator has not fulfilled"
        ),
        WatchEvent::Resolved { waited, alarmed } => {
            if alarmed {
                warn!(waited = ?waited, "Raffle reopened after stuck draw");
            } else {
                debug!(waited = ?waited, "Draw settled");
            }
        }
    }
    if snapshot.state == RaffleState::Calculating {
        debug!(request_id = ?snapshot.pending_request_id, "Waiting for fulfillment");
    }
}

/// Simulate `check_upkeep` and decode its return data.
///
/// Missing return data means every byte was zero, i.e. not needed.
async fn simulate_check_upkeep(rpc_client: &RpcClient, config: &AppConfig) -> Result<UpkeepCheck> {
    let ix = build_check_upkeep_instruction(&config.program_id, &config.raffle);
    let tx = Transaction::new_with_payer(&[ix], Some(&config.keeper_keypair.pubkey()));

    let sim_config = RpcSimulateTransactionConfig {
        sig_verify: false,
        replace_recent_blockhash: true,
        commitment: Some(CommitmentConfig::confirmed()),
        ..Default::default()
    };
    let result = rpc_client
        .simulate_transaction_with_config(&tx, sim_config)
        .await
        .context("check_upkeep simulation failed")?
        .value;

    if let Some(err) = result.err {
        bail!(
            "check_upkeep simulation error: {err:?}, logs: {:?}",
            result.logs.unwrap_or_default()
        );
    }

    let Some(return_data) = result.return_data else {
        return Ok(UpkeepCheck {
            upkeep_needed: false,
            perform_data: Vec::new(),
        });
    };
    if return_data.program_id != config.program_id.to_string() {
        bail!("return data from unexpected program {}", return_data.program_id);
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&return_data.data.0)
        .context("invalid base64 return data")?;
    decode_upkeep_check(&bytes)
}

/// Build, sign and submit `perform_upkeep`.
#[instrument(skip_all, fields(raffle = %config.raffle))]
async fn perform_upkeep(
    rpc_client: &RpcClient,
    config: &AppConfig,
    snapshot: &RaffleSnapshot,
    perform_data: &[u8],
) -> Result<String> {
    let coordinator = snapshot.vrf.coordinator;
    let config_pda = config_address(&coordinator);
    let config_data = rpc_client
        .get_account_data(&config_pda)
        .await
        .with_context(|| format!("failed to fetch coordinator config {config_pda}"))?;
    let request_counter = decode_request_counter(&config_data)?;

    let payer = config.keeper_keypair.pubkey();
    let remaining = request_accounts(
        &coordinator,
        &payer,
        &config.raffle,
        snapshot.vrf.subscription_id,
        request_counter,
    );
    debug!(request_counter, coordinator = %coordinator, "Derived coordinator accounts");

    let mut instructions = Vec::with_capacity(2);
    if config.priority_fee_micro_lamports > 0 {
        instructions.push(build_set_compute_unit_price_instruction(
            config.priority_fee_micro_lamports,
        ));
    }
    instructions.push(build_perform_upkeep_instruction(
        &config.program_id,
        &payer,
        &config.raffle,
        &coordinator,
        perform_data,
        &remaining,
    ));

    send_with_retries(rpc_client, config, &instructions).await
}

/// Send a transaction with exponential backoff on BlockhashNotFound.
async fn send_with_retries(
    rpc_client: &RpcClient,
    config: &AppConfig,
    instructions: &[Instruction],
) -> Result<String> {
    let mut retry_delay = Duration::from_millis(config.initial_retry_delay_ms);

    for attempt in 0..config.max_retries {
        let blockhash = rpc_client
            .get_latest_blockhash()
            .await
            .context("failed to fetch latest blockhash")?;

        let tx = Transaction::new_signed_with_payer(
            instructions,
            Some(&config.keeper_keypair.pubkey()),
            &[config.keeper_keypair.as_ref()],
            blockhash,
        );

        match rpc_client.send_and_confirm_transaction(&tx).await {
            Ok(sig) => return Ok(sig.to_string()),
            Err(e)
                if e.to_string().contains("BlockhashNotFound")
                    && attempt + 1 < config.max_retries =>
            {
                warn!(
                    attempt = attempt + 1,
                    delay = ?retry_delay,
                    "BlockhashNotFound, retrying"
                );
                tokio::time::sleep(retry_delay).await;
                retry_delay = next_retry_delay(retry_delay);
            }
            Err(e) => return Err(e).context("send_and_confirm_transaction failed"),
        }
    }

    bail!("max retries ({}) exceeded for perform_upkeep", config.max_retries)
}

fn next_retry_delay(delay: Duration) -> Duration {
    delay.saturating_mul(2).min(Duration::from_secs(60))
}

/// `check_upkeep(check_data: Vec<u8>)` with empty check data.
pub fn build_check_upkeep_instruction(program_id: &Pubkey, raffle: &Pubkey) -> Instruction {
    let mut data = Vec::with_capacity(8 + 4);
    data.extend_from_slice(&instruction_discriminator("check_upkeep"));
    data.extend_from_slice(&0u32.to_le_bytes());

    Instruction {
        program_id: *program_id,
        accounts: vec![AccountMeta::new_readonly(*raffle, false)],
        data,
    }
}

/// `perform_upkeep(perform_data: Vec<u8>)` with the coordinator request
/// accounts appended as remaining accounts.
pub fn build_perform_upkeep_instruction(
    program_id: &Pubkey,
    caller: &Pubkey,
    raffle: &Pubkey,
    coordinator: &Pubkey,
    perform_data: &[u8],
    remaining: &[AccountMeta],
) -> Instruction {
    let mut data = Vec::with_capacity(8 + 4 + perform_data.len());
    data.extend_from_slice(&instruction_discriminator("perform_upkeep"));
    data.extend_from_slice(&(perform_data.len() as u32).to_le_bytes());
    data.extend_from_slice(perform_data);

    let mut accounts = vec![
        AccountMeta::new(*caller, true),                // caller (signer, payer)
        AccountMeta::new(*raffle, false),               // raffle PDA
        AccountMeta::new_readonly(*coordinator, false), // coordinator program
    ];
    accounts.extend_from_slice(remaining);

    Instruction {
        program_id: *program_id,
        accounts,
        data,
    }
}

/// Build a `SetComputeUnitPrice` instruction.
fn build_set_compute_unit_price_instruction(micro_lamports: u64) -> Instruction {
    let mut data = Vec::with_capacity(9);
    data.push(3u8);
    data.extend_from_slice(&micro_lamports.to_le_bytes());
    Instruction {
        program_id: COMPUTE_BUDGET_PROGRAM_ID,
        accounts: vec![],
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raffle_account::tests::key;
    use std::str::FromStr;

    #[test]
    fn decodes_trimmed_return_data() {
        let needed = decode_upkeep_check(&[1]).unwrap();
        assert!(needed.upkeep_needed);
        assert!(needed.perform_data.is_empty());

        let not_needed = decode_upkeep_check(&[]).unwrap();
        assert!(!not_needed.upkeep_needed);

        let full = decode_upkeep_check(&[1, 0, 0, 0, 0]).unwrap();
        assert_eq!(full, needed);
    }

    #[test]
    fn restores_trailing_zeros_of_perform_data() {
        // perform_data = [7, 0, 0] with the final zeros stripped
        let check = decode_upkeep_check(&[1, 3, 0, 0, 0, 7]).unwrap();
        assert_eq!(check.perform_data, vec![7, 0, 0]);
    }

    #[test]
    fn rejects_malformed_return_data() {
        assert!(decode_upkeep_check(&[2]).is_err());
        assert!(decode_upkeep_check(&[1, 0, 0, 0, 0, 9]).is_err());
    }

    #[test]
    fn classifies_program_errors() {
        assert_eq!(
            classify_failure("Error processing Instruction 1: custom program error: 0x1772"),
            FailureKind::NotNeeded
        );
        assert_eq!(
            classify_failure("AnchorError occurred. Error Code: UpkeepNotNeeded."),
            FailureKind::NotNeeded
        );
        assert_eq!(
            classify_failure("Error processing Instruction 0: custom program error: 0x1779"),
            FailureKind::Misconfigured
        );
        assert_eq!(
            classify_failure("failed to fetch latest blockhash: connection refused"),
            FailureKind::Transient
        );
        // RandomnessRequestFailed
        assert_eq!(
            classify_failure("custom program error: 0x177b"),
            FailureKind::Transient
        );
    }

    #[test]
    fn retry_delay_doubles_up_to_a_minute() {
        assert_eq!(
            next_retry_delay(Duration::from_millis(500)),
            Duration::from_secs(1)
        );
        assert_eq!(
            next_retry_delay(Duration::from_secs(40)),
            Duration::from_secs(60)
        );
        assert_eq!(
            next_retry_delay(Duration::from_secs(60)),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn check_upkeep_instruction_layout() {
        let ix = build_check_upkeep_instruction(&key(1), &key(2));
        assert_eq!(ix.program_id, key(1));
        assert_eq!(ix.accounts.len(), 1);
        assert!(!ix.accounts[0].is_writable);
        assert_eq!(
            ix.data,
            vec![177, 68, 56, 89, 39, 109, 203, 170, 0, 0, 0, 0]
        );
    }

    #[test]
    fn perform_upkeep_instruction_layout() {
        let remaining = request_accounts(&key(3), &key(4), &key(2), 42, 0);
        let ix = build_perform_upkeep_instruction(
            &key(1),
            &key(4),
            &key(2),
            &key(3),
            &[],
            &remaining,
        );

        assert_eq!(ix.accounts.len(), 3 + remaining.len());
        assert_eq!(ix.accounts[0].pubkey, key(4));
        assert!(ix.accounts[0].is_signer && ix.accounts[0].is_writable);
        assert_eq!(ix.accounts[1].pubkey, key(2));
        assert!(ix.accounts[1].is_writable);
        assert_eq!(ix.accounts[2].pubkey, key(3));
        assert!(!ix.accounts[2].is_writable);
        assert_eq!(&ix.accounts[3..], &remaining[..]);
        assert_eq!(
            ix.data,
            vec![28, 225, 151, 101, 95, 219, 202, 252, 0, 0, 0, 0]
        );
    }

    #[test]
    fn compute_budget_id_and_layout() {
        assert_eq!(
            COMPUTE_BUDGET_PROGRAM_ID,
            Pubkey::from_str("ComputeBudget111111111111111111111111111111").unwrap()
        );
        let ix = build_set_compute_unit_price_instruction(1_000);
        assert_eq!(ix.data[0], 3);
        assert_eq!(&ix.data[1..], &1_000u64.to_le_bytes()[..]);
    }

    #[test]
    fn error_codes_match_program() {
        assert_eq!(format!("0x{ERROR_UPKEEP_NOT_NEEDED:x}"), "0x1772");
        assert_eq!(format!("0x{ERROR_INVALID_COORDINATOR:x}"), "0x1779");
    }
}
