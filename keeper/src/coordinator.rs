//! Coordinator-side accounts the raffle forwards when requesting randomness.
//!
//! `perform_upkeep` passes its remaining accounts through to the
//! coordinator's `request_random_words` unchanged, after the raffle PDA it
//! signs with itself. The full request interface is documented in the
//! raffle program's `vrf` module; this is the keeper's half of it, derived
//! up front:
//!
//! 1. payer (signer, writable): funds the request PDA rent
//! 2. `["coordinator-config"]` (writable): bumps `request_counter`
//! 3. `["subscription", sub_id]` (writable): charged the request fee
//! 4. `["consumer", sub_id, raffle]`: the raffle's consumer registration
//! 5. `["request", request_counter]` (writable): created by the request
//! 6. system program

use anyhow::{bail, Context, Result};
use solana_sdk::instruction::AccountMeta;
use solana_sdk::pubkey::Pubkey;

use crate::codec::account_discriminator;

/// `11111111111111111111111111111111`
pub const SYSTEM_PROGRAM_ID: Pubkey = Pubkey::new_from_array([0; 32]);

const CONFIG_SEED: &[u8] = b"coordinator-config";
const SUBSCRIPTION_SEED: &[u8] = b"subscription";
const CONSUMER_SEED: &[u8] = b"consumer";
const REQUEST_SEED: &[u8] = b"request";

/// Offset of `request_counter` in the coordinator's `CoordinatorConfig`
/// account:
/// discriminator (8) + admin (32) + authority (32) + fee_per_word (8) +
/// max_num_words (4).
const REQUEST_COUNTER_OFFSET: usize = 84;

pub fn config_address(coordinator: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[CONFIG_SEED], coordinator).0
}

pub fn subscription_address(coordinator: &Pubkey, subscription_id: u64) -> Pubkey {
    Pubkey::find_program_address(
        &[SUBSCRIPTION_SEED, &subscription_id.to_le_bytes()],
        coordinator,
    )
    .0
}

pub fn consumer_address(coordinator: &Pubkey, subscription_id: u64, consumer: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[CONSUMER_SEED, &subscription_id.to_le_bytes(), consumer.as_ref()],
        coordinator,
    )
    .0
}

pub fn request_address(coordinator: &Pubkey, request_counter: u64) -> Pubkey {
    Pubkey::find_program_address(&[REQUEST_SEED, &request_counter.to_le_bytes()], coordinator).0
}

/// Read `request_counter` from raw `CoordinatorConfig` account data.
///
/// The next request PDA is seeded with this value.
pub fn decode_request_counter(data: &[u8]) -> Result<u64> {
    let disc = data
        .get(..8)
        .context("coordinator config shorter than discriminator")?;
    if disc != account_discriminator("CoordinatorConfig") {
        bail!("account is not a CoordinatorConfig");
    }
    let bytes: [u8; 8] = data
        .get(REQUEST_COUNTER_OFFSET..REQUEST_COUNTER_OFFSET + 8)
        .and_then(|b| b.try_into().ok())
        .context("coordinator config too short for request_counter")?;
    Ok(u64::from_le_bytes(bytes))
}

/// Remaining accounts for `perform_upkeep`: accounts 1 to 6 of the
/// coordinator request, after the raffle's own consumer signer.
pub fn request_accounts(
    coordinator: &Pubkey,
    payer: &Pubkey,
    raffle: &Pubkey,
    subscription_id: u64,
    request_counter: u64,
) -> Vec<AccountMeta> {
    vec![
        AccountMeta::new(*payer, true),
        AccountMeta::new(config_address(coordinator), false),
        AccountMeta::new(subscription_address(coordinator, subscription_id), false),
        AccountMeta::new_readonly(consumer_address(coordinator, subscription_id, raffle), false),
        AccountMeta::new(request_address(coordinator, request_counter), false),
        AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),
    ]
}
