//! Decoding of the on-chain `Raffle` account.
//!
//! Layout (Borsh, after the 8-byte account discriminator):
//!
//! ```text
//! authority           Pubkey
//! entrance_fee        u64
//! interval            i64
//! last_timestamp      i64
//! state               u8        0 = Open, 1 = Calculating
//! pot                 u64
//! players             Vec<Pubkey>
//! recent_winner       Option<Pubkey>
//! pending_request_id  Option<u64>
//! vrf.coordinator             Pubkey
//! vrf.coordinator_authority   Pubkey
//! vrf.key_hash                [u8; 32]
//! vrf.subscription_id         u64
//! vrf.callback_gas_limit      u32
//! bump                u8
//! ```

use anyhow::{bail, Context, Result};
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;

use crate::codec::{account_discriminator, Reader};

/// Seed prefix of the raffle PDA: `["raffle", authority]`.
pub const RAFFLE_SEED: &[u8] = b"raffle";

/// Derive the raffle PDA owned by `authority`.
pub fn raffle_address(program_id: &Pubkey, authority: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[RAFFLE_SEED, authority.as_ref()], program_id).0
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RaffleState {
    Open,
    Calculating,
}

/// Randomness parameters stored in the raffle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VrfSettings {
    pub coordinator: Pubkey,
    pub coordinator_authority: Pubkey,
    pub key_hash: [u8; 32],
    pub subscription_id: u64,
    pub callback_gas_limit: u32,
}

/// Keeper-side copy of a `Raffle` account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RaffleSnapshot {
    pub authority: Pubkey,
    pub entrance_fee: u64,
    pub interval: i64,
    pub last_timestamp: i64,
    pub state: RaffleState,
    pub pot: u64,
    pub players: Vec<Pubkey>,
    pub recent_winner: Option<Pubkey>,
    pub pending_request_id: Option<u64>,
    pub vrf: VrfSettings,
    pub bump: u8,
}

impl RaffleSnapshot {
    /// Decode raw account data, discriminator included.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let disc = data.get(..8).context("raffle account shorter than discriminator")?;
        if disc != account_discriminator("Raffle") {
            bail!("account is not a Raffle");
        }
        Self::decode_body(&data[8..]).context("malformed Raffle account")
    }

    fn decode_body(body: &[u8]) -> Option<Self> {
        let mut r = Reader::new(body);
        let authority = r.pubkey()?;
        let entrance_fee = r.u64()?;
        let interval = r.i64()?;
        let last_timestamp = r.i64()?;
        let state = match r.u8()? {
            0 => RaffleState::Open,
            1 => RaffleState::Calculating,
            _ => return None,
        };
        let pot = r.u64()?;
        let players = r.vec(|r| r.pubkey())?;
        let recent_winner = r.option(|r| r.pubkey())?;
        let pending_request_id = r.option(|r| r.u64())?;
        let vrf = VrfSettings {
            coordinator: r.pubkey()?,
            coordinator_authority: r.pubkey()?,
            key_hash: r.bytes32()?,
            subscription_id: r.u64()?,
            callback_gas_limit: r.u32()?,
        };
        let bump = r.u8()?;

        Some(Self {
            authority,
            entrance_fee,
            interval,
            last_timestamp,
            state,
            pot,
            players,
            recent_winner,
            pending_request_id,
            vrf,
            bump,
        })
    }

    /// Seconds left before the time gate opens, zero once it is open.
    pub fn seconds_until_due(&self, now: i64) -> i64 {
        let due = self.last_timestamp.saturating_add(self.interval);
        due.saturating_sub(now).max(0)
    }
}
