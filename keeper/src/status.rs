//! Last observed raffle state, shared between the upkeep loop and `/status`.

use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use std::time::{Duration, Instant};

use crate::raffle_account::{RaffleSnapshot, RaffleState};

/// Body of the `/status` endpoint.
#[derive(Debug, Default, Serialize)]
pub struct KeeperStatus {
    pub raffle: Option<RaffleView>,
    /// Result of the last simulated `check_upkeep`.
    pub upkeep_needed: Option<bool>,
    /// Unix time of the last completed upkeep iteration.
    pub last_checked_at: Option<i64>,
    /// How long the raffle has been observed in `Calculating`.
    pub calculating_for_secs: Option<u64>,
    /// Set once `calculating_for_secs` passes the alarm threshold.
    pub calculating_alarm: bool,
    pub last_upkeep_signature: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RaffleView {
    pub address: String,
    pub state: RaffleState,
    pub entrance_fee: u64,
    pub interval: i64,
    pub last_timestamp: i64,
    pub pot: u64,
    pub players: usize,
    pub recent_winner: Option<String>,
    pub pending_request_id: Option<u64>,
    pub coordinator: String,
    pub subscription_id: u64,
    /// Against the keeper's clock, which may drift from the cluster's.
    pub seconds_until_due: i64,
}

impl RaffleView {
    pub fn new(address: &Pubkey, snapshot: &RaffleSnapshot, now: i64) -> Self {
        Self {
            address: address.to_string(),
            state: snapshot.state,
            entrance_fee: snapshot.entrance_fee,
            interval: snapshot.interval,
            last_timestamp: snapshot.last_timestamp,
            pot: snapshot.pot,
            players: snapshot.players.len(),
            recent_winner: snapshot.recent_winner.map(|w| w.to_string()),
            pending_request_id: snapshot.pending_request_id,
            coordinator: snapshot.vrf.coordinator.to_string(),
            subscription_id: snapshot.vrf.subscription_id,
            seconds_until_due: snapshot.seconds_until_due(now),
        }
    }
}

/// Change reported by [`CalculatingWatch::observe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchEvent {
    /// Nothing worth logging.
    Quiet,
    /// The raffle has just crossed the alarm threshold.
    Raised(Duration),
    /// The raffle reopened after `Duration` in `Calculating`.
    Resolved { waited: Duration, alarmed: bool },
}

/// Tracks how long the raffle stays in `Calculating`.
///
/// Nothing on-chain times out a pending request, so a coordinator that never
/// answers leaves the raffle locked. The keeper only reports it.
#[derive(Debug)]
pub struct CalculatingWatch {
    threshold: Duration,
    since: Option<Instant>,
    alarmed: bool,
}

impl CalculatingWatch {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            since: None,
            alarmed: false,
        }
    }

    pub fn observe(&mut self, state: RaffleState, now: Instant) -> WatchEvent {
        match (state, self.since) {
            (RaffleState::Calculating, None) => {
                self.since = Some(now);
                WatchEvent::Quiet
            }
            (RaffleState::Calculating, Some(since)) => {
                let waited = now.saturating_duration_since(since);
                if !self.alarmed && waited >= self.threshold {
                    self.alarmed = true;
                    WatchEvent::Raised(waited)
                } else {
                    WatchEvent::Quiet
                }
            }
            (RaffleState::Open, Some(since)) => {
                let event = WatchEvent::Resolved {
                    waited: now.saturating_duration_since(since),
                    alarmed: self.alarmed,
                };
                self.since = None;
                self.alarmed = false;
                event
            }
            (RaffleState::Open, None) => WatchEvent::Quiet,
        }
    }

    pub fn calculating_for(&self, now: Instant) -> Option<Duration> {
        self.since.map(|since| now.saturating_duration_since(since))
    }

    pub fn alarmed(&self) -> bool {
        self.alarmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raffle_account::tests::sample;

    const THRESHOLD: Duration = Duration::from_secs(300);

    #[test]
    fn open_raffle_never_alarms() {
        let mut watch = CalculatingWatch::new(THRESHOLD);
        let start = Instant::now();
        assert_eq!(watch.observe(RaffleState::Open, start), WatchEvent::Quiet);
        assert_eq!(
            watch.observe(RaffleState::Open, start + THRESHOLD * 10),
            WatchEvent::Quiet
        );
        assert_eq!(watch.calculating_for(start), None);
        assert!(!watch.alarmed());
    }

    #[test]
    fn raises_once_after_threshold() {
        let mut watch = CalculatingWatch::new(THRESHOLD);
        let start = Instant::now();

        assert_eq!(watch.observe(RaffleState::Calculating, start), WatchEvent::Quiet);
        let just_before = start + THRESHOLD - Duration::from_secs(1);
        assert_eq!(watch.observe(RaffleState::Calculating, just_before), WatchEvent::Quiet);
        assert!(!watch.alarmed());

        let at = start + THRESHOLD;
        assert_eq!(
            watch.observe(RaffleState::Calculating, at),
            WatchEvent::Raised(THRESHOLD)
        );
        assert!(watch.alarmed());
        assert_eq!(
            watch.observe(RaffleState::Calculating, at + THRESHOLD),
            WatchEvent::Quiet
        );
        assert_eq!(watch.calculating_for(at + THRESHOLD), Some(THRESHOLD * 2));
    }

    #[test]
    fn resolves_and_resets_when_reopened() {
        let mut watch = CalculatingWatch::new(THRESHOLD);
        let start = Instant::now();
        watch.observe(RaffleState::Calculating, start);
        watch.observe(RaffleState::Calculating, start + THRESHOLD);

        let reopened = start + THRESHOLD + Duration::from_secs(5);
        assert_eq!(
            watch.observe(RaffleState::Open, reopened),
            WatchEvent::Resolved {
                waited: THRESHOLD + Duration::from_secs(5),
                alarmed: true,
            }
        );
        assert!(!watch.alarmed());
        assert_eq!(watch.calculating_for(reopened), None);

        // A quick next draw does not inherit the old alarm.
        watch.observe(RaffleState::Calculating, reopened);
        assert_eq!(
            watch.observe(RaffleState::Open, reopened + Duration::from_secs(2)),
            WatchEvent::Resolved {
                waited: Duration::from_secs(2),
                alarmed: false,
            }
        );
    }

    #[test]
    fn view_summarizes_snapshot() {
        let snapshot = sample();
        let address = Pubkey::new_from_array([7; 32]);
        let view = RaffleView::new(&address, &snapshot, snapshot.last_timestamp + 10);

        assert_eq!(view.address, address.to_string());
        assert_eq!(view.players, 3);
        assert_eq!(view.pending_request_id, Some(17));
        assert_eq!(view.seconds_until_due, 20);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["state"], "calculating");
        assert_eq!(json["pot"], 30_000_000);
    }
}
