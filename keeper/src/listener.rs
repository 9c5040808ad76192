//! On-chain event listener for the raffle program.
//!
//! Subscribes to program logs via WebSocket, decodes the raffle's Anchor
//! events from `Program data:` entries, logs and counts the ones belonging
//! to the kept raffle, and auto-reconnects on disconnection.

use base64::Engine;
use futures_util::StreamExt;
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::rpc_config::{RpcTransactionLogsConfig, RpcTransactionLogsFilter};
use solana_commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::codec::{event_discriminator, Reader};
use crate::config::AppConfig;
use crate::metrics::Metrics;

/// Delay before reconnecting to the WebSocket after a disconnect or error.
const WS_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Raffle events the keeper understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaffleEvent {
    Entered {
        raffle: Pubkey,
        player: Pubkey,
        amount: u64,
    },
    WinnerRequested {
        raffle: Pubkey,
        request_id: u64,
    },
    WinnerPicked {
        raffle: Pubkey,
        winner: Pubkey,
        request_id: u64,
        prize: u64,
    },
}

impl RaffleEvent {
    pub fn raffle(&self) -> &Pubkey {
        match self {
            Self::Entered { raffle, .. }
            | Self::WinnerRequested { raffle, .. }
            | Self::WinnerPicked { raffle, .. } => raffle,
        }
    }
}

/// Matches Anchor event payloads against the raffle's event discriminators.
pub struct EventDecoder {
    entered: [u8; 8],
    requested: [u8; 8],
    picked: [u8; 8],
}

impl EventDecoder {
    pub fn new() -> Self {
        Self {
            entered: event_discriminator("RaffleEntered"),
            requested: event_discriminator("RequestedRaffleWinner"),
            picked: event_discriminator("WinnerPicked"),
        }
    }

    /// Decode a full event payload, discriminator included. Returns `None`
    /// for foreign or malformed events.
    pub fn decode(&self, data: &[u8]) -> Option<RaffleEvent> {
        let (disc, body) = data.split_first_chunk::<8>()?;
        let mut r = Reader::new(body);
        if *disc == self.entered {
            Some(RaffleEvent::Entered {
                raffle: r.pubkey()?,
                player: r.pubkey()?,
                amount: r.u64()?,
            })
        } else if *disc == self.requested {
            Some(RaffleEvent::WinnerRequested {
                raffle: r.pubkey()?,
                request_id: r.u64()?,
            })
        } else if *disc == self.picked {
            Some(RaffleEvent::WinnerPicked {
                raffle: r.pubkey()?,
                winner: r.pubkey()?,
                request_id: r.u64()?,
                prize: r.u64()?,
            })
        } else {
            None
        }
    }

    /// Decode every raffle event in a transaction's log lines.
    pub fn decode_logs(&self, logs: &[String]) -> Vec<RaffleEvent> {
        let mut events = Vec::new();
        for log_line in logs {
            let Some(data_str) = log_line.strip_prefix("Program data: ") else {
                continue;
            };
            let decoded = match base64::engine::general_purpose::STANDARD.decode(data_str.trim()) {
                Ok(d) => d,
                Err(e) => {
                    debug!(error = %e, "Failed to decode base64 log data");
                    continue;
                }
            };
            if let Some(event) = self.decode(&decoded) {
                events.push(event);
            }
        }
        events
    }
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscribe to raffle program logs and report events for the configured
/// raffle. Automatically reconnects on disconnection.
pub async fn listen_for_events(config: AppConfig, metrics: Arc<Metrics>) {
    let decoder = EventDecoder::new();

    loop {
        info!(url = %config.ws_url, "Connecting to WebSocket");

        match PubsubClient::new(&config.ws_url).await {
            Ok(pubsub) => {
                info!("WebSocket connected");

                let filter =
                    RpcTransactionLogsFilter::Mentions(vec![config.raffle.to_string()]);
                let logs_config = RpcTransactionLogsConfig {
                    commitment: Some(CommitmentConfig::confirmed()),
                };

                match pubsub.logs_subscribe(filter, logs_config).await {
                    Ok((mut stream, _unsub)) => {
                        while let Some(log_result) = stream.next().await {
                            if log_result.value.err.is_some() {
                                continue;
                            }
                            for event in decoder.decode_logs(&log_result.value.logs) {
                                if *event.raffle() != config.raffle {
                                    continue;
                                }
                                report_event(&event, &log_result.value.signature, &metrics);
                            }
                        }
                        warn!("WebSocket stream ended, reconnecting");
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to subscribe to logs");
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to WebSocket");
            }
        }

        info!(delay = ?WS_RECONNECT_DELAY, "Reconnecting");
        tokio::time::sleep(WS_RECONNECT_DELAY).await;
    }
}

fn report_event(event: &RaffleEvent, signature: &str, metrics: &Metrics) {
    match event {
        RaffleEvent::Entered { player, amount, .. } => {
            metrics.record_entry(*amount);
            info!(player = %player, amount, signature, "Player entered");
        }
        RaffleEvent::WinnerRequested { request_id, .. } => {
            metrics.record_draw_requested();
            info!(request_id, signature, "Winner requested");
        }
        RaffleEvent::WinnerPicked {
            winner,
            request_id,
            prize,
            ..
        } => {
            metrics.record_winner(*prize);
            info!(winner = %winner, request_id, prize, signature, "Winner picked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raffle_account::tests::key;

    fn program_data(bytes: &[u8]) -> String {
        format!(
            "Program data: {}",
            base64::engine::general_purpose::STANDARD.encode(bytes)
        )
    }

    fn entered(raffle: Pubkey, player: Pubkey, amount: u64) -> Vec<u8> {
        let mut data = event_discriminator("RaffleEntered").to_vec();
        data.extend_from_slice(raffle.as_ref());
        data.extend_from_slice(player.as_ref());
        data.extend_from_slice(&amount.to_le_bytes());
        data
    }

    #[test]
    fn event_discriminators_match_anchor() {
        let decoder = EventDecoder::new();
        assert_eq!(decoder.requested, [186, 223, 166, 109, 171, 7, 53, 103]);
        assert_eq!(decoder.picked, [147, 193, 81, 221, 165, 98, 201, 233]);
    }

    #[test]
    fn decodes_each_raffle_event() {
        let decoder = EventDecoder::new();

        assert_eq!(
            decoder.decode(&entered(key(1), key(2), 10)),
            Some(RaffleEvent::Entered {
                raffle: key(1),
                player: key(2),
                amount: 10,
            })
        );

        let mut data = event_discriminator("RequestedRaffleWinner").to_vec();
        data.extend_from_slice(key(1).as_ref());
        data.extend_from_slice(&5u64.to_le_bytes());
        assert_eq!(
            decoder.decode(&data),
            Some(RaffleEvent::WinnerRequested {
                raffle: key(1),
                request_id: 5,
            })
        );

        let mut data = event_discriminator("WinnerPicked").to_vec();
        data.extend_from_slice(key(1).as_ref());
        data.extend_from_slice(key(3).as_ref());
        data.extend_from_slice(&5u64.to_le_bytes());
        data.extend_from_slice(&40u64.to_le_bytes());
        assert_eq!(data.len(), 8 + 80);
        assert_eq!(
            decoder.decode(&data),
            Some(RaffleEvent::WinnerPicked {
                raffle: key(1),
                winner: key(3),
                request_id: 5,
                prize: 40,
            })
        );
    }

    #[test]
    fn skips_foreign_and_truncated_events() {
        let decoder = EventDecoder::new();

        let mut data = event_discriminator("RaffleInitialized").to_vec();
        data.extend_from_slice(&[0u8; 120]);
        assert_eq!(decoder.decode(&data), None);

        let data = entered(key(1), key(2), 10);
        assert_eq!(decoder.decode(&data[..data.len() - 1]), None);
        assert_eq!(decoder.decode(&data[..4]), None);
    }

    #[test]
    fn extracts_events_from_log_lines() {
        let decoder = EventDecoder::new();
        let logs = vec![
            "Program RafFLeUpkeepVrfPot4Wnr9qTz7hGxKc5mJbN3dYsEw invoke [1]".to_string(),
            "Program log: Instruction: EnterRaffle".to_string(),
            program_data(&entered(key(1), key(2), 10)),
            "Program data: not base64!".to_string(),
            program_data(&entered(key(9), key(3), 20)),
            "Program RafFLeUpkeepVrfPot4Wnr9qTz7hGxKc5mJbN3dYsEw success".to_string(),
        ];

        let events = decoder.decode_logs(&logs);
        assert_eq!(events.len(), 2);
        assert_eq!(*events[0].raffle(), key(1));
        assert_eq!(*events[1].raffle(), key(9));
    }
}
