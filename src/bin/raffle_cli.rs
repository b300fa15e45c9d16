//! Raffle CLI - local event ledger and projection queries
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin raffle_cli -- create <maxParticipants> <deadline> <nftAddress> <tokenId> <organizer>
//! cargo run --bin raffle_cli -- participate <raffleId> <participant>
//! cargo run --bin raffle_cli -- trigger <raffleId>
//! cargo run --bin raffle_cli -- stats <raffleId>
//! cargo run --bin raffle_cli -- history <userAddress>
//! cargo run --bin raffle_cli -- watch [raffleId]
//! ```
//!
//! ## Environment Variables
//!
//! - RAFFLE_DB_PATH - SQLite event log (default: data/raffles.db)
//! - RAFFLE_SNAPSHOT_PATH - Snapshot cache file (optional)
//! - SOURCE_READ_TIMEOUT_MS - Per-read timeout, 0 disables (default: 10000)
//! - MAX_CONCURRENT_RESOLUTIONS - Parallel resolutions for `history` (default: 8)
//! - SKIPPED_RAFFLES - report | omit (default: report)
//! - RUST_LOG - Logging level (optional, default: info)

use chrono::{TimeZone, Utc};
use rand::Rng;
use raffleflow::event_source::{EventSubscription, SqliteEventLog, SubscriptionConfig};
use raffleflow::projection_core::{
    Address, RaffleEvent, RaffleId, RaffleStats, RaffleStatsProjector, SnapshotCache,
    SubjectReference,
};
use raffleflow::RuntimeConfig;
use std::env;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::RwLock;

const USAGE: &str = "Usage:
  raffle_cli create <maxParticipants> <deadline> <nftAddress> <tokenId> <organizer>
  raffle_cli participate <raffleId> <participant>
  raffle_cli trigger <raffleId>
  raffle_cli stats <raffleId>
  raffle_cli history <userAddress>
  raffle_cli watch [raffleId]";

#[derive(Debug)]
enum Command {
    Create {
        max_participants: u32,
        deadline: i64,
        nft_address: String,
        token_id: u64,
        organizer: String,
    },
    Participate {
        raffle_id: RaffleId,
        participant: String,
    },
    Trigger {
        raffle_id: RaffleId,
    },
    Stats {
        raffle_id: RaffleId,
    },
    History {
        user: String,
    },
    Watch {
        raffle_id: Option<RaffleId>,
    },
}

fn parse_number<T: std::str::FromStr>(value: &str, name: &str) -> Result<T, String> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| format!("{} must be a non-negative integer, got '{}'", name, value))
}

fn parse_command(args: &[String]) -> Result<Command, String> {
    let command = args.first().map(|s| s.as_str());
    let rest = args.get(1..).unwrap_or_default();

    match (command, rest) {
        (Some("create"), [max, deadline, nft, token, organizer]) => Ok(Command::Create {
            max_participants: parse_number(max, "maxParticipants")?,
            deadline: parse_number(deadline, "deadline")?,
            nft_address: nft.clone(),
            token_id: parse_number(token, "tokenId")?,
            organizer: organizer.clone(),
        }),
        (Some("participate"), [raffle_id, participant]) => Ok(Command::Participate {
            raffle_id: RaffleId(parse_number(raffle_id, "raffleId")?),
            participant: participant.clone(),
        }),
        (Some("trigger"), [raffle_id]) => Ok(Command::Trigger {
            raffle_id: RaffleId(parse_number(raffle_id, "raffleId")?),
        }),
        (Some("stats"), [raffle_id]) => Ok(Command::Stats {
            raffle_id: RaffleId(parse_number(raffle_id, "raffleId")?),
        }),
        (Some("history"), [user]) => Ok(Command::History { user: user.clone() }),
        (Some("watch"), []) => Ok(Command::Watch { raffle_id: None }),
        (Some("watch"), [raffle_id]) => Ok(Command::Watch {
            raffle_id: Some(RaffleId(parse_number(raffle_id, "raffleId")?)),
        }),
        (Some(other), _) => Err(format!("Invalid command or arguments: {}", other)),
        (None, _) => Err("Missing command".to_string()),
    }
}

fn format_deadline(deadline: i64) -> String {
    match Utc.timestamp_opt(deadline, 0).single() {
        Some(at) => at.to_rfc3339(),
        None => deadline.to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();

    let config = RuntimeConfig::from_env()?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.rust_log.as_str()))
        .target(env_logger::Target::Stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let command = match parse_command(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}", USAGE);
            return Err(e.into());
        }
    };

    log::debug!("Running {:?} against {}", command, config.db_path.display());

    let ledger = Arc::new(SqliteEventLog::open(&config.db_path)?);

    let cache = match &config.snapshot_path {
        Some(path) => Some(Arc::new(RwLock::new(SnapshotCache::load(path)?))),
        None => None,
    };

    let mut projector = RaffleStatsProjector::new(ledger.clone(), config.projector_config());
    if let Some(cache) = &cache {
        projector = projector.with_cache(cache.clone());
    }

    match command {
        Command::Create {
            max_participants,
            deadline,
            nft_address,
            token_id,
            organizer,
        } => {
            if max_participants == 0 {
                return Err("maxParticipants must be greater than 0".into());
            }
            if deadline <= Utc::now().timestamp() {
                return Err(format!("Deadline {} is not in the future", format_deadline(deadline)).into());
            }

            let raffle_id = ledger.next_raffle_id()?;
            let position = ledger.next_position()?;
            let request_id: u64 = rand::thread_rng().gen();

            let event = RaffleEvent::created(
                raffle_id.0,
                position,
                &organizer,
                max_participants,
                deadline,
                SubjectReference {
                    nft_address: Address::new(nft_address),
                    token_id,
                },
                request_id,
            );
            ledger.append(&event)?;

            log::info!(
                "🎟️  Raffle {} created by {} ({} seats, closes {})",
                raffle_id,
                organizer,
                max_participants,
                format_deadline(deadline)
            );
            println!("{}", raffle_id);
        }

        Command::Participate {
            raffle_id,
            participant,
        } => {
            let stats = projector.get_raffle_stats(raffle_id).await?;
            let participant = Address::new(participant);

            if stats.triggered {
                return Err(format!("Raffle {} has already been triggered", raffle_id).into());
            }
            if stats.deadline <= Utc::now().timestamp() {
                return Err(format!(
                    "Raffle {} closed at {}",
                    raffle_id,
                    format_deadline(stats.deadline)
                )
                .into());
            }
            if stats.total_participants >= stats.max_participants as usize {
                return Err(format!("Raffle {} is full", raffle_id).into());
            }
            if stats.participants.contains(&participant) {
                return Err(format!("{} already participates in raffle {}", participant, raffle_id).into());
            }

            let event = RaffleEvent::participated(raffle_id.0, ledger.next_position()?, participant.as_str());
            ledger.append(&event)?;

            log::info!(
                "✅ {} joined raffle {} ({}/{})",
                participant,
                raffle_id,
                stats.total_participants + 1,
                stats.max_participants
            );
        }

        Command::Trigger { raffle_id } => {
            let stats = projector.get_raffle_stats(raffle_id).await?;

            if stats.triggered {
                return Err(format!("Raffle {} has already been triggered", raffle_id).into());
            }
            if stats.participants.is_empty() {
                return Err(format!("Raffle {} has no participants", raffle_id).into());
            }

            let random_index = rand::thread_rng().gen_range(0..stats.participants.len());
            let winner = &stats.participants[random_index];

            let event = RaffleEvent::triggered(
                raffle_id.0,
                ledger.next_position()?,
                winner.as_str(),
                random_index as u64,
            );
            ledger.append(&event)?;

            log::info!("🏆 Raffle {} winner: {} (index {})", raffle_id, winner, random_index);
        }

        Command::Stats { raffle_id } => {
            let stats: RaffleStats = projector.get_raffle_stats(raffle_id).await?;
            for anomaly in &stats.anomalies {
                log::warn!("⚠️  Raffle {}: {}", raffle_id, anomaly);
            }
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }

        Command::History { user } => {
            let history = projector.get_user_participated_raffles(&Address::new(user)).await?;
            log::info!(
                "📊 {} raffles resolved, {} skipped",
                history.entries.len(),
                history.skipped.len()
            );
            println!("{}", serde_json::to_string_pretty(&history)?);
        }

        Command::Watch { raffle_id } => {
            let mut subscription = EventSubscription::spawn(
                ledger.clone(),
                SubscriptionConfig {
                    raffle_id,
                    ..SubscriptionConfig::default()
                },
            );

            log::info!("👀 Watching {} (Ctrl+C to stop)", config.db_path.display());

            loop {
                tokio::select! {
                    item = subscription.next() => {
                        match item {
                            Some(Ok(seq)) => {
                                log::info!(
                                    "#{} raffle {} {} at {}",
                                    seq.sequence,
                                    seq.event.raffle_id,
                                    seq.event.kind(),
                                    seq.event.position
                                );
                                println!("{}", serde_json::to_string(&seq.event)?);
                            }
                            Some(Err(e)) => log::warn!("⚠️  Read failed, retrying: {}", e),
                            None => break,
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        log::info!("⚠️  Received CTRL+C, shutting down...");
                        break;
                    }
                }
            }

            subscription.cancel();
        }
    }

    if let (Some(cache), Some(path)) = (&cache, &config.snapshot_path) {
        cache.read().await.save(path)?;
    }

    Ok(())
}
