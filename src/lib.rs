pub mod config;
pub mod event_source;
pub mod projection_core;

pub use config::{ConfigError, RuntimeConfig};
pub use event_source::{EventFilter, EventSource, InMemoryEventSource, SourceError, SqliteEventLog};
pub use projection_core::{
    Address, ProjectionError, ProjectorConfig, RaffleId, RaffleStats, RaffleStatsProjector,
    UserHistory,
};
