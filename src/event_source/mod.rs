//! Event source boundary
//!
//! The projection engine only depends on the `EventSource` trait. Concrete
//! sources own their connection details; the engine never sees them.

pub mod memory;
pub mod source;
pub mod sqlite_log;
pub mod subscription;

pub use memory::InMemoryEventSource;
pub use source::{EventFilter, EventSource, SequencedEvent, SourceError, TailableSource};
pub use sqlite_log::SqliteEventLog;
pub use subscription::{EventSubscription, SubscriptionConfig};
