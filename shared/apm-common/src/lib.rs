//! Types and helpers shared by the agent, daemon, and server crates.

pub mod breaker;
pub mod correlation;
pub mod error;
pub mod model;
pub mod redact;

pub use breaker::{BreakerConfig, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use correlation::{format_comment, new_id, parse_comment};
pub use error::{Error, Result};
pub use model::{ProfilingRecord, RecordSource, SqlEvent, SqlEventList};
