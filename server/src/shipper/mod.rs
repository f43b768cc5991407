//! Log-aggregator shipper (§4.7): turns persisted records into framed GELF
//! messages, sends them through a shared circuit breaker, and replays the
//! backlog once the breaker recovers.

pub mod message;
pub mod replay;
pub mod sender;

pub use replay::spawn_replay_worker;
pub use sender::Shipper;
