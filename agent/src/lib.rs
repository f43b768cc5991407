//! In-process profiling collector.
//!
//! Embedded directly in the host application process. Captures one
//! request's worth of profiling detail (§4.2) and hands it to the local
//! transport (§4.3) at request end, without ever affecting the host
//! request itself — every fallible step here is caught and logged
//! out-of-band rather than propagated.

pub mod collector;
pub mod config;
pub mod profiler;
pub mod sql;
pub mod transport;

pub use collector::{Collector, RequestGuard};
pub use config::Config;
pub use profiler::{register_profiler_factory, FunctionProfiler};
pub use sql::SqlEventSource;
