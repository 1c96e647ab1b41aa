//! Send ICMP echo probes and verify they appear on the wire.
//!
//! `echowire` runs prober and observer tasks concurrently against one or
//! more interfaces: probers emit echo requests, observers capture on the
//! same interface with a filter for the session's own traffic, and a shared
//! results table collects the per-interface match counts.
//!
//! ```no_run
//! use echowire::{run_session, SessionConfig};
//!
//! let config = SessionConfig::default();
//! let table = run_session(config.tasks_for("lo"))?;
//! assert_eq!(table.get("lo"), Some(config.packet_count));
//! # Ok::<(), echowire::Error>(())
//! ```
//!
//! Raw sockets and packet capture both need CAP_NET_RAW.

pub mod config;
pub mod error;
pub mod net;
pub mod observe;
pub mod probe;
pub mod session;

pub use config::SessionConfig;
pub use error::Error;
pub use observe::{ObserveOutcome, ObserveSpec, Observer};
pub use probe::{ExchangeOutcome, ExchangeProber, ExchangeSpec, ProbeSpec, Prober};
pub use session::{run_session, ResultsTable, Task};
