use std::io;

use thiserror::Error;

/// Errors surfaced by probers, observers and the session coordinator.
///
/// An observer seeing fewer packets than requested before its timeout is a
/// normal outcome, not an error.
#[derive(Debug, Error)]
pub enum Error {
    /// Requested interface does not exist or has no IPv4 address.
    #[error("interface {0} does not exist or has no IPv4 address")]
    InterfaceNotFound(String),

    /// No default gateway route is configured.
    #[error("no default gateway is configured")]
    NoDefaultRoute,

    /// A probe send failed partway through; carries how many probes had
    /// already left the interface.
    #[error("probe send failed after {sent} of {requested} probes: {source}")]
    Probe {
        sent: u32,
        requested: u32,
        #[source]
        source: io::Error,
    },

    /// Packet capture could not be opened, filtered or read.
    #[error("capture on {interface} failed: {reason}")]
    Capture { interface: String, reason: String },

    /// Raw socket creation or I/O failed outside the counted send loop.
    #[error("socket error: {0}")]
    Socket(#[from] io::Error),

    /// A task thread panicked; it was still joined, never detached.
    #[error("task {0} panicked")]
    TaskPanicked(String),
}
