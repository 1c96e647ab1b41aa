//! Fixed session parameters and task-list builders.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::error::Error;
use crate::net;
use crate::observe::ObserveSpec;
use crate::probe::ProbeSpec;
use crate::session::Task;

/// The fixed named parameters every scenario shares: where probes go, how
/// many per interface, and how long observers wait.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub destination: Ipv4Addr,
    pub packet_count: u32,
    pub timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            destination: Ipv4Addr::LOCALHOST,
            packet_count: 5,
            timeout: Duration::from_secs(5),
        }
    }
}

impl SessionConfig {
    /// Observer/prober pair for one interface.
    pub fn tasks_for(&self, interface: &str) -> Vec<Task> {
        vec![
            Task::Observe(ObserveSpec {
                interface: interface.to_string(),
                destination: self.destination,
                count: self.packet_count,
                timeout: self.timeout,
            }),
            Task::Probe(ProbeSpec {
                destination: self.destination,
                interface: interface.to_string(),
                count: self.packet_count,
            }),
        ]
    }

    /// Observer/prober pairs for every interface that is currently up.
    pub fn tasks_for_all_active(&self) -> Result<Vec<Task>, Error> {
        let mut tasks = Vec::new();
        for interface in net::list_active_interfaces()? {
            tasks.extend(self.tasks_for(&interface));
        }
        Ok(tasks)
    }
}
