//! Wire-side observation: capture echo probes as they leave an interface.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use etherparse::{Icmpv4Type, NetSlice, SlicedPacket, TransportSlice};
use log::{debug, warn};

use crate::error::Error;
use crate::net;
use crate::net::pcap::PacketCapture;

/// What an observer watches for: up to `count` echo requests from the
/// interface's own address toward `destination`, within `timeout`.
#[derive(Debug, Clone)]
pub struct ObserveSpec {
    pub interface: String,
    pub destination: Ipv4Addr,
    pub count: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserveOutcome {
    /// Never exceeds the requested count.
    pub matched_count: u32,
}

/// Captures on one interface until the requested number of matching probes
/// has been seen or the timeout elapses, whichever comes first.
pub struct Observer;

impl Observer {
    /// Open the capture and collect. Fewer matches than requested at the
    /// deadline is a normal outcome; only a capture failure is an error.
    pub fn run(spec: &ObserveSpec) -> Result<ObserveOutcome, Error> {
        let source = net::interface_address(&spec.interface)?;
        let capture = Self::open_capture(spec, source)?;
        Self::collect(capture, spec, source)
    }

    // Split from collect() so the session coordinator can confirm the capture
    // is listening before it releases any prober.
    pub(crate) fn open_capture(
        spec: &ObserveSpec,
        source: Ipv4Addr,
    ) -> Result<PacketCapture, Error> {
        let mut capture = PacketCapture::open(&spec.interface)?;
        capture.set_filter(&filter_expression(source, spec.destination))?;
        Ok(capture)
    }

    pub(crate) fn collect(
        mut capture: PacketCapture,
        spec: &ObserveSpec,
        source: Ipv4Addr,
    ) -> Result<ObserveOutcome, Error> {
        debug!(
            "Observer on {} waiting for {} probes to {}",
            spec.interface, spec.count, spec.destination
        );
        let deadline = Instant::now() + spec.timeout;

        let mut matched = 0;
        while matched < spec.count && Instant::now() < deadline {
            // next_packet returns within the capture's poll interval, so the
            // deadline is honored to that granularity.
            if let Some(packet) = capture.next_packet()? {
                if is_probe(packet.data, source, spec.destination) {
                    matched += 1;
                }
            }
        }

        let stats = capture.stats();
        if stats.dropped > 0 || stats.if_dropped > 0 {
            warn!(
                "Capture on {} dropped packets (pcap: {} + iface: {})",
                spec.interface, stats.dropped, stats.if_dropped
            );
        }
        debug!(
            "Observer on {} matched {} of {}",
            spec.interface, matched, spec.count
        );
        Ok(ObserveOutcome {
            matched_count: matched,
        })
    }
}

/// BPF filter for the session's own echo traffic on this interface.
fn filter_expression(source: Ipv4Addr, destination: Ipv4Addr) -> String {
    format!("icmp and src host {source} and dst host {destination}")
}

/// Frame-level match: IPv4 ICMP echo request from `source` to `destination`.
/// Replies and unrelated ICMP passing the coarse BPF filter are rejected here.
fn is_probe(frame: &[u8], source: Ipv4Addr, destination: Ipv4Addr) -> bool {
    let Ok(sliced) = SlicedPacket::from_ethernet(frame) else {
        return false;
    };

    let ip_header = match &sliced.net {
        Some(NetSlice::Ipv4(slice)) => slice.header(),
        _ => return false,
    };
    if ip_header.source_addr() != source || ip_header.destination_addr() != destination {
        return false;
    }

    match &sliced.transport {
        Some(TransportSlice::Icmpv4(icmp)) => {
            matches!(icmp.icmp_type(), Icmpv4Type::EchoRequest(_))
        }
        _ => false,
    }
}
