//! Echo probe emission: fire-and-forget probers and the request/response
//! exchange variant used against the default gateway.

use std::io;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use etherparse::{IcmpEchoHeader, Icmpv4Header, Icmpv4Slice, Icmpv4Type, Ipv4Slice};
use log::{debug, warn};

use crate::error::Error;
use crate::net;
use crate::net::socket::RawIcmpSocket;

/// Payload carried by every echo request.
const PROBE_PAYLOAD: &[u8] = b"echowire";

/// What a prober sends: `count` echo requests from `interface` toward
/// `destination`.
#[derive(Debug, Clone)]
pub struct ProbeSpec {
    pub destination: Ipv4Addr,
    pub interface: String,
    pub count: u32,
}

/// Fire-and-forget echo request sender. One attempt per probe, no retries.
pub struct Prober {
    ident: u16,
}

impl Prober {
    pub fn new() -> Self {
        Self {
            ident: rand::random(),
        }
    }

    /// Send every probe in `spec`. A failed send aborts the run and reports
    /// how many probes had already left the interface.
    pub fn run(&self, spec: &ProbeSpec) -> Result<(), Error> {
        let source = net::interface_address(&spec.interface)?;
        debug!(
            "Prober sending {} probes from {} to {} on {}",
            spec.count, source, spec.destination, spec.interface
        );
        let socket = RawIcmpSocket::new(&spec.interface)?;

        for seq in 0..spec.count {
            let packet = build_echo_request(self.ident, seq as u16, PROBE_PAYLOAD);
            if let Err(e) = socket.sendto(&packet, spec.destination) {
                warn!(
                    "Probe send on {} failed after {} of {}: {}",
                    spec.interface, seq, spec.count, e
                );
                return Err(Error::Probe {
                    sent: seq,
                    requested: spec.count,
                    source: e,
                });
            }
        }

        debug!("Prober finished on {}", spec.interface);
        Ok(())
    }
}

impl Default for Prober {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize an ICMPv4 echo request (type 8, code 0) with checksum.
pub fn build_echo_request(ident: u16, seq: u16, payload: &[u8]) -> Vec<u8> {
    let echo = IcmpEchoHeader { id: ident, seq };
    let header = Icmpv4Header::with_checksum(Icmpv4Type::EchoRequest(echo), payload);

    let mut packet = Vec::with_capacity(header.header_len() + payload.len());
    header
        .write(&mut packet)
        .expect("writing to a Vec does not fail");
    packet.extend_from_slice(payload);
    packet
}

/// Request/response probe: `count` echo requests, each waiting up to
/// `timeout` for its reply.
#[derive(Debug, Clone)]
pub struct ExchangeSpec {
    pub destination: Ipv4Addr,
    pub interface: String,
    pub count: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeOutcome {
    pub replies: u32,
}

/// Sends echo requests one at a time and counts the replies that come back.
/// An unanswered round is a normal outcome; only socket failures are errors.
pub struct ExchangeProber {
    ident: u16,
}

impl ExchangeProber {
    pub fn new() -> Self {
        Self {
            ident: rand::random(),
        }
    }

    pub fn run(&self, spec: &ExchangeSpec) -> Result<ExchangeOutcome, Error> {
        debug!(
            "Exchange prober sending {} probes to {} on {}",
            spec.count, spec.destination, spec.interface
        );
        let socket = RawIcmpSocket::new(&spec.interface)?;

        let mut replies = 0;
        for seq in 0..spec.count {
            let packet = build_echo_request(self.ident, seq as u16, PROBE_PAYLOAD);
            if let Err(e) = socket.sendto(&packet, spec.destination) {
                return Err(Error::Probe {
                    sent: seq,
                    requested: spec.count,
                    source: e,
                });
            }
            if self.await_reply(&socket, spec, seq as u16)? {
                replies += 1;
            }
        }

        debug!(
            "Exchange prober on {}: {} of {} probes answered",
            spec.interface, replies, spec.count
        );
        Ok(ExchangeOutcome { replies })
    }

    fn await_reply(
        &self,
        socket: &RawIcmpSocket,
        spec: &ExchangeSpec,
        seq: u16,
    ) -> Result<bool, Error> {
        let deadline = Instant::now() + spec.timeout;
        let mut buf = [0u8; 2048];

        loop {
            let now = Instant::now();
            if now >= deadline {
                debug!("No reply from {} to probe {} in time", spec.destination, seq);
                return Ok(false);
            }
            socket.set_read_timeout(deadline - now)?;

            let len = match socket.recv(&mut buf) {
                Ok(len) => len,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    return Ok(false);
                }
                Err(e) => return Err(Error::Socket(e)),
            };

            // The raw socket delivers every ICMP datagram on the host; skip
            // anything that is not our reply.
            if self.is_matching_reply(&buf[..len], spec.destination, seq) {
                return Ok(true);
            }
        }
    }

    fn is_matching_reply(&self, datagram: &[u8], destination: Ipv4Addr, seq: u16) -> bool {
        // Raw ICMP reads include the IPv4 header.
        let Ok(ip) = Ipv4Slice::from_slice(datagram) else {
            return false;
        };
        if ip.header().source_addr() != destination {
            return false;
        }
        let Ok(icmp) = Icmpv4Slice::from_slice(ip.payload().payload) else {
            return false;
        };
        matches!(
            icmp.icmp_type(),
            Icmpv4Type::EchoReply(echo) if echo.id == self.ident && echo.seq == seq
        )
    }
}

impl Default for ExchangeProber {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_request_round_trips() {
        let packet = build_echo_request(0x1234, 7, PROBE_PAYLOAD);

        let icmp = Icmpv4Slice::from_slice(&packet).unwrap();
        match icmp.icmp_type() {
            Icmpv4Type::EchoRequest(echo) => {
                assert_eq!(echo.id, 0x1234);
                assert_eq!(echo.seq, 7);
            }
            other => panic!("expected echo request, got {:?}", other),
        }
        assert_eq!(icmp.payload(), PROBE_PAYLOAD);
    }

    #[test]
    fn echo_request_checksum_is_set() {
        let packet = build_echo_request(1, 0, PROBE_PAYLOAD);
        let icmp = Icmpv4Slice::from_slice(&packet).unwrap();
        let expected =
            Icmpv4Header::with_checksum(icmp.header().icmp_type, icmp.payload()).checksum;
        assert_eq!(icmp.header().checksum, expected);
    }

    #[test]
    fn reply_matching_rejects_foreign_packets() {
        let prober = ExchangeProber { ident: 42 };
        let destination = Ipv4Addr::new(192, 0, 2, 1);

        let reply = |id: u16, seq: u16, source: Ipv4Addr| {
            let mut datagram = Vec::new();
            etherparse::PacketBuilder::ipv4(
                source.octets(),
                Ipv4Addr::new(192, 0, 2, 2).octets(),
                64,
            )
            .icmpv4(Icmpv4Type::EchoReply(IcmpEchoHeader { id, seq }))
            .write(&mut datagram, PROBE_PAYLOAD)
            .unwrap();
            datagram
        };

        assert!(prober.is_matching_reply(&reply(42, 3, destination), destination, 3));
        // Wrong identifier, wrong sequence, wrong source
        assert!(!prober.is_matching_reply(&reply(41, 3, destination), destination, 3));
        assert!(!prober.is_matching_reply(&reply(42, 4, destination), destination, 3));
        assert!(!prober.is_matching_reply(
            &reply(42, 3, Ipv4Addr::new(203, 0, 113, 9)),
            destination,
            3
        ));
        // Truncated datagram
        assert!(!prober.is_matching_reply(&[0u8; 3], destination, 3));
    }
}
