//! End-to-end sessions against real interfaces.
//!
//! Everything that touches the wire needs CAP_NET_RAW (raw sockets and
//! packet capture), so those cases are `#[ignore]`d; run them with
//! `cargo test -- --ignored` as root. Ethernet-side cases send toward
//! TEST-NET-1 (192.0.2.1): the probes leave via the default route and the
//! observer counts outgoing requests, so nothing has to answer.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use echowire::{
    net, run_session, Error, ExchangeProber, ExchangeSpec, ObserveSpec, Observer, ProbeSpec,
    SessionConfig, Task,
};

const TEST_NET: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn pair(interface: &str, destination: Ipv4Addr, count: u32, timeout: Duration) -> Vec<Task> {
    vec![
        Task::Observe(ObserveSpec {
            interface: interface.to_string(),
            destination,
            count,
            timeout,
        }),
        Task::Probe(ProbeSpec {
            destination,
            interface: interface.to_string(),
            count,
        }),
    ]
}

#[test]
fn zero_tasks_complete_immediately() {
    init_logs();
    let start = Instant::now();
    let table = run_session(Vec::new()).unwrap();
    assert!(table.is_empty());
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn observer_on_missing_interface_fails() {
    init_logs();
    let spec = ObserveSpec {
        interface: "no-such-iface0".to_string(),
        destination: Ipv4Addr::LOCALHOST,
        count: 1,
        timeout: Duration::from_secs(1),
    };
    assert!(matches!(
        Observer::run(&spec),
        Err(Error::InterfaceNotFound(_))
    ));
}

#[test]
fn default_route_lookup_is_consistent() {
    init_logs();
    // Environments differ in whether a default route exists; either way the
    // lookup must agree with the interface listing.
    match net::default_route_interface() {
        Ok(interface) => {
            let active = net::list_active_interfaces().unwrap();
            assert!(active.contains(&interface), "{interface} not active");
        }
        Err(e) => assert!(matches!(e, Error::NoDefaultRoute)),
    }
}

#[test]
fn all_active_interfaces_get_a_task_pair() {
    init_logs();
    let config = SessionConfig::default();
    let tasks = config.tasks_for_all_active().unwrap();
    let active = net::list_active_interfaces().unwrap();

    assert_eq!(tasks.len(), 2 * active.len());
    assert!(active.contains(&"lo".to_string()));
    assert!(tasks
        .iter()
        .any(|t| matches!(t, Task::Observe(s) if s.interface == "lo")));
}

#[test]
#[ignore = "requires CAP_NET_RAW"]
fn loopback_probes_are_observed() {
    init_logs();
    let config = SessionConfig::default();
    let table = run_session(config.tasks_for("lo")).unwrap();

    assert_eq!(table.len(), 1);
    assert_eq!(table.get("lo"), Some(config.packet_count));
}

#[test]
#[ignore = "requires CAP_NET_RAW and a default route via eth*"]
fn ethernet_probes_are_observed() {
    init_logs();
    let interface = net::first_ethernet_interface().unwrap();
    let table = run_session(pair(&interface, TEST_NET, 5, Duration::from_secs(5))).unwrap();

    assert_eq!(table.get(&interface), Some(5));
}

#[test]
#[ignore = "requires CAP_NET_RAW and a default route via eth*"]
fn two_interfaces_count_independently() {
    init_logs();
    let interface = net::first_ethernet_interface().unwrap();

    let mut tasks = pair("lo", Ipv4Addr::LOCALHOST, 3, Duration::from_secs(5));
    tasks.extend(pair(&interface, TEST_NET, 3, Duration::from_secs(5)));
    let table = run_session(tasks).unwrap();

    assert_eq!(table.len(), 2);
    assert_eq!(table.get("lo"), Some(3));
    assert_eq!(table.get(&interface), Some(3));
}

#[test]
#[ignore = "requires CAP_NET_RAW"]
fn loopback_answers_every_exchange_probe() {
    init_logs();
    let config = SessionConfig::default();

    let outcome = ExchangeProber::new()
        .run(&ExchangeSpec {
            destination: config.destination,
            interface: "lo".to_string(),
            count: config.packet_count,
            timeout: config.timeout,
        })
        .unwrap();

    assert_eq!(outcome.replies, config.packet_count);
}

#[test]
#[ignore = "requires CAP_NET_RAW"]
fn zero_timeout_observer_returns_empty_handed() {
    init_logs();
    let spec = ObserveSpec {
        interface: "lo".to_string(),
        destination: Ipv4Addr::LOCALHOST,
        count: 5,
        timeout: Duration::ZERO,
    };

    let start = Instant::now();
    let outcome = Observer::run(&spec).unwrap();

    assert_eq!(outcome.matched_count, 0);
    assert!(outcome.matched_count <= spec.count);
    assert!(start.elapsed() < Duration::from_secs(1));
}
