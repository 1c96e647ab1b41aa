pub mod pcap;
pub mod socket;

use std::ffi::CStr;
use std::fs;
use std::io;
use std::net::Ipv4Addr;

use crate::error::Error;

/// Names of interfaces that are administratively up, sorted.
pub fn list_active_interfaces() -> Result<Vec<String>, Error> {
    let mut interfaces = Vec::new();
    for entry in fs::read_dir("/sys/class/net")? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if interface_is_up(&name) {
            interfaces.push(name);
        }
    }
    interfaces.sort();
    Ok(interfaces)
}

// An interface can disappear between the directory listing and the flags
// read; treat a failed read as not-up.
fn interface_is_up(name: &str) -> bool {
    let path = format!("/sys/class/net/{name}/flags");
    let Ok(flags) = fs::read_to_string(path) else {
        return false;
    };
    let flags = flags.trim().trim_start_matches("0x");
    u32::from_str_radix(flags, 16).is_ok_and(|f| f & libc::IFF_UP as u32 != 0)
}

/// First active `eth*` interface.
pub fn first_ethernet_interface() -> Result<String, Error> {
    list_active_interfaces()?
        .into_iter()
        .find(|name| is_ethernet_name(name))
        .ok_or_else(|| Error::InterfaceNotFound("eth*".to_string()))
}

fn is_ethernet_name(name: &str) -> bool {
    match name.strip_prefix("eth") {
        Some(rest) => !rest.is_empty() && rest.chars().all(|c| c.is_alphanumeric() || c == '_'),
        None => false,
    }
}

/// Interface carrying the 0.0.0.0/0 route.
pub fn default_route_interface() -> Result<String, Error> {
    let table = fs::read_to_string("/proc/net/route")?;
    parse_default_route(&table).ok_or(Error::NoDefaultRoute)
}

// /proc/net/route: header line, then
// Iface Destination Gateway Flags ... with addresses as little-endian hex
fn parse_default_route(table: &str) -> Option<String> {
    for line in table.lines().skip(1) {
        let mut fields = line.split_whitespace();
        let (Some(iface), Some(destination)) = (fields.next(), fields.next()) else {
            continue;
        };
        if destination == "00000000" {
            return Some(iface.to_string());
        }
    }
    None
}

/// First IPv4 address bound to `name`.
pub fn interface_address(name: &str) -> Result<Ipv4Addr, Error> {
    let mut addrs: *mut libc::ifaddrs = std::ptr::null_mut();
    if unsafe { libc::getifaddrs(&mut addrs) } != 0 {
        return Err(Error::Socket(io::Error::last_os_error()));
    }

    let mut found = None;
    let mut cursor = addrs;
    while !cursor.is_null() {
        let entry = unsafe { &*cursor };
        cursor = entry.ifa_next;

        if entry.ifa_addr.is_null() {
            continue;
        }
        let ifa_name = unsafe { CStr::from_ptr(entry.ifa_name) };
        if ifa_name.to_bytes() != name.as_bytes() {
            continue;
        }
        let family = unsafe { (*entry.ifa_addr).sa_family };
        if i32::from(family) != libc::AF_INET {
            continue;
        }

        let sin = unsafe { &*(entry.ifa_addr as *const libc::sockaddr_in) };
        found = Some(Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)));
        break;
    }
    unsafe { libc::freeifaddrs(addrs) };

    found.ok_or_else(|| Error::InterfaceNotFound(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_route_found() {
        let table = "Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\n\
                     eth0\t00010A0A\t00000000\t0001\t0\t0\t0\t00FFFFFF\n\
                     eth0\t00000000\t01010A0A\t0003\t0\t0\t100\t00000000\n";
        assert_eq!(parse_default_route(table), Some("eth0".to_string()));
    }

    #[test]
    fn no_default_route() {
        let table = "Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\n\
                     eth0\t00010A0A\t00000000\t0001\t0\t0\t0\t00FFFFFF\n";
        assert_eq!(parse_default_route(table), None);
    }

    #[test]
    fn empty_route_table() {
        assert_eq!(parse_default_route(""), None);
        assert_eq!(parse_default_route("Iface\tDestination\n"), None);
    }

    #[test]
    fn ethernet_names() {
        assert!(is_ethernet_name("eth0"));
        assert!(is_ethernet_name("eth12"));
        assert!(!is_ethernet_name("eth"));
        assert!(!is_ethernet_name("lo"));
        assert!(!is_ethernet_name("wlan0"));
        assert!(!is_ethernet_name("veth0"));
        assert!(!is_ethernet_name("eth-x")); // dash is not a name character
    }

    #[test]
    fn loopback_address_resolves() {
        assert_eq!(interface_address("lo").unwrap(), Ipv4Addr::LOCALHOST);
    }

    #[test]
    fn missing_interface_errors() {
        let err = interface_address("no-such-iface0").unwrap_err();
        assert!(matches!(err, Error::InterfaceNotFound(name) if name == "no-such-iface0"));
    }
}
