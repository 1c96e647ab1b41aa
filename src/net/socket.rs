use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use libc::{c_void, recv};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

/// Raw ICMP socket scoped to one interface.
///
/// The kernel prepends the IPv4 header on send and delivers it on receive.
/// Creation requires CAP_NET_RAW.
pub struct RawIcmpSocket {
    inner: Socket,
}

impl RawIcmpSocket {
    pub fn new(interface: &str) -> Result<Self, io::Error> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
        socket.bind_device(Some(interface.as_bytes()))?;
        Ok(Self { inner: socket })
    }

    /// Bound wait for the next datagram; a zero duration is clamped up since
    /// it would disable the timeout entirely.
    pub fn set_read_timeout(&self, timeout: Duration) -> Result<(), io::Error> {
        let timeout = timeout.max(Duration::from_millis(1));
        self.inner.set_read_timeout(Some(timeout))
    }

    pub fn sendto(&self, buf: &[u8], destination: Ipv4Addr) -> Result<(), io::Error> {
        let addr = SockAddr::from(SocketAddrV4::new(destination, 0));
        self.inner.send_to(buf, &addr)?;
        Ok(())
    }

    /// Read one datagram, IPv4 header included. Times out with
    /// `WouldBlock`/`TimedOut` per the configured read timeout.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize, io::Error> {
        let result = unsafe {
            recv(
                self.inner.as_raw_fd(),
                buf.as_mut_ptr() as *mut c_void,
                buf.len(),
                0,
            )
        };

        if result < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(result as usize)
        }
    }
}
