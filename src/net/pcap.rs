// References:
// https://www.tcpdump.org/manpages/pcap_open_live.3pcap.html
// https://www.tcpdump.org/manpages/pcap_compile.3pcap.html
// https://www.tcpdump.org/manpages/pcap_next_ex.3pcap.html
// https://www.tcpdump.org/manpages/pcap_stats.3pcap.html

#![allow(non_camel_case_types)]

use std::ffi::{CStr, CString};

pub use libc::{c_char, c_int, c_uchar, c_uint, c_ushort, timeval};
use log::debug;

use crate::error::Error;

// Opaque pcap handle
// Reference: https://doc.rust-lang.org/nomicon/ffi.html
#[repr(C)]
struct pcap_t {
    _data: [u8; 0],
    _marker: core::marker::PhantomData<(*mut u8, core::marker::PhantomPinned)>,
}

#[repr(C)]
pub struct pcap_pkthdr {
    pub ts: timeval,
    pub caplen: c_uint,
    pub len: c_uint,
}

#[repr(C)]
struct pcap_stat {
    ps_recv: c_uint,
    ps_drop: c_uint,
    ps_ifdrop: c_uint,
}

#[repr(C)]
struct bpf_program {
    bf_len: c_uint,
    bf_insns: *mut bpf_insn,
}

#[repr(C)]
struct bpf_insn {
    code: c_ushort,
    jt: c_uchar,
    jf: c_uchar,
    k: c_uint,
}

#[link(name = "pcap")]
extern "C" {
    // Open a device for capturing
    fn pcap_open_live(
        device: *const c_char,
        snaplen: c_int,
        promisc: c_int,
        to_ms: c_int,
        errbuf: *mut c_char,
    ) -> *mut pcap_t;

    // Compile a filter expression
    fn pcap_compile(
        p: *mut pcap_t,
        fp: *mut bpf_program,
        string: *const c_char,
        optimize: c_int,
        netmask: c_uint,
    ) -> c_int;

    // Set the filter with the bpf program created by pcap_compile
    fn pcap_setfilter(p: *mut pcap_t, fp: *mut bpf_program) -> c_int;

    fn pcap_freecode(fp: *mut bpf_program);

    // Read the next packet; 1 = packet, 0 = read timeout, negative = error
    fn pcap_next_ex(
        p: *mut pcap_t,
        header: *mut *mut pcap_pkthdr,
        data: *mut *const c_uchar,
    ) -> c_int;

    fn pcap_stats(p: *mut pcap_t, stats: *mut pcap_stat) -> c_int;

    fn pcap_geterr(p: *mut pcap_t) -> *mut c_char;

    fn pcap_close(p: *mut pcap_t);
}

/// One captured frame. The data borrows the capture's internal buffer and is
/// only valid until the next read.
pub struct Packet<'p> {
    pub data: &'p [u8],
}

/// Counters reported by the capture at any point of its lifetime.
#[derive(Debug, Default, Clone, Copy)]
pub struct CaptureStats {
    pub received: u32,
    pub dropped: u32,
    pub if_dropped: u32,
}

/// Live packet capture on one interface, closed when dropped.
pub struct PacketCapture {
    handle: *mut pcap_t,
    interface: String,
}

impl PacketCapture {
    const PCAP_ERRBUF_SIZE: usize = 256;
    const PCAP_SNAPLEN: c_int = 8192;
    const PCAP_PROMISC: c_int = 1;
    // Short read timeout so callers can enforce their own deadline between reads
    const PCAP_POLL_MS: c_int = 100;
    const PCAP_OPTIMIZE: c_int = 1;

    pub fn open(interface: &str) -> Result<Self, Error> {
        let iface_cstr = CString::new(interface).map_err(|_| Error::Capture {
            interface: interface.to_string(),
            reason: "interface name contains a NUL byte".to_string(),
        })?;

        let mut errbuf = [0 as c_char; Self::PCAP_ERRBUF_SIZE];
        let p = unsafe {
            pcap_open_live(
                iface_cstr.as_ptr(),
                Self::PCAP_SNAPLEN,
                Self::PCAP_PROMISC,
                Self::PCAP_POLL_MS,
                errbuf.as_mut_ptr(),
            )
        };
        if p.is_null() {
            let reason = unsafe { CStr::from_ptr(errbuf.as_ptr()) }
                .to_string_lossy()
                .into_owned();
            return Err(Error::Capture {
                interface: interface.to_string(),
                reason,
            });
        }

        debug!("Opened capture on interface {interface}");
        Ok(Self {
            handle: p,
            interface: interface.to_string(),
        })
    }

    pub fn set_filter(&mut self, filter: &str) -> Result<(), Error> {
        let filter_cstr = CString::new(filter).map_err(|_| Error::Capture {
            interface: self.interface.clone(),
            reason: "filter contains a NUL byte".to_string(),
        })?;

        // Compile the filter
        let mut bpf = bpf_program {
            bf_len: 0,
            bf_insns: std::ptr::null_mut(),
        };
        let res = unsafe {
            pcap_compile(
                self.handle,
                &mut bpf,
                filter_cstr.as_ptr(),
                Self::PCAP_OPTIMIZE,
                0,
            )
        };
        if res < 0 {
            return Err(self.error("pcap_compile"));
        }

        // Install the filter
        let res = unsafe { pcap_setfilter(self.handle, &mut bpf) };
        unsafe { pcap_freecode(&mut bpf) };
        if res < 0 {
            return Err(self.error("pcap_setfilter"));
        }

        debug!("Installed filter on {}: {filter}", self.interface);
        Ok(())
    }

    /// Pull one frame. `Ok(None)` means the read timeout expired with nothing
    /// to deliver.
    pub fn next_packet(&mut self) -> Result<Option<Packet<'_>>, Error> {
        let mut header: *mut pcap_pkthdr = std::ptr::null_mut();
        let mut data: *const c_uchar = std::ptr::null();
        let res = unsafe { pcap_next_ex(self.handle, &mut header, &mut data) };
        match res {
            1 => {
                let caplen = unsafe { (*header).caplen } as usize;
                let data = unsafe { std::slice::from_raw_parts(data, caplen) };
                Ok(Some(Packet { data }))
            }
            0 => Ok(None),
            _ => Err(self.error("pcap_next_ex")),
        }
    }

    pub fn stats(&self) -> CaptureStats {
        let mut stats = pcap_stat {
            ps_recv: 0,
            ps_drop: 0,
            ps_ifdrop: 0,
        };
        let res = unsafe { pcap_stats(self.handle, &mut stats) };
        if res < 0 {
            return CaptureStats::default();
        }
        CaptureStats {
            received: stats.ps_recv,
            dropped: stats.ps_drop,
            if_dropped: stats.ps_ifdrop,
        }
    }

    fn error(&self, operation: &str) -> Error {
        let err = unsafe { pcap_geterr(self.handle) };
        let reason = if err.is_null() {
            operation.to_string()
        } else {
            let detail = unsafe { CStr::from_ptr(err) }.to_string_lossy();
            format!("{operation}: {detail}")
        };
        Error::Capture {
            interface: self.interface.clone(),
            reason,
        }
    }
}

impl Drop for PacketCapture {
    fn drop(&mut self) {
        unsafe { pcap_close(self.handle) };
    }
}
