use core::{fmt, net::Ipv4Addr, time::Duration};

use crate::layers::{DecodedLayers, TcpFlags};

const NANOS_PER_SEC: u32 = 1_000_000_000;

/// Capture time since the UNIX epoch, nanosecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp {
    secs: u64,
    nanos: u32,
}

impl Timestamp {
    pub const fn new(secs: u64, nanos: u32) -> Self {
        Self {
            secs: secs + (nanos / NANOS_PER_SEC) as u64,
            nanos: nanos % NANOS_PER_SEC,
        }
    }

    pub const fn secs(&self) -> u64 {
        self.secs
    }

    pub const fn subsec_nanos(&self) -> u32 {
        self.nanos
    }

    /// Whole microseconds; the sub-microsecond remainder is dropped, not rounded.
    pub const fn as_micros(&self) -> u64 {
        self.secs
            .saturating_mul(1_000_000)
            .saturating_add((self.nanos / 1_000) as u64)
    }
}

impl From<Duration> for Timestamp {
    fn from(value: Duration) -> Self {
        Self::new(value.as_secs(), value.subsec_nanos())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("tcp"),
        }
    }
}

/// Per-packet features of one TCP/IPv4 packet.
///
/// `Display` renders the comma separated output row, columns in the order of
/// [`FeatureRecord::FIELDS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureRecord {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: Protocol,
    pub timestamp_us: u64,
    pub ip_header_len: u16,
    pub ip_payload_len: u16,
    pub flags: TcpFlags,
    pub tcp_header_len: u16,
}

impl FeatureRecord {
    pub const FIELDS: [&'static str; 17] = [
        "src_ip",
        "dst_ip",
        "src_port",
        "dst_port",
        "protocol",
        "timestamp_us",
        "ip_header_len",
        "ip_payload_len",
        "cwr",
        "ece",
        "urg",
        "ack",
        "psh",
        "rst",
        "syn",
        "fin",
        "tcp_header_len",
    ];
}

impl fmt::Display for FeatureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{},{},{}",
            self.src,
            self.dst,
            self.src_port,
            self.dst_port,
            self.protocol,
            self.timestamp_us,
            self.ip_header_len,
            self.ip_payload_len,
        )?;
        for flag in self.flags.to_array() {
            write!(f, ",{}", u8::from(flag))?;
        }
        write!(f, ",{}", self.tcp_header_len)
    }
}

/// Builds the feature record of a decoded frame. Frames without a TCP layer
/// have no features.
pub fn extract(layers: &DecodedLayers<'_>, ts: Timestamp) -> Option<FeatureRecord> {
    let ipv4 = layers.ipv4();
    if !ipv4.is_tcp() {
        return None;
    }
    let tcp = layers.tcp()?;

    Some(FeatureRecord {
        src: ipv4.src(),
        dst: ipv4.dst(),
        src_port: tcp.src_port(),
        dst_port: tcp.dst_port(),
        protocol: Protocol::Tcp,
        timestamp_us: ts.as_micros(),
        ip_header_len: ipv4.header_len(),
        ip_payload_len: ipv4.payload_len(),
        flags: tcp.flags(),
        tcp_header_len: tcp.header_len(),
    })
}
