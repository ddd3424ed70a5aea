use core::{fmt, net::Ipv4Addr};

use network_types::{
    eth::{EthHdr, EtherType},
    ip::{IpProto, Ipv4Hdr},
    tcp::TcpHdr,
};

const ETHER_TYPE_IPV4: u16 = u16::from_be(EtherType::Ipv4 as u16);
const IP_PROTO_TCP: u8 = IpProto::Tcp as u8;

const LINUX_SLL_LEN: usize = 16;
const NULL_LEN: usize = 4;
const AF_INET: u32 = 2;

/// Framing that precedes the network layer in a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    /// DLT 1, 14 byte header with the EtherType in its last two bytes.
    Ethernet,
    /// DLT 113, the 16 byte "cooked" header of `any` captures.
    LinuxSll,
    /// DLT 12/101/228, the frame starts with the IP header.
    RawIp,
    /// DLT 0, BSD loopback with a 4 byte host order address family.
    Null,
}

impl LinkType {
    /// Maps a pcap `LINKTYPE_*` value, `None` when the framing is not supported.
    pub fn from_dlt(dlt: u32) -> Option<Self> {
        match dlt {
            0 => Some(LinkType::Null),
            1 => Some(LinkType::Ethernet),
            12 | 101 | 228 => Some(LinkType::RawIp),
            113 => Some(LinkType::LinuxSll),
            _ => None,
        }
    }

    /// Returns the network layer bytes when the framing announces IPv4.
    fn strip(self, frame: &[u8]) -> Option<&[u8]> {
        match self {
            LinkType::Ethernet => {
                if read_u16(frame, EthHdr::LEN - 2)? != ETHER_TYPE_IPV4 {
                    return None;
                }
                frame.get(EthHdr::LEN..)
            }
            LinkType::LinuxSll => {
                if read_u16(frame, LINUX_SLL_LEN - 2)? != ETHER_TYPE_IPV4 {
                    return None;
                }
                frame.get(LINUX_SLL_LEN..)
            }
            LinkType::RawIp => Some(frame),
            LinkType::Null => {
                let family: [u8; NULL_LEN] = frame.get(..NULL_LEN)?.try_into().ok()?;
                // the writer's byte order is unknown, accept both
                if u32::from_le_bytes(family) != AF_INET && u32::from_be_bytes(family) != AF_INET {
                    return None;
                }
                frame.get(NULL_LEN..)
            }
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkType::Ethernet => "ethernet",
            LinkType::LinuxSll => "linux-sll",
            LinkType::RawIp => "raw-ip",
            LinkType::Null => "null",
        };
        f.write_str(name)
    }
}

#[inline]
fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Borrowed view over exactly the bytes of an IPv4 header, options included.
///
/// The view only exists once the header length has been checked against the
/// buffer, so the fixed-offset accessors below cannot read out of bounds.
#[derive(Debug, Clone, Copy)]
pub struct Ipv4View<'a> {
    hdr: &'a [u8],
}

impl<'a> Ipv4View<'a> {
    /// Splits `buf` into the header view and the bytes following it.
    pub(crate) fn parse(buf: &'a [u8]) -> Option<(Self, &'a [u8])> {
        let version_ihl = *buf.first()?;
        if version_ihl >> 4 != 4 {
            return None;
        }

        let header_len = usize::from(version_ihl & 0x0f) * 4;
        if header_len < Ipv4Hdr::LEN || header_len > buf.len() {
            return None;
        }

        let (hdr, rest) = buf.split_at(header_len);
        Some((Self { hdr }, rest))
    }

    pub fn header_len(&self) -> u16 {
        self.hdr.len() as u16
    }

    /// Raw total length field, header included.
    pub fn total_len(&self) -> u16 {
        u16::from_be_bytes([self.hdr[2], self.hdr[3]])
    }

    /// Total length minus header length. Saturates at zero for frames whose
    /// total length field was never filled in (segmentation offload).
    pub fn payload_len(&self) -> u16 {
        self.total_len().saturating_sub(self.header_len())
    }

    /// Fragment offset in 8 byte units.
    pub fn fragment_offset(&self) -> u16 {
        u16::from_be_bytes([self.hdr[6], self.hdr[7]]) & 0x1fff
    }

    pub fn protocol(&self) -> u8 {
        self.hdr[9]
    }

    pub fn src(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.hdr[12], self.hdr[13], self.hdr[14], self.hdr[15])
    }

    pub fn dst(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.hdr[16], self.hdr[17], self.hdr[18], self.hdr[19])
    }

    pub fn is_tcp(&self) -> bool {
        self.protocol() == IP_PROTO_TCP
    }

    fn carries_tcp_header(&self) -> bool {
        // only the first fragment starts with the transport header
        self.is_tcp() && self.fragment_offset() == 0
    }
}

/// Borrowed view over exactly the bytes of a TCP header, options included.
#[derive(Debug, Clone, Copy)]
pub struct TcpView<'a> {
    hdr: &'a [u8],
}

impl<'a> TcpView<'a> {
    pub(crate) fn parse(buf: &'a [u8]) -> Option<Self> {
        let offset_byte = *buf.get(12)?;
        let header_len = usize::from(offset_byte >> 4) * 4;
        if header_len < TcpHdr::LEN || header_len > buf.len() {
            return None;
        }

        Some(Self {
            hdr: &buf[..header_len],
        })
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes([self.hdr[0], self.hdr[1]])
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes([self.hdr[2], self.hdr[3]])
    }

    /// Data offset field, in 32 bit words.
    pub fn data_offset(&self) -> u8 {
        self.hdr[12] >> 4
    }

    pub fn header_len(&self) -> u16 {
        self.hdr.len() as u16
    }

    pub fn flags(&self) -> TcpFlags {
        TcpFlags::from_bits(self.hdr[13])
    }
}

/// The eight control bits of the TCP flags byte. NS lives in the data offset
/// byte and is not part of the feature set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpFlags(u8);

impl TcpFlags {
    pub const CWR: u8 = 0x80;
    pub const ECE: u8 = 0x40;
    pub const URG: u8 = 0x20;
    pub const ACK: u8 = 0x10;
    pub const PSH: u8 = 0x08;
    pub const RST: u8 = 0x04;
    pub const SYN: u8 = 0x02;
    pub const FIN: u8 = 0x01;

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    #[inline]
    fn is_set(&self, mask: u8) -> bool {
        self.0 & mask != 0
    }

    pub fn cwr(&self) -> bool {
        self.is_set(Self::CWR)
    }

    pub fn ece(&self) -> bool {
        self.is_set(Self::ECE)
    }

    pub fn urg(&self) -> bool {
        self.is_set(Self::URG)
    }

    pub fn ack(&self) -> bool {
        self.is_set(Self::ACK)
    }

    pub fn psh(&self) -> bool {
        self.is_set(Self::PSH)
    }

    pub fn rst(&self) -> bool {
        self.is_set(Self::RST)
    }

    pub fn syn(&self) -> bool {
        self.is_set(Self::SYN)
    }

    pub fn fin(&self) -> bool {
        self.is_set(Self::FIN)
    }

    /// Flags in record order: CWR, ECE, URG, ACK, PSH, RST, SYN, FIN.
    pub fn to_array(&self) -> [bool; 8] {
        [
            self.cwr(),
            self.ece(),
            self.urg(),
            self.ack(),
            self.psh(),
            self.rst(),
            self.syn(),
            self.fin(),
        ]
    }
}

/// Layers recognised in one frame. Constructed only by [`decode_link`], which
/// never yields a TCP view unless the IPv4 header announced TCP.
#[derive(Debug, Clone, Copy)]
pub struct DecodedLayers<'a> {
    ipv4: Ipv4View<'a>,
    tcp: Option<TcpView<'a>>,
}

impl<'a> DecodedLayers<'a> {
    pub fn ipv4(&self) -> &Ipv4View<'a> {
        &self.ipv4
    }

    pub fn tcp(&self) -> Option<&TcpView<'a>> {
        self.tcp.as_ref()
    }
}

/// Decodes an Ethernet frame. `None` means the frame holds no IPv4 packet.
pub fn decode(frame: &[u8]) -> Option<DecodedLayers<'_>> {
    decode_link(LinkType::Ethernet, frame)
}

/// Decodes a frame captured with the given link framing.
///
/// Layers whose claimed length exceeds the remaining bytes are reported as
/// absent; nothing is read beyond the end of `frame`.
pub fn decode_link(link: LinkType, frame: &[u8]) -> Option<DecodedLayers<'_>> {
    let network = link.strip(frame)?;
    let (ipv4, payload) = Ipv4View::parse(network)?;
    let tcp = if ipv4.carries_tcp_header() {
        TcpView::parse(payload)
    } else {
        None
    };

    Some(DecodedLayers { ipv4, tcp })
}

#[cfg(test)]
mod test {
    use std::net::Ipv4Addr;

    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::{decode, decode_link, DecodedLayers, Ipv4View, LinkType, TcpFlags, TcpView};
    use crate::testing::FrameBuilder;

    const MIN_TCP_FRAME: usize = 14 + 20 + 20;

    #[test]
    fn test_decode_tcp_frame() {
        let frame = FrameBuilder::new()
            .src([10, 0, 0, 1], 5555)
            .dst([10, 0, 0, 2], 80)
            .flags(TcpFlags::SYN)
            .payload_len(20)
            .ethernet();

        let layers = decode(&frame).expect("ipv4 layer");
        assert_eq!(layers.ipv4().src(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(layers.ipv4().dst(), Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(layers.ipv4().header_len(), 20);
        assert_eq!(layers.ipv4().total_len(), 60);
        assert_eq!(layers.ipv4().payload_len(), 40);

        let tcp = layers.tcp().expect("tcp layer");
        assert_eq!(tcp.src_port(), 5555);
        assert_eq!(tcp.dst_port(), 80);
        assert_eq!(tcp.data_offset(), 5);
        assert_eq!(tcp.header_len(), 20);
        assert!(tcp.flags().syn());
        assert!(!tcp.flags().ack());
    }

    #[test]
    fn test_short_buffers_have_no_tcp_view() {
        let frame = FrameBuilder::new().ethernet();
        assert_eq!(frame.len(), MIN_TCP_FRAME);

        for len in 0..MIN_TCP_FRAME {
            let layers = decode(&frame[..len]);
            assert!(layers.and_then(|l| l.tcp().copied()).is_none(), "len {len}");
        }

        let mut rng = StdRng::seed_from_u64(0x2545_f491_4f6c_dd1d);
        for round in 0..2_000 {
            let mut buf = vec![0u8; rng.random_range(0..MIN_TCP_FRAME)];
            rng.fill(&mut buf[..]);
            // steer half of the rounds past the ethertype and version checks
            if buf.len() > 14 && round % 2 == 0 {
                buf[12..15].copy_from_slice(&[0x08, 0x00, 0x45]);
            }

            for link in [LinkType::Ethernet, LinkType::LinuxSll, LinkType::RawIp, LinkType::Null] {
                let Some(layers) = decode_link(link, &buf) else {
                    continue;
                };
                // 20 byte IPv4 plus 20 byte TCP must fit after the framing
                let network = link.strip(&buf).map_or(0, <[u8]>::len);
                if network < 40 {
                    assert!(layers.tcp().is_none(), "{link} len {}", buf.len());
                }
            }
        }
    }

    #[test]
    fn test_tcp_view_requires_tcp_protocol() {
        let udp = FrameBuilder::new().protocol(17).raw_ip();
        let (ipv4, payload) = Ipv4View::parse(&udp).expect("ipv4 layer");
        let tcp = TcpView::parse(payload).expect("tcp shaped payload");

        // a TCP view next to a non TCP header never yields a record
        let layers = DecodedLayers {
            ipv4,
            tcp: Some(tcp),
        };
        assert!(!layers.ipv4().is_tcp());
        assert!(crate::extract(&layers, crate::Timestamp::new(1, 0)).is_none());

        // the same bytes through the decoder carry no TCP view at all
        assert!(decode_link(LinkType::RawIp, &udp)
            .expect("ipv4 layer")
            .tcp()
            .is_none());
    }

    #[test]
    fn test_ihl_beyond_buffer_is_absent() {
        let mut frame = FrameBuilder::new().ethernet();
        frame.truncate(14 + 20);
        // claim a 60 byte header on a 20 byte buffer
        frame[14] = 0x4f;
        assert!(decode(&frame).is_none());
    }

    #[test]
    fn test_invalid_ipv4_headers() {
        let mut frame = FrameBuilder::new().ethernet();
        frame[14] = 0x44;
        assert!(decode(&frame).is_none());

        let mut frame = FrameBuilder::new().ethernet();
        frame[14] = 0x65;
        assert!(decode(&frame).is_none());
    }

    #[test]
    fn test_data_offset_checks() {
        let frame = FrameBuilder::new().data_offset(15).ethernet();
        let mut short = frame.clone();
        short.truncate(14 + 20 + 40);
        let layers = decode(&short).expect("ipv4 layer");
        assert!(layers.tcp().is_none());

        let layers = decode(&frame).expect("ipv4 layer");
        assert_eq!(layers.tcp().expect("tcp layer").header_len(), 60);

        let mut frame = FrameBuilder::new().ethernet();
        frame[14 + 20 + 12] = 0x40;
        let layers = decode(&frame).expect("ipv4 layer");
        assert!(layers.tcp().is_none());
    }

    #[test]
    fn test_ip_options_shift_tcp_header() {
        let frame = FrameBuilder::new().ihl(8).src([1, 2, 3, 4], 1000).ethernet();
        let layers = decode(&frame).expect("ipv4 layer");
        assert_eq!(layers.ipv4().header_len(), 32);
        assert_eq!(layers.tcp().expect("tcp layer").src_port(), 1000);
    }

    #[test]
    fn test_non_tcp_protocol() {
        let frame = FrameBuilder::new().protocol(17).ethernet();
        let layers = decode(&frame).expect("ipv4 layer");
        assert_eq!(layers.ipv4().protocol(), 17);
        assert!(layers.tcp().is_none());
    }

    #[test]
    fn test_non_ipv4_ethertype() {
        let frame = FrameBuilder::new().ether_type(0x86dd).ethernet();
        assert!(decode(&frame).is_none());

        let frame = FrameBuilder::new().ether_type(0x8100).ethernet();
        assert!(decode(&frame).is_none());
    }

    #[test]
    fn test_later_fragment_has_no_tcp_view() {
        let frame = FrameBuilder::new().fragment_offset(185).ethernet();
        let layers = decode(&frame).expect("ipv4 layer");
        assert_eq!(layers.ipv4().fragment_offset(), 185);
        assert!(layers.tcp().is_none());
    }

    #[test]
    fn test_other_link_types() {
        let builder = FrameBuilder::new().src([192, 168, 1, 1], 443).flags(TcpFlags::ACK);

        for (link, frame) in [
            (LinkType::LinuxSll, builder.linux_sll()),
            (LinkType::RawIp, builder.raw_ip()),
            (LinkType::Null, builder.null()),
        ] {
            let layers = decode_link(link, &frame).expect("ipv4 layer");
            assert_eq!(layers.ipv4().src(), Ipv4Addr::new(192, 168, 1, 1), "{link}");
            let tcp = layers.tcp().expect("tcp layer");
            assert_eq!(tcp.src_port(), 443);
            assert!(tcp.flags().ack());
        }

        // an ethernet frame read as cooked capture has the wrong protocol bytes
        assert!(decode_link(LinkType::LinuxSll, &builder.ethernet()).is_none());
    }

    #[test]
    fn test_link_type_from_dlt() {
        assert_eq!(LinkType::from_dlt(1), Some(LinkType::Ethernet));
        assert_eq!(LinkType::from_dlt(113), Some(LinkType::LinuxSll));
        assert_eq!(LinkType::from_dlt(101), Some(LinkType::RawIp));
        assert_eq!(LinkType::from_dlt(0), Some(LinkType::Null));
        assert_eq!(LinkType::from_dlt(127), None);
    }
}
