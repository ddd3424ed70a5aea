//! Synthetic frame construction for tests.

use alloc::vec::Vec;

/// Builds an IPv4 packet carrying a TCP header (or an 8 byte stub for any
/// other protocol number) and wraps it in the requested link framing.
/// Checksums are left at zero.
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    src: [u8; 4],
    dst: [u8; 4],
    src_port: u16,
    dst_port: u16,
    protocol: u8,
    ihl: u8,
    data_offset: u8,
    flags: u8,
    fragment_offset: u16,
    total_len: Option<u16>,
    payload_len: usize,
    ether_type: u16,
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self {
            src: [192, 168, 0, 1],
            dst: [192, 168, 0, 2],
            src_port: 40000,
            dst_port: 443,
            protocol: 6,
            ihl: 5,
            data_offset: 5,
            flags: 0,
            fragment_offset: 0,
            total_len: None,
            payload_len: 0,
            ether_type: 0x0800,
        }
    }
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn src(mut self, addr: [u8; 4], port: u16) -> Self {
        self.src = addr;
        self.src_port = port;
        self
    }

    pub fn dst(mut self, addr: [u8; 4], port: u16) -> Self {
        self.dst = addr;
        self.dst_port = port;
        self
    }

    pub fn protocol(mut self, protocol: u8) -> Self {
        self.protocol = protocol;
        self
    }

    /// IPv4 header length in 32 bit words; options are zero filled.
    pub fn ihl(mut self, ihl: u8) -> Self {
        self.ihl = ihl;
        self
    }

    /// TCP header length in 32 bit words; options are zero filled.
    pub fn data_offset(mut self, data_offset: u8) -> Self {
        self.data_offset = data_offset;
        self
    }

    pub fn flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn fragment_offset(mut self, offset: u16) -> Self {
        self.fragment_offset = offset;
        self
    }

    /// Overrides the computed IPv4 total length field.
    pub fn total_len(mut self, total_len: u16) -> Self {
        self.total_len = Some(total_len);
        self
    }

    pub fn payload_len(mut self, len: usize) -> Self {
        self.payload_len = len;
        self
    }

    pub fn ether_type(mut self, ether_type: u16) -> Self {
        self.ether_type = ether_type;
        self
    }

    fn transport(&self) -> Vec<u8> {
        let mut seg = Vec::new();
        seg.extend_from_slice(&self.src_port.to_be_bytes());
        seg.extend_from_slice(&self.dst_port.to_be_bytes());

        if self.protocol == 6 {
            let header_len = usize::from(self.data_offset) * 4;
            seg.extend_from_slice(&1u32.to_be_bytes()); // seq
            seg.extend_from_slice(&0u32.to_be_bytes()); // ack
            seg.push(self.data_offset << 4);
            seg.push(self.flags);
            seg.extend_from_slice(&64240u16.to_be_bytes()); // window
            seg.extend_from_slice(&[0, 0, 0, 0]); // checksum, urgent pointer
            seg.resize(header_len.max(seg.len()), 0);
        } else {
            let len = (8 + self.payload_len) as u16;
            seg.extend_from_slice(&len.to_be_bytes());
            seg.extend_from_slice(&[0, 0]);
        }

        seg.resize(seg.len() + self.payload_len, 0);
        seg
    }

    /// The IPv4 packet without link framing.
    pub fn raw_ip(&self) -> Vec<u8> {
        let header_len = usize::from(self.ihl) * 4;
        let transport = self.transport();
        let total_len = self
            .total_len
            .unwrap_or((header_len.max(20) + transport.len()) as u16);

        let mut pkt = Vec::with_capacity(header_len + transport.len());
        pkt.push(0x40 | (self.ihl & 0x0f));
        pkt.push(0);
        pkt.extend_from_slice(&total_len.to_be_bytes());
        pkt.extend_from_slice(&0x1c46u16.to_be_bytes()); // identification
        pkt.extend_from_slice(&(self.fragment_offset & 0x1fff).to_be_bytes());
        pkt.push(64);
        pkt.push(self.protocol);
        pkt.extend_from_slice(&[0, 0]);
        pkt.extend_from_slice(&self.src);
        pkt.extend_from_slice(&self.dst);
        pkt.resize(header_len.max(pkt.len()), 0);
        pkt.extend_from_slice(&transport);
        pkt
    }

    pub fn ethernet(&self) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&[0x00, 0x1b, 0x21, 0x3a, 0x4f, 0x02]);
        frame.extend_from_slice(&[0x00, 0x1b, 0x21, 0x3a, 0x4f, 0x01]);
        frame.extend_from_slice(&self.ether_type.to_be_bytes());
        frame.extend_from_slice(&self.raw_ip());
        frame
    }

    pub fn linux_sll(&self) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&0u16.to_be_bytes()); // packet type: to us
        frame.extend_from_slice(&1u16.to_be_bytes()); // ARPHRD_ETHER
        frame.extend_from_slice(&6u16.to_be_bytes());
        frame.extend_from_slice(&[0x00, 0x1b, 0x21, 0x3a, 0x4f, 0x01, 0, 0]);
        frame.extend_from_slice(&self.ether_type.to_be_bytes());
        frame.extend_from_slice(&self.raw_ip());
        frame
    }

    pub fn null(&self) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&2u32.to_le_bytes());
        frame.extend_from_slice(&self.raw_ip());
        frame
    }
}
