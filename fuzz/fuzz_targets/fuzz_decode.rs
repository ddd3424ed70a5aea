//! Fuzz target for the frame decoder.
//!
//! Every link framing is tried on the same bytes. Besides not panicking, a
//! decoded TCP view must sit behind an IPv4 header that announced TCP, and
//! every decoded header must fit in the input.

#![no_main]

use featsniff_common::{decode_link, extract, LinkType, Timestamp};
use libfuzzer_sys::fuzz_target;

const LINKS: [LinkType; 4] = [
    LinkType::Ethernet,
    LinkType::LinuxSll,
    LinkType::RawIp,
    LinkType::Null,
];

fuzz_target!(|data: &[u8]| {
    for link in LINKS {
        let Some(layers) = decode_link(link, data) else {
            continue;
        };

        let ipv4 = layers.ipv4();
        assert!(usize::from(ipv4.header_len()) <= data.len());

        match layers.tcp() {
            Some(tcp) => {
                assert!(ipv4.is_tcp());
                assert!(usize::from(ipv4.header_len() + tcp.header_len()) <= data.len());
                assert!(extract(&layers, Timestamp::new(0, 0)).is_some());
            }
            None => assert!(extract(&layers, Timestamp::new(0, 0)).is_none()),
        }
    }
});
