#![cfg_attr(not(test), no_std)]

//! Protocol decoding and per-packet feature extraction shared by the
//! featsniff sources. Everything here is a pure function of its input bytes.

#[cfg(any(test, feature = "testing"))]
extern crate alloc;

mod layers;
mod record;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use layers::{decode, decode_link, DecodedLayers, Ipv4View, LinkType, TcpFlags, TcpView};
pub use record::{extract, FeatureRecord, Protocol, Timestamp};
