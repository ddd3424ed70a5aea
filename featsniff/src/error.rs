use std::io;

use thiserror::Error;

/// Failures to open or read a packet source. All of them end the run.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("cannot open capture file '{path}': {source}")]
    FileOpen {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("'{path}' is not a valid pcap file: {source}")]
    InvalidCapture {
        path: String,
        #[source]
        source: pcap_file::PcapError,
    },

    #[error("unsupported link type {dlt} in '{path}'")]
    UnsupportedLinkType { path: String, dlt: u32 },

    #[error("failed to read packet from '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: pcap_file::PcapError,
    },

    #[error("cannot find interface '{0}'")]
    DeviceNotFound(String),

    #[error("cannot open interface '{device}': {source}")]
    DeviceOpen {
        device: String,
        #[source]
        source: io::Error,
    },
}

/// The output channel rejected a record.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to write feature record: {0}")]
    Write(#[source] io::Error),

    #[error("failed to flush feature records: {0}")]
    Flush(#[source] io::Error),
}

/// Failures of the capture thread during live capture.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to start capture on '{device}': {source}")]
    Start {
        device: String,
        #[source]
        source: io::Error,
    },

    #[error("capture on '{device}' failed: {source}")]
    Read {
        device: String,
        #[source]
        source: io::Error,
    },

    #[error("capture thread for '{0}' panicked")]
    Panicked(String),

    #[error("capture on '{0}' already ended with an error")]
    Failed(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Capture(#[from] CaptureError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
