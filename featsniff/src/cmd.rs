use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "featsniff",
    version,
    about = "Per-packet TCP/IPv4 feature stream from a pcap file or a network device",
    disable_help_subcommand = true
)]
pub struct Cmd {
    /// Set the log verbose.
    #[arg(
        short = 'v',
        default_value = "info",
        value_name = "verbose",
        global = true,
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub verbose: String,

    /// YAML configuration file.
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub sub_cmd: SubCmd,
}

#[derive(Subcommand, Clone)]
pub enum SubCmd {
    /// Output feature stream from file
    StreamFile(StreamFile),

    /// Output feature stream from device
    StreamDevice(StreamDevice),

    /// List available devices
    TestDevices,

    /// Open file and read one packet
    TestFile(TestFile),
}

#[derive(Args, Clone)]
pub struct StreamFile {
    /// Path of the pcap file to replay
    pub path: PathBuf,

    /// Print the column names before the first record
    #[arg(long)]
    pub header: bool,
}

#[derive(Args, Clone)]
pub struct StreamDevice {
    /// Name of the network interface (e.g. eth0)
    pub name: String,

    /// Stop capturing after this long (e.g. 10s, 5m)
    #[arg(short = 'd', long, value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// Stop capturing after this many packets
    #[arg(short = 'n', long = "count", value_parser = clap::value_parser!(u64).range(1..))]
    pub count: Option<u64>,

    /// Do not put the interface into promiscuous mode
    #[arg(long)]
    pub no_promisc: bool,

    /// Print the column names before the first record
    #[arg(long)]
    pub header: bool,
}

#[derive(Args, Clone)]
pub struct TestFile {
    /// Path of the pcap file to inspect
    pub path: PathBuf,
}
