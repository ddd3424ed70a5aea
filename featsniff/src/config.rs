use std::{fs::File, io, net::SocketAddr, path::Path, time::Duration};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::live::CaptureOptions;

#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub capture: CaptureSection,

    #[serde(default)]
    pub output: OutputSection,

    #[serde(default)]
    pub metrics: MetricsSection,
}

impl Settings {
    pub fn load_config_path<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let file = File::options()
            .read(true)
            .open(path)
            .with_context(|| format!("failed to open config '{}'", path.display()))?;

        Self::load_config(file)
    }

    pub fn load_config<R>(reader: R) -> Result<Self>
    where
        R: io::Read,
    {
        let settings: Self = serde_yaml::from_reader(reader)?;
        settings.check()?;

        Ok(settings)
    }

    pub fn check(&self) -> Result<()> {
        self.capture.options().map(|_| ())
    }
}

#[derive(Debug, Deserialize)]
pub struct CaptureSection {
    #[serde(default = "default_promiscuous")]
    pub promiscuous: bool,

    #[serde(
        rename(deserialize = "readTimeout"),
        default = "default_read_timeout"
    )]
    pub read_timeout: String,

    #[serde(
        rename(deserialize = "channelCapacity"),
        default = "default_channel_capacity"
    )]
    pub channel_capacity: usize,

    pub duration: Option<String>,

    #[serde(rename(deserialize = "packetLimit"))]
    pub packet_limit: Option<u64>,
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            promiscuous: default_promiscuous(),
            read_timeout: default_read_timeout(),
            channel_capacity: default_channel_capacity(),
            duration: None,
            packet_limit: None,
        }
    }
}

impl CaptureSection {
    /// Validates the section and converts it into capture options.
    pub fn options(&self) -> Result<CaptureOptions> {
        if self.channel_capacity == 0 {
            return Err(anyhow!("channelCapacity must be greater than zero"));
        }
        if self.packet_limit == Some(0) {
            return Err(anyhow!("packetLimit must be greater than zero when set"));
        }

        let read_timeout = parse_duration("readTimeout", &self.read_timeout)?;
        let duration = match self.duration.as_deref() {
            Some(value) => Some(parse_duration("duration", value)?),
            None => None,
        };

        Ok(CaptureOptions {
            promiscuous: self.promiscuous,
            read_timeout,
            channel_capacity: self.channel_capacity,
            duration,
            packet_limit: self.packet_limit,
        })
    }
}

fn parse_duration(field: &str, value: &str) -> Result<Duration> {
    let duration = humantime::parse_duration(value)
        .map_err(|e| anyhow!("failed to parse {}='{}' by {}", field, value, e))?;
    if duration.is_zero() {
        return Err(anyhow!("{} must be greater than zero", field));
    }

    Ok(duration)
}

fn default_promiscuous() -> bool {
    true
}

// Short enough that a stop request is honoured promptly on idle links.
fn default_read_timeout() -> String {
    String::from("100ms")
}

fn default_channel_capacity() -> usize {
    4096
}

#[derive(Debug, Default, Deserialize)]
pub struct OutputSection {
    #[serde(default)]
    pub header: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct MetricsSection {
    pub listen: Option<SocketAddr>,
}
