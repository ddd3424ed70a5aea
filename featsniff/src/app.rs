use std::{
    future::{self, Future},
    io::{self, BufWriter, Write},
    path::Path,
};

use anyhow::{bail, Context, Result};
use chrono::DateTime;
use colored::Colorize;
use featsniff_common::decode_link;
use log::{error, info, warn};

use crate::{
    cmd::{Cmd, StreamDevice, StreamFile, SubCmd},
    config::Settings,
    live::{CaptureOptions, DeviceProvider, PnetDevices},
    metrics::{self, Metrics},
    pipeline::{self, Pipeline, RunSummary},
    sink::CsvSink,
    source::FileSource,
    sys,
};

pub async fn run(cmd: Cmd) -> Result<()> {
    let settings = match &cmd.config {
        Some(path) => Settings::load_config_path(path)?,
        None => Settings::default(),
    };

    let metrics = Metrics::new().context("failed to register metrics")?;
    let server = settings.metrics.listen.map(|addr| {
        let metrics = metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(addr, metrics).await {
                error!("metrics server on {} failed: {:#}", addr, e);
            }
        })
    });

    let result = match cmd.sub_cmd {
        SubCmd::StreamFile(args) => {
            // pcap reads block, keep them off the runtime's workers
            tokio::task::spawn_blocking(move || {
                let out = BufWriter::new(io::stdout().lock());
                let mut pipeline = Pipeline::new(CsvSink::new(out), metrics);
                stream_file(&args, &settings, &mut pipeline).map(|_| ())
            })
            .await
            .context("file replay task failed")
            .and_then(|replayed| replayed)
        }
        SubCmd::StreamDevice(args) => {
            // stdout is line buffered, records show up as they are captured
            let mut pipeline = Pipeline::new(CsvSink::new(io::stdout()), metrics);
            stream_device(&PnetDevices, &args, &settings, &mut pipeline, ctrl_c())
                .await
                .map(|_| ())
        }
        SubCmd::TestDevices => test_devices(&PnetDevices, &mut io::stdout().lock()),
        SubCmd::TestFile(args) => test_file(&args.path, &mut io::stdout().lock()),
    };

    if let Some(server) = server {
        server.abort();
    }
    result
}

/// Replays a capture file to the pipeline's sink.
pub fn stream_file<W: Write>(
    args: &StreamFile,
    settings: &Settings,
    pipeline: &mut Pipeline<W>,
) -> Result<RunSummary> {
    if args.header || settings.output.header {
        pipeline.write_header()?;
    }

    let summary = pipeline::replay_file(&args.path, pipeline)?;
    Ok(summary)
}

/// Captures from a device until a stop condition is met or `shutdown` resolves.
pub async fn stream_device<W, F>(
    provider: &dyn DeviceProvider,
    args: &StreamDevice,
    settings: &Settings,
    pipeline: &mut Pipeline<W>,
    shutdown: F,
) -> Result<RunSummary>
where
    W: Write,
    F: Future<Output = ()>,
{
    let opts = capture_options(args, settings)?;
    match sys::uname() {
        Ok(kernel) => info!("start live capture on '{}', kernel: {}", args.name, kernel),
        Err(e) => warn!("failed to read kernel info: {}", e),
    }

    if args.header || settings.output.header {
        pipeline.write_header()?;
    }

    let summary = pipeline::stream_device(provider, &args.name, &opts, pipeline, shutdown).await?;
    Ok(summary)
}

/// Configured capture options with command line flags applied on top.
pub fn capture_options(args: &StreamDevice, settings: &Settings) -> Result<CaptureOptions> {
    let mut opts = settings.capture.options()?;
    if args.duration.is_some() {
        opts.duration = args.duration;
    }
    if args.count.is_some() {
        opts.packet_limit = args.count;
    }
    if args.no_promisc {
        opts.promiscuous = false;
    }

    Ok(opts)
}

pub fn test_devices<W: Write>(provider: &dyn DeviceProvider, out: &mut W) -> Result<()> {
    writeln!(out, "Available devices:")?;
    for device in provider.devices() {
        let state = if device.up { "" } else { " [down]" };
        match device.description {
            Some(desc) => writeln!(out, " - {} ({}){}", device.name.bold(), desc.dimmed(), state)?,
            None => writeln!(out, " - {}{}", device.name.bold(), state)?,
        }
    }

    Ok(())
}

pub fn test_file<W: Write>(path: &Path, out: &mut W) -> Result<()> {
    let mut source = FileSource::open(path)?;
    let link = source.link_type();
    let Some(raw) = source.next_packet()? else {
        bail!("'{}' contains no packets", path.display());
    };

    if let Some(at) = i64::try_from(raw.ts.secs())
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, raw.ts.subsec_nanos()))
    {
        info!("first packet of '{}' ({}) captured at {}", path.display(), link, at.to_rfc3339());
    }

    match decode_link(link, &raw.data) {
        Some(layers) => writeln!(
            out,
            "Source IP is '{}'; Dest IP is '{}'",
            layers.ipv4().src(),
            layers.ipv4().dst()
        )?,
        None => writeln!(out, "Not an IPv4 packet")?,
    }

    Ok(())
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c, relying on duration and count: {}", e);
        future::pending::<()>().await;
    }
}
