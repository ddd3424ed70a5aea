use std::{
    future::{self, Future},
    io::{Read, Write},
    path::Path,
};

use featsniff_common::{decode_link, extract, LinkType};
use log::{debug, info};
use tokio::sync::mpsc;

use crate::{
    error::{Result, SinkError},
    live::{CaptureOptions, DeviceProvider, LiveCapture, LivePacket},
    metrics::Metrics,
    sink::CsvSink,
    source::{FileSource, RawPacket},
};

/// Per-run packet counts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub packets: u64,
    pub records: u64,
    pub skipped: u64,
}

impl RunSummary {
    fn count(&mut self, emitted: bool) {
        self.packets += 1;
        if emitted {
            self.records += 1;
        } else {
            self.skipped += 1;
        }
    }
}

/// decode -> extract -> emit, one packet at a time.
///
/// Holds no per-packet state; the sink is its only side effect.
pub struct Pipeline<W: Write> {
    sink: CsvSink<W>,
    metrics: Metrics,
}

impl<W: Write> Pipeline<W> {
    pub fn new(sink: CsvSink<W>, metrics: Metrics) -> Self {
        Self { sink, metrics }
    }

    pub fn write_header(&mut self) -> Result<(), SinkError> {
        self.sink.write_header()
    }

    /// Runs one packet through the pipeline. Returns whether a record was
    /// written; packets without a TCP/IPv4 layer are skipped silently.
    pub fn process(&mut self, link: LinkType, raw: &RawPacket<'_>) -> Result<bool, SinkError> {
        self.metrics.packets.inc();

        let record = decode_link(link, &raw.data).and_then(|layers| extract(&layers, raw.ts));
        match record {
            Some(record) => {
                self.sink.emit(&record)?;
                self.metrics.records.inc();
                Ok(true)
            }
            None => {
                self.metrics.skipped.inc();
                Ok(false)
            }
        }
    }

    pub fn finish(&mut self) -> Result<(), SinkError> {
        self.sink.flush()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn into_sink(self) -> CsvSink<W> {
        self.sink
    }
}

/// Opens `path` and replays it through `pipeline`.
pub fn replay_file<P, W>(path: P, pipeline: &mut Pipeline<W>) -> Result<RunSummary>
where
    P: AsRef<Path>,
    W: Write,
{
    let mut source = FileSource::open(path)?;
    replay(&mut source, pipeline)
}

/// Pulls every packet of `source` through `pipeline` in file order.
///
/// Records already written are flushed even when the replay stops on a read
/// error.
pub fn replay<R, W>(source: &mut FileSource<R>, pipeline: &mut Pipeline<W>) -> Result<RunSummary>
where
    R: Read,
    W: Write,
{
    let mut summary = RunSummary::default();
    let pulled = pull_all(source, pipeline, &mut summary);
    let flushed = pipeline.finish();
    pulled?;
    flushed?;

    info!(
        "replayed '{}': {} packets, {} records, {} skipped",
        source.path(),
        summary.packets,
        summary.records,
        summary.skipped
    );
    Ok(summary)
}

fn pull_all<R, W>(
    source: &mut FileSource<R>,
    pipeline: &mut Pipeline<W>,
    summary: &mut RunSummary,
) -> Result<()>
where
    R: Read,
    W: Write,
{
    let link = source.link_type();
    while let Some(raw) = source.next_packet()? {
        summary.count(pipeline.process(link, &raw)?);
    }

    Ok(())
}

/// Captures from `device` until the configured duration or packet limit is
/// reached, `shutdown` resolves, or the capture thread ends.
///
/// The capture is stopped on every path before this returns. Packets queued
/// before the stop are still processed, in arrival order.
pub async fn stream_device<W, F>(
    provider: &dyn DeviceProvider,
    device: &str,
    opts: &CaptureOptions,
    pipeline: &mut Pipeline<W>,
    shutdown: F,
) -> Result<RunSummary>
where
    W: Write,
    F: Future<Output = ()>,
{
    let reader = provider.open(device, opts)?;
    let link = reader.link_type();
    let (tx, mut rx) = mpsc::channel(opts.channel_capacity.max(1));
    let mut capture = LiveCapture::start(device, reader, tx, pipeline.metrics().dropped.clone())?;

    let limit = opts.packet_limit.unwrap_or(u64::MAX);
    let duration = opts.duration;
    let deadline = async move {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => future::pending().await,
        }
    };
    tokio::pin!(deadline);
    tokio::pin!(shutdown);

    let mut summary = RunSummary::default();
    let consumed: Result<(), SinkError> = loop {
        if summary.packets >= limit {
            info!("packet limit of {} reached", limit);
            break Ok(());
        }

        // stop conditions first, a busy link must not starve them
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("stop requested");
                break Ok(());
            }
            _ = &mut deadline => {
                info!("capture duration elapsed");
                break Ok(());
            }
            pkt = rx.recv() => match pkt {
                Some(pkt) => match pipeline.process(link, &pkt.as_raw()) {
                    Ok(emitted) => summary.count(emitted),
                    Err(e) => break Err(e),
                },
                None => {
                    debug!("capture channel closed");
                    break Ok(());
                }
            },
        }
    };

    let stopped = capture.stop().await;
    let drained = consumed.and_then(|()| drain(&mut rx, link, limit, pipeline, &mut summary));
    let flushed = pipeline.finish();
    drained?;
    flushed?;
    stopped?;

    info!(
        "capture on '{}' done: {} packets, {} records, {} skipped, {} dropped",
        device,
        summary.packets,
        summary.records,
        summary.skipped,
        pipeline.metrics().dropped.get()
    );
    Ok(summary)
}

fn drain<W: Write>(
    rx: &mut mpsc::Receiver<LivePacket>,
    link: LinkType,
    limit: u64,
    pipeline: &mut Pipeline<W>,
    summary: &mut RunSummary,
) -> Result<(), SinkError> {
    rx.close();
    while summary.packets < limit {
        let Ok(pkt) = rx.try_recv() else {
            break;
        };
        summary.count(pipeline.process(link, &pkt.as_raw())?);
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use std::{
        future, io,
        sync::atomic::Ordering,
        time::Duration,
    };

    use featsniff_common::{testing::FrameBuilder, TcpFlags};
    use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
    use tokio::sync::oneshot;

    use super::{replay, replay_file, stream_device, Pipeline, RunSummary};
    use crate::{
        error::{CaptureError, Error, SinkError, SourceError},
        live::{test::ScriptedDevices, CaptureOptions},
        metrics::Metrics,
        sink::CsvSink,
        source::FileSource,
    };

    fn pipeline<W: io::Write>(out: W) -> Pipeline<W> {
        Pipeline::new(CsvSink::new(out), Metrics::new().unwrap())
    }

    fn capture(frames: &[Vec<u8>]) -> Vec<u8> {
        let mut writer = PcapWriter::with_header(Vec::new(), PcapHeader::default()).unwrap();
        for (i, frame) in frames.iter().enumerate() {
            let ts = Duration::new(1_700_000_000, 250_000_000 + i as u32 * 1_000);
            writer
                .write_packet(&PcapPacket::new(ts, frame.len() as u32, frame))
                .unwrap();
        }
        writer.into_writer()
    }

    fn syn_frame() -> Vec<u8> {
        FrameBuilder::new()
            .src([10, 0, 0, 1], 5555)
            .dst([10, 0, 0, 2], 80)
            .flags(TcpFlags::SYN)
            .payload_len(20)
            .ethernet()
    }

    fn replay_bytes(bytes: &[u8]) -> (RunSummary, String) {
        let mut source = FileSource::from_reader("mem", bytes).unwrap();
        let mut pipeline = pipeline(Vec::new());
        let summary = replay(&mut source, &mut pipeline).unwrap();
        let out = String::from_utf8(pipeline.into_sink().into_inner()).unwrap();
        (summary, out)
    }

    struct ClosedPipe;

    impl io::Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_replay_single_syn() {
        let (summary, out) = replay_bytes(&capture(&[syn_frame()]));
        assert_eq!(
            out,
            "10.0.0.1,10.0.0.2,5555,80,tcp,1700000000250000,20,40,0,0,0,0,0,0,1,0,20\n"
        );
        assert_eq!(
            summary,
            RunSummary {
                packets: 1,
                records: 1,
                skipped: 0
            }
        );
    }

    #[test]
    fn test_replay_skips_non_tcp() {
        let frames = vec![
            FrameBuilder::new().src([10, 0, 0, 1], 1).ethernet(),
            FrameBuilder::new().protocol(17).ethernet(),
            FrameBuilder::new().ether_type(0x86dd).ethernet(),
            vec![0xff; 10],
            FrameBuilder::new().src([10, 0, 0, 1], 2).ethernet(),
        ];
        let (summary, out) = replay_bytes(&capture(&frames));

        let ports: Vec<&str> = out.lines().map(|l| l.split(',').nth(2).unwrap()).collect();
        assert_eq!(ports, vec!["1", "2"]);
        assert_eq!(summary.packets, 5);
        assert_eq!(summary.records, 2);
        assert_eq!(summary.skipped, 3);
    }

    #[test]
    fn test_replay_empty_capture() {
        let (summary, out) = replay_bytes(&capture(&[]));
        assert!(out.is_empty());
        assert_eq!(summary, RunSummary::default());
    }

    #[test]
    fn test_replay_is_repeatable() {
        let frames: Vec<Vec<u8>> = (0..50u16)
            .map(|i| {
                FrameBuilder::new()
                    .src([172, 16, 0, (i % 7) as u8], 1024 + i)
                    .flags((i % 256) as u8)
                    .payload_len(usize::from(i))
                    .ethernet()
            })
            .collect();
        let bytes = capture(&frames);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        io::Write::write_all(&mut file, &bytes).unwrap();

        let mut outputs = Vec::new();
        for _ in 0..2 {
            let mut pipeline = pipeline(Vec::new());
            let summary = replay_file(file.path(), &mut pipeline).unwrap();
            assert_eq!(summary.records, 50);
            outputs.push(pipeline.into_sink().into_inner());
        }
        assert_eq!(outputs[0], outputs[1]);
    }

    #[test]
    fn test_replay_missing_file() {
        let mut pipeline = pipeline(Vec::new());
        let result = replay_file("/nonexistent/featsniff/capture.pcap", &mut pipeline);
        assert!(matches!(result, Err(Error::Source(SourceError::FileOpen { .. }))));
    }

    #[test]
    fn test_sink_failure_aborts_replay() {
        let bytes = capture(&[syn_frame(), syn_frame()]);
        let mut source = FileSource::from_reader("mem", bytes.as_slice()).unwrap();
        let mut pipeline = pipeline(ClosedPipe);

        let result = replay(&mut source, &mut pipeline);
        assert!(matches!(result, Err(Error::Sink(SinkError::Write(_)))));
        assert_eq!(pipeline.metrics().packets.get(), 1);
    }

    fn devices(frames: Vec<Vec<u8>>, fail_when_done: bool) -> ScriptedDevices {
        ScriptedDevices {
            name: "eth-test",
            frames,
            fail_when_done,
            ..Default::default()
        }
    }

    fn live_frames() -> Vec<Vec<u8>> {
        vec![
            FrameBuilder::new().src([10, 9, 0, 1], 1).ethernet(),
            FrameBuilder::new().protocol(17).ethernet(),
            FrameBuilder::new().src([10, 9, 0, 1], 2).ethernet(),
        ]
    }

    #[tokio::test]
    async fn test_stream_device_until_duration() {
        let opts = CaptureOptions {
            duration: Some(Duration::from_millis(300)),
            ..Default::default()
        };
        let mut pipeline = pipeline(Vec::new());

        let summary = stream_device(
            &devices(live_frames(), false),
            "eth-test",
            &opts,
            &mut pipeline,
            future::pending(),
        )
        .await
        .unwrap();

        assert_eq!(summary.packets, 3);
        assert_eq!(summary.records, 2);
        let out = String::from_utf8(pipeline.into_sink().into_inner()).unwrap();
        let ports: Vec<&str> = out.lines().map(|l| l.split(',').nth(2).unwrap()).collect();
        assert_eq!(ports, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_stream_device_packet_limit() {
        let opts = CaptureOptions {
            packet_limit: Some(2),
            ..Default::default()
        };
        let mut pipeline = pipeline(Vec::new());

        let summary = stream_device(
            &devices(live_frames(), false),
            "eth-test",
            &opts,
            &mut pipeline,
            future::pending(),
        )
        .await
        .unwrap();

        assert_eq!(summary.packets, 2);
        assert_eq!(summary.records, 1);
        let out = String::from_utf8(pipeline.into_sink().into_inner()).unwrap();
        assert_eq!(out.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_stream_device_shutdown() {
        // no duration, no limit and the device idles forever after its frames:
        // only the shutdown future can end this run
        let devices = devices(live_frames(), false);
        let mut pipeline = pipeline(Vec::new());
        let records = pipeline.metrics().records.clone();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            while records.get() == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            let _ = stop_tx.send(());
        });
        let shutdown = async {
            let _ = stop_rx.await;
        };

        let summary = tokio::time::timeout(
            Duration::from_secs(5),
            stream_device(
                &devices,
                "eth-test",
                &CaptureOptions::default(),
                &mut pipeline,
                shutdown,
            ),
        )
        .await
        .expect("run ends once shutdown resolves")
        .unwrap();

        // the capture thread finished and let go of the device
        assert!(devices.released.load(Ordering::SeqCst));
        assert!(summary.records >= 1);
        assert_eq!(summary.packets, pipeline.metrics().packets.get());

        // every packet counted was written once, in capture order
        let out = String::from_utf8(pipeline.into_sink().into_inner()).unwrap();
        let ports: Vec<&str> = out.lines().map(|l| l.split(',').nth(2).unwrap()).collect();
        assert_eq!(ports.len() as u64, summary.records);
        assert_eq!(ports, ["1", "2"][..ports.len()]);
    }

    #[tokio::test]
    async fn test_shutdown_wins_over_queued_packets() {
        let devices = devices(live_frames(), false);
        let mut pipeline = pipeline(Vec::new());

        // an already resolved shutdown is taken before any packet is processed
        let summary = stream_device(
            &devices,
            "eth-test",
            &CaptureOptions {
                packet_limit: Some(1),
                ..Default::default()
            },
            &mut pipeline,
            async {},
        )
        .await
        .unwrap();

        assert!(devices.released.load(Ordering::SeqCst));
        // queued packets are drained, still within the limit
        assert!(summary.packets <= 1);
        let out = String::from_utf8(pipeline.into_sink().into_inner()).unwrap();
        assert_eq!(out.lines().count() as u64, summary.records);
    }

    #[tokio::test]
    async fn test_stream_device_capture_failure() {
        let mut pipeline = pipeline(Vec::new());

        let result = stream_device(
            &devices(live_frames(), true),
            "eth-test",
            &CaptureOptions::default(),
            &mut pipeline,
            future::pending(),
        )
        .await;

        assert!(matches!(result, Err(Error::Capture(CaptureError::Read { .. }))));
        // everything captured before the failure was still emitted
        assert_eq!(pipeline.metrics().records.get(), 2);
    }

    #[tokio::test]
    async fn test_stream_device_unknown() {
        let mut pipeline = pipeline(Vec::new());

        let result = stream_device(
            &devices(vec![], false),
            "nope0",
            &CaptureOptions::default(),
            &mut pipeline,
            future::pending(),
        )
        .await;

        assert!(matches!(
            result,
            Err(Error::Source(SourceError::DeviceNotFound(_)))
        ));
    }
}
