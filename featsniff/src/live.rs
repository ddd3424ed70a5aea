use std::{
    borrow::Cow,
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use featsniff_common::{LinkType, Timestamp};
use log::{debug, info, trace};
use pnet::datalink::{self, Channel, DataLinkReceiver, NetworkInterface};
use prometheus::IntCounter;
use tokio::sync::{mpsc, oneshot};

use crate::{
    error::{CaptureError, SourceError},
    source::{self, RawPacket},
};

/// Knobs for a live capture run.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub promiscuous: bool,

    /// Upper bound on a single device read, so a stop request is noticed
    /// even on an idle interface.
    pub read_timeout: Duration,

    /// Packets buffered between the capture thread and the pipeline. When
    /// full, new packets are dropped and counted.
    pub channel_capacity: usize,

    pub duration: Option<Duration>,

    /// Stop after this many packets have been handed to the pipeline.
    pub packet_limit: Option<u64>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            promiscuous: true,
            read_timeout: Duration::from_millis(100),
            channel_capacity: 4096,
            duration: None,
            packet_limit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub description: Option<String>,
    pub up: bool,
}

impl From<NetworkInterface> for DeviceInfo {
    fn from(value: NetworkInterface) -> Self {
        let up = value.is_up();
        let description = if value.description.is_empty() {
            None
        } else {
            Some(value.description)
        };

        Self {
            name: value.name,
            description,
            up,
        }
    }
}

/// Blocking reader of raw frames from an opened device.
pub trait FrameReader: Send {
    fn link_type(&self) -> LinkType;

    /// Reads the next frame; `Ok(None)` means the read timed out empty.
    fn read_frame(&mut self) -> io::Result<Option<&[u8]>>;
}

/// Capability to enumerate and open capture devices.
pub trait DeviceProvider {
    fn devices(&self) -> Vec<DeviceInfo>;

    fn open(&self, name: &str, opts: &CaptureOptions) -> Result<Box<dyn FrameReader>, SourceError>;
}

/// Devices reachable through `pnet`'s datalink layer (AF_PACKET on Linux).
#[derive(Debug, Default, Clone, Copy)]
pub struct PnetDevices;

impl DeviceProvider for PnetDevices {
    fn devices(&self) -> Vec<DeviceInfo> {
        datalink::interfaces()
            .into_iter()
            .map(DeviceInfo::from)
            .collect()
    }

    fn open(&self, name: &str, opts: &CaptureOptions) -> Result<Box<dyn FrameReader>, SourceError> {
        let iface = datalink::interfaces()
            .into_iter()
            .find(|iface| iface.name == name)
            .ok_or_else(|| SourceError::DeviceNotFound(name.to_owned()))?;

        let mut config = datalink::Config::default();
        config.read_timeout = Some(opts.read_timeout);
        config.promiscuous = opts.promiscuous;

        match datalink::channel(&iface, config) {
            Ok(Channel::Ethernet(_, rx)) => {
                let link = link_type_of(&iface);
                info!(
                    "opened interface '{}' (link={}, promiscuous={})",
                    name, link, opts.promiscuous
                );
                Ok(Box::new(PnetReader { rx, link }))
            }
            Ok(_) => Err(SourceError::DeviceOpen {
                device: name.to_owned(),
                source: io::Error::new(io::ErrorKind::Unsupported, "unsupported channel type"),
            }),
            Err(source) => Err(SourceError::DeviceOpen {
                device: name.to_owned(),
                source,
            }),
        }
    }
}

/// Framing of frames read from `iface`. Interfaces without a hardware
/// address (tun, ppp, wireguard) hand out bare IP packets.
fn link_type_of(iface: &NetworkInterface) -> LinkType {
    if iface.mac.is_none() || iface.is_point_to_point() {
        LinkType::RawIp
    } else {
        LinkType::Ethernet
    }
}

struct PnetReader {
    rx: Box<dyn DataLinkReceiver>,
    link: LinkType,
}

impl FrameReader for PnetReader {
    fn link_type(&self) -> LinkType {
        self.link
    }

    fn read_frame(&mut self) -> io::Result<Option<&[u8]>> {
        match self.rx.next() {
            Ok(frame) => Ok(Some(frame)),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// A frame handed over by the capture thread, stamped on receipt.
#[derive(Debug)]
pub struct LivePacket {
    pub data: Vec<u8>,
    pub ts: Timestamp,
}

impl LivePacket {
    pub fn as_raw(&self) -> RawPacket<'_> {
        RawPacket {
            data: Cow::Borrowed(&self.data),
            ts: self.ts,
        }
    }
}

/// Handle of a running capture thread.
///
/// The thread reads frames until [`LiveCapture::stop`] is called, the
/// receiving side of the channel goes away, or the device fails.
pub struct LiveCapture {
    device: String,
    stop: Arc<AtomicBool>,
    state: CaptureState,
}

enum CaptureState {
    Running(oneshot::Receiver<Result<u64, CaptureError>>),
    Stopped(u64),
    Failed,
}

impl LiveCapture {
    pub fn start(
        device: &str,
        mut reader: Box<dyn FrameReader>,
        tx: mpsc::Sender<LivePacket>,
        dropped: IntCounter,
    ) -> Result<Self, CaptureError> {
        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = oneshot::channel();

        let flag = stop.clone();
        let name = device.to_owned();
        thread::Builder::new()
            .name(format!("capture-{device}"))
            .spawn(move || {
                let result = capture_loop(&name, reader.as_mut(), &tx, &flag, &dropped);
                // release the device and the channel before reporting back
                drop(tx);
                drop(reader);
                let _ = done_tx.send(result);
            })
            .map_err(|source| CaptureError::Start {
                device: device.to_owned(),
                source,
            })?;

        info!("capture started on '{}'", device);
        Ok(Self {
            device: device.to_owned(),
            stop,
            state: CaptureState::Running(done_rx),
        })
    }

    /// Stops the capture thread and waits for it to let go of the device.
    ///
    /// Once this returns no more packets enter the channel. Calling it again
    /// returns the same packet count, or [`CaptureError::Failed`] when the
    /// first call reported a capture error.
    pub async fn stop(&mut self) -> Result<u64, CaptureError> {
        self.stop.store(true, Ordering::Release);

        let done = match std::mem::replace(&mut self.state, CaptureState::Failed) {
            CaptureState::Running(done) => done,
            CaptureState::Stopped(captured) => {
                self.state = CaptureState::Stopped(captured);
                return Ok(captured);
            }
            CaptureState::Failed => return Err(CaptureError::Failed(self.device.clone())),
        };

        let captured = match done.await {
            Ok(result) => result?,
            Err(_) => return Err(CaptureError::Panicked(self.device.clone())),
        };

        info!("capture stopped on '{}' after {} packets", self.device, captured);
        self.state = CaptureState::Stopped(captured);
        Ok(captured)
    }
}

impl Drop for LiveCapture {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

fn capture_loop(
    device: &str,
    reader: &mut dyn FrameReader,
    tx: &mpsc::Sender<LivePacket>,
    stop: &AtomicBool,
    dropped: &IntCounter,
) -> Result<u64, CaptureError> {
    let mut captured = 0u64;

    while !stop.load(Ordering::Acquire) {
        let frame = match reader.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(source) => {
                return Err(CaptureError::Read {
                    device: device.to_owned(),
                    source,
                })
            }
        };

        let ts = source::wall_clock();
        captured += 1;
        match tx.try_send(LivePacket {
            data: frame.to_vec(),
            ts,
        }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                dropped.inc();
                trace!("pipeline is behind, dropped a packet on '{}'", device);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("pipeline went away, ending capture on '{}'", device);
                break;
            }
        }
    }

    Ok(captured)
}
