use std::{
    borrow::Cow,
    fs::File,
    io::{self, BufReader, Read},
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use featsniff_common::{LinkType, Timestamp};
use log::{debug, warn};
use pcap_file::{pcap::PcapReader, PcapError};

use crate::error::SourceError;

/// Captured link-layer bytes plus the capture time.
///
/// File sources lend the reader's buffer, which is reused by the next read;
/// live sources lend a buffer that lives for one pipeline step.
#[derive(Debug, Clone)]
pub struct RawPacket<'a> {
    pub data: Cow<'a, [u8]>,
    pub ts: Timestamp,
}

/// Current wall clock time, used to stamp live packets on receipt.
pub fn wall_clock() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .into()
}

/// Pull-driven packet source over a legacy pcap file.
///
/// The underlying file is closed when the source is dropped, on every path.
pub struct FileSource<R: Read = BufReader<File>> {
    path: String,
    reader: PcapReader<R>,
    link: LinkType,
    exhausted: bool,
}

impl FileSource {
    pub fn open<P>(path: P) -> Result<Self, SourceError>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| SourceError::FileOpen {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_reader(path.display().to_string(), BufReader::new(file))
    }
}

impl<R: Read> FileSource<R> {
    /// Reads the pcap global header from `reader`; `name` is used in errors and logs.
    pub fn from_reader<S>(name: S, reader: R) -> Result<Self, SourceError>
    where
        S: Into<String>,
    {
        let path = name.into();
        let reader = match PcapReader::new(reader) {
            Ok(reader) => reader,
            Err(source) => return Err(SourceError::InvalidCapture { path, source }),
        };

        let header = reader.header();
        let dlt = u32::from(header.datalink);
        let link = match LinkType::from_dlt(dlt) {
            Some(link) => link,
            None => return Err(SourceError::UnsupportedLinkType { path, dlt }),
        };
        debug!(
            "opened '{}': pcap v{}.{}, {} framing, {:?} timestamps",
            path, header.version_major, header.version_minor, link, header.ts_resolution
        );

        Ok(Self {
            path,
            reader,
            link,
            exhausted: false,
        })
    }

    pub fn link_type(&self) -> LinkType {
        self.link
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Next packet in file order, `Ok(None)` once the file is exhausted.
    ///
    /// A record cut short at the end of the file ends the stream with a
    /// warning instead of failing the whole replay.
    pub fn next_packet(&mut self) -> Result<Option<RawPacket<'_>>, SourceError> {
        if self.exhausted {
            return Ok(None);
        }

        match self.reader.next_packet() {
            Some(Ok(pkt)) => Ok(Some(RawPacket {
                data: pkt.data,
                ts: pkt.timestamp.into(),
            })),
            None => {
                self.exhausted = true;
                Ok(None)
            }
            Some(Err(PcapError::IncompleteBuffer)) => {
                warn!("'{}' ends with a truncated packet record", self.path);
                self.exhausted = true;
                Ok(None)
            }
            Some(Err(PcapError::IoError(e))) if e.kind() == io::ErrorKind::UnexpectedEof => {
                warn!("'{}' ends with a truncated packet record", self.path);
                self.exhausted = true;
                Ok(None)
            }
            Some(Err(source)) => {
                self.exhausted = true;
                Err(SourceError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        }
    }
}
