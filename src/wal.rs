//! Append-only log of room administration changes.
//!
//! A log file opens with an 8-byte header: `b"RSRL"` and the format version
//! as a little-endian u32. Records follow, each framed as
//! `[u32 len][bincode RoomEvent][u32 crc32]`. The header is also the seed
//! marker: a log that has one was initialized, even when it holds no rooms.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::limits::MAX_ROOM_RECORD_BYTES;
use crate::model::{Room, RoomEvent};

const MAGIC: [u8; 4] = *b"RSRL";
const FORMAT_VERSION: u32 = 1;
pub const HEADER_LEN: u64 = 8;
/// Length prefix plus checksum around each payload.
const FRAME_OVERHEAD: u64 = 8;

/// Why replay stopped before the end of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    /// Length prefix above [`MAX_ROOM_RECORD_BYTES`].
    Oversized { len: u32 },
    Checksum,
    Undecodable,
}

/// How the readable part of a room log ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogTail {
    #[default]
    Clean,
    /// The last record stops short, as after a crash mid-append.
    Truncated,
    Corrupt(Corruption),
}

impl LogTail {
    /// Metric label for a damaged tail, `None` when clean.
    pub fn damage(&self) -> Option<&'static str> {
        match self {
            LogTail::Clean => None,
            LogTail::Truncated => Some("truncated"),
            LogTail::Corrupt(Corruption::Oversized { .. }) => Some("oversized"),
            LogTail::Corrupt(Corruption::Checksum) => Some("checksum"),
            LogTail::Corrupt(Corruption::Undecodable) => Some("undecodable"),
        }
    }
}

/// What a room log holds on disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<RoomEvent>,
    /// Offset just past the last good record; 0 when there is no header.
    pub valid_len: u64,
    pub tail: LogTail,
}

impl Replay {
    /// Whether the log was ever seeded. Its records are then authoritative,
    /// including an empty room list.
    pub fn initialized(&self) -> bool {
        self.valid_len >= HEADER_LEN
    }
}

fn header() -> [u8; HEADER_LEN as usize] {
    let mut out = [0u8; HEADER_LEN as usize];
    out[..4].copy_from_slice(&MAGIC);
    out[4..].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    out
}

/// One framed record, refused if the payload exceeds the replay cap.
fn frame(event: &RoomEvent) -> io::Result<Vec<u8>> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_ROOM_RECORD_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("room record of {} bytes exceeds {MAX_ROOM_RECORD_BYTES}", payload.len()),
        ));
    }
    let mut out = Vec::with_capacity(payload.len() + FRAME_OVERHEAD as usize);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(out)
}

/// Read until `buf` is full or the file ends. Returns the bytes read.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut read = 0;
    while read < buf.len() {
        match reader.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(read)
}

fn append_handle(path: &Path) -> io::Result<BufWriter<File>> {
    Ok(BufWriter::new(OpenOptions::new().create(true).append(true).open(path)?))
}

pub struct RoomLog {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl RoomLog {
    /// Start a log at `path` holding exactly `rooms`, replacing any file there.
    pub fn create(path: &Path, rooms: &[Room]) -> io::Result<Self> {
        Self::write_snapshot(path, rooms)?;
        Ok(Self {
            writer: append_handle(path)?,
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Continue an initialized log after `replay`. A damaged tail is cut off
    /// so that new records are not stranded behind it.
    pub fn resume(path: &Path, replay: &Replay) -> io::Result<Self> {
        let file = OpenOptions::new().write(true).open(path)?;
        if file.metadata()?.len() > replay.valid_len {
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }
        Ok(Self {
            writer: append_handle(path)?,
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append one record and fsync before returning.
    pub fn append(&mut self, event: &RoomEvent) -> io::Result<()> {
        let record = frame(event)?;
        self.writer.write_all(&record)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the history with one `Upserted` record per live room.
    pub fn compact(&mut self, rooms: &[Room]) -> io::Result<()> {
        Self::write_snapshot(&self.path, rooms)?;
        self.writer = append_handle(&self.path)?;
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Header plus `rooms`, written to a sibling temp file and renamed over
    /// `path` so readers see either the old log or the complete new one.
    fn write_snapshot(path: &Path, rooms: &[Room]) -> io::Result<()> {
        let tmp_path = path.with_extension("log.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            writer.write_all(&header())?;
            for room in rooms {
                writer.write_all(&frame(&RoomEvent::Upserted(room.clone()))?)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, path)
    }

    /// Read the log at `path`. A missing, empty or torn-header file reads as
    /// uninitialized; a foreign header is an error. Replay stops at the first
    /// damaged record and reports why in [`Replay::tail`].
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);

        let mut head = [0u8; HEADER_LEN as usize];
        match fill(&mut reader, &mut head)? {
            0 => return Ok(Replay::default()),
            n if n < head.len() => {
                return Ok(Replay {
                    tail: LogTail::Truncated,
                    ..Replay::default()
                });
            }
            _ => {}
        }
        if head[..4] != MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not a room log", path.display()),
            ));
        }
        let version = u32::from_le_bytes([head[4], head[5], head[6], head[7]]);
        if version != FORMAT_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported room log version {version}"),
            ));
        }

        let mut replay = Replay {
            valid_len: HEADER_LEN,
            ..Replay::default()
        };
        replay.tail = loop {
            let mut len_buf = [0u8; 4];
            match fill(&mut reader, &mut len_buf)? {
                0 => break LogTail::Clean,
                4 => {}
                _ => break LogTail::Truncated,
            }
            let len = u32::from_le_bytes(len_buf);
            if len as usize > MAX_ROOM_RECORD_BYTES {
                break LogTail::Corrupt(Corruption::Oversized { len });
            }

            let mut payload = vec![0u8; len as usize];
            let mut crc_buf = [0u8; 4];
            if fill(&mut reader, &mut payload)? < payload.len() || fill(&mut reader, &mut crc_buf)? < 4 {
                break LogTail::Truncated;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                break LogTail::Corrupt(Corruption::Checksum);
            }
            match bincode::deserialize::<RoomEvent>(&payload) {
                Ok(event) => replay.events.push(event),
                Err(_) => break LogTail::Corrupt(Corruption::Undecodable),
            }
            replay.valid_len += FRAME_OVERHEAD + u64::from(len);
        };
        Ok(replay)
    }
}
