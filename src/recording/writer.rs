//! CSV recording of decoded packets.
//!
//! One line per packet:
//!
//! ```text
//! counter, gyro_x, gyro_y, F3, FC5, ..., F4, cq
//! ```
//!
//! `cq` is `-1` for packets without a contact-quality reading. The layout
//! matches existing recordings and must not change.

use crate::device::subscribers::{PacketSubscriber, SubscriberError};
use crate::device::types::DataPacket;
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Field separator used by recordings.
pub const SEPARATOR: &str = ", ";

/// Errors raised by [`CsvRecorder`].
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("recording is not open")]
    NotOpen,
    #[error("cannot open recording '{path}': {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Format one packet as a recording line, without the trailing newline.
pub fn format_packet_line(packet: &DataPacket) -> String {
    let mut line = String::with_capacity(128);
    let _ = write!(line, "{}{SEPARATOR}{}{SEPARATOR}{}", packet.counter, packet.gyro_x, packet.gyro_y);
    for level in &packet.channels {
        let _ = write!(line, "{SEPARATOR}{level:?}");
    }
    match packet.cq_value() {
        Some(cq) => {
            let _ = write!(line, "{SEPARATOR}{cq:?}");
        }
        None => line.push_str(", -1"),
    }
    line
}

struct OpenRecording {
    path: PathBuf,
    writer: BufWriter<File>,
    lines: u64,
}

/// Writes packets to a CSV file. Usable directly as a packet subscriber.
#[derive(Default)]
pub struct CsvRecorder {
    inner: Mutex<Option<OpenRecording>>,
}

impl CsvRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or truncate) `path` and start recording into it.
    ///
    /// A recording that is already open is flushed and closed first.
    pub fn open(&self, path: &Path) -> Result<(), RecorderError> {
        let file = File::create(path).map_err(|source| RecorderError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let previous = self.inner.lock().replace(OpenRecording {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            lines: 0,
        });
        if let Some(mut previous) = previous {
            previous.writer.flush()?;
        }
        tracing::info!("Recording to {}", path.display());
        Ok(())
    }

    /// Flush and close the recording, returning the number of lines written.
    pub fn close(&self) -> Result<u64, RecorderError> {
        let mut recording = self.inner.lock().take().ok_or(RecorderError::NotOpen)?;
        recording.writer.flush()?;
        tracing::info!(
            "Closed recording {} ({} packets)",
            recording.path.display(),
            recording.lines
        );
        Ok(recording.lines)
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Path of the open recording.
    pub fn path(&self) -> Option<PathBuf> {
        self.inner.lock().as_ref().map(|r| r.path.clone())
    }

    /// Append one packet.
    pub fn write_packet(&self, packet: &DataPacket) -> Result<(), RecorderError> {
        let mut guard = self.inner.lock();
        let recording = guard.as_mut().ok_or(RecorderError::NotOpen)?;
        writeln!(recording.writer, "{}", format_packet_line(packet))?;
        recording.lines += 1;
        Ok(())
    }
}

impl PacketSubscriber for CsvRecorder {
    fn on_packet(&self, packet: &DataPacket) -> Result<(), SubscriberError> {
        match self.write_packet(packet) {
            Ok(()) => Ok(()),
            Err(RecorderError::Io(e)) => Err(SubscriberError::Io(e)),
            Err(e) => Err(SubscriberError::Failed(e.to_string())),
        }
    }

    fn name(&self) -> &str {
        "csv-recorder"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::decoder::{decode_frame, encode_frame};
    use crate::device::types::CHANNEL_COUNT;

    fn packet(counter: u8, cq: u16) -> DataPacket {
        let levels: [u16; CHANNEL_COUNT] = std::array::from_fn(|i| 4096 + i as u16);
        decode_frame(&encode_frame(counter, (105, 99), &levels, cq)).unwrap()
    }

    #[test]
    fn test_line_format_with_cq() {
        let line = format_packet_line(&packet(3, 712));
        assert_eq!(
            line,
            "3, 105, 99, 4096.0, 4097.0, 4098.0, 4099.0, 4100.0, 4101.0, 4102.0, \
             4103.0, 4104.0, 4105.0, 4106.0, 4107.0, 4108.0, 4109.0, 712.0"
        );
    }

    #[test]
    fn test_line_format_without_cq() {
        let line = format_packet_line(&packet(42, 0));
        assert!(line.starts_with("42, 105, 99, 4096.0"));
        assert!(line.ends_with("4109.0, -1"));
        assert_eq!(line.split(SEPARATOR).count(), 3 + CHANNEL_COUNT + 1);
    }

    #[test]
    fn test_record_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.csv");

        let recorder = CsvRecorder::new();
        assert!(matches!(
            recorder.write_packet(&packet(0, 0)),
            Err(RecorderError::NotOpen)
        ));

        recorder.open(&path).unwrap();
        assert!(recorder.is_open());
        recorder.on_packet(&packet(0, 300)).unwrap();
        recorder.on_packet(&packet(20, 0)).unwrap();
        assert_eq!(recorder.close().unwrap(), 2);
        assert!(!recorder.is_open());
        assert!(matches!(recorder.close(), Err(RecorderError::NotOpen)));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("300.0"));
        assert!(lines[1].ends_with("-1"));
    }

    #[test]
    fn test_open_failure_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("session.csv");
        let err = CsvRecorder::new().open(&path).unwrap_err();
        assert!(err.to_string().contains("session.csv"));
    }
}
