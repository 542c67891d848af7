//! Ciphertext frame sources.
//!
//! The acquisition loop only needs two things from the device: wait a bounded
//! time for data, then read exactly one 32-byte frame. [`FrameSource`] captures
//! that so the loop can run against the character device or a simulated
//! headset.

use crate::device::types::{RawFrame, FRAME_LEN};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Something the acquisition loop can pull encrypted frames from.
pub trait FrameSource: Send {
    /// Wait at most `timeout` for a frame.
    ///
    /// Returns `Ok(None)` when nothing arrived in time. Any error ends the
    /// acquisition session.
    fn poll_frame(&mut self, timeout: Duration) -> io::Result<Option<RawFrame>>;
}

/// Opens a fresh [`FrameSource`] for every acquisition session.
pub type SourceOpener = Arc<dyn Fn() -> io::Result<Box<dyn FrameSource>> + Send + Sync>;

/// Opener for the character device at `path`.
pub fn device_opener(path: impl Into<PathBuf>) -> SourceOpener {
    let path = path.into();
    Arc::new(move || {
        let source: Box<dyn FrameSource> = Box::new(DeviceFile::open(&path)?);
        Ok(source)
    })
}

/// The headset's encrypted character device.
#[derive(Debug)]
pub struct DeviceFile {
    path: PathBuf,
    file: File,
}

impl DeviceFile {
    /// Open the device for reading. This call may block and cannot be cancelled.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Path the device was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_frame(&mut self) -> io::Result<RawFrame> {
        let mut frame = [0u8; FRAME_LEN];
        self.file.read_exact(&mut frame)?;
        Ok(frame)
    }

    #[cfg(unix)]
    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        use std::os::unix::io::AsRawFd;

        let mut fds = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);

        let ret = unsafe { libc::poll(&mut fds, 1, millis) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err);
        }
        // POLLHUP/POLLERR without POLLIN still counts as "ready": the read
        // that follows reports the failure.
        Ok(ret > 0)
    }

    #[cfg(not(unix))]
    fn wait_readable(&self, _timeout: Duration) -> io::Result<bool> {
        Ok(true)
    }
}

impl FrameSource for DeviceFile {
    fn poll_frame(&mut self, timeout: Duration) -> io::Result<Option<RawFrame>> {
        if !self.wait_readable(timeout)? {
            return Ok(None);
        }
        self.read_frame().map(Some)
    }
}

/// In-memory source replaying a fixed list of frames.
///
/// Yields each frame once, then reports `UnexpectedEof` like an unplugged
/// device. Frames set to `None` simulate a poll timeout.
#[derive(Debug, Default)]
pub struct ReplaySource {
    frames: std::collections::VecDeque<Option<RawFrame>>,
}

impl ReplaySource {
    pub fn new(frames: impl IntoIterator<Item = Option<RawFrame>>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }
}

impl FrameSource for ReplaySource {
    fn poll_frame(&mut self, timeout: Duration) -> io::Result<Option<RawFrame>> {
        match self.frames.pop_front() {
            Some(Some(frame)) => Ok(Some(frame)),
            Some(None) => {
                std::thread::sleep(timeout);
                Ok(None)
            }
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "replay exhausted",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_device_file_reads_whole_frames() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let first = [1u8; FRAME_LEN];
        let second = [2u8; FRAME_LEN];
        tmp.write_all(&first).unwrap();
        tmp.write_all(&second).unwrap();
        tmp.write_all(&[3u8; 10]).unwrap();
        tmp.flush().unwrap();

        let mut device = DeviceFile::open(tmp.path()).unwrap();
        let timeout = Duration::from_millis(100);
        assert_eq!(device.poll_frame(timeout).unwrap(), Some(first));
        assert_eq!(device.poll_frame(timeout).unwrap(), Some(second));

        // Trailing partial frame surfaces as an error, ending the session.
        let err = device.poll_frame(timeout).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_missing_device_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let opener = device_opener(dir.path().join("encrypted"));
        assert!(opener().is_err());
    }

    #[test]
    fn test_replay_source() {
        let mut source = ReplaySource::new([Some([7u8; FRAME_LEN]), None]);
        let timeout = Duration::from_millis(1);
        assert_eq!(source.poll_frame(timeout).unwrap(), Some([7u8; FRAME_LEN]));
        assert_eq!(source.poll_frame(timeout).unwrap(), None);
        assert!(source.poll_frame(timeout).is_err());
    }
}
