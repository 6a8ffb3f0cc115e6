//! Named pipes connecting the producers to the transcoder.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::stat::Mode;
use tracing::{debug, info, instrument, warn};

use streamer_ipc::CancelToken;

use crate::error::TransportError;
use crate::{TransportResult, CANCEL_CHECK_INTERVAL};

const POLL_SLICE_MS: u16 = 250;

/// A named pipe on disk, owned by one session.
///
/// The node is removed when the pipe is dropped, so a later session never
/// inherits a stale reader or writer from this one.
#[derive(Debug)]
pub struct NamedPipe {
    path: PathBuf,
}

impl NamedPipe {
    /// Remove whatever sits at `path` and create a fresh pipe there.
    #[instrument(name = "pipe_recreate", skip_all, fields(path = %path.as_ref().display()))]
    pub fn recreate(path: impl AsRef<Path>) -> TransportResult<Self> {
        let path = path.as_ref().to_path_buf();

        if fs::symlink_metadata(&path).is_ok() {
            fs::remove_file(&path)?;
            debug!("Removed stale pipe");
        }

        let mode = Mode::S_IRUSR | Mode::S_IWUSR | Mode::S_IRGRP | Mode::S_IWGRP;
        nix::unistd::mkfifo(path.as_path(), mode).map_err(|e| TransportError::PipeCreate {
            path: path.clone(),
            message: e.desc().to_string(),
        })?;

        info!("Pipe ready");
        Ok(Self { path })
    }

    /// Path of the pipe node.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the node still exists and is a pipe.
    pub fn exists(&self) -> bool {
        fs::symlink_metadata(&self.path)
            .map(|m| m.file_type().is_fifo())
            .unwrap_or(false)
    }
}

impl Drop for NamedPipe {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), "Failed to remove pipe: {}", e);
            }
        }
    }
}

/// Result of a non-blocking write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The whole buffer went into the pipe.
    Written,

    /// Only the first `n` bytes fit. The caller owns the remainder.
    Partial(usize),

    /// The pipe was full; nothing was written.
    Full,
}

/// The write end of a named pipe.
///
/// The descriptor is always non-blocking. Callers choose between dropping
/// on a full pipe ([`PipeWriter::offer`]) and waiting for space while still
/// honoring cancellation ([`PipeWriter::write_all`]).
#[derive(Debug)]
pub struct PipeWriter {
    file: File,
    path: PathBuf,
}

impl PipeWriter {
    /// Open the write end, waiting until a reader attaches.
    ///
    /// Re-checks `cancel` every [`CANCEL_CHECK_INTERVAL`].
    pub fn open(path: impl AsRef<Path>, cancel: &CancelToken) -> TransportResult<Self> {
        let path = path.as_ref();
        let mut waiting_logged = false;

        loop {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }

            match Self::try_open(path) {
                Ok(writer) => {
                    debug!(path = %path.display(), "Pipe write end open");
                    return Ok(writer);
                }
                Err(TransportError::NoReader) => {
                    if !waiting_logged {
                        debug!(path = %path.display(), "Waiting for pipe reader");
                        waiting_logged = true;
                    }
                    if cancel.wait_timeout(CANCEL_CHECK_INTERVAL) {
                        return Err(TransportError::Cancelled);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Try once to open the write end without waiting for a reader.
    pub fn try_open(path: impl AsRef<Path>) -> TransportResult<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .write(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(path)
            .map_err(|e| match e.raw_os_error() {
                Some(code) if code == Errno::ENXIO as i32 => TransportError::NoReader,
                _ if e.kind() == io::ErrorKind::NotFound => {
                    TransportError::PipeMissing(path.to_path_buf())
                }
                _ => TransportError::Io(e),
            })?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Path this writer was opened on.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write as much of `buf` as the pipe takes right now, without waiting.
    ///
    /// Buffers no larger than [`crate::ATOMIC_PIPE_WRITE`] are written all or
    /// nothing. A larger buffer may be accepted in part, in which case the
    /// caller must finish it before writing anything else.
    pub fn offer(&mut self, buf: &[u8]) -> TransportResult<WriteOutcome> {
        loop {
            match self.file.write(buf) {
                Ok(n) if n == buf.len() => return Ok(WriteOutcome::Written),
                Ok(0) => return Ok(WriteOutcome::Full),
                Ok(n) => return Ok(WriteOutcome::Partial(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(WriteOutcome::Full),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(map_write_error(e)),
            }
        }
    }

    /// Write the whole buffer, waiting for room in slices that re-check `cancel`.
    pub fn write_all(&mut self, buf: &[u8], cancel: &CancelToken) -> TransportResult<()> {
        let mut written = 0;

        while written < buf.len() {
            match self.file.write(&buf[written..]) {
                Ok(0) => return Err(TransportError::ReaderGone),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if cancel.is_cancelled() {
                        return Err(TransportError::Cancelled);
                    }
                    wait_ready(&self.file, PollFlags::POLLOUT)?;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(map_write_error(e)),
            }
        }

        Ok(())
    }
}

/// Wait up to one poll slice for `fd` to become readable.
///
/// Returns true when a read will not block (data, EOF or error pending).
pub fn wait_readable(fd: &impl AsFd) -> TransportResult<bool> {
    wait_ready(fd, PollFlags::POLLIN)
}

fn wait_ready(fd: &impl AsFd, events: PollFlags) -> TransportResult<bool> {
    let mut fds = [PollFd::new(fd.as_fd(), events)];
    match poll(&mut fds, PollTimeout::from(POLL_SLICE_MS)) {
        Ok(0) => Ok(false),
        Ok(_) => Ok(true),
        Err(Errno::EINTR) => Ok(false),
        Err(e) => Err(TransportError::Io(io::Error::from(e))),
    }
}

fn map_write_error(e: io::Error) -> TransportError {
    if e.kind() == io::ErrorKind::BrokenPipe {
        TransportError::ReaderGone
    } else {
        TransportError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::thread;
    use std::time::{Duration, Instant};

    fn open_reader(path: &Path) -> File {
        OpenOptions::new()
            .read(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(path)
            .unwrap()
    }

    #[test]
    fn test_recreate_replaces_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.pcm");
        fs::write(&path, b"stale").unwrap();

        let pipe = NamedPipe::recreate(&path).unwrap();
        assert!(pipe.exists());

        drop(pipe);
        assert!(!path.exists());
    }

    #[test]
    fn test_try_open_without_reader() {
        let dir = tempfile::tempdir().unwrap();
        let pipe = NamedPipe::recreate(dir.path().join("cam.ts")).unwrap();

        let err = PipeWriter::try_open(pipe.path()).unwrap_err();
        assert!(matches!(err, TransportError::NoReader));
    }

    #[test]
    fn test_open_is_cancellable() {
        let dir = tempfile::tempdir().unwrap();
        let pipe = NamedPipe::recreate(dir.path().join("cam.ts")).unwrap();
        let cancel = CancelToken::new();

        let path = pipe.path().to_path_buf();
        let waiter = cancel.clone();
        let handle = thread::spawn(move || {
            let start = Instant::now();
            let result = PipeWriter::open(&path, &waiter);
            (result.map(|_| ()), start.elapsed())
        });

        thread::sleep(Duration::from_millis(100));
        cancel.cancel();

        let (result, waited) = handle.join().unwrap();
        assert!(matches!(result, Err(TransportError::Cancelled)));
        assert!(waited < Duration::from_secs(2));
    }

    #[test]
    fn test_offer_reports_full_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let pipe = NamedPipe::recreate(dir.path().join("cam.ts")).unwrap();
        let _reader = open_reader(pipe.path());

        let mut writer = PipeWriter::try_open(pipe.path()).unwrap();
        let chunk = [0u8; crate::ATOMIC_PIPE_WRITE];

        let mut outcome = WriteOutcome::Written;
        for _ in 0..1024 {
            outcome = writer.offer(&chunk).unwrap();
            if outcome == WriteOutcome::Full {
                break;
            }
        }
        assert_eq!(outcome, WriteOutcome::Full);
    }

    #[test]
    fn test_offer_hands_back_what_did_not_fit() {
        let dir = tempfile::tempdir().unwrap();
        let pipe = NamedPipe::recreate(dir.path().join("cam.ts")).unwrap();
        let mut reader = open_reader(pipe.path());

        let mut writer = PipeWriter::try_open(pipe.path()).unwrap();
        let small = [1u8; 1000];
        while writer.offer(&small).unwrap() == WriteOutcome::Written {}

        // Free exactly one page, then offer more than fits.
        let mut page = [0u8; crate::ATOMIC_PIPE_WRITE];
        reader.read_exact(&mut page).unwrap();

        let big = vec![2u8; crate::ATOMIC_PIPE_WRITE * 4];
        match writer.offer(&big).unwrap() {
            WriteOutcome::Partial(n) => assert!(n > 0 && n < big.len()),
            other => panic!("expected a partial write, got {:?}", other),
        }
    }

    #[test]
    fn test_write_after_reader_closes_is_reader_gone() {
        let dir = tempfile::tempdir().unwrap();
        let pipe = NamedPipe::recreate(dir.path().join("audio.pcm")).unwrap();
        let reader = open_reader(pipe.path());
        let cancel = CancelToken::new();

        let mut writer = PipeWriter::try_open(pipe.path()).unwrap();
        drop(reader);

        let err = writer.write_all(b"pcm", &cancel).unwrap_err();
        assert!(err.is_reader_gone());
    }

    #[test]
    fn test_write_all_delivers_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let pipe = NamedPipe::recreate(dir.path().join("audio.pcm")).unwrap();
        let mut reader = open_reader(pipe.path());
        let cancel = CancelToken::new();

        let mut writer = PipeWriter::try_open(pipe.path()).unwrap();
        writer.write_all(b"hello", &cancel).unwrap();

        let mut buf = [0u8; 5];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }
}
