//! Buffered stream over an owned descriptor.
//!
//! `Stream` is the safe model of an open stream: descriptor, fixed buffer,
//! logical offset, cached size, sticky error and, for pipe streams, the
//! spawned child. Buffer movement lives in the `engine` module; this module
//! covers construction, positioning, and byte/element transfer.
//!
//! A stream is single-owner. `close` consumes it, so use-after-close does not
//! type-check; dropping an unclosed stream performs the same cleanup.

use std::ffi::CString;
use std::io::SeekFrom;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::config::{self, StreamConfig};
use crate::error::{IoOp, Result, StdioError};
use crate::syscall::{SEEK_CUR, SEEK_END, SEEK_SET, sys_close, sys_lseek, sys_open};

use super::buffer::{Cursors, LastOp, StreamBuffer};
use super::mode::Mode;
use super::pipe::{Child, ChildStatus};

/// What the stream knows about the length of its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Extent {
    /// Seekable descriptor with a cached size, grown by flushes.
    Known(u64),
    /// Pipe or other unseekable descriptor; the end is only seen as a
    /// zero-length read.
    Streaming { drained: bool },
}

#[derive(Debug)]
pub struct Stream {
    pub(super) fd: i32,
    pub(super) mode: Mode,
    pub(super) buffer: StreamBuffer,
    /// Caller-visible position.
    pub(super) offset: u64,
    pub(super) size: Extent,
    /// Sticky error flag; never cleared while the stream is open.
    pub(super) error: bool,
    pub(super) child: Option<Child>,
}

impl Stream {
    /// Open `path` with one of the six mode designators, using the
    /// process-wide configuration.
    pub fn open(path: impl AsRef<Path>, mode: &str) -> Result<Stream> {
        Self::open_with(path, mode, config::global())
    }

    /// Open `path` with an explicit configuration.
    pub fn open_with(path: impl AsRef<Path>, mode: &str, config: &StreamConfig) -> Result<Stream> {
        let mode = Mode::parse(mode)?;
        let path = path.as_ref();
        let open_err = |errno| StdioError::Open {
            path: path.display().to_string(),
            errno,
        };

        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| open_err(libc::EINVAL))?;
        let fd = sys_open(&c_path, mode.open_flags(), config.create_mode).map_err(open_err)?;

        let (offset, size) = match probe_extent(fd) {
            Ok(found) => found,
            Err(errno) => {
                let _ = sys_close(fd);
                return Err(open_err(errno));
            }
        };
        log::debug!(
            "open {} mode={mode} fd={fd} offset={offset} size={size:?}",
            path.display()
        );
        Ok(Self::from_parts(fd, mode, offset, size, None, config.buffer_capacity))
    }

    pub(super) fn from_parts(
        fd: i32,
        mode: Mode,
        offset: u64,
        size: Extent,
        child: Option<Child>,
        capacity: usize,
    ) -> Self {
        Self {
            fd,
            mode,
            buffer: StreamBuffer::new(capacity),
            offset,
            size,
            error: false,
            child,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Underlying descriptor.
    pub fn fd(&self) -> i32 {
        self.fd
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Whether any I/O failure has occurred on this stream.
    pub fn has_error(&self) -> bool {
        self.error
    }

    /// Current logical position.
    pub fn position(&self) -> u64 {
        self.offset
    }

    /// End-of-stream, derived on every call.
    ///
    /// Seekable streams compare the logical offset against the cached size
    /// (which flushes may have grown). Pipe streams are at the end once a read
    /// has returned no data and the buffer is empty.
    pub fn at_end(&self) -> bool {
        match self.size {
            Extent::Known(size) => self.offset == size,
            Extent::Streaming { drained } => drained && self.buffer.is_consumed(),
        }
    }

    /// Whether this stream is connected to a spawned child.
    pub fn is_pipe(&self) -> bool {
        self.child.is_some()
    }

    pub fn child_pid(&self) -> Option<i32> {
        self.child.as_ref().map(Child::pid)
    }

    /// Snapshot of the buffer cursors.
    pub fn buffered(&self) -> Cursors {
        self.buffer.cursors()
    }

    pub(super) fn is_seekable(&self) -> bool {
        matches!(self.size, Extent::Known(_))
    }

    // -----------------------------------------------------------------------
    // Positioning
    // -----------------------------------------------------------------------

    /// Reposition the stream. Pending writes are flushed and read look-ahead
    /// is discarded first. On failure the logical position is unchanged.
    ///
    /// `SeekFrom::Current` is relative to the logical position, not to the
    /// descriptor's (which may sit past buffered look-ahead).
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let (offset, whence) = match pos {
            SeekFrom::Start(off) => match i64::try_from(off) {
                Ok(off) => (off, SEEK_SET),
                Err(_) => return Err(self.fail(IoOp::Seek, libc::EOVERFLOW)),
            },
            SeekFrom::Current(delta) => (delta, SEEK_CUR),
            SeekFrom::End(delta) => (delta, SEEK_END),
        };
        self.seek_whence(offset, whence)
    }

    /// `lseek`-style repositioning with `SEEK_SET`, `SEEK_CUR` or `SEEK_END`.
    ///
    /// A negative absolute target, an unknown `whence`, or an offset that
    /// overflows fails like any other seek: sticky error set, position kept.
    pub fn seek_whence(&mut self, offset: i64, whence: i32) -> Result<u64> {
        let target = match whence {
            SEEK_SET => Some((offset, SEEK_SET)),
            SEEK_CUR => i64::try_from(self.offset)
                .ok()
                .and_then(|here| here.checked_add(offset))
                .map(|target| (target, SEEK_SET)),
            SEEK_END => Some((offset, SEEK_END)),
            _ => return Err(self.fail(IoOp::Seek, libc::EINVAL)),
        };
        let Some((target, whence)) = target else {
            return Err(self.fail(IoOp::Seek, libc::EOVERFLOW));
        };

        if self.buffer.last_op() == LastOp::Writing {
            self.flush()?;
        } else {
            self.discard_lookahead()?;
        }
        match sys_lseek(self.fd, target, whence) {
            Ok(new) => {
                self.offset = new as u64;
                log::trace!("fd {}: seek to {new}", self.fd);
                Ok(self.offset)
            }
            Err(errno) => Err(self.fail(IoOp::Seek, errno)),
        }
    }

    // -----------------------------------------------------------------------
    // Reading
    // -----------------------------------------------------------------------

    /// Next byte, or `None` at end-of-stream, on error, or when the stream is
    /// not readable.
    pub fn read_byte(&mut self) -> Option<u8> {
        if !self.mode.can_read() || self.at_end() {
            return None;
        }
        if self.buffer.last_op() == LastOp::Writing {
            self.flush().ok()?;
        }
        if self.buffer.is_consumed() && self.refill().ok()? == 0 {
            return None;
        }
        let b = self.buffer.next_byte()?;
        self.offset += 1;
        Some(b)
    }

    /// Read up to `count` elements of `element_size` bytes into `dest`.
    ///
    /// Returns the number of complete elements transferred. A trailing partial
    /// element is consumed from the stream but not counted. The request is
    /// clamped to the whole elements `dest` can hold.
    pub fn read_block(&mut self, dest: &mut [u8], element_size: usize, count: usize) -> usize {
        if !self.mode.can_read() || element_size == 0 {
            return 0;
        }
        let wanted = whole_elements(dest.len(), element_size, count);
        if self.buffer.last_op() == LastOp::Writing && self.flush().is_err() {
            return 0;
        }

        let mut done = 0;
        while done < wanted {
            if self.buffer.is_consumed() {
                match self.refill() {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            let n = self.buffer.take(&mut dest[done..wanted]);
            self.offset += n as u64;
            done += n;
        }
        done / element_size
    }

    // -----------------------------------------------------------------------
    // Writing
    // -----------------------------------------------------------------------

    /// Buffer one byte. Returns the byte on success, `None` when the stream
    /// is not writable or the flush of a full buffer failed.
    pub fn write_byte(&mut self, byte: u8) -> Option<u8> {
        if !self.mode.can_write() {
            return None;
        }
        self.discard_lookahead().ok()?;
        // Still full after an earlier failed flush.
        if self.buffer.is_full() {
            self.flush().ok()?;
        }
        self.buffer.push(&[byte]);
        self.offset += 1;
        if self.buffer.is_full() {
            self.flush().ok()?;
        }
        Some(byte)
    }

    /// Buffer up to `count` elements of `element_size` bytes from `src`.
    ///
    /// Returns `count` when everything was accepted (clamped to the whole
    /// elements in `src`). Each time the buffer fills it is flushed before
    /// more is stored; a partial tail stays buffered until the next fill,
    /// `flush`, `seek`, or `close`.
    pub fn write_block(&mut self, src: &[u8], element_size: usize, count: usize) -> usize {
        if !self.mode.can_write() || element_size == 0 {
            return 0;
        }
        let total = whole_elements(src.len(), element_size, count);
        if self.discard_lookahead().is_err() {
            return 0;
        }

        let mut done = 0;
        while done < total {
            let n = self.buffer.push(&src[done..total]);
            self.offset += n as u64;
            done += n;
            if self.buffer.is_full() && self.flush().is_err() {
                break;
            }
        }
        done / element_size
    }

    // -----------------------------------------------------------------------
    // Close
    // -----------------------------------------------------------------------

    /// Flush, release the descriptor and, for pipe streams, wait for the
    /// child. The stream is gone afterwards whatever the outcome.
    pub fn close(mut self) -> Result<()> {
        self.release().map(|_| ())
    }

    /// Close a pipe stream and return the child's exit status.
    ///
    /// Errors are reported in order: flush, descriptor close, wait. Closing a
    /// stream that has no child reports `Wait` with `ECHILD`.
    pub fn pclose(mut self) -> Result<ChildStatus> {
        let had_child = self.child.as_ref().map(Child::pid);
        match self.release()? {
            Some(status) => Ok(status),
            None => Err(StdioError::Wait {
                pid: had_child.unwrap_or(-1),
                errno: libc::ECHILD,
            }),
        }
    }

    /// Best-effort teardown shared by `close`, `pclose` and `Drop`. Every
    /// step runs even when an earlier one failed; the first failure wins.
    fn release(&mut self) -> Result<Option<ChildStatus>> {
        if self.fd < 0 {
            return Ok(None);
        }
        let flushed = self.flush();

        let fd = std::mem::replace(&mut self.fd, -1);
        let closed = sys_close(fd).map_err(|errno| {
            self.error = true;
            StdioError::io(IoOp::Close, errno)
        });
        let reaped = self.child.take().map(|child| child.wait()).transpose();
        log::debug!("close fd={fd}");

        flushed?;
        closed?;
        reaped
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            log::warn!("stream dropped without close: {err}");
        }
    }
}

/// Current and end offsets of a freshly opened descriptor, leaving it where
/// it started. Unseekable descriptors are treated as streaming.
fn probe_extent(fd: i32) -> std::result::Result<(u64, Extent), i32> {
    let here = match sys_lseek(fd, 0, SEEK_CUR) {
        Ok(pos) => pos,
        Err(libc::ESPIPE) => return Ok((0, Extent::Streaming { drained: false })),
        Err(errno) => return Err(errno),
    };
    let end = sys_lseek(fd, 0, SEEK_END)?;
    sys_lseek(fd, here, SEEK_SET)?;
    Ok((here as u64, Extent::Known(end as u64)))
}

fn whole_elements(available: usize, element_size: usize, count: usize) -> usize {
    let fit = available / element_size;
    count.min(fit) * element_size
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::temp_path;

    #[test]
    fn open_missing_path_is_open_error() {
        let err = Stream::open("/nonexistent/path", "r").unwrap_err();
        assert_eq!(
            err,
            StdioError::Open {
                path: "/nonexistent/path".into(),
                errno: libc::ENOENT
            }
        );
    }

    #[test]
    fn bad_mode_fails_before_touching_the_filesystem() {
        let path = temp_path("bad-mode");
        let err = Stream::open(&path, "rw").unwrap_err();
        assert_eq!(err, StdioError::InvalidMode("rw".into()));
        assert!(!path.exists(), "no file may be created for a bad mode");
    }

    #[test]
    fn interior_nul_in_path_is_einval() {
        let err = Stream::open("bad\0path", "w").unwrap_err();
        assert_eq!(err.errno(), libc::EINVAL);
    }

    #[test]
    fn open_records_size_and_rewinds() {
        let path = temp_path("open-size");
        std::fs::write(&path, b"0123456789").unwrap();
        let mut s = Stream::open(&path, "r").unwrap();
        assert_eq!(s.position(), 0);
        assert!(!s.at_end());
        assert_eq!(sys_lseek(s.fd(), 0, SEEK_CUR), Ok(0));
        assert_eq!(s.read_byte(), Some(b'0'));
        s.close().unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn write_then_read_back_in_w_plus() {
        let path = temp_path("w-plus");
        let mut s = Stream::open(&path, "w+").unwrap();
        for &b in b"ABCDEFG" {
            assert_eq!(s.write_byte(b), Some(b));
        }
        assert!(!s.at_end());
        assert_eq!(s.seek(SeekFrom::Start(0)), Ok(0));

        let mut out = [0u8; 7];
        assert_eq!(s.read_block(&mut out, 1, 7), 7);
        assert_eq!(&out, b"ABCDEFG");
        assert!(s.at_end());
        assert_eq!(s.read_byte(), None);
        s.close().unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn capability_gating_leaves_descriptor_alone() {
        let path = temp_path("gating");
        std::fs::write(&path, b"data").unwrap();

        let mut ro = Stream::open(&path, "r").unwrap();
        assert_eq!(ro.write_byte(b'x'), None);
        assert_eq!(ro.write_block(b"xyz", 1, 3), 0);
        assert_eq!(ro.buffered().last_op, LastOp::None);
        assert!(!ro.has_error());
        ro.close().unwrap();

        let mut wo = Stream::open(&path, "a").unwrap();
        let mut out = [0u8; 4];
        assert_eq!(wo.read_byte(), None);
        assert_eq!(wo.read_block(&mut out, 1, 4), 0);
        assert!(!wo.has_error());
        wo.close().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"data");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn read_block_drops_partial_trailing_element() {
        let path = temp_path("partial");
        std::fs::write(&path, [7u8; 20]).unwrap();
        let mut s = Stream::open(&path, "r").unwrap();
        let mut out = [0u8; 24];
        assert_eq!(s.read_block(&mut out, 8, 3), 2);
        assert_eq!(s.position(), 20);
        s.close().unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn seek_current_is_relative_to_logical_offset() {
        let path = temp_path("seek-cur");
        std::fs::write(&path, b"abcdefghij").unwrap();
        let mut s = Stream::open(&path, "r").unwrap();
        assert_eq!(s.read_byte(), Some(b'a'));
        assert_eq!(s.read_byte(), Some(b'b'));
        // The descriptor is past the whole file; the stream is at 2.
        assert_eq!(s.seek(SeekFrom::Current(3)), Ok(5));
        assert_eq!(s.read_byte(), Some(b'f'));
        assert_eq!(s.seek(SeekFrom::End(-1)), Ok(9));
        assert_eq!(s.read_byte(), Some(b'j'));
        assert!(s.at_end());
        s.close().unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn failed_seek_keeps_position_and_sets_error() {
        let path = temp_path("seek-fail");
        std::fs::write(&path, b"abc").unwrap();
        let mut s = Stream::open(&path, "r").unwrap();
        s.read_byte();
        let err = s.seek(SeekFrom::Current(-10)).unwrap_err();
        assert_eq!(err, StdioError::io(IoOp::Seek, libc::EINVAL));
        assert_eq!(s.position(), 1);
        assert!(s.has_error());
        // Sticky: a later successful operation does not clear it.
        assert_eq!(s.seek(SeekFrom::Start(0)), Ok(0));
        assert!(s.has_error());
        s.close().unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn write_after_read_overwrites_at_logical_offset() {
        let path = temp_path("rw-switch");
        std::fs::write(&path, b"hello world").unwrap();
        let mut s = Stream::open(&path, "r+").unwrap();
        let mut word = [0u8; 6];
        assert_eq!(s.read_block(&mut word, 1, 6), 6);
        assert_eq!(s.write_block(b"WORLD", 1, 5), 5);
        s.close().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello WORLD");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn read_after_write_sees_flushed_data() {
        let path = temp_path("wr-switch");
        std::fs::write(&path, b"0123456789").unwrap();
        let mut s = Stream::open(&path, "r+").unwrap();
        s.write_block(b"ab", 1, 2);
        assert_eq!(s.read_byte(), Some(b'2'));
        s.close().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"ab23456789");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn append_mode_reconciles_offset_after_flush() {
        let path = temp_path("append");
        std::fs::write(&path, b"head-").unwrap();
        let mut s = Stream::open(&path, "a+").unwrap();
        assert_eq!(s.position(), 0);
        s.write_block(b"tail", 1, 4);
        s.flush().unwrap();
        assert_eq!(s.position(), 9);
        assert!(s.at_end());
        s.seek(SeekFrom::Start(0)).unwrap();
        let mut out = [0u8; 9];
        assert_eq!(s.read_block(&mut out, 1, 9), 9);
        assert_eq!(&out, b"head-tail");
        s.close().unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn truncate_modes_empty_existing_file() {
        let path = temp_path("truncate");
        std::fs::write(&path, b"stale").unwrap();
        let s = Stream::open(&path, "w").unwrap();
        assert!(s.at_end());
        s.close().unwrap();
        assert!(std::fs::read(&path).unwrap().is_empty());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn drop_flushes_pending_writes() {
        let path = temp_path("drop");
        {
            let mut s = Stream::open(&path, "w").unwrap();
            s.write_block(b"kept", 1, 4);
        }
        assert_eq!(std::fs::read(&path).unwrap(), b"kept");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn pclose_on_plain_file_reports_echild() {
        let path = temp_path("pclose-file");
        let s = Stream::open(&path, "w").unwrap();
        let err = s.pclose().unwrap_err();
        assert_eq!(
            err,
            StdioError::Wait {
                pid: -1,
                errno: libc::ECHILD
            }
        );
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn seek_overflow_fails_without_moving() {
        let path = temp_path("seek-overflow");
        std::fs::write(&path, b"abc").unwrap();
        let mut s = Stream::open(&path, "r").unwrap();
        assert_eq!(s.read_byte(), Some(b'a'));

        let err = s.seek(SeekFrom::Current(i64::MAX)).unwrap_err();
        assert_eq!(err, StdioError::io(IoOp::Seek, libc::EOVERFLOW));
        assert_eq!(s.position(), 1);
        assert!(s.has_error());

        let err = s.seek(SeekFrom::Start(u64::MAX)).unwrap_err();
        assert_eq!(err, StdioError::io(IoOp::Seek, libc::EOVERFLOW));
        assert_eq!(s.position(), 1);
        assert_eq!(s.read_byte(), Some(b'b'));
        s.close().unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn seek_whence_rejects_negative_start_and_unknown_whence() {
        let path = temp_path("seek-whence");
        std::fs::write(&path, b"abcdef").unwrap();
        let mut s = Stream::open(&path, "r").unwrap();
        assert_eq!(s.seek_whence(2, SEEK_SET), Ok(2));
        assert_eq!(
            s.seek_whence(-1, SEEK_SET),
            Err(StdioError::io(IoOp::Seek, libc::EINVAL))
        );
        assert_eq!(
            s.seek_whence(0, 42),
            Err(StdioError::io(IoOp::Seek, libc::EINVAL))
        );
        assert_eq!(s.position(), 2);
        assert!(s.has_error());
        assert_eq!(s.seek_whence(-1, SEEK_CUR), Ok(1));
        assert_eq!(s.read_byte(), Some(b'b'));
        s.close().unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn write_after_failed_seek_lands_at_logical_offset() {
        let path = temp_path("seek-fail-write");
        std::fs::write(&path, b"abc").unwrap();
        let mut s = Stream::open(&path, "r+").unwrap();
        assert_eq!(s.read_byte(), Some(b'a'));
        // The descriptor sits past the look-ahead; a failed seek must not
        // leave it there.
        assert!(s.seek(SeekFrom::Current(-10)).is_err());
        assert_eq!(s.write_byte(b'X'), Some(b'X'));
        s.close().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"aXc");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn full_buffer_is_flushed_before_write_returns() {
        let path = temp_path("eager-flush");
        let config = StreamConfig::with_capacity(4);
        let mut s = Stream::open_with(&path, "w", &config).unwrap();

        assert_eq!(s.write_block(b"abcd", 1, 4), 4);
        assert_eq!(std::fs::read(&path).unwrap(), b"abcd");
        assert_eq!(s.buffered().last_op, LastOp::None);

        for &b in b"efg" {
            s.write_byte(b);
        }
        assert_eq!(std::fs::read(&path).unwrap(), b"abcd");
        assert_eq!(s.write_byte(b'h'), Some(b'h'));
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdefgh");
        assert_eq!(s.buffered().fill, 0);
        s.close().unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn failed_read_sets_sticky_error() {
        // A pipe's write end cannot be read: every read fails with EBADF.
        let [rd, wr] = crate::syscall::sys_pipe_cloexec().unwrap();
        let mut s = Stream::from_parts(
            wr,
            Mode::ReadOnly,
            0,
            Extent::Streaming { drained: false },
            None,
            16,
        );
        assert_eq!(s.read_byte(), None);
        assert!(s.has_error());
        let mut out = [0u8; 4];
        assert_eq!(s.read_block(&mut out, 1, 4), 0);
        assert!(s.has_error());
        s.close().unwrap();
        sys_close(rd).unwrap();
    }

    #[test]
    fn whole_elements_clamps_to_destination() {
        assert_eq!(whole_elements(24, 8, 3), 24);
        assert_eq!(whole_elements(20, 8, 3), 16);
        assert_eq!(whole_elements(100, 4, 2), 8);
    }
}
