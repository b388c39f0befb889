//! Fill and drain algorithms.
//!
//! These are the only routines that move bytes between a stream's buffer and
//! its descriptor. Descriptor position is kept in step with the logical
//! offset for seekable streams:
//! - idle: descriptor == `offset`
//! - reading: descriptor == `offset + unconsumed look-ahead`
//! - writing: descriptor == `offset - pending` (ignored under `O_APPEND`)

use crate::error::{IoOp, Result, StdioError};
use crate::syscall::{SEEK_CUR, SEEK_SET, sys_lseek, sys_read, sys_write};

use super::buffer::LastOp;
use super::file::{Extent, Stream};

/// A write that stopped early: how much reached the descriptor, and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ShortWrite {
    pub written: usize,
    pub errno: i32,
}

/// Write all of `buf`, retrying short writes and `EINTR`.
///
/// A zero-byte write for a non-empty request is reported as `EIO` rather than
/// spinning forever.
pub(crate) fn write_nbytes(fd: i32, buf: &[u8]) -> std::result::Result<(), ShortWrite> {
    let mut done = 0;
    while done < buf.len() {
        match sys_write(fd, &buf[done..]) {
            Ok(0) => {
                return Err(ShortWrite {
                    written: done,
                    errno: libc::EIO,
                });
            }
            Ok(n) => done += n,
            Err(libc::EINTR) => continue,
            Err(errno) => {
                return Err(ShortWrite {
                    written: done,
                    errno,
                });
            }
        }
    }
    Ok(())
}

/// Read up to `buf.len()` bytes. A zero or short result is physical
/// end-of-data and ends the loop; only `EINTR` is retried.
pub(crate) fn read_nbytes(fd: i32, buf: &mut [u8]) -> std::result::Result<usize, i32> {
    let mut got = 0;
    while got < buf.len() {
        match sys_read(fd, &mut buf[got..]) {
            Ok(0) => break,
            Ok(n) => {
                let requested = buf.len() - got;
                got += n;
                if n < requested {
                    break;
                }
            }
            Err(libc::EINTR) => continue,
            Err(errno) => return Err(errno),
        }
    }
    Ok(got)
}

impl Stream {
    /// Record a descriptor failure in the sticky flag and build the error.
    pub(super) fn fail(&mut self, op: IoOp, errno: i32) -> StdioError {
        if !self.error {
            log::warn!("fd {}: {op} failed (errno {errno}), marking stream", self.fd);
        }
        self.error = true;
        StdioError::io(op, errno)
    }

    /// Hand pending writes to the descriptor.
    ///
    /// No-op unless the buffer holds pending write data, so back-to-back
    /// flushes never duplicate bytes. On failure the bytes that did reach the
    /// descriptor are dropped from the buffer, the rest stays pending, and
    /// the sticky error is set.
    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.last_op() != LastOp::Writing || self.buffer.pending().is_empty() {
            return Ok(());
        }
        let pending = self.buffer.pending().len();
        let written = write_nbytes(self.fd, self.buffer.pending());
        if let Err(short) = written {
            self.buffer.drain_front(short.written);
            if let Extent::Known(size) = &mut self.size {
                let landed = self.offset.saturating_sub(self.buffer.pending().len() as u64);
                *size = (*size).max(landed);
            }
            log::trace!(
                "fd {}: flush stopped after {} of {pending} bytes",
                self.fd,
                short.written
            );
            return Err(self.fail(IoOp::Write, short.errno));
        }

        if self.is_seekable() {
            match sys_lseek(self.fd, 0, SEEK_CUR) {
                Ok(pos) => self.offset = pos as u64,
                Err(errno) => return Err(self.fail(IoOp::Seek, errno)),
            }
        }
        if let Extent::Known(size) = &mut self.size {
            *size = (*size).max(self.offset);
        }
        self.buffer.clear();
        log::trace!(
            "fd {}: flushed {pending} bytes, offset={} size={:?}",
            self.fd,
            self.offset,
            self.size
        );
        Ok(())
    }

    /// Pull more data into the buffer. Returns the number of bytes obtained;
    /// zero means nothing more is available.
    ///
    /// Pending writes are drained first. Unconsumed look-ahead is preserved
    /// and the new data is appended after it.
    pub(super) fn refill(&mut self) -> Result<usize> {
        if !self.mode.can_read() {
            return Ok(0);
        }
        if self.buffer.last_op() == LastOp::Writing {
            self.flush()?;
        }
        self.buffer.prepare_fill();

        let ahead = self.buffer.unconsumed() as u64;
        let room = self.buffer.spare();
        let want = match self.size {
            Extent::Known(size) => {
                let left = size.saturating_sub(self.offset + ahead);
                left.min(room as u64) as usize
            }
            Extent::Streaming { drained: true } => 0,
            Extent::Streaming { drained: false } => room,
        };
        if want == 0 {
            return Ok(0);
        }

        if self.is_seekable()
            && let Err(errno) = sys_lseek(self.fd, (self.offset + ahead) as i64, SEEK_SET)
        {
            return Err(self.fail(IoOp::Seek, errno));
        }

        let fd = self.fd;
        let read = read_nbytes(fd, &mut self.buffer.spare_mut()[..want]);
        let got = match read {
            Ok(n) => n,
            Err(errno) => return Err(self.fail(IoOp::Read, errno)),
        };
        if got == 0
            && let Extent::Streaming { drained } = &mut self.size
        {
            *drained = true;
        }
        self.buffer.commit_fill(got);
        log::trace!("fd {fd}: refill wanted {want}, got {got}");
        Ok(got)
    }

    /// Throw away read look-ahead before switching to writing. Nothing is
    /// written back; a seekable descriptor is pulled back to the logical
    /// offset so the next flush lands where the caller expects.
    pub(super) fn discard_lookahead(&mut self) -> Result<()> {
        if self.buffer.last_op() != LastOp::Reading {
            return Ok(());
        }
        let ahead = self.buffer.unconsumed();
        self.buffer.reset();
        if ahead > 0
            && self.is_seekable()
            && let Err(errno) = sys_lseek(self.fd, self.offset as i64, SEEK_SET)
        {
            return Err(self.fail(IoOp::Seek, errno));
        }
        Ok(())
    }
}
