//! Pipe streams: a `Stream` over one end of a pipe to a spawned shell command.
//!
//! The parent keeps one end and the child's stdin or stdout is redirected to
//! the other. The buffer engine is the same as for files; only construction
//! (spawn instead of open) and teardown (reap the child) differ.

use std::ffi::CString;

use crate::config::{self, StreamConfig};
use crate::error::{Result, StdioError};
use crate::syscall::{
    Redirect, STDIN_FILENO, STDOUT_FILENO, fork_exec_redirected, sys_close, sys_pipe_cloexec,
    sys_waitpid,
};

use super::file::{Extent, Stream};
use super::mode::Mode;

/// Handle on a spawned child process, reaped exactly once.
#[derive(Debug)]
pub struct Child {
    pid: i32,
}

impl Child {
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Block until the child terminates. Retries on `EINTR`.
    pub(super) fn wait(self) -> Result<ChildStatus> {
        loop {
            match sys_waitpid(self.pid) {
                Ok(raw) => {
                    let status = ChildStatus(raw);
                    log::debug!("reaped child {}: {status:?}", self.pid);
                    return Ok(status);
                }
                Err(libc::EINTR) => continue,
                Err(errno) => {
                    return Err(StdioError::Wait {
                        pid: self.pid,
                        errno,
                    });
                }
            }
        }
    }
}

/// Raw wait status of a reaped child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildStatus(i32);

impl ChildStatus {
    pub fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// The status word as returned by `waitpid`.
    pub fn raw(self) -> i32 {
        self.0
    }

    /// Exit code, if the child exited normally.
    pub fn exit_code(self) -> Option<i32> {
        libc::WIFEXITED(self.0).then(|| libc::WEXITSTATUS(self.0))
    }

    /// Terminating signal, if the child was killed by one.
    pub fn signal(self) -> Option<i32> {
        libc::WIFSIGNALED(self.0).then(|| libc::WTERMSIG(self.0))
    }

    pub fn success(self) -> bool {
        self.exit_code() == Some(0)
    }
}

/// Which way data flows, from the parent's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Parent reads the child's stdout.
    FromChild,
    /// Parent writes the child's stdin.
    ToChild,
}

impl Direction {
    fn for_mode(mode: Mode) -> Option<Direction> {
        match (mode.can_read(), mode.can_write()) {
            (true, false) => Some(Direction::FromChild),
            (false, true) => Some(Direction::ToChild),
            _ => None,
        }
    }
}

impl Stream {
    /// Run `command` through the configured shell with a pipe to it.
    ///
    /// `"r"` reads the command's stdout; `"w"` or `"a"` writes its stdin. The
    /// read-write designators are rejected since a pipe carries one
    /// direction only.
    pub fn spawn(command: &str, mode: &str) -> Result<Stream> {
        Self::spawn_with(command, mode, config::global())
    }

    pub fn spawn_with(command: &str, mode: &str, config: &StreamConfig) -> Result<Stream> {
        let parsed = Mode::parse(mode)?;
        let direction =
            Direction::for_mode(parsed).ok_or_else(|| StdioError::InvalidMode(mode.to_owned()))?;
        let spawn_err = |errno| StdioError::ChildSpawn {
            command: command.to_owned(),
            errno,
        };

        let shell = CString::new(config.shell.as_str()).map_err(|_| spawn_err(libc::EINVAL))?;
        let script = CString::new(command).map_err(|_| spawn_err(libc::EINVAL))?;
        let argv = [shell.as_c_str(), c"-c", script.as_c_str()];

        let [read_end, write_end] = sys_pipe_cloexec().map_err(spawn_err)?;
        let redirect = match direction {
            Direction::FromChild => Redirect {
                child_end: write_end,
                parent_end: read_end,
                target: STDOUT_FILENO,
            },
            Direction::ToChild => Redirect {
                child_end: read_end,
                parent_end: write_end,
                target: STDIN_FILENO,
            },
        };

        let pid = match fork_exec_redirected(&argv, redirect) {
            Ok(pid) => pid,
            Err(errno) => {
                let _ = sys_close(read_end);
                let _ = sys_close(write_end);
                return Err(spawn_err(errno));
            }
        };
        if let Err(errno) = sys_close(redirect.child_end) {
            log::warn!("closing child pipe end {} failed (errno {errno})", redirect.child_end);
        }
        log::debug!(
            "spawned {command:?} pid={pid} mode={parsed} fd={}",
            redirect.parent_end
        );

        Ok(Stream::from_parts(
            redirect.parent_end,
            parsed,
            0,
            Extent::Streaming { drained: false },
            Some(Child { pid }),
            config.buffer_capacity,
        ))
    }
}
