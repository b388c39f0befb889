//! Error taxonomy for stream operations.
//!
//! Every fallible operation returns [`StdioError`]. I/O-layer failures are
//! additionally recorded in the stream's sticky error flag, so a caller that
//! drops a result can still detect the loss through `Stream::has_error`.

use std::fmt;

use thiserror::Error;

/// The descriptor operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Read,
    Write,
    Seek,
    Close,
}

impl fmt::Display for IoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Seek => "lseek",
            Self::Close => "close",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StdioError {
    /// Mode designator outside the six recognized strings. Raised before any
    /// resource is allocated.
    #[error("invalid mode designator {0:?}")]
    InvalidMode(String),
    /// Opening the descriptor failed.
    #[error("open {path:?} failed (errno {errno})")]
    Open { path: String, errno: i32 },
    /// A descriptor syscall failed after the retry loop gave up.
    #[error("{op} failed (errno {errno})")]
    Io { op: IoOp, errno: i32 },
    /// Creating the pipe or forking the child failed.
    #[error("spawning {command:?} failed (errno {errno})")]
    ChildSpawn { command: String, errno: i32 },
    /// Reaping the child failed.
    #[error("waiting for child {pid} failed (errno {errno})")]
    Wait { pid: i32, errno: i32 },
}

impl StdioError {
    /// The errno carried by this error. `InvalidMode` maps to `EINVAL`.
    pub fn errno(&self) -> i32 {
        match self {
            Self::InvalidMode(_) => libc::EINVAL,
            Self::Open { errno, .. }
            | Self::Io { errno, .. }
            | Self::ChildSpawn { errno, .. }
            | Self::Wait { errno, .. } => *errno,
        }
    }

    pub(crate) fn io(op: IoOp, errno: i32) -> Self {
        Self::Io { op, errno }
    }
}

pub type Result<T> = std::result::Result<T, StdioError>;
