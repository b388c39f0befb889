//! Mode designators and the capabilities they grant.
//!
//! Exactly six designators are recognized: `"r"`, `"r+"`, `"w"`, `"w+"`,
//! `"a"`, `"a+"`. No `b`/`x` modifiers, no reordering.

use std::fmt;
use std::str::FromStr;

use crate::error::StdioError;

/// Stream open mode, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// `"r"`
    ReadOnly,
    /// `"r+"`
    ReadWrite,
    /// `"w"`
    WriteTruncate,
    /// `"w+"`
    ReadWriteTruncate,
    /// `"a"`
    AppendWrite,
    /// `"a+"`
    AppendReadWrite,
}

/// Independent capability bits derived from a [`Mode`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub readable: bool,
    pub writable: bool,
    pub create: bool,
    pub truncate: bool,
    pub append: bool,
}

impl Mode {
    pub const ALL: [Mode; 6] = [
        Mode::ReadOnly,
        Mode::ReadWrite,
        Mode::WriteTruncate,
        Mode::ReadWriteTruncate,
        Mode::AppendWrite,
        Mode::AppendReadWrite,
    ];

    /// Parse a designator. Anything but the six known strings is rejected.
    pub fn parse(designator: &str) -> Result<Mode, StdioError> {
        match designator {
            "r" => Ok(Mode::ReadOnly),
            "r+" => Ok(Mode::ReadWrite),
            "w" => Ok(Mode::WriteTruncate),
            "w+" => Ok(Mode::ReadWriteTruncate),
            "a" => Ok(Mode::AppendWrite),
            "a+" => Ok(Mode::AppendReadWrite),
            other => Err(StdioError::InvalidMode(other.to_owned())),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Mode::ReadOnly => "r",
            Mode::ReadWrite => "r+",
            Mode::WriteTruncate => "w",
            Mode::ReadWriteTruncate => "w+",
            Mode::AppendWrite => "a",
            Mode::AppendReadWrite => "a+",
        }
    }

    pub const fn can_read(self) -> bool {
        match self {
            Mode::ReadOnly | Mode::ReadWrite | Mode::ReadWriteTruncate | Mode::AppendReadWrite => {
                true
            }
            Mode::WriteTruncate | Mode::AppendWrite => false,
        }
    }

    pub const fn can_write(self) -> bool {
        match self {
            Mode::ReadWrite
            | Mode::WriteTruncate
            | Mode::ReadWriteTruncate
            | Mode::AppendWrite
            | Mode::AppendReadWrite => true,
            Mode::ReadOnly => false,
        }
    }

    pub const fn capabilities(self) -> Capabilities {
        Capabilities {
            readable: self.can_read(),
            writable: self.can_write(),
            create: !matches!(self, Mode::ReadOnly | Mode::ReadWrite),
            truncate: matches!(self, Mode::WriteTruncate | Mode::ReadWriteTruncate),
            append: matches!(self, Mode::AppendWrite | Mode::AppendReadWrite),
        }
    }

    /// `O_*` flags for `open(2)`.
    pub fn open_flags(self) -> i32 {
        let caps = self.capabilities();
        let mut oflags = match (caps.readable, caps.writable) {
            (true, true) => libc::O_RDWR,
            (false, true) => libc::O_WRONLY,
            _ => libc::O_RDONLY,
        };
        if caps.create {
            oflags |= libc::O_CREAT;
        }
        if caps.truncate {
            oflags |= libc::O_TRUNC;
        }
        if caps.append {
            oflags |= libc::O_APPEND;
        }
        oflags | libc::O_CLOEXEC
    }
}

impl FromStr for Mode {
    type Err = StdioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mode::parse(s)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
