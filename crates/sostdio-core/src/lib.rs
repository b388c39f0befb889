//! # sostdio-core
//!
//! Buffered stream I/O built directly on file-descriptor and process
//! primitives: `open`, `read`, `write`, `lseek`, `close`, `pipe`, `fork`,
//! `execv`, `waitpid`.
//!
//! A [`Stream`] owns a descriptor and a single fixed-capacity buffer, tracks a
//! logical offset independent of buffered look-ahead, gates every operation on
//! the capabilities of its open [`Mode`], and keeps a sticky error flag. Pipe
//! streams ([`Stream::spawn`]) run the same engine over one end of a pipe to a
//! child shell and reap the child on close.
//!
//! No `unsafe` code is permitted outside the [`syscall`] veneer.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod stdio;
#[allow(unsafe_code)]
pub mod syscall;

#[cfg(test)]
mod testutil;

pub use config::StreamConfig;
pub use error::{IoOp, Result, StdioError};
pub use stdio::{ChildStatus, Cursors, LastOp, Mode, Stream};
