//! Buffered streams.
//!
//! Implements the stream surface: open/close, byte and element transfer,
//! seeking, flushing, end-of-stream and error introspection, and pipe streams
//! connected to a spawned shell command.

pub mod buffer;
mod engine;
pub mod file;
pub mod mode;
pub mod pipe;

pub use buffer::{Cursors, LastOp};
pub use file::Stream;
pub use mode::{Capabilities, Mode};
pub use pipe::ChildStatus;
