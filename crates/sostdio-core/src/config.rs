//! Stream configuration.
//!
//! Defaults can be overridden process-wide through the environment:
//! - `SOSTDIO_BUFLEN`: buffer capacity in bytes (positive integer, default 4096).
//! - `SOSTDIO_SHELL`: shell used to run pipe-stream commands (default `/bin/sh`).
//!
//! The environment is read once, on first use, and cached for the life of the
//! process. Unparseable values fall back to the defaults.

use std::sync::OnceLock;

/// Default buffer capacity.
pub const BUFLEN: usize = 4096;

/// Permission bits for files created by `open`.
pub const DEFAULT_CREATE_MODE: u32 = 0o760;

pub const DEFAULT_SHELL: &str = "/bin/sh";

const BUFLEN_ENV: &str = "SOSTDIO_BUFLEN";
const SHELL_ENV: &str = "SOSTDIO_SHELL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Fixed buffer capacity of every stream built with this config.
    pub buffer_capacity: usize,
    /// Creation permission passed to `open(2)`.
    pub create_mode: u32,
    /// Shell executed as `<shell> -c <command>` by pipe streams.
    pub shell: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: BUFLEN,
            create_mode: DEFAULT_CREATE_MODE,
            shell: DEFAULT_SHELL.to_owned(),
        }
    }
}

impl StreamConfig {
    /// Config with a custom buffer capacity. Zero is clamped to one byte.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer_capacity: capacity.max(1),
            ..Self::default()
        }
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(cap) = lookup(BUFLEN_ENV).and_then(|v| parse_capacity(&v)) {
            config.buffer_capacity = cap;
        }
        if let Some(shell) = lookup(SHELL_ENV).filter(|v| !v.trim().is_empty()) {
            config.shell = shell;
        }
        config
    }
}

fn parse_capacity(raw: &str) -> Option<usize> {
    raw.trim().parse::<usize>().ok().filter(|&n| n > 0)
}

/// Process-wide configuration, resolved from the environment on first call.
pub fn global() -> &'static StreamConfig {
    static CONFIG: OnceLock<StreamConfig> = OnceLock::new();
    CONFIG.get_or_init(|| {
        let config = StreamConfig::from_lookup(|key| std::env::var(key).ok());
        log::debug!(
            "sostdio config: buffer_capacity={} shell={}",
            config.buffer_capacity,
            config.shell
        );
        config
    })
}
