use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

static TEST_SEQ: AtomicU64 = AtomicU64::new(0);

/// Unique scratch path under the system temp dir.
pub(crate) fn temp_path(prefix: &str) -> PathBuf {
    let _ = env_logger::builder().is_test(true).try_init();
    let seq = TEST_SEQ.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "sostdio-{prefix}-{}-{seq}.bin",
        std::process::id()
    ))
}
