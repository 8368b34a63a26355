//! Tracing initialization for tests.

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Install a structured `fmt` subscriber for test runs.
///
/// Respects `RUST_LOG` via `EnvFilter::from_default_env()` and writes to
/// the test-captured writer. Idempotent: safe to call from every test in
/// a binary, including concurrently.
pub fn init_test_tracing() {
    INSTALLED.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_target(true)
            .with_test_writer()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_test_tracing();
        init_test_tracing();
    }
}
