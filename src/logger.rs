//! Logging capability consumed by the cache.
//!
//! Cache-side failures on the read path are reported here instead of being
//! surfaced to the caller. The logger is injected at build time; there is no
//! process-wide logger state in this crate.

/// A minimal three-level logger.
pub trait Logger: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Default logger forwarding to the `tracing` ecosystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, message: &str) {
        tracing::info!(target: "cachex", "{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "cachex", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "cachex", "{message}");
    }
}
