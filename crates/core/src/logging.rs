//! Logging context built on `tracing`.
//!
//! There is no process-wide logger set up behind the caller's back. A
//! [`LoggingContext`] is constructed explicitly (normally at the top of
//! `main`) and installs its subscriber as the default for as long as it is
//! alive. Dropping it restores whatever dispatcher was active before.

use tracing::subscriber::DefaultGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter used when neither `RUST_LOG` nor the configuration provides one.
pub const DEFAULT_LOG_FILTER: &str = "info,lantern=debug";

/// Owns the active tracing subscriber.
///
/// # Example
/// ```
/// let logging = lantern_core::LoggingContext::new(lantern_core::DEFAULT_LOG_FILTER);
/// tracing::info!(filter = logging.filter(), "Renderer starting");
/// drop(logging);
/// ```
pub struct LoggingContext {
    filter: String,
    _guard: DefaultGuard,
}

impl LoggingContext {
    /// Builds the subscriber and makes it the default for the current thread.
    ///
    /// `RUST_LOG` takes precedence over `directives`. Invalid directives fall
    /// back to [`DEFAULT_LOG_FILTER`].
    pub fn new(directives: &str) -> Self {
        let (filter, source) = match EnvFilter::try_from_default_env() {
            Ok(filter) => (filter, std::env::var("RUST_LOG").unwrap_or_default()),
            Err(_) => match EnvFilter::try_new(directives) {
                Ok(filter) => (filter, directives.to_string()),
                Err(_) => (
                    EnvFilter::new(DEFAULT_LOG_FILTER),
                    DEFAULT_LOG_FILTER.to_string(),
                ),
            },
        };

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true));

        let guard = tracing::subscriber::set_default(subscriber);
        tracing::debug!(filter = %source, "Logging context installed");

        Self {
            filter: source,
            _guard: guard,
        }
    }

    /// Returns the filter directives in effect.
    pub fn filter(&self) -> &str {
        &self.filter
    }
}

impl Drop for LoggingContext {
    fn drop(&mut self) {
        tracing::debug!("Logging context torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_reports_filter() {
        // RUST_LOG may be set by the test runner; only check the fallback path
        // when it is absent.
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let ctx = LoggingContext::new("warn");
        assert_eq!(ctx.filter(), "warn");
    }

    #[test]
    fn test_contexts_can_nest() {
        let outer = LoggingContext::new(DEFAULT_LOG_FILTER);
        {
            let _inner = LoggingContext::new("error");
            tracing::error!("visible in inner context");
        }
        tracing::info!("outer context is default again");
        drop(outer);
    }
}
