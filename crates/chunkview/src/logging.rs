#![forbid(unsafe_code)]

//! Log output setup.
//!
//! The library crates only emit `tracing` events. Hosts that want them on
//! stderr as JSON lines enable the `tracing-json` feature and call
//! [`init_json`] once at startup. Collection events land under the
//! `chunkview::collection` target and scheduler passes under
//! `chunkview::scheduler`.

/// Environment variable holding the filter directives.
pub const LOG_ENV: &str = "CHUNKVIEW_LOG";

#[cfg(feature = "tracing-json")]
pub use json::{filter_from, init_json};

#[cfg(feature = "tracing-json")]
mod json {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

    use super::LOG_ENV;

    /// Build the filter from `lookup(LOG_ENV)`, falling back to `default`.
    ///
    /// Directives that fail to parse fall back too, so a typo in the
    /// environment never disables logging outright.
    pub fn filter_from<F>(lookup: F, default: &str) -> EnvFilter
    where
        F: Fn(&str) -> Option<String>,
    {
        lookup(LOG_ENV)
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| EnvFilter::new(default))
    }

    /// Install a global JSON subscriber.
    ///
    /// Fails if a global subscriber is already set.
    pub fn init_json(default: &str) -> Result<(), TryInitError> {
        let filter = filter_from(|key| std::env::var(key).ok(), default);
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use tracing_subscriber::filter::LevelFilter;

        #[test]
        fn environment_wins_over_default() {
            let filter = filter_from(
                |key| (key == LOG_ENV).then(|| "chunkview=trace".to_string()),
                "warn",
            );
            assert_eq!(filter.max_level_hint(), Some(LevelFilter::TRACE));
        }

        #[test]
        fn missing_or_broken_env_uses_default() {
            let filter = filter_from(|_| None, "warn");
            assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));

            let filter = filter_from(|_| Some("chunkview=loudest".to_string()), "info");
            assert_eq!(filter.max_level_hint(), Some(LevelFilter::INFO));
        }
    }
}
