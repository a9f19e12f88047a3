//! Structured logging for the CLI.
//!
//! Logs go to stderr so `--format json` output on stdout stays parseable.
//! `RUST_LOG` wins over the verbosity flags.

use crate::config::CliConfig;
use tracing_subscriber::EnvFilter;

fn filter_for(config: &CliConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.verbosity.log_filter()))
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_logging(config: &CliConfig) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter_for(config))
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = if config.log_json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(
            builder.with_ansi(config.color.should_color()).finish(),
        )
    };
    // First subscriber wins
    let _ = result;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Verbosity;

    #[test]
    fn init_logging_is_idempotent() {
        let config = CliConfig::default();
        init_logging(&config);
        init_logging(&config.with_log_json(true));
    }

    #[test]
    fn filter_follows_verbosity_without_rust_log() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = CliConfig::default().with_verbosity(Verbosity::Debug);
        assert_eq!(filter_for(&config).to_string(), "debug");
    }
}
