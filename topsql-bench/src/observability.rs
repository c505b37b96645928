//! Log output of the benchmark binary.

use std::env;

use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, prelude::*};

/// Installs the global subscriber, logging to stderr so stdout stays free for the report.
pub fn init_tracing() {
    let (level, env_filter) = parse_rust_log();
    let format = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    tracing_subscriber::registry()
        .with(format.with_filter(LevelFilter::from(level)))
        .with(env_filter)
        .init();
}

/// Reads `RUST_LOG` as either a plain level or a full filter directive.
pub fn parse_rust_log() -> (Level, EnvFilter) {
    // Try to parse RUST_LOG as a simple level filter and apply default levels internally.
    // Otherwise, use it literally if the user knows which overrides they want to run.
    let level = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => match value.parse::<Level>() {
            Ok(level) => level,
            Err(_) => return (Level::TRACE, EnvFilter::new(value)),
        },
        Err(_) => Level::INFO,
    };

    // This is the maximum verbosity that will be logged, we filter this down to `level`.
    // sqlx logs every statement at INFO.
    let env_filter = EnvFilter::new(
        "INFO,\
        sqlx=WARN,\
        h2=WARN,\
        topsql_bench=TRACE,\
        topsql_store=TRACE,\
        topsql_types=TRACE,\
        ",
    );

    (level, env_filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_level() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("RUST_LOG", "debug");
            let (level, _) = parse_rust_log();
            assert_eq!(level, Level::DEBUG);
            Ok(())
        });
    }

    #[test]
    fn literal_filter() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("RUST_LOG", "topsql_bench::worker=debug");
            let (level, _) = parse_rust_log();
            assert_eq!(level, Level::TRACE);
            Ok(())
        });
    }
}
