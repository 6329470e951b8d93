use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter directive for a `-v` count when `RUST_LOG` is unset
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "pingpoll=info,warn",
        2 => "pingpoll=debug,info",
        _ => "trace",
    }
}

/// Install the global subscriber, logging to stderr
///
/// `RUST_LOG` takes precedence over the verbosity flag. Stdout is left to
/// CSV/JSON output.
pub fn init_logging(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    // A second call (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbosity >= 2)
                .with_thread_ids(verbosity >= 3),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_parse() {
        for verbosity in 0..4 {
            let directive = default_directive(verbosity);
            assert!(directive.parse::<EnvFilter>().is_ok(), "{}", directive);
        }
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging(0);
        init_logging(3);
    }
}
