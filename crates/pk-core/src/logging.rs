//! Console logging setup shared by the bridge binaries.
//!
//! Logs go to stderr so stdout stays free for snapshot output. `RUST_LOG`
//! overrides the default directive when set.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Default directive for a `-v` count: warn, info, debug, then trace.
pub fn directive_for_verbosity(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn,pk_core=info,pk_agent=info",
        1 => "info",
        2 => "info,pk_core=debug,pk_agent=debug",
        _ => "trace",
    }
}

fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(default_directive: &str) -> Result<(), TryInitError> {
    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_filter(env_filter(default_directive));

    Registry::default().with(console).try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_directives_parse() {
        for verbose in 0..5 {
            let directive = directive_for_verbosity(verbose);
            assert!(EnvFilter::try_new(directive).is_ok(), "{directive}");
        }
    }

    #[test]
    fn test_second_init_fails() {
        let _ = init_logging("warn");
        assert!(init_logging("warn").is_err());
    }
}
