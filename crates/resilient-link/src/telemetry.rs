//! Tracing bootstrap for binaries and tests that want log output.

use tracing_subscriber::EnvFilter;

/// Filter used when neither `RUST_LOG` nor an explicit directive is given.
pub const DEFAULT_FILTER: &str = "info,resilient_link=debug";

/// Install a global `fmt` subscriber.
///
/// Precedence: `RUST_LOG`, then `directives`, then [`DEFAULT_FILTER`].
/// Fails if a global subscriber is already set.
pub fn init_tracing(
    directives: Option<&str>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    tracing_subscriber::fmt()
        .with_target(true)
        .with_env_filter(filter(directives))
        .try_init()
}

fn filter(directives: Option<&str>) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    if let Some(value) = directives.filter(|v| !v.trim().is_empty())
        && let Ok(filter) = EnvFilter::try_new(value)
    {
        return filter;
    }

    EnvFilter::new(DEFAULT_FILTER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        let first = init_tracing(Some("warn"));
        let second = init_tracing(Some("warn"));
        // `first` may already fail if another test installed a subscriber.
        let _ = first;
        assert!(second.is_err());
    }
}
