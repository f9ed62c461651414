//! Tracing setup.
//!
//! Installs a `tracing-subscriber` with env-filter support. `try_init`
//! also bridges the `log` facade (tracing-subscriber's `tracing-log`
//! feature) so modules using `log` macros land in the same output. Safe
//! to call more than once.

use std::sync::Once;

use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Initializes logging for the process. Filtering follows `RUST_LOG`,
/// defaulting to `info` for this crate.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("pedidoflow=info,warn"));

        let _ = fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
    }
}
