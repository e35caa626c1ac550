//! Tracing initialization
//!
//! The engine emits structured spans and events through `tracing`; hosts
//! that want console output call [`init_tracing`] once at startup. Library
//! embedders with their own subscriber skip this entirely.

use tracing_subscriber::{fmt, EnvFilter};

/// Install a global subscriber honoring `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Like [`init_tracing`], but emits JSON lines for log collectors.
pub fn init_tracing_json() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().json().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_tracing();
        init_tracing();
        init_tracing_json();
    }
}
