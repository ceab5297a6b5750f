//! Observability for the engine
//!
//! The engine logs through `tracing` and never installs a subscriber
//! itself. Every event carries an `event` field taken from [`Event`] so
//! lines can be filtered by name regardless of the subscriber's format.
//!
//! # Usage
//!
//! ```ignore
//! use nestquery::observability::Event;
//!
//! tracing::debug!(event = Event::BranchQuery.as_str(), collection = "articles", keys = 25);
//! ```

mod events;

pub use events::Event;

use tracing_subscriber::EnvFilter;

/// Installs a formatting subscriber filtered by `RUST_LOG` (default `warn`).
///
/// Used by the binary; a second call is a no-op.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
