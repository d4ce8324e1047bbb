//! # Observability
//!
//! Repositories log through the `tracing` crate with structured fields:
//!
//! - `entity_type`: the entity's table name, present on every repository event
//! - `scope`: numeric id of the unit of work the event happened in
//! - `id` / `count`: the identity touched or the number of rows returned
//!
//! Payloads are logged at `debug`, completed operations at `info`, failures and
//! rollbacks at `warn`.
//!
//! ```bash
//! RUST_LOG=info cargo run --bin ormrepo-demo
//! RUST_LOG=ormrepo=debug cargo run --bin ormrepo-demo
//! ```

use std::fmt::Debug;

/// Installs the global subscriber, filtered by `RUST_LOG`.
///
/// Compact output without module targets; the `entity_type` field already says
/// where an event came from.
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}

/// Like [`setup_tracing`] but tolerates an already installed subscriber.
/// Returns `false` when another subscriber was there first.
pub fn try_setup_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .with_test_writer()
        .try_init()
        .is_ok()
}

/// Renders a list for a log line, eliding the middle of long lists.
///
/// Lists of up to `2 * keep` items are printed whole; longer lists show the first
/// and last `keep` items and the total.
pub fn preview<T: Debug>(items: &[T], keep: usize) -> String {
    let total = items.len();
    if total <= keep * 2 {
        return format!("{items:?}");
    }
    format!(
        "{:?} ... {:?} (total: {total})",
        &items[..keep],
        &items[total - keep..]
    )
}
