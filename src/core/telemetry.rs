//! Logging setup for hosts embedding the engine.

use tracing::Level;

/// Install a fmt subscriber at the given level.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_tracing(level: Level) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .try_init()
        .is_ok()
}
