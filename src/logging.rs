//! Process-wide log verbosity.
//!
//! The library only emits `tracing` events. A subscriber is installed the first
//! time [`log_verbosity`] is called with a non-negative level; later calls swap
//! the level filter in place.

use std::sync::atomic::{AtomicI32, Ordering};

use once_cell::sync::OnceCell;
use tracing::warn;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, Registry};

type FilterHandle = reload::Handle<LevelFilter, Registry>;

static VERBOSITY: AtomicI32 = AtomicI32::new(0);
// `None` when another global subscriber was already installed.
static FILTER: OnceCell<Option<FilterHandle>> = OnceCell::new();

/// 0 = off, 1-2 = error, 3 = warn, 4 = info, 5 = debug, 6+ = trace.
pub fn level_filter(level: i32) -> LevelFilter {
    match level {
        i32::MIN..=0 => LevelFilter::OFF,
        1 | 2 => LevelFilter::ERROR,
        3 => LevelFilter::WARN,
        4 => LevelFilter::INFO,
        5 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Set the process-wide log level. Negative levels are ignored.
pub fn log_verbosity(level: i32) {
    if level < 0 {
        return;
    }
    let filter = level_filter(level);
    VERBOSITY.store(level, Ordering::Relaxed);

    let handle = FILTER.get_or_init(|| install(filter));
    if let Some(handle) = handle {
        // Fails only if the subscriber has been dropped, which a global default never is.
        let _ = handle.reload(filter);
    }
}

/// The level most recently accepted by [`log_verbosity`].
pub fn verbosity() -> i32 {
    VERBOSITY.load(Ordering::Relaxed)
}

fn install(filter: LevelFilter) -> Option<FilterHandle> {
    let (filter_layer, handle) = reload::Layer::new(filter);
    match tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_target(false))
        .try_init()
    {
        Ok(()) => Some(handle),
        Err(_) => {
            warn!("another global subscriber is installed, log verbosity has no effect");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        assert_eq!(level_filter(0), LevelFilter::OFF);
        assert_eq!(level_filter(2), LevelFilter::ERROR);
        assert_eq!(level_filter(3), LevelFilter::WARN);
        assert_eq!(level_filter(4), LevelFilter::INFO);
        assert_eq!(level_filter(9), LevelFilter::TRACE);
    }

    #[test]
    fn test_negative_level_ignored() {
        log_verbosity(4);
        log_verbosity(-3);
        assert_eq!(verbosity(), 4);
        log_verbosity(0);
        assert_eq!(verbosity(), 0);
    }
}
