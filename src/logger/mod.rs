//! Structured logging setup.
//!
//! Components log through the plain `log` facade macros (`log::info!`,
//! `log::warn!`, ...), the same macros the lock negotiator and sync manager
//! use. [`init`] builds the `slog` backend once at daemon start and bridges
//! it into that facade, so call sites never depend on `slog` directly and
//! there is no implicit global drain to reach for.

mod drain;

use std::sync::atomic::{AtomicUsize, Ordering};

use slog::Drain as _;
pub use slog::Level;

use self::drain::MultiDrain;

static LOG_LEVEL: AtomicUsize = AtomicUsize::new(Level::Info as usize);

pub fn get_log_level() -> Option<Level> {
    Level::from_usize(LOG_LEVEL.load(Ordering::Relaxed))
}

pub fn set_log_level(level: Level) {
    LOG_LEVEL.store(level.as_usize(), Ordering::SeqCst);
}

/// Keeps the `slog`/`log` bridge alive for the daemon's lifetime. Dropping
/// it restores whatever global logger (if any) was installed before.
pub struct LoggerGuard {
    _scope: slog_scope::GlobalLoggerGuard,
}

/// Builds the console drain (and an optional extra drain, e.g. an audit file
/// writer), wraps both in an async drain so logging never blocks the caller,
/// and installs the result as the backend for the `log` facade.
pub fn init(level: Level, extra: Option<Box<dyn slog::Drain<Ok = (), Err = slog::Never> + Send>>) -> LoggerGuard {
    set_log_level(level);

    let decorator = slog_term::TermDecorator::new().build();
    let console = slog_term::FullFormat::new(decorator).build().fuse();

    let mut multi = MultiDrain::default();
    multi.add(console);
    if let Some(extra) = extra {
        multi.add(extra);
    }

    let async_drain = slog_async::Async::new(multi).build().filter_level(level).fuse();
    let logger = slog::Logger::root(async_drain, slog::o!());

    let scope_guard = slog_scope::set_global_logger(logger);
    let _ = slog_stdlog::init_with_level(level_to_log(level));

    LoggerGuard { _scope: scope_guard }
}

fn level_to_log(level: Level) -> log::Level {
    match level {
        Level::Critical | Level::Error => log::Level::Error,
        Level::Warning => log::Level::Warn,
        Level::Info => log::Level::Info,
        Level::Debug => log::Level::Debug,
        Level::Trace => log::Level::Trace,
    }
}
