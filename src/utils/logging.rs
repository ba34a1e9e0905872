//! Logging initialization and runtime verbosity control

use tracing::info;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, Registry};

const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
const DEFAULT_LEVEL: usize = 2;

/// Handle for stepping the global log verbosity at runtime, driven by the
/// interactive console's `+`/`-` keys.
pub struct LogHandle {
    handle: reload::Handle<EnvFilter, Registry>,
    level: usize,
}

/// Install the global subscriber: reloadable `EnvFilter` (honoring
/// `RUST_LOG`) under a stderr formatter.
pub fn init() -> LogHandle {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(LEVELS[DEFAULT_LEVEL]));
    let (layer, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(layer)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
    LogHandle {
        handle,
        level: DEFAULT_LEVEL,
    }
}

impl LogHandle {
    /// One step more verbose.
    pub fn raise(&mut self) {
        self.step(1);
    }

    /// One step quieter.
    pub fn lower(&mut self) {
        self.step(-1);
    }

    fn step(&mut self, delta: i32) {
        let next = (self.level as i32 + delta).clamp(0, LEVELS.len() as i32 - 1) as usize;
        if next == self.level {
            return;
        }
        self.level = next;
        if self.handle.reload(EnvFilter::new(LEVELS[next])).is_ok() {
            info!("log level set to {}", LEVELS[next]);
        }
    }
}
