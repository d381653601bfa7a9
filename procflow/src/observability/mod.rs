//! Logging setup and timing helpers.
//!
//! Library code only emits `tracing` events; applications call
//! [`init_tracing`] once to install a subscriber.

use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Installs a global `fmt` subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over `level`. Returns false if a subscriber
/// was already installed.
pub fn init_tracing(level: &str, json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}

/// Measures wall time of a pipeline or process run.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts timing `name`.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the timed name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the timer and returns the duration in milliseconds.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_timer() {
        let timer = SpanTimer::start("P1");
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(timer.name(), "P1");
        assert!(timer.finish() >= 5.0);
    }

    #[test]
    fn test_init_tracing_twice() {
        let _ = init_tracing("debug", false);
        assert!(!init_tracing("info", true));
    }
}
