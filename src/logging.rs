//! Log plumbing.
//!
//! Internally everything goes through `tracing`. Hosts that want the
//! mode's user-facing messages (activation, failures) in their own console
//! implement [`LogSink`]; the default [`TracingSink`] forwards to `tracing`.

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Severity of a host-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        })
    }
}

/// Receiver of host-facing messages.
pub trait LogSink: Send + Sync {
    fn log(&self, message: &str, severity: Severity);
}

/// Forwards to the `tracing` macros.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Debug => tracing::debug!(target: "raymode", "{message}"),
            Severity::Info => tracing::info!(target: "raymode", "{message}"),
            Severity::Warn => tracing::warn!(target: "raymode", "{message}"),
            Severity::Error => tracing::error!(target: "raymode", "{message}"),
        }
    }
}

impl<F> LogSink for F
where
    F: Fn(&str, Severity) + Send + Sync,
{
    fn log(&self, message: &str, severity: Severity) {
        self(message, severity)
    }
}

/// Keeps the Chrome trace writer alive; flushes on drop.
#[must_use = "dropping the guard stops trace recording"]
pub struct LoggingGuard {
    #[cfg(feature = "chrome-trace")]
    _chrome: Option<tracing_chrome::FlushGuard>,
}

/// Install the global subscriber.
///
/// Filter comes from `RAYMODE_LOG`, then `RUST_LOG`, then `info`. With the
/// `chrome-trace` feature and `RAYMODE_TRACE=1`, spans are also written to
/// `trace.json`. Safe to call more than once; later calls leave the first
/// subscriber in place.
pub fn init() -> LoggingGuard {
    let filter = std::env::var("RAYMODE_LOG")
        .ok()
        .and_then(|s| EnvFilter::try_new(s).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let fmt = tracing_subscriber::fmt::layer().with_target(true);

    #[cfg(feature = "chrome-trace")]
    {
        let (chrome, guard) = if std::env::var("RAYMODE_TRACE").ok().as_deref() == Some("1") {
            let (layer, guard) = tracing_chrome::ChromeLayerBuilder::new().file("trace.json").build();
            (Some(layer), Some(guard))
        } else {
            (None, None)
        };

        let installed = tracing_subscriber::registry()
            .with(filter)
            .with(fmt)
            .with(chrome)
            .try_init()
            .is_ok();

        LoggingGuard {
            _chrome: if installed { guard } else { None },
        }
    }

    #[cfg(not(feature = "chrome-trace"))]
    {
        let _ = tracing_subscriber::registry().with(filter).with(fmt).try_init();
        LoggingGuard {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_closure_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |msg: &str, sev: Severity| seen.lock().push((msg.to_string(), sev))
        };
        sink.log("hello", Severity::Warn);
        assert_eq!(seen.lock().as_slice(), &[("hello".to_string(), Severity::Warn)]);
    }

    #[test]
    fn test_init_is_idempotent() {
        let _a = init();
        let _b = init();
        TracingSink.log("still fine", Severity::Info);
    }

    #[test]
    fn test_severity_order_and_display() {
        assert!(Severity::Error > Severity::Warn);
        assert_eq!(Severity::Info.to_string(), "info");
    }
}
