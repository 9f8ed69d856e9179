//! Logging setup
//!
//! The CLI installs a global subscriber writing to stdout and a log file.
//! Library users and tests can install the same stack for a limited scope;
//! dropping the returned guard restores the previous subscriber. Noisy
//! messages are filtered by a [`SuppressionLayer`] configured with plain
//! substring patterns.

use anyhow::{Context as _, Result};
use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{error, info, Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer};

/// Logging configuration injected at start-up
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info,civicsphere_sdk_core=debug`.
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Events whose message contains any of these are dropped
    pub suppress: Vec<String>,
    /// Optional log file, appended to
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info,civicsphere_sdk_core=debug".to_string(),
            suppress: Vec::new(),
            file: None,
        }
    }
}

impl LogConfig {
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Self::default()
        }
    }

    pub fn suppress(mut self, pattern: impl Into<String>) -> Self {
        self.suppress.push(pattern.into());
        self
    }

    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }
}

/// Drops events whose message matches a suppression pattern
#[derive(Debug, Clone, Default)]
pub struct SuppressionLayer {
    patterns: Arc<Vec<String>>,
}

impl SuppressionLayer {
    pub fn new(patterns: Vec<String>) -> Self {
        Self {
            patterns: Arc::new(patterns.into_iter().filter(|p| !p.is_empty()).collect()),
        }
    }

    pub fn is_suppressed(&self, message: &str) -> bool {
        self.patterns.iter().any(|p| message.contains(p.as_str()))
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        }
    }
}

impl<S: Subscriber> Layer<S> for SuppressionLayer {
    fn event_enabled(&self, event: &Event<'_>, _ctx: Context<'_, S>) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        !self.is_suppressed(&visitor.message)
    }
}

/// Installs the global subscriber (stdout plus optional file)
pub fn init_logger(config: &LogConfig) -> Result<()> {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    let file_layer = match &config.file {
        Some(path) => {
            let log_file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(log_file)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(false)
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(config.filter())
        .with(SuppressionLayer::new(config.suppress.clone()))
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .context("a global subscriber is already installed")?;

    if let Some(path) = &config.file {
        info!("[Logging] 📝 writing to stdout and {}", path.display());
    }
    Ok(())
}

/// Scoped logging, released when the guard drops
pub struct LoggingGuard {
    _default: DefaultGuard,
}

/// Installs the logging stack for the current thread until the guard drops
pub fn scoped(config: &LogConfig) -> LoggingGuard {
    scoped_with_writer(config, io::stderr)
}

/// Same as [`scoped`], writing to a custom sink
pub fn scoped_with_writer<W>(config: &LogConfig, writer: W) -> LoggingGuard
where
    W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let subscriber = tracing_subscriber::registry()
        .with(config.filter())
        .with(SuppressionLayer::new(config.suppress.clone()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_target(false)
                .with_ansi(false),
        );
    LoggingGuard {
        _default: tracing::subscriber::set_default(subscriber),
    }
}

/// Logs panics that would otherwise only reach stderr
pub fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic_info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        error!("[Panic] 💥 {} at {}", payload, location);
        previous(panic_info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tracing::warn;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
        }
    }

    #[test]
    fn suppressed_messages_are_dropped_while_scoped() {
        let capture = Capture::default();
        let sink = capture.clone();
        let config = LogConfig::new("debug").suppress("ResizeObserver");
        {
            let _guard = scoped_with_writer(&config, move || sink.clone());
            warn!("ResizeObserver loop limit exceeded");
            warn!("profile saved");
        }
        // released: nothing after the guard reaches the capture
        warn!("after scope");

        let text = capture.text();
        assert!(!text.contains("ResizeObserver"));
        assert!(text.contains("profile saved"));
        assert!(!text.contains("after scope"));
    }

    #[test]
    fn empty_patterns_suppress_nothing() {
        let layer = SuppressionLayer::new(vec![String::new()]);
        assert!(!layer.is_suppressed("anything"));
    }
}
