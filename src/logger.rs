//! Tracing setup.
//!
//! Besides the optional file log, every event is rendered as one
//! `[timestamp] LEVEL: message` line into a bounded queue the front end reads.
//! When the queue is full the line is dropped and counted.

use std::fmt::{self, Write as _};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use once_cell::sync::OnceCell;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::level_filters::LevelFilter;
use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Overrides the level-derived filter when set.
pub const LOG_FILTER_ENV: &str = "ROOM_PEER_LOG";

#[derive(Clone, Debug)]
pub struct LogConfig {
    pub level: LevelFilter,
    pub file: Option<PathBuf>,
    /// Capacity of the log-view queue.
    pub view_capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            file: None,
            view_capacity: 256,
        }
    }
}

#[derive(Debug, Error)]
pub enum InitError {
    #[error("logging already initialized")]
    AlreadyInitialized,
    #[error("failed to open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to configure logger: {0}")]
    Configure(String),
}

/// Receiving end of the log view.
pub struct LogView {
    pub lines: mpsc::Receiver<String>,
    dropped: Arc<AtomicU64>,
}

impl LogView {
    /// Lines discarded because the view was not drained in time.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub struct LogViewLayer {
    tx: mpsc::Sender<String>,
    dropped: Arc<AtomicU64>,
}

impl LogViewLayer {
    pub fn new(capacity: usize) -> (Self, LogView) {
        let (tx, lines) = mpsc::channel(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        (
            Self {
                tx,
                dropped: dropped.clone(),
            },
            LogView { lines, dropped },
        )
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

pub fn format_line(level: &tracing::Level, message: &str) -> String {
    let now = chrono::Local::now();
    format!("[{}] {}: {}", now.format("%Y-%m-%d %H:%M:%S%.3f"), level, message)
}

impl<S: Subscriber> Layer<S> for LogViewLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        visitor.message.push_str(&visitor.fields);
        let line = format_line(event.metadata().level(), &visitor.message);
        if self.tx.try_send(line).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

static GUARD: OnceCell<Option<WorkerGuard>> = OnceCell::new();

/// Installs the global subscriber and returns the log view.
///
/// Errors with [`InitError::AlreadyInitialized`] on a second call.
pub fn init(config: &LogConfig) -> Result<LogView, InitError> {
    if GUARD.get().is_some() {
        return Err(InitError::AlreadyInitialized);
    }

    let filter = match std::env::var(LOG_FILTER_ENV) {
        Ok(filter) => EnvFilter::new(filter),
        Err(_) => default_filter(config.level),
    };

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| InitError::Io {
                    path: path.clone(),
                    source,
                })?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(config.level >= LevelFilter::DEBUG)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let (view_layer, view) = LogViewLayer::new(config.view_capacity);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(view_layer)
        .try_init()
        .map_err(|err| InitError::Configure(err.to_string()))?;

    GUARD
        .set(guard)
        .map_err(|_| InitError::AlreadyInitialized)?;
    Ok(view)
}

/// Our crate at `level`; the webrtc stack stays at warn unless tracing.
fn default_filter(level: LevelFilter) -> EnvFilter {
    let deps = if level == LevelFilter::TRACE { "info" } else { "warn" };
    let directive = match level {
        LevelFilter::OFF => "off".to_owned(),
        _ => format!(
            "{deps},room_peer_lib={level},room_peer={level}",
            level = level.to_string().to_lowercase()
        ),
    };
    EnvFilter::new(directive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::subscriber::with_default;

    #[test]
    fn line_has_timestamp_level_and_message() {
        let line = format_line(&tracing::Level::WARN, "Room is full");
        assert!(line.starts_with('['));
        assert!(line.ends_with("] WARN: Room is full"));
    }

    #[test]
    fn view_receives_messages_with_fields() {
        let (layer, mut view) = LogViewLayer::new(4);
        let subscriber = tracing_subscriber::registry().with(layer);
        with_default(subscriber, || {
            tracing::info!(room = "42", "joined room");
        });
        let line = view.lines.try_recv().unwrap();
        assert!(line.ends_with("INFO: joined room room=42"), "{line}");
    }

    #[test]
    fn full_view_drops_lines_instead_of_blocking() {
        let (layer, mut view) = LogViewLayer::new(1);
        let subscriber = tracing_subscriber::registry().with(layer);
        with_default(subscriber, || {
            tracing::info!("one");
            tracing::info!("two");
            tracing::info!("three");
        });
        assert_eq!(view.dropped(), 2);
        assert!(view.lines.try_recv().unwrap().ends_with("one"));
        assert!(view.lines.try_recv().is_err());
    }
}
