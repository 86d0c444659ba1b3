//! Tracing setup for the process, with optional reporting of log lines to
//! the remote authority.

use std::fmt;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::field::{Field, Visit};
use tracing::{Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::protocol::{Event, LocalCommand};
use crate::store::Record;

/// Maps a level name to a level; unknown names mean `info`.
pub fn parse_level(name: &str) -> Level {
    match name.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" | "warning" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Initialize tracing/logging for the application.
pub fn init(default_level: &str) {
    init_with_report(default_level, None);
}

/// Like [`init`], with log lines at or above the report layer's level also
/// sent to the remote authority.
pub fn init_with_report(default_level: &str, report: Option<ReportLayer>) {
    let level = parse_level(default_level);

    // Use try_init so tests and libraries can call this multiple times without panicking
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_filter(LevelFilter::from_level(level)),
        )
        .with(report)
        .try_init();
}

/// Turns log events into `info` device events on the internal queue.
///
/// Debug and trace lines are never reported: handling an INFO packet logs
/// at debug level itself.
#[derive(Debug, Clone)]
pub struct ReportLayer {
    level: Level,
    queue: UnboundedSender<Event>,
}

impl ReportLayer {
    pub fn new(level: Level, queue: UnboundedSender<Event>) -> Self {
        let level = if level > Level::INFO { Level::INFO } else { level };
        Self { level, queue }
    }

    pub fn level(&self) -> Level {
        self.level
    }
}

impl<S: Subscriber> Layer<S> for ReportLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() > self.level || meta.target().starts_with(module_path!()) {
            return;
        }

        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let mut payload = Record::new();
        payload.insert(
            "level".to_string(),
            Value::from(meta.level().to_string().to_lowercase()),
        );
        payload.insert(
            "message".to_string(),
            Value::from(fields.message.unwrap_or_default()),
        );
        payload.insert("target".to_string(), Value::from(meta.target()));
        payload.insert(
            "logged_at".to_string(),
            Value::from(chrono::Utc::now().timestamp()),
        );
        if !fields.values.is_empty() {
            payload.insert("fields".to_string(), Value::Object(fields.values));
        }

        // A closed queue means the router is gone; nothing left to report to.
        let _ = self
            .queue
            .send(Event::device(LocalCommand::Info.as_str(), Some(payload)));
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    values: Record,
}

impl FieldCollector {
    fn insert(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
        } else {
            self.values.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::from(format!("{value:?}")));
    }
}
