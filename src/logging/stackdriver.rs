//! Google structured-log JSON formatting.
//!
//! Each event becomes a single JSON object on its own line, using the field
//! names Cloud Logging understands natively: `severity`, `timestamp`,
//! `logging.googleapis.com/sourceLocation`, `logging.googleapis.com/trace`
//! and `logging.googleapis.com/spanId`. Records are never mutated after
//! emission; stdout is the only sink.

use crate::trace::TraceContext;
use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Formatter emitting one Google structured-log JSON object per event.
pub struct StackdriverLogFormat {
    project_id: Option<String>,
}

impl StackdriverLogFormat {
    /// Creates the formatter. Without a project id the trace field is
    /// omitted entirely; the span id is attached regardless.
    pub fn new(project_id: Option<String>) -> StackdriverLogFormat {
        StackdriverLogFormat { project_id }
    }

    fn build_record(&self, event: &Event<'_>) -> Map<String, Value> {
        let metadata = event.metadata();

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let mut record = Map::new();
        record.insert("severity".to_string(), json!(severity(metadata.level())));
        record.insert(
            "message".to_string(),
            json!(visitor.message.unwrap_or_default()),
        );
        record.insert(
            "timestamp".to_string(),
            json!(Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()),
        );
        record.insert(
            "logging.googleapis.com/sourceLocation".to_string(),
            json!({
                "file": metadata.file(),
                "line": metadata.line(),
                "function": metadata.target(),
            }),
        );
        record.insert(
            "logging.googleapis.com/labels".to_string(),
            json!({ "rust_logger": metadata.target() }),
        );

        if let Some(context) = TraceContext::current() {
            if let Some(project_id) = &self.project_id {
                record.insert(
                    "logging.googleapis.com/trace".to_string(),
                    json!(format!("projects/{}/traces/{}", project_id, context.trace_id)),
                );
            }
            record.insert(
                "logging.googleapis.com/spanId".to_string(),
                json!(context.span_id),
            );
        }

        for (name, value) in visitor.fields {
            record.insert(name, value);
        }

        record
    }
}

impl<S, N> FormatEvent<S, N> for StackdriverLogFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let record = self.build_record(event);

        writeln!(writer, "{}", Value::Object(record))
    }
}

fn severity(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARNING",
        Level::INFO => "INFO",
        Level::DEBUG => "DEBUG",
        Level::TRACE => "DEBUG",
    }
}

/// Collects event fields. The `message` field becomes the record's message;
/// everything else lands as an additional top-level JSON key. Error values
/// are serialized as plain strings under `exception`.
#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Vec<(String, Value)>,
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        } else {
            self.fields
                .push((field.name().to_string(), json!(format!("{:?}", value))));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.push((field.name().to_string(), json!(value)));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.push((field.name().to_string(), json!(value)));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.push((field.name().to_string(), json!(value)));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.push((field.name().to_string(), json!(value)));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.push((field.name().to_string(), json!(value)));
    }

    fn record_error(&mut self, _field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.fields
            .push(("exception".to_string(), json!(value.to_string())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        fn lines(&self) -> Vec<Value> {
            let buffer = self.0.lock().unwrap();
            String::from_utf8(buffer.clone())
                .unwrap()
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        }
    }

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Capture {
        type Writer = Capture;

        fn make_writer(&'a self) -> Capture {
            self.clone()
        }
    }

    fn subscriber_with(
        capture: Capture,
        project_id: Option<String>,
    ) -> impl Subscriber + Send + Sync {
        tracing_subscriber::registry::Registry::default().with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .event_format(StackdriverLogFormat::new(project_id))
                .with_writer(capture),
        )
    }

    #[test]
    fn records_carry_severity_message_timestamp_and_location() {
        let capture = Capture::default();
        let _guard = tracing::subscriber::set_default(subscriber_with(capture.clone(), None));

        tracing::warn!("something odd happened");

        let lines = capture.lines();
        assert_eq!(lines.len(), 1);

        let record = &lines[0];
        assert_eq!(record["severity"], "WARNING");
        assert_eq!(record["message"], "something odd happened");

        let timestamp = record["timestamp"].as_str().unwrap();
        assert!(timestamp.ends_with('Z'));
        assert!(timestamp.contains('.'));

        let location = &record["logging.googleapis.com/sourceLocation"];
        assert!(location["file"].as_str().unwrap().contains("stackdriver"));
        assert!(location["line"].as_u64().unwrap() > 0);
        assert!(!location["function"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn trace_fields_are_attached_inside_a_request_scope() {
        let capture = Capture::default();
        let _guard = tracing::subscriber::set_default(subscriber_with(capture.clone(), Some("my-project".to_string())));

        let context = TraceContext::generate();
        let expected_trace = format!("projects/my-project/traces/{}", context.trace_id);
        let expected_span = context.span_id.clone();

        context
            .scope(async {
                tracing::info!("inside request");
            })
            .await;

        let record = &capture.lines()[0];
        assert_eq!(record["logging.googleapis.com/trace"], json!(expected_trace));
        assert_eq!(record["logging.googleapis.com/spanId"], json!(expected_span));
    }

    #[tokio::test]
    async fn span_id_attaches_even_without_a_project_id() {
        let capture = Capture::default();
        let _guard = tracing::subscriber::set_default(subscriber_with(capture.clone(), None));

        TraceContext::generate()
            .scope(async {
                tracing::info!("no project configured");
            })
            .await;

        let record = &capture.lines()[0];
        assert!(record.get("logging.googleapis.com/trace").is_none());
        assert!(record.get("logging.googleapis.com/spanId").is_some());
    }

    #[test]
    fn records_omit_trace_fields_outside_of_a_request() {
        let capture = Capture::default();
        let _guard = tracing::subscriber::set_default(subscriber_with(capture.clone(), Some("my-project".to_string())));

        tracing::info!("startup message");

        let record = &capture.lines()[0];
        assert!(record.get("logging.googleapis.com/trace").is_none());
        assert!(record.get("logging.googleapis.com/spanId").is_none());
    }

    #[test]
    fn extra_event_fields_become_top_level_keys() {
        let capture = Capture::default();
        let _guard = tracing::subscriber::set_default(subscriber_with(capture.clone(), None));

        tracing::info!(status_code = 404u64, request_path = "/v1/url", "lookup failed");

        let record = &capture.lines()[0];
        assert_eq!(record["message"], "lookup failed");
        assert_eq!(record["status_code"], 404);
        assert_eq!(record["request_path"], "/v1/url");
    }
}
