use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// A warn+ event retained for runtime inspection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub id: u64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: Option<String>,
    pub household_id: Option<String>,
    pub event_type: Option<String>,
}

/// Filters for [`DiagnosticsBuffer::query`].
#[derive(Clone, Debug, Default)]
pub struct DiagnosticQuery {
    pub level: Option<String>,
    pub target: Option<String>,
    pub household_id: Option<String>,
    pub event_type: Option<String>,
    pub limit: Option<usize>,
}

struct Ring {
    records: VecDeque<DiagnosticRecord>,
    next_id: u64,
}

/// Bounded in-memory store of the most recent warn+ events. Oldest records are evicted first.
pub struct DiagnosticsBuffer {
    ring: Mutex<Ring>,
    capacity: usize,
}

impl DiagnosticsBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(Ring {
                records: VecDeque::with_capacity(capacity),
                next_id: 1,
            }),
            capacity,
        }
    }

    fn insert(&self, entry: DiagnosticEntry) {
        let mut ring = self.ring.lock();
        let id = ring.next_id;
        ring.next_id += 1;
        if ring.records.len() == self.capacity {
            let _ = ring.records.pop_front();
        }
        ring.records.push_back(DiagnosticRecord {
            id,
            timestamp: entry.timestamp,
            level: entry.level,
            target: entry.target,
            message: entry.message,
            fields: entry.fields,
            household_id: entry.household_id,
            event_type: entry.event_type,
        });
    }

    /// Matching records, most recent first. Default limit is 100.
    pub fn query(&self, q: &DiagnosticQuery) -> Vec<DiagnosticRecord> {
        let ring = self.ring.lock();
        ring.records
            .iter()
            .rev()
            .filter(|r| q.level.as_deref().is_none_or(|l| r.level == l))
            .filter(|r| q.target.as_deref().is_none_or(|t| r.target.contains(t)))
            .filter(|r| {
                q.household_id
                    .as_deref()
                    .is_none_or(|h| r.household_id.as_deref() == Some(h))
            })
            .filter(|r| {
                q.event_type
                    .as_deref()
                    .is_none_or(|e| r.event_type.as_deref() == Some(e))
            })
            .take(q.limit.unwrap_or(100))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.ring.lock().records.clear();
    }
}

struct DiagnosticEntry {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    fields: Option<String>,
    household_id: Option<String>,
    event_type: Option<String>,
}

/// tracing Layer that copies warn+ events into a [`DiagnosticsBuffer`].
pub struct DiagnosticsLayer {
    buffer: Arc<DiagnosticsBuffer>,
}

impl DiagnosticsLayer {
    pub fn new(buffer: Arc<DiagnosticsBuffer>) -> Self {
        Self { buffer }
    }
}

struct FieldVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
    household_id: Option<String>,
    event_type: Option<String>,
}

impl FieldVisitor {
    fn new() -> Self {
        Self {
            message: None,
            fields: serde_json::Map::new(),
            household_id: None,
            event_type: None,
        }
    }

    fn record_text(&mut self, name: &str, value: String) {
        match name {
            "message" => self.message = Some(value),
            "household_id" => self.household_id = Some(value),
            "event_type" => self.event_type = Some(value),
            name => {
                let _ = self
                    .fields
                    .insert(name.to_string(), serde_json::Value::String(value));
            }
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let val = format!("{value:?}");
        let val = if field.name() == "message" {
            val
        } else {
            val.trim_matches('"').to_string()
        };
        self.record_text(field.name(), val);
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_text(field.name(), value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        let _ = self
            .fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        let _ = self
            .fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        let _ = self
            .fields
            .insert(field.name().to_string(), serde_json::Value::Bool(value));
    }
}

/// Stored on spans so child events inherit `household_id` / `event_type`.
struct SpanFields {
    household_id: Option<String>,
    event_type: Option<String>,
}

impl<S> Layer<S> for DiagnosticsLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut visitor = FieldVisitor::new();
        event.record(&mut visitor);

        if visitor.household_id.is_none() || visitor.event_type.is_none() {
            if let Some(scope) = ctx.event_scope(event) {
                for span in scope {
                    let extensions = span.extensions();
                    if let Some(fields) = extensions.get::<SpanFields>() {
                        if visitor.household_id.is_none() {
                            visitor.household_id.clone_from(&fields.household_id);
                        }
                        if visitor.event_type.is_none() {
                            visitor.event_type.clone_from(&fields.event_type);
                        }
                    }
                }
            }
        }

        let fields = if visitor.fields.is_empty() {
            None
        } else {
            serde_json::to_string(&visitor.fields).ok()
        };

        self.buffer.insert(DiagnosticEntry {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string().to_uppercase(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields,
            household_id: visitor.household_id,
            event_type: visitor.event_type,
        });
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::new();
        attrs.record(&mut visitor);

        if visitor.household_id.is_some() || visitor.event_type.is_some() {
            if let Some(span) = ctx.span(id) {
                span.extensions_mut().insert(SpanFields {
                    household_id: visitor.household_id,
                    event_type: visitor.event_type,
                });
            }
        }
    }
}
