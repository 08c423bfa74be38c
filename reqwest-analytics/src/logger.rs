use serde::Serialize;
use tracing::{info, warn};

use crate::event::{AnalyticsEvent, EventLogger, Fields, Tags};
use crate::timing::{Clock, SystemClock};

/// Target of the `tracing` events emitted by [`TracingEventLogger`].
pub const EVENT_TARGET: &str = "reqwest_analytics::event";

/// [`EventLogger`] that writes every recorded event to `tracing`.
///
/// Each event becomes one `INFO` event with target [`EVENT_TARGET`] carrying the event name,
/// the trace context and the tags and fields as JSON objects, ready for a subscriber that
/// forwards them to an analytics store.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventLogger;

impl EventLogger for TracingEventLogger {
    type Event = TracingEvent;

    fn new_event(&self, name: &str) -> TracingEvent {
        TracingEvent {
            name: name.to_owned(),
            ..Default::default()
        }
    }
}

/// A draft event of [`TracingEventLogger`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TracingEvent {
    name: String,
    timestamp: Option<f64>,
    trace_id: Option<String>,
    span_id: Option<String>,
    parent_span_id: Option<String>,
    tags: Tags,
    fields: Fields,
}

impl TracingEvent {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// The tags and fields rendered as JSON objects.
    fn render(&self) -> (String, String) {
        (to_json(&self.tags), to_json(&self.fields))
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|error| {
        warn!(error = %error, "Failed to serialize analytics event");
        String::from("{}")
    })
}

impl AnalyticsEvent for TracingEvent {
    fn add_tags(&mut self, tags: Tags) {
        self.tags.extend(tags);
    }

    fn add_fields(&mut self, fields: Fields) {
        self.fields.extend(fields);
    }

    fn fields(&self) -> &Fields {
        &self.fields
    }

    fn record_timestamp(&mut self) {
        self.timestamp = Some(SystemClock.now());
    }

    fn set_trace_id(&mut self, trace_id: &str) {
        self.trace_id = Some(trace_id.to_owned());
    }

    fn set_span_id(&mut self, span_id: &str) {
        self.span_id = Some(span_id.to_owned());
    }

    fn set_parent_span_id(&mut self, parent_span_id: &str) {
        self.parent_span_id = Some(parent_span_id.to_owned());
    }

    fn record(self) {
        let (tags, fields) = self.render();
        info!(
            target: EVENT_TARGET,
            event = %self.name,
            timestamp = self.timestamp,
            trace_id = self.trace_id.as_deref(),
            span_id = self.span_id.as_deref(),
            parent_span_id = self.parent_span_id.as_deref(),
            tags = %tags,
            fields = %fields,
            "analytics event"
        );
    }
}
