use std::sync::Arc;

use parking_lot::Mutex;

use crate::event::{AnalyticsEvent, EventLogger, Fields, Tags};

/// An event as it was handed to [`AnalyticsEvent::record`].
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct RecordedEvent {
    pub name: String,
    pub tags: Tags,
    pub fields: Fields,
    pub timestamped: bool,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub parent_span_id: Option<String>,
}

/// Event logger keeping every recorded event in memory.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingLogger {
    created: Arc<Mutex<usize>>,
    recorded: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl RecordingLogger {
    pub fn created(&self) -> usize {
        *self.created.lock()
    }

    pub fn recorded(&self) -> Vec<RecordedEvent> {
        self.recorded.lock().clone()
    }

    pub fn single(&self) -> RecordedEvent {
        let recorded = self.recorded();
        assert_eq!(recorded.len(), 1, "expected exactly one recorded event");
        recorded.into_iter().next().unwrap()
    }
}

impl EventLogger for RecordingLogger {
    type Event = RecordingEvent;

    fn new_event(&self, name: &str) -> RecordingEvent {
        *self.created.lock() += 1;
        RecordingEvent {
            sink: self.recorded.clone(),
            event: RecordedEvent {
                name: name.to_owned(),
                ..Default::default()
            },
        }
    }
}

#[derive(Debug)]
pub(crate) struct RecordingEvent {
    sink: Arc<Mutex<Vec<RecordedEvent>>>,
    event: RecordedEvent,
}

impl AnalyticsEvent for RecordingEvent {
    fn add_tags(&mut self, tags: Tags) {
        self.event.tags.extend(tags);
    }

    fn add_fields(&mut self, fields: Fields) {
        self.event.fields.extend(fields);
    }

    fn fields(&self) -> &Fields {
        &self.event.fields
    }

    fn record_timestamp(&mut self) {
        self.event.timestamped = true;
    }

    fn set_trace_id(&mut self, trace_id: &str) {
        self.event.trace_id = Some(trace_id.to_owned());
    }

    fn set_span_id(&mut self, span_id: &str) {
        self.event.span_id = Some(span_id.to_owned());
    }

    fn set_parent_span_id(&mut self, parent_span_id: &str) {
        self.event.parent_span_id = Some(parent_span_id.to_owned());
    }

    fn record(self) {
        self.sink.lock().push(self.event);
    }
}
