use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use reqwest_analytics::{
    AnalyticsDetailLevel, AnalyticsEvent, AnalyticsMiddleware, EventLogger, FieldValue, Fields,
    RequestAnalyticsTracker, Tags, TracingController,
};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};

#[derive(Debug, Clone, Default)]
pub struct Recorded {
    pub tags: Tags,
    pub fields: Fields,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
}

impl Recorded {
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags.get(name).and_then(|value| value.as_deref())
    }

    pub fn field(&self, name: &str) -> &FieldValue {
        self.fields
            .get(name)
            .unwrap_or_else(|| panic!("field `{}` was not recorded", name))
    }
}

/// Event logger keeping recorded events in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogger(Arc<Mutex<Vec<Recorded>>>);

impl MemoryLogger {
    pub fn events(&self) -> Vec<Recorded> {
        self.0.lock().clone()
    }

    pub fn only_event(&self) -> Recorded {
        let events = self.events();
        assert_eq!(events.len(), 1, "expected exactly one event");
        events[0].clone()
    }
}

impl EventLogger for MemoryLogger {
    type Event = MemoryEvent;

    fn new_event(&self, _name: &str) -> MemoryEvent {
        MemoryEvent {
            sink: self.0.clone(),
            event: Recorded::default(),
        }
    }
}

pub struct MemoryEvent {
    sink: Arc<Mutex<Vec<Recorded>>>,
    event: Recorded,
}

impl AnalyticsEvent for MemoryEvent {
    fn add_tags(&mut self, tags: Tags) {
        self.event.tags.extend(tags);
    }

    fn add_fields(&mut self, fields: Fields) {
        self.event.fields.extend(fields);
    }

    fn fields(&self) -> &Fields {
        &self.event.fields
    }

    fn record_timestamp(&mut self) {}

    fn set_trace_id(&mut self, trace_id: &str) {
        self.event.trace_id = Some(trace_id.to_owned());
    }

    fn set_span_id(&mut self, span_id: &str) {
        self.event.span_id = Some(span_id.to_owned());
    }

    fn set_parent_span_id(&mut self, _parent_span_id: &str) {}

    fn record(self) {
        self.sink.lock().push(self.event);
    }
}

/// Tracing controller with a fixed trace that counts child spans.
#[derive(Debug, Default)]
pub struct StaticController {
    pub started: AtomicUsize,
    pub stopped: AtomicUsize,
}

impl StaticController {
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl TracingController for StaticController {
    fn trace_id(&self) -> Option<String> {
        Some("4bf92f3577b34da6a3ce929d0e0e4736".into())
    }

    fn span_id(&self) -> Option<String> {
        Some("00f067aa0ba902b7".into())
    }

    fn parent_span_id(&self) -> Option<String> {
        None
    }

    fn is_valid_span_id(&self, candidate: &str) -> bool {
        candidate.len() == 16
    }

    fn new_span_id(&self) -> String {
        "b7ad6b7169203331".into()
    }

    fn start_child_span(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn stop_child_span(&self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }

    fn span_specific_tags(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("service".to_string(), "checkout".to_string())])
    }
}

pub type Tracker = RequestAnalyticsTracker<MemoryLogger, Arc<StaticController>>;

pub struct Harness {
    pub client: ClientWithMiddleware,
    pub logger: MemoryLogger,
    pub controller: Arc<StaticController>,
    pub tracker: Arc<Mutex<Tracker>>,
}

impl Harness {
    pub fn new(level: AnalyticsDetailLevel) -> Self {
        Self::with_client(level, reqwest::Client::new())
    }

    pub fn with_client(level: AnalyticsDetailLevel, client: reqwest::Client) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();

        let logger = MemoryLogger::default();
        let controller = Arc::new(StaticController::default());

        let mut tracker = RequestAnalyticsTracker::new(logger.clone(), controller.clone());
        tracker.set_analytics_detail_level(level);

        let middleware = AnalyticsMiddleware::new(tracker);
        let tracker = middleware.tracker().clone();

        Self {
            client: ClientBuilder::new(client).with(middleware).build(),
            logger,
            controller,
            tracker,
        }
    }
}
