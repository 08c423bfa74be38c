//! The event-logger collaborator and the vocabulary of the events handed to it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

/// Name of every event created by the tracker.
pub const EVENT_NAME: &str = "outbound_requests_log";

/// The `type` tag, holding the HTTP method.
pub const TAG_TYPE: &str = "type";
/// The `domain` tag, absent when the URL has no host.
pub const TAG_DOMAIN: &str = "domain";
/// The `status` tag, the response status or a synthetic status for transport failures.
pub const TAG_STATUS: &str = "status";

/// The `url` field.
pub const URL: &str = "url";
/// The `requestHeaders` field, from [`AnalyticsDetailLevel::Detailed`] on.
///
/// [`AnalyticsDetailLevel::Detailed`]: crate::AnalyticsDetailLevel::Detailed
pub const REQUEST_HEADERS: &str = "requestHeaders";
/// The `options` field, from [`AnalyticsDetailLevel::Detailed`] on.
///
/// [`AnalyticsDetailLevel::Detailed`]: crate::AnalyticsDetailLevel::Detailed
pub const OPTIONS: &str = "options";
/// The `data` field, the request payload.
pub const DATA: &str = "data";
/// The `responseHeaders` field.
pub const RESPONSE_HEADERS: &str = "responseHeaders";
/// The `responseBody` field. Carries the error message for failed calls.
pub const RESPONSE_BODY: &str = "responseBody";
/// The `executionTime` field, in seconds.
pub const EXECUTION_TIME: &str = "executionTime";
/// The `startTimestamp` field, in seconds since the epoch.
pub const START_TIMESTAMP: &str = "startTimestamp";
/// The `endTimestamp` field, in seconds since the epoch.
pub const END_TIMESTAMP: &str = "endTimestamp";
/// The `ip` field, the address the transport connected to.
pub const IP: &str = "ip";
/// The `nameLookupTime` field.
pub const NAME_LOOKUP_TIME: &str = "nameLookupTime";
/// The `connectTime` field.
pub const CONNECT_TIME: &str = "connectTime";
/// The `preTransferTime` field.
pub const PRE_TRANSFER_TIME: &str = "preTransferTime";
/// The `startTransferTime` field.
pub const START_TRANSFER_TIME: &str = "startTransferTime";
/// The `sizeDownload` field, in bytes.
pub const SIZE_DOWNLOAD: &str = "sizeDownload";

/// Tags of an event. A `None` value is an explicitly empty tag.
pub type Tags = BTreeMap<String, Option<String>>;

/// Fields of an event.
pub type Fields = BTreeMap<String, FieldValue>;

/// The value of a single event field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Numeric view of the value, parsing text if needed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Null => None,
            FieldValue::Text(text) => text.trim().parse().ok(),
            FieldValue::Integer(value) => Some(*value as f64),
            FieldValue::Float(value) => Some(*value),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_owned())
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        i64::try_from(value)
            .map(FieldValue::Integer)
            .unwrap_or(FieldValue::Float(value as f64))
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// Creates draft events. Implemented by the analytics backend.
pub trait EventLogger {
    type Event: AnalyticsEvent;

    fn new_event(&self, name: &str) -> Self::Event;
}

impl<T: EventLogger + ?Sized> EventLogger for Arc<T> {
    type Event = T::Event;

    fn new_event(&self, name: &str) -> Self::Event {
        (**self).new_event(name)
    }
}

/// A draft analytics event.
///
/// The tracker owns each draft exclusively until [`record`](AnalyticsEvent::record) hands it
/// back to the backend, which happens at most once per call.
pub trait AnalyticsEvent {
    /// Merge tags into the event, replacing existing tags of the same name.
    fn add_tags(&mut self, tags: Tags);

    /// Merge fields into the event, replacing existing fields of the same name.
    fn add_fields(&mut self, fields: Fields);

    /// Fields accumulated so far.
    fn fields(&self) -> &Fields;

    /// Stamp the event with the current time.
    fn record_timestamp(&mut self);

    fn set_trace_id(&mut self, trace_id: &str);

    fn set_span_id(&mut self, span_id: &str);

    fn set_parent_span_id(&mut self, parent_span_id: &str);

    /// Durably write the event.
    fn record(self);
}
