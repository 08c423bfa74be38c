//! Views of the request and response handed to the tracker, and the level-gated fields taken
//! from them.

use http::HeaderMap;
use reqwest::Url;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::event::{
    FieldValue, Fields, Tags, DATA, OPTIONS, REQUEST_HEADERS, RESPONSE_BODY, RESPONSE_HEADERS,
    TAG_DOMAIN, TAG_STATUS, TAG_TYPE, URL,
};
use crate::AnalyticsDetailLevel;

/// Number of characters of a payload kept at [`AnalyticsDetailLevel::Detailed`].
pub const TRUNCATE_AT: usize = 512;

/// Appended to payloads cut at [`TRUNCATE_AT`].
pub const ELLIPSIS: &str = "...";

/// Request options recorded with the call, such as the timeout.
pub type RequestOptions = serde_json::Map<String, Value>;

/// The payload of an outbound request.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Payload {
    /// No payload, or one that cannot be inspected without consuming it.
    #[default]
    Empty,
    /// A raw text payload.
    Text(String),
    /// Structured data, serialized to JSON when captured.
    Structured(Value),
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_owned())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Structured(value)
    }
}

/// An outbound call about to be sent.
#[derive(Debug, Clone, Copy)]
pub struct OutboundRequest<'a> {
    pub url: &'a str,
    pub method: &'a str,
    pub headers: &'a HeaderMap,
    pub body: &'a Payload,
    pub options: &'a RequestOptions,
}

/// The response a call received.
#[derive(Debug, Clone, Copy)]
pub struct InboundResponse<'a> {
    /// HTTP status code, if the response carried a parsable one.
    pub status: Option<u16>,
    pub headers: &'a HeaderMap,
    pub body: &'a str,
}

/// Host of `url`, or `None` when the URL cannot be parsed or has no host.
pub(crate) fn domain_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_owned))
}

pub(crate) fn request_tags(request: &OutboundRequest<'_>, domain: Option<&str>) -> Tags {
    let mut tags = Tags::from([(TAG_TYPE.to_string(), Some(request.method.to_owned()))]);
    if let Some(domain) = domain {
        tags.insert(TAG_DOMAIN.to_string(), Some(domain.to_owned()));
    }
    tags
}

pub(crate) fn request_fields(level: AnalyticsDetailLevel, request: &OutboundRequest<'_>) -> Fields {
    let mut fields = Fields::from([(URL.to_string(), FieldValue::from(request.url))]);

    if level.at_least(AnalyticsDetailLevel::Detailed) {
        fields.insert(REQUEST_HEADERS.to_string(), headers_field(request.headers));
        fields.insert(OPTIONS.to_string(), json_field(request.options));
    }

    if let Some(data) = payload_field(level, request.body) {
        fields.insert(DATA.to_string(), data);
    }

    fields
}

pub(crate) fn response_tags(response: &InboundResponse<'_>) -> Tags {
    Tags::from([(
        TAG_STATUS.to_string(),
        response.status.map(|status| status.to_string()),
    )])
}

pub(crate) fn response_fields(
    level: AnalyticsDetailLevel,
    response: &InboundResponse<'_>,
) -> Fields {
    let mut fields = Fields::new();

    if level.at_least(AnalyticsDetailLevel::Detailed) {
        fields.insert(RESPONSE_HEADERS.to_string(), headers_field(response.headers));
    }

    match level {
        AnalyticsDetailLevel::Info => {}
        AnalyticsDetailLevel::Detailed => {
            fields.insert(RESPONSE_BODY.to_string(), truncate(response.body).into());
        }
        AnalyticsDetailLevel::Full => {
            fields.insert(RESPONSE_BODY.to_string(), response.body.into());
        }
    }

    fields
}

/// Headers as a JSON object, repeated values joined by `", "`. Empty maps are `null`.
fn headers_field(headers: &HeaderMap) -> FieldValue {
    if headers.is_empty() {
        return FieldValue::Null;
    }

    let mut object = serde_json::Map::new();
    for name in headers.keys() {
        let joined = headers
            .get_all(name)
            .iter()
            .map(|value| String::from_utf8_lossy(value.as_bytes()))
            .collect::<Vec<_>>()
            .join(", ");
        object.insert(name.as_str().to_owned(), Value::String(joined));
    }

    json_field(&object)
}

fn json_field<T: Serialize + ?Sized>(value: &T) -> FieldValue {
    match serde_json::to_string(value) {
        Ok(json) => FieldValue::Text(json),
        Err(error) => {
            warn!(error = %error, "Failed to serialize analytics field");
            FieldValue::Null
        }
    }
}

/// The `data` field for `payload` at `level`, `None` when the level does not capture it.
fn payload_field(level: AnalyticsDetailLevel, payload: &Payload) -> Option<FieldValue> {
    if level == AnalyticsDetailLevel::Info {
        return None;
    }

    let field = match payload {
        Payload::Empty => FieldValue::Null,
        Payload::Structured(value) if is_empty_structure(value) => FieldValue::Null,
        Payload::Structured(value) => json_field(value),
        Payload::Text(text) if level == AnalyticsDetailLevel::Detailed => truncate(text).into(),
        Payload::Text(text) => text.as_str().into(),
    };

    Some(field)
}

fn is_empty_structure(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(entries) => entries.is_empty(),
        _ => false,
    }
}

/// Keeps the first [`TRUNCATE_AT`] characters of `text`, marking the cut with [`ELLIPSIS`].
fn truncate(text: &str) -> String {
    match text.char_indices().nth(TRUNCATE_AT) {
        Some((cut, _)) => format!("{}{}", &text[..cut], ELLIPSIS),
        None => text.to_owned(),
    }
}
