//! Outbound request analytics for [`reqwest_middleware`], correlated with distributed tracing.
//!
//! [`RequestAnalyticsTracker`] follows each outbound call from the moment it is sent until it
//! completes, fails or is redirected, and records exactly one `outbound_requests_log` event per
//! call through an [`EventLogger`]. How much of the request and response ends up in the event is
//! decided per call by a [`LevelPolicy`]: URL filters first, then domain filters, then the
//! default [`AnalyticsDetailLevel`]. Every event is stamped with the trace and span ids of a
//! [`TracingController`].
//!
//! Attach [`AnalyticsMiddleware`] to a client to track every request it sends:
//!
//! ```ignore
//! use reqwest_analytics::{
//!     AnalyticsDetailLevel, AnalyticsMiddleware, RegexUrlFilter, RequestAnalyticsTracker,
//!     TracingEventLogger,
//! };
//! use reqwest_middleware::ClientBuilder;
//!
//! let mut tracker = RequestAnalyticsTracker::new(TracingEventLogger, tracing_controller);
//! tracker.set_analytics_detail_level(AnalyticsDetailLevel::Info);
//! tracker.set_url_filter(RegexUrlFilter::from_patterns([
//!     (r"^https://api\.example\.com/payments/", AnalyticsDetailLevel::Full),
//! ]));
//!
//! let client = ClientBuilder::new(reqwest::Client::new())
//!     .with(AnalyticsMiddleware::new(tracker))
//!     .build();
//! ```
//!
//! Transports with their own hook points can drive the tracker directly through its lifecycle
//! methods instead.

mod capture;
mod error;
pub mod event;
mod failure;
mod key;
mod level;
mod logger;
mod middleware;
mod reqwest_failure;
#[cfg(test)]
mod testing;
mod timing;
mod tracing_controller;
mod tracker;

pub use capture::{
    InboundResponse, OutboundRequest, Payload, RequestOptions, ELLIPSIS, TRUNCATE_AT,
};
pub use error::{Error, Result};
pub use event::{AnalyticsEvent, EventLogger, FieldValue, Fields, Tags, EVENT_NAME};
pub use failure::{
    FailureKind, RequestFailure, TransportErrorCode, TransportHandle, TransportInfo,
    TransportSnapshot,
};
pub use key::CorrelationKey;
pub use level::{
    AnalyticsDetailLevel, DomainFilter, LevelPolicy, ParseLevelError, RegexUrlFilter, UrlFilter,
    UrlPattern,
};
pub use logger::{TracingEvent, TracingEventLogger, EVENT_TARGET};
pub use middleware::AnalyticsMiddleware;
pub use reqwest_failure::failure_from_error;
pub use timing::{Clock, SystemClock};
pub use tracing_controller::TracingController;
pub use tracker::{BatchOutcome, DispatchMode, RequestAnalyticsTracker};
