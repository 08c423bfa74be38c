//! `RequestAnalyticsTracker` correlates the lifecycle callbacks of outbound calls and emits one
//! analytics event per call.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, trace, warn};

use crate::capture::{
    domain_of, request_fields, request_tags, response_fields, response_tags, InboundResponse,
    OutboundRequest,
};
use crate::error::{Error, Result};
use crate::event::{
    AnalyticsEvent, EventLogger, Fields, Tags, END_TIMESTAMP, EVENT_NAME, EXECUTION_TIME,
    START_TIMESTAMP, TAG_STATUS,
};
use crate::failure::{classify, Classification, RequestFailure, TransportInfo};
use crate::level::{AnalyticsDetailLevel, DomainFilter, LevelPolicy, UrlFilter};
use crate::timing::{self, Clock, SystemClock};
use crate::{CorrelationKey, TracingController};

/// Whether the transport is dispatching a single call or a batch of keyed calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// Calls carry no key and are filed under [`CorrelationKey::SINGLE`].
    #[default]
    Single,
    /// Entered on the first explicitly keyed call, left once every pending call is finalized.
    Batch,
}

/// How a batched call ended.
#[derive(Debug, Clone, Copy)]
pub enum BatchOutcome<'a> {
    Response(InboundResponse<'a>),
    Failure(&'a RequestFailure),
}

struct PendingCapture<E> {
    start_timestamp: f64,
    level: AnalyticsDetailLevel,
    /// Span active when a batched call was dispatched.
    span_id: Option<String>,
    event: E,
}

impl<E: AnalyticsEvent> PendingCapture<E> {
    fn preset_execution_time(&self) -> Option<f64> {
        self.event.fields().get(EXECUTION_TIME).and_then(|value| value.as_f64())
    }

    fn has_end_timestamp(&self) -> bool {
        self.event
            .fields()
            .get(END_TIMESTAMP)
            .is_some_and(|value| !value.is_null())
    }
}

/// Tracks outbound calls from the moment they are sent until they complete, fail or are
/// redirected, and records one `outbound_requests_log` event for each.
///
/// The transport drives the tracker through its lifecycle methods. Calls dispatched one at a
/// time omit the correlation key; batch dispatchers pass an explicit key for every call and
/// signal completions through [`on_batch_item_complete`](Self::on_batch_item_complete).
///
/// ```ignore
/// let mut tracker = RequestAnalyticsTracker::new(logger, controller);
/// tracker.set_analytics_detail_level(AnalyticsDetailLevel::Detailed);
/// tracker.set_url_filter(RegexUrlFilter::from_patterns([(r"/payments/", AnalyticsDetailLevel::Full)]));
///
/// tracker.on_before_send(&request, None)?;
/// tracker.on_success(&response, None)?;
/// ```
pub struct RequestAnalyticsTracker<L: EventLogger, C: TracingController> {
    event_logger: L,
    tracing_controller: C,
    policy: LevelPolicy,
    pending: HashMap<CorrelationKey, PendingCapture<L::Event>>,
    mode: DispatchMode,
    clock: Box<dyn Clock>,
}

impl<L: EventLogger, C: TracingController> RequestAnalyticsTracker<L, C> {
    pub fn new(event_logger: L, tracing_controller: C) -> Self {
        Self {
            event_logger,
            tracing_controller,
            policy: LevelPolicy::default(),
            pending: HashMap::new(),
            mode: DispatchMode::Single,
            clock: Box::new(SystemClock),
        }
    }

    /// Replace the wall clock used for timestamps.
    pub fn with_clock<T: Clock + 'static>(mut self, clock: T) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Replace the whole level policy.
    pub fn with_policy(mut self, policy: LevelPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn set_analytics_detail_level(&mut self, level: AnalyticsDetailLevel) {
        self.policy.set_default_level(level);
    }

    /// Set per-domain levels, looked up by exact host name.
    pub fn set_domain_filter<F: DomainFilter + 'static>(&mut self, filter: F) {
        self.policy.set_domain_filter(filter);
    }

    /// Set per-URL levels. Rules are evaluated in iteration order.
    pub fn set_url_filter<F: UrlFilter + 'static>(&mut self, filter: F) {
        self.policy.set_url_filter(filter);
    }

    pub fn policy(&self) -> &LevelPolicy {
        &self.policy
    }

    pub fn event_logger(&self) -> &L {
        &self.event_logger
    }

    pub fn tracing_controller(&self) -> &C {
        &self.tracing_controller
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Number of calls sent but not yet finalized.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, key: &CorrelationKey) -> bool {
        self.pending.contains_key(key)
    }

    /// The detail level resolved for a pending call.
    pub fn pending_level(&self, key: &CorrelationKey) -> Option<AnalyticsDetailLevel> {
        self.pending.get(key).map(|capture| capture.level)
    }

    /// A call is about to be sent.
    ///
    /// Passing a key switches the tracker into [`DispatchMode::Batch`] until every pending call
    /// is finalized.
    pub fn on_before_send(
        &mut self,
        request: &OutboundRequest<'_>,
        id: Option<CorrelationKey>,
    ) -> Result<()> {
        let batched = id.is_some();
        let key = id.unwrap_or_default();
        if self.pending.contains_key(&key) {
            return Err(Error::DuplicateCorrelationKey(key));
        }
        if batched {
            self.mode = DispatchMode::Batch;
        }

        let domain = domain_of(request.url);
        let level = self.policy.resolve(request.url, domain.as_deref());

        let mut tags: Tags = self
            .tracing_controller
            .span_specific_tags()
            .into_iter()
            .map(|(name, value)| (name, Some(value)))
            .collect();
        tags.extend(request_tags(request, domain.as_deref()));

        let mut event = self.event_logger.new_event(EVENT_NAME);
        event.add_tags(tags);
        event.add_fields(request_fields(level, request));

        if self.pending.is_empty() {
            self.tracing_controller.start_child_span();
        }

        let span_id = match self.mode {
            DispatchMode::Single => None,
            DispatchMode::Batch => self.tracing_controller.span_id(),
        };

        debug!(key = %key, level = %level, url = request.url, "Tracking outbound request");

        let start_timestamp = self.now();
        self.pending.insert(
            key,
            PendingCapture {
                start_timestamp,
                level,
                span_id,
                event,
            },
        );

        Ok(())
    }

    /// The transport finished the exchange and reported its own timing.
    ///
    /// Timing from the transport takes precedence over the wall clock when the call completes.
    pub fn on_transport_info_available(
        &mut self,
        info: Option<&TransportInfo>,
        id: CorrelationKey,
    ) -> Result<()> {
        let capture = self
            .pending
            .get_mut(&id)
            .ok_or(Error::UnknownCorrelationKey(id))?;

        let Some(info) = info else {
            return Ok(());
        };

        let mut fields = TransportInfo::breakdown_fields(Some(info));
        fields.insert(START_TIMESTAMP.to_string(), capture.start_timestamp.into());
        if let Some(total_time) = info.total_time {
            fields.insert(EXECUTION_TIME.to_string(), total_time.into());
            fields.insert(
                END_TIMESTAMP.to_string(),
                timing::offset(capture.start_timestamp, total_time).into(),
            );
        }

        capture.event.add_fields(fields);
        Ok(())
    }

    /// A call completed with a response.
    ///
    /// In [`DispatchMode::Batch`] a completion without a key is ignored: batched calls are
    /// finalized through [`on_batch_item_complete`](Self::on_batch_item_complete) only.
    pub fn on_success(
        &mut self,
        response: &InboundResponse<'_>,
        id: Option<CorrelationKey>,
    ) -> Result<()> {
        if id.is_none() && self.mode == DispatchMode::Batch {
            trace!("Ignoring unkeyed completion of a batched request");
            return Ok(());
        }

        self.complete(response, id.unwrap_or_default())
    }

    /// A call failed without a usable response.
    pub fn on_failure(&mut self, failure: &RequestFailure, id: CorrelationKey) -> Result<()> {
        let capture = self
            .pending
            .get(&id)
            .ok_or_else(|| Error::UnknownCorrelationKey(id.clone()))?;

        let Classification { status, fields } = classify(
            failure,
            capture.start_timestamp,
            capture.preset_execution_time(),
            || self.now(),
        );

        let tags = Tags::from([(TAG_STATUS.to_string(), status.map(str::to_owned))]);
        self.finalize(id, tags, fields)
    }

    /// A single call is about to follow a redirect to `location`.
    ///
    /// The response being redirected from completes the call.
    pub fn on_before_redirect(
        &mut self,
        location: &str,
        response: &InboundResponse<'_>,
    ) -> Result<()> {
        debug!(location, "Request redirected");
        self.complete(response, CorrelationKey::SINGLE)
    }

    /// A call of a batch concluded.
    pub fn on_batch_item_complete(
        &mut self,
        outcome: BatchOutcome<'_>,
        id: CorrelationKey,
    ) -> Result<()> {
        match outcome {
            BatchOutcome::Response(response) => self.on_success(&response, Some(id)),
            BatchOutcome::Failure(failure) => self.on_failure(failure, id),
        }
    }

    fn complete(&mut self, response: &InboundResponse<'_>, id: CorrelationKey) -> Result<()> {
        let capture = self
            .pending
            .get(&id)
            .ok_or_else(|| Error::UnknownCorrelationKey(id.clone()))?;

        let mut fields = Fields::new();
        match capture.preset_execution_time() {
            None => {
                let execution_time = timing::elapsed(capture.start_timestamp, self.now());
                fields.insert(START_TIMESTAMP.to_string(), capture.start_timestamp.into());
                fields.insert(EXECUTION_TIME.to_string(), execution_time.into());
                fields.insert(
                    END_TIMESTAMP.to_string(),
                    timing::offset(capture.start_timestamp, execution_time).into(),
                );
            }
            Some(execution_time) if !capture.has_end_timestamp() => {
                fields.insert(
                    END_TIMESTAMP.to_string(),
                    timing::offset(capture.start_timestamp, execution_time).into(),
                );
            }
            Some(_) => {}
        }
        fields.extend(response_fields(capture.level, response));

        self.finalize(id, response_tags(response), fields)
    }

    /// Record the event of `id` and forget the call.
    ///
    /// Trace context is checked before anything is mutated: a call that cannot be correlated
    /// stays pending and nothing is recorded.
    fn finalize(&mut self, id: CorrelationKey, tags: Tags, fields: Fields) -> Result<()> {
        let captured_span_id = match self.pending.get(&id) {
            Some(capture) => capture.span_id.clone(),
            None => return Err(Error::UnknownCorrelationKey(id)),
        };

        let Some(trace_id) = self.tracing_controller.trace_id() else {
            return Err(Error::MissingTraceId(id));
        };

        let span_id = match self.mode {
            DispatchMode::Single => match self.tracing_controller.span_id() {
                Some(span_id) => span_id,
                None => return Err(Error::MissingSpanId(id)),
            },
            DispatchMode::Batch => {
                match captured_span_id.or_else(|| self.tracing_controller.span_id()) {
                    Some(span_id) if self.tracing_controller.is_valid_span_id(&span_id) => span_id,
                    Some(_) => self.tracing_controller.new_span_id(),
                    None => return Err(Error::MissingSpanId(id)),
                }
            }
        };

        let parent_span_id = self.tracing_controller.parent_span_id();

        let Some(PendingCapture { mut event, level, .. }) = self.pending.remove(&id) else {
            return Err(Error::UnknownCorrelationKey(id));
        };

        event.record_timestamp();
        event.add_tags(tags);
        event.add_fields(fields);
        event.set_trace_id(&trace_id);
        event.set_span_id(&span_id);
        if let Some(parent_span_id) = parent_span_id.as_deref() {
            event.set_parent_span_id(parent_span_id);
        }
        event.record();

        debug!(
            key = %id,
            level = %level,
            trace_id = %trace_id,
            span_id = %span_id,
            "Recorded outbound request"
        );

        if self.pending.is_empty() {
            self.mode = DispatchMode::Single;
            self.tracing_controller.stop_child_span();
        }

        Ok(())
    }

    fn now(&self) -> f64 {
        let now = self.clock.now();
        if now.is_finite() {
            now
        } else {
            warn!(now, "Clock returned a non-finite time, using the epoch");
            0.0
        }
    }
}

impl<L, C> fmt::Debug for RequestAnalyticsTracker<L, C>
where
    L: EventLogger,
    C: TracingController,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestAnalyticsTracker")
            .field("policy", &self.policy)
            .field("mode", &self.mode)
            .field("pending", &self.pending.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
