//! `AnalyticsMiddleware` feeds the lifecycle of every request sent through a
//! [`reqwest_middleware::ClientWithMiddleware`] into a [`RequestAnalyticsTracker`].

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use http::{Extensions, HeaderMap};
use parking_lot::Mutex;
use reqwest::{Request, Response};
use reqwest_middleware::{Error, Middleware, Next, Result};
use serde_json::Value;
use tracing::{error, warn};
use web_time::Instant;

use crate::capture::{InboundResponse, OutboundRequest, Payload, RequestOptions};
use crate::failure::{FailureKind, RequestFailure, TransportInfo};
use crate::reqwest_failure::failure_from_error;
use crate::tracker::BatchOutcome;
use crate::{
    AnalyticsDetailLevel, CorrelationKey, EventLogger, RequestAnalyticsTracker, TracingController,
};

/// Middleware recording an analytics event for every request.
///
/// Requests may run concurrently, so every request is tracked under its own correlation key:
/// the [`CorrelationKey`] attached to the request as an extension if there is one, otherwise a
/// key minted by the middleware.
///
/// From [`AnalyticsDetailLevel::Detailed`] on, the response body is buffered so it can be
/// recorded. The response handed back to the caller carries the same status, headers and body.
///
/// ```ignore
/// use reqwest_analytics::{AnalyticsMiddleware, RequestAnalyticsTracker, TracingEventLogger};
/// use reqwest_middleware::ClientBuilder;
///
/// let tracker = RequestAnalyticsTracker::new(TracingEventLogger, my_tracing_controller);
/// let client = ClientBuilder::new(reqwest::Client::new())
///     .with(AnalyticsMiddleware::new(tracker))
///     .build();
/// ```
pub struct AnalyticsMiddleware<L: EventLogger, C: TracingController> {
    tracker: Arc<Mutex<RequestAnalyticsTracker<L, C>>>,
    next_key: Arc<AtomicI64>,
}

impl<L: EventLogger, C: TracingController> AnalyticsMiddleware<L, C> {
    pub fn new(tracker: RequestAnalyticsTracker<L, C>) -> Self {
        Self::from_shared(Arc::new(Mutex::new(tracker)))
    }

    /// Use a tracker that is also driven or inspected elsewhere.
    pub fn from_shared(tracker: Arc<Mutex<RequestAnalyticsTracker<L, C>>>) -> Self {
        Self {
            tracker,
            next_key: Arc::new(AtomicI64::new(1)),
        }
    }

    pub fn tracker(&self) -> &Arc<Mutex<RequestAnalyticsTracker<L, C>>> {
        &self.tracker
    }

    /// A key that is neither reserved nor in flight.
    fn mint_key(&self, tracker: &RequestAnalyticsTracker<L, C>) -> CorrelationKey {
        loop {
            let key = CorrelationKey::Index(self.next_key.fetch_add(1, Ordering::Relaxed));
            if !key.is_single() && !tracker.is_pending(&key) {
                return key;
            }
        }
    }
}

impl<L: EventLogger, C: TracingController> Clone for AnalyticsMiddleware<L, C> {
    fn clone(&self) -> Self {
        Self {
            tracker: self.tracker.clone(),
            next_key: self.next_key.clone(),
        }
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
impl<L, C> Middleware for AnalyticsMiddleware<L, C>
where
    L: EventLogger + Send + 'static,
    L::Event: Send,
    C: TracingController + Send + 'static,
{
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let explicit_key = extensions.get::<CorrelationKey>().cloned();
        let body = request_payload(&req);
        let options = request_options(&req);

        let key = {
            let mut tracker = self.tracker.lock();
            let key = match explicit_key {
                Some(key) => key,
                None => self.mint_key(&tracker),
            };
            let outbound = OutboundRequest {
                url: req.url().as_str(),
                method: req.method().as_str(),
                headers: req.headers(),
                body: &body,
                options: &options,
            };
            tracker
                .on_before_send(&outbound, Some(key.clone()))
                .map_err(tracking_error)?;
            key
        };
        let mut in_flight = InFlight {
            tracker: &self.tracker,
            key: Some(key.clone()),
        };

        let started = Instant::now();
        let outcome = next.run(req, extensions).await;
        let total_time = started.elapsed().as_secs_f64();

        let response = match outcome {
            Ok(response) => response,
            Err(error) => {
                in_flight.disarm();
                let failure = failure_from_error(&error, Some(total_time));
                let tracked = self
                    .tracker
                    .lock()
                    .on_batch_item_complete(BatchOutcome::Failure(&failure), key);
                return match tracked {
                    Ok(()) => Err(error),
                    Err(fault) => {
                        error!(error = %error, "Request failed and could not be recorded");
                        Err(tracking_error(fault))
                    }
                };
            }
        };

        let info = transport_info(&response, total_time);
        let level = self.tracker.lock().pending_level(&key);
        let status = response.status().as_u16();
        let headers = response.headers().clone();

        let (response, body) = match level {
            Some(level) if level.at_least(AnalyticsDetailLevel::Detailed) => {
                match buffer_response(response).await {
                    Ok(buffered) => buffered,
                    Err(error) => {
                        in_flight.disarm();
                        let failure = failure_from_error(&error, Some(total_time));
                        self.tracker
                            .lock()
                            .on_batch_item_complete(BatchOutcome::Failure(&failure), key)
                            .map_err(tracking_error)?;
                        return Err(error);
                    }
                }
            }
            _ => (response, String::new()),
        };

        in_flight.disarm();
        let mut tracker = self.tracker.lock();
        tracker
            .on_transport_info_available(Some(&info), key.clone())
            .map_err(tracking_error)?;
        tracker
            .on_batch_item_complete(
                BatchOutcome::Response(InboundResponse {
                    status: Some(status),
                    headers: &headers,
                    body: &body,
                }),
                key,
            )
            .map_err(tracking_error)?;

        Ok(response)
    }
}

/// Finalizes the capture of a request whose future was dropped before it completed.
struct InFlight<'a, L: EventLogger, C: TracingController> {
    tracker: &'a Mutex<RequestAnalyticsTracker<L, C>>,
    key: Option<CorrelationKey>,
}

impl<L: EventLogger, C: TracingController> InFlight<'_, L, C> {
    /// The request completed and its caller records the outcome.
    fn disarm(&mut self) {
        self.key = None;
    }
}

impl<L: EventLogger, C: TracingController> Drop for InFlight<'_, L, C> {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        let failure = RequestFailure::new(FailureKind::Other, "request cancelled");
        if let Err(fault) = self
            .tracker
            .lock()
            .on_batch_item_complete(BatchOutcome::Failure(&failure), key)
        {
            warn!(error = %fault, "Cancelled request could not be recorded");
        }
    }
}

fn tracking_error(fault: crate::Error) -> Error {
    let context = format!("failed to track request `{}`", fault.correlation_key());
    Error::Middleware(anyhow::Error::new(fault).context(context))
}

fn request_payload(req: &Request) -> Payload {
    req.body()
        .and_then(|body| body.as_bytes())
        .filter(|bytes| !bytes.is_empty())
        .map(|bytes| Payload::Text(String::from_utf8_lossy(bytes).into_owned()))
        .unwrap_or_default()
}

fn request_options(req: &Request) -> RequestOptions {
    let mut options = RequestOptions::new();

    #[cfg(not(target_arch = "wasm32"))]
    {
        if let Some(timeout) = req.timeout() {
            options.insert("timeout".into(), Value::from(timeout.as_secs_f64()));
        }
        options.insert(
            "version".into(),
            Value::from(format!("{:?}", req.version())),
        );
    }
    #[cfg(target_arch = "wasm32")]
    let _ = req;

    options
}

fn transport_info(response: &Response, total_time: f64) -> TransportInfo {
    #[cfg(not(target_arch = "wasm32"))]
    let primary_ip = response.remote_addr().map(|addr| addr.ip().to_string());
    #[cfg(target_arch = "wasm32")]
    let primary_ip = None;

    TransportInfo {
        primary_ip,
        total_time: Some(total_time),
        size_download: response.content_length(),
        ..Default::default()
    }
}

/// Read the whole body and rebuild an equivalent response around it.
#[cfg(not(target_arch = "wasm32"))]
async fn buffer_response(response: Response) -> Result<(Response, String)> {
    use reqwest::ResponseBuilderExt;

    let status = response.status();
    let version = response.version();
    let url = response.url().clone();
    let headers: HeaderMap = response.headers().clone();

    let bytes = response.bytes().await?;
    let body = String::from_utf8_lossy(&bytes).into_owned();

    let mut builder = http::Response::builder()
        .status(status)
        .version(version)
        .url(url);
    if let Some(builder_headers) = builder.headers_mut() {
        *builder_headers = headers;
    }
    let rebuilt = builder.body(bytes).map_err(Error::middleware)?;

    Ok((Response::from(rebuilt), body))
}

/// Bodies are left untouched where responses cannot be rebuilt.
#[cfg(target_arch = "wasm32")]
async fn buffer_response(response: Response) -> Result<(Response, String)> {
    Ok((response, String::new()))
}
