use thiserror::Error;

use crate::CorrelationKey;

pub type Result<T> = std::result::Result<T, Error>;

/// Integration faults raised by [`RequestAnalyticsTracker`].
///
/// None of these are runtime conditions to recover from: each one means the transport or the
/// tracing setup around the tracker is wired incorrectly. Missing transport timing, unmapped
/// failure codes and unparsable URLs are absorbed by the tracker and never show up here.
///
/// [`RequestAnalyticsTracker`]: crate::RequestAnalyticsTracker
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A lifecycle callback referenced a key that has no pending capture.
    #[error("no pending capture for correlation key `{0}`")]
    UnknownCorrelationKey(CorrelationKey),
    /// A call was started under a key that is still in flight.
    #[error("correlation key `{0}` is already in flight")]
    DuplicateCorrelationKey(CorrelationKey),
    /// The tracing controller had no trace id when the call was finalized.
    #[error("no trace id available to finalize correlation key `{0}`")]
    MissingTraceId(CorrelationKey),
    /// The tracing controller had no span id when the call was finalized.
    #[error("no span id available to finalize correlation key `{0}`")]
    MissingSpanId(CorrelationKey),
}

impl Error {
    /// Returns the correlation key the fault was raised for.
    pub fn correlation_key(&self) -> &CorrelationKey {
        match self {
            Error::UnknownCorrelationKey(key)
            | Error::DuplicateCorrelationKey(key)
            | Error::MissingTraceId(key)
            | Error::MissingSpanId(key) => key,
        }
    }

    /// Returns true if finalization was refused for lack of trace correlation.
    pub fn is_missing_trace_context(&self) -> bool {
        matches!(self, Error::MissingTraceId(_) | Error::MissingSpanId(_))
    }

    /// Returns true if the fault concerns the bookkeeping of correlation keys.
    pub fn is_correlation(&self) -> bool {
        matches!(
            self,
            Error::UnknownCorrelationKey(_) | Error::DuplicateCorrelationKey(_)
        )
    }
}
