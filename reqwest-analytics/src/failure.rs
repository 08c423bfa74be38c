//! Failed calls: what the transport reports about them and how they are turned into fields.

use std::fmt;

use crate::event::{
    FieldValue, Fields, CONNECT_TIME, END_TIMESTAMP, EXECUTION_TIME, IP, NAME_LOOKUP_TIME, PRE_TRANSFER_TIME,
    RESPONSE_BODY, SIZE_DOWNLOAD, START_TIMESTAMP, START_TRANSFER_TIME,
};
use crate::timing;

/// Timing and connection details reported by the transport for one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportInfo {
    pub primary_ip: Option<String>,
    /// Total duration of the call in seconds.
    pub total_time: Option<f64>,
    pub name_lookup_time: Option<f64>,
    pub connect_time: Option<f64>,
    pub pre_transfer_time: Option<f64>,
    pub start_transfer_time: Option<f64>,
    /// Bytes downloaded.
    pub size_download: Option<u64>,
}

impl TransportInfo {
    /// The per-phase fields shared by successful and failed calls.
    pub(crate) fn breakdown_fields(info: Option<&TransportInfo>) -> Fields {
        let field = |get: fn(&TransportInfo) -> Option<f64>| -> FieldValue {
            info.and_then(get).into()
        };

        Fields::from([
            (
                IP.to_string(),
                info.and_then(|info| info.primary_ip.clone()).into(),
            ),
            (NAME_LOOKUP_TIME.to_string(), field(|i| i.name_lookup_time)),
            (CONNECT_TIME.to_string(), field(|i| i.connect_time)),
            (PRE_TRANSFER_TIME.to_string(), field(|i| i.pre_transfer_time)),
            (
                START_TRANSFER_TIME.to_string(),
                field(|i| i.start_transfer_time),
            ),
            (
                SIZE_DOWNLOAD.to_string(),
                info.and_then(|info| info.size_download).into(),
            ),
        ])
    }
}

/// Numeric error code reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportErrorCode(pub u32);

impl TransportErrorCode {
    /// No specific error.
    pub const NONE: TransportErrorCode = TransportErrorCode(0);
    pub const COULDNT_CONNECT: TransportErrorCode = TransportErrorCode(7);
    pub const PARTIAL_FILE: TransportErrorCode = TransportErrorCode(18);
    pub const OPERATION_TIMEDOUT: TransportErrorCode = TransportErrorCode(28);
    pub const SSL_CONNECT_ERROR: TransportErrorCode = TransportErrorCode(35);
    pub const RECV_ERROR: TransportErrorCode = TransportErrorCode(56);
    pub const PEER_FAILED_VERIFICATION: TransportErrorCode = TransportErrorCode(60);

    /// The synthetic HTTP status reported for calls that failed with this code.
    ///
    /// Codes follow the Cloudflare 52x family: the origin is down (521), timed out (522),
    /// failed the TLS handshake (525), presented an invalid certificate (526) or answered
    /// with something unusable (520). Other codes have no status.
    pub fn failure_status(self) -> Option<&'static str> {
        match self {
            Self::COULDNT_CONNECT => Some("521"),
            Self::OPERATION_TIMEDOUT => Some("522"),
            Self::SSL_CONNECT_ERROR => Some("525"),
            Self::PEER_FAILED_VERIFICATION => Some("526"),
            Self::RECV_ERROR | Self::PARTIAL_FILE => Some("520"),
            _ => None,
        }
    }
}

impl fmt::Display for TransportErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Category of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Generic transport failure.
    Transport,
    /// Failure of a single-transfer transport handle.
    TransportEasy,
    /// Failure of a multiplexing transport handle.
    TransportMulti,
    /// Failure of a shared transport handle.
    TransportShare,
    /// A response was received but rejected because of its status.
    HttpStatus,
    Other,
}

impl FailureKind {
    /// Returns true for the kinds raised by the transport layer itself.
    pub fn is_transport(self) -> bool {
        matches!(
            self,
            FailureKind::Transport
                | FailureKind::TransportEasy
                | FailureKind::TransportMulti
                | FailureKind::TransportShare
        )
    }
}

/// Access to the transport state of a failed call.
pub trait TransportHandle: Send + Sync {
    /// Timing and connection details, if the transport can still provide them.
    fn info(&self) -> Option<TransportInfo>;

    fn error_code(&self) -> TransportErrorCode;
}

/// A [`TransportHandle`] holding already collected details.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportSnapshot {
    pub info: Option<TransportInfo>,
    pub error_code: Option<TransportErrorCode>,
}

impl TransportHandle for TransportSnapshot {
    fn info(&self) -> Option<TransportInfo> {
        self.info.clone()
    }

    fn error_code(&self) -> TransportErrorCode {
        self.error_code.unwrap_or(TransportErrorCode::NONE)
    }
}

/// A call that ended without a usable response.
pub struct RequestFailure {
    kind: FailureKind,
    message: String,
    handle: Option<Box<dyn TransportHandle>>,
}

impl RequestFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            handle: None,
        }
    }

    /// Attach the transport handle the failure was raised on.
    pub fn with_handle<H: TransportHandle + 'static>(mut self, handle: H) -> Self {
        self.handle = Some(Box::new(handle));
        self
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn handle(&self) -> Option<&dyn TransportHandle> {
        self.handle.as_deref()
    }
}

impl fmt::Debug for RequestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestFailure")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("has_handle", &self.handle.is_some())
            .finish()
    }
}

impl fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Outcome of classifying a failure: the status tag and the fields to record.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Classification {
    pub status: Option<&'static str>,
    pub fields: Fields,
}

/// Build the status and fields of a failed call.
///
/// `preset_execution_time` is an execution time recorded earlier for the call, `now` is only
/// consulted when no transport timing is available.
pub(crate) fn classify(
    failure: &RequestFailure,
    start_timestamp: f64,
    preset_execution_time: Option<f64>,
    now: impl FnOnce() -> f64,
) -> Classification {
    let mut fields = Fields::new();
    let mut status = None;

    let handle = failure.handle().filter(|_| failure.kind().is_transport());

    if let Some(handle) = handle {
        let info = handle.info();

        match (info.as_ref().and_then(|info| info.total_time), preset_execution_time) {
            (Some(total_time), _) => {
                fields.insert(EXECUTION_TIME.to_string(), total_time.into());
                fields.insert(
                    END_TIMESTAMP.to_string(),
                    timing::offset(start_timestamp, total_time).into(),
                );
            }
            (None, None) => {
                let execution_time = timing::elapsed(start_timestamp, now());
                fields.insert(EXECUTION_TIME.to_string(), execution_time.into());
                fields.insert(
                    END_TIMESTAMP.to_string(),
                    timing::offset(start_timestamp, execution_time).into(),
                );
            }
            (None, Some(preset)) => {
                fields.insert(
                    END_TIMESTAMP.to_string(),
                    timing::offset(start_timestamp, preset).into(),
                );
            }
        }

        fields.insert(START_TIMESTAMP.to_string(), start_timestamp.into());
        fields.extend(TransportInfo::breakdown_fields(info.as_ref()));

        status = handle.error_code().failure_status();
    } else if preset_execution_time.is_none() {
        fields.insert(
            EXECUTION_TIME.to_string(),
            timing::elapsed(start_timestamp, now()).into(),
        );
    }

    fields.insert(RESPONSE_BODY.to_string(), failure.message().into());

    Classification { status, fields }
}
