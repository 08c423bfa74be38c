//! Maps errors raised by a reqwest middleware chain onto [`RequestFailure`]s.

use crate::failure::{
    FailureKind, RequestFailure, TransportErrorCode, TransportInfo, TransportSnapshot,
};

/// Describe a failed call for the tracker.
///
/// `total_time` is how long the call ran before failing, in seconds. Errors from other
/// middleware are not transport failures and carry no handle.
pub fn failure_from_error(
    error: &reqwest_middleware::Error,
    total_time: Option<f64>,
) -> RequestFailure {
    let message = error.to_string();

    let reqwest_error = match error {
        reqwest_middleware::Error::Middleware(_) => {
            return RequestFailure::new(FailureKind::Other, message)
        }
        reqwest_middleware::Error::Reqwest(error) => error,
    };

    if reqwest_error.is_status() {
        return RequestFailure::new(FailureKind::HttpStatus, message);
    }
    if reqwest_error.is_builder() || reqwest_error.is_redirect() || reqwest_error.is_decode() {
        return RequestFailure::new(FailureKind::Other, message);
    }

    RequestFailure::new(FailureKind::Transport, message).with_handle(TransportSnapshot {
        info: Some(TransportInfo {
            total_time,
            ..Default::default()
        }),
        error_code: Some(error_code(reqwest_error)),
    })
}

/// The transport error code that best describes `error`.
fn error_code(error: &reqwest::Error) -> TransportErrorCode {
    if error.is_timeout() {
        return TransportErrorCode::OPERATION_TIMEDOUT;
    }

    #[cfg(not(target_arch = "wasm32"))]
    {
        if error.is_connect() {
            return tls_error_code(error).unwrap_or(TransportErrorCode::COULDNT_CONNECT);
        }

        if let Some(hyper_error) = get_source_error_type::<hyper::Error>(error) {
            // The response started arriving but the connection was cut halfway through.
            if hyper_error.is_incomplete_message() {
                return TransportErrorCode::PARTIAL_FILE;
            }
            if let Some(io_error) = get_source_error_type::<std::io::Error>(hyper_error) {
                if let Some(code) = classify_io_error(io_error) {
                    return code;
                }
            }
        }
    }

    if error.is_body() {
        return TransportErrorCode::RECV_ERROR;
    }

    TransportErrorCode::NONE
}

#[cfg(not(target_arch = "wasm32"))]
fn classify_io_error(error: &std::io::Error) -> Option<TransportErrorCode> {
    match error.kind() {
        std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted => {
            Some(TransportErrorCode::RECV_ERROR)
        }
        std::io::ErrorKind::TimedOut => Some(TransportErrorCode::OPERATION_TIMEDOUT),
        _ => None,
    }
}

/// TLS failures surface as opaque errors in the connect chain, so they are told apart by
/// their description.
#[cfg(not(target_arch = "wasm32"))]
fn tls_error_code(error: &dyn std::error::Error) -> Option<TransportErrorCode> {
    let mut source = error.source();

    while let Some(err) = source {
        let description = err.to_string().to_lowercase();
        if description.contains("certificate") {
            return Some(TransportErrorCode::PEER_FAILED_VERIFICATION);
        }
        if description.contains("handshake") || description.contains("tls") {
            return Some(TransportErrorCode::SSL_CONNECT_ERROR);
        }

        source = err.source();
    }
    None
}

/// Downcasts the given err source into T.
#[cfg(not(target_arch = "wasm32"))]
fn get_source_error_type<T: std::error::Error + 'static>(
    err: &dyn std::error::Error,
) -> Option<&T> {
    let mut source = err.source();

    while let Some(err) = source {
        if let Some(err) = err.downcast_ref::<T>() {
            return Some(err);
        }

        source = err.source();
    }
    None
}
