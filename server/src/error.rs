//! JSON error bodies for the failure paths the dispatcher and HTTP layer can
//! hit (§6): no browser bound, the browser disconnected mid-flight, the
//! request idled out, or the browser reported an upstream failure.

use salvo::prelude::*;
use serde_json::json;
use session_bridge_protocol::RequestId;

#[derive(Debug, Clone, Copy)]
pub enum BridgeError {
    NoBrowserBound,
    BrowserGone,
    TimedOut,
}

impl BridgeError {
    #[must_use]
    pub fn status_code(self) -> StatusCode {
        match self {
            Self::NoBrowserBound => StatusCode::SERVICE_UNAVAILABLE,
            Self::BrowserGone => StatusCode::BAD_GATEWAY,
            Self::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    #[must_use]
    pub fn error_code(self) -> &'static str {
        match self {
            Self::NoBrowserBound => "browser_not_connected",
            Self::BrowserGone => "browser_disconnected",
            Self::TimedOut => "request_timeout",
        }
    }

    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::NoBrowserBound => "no browser is currently connected",
            Self::BrowserGone => "the browser disconnected while this request was in flight",
            Self::TimedOut => "the browser produced no data before the idle timeout elapsed",
        }
    }
}

/// Write a `BridgeError` as the response, for the case where nothing has
/// been sent to the client yet (headers not yet received from the browser).
/// Every error body carries `request_id` (§6) so a caller can correlate it
/// with logs on either plane.
pub fn render_error(res: &mut Response, error: BridgeError, request_id: &RequestId) {
    res.status_code(error.status_code());
    res.render(Json(json!({
        "error": error.error_code(),
        "message": error.message(),
        "request_id": request_id.0,
    })));
}

/// Write a forwarded upstream failure reported by the browser plane as an
/// `error` event (§4.6, §6): `status || 500` plus `{error, message,
/// request_id}`.
pub fn render_forwarded_error(res: &mut Response, status: u16, message: &str, request_id: &RequestId) {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    res.status_code(status);
    res.render(Json(json!({
        "error": "upstream_error",
        "message": message,
        "request_id": request_id.0,
    })));
}
