//! Failure outcomes of the browser fetcher (spec §4.7). Every non-cancelled
//! variant carries enough to render an `error` frame: a status and a
//! human-readable message.

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The cancellation token fired before a usable response was obtained.
    /// Never turned into an `error` frame: the caller just drops it, since
    /// whatever replaced the binding already failed this request (§4.9).
    #[error("request was cancelled")]
    Cancelled,

    /// 15 attempts were exhausted without ever seeing a 2xx status.
    #[error("upstream returned {status} after exhausting retries: {excerpt}")]
    Upstream { status: u16, excerpt: String },

    /// The request never got a response at all (DNS, TLS, connect, a dropped
    /// socket mid-send).
    #[error("transport error: {0}")]
    Transport(String),
}

impl FetchError {
    /// Best-effort HTTP status for the `error` frame this becomes (§4.6,
    /// `status || 500`).
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Cancelled => 499,
            Self::Upstream { status, .. } => *status,
            Self::Transport(_) => 500,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
