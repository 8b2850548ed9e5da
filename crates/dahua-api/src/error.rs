use thiserror::Error;

/// Top-level error type for the `dahua-api` crate.
///
/// Covers every failure mode across the client: configuration, one-shot
/// commands, the event-attach stream, and config-dump decoding. The
/// streaming listener never bubbles these up — it classifies them for
/// logging and keeps retrying — while one-shot commands return them to
/// the caller directly.
#[derive(Debug, Error)]
pub enum Error {
    // ── Configuration ───────────────────────────────────────────────
    /// Rejected configuration (e.g. an unsupported auth method).
    /// Fatal at construction, never retried.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    // ── Authentication ──────────────────────────────────────────────
    /// The device rejected our credentials (HTTP 401).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Protocol ────────────────────────────────────────────────────
    /// Any other non-2xx HTTP status from the device.
    #[error("Protocol error (HTTP {status}): {message}")]
    Protocol { status: u16, message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, reset, DNS failure,
    /// timeout).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup or HTTP client construction failure.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Data ────────────────────────────────────────────────────────
    /// A config-dump line without a `=` separator.
    #[error("Invalid config dump line: `{line}`")]
    Decode { line: String },

    // ── Callbacks ───────────────────────────────────────────────────
    /// Attempted to remove a callback that was never registered.
    #[error("Callback not registered")]
    CallbackNotFound,
}

impl Error {
    /// Returns `true` if the device rejected our credentials.
    ///
    /// The streaming listener still retries these — device credentials
    /// rarely change mid-session — but logs them at a distinct severity.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` if this is a transient failure worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Protocol { .. } | Self::Authentication { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if the underlying transport timed out.
    ///
    /// A read timeout on the attach stream is expected idle behavior,
    /// not a fault.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }
}
