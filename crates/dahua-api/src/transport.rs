// Shared transport configuration for building reqwest::Client instances.
//
// One-shot commands and the event-attach stream need different timeout
// shapes: commands get an overall request timeout, while the stream must
// never carry a total timeout (its body is unbounded) and instead relies
// on connect and read timeouts.

use std::time::Duration;

/// TLS verification mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// Use the system certificate store.
    System,
    /// Accept any certificate (cameras commonly ship self-signed certs).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    /// Overall timeout for one-shot commands.
    pub command_timeout: Duration,
    /// TCP connect timeout, applied to both client profiles.
    pub connect_timeout: Duration,
    /// Per-read timeout on the attach stream. The device idles between
    /// events, so expiry here is routine rather than a fault.
    pub read_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::DangerAcceptInvalid,
            command_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
        }
    }
}

impl TransportConfig {
    /// Build the client used for one-shot commands.
    pub fn build_command_client(&self) -> Result<reqwest::Client, crate::error::Error> {
        self.builder()
            .timeout(self.command_timeout)
            .build()
            .map_err(|e| crate::error::Error::Tls(format!("failed to build HTTP client: {e}")))
    }

    /// Build the client used for the event-attach stream.
    ///
    /// No overall timeout; the response body is read until the device
    /// closes it or a single read exceeds `read_timeout`.
    pub fn build_stream_client(&self) -> Result<reqwest::Client, crate::error::Error> {
        self.builder()
            .read_timeout(self.read_timeout)
            .build()
            .map_err(|e| crate::error::Error::Tls(format!("failed to build HTTP client: {e}")))
    }

    fn builder(&self) -> reqwest::ClientBuilder {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(concat!("dahua-api/", env!("CARGO_PKG_VERSION")));

        match self.tls {
            TlsMode::System => {}
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
    }
}
