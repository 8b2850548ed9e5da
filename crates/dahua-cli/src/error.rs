//! CLI error types with miette diagnostics.
//!
//! Maps `dahua_api::Error` variants into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

/// Exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error("No device host configured")]
    #[diagnostic(
        code(dahua::no_host),
        help("Pass --host <address> or set the DAHUA_HOST environment variable.")
    )]
    NoHost,

    #[error("No device password configured")]
    #[diagnostic(
        code(dahua::no_password),
        help("Pass --password <secret> or set the DAHUA_PASSWORD environment variable.")
    )]
    NoPassword,

    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(dahua::bad_config))]
    Config { message: String },

    #[error("Authentication failed")]
    #[diagnostic(
        code(dahua::auth_failed),
        help("Verify the device username and password.")
    )]
    AuthFailed {
        #[source]
        source: dahua_api::Error,
    },

    #[error("Device request failed")]
    #[diagnostic(code(dahua::api_error))]
    Api {
        #[source]
        source: dahua_api::Error,
    },

    #[error("Could not serialize output")]
    #[diagnostic(code(dahua::output))]
    Output(#[from] serde_json::Error),

    #[error("Failed to wait for shutdown signal")]
    #[diagnostic(code(dahua::signal))]
    Signal(#[from] std::io::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoHost | Self::NoPassword | Self::Config { .. } => exit_code::USAGE,
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::Api { source, .. } if source.is_timeout() => exit_code::TIMEOUT,
            Self::Api { source, .. } if source.is_transient() => exit_code::CONNECTION,
            _ => exit_code::GENERAL,
        }
    }
}

impl From<dahua_api::Error> for CliError {
    fn from(source: dahua_api::Error) -> Self {
        match source {
            dahua_api::Error::Configuration { message } => Self::Config { message },
            e if e.is_auth() => Self::AuthFailed { source: e },
            e => Self::Api { source: e },
        }
    }
}
