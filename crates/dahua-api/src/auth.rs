use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::header::HeaderValue;
use secrecy::{ExposeSecret, SecretString};

use crate::error::Error;

/// Authentication method for device requests.
///
/// Only Basic is implemented. Digest is accepted by device configuration
/// surfaces for forward compatibility but constructing a [`Device`] with
/// it is a configuration error — the client never silently downgrades a
/// Digest request to Basic.
///
/// [`Device`]: crate::device::Device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthMethod {
    #[default]
    Basic,
    Digest,
}

impl AuthMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Digest => "digest",
        }
    }
}

impl FromStr for AuthMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "digest" => Ok(Self::Digest),
            other => Err(Error::Configuration {
                message: format!("unknown auth method `{other}` (expected basic or digest)"),
            }),
        }
    }
}

/// Precompute the `Authorization` header for Basic auth.
///
/// The returned value is marked sensitive so it never shows up in
/// request debug output.
pub(crate) fn basic_authorization(
    username: &str,
    password: &SecretString,
) -> Result<HeaderValue, Error> {
    let credential = format!("{username}:{}", password.expose_secret());
    let encoded = format!("Basic {}", BASE64.encode(credential));
    let mut value = HeaderValue::from_str(&encoded).map_err(|_| Error::Configuration {
        message: "credentials contain characters not representable in a header".into(),
    })?;
    value.set_sensitive(true);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_header_encodes_credentials() {
        let password = SecretString::from("admin".to_string());
        let header = basic_authorization("admin", &password).unwrap();
        // "admin:admin" in base64
        assert_eq!(header.to_str().unwrap(), "Basic YWRtaW46YWRtaW4=");
        assert!(header.is_sensitive());
    }

    #[test]
    fn auth_method_round_trips_through_str() {
        assert_eq!("basic".parse::<AuthMethod>().unwrap(), AuthMethod::Basic);
        assert_eq!("Digest".parse::<AuthMethod>().unwrap(), AuthMethod::Digest);
        assert!("ntlm".parse::<AuthMethod>().is_err());
    }
}
