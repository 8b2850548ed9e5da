use std::collections::BTreeMap;

use secrecy::SecretString;

use crate::auth::AuthMethod;

/// Event codes monitored when none are configured explicitly.
pub const DEFAULT_EVENT_CODES: &[&str] = &[
    "VideoMotion",
    "CrossLineDetection",
    "AlarmLocal",
    "VideoLoss",
    "VideoBlind",
];

/// Attach channel used when none is configured explicitly.
pub const DEFAULT_ALARM_CHANNEL: i64 = 1;

/// Connection and protocol settings for a single camera/DVR.
///
/// `channel_offset` has no default on purpose: firmware families disagree
/// on whether event indices are zero- or one-based, and a wrong offset
/// silently shifts every resolved channel number. Callers must state the
/// offset they mean (most devices report zero-based indices, making `1`
/// the usual value).
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub username: String,
    pub password: SecretString,
    pub auth: AuthMethod,
    /// Added to a device-reported channel index to obtain the
    /// user-facing channel number.
    pub channel_offset: i64,
    /// Event codes requested on the attach stream.
    pub monitored_codes: Vec<String>,
    /// Channel the attach request is issued against.
    pub alarm_channel: i64,
    /// Explicit number → name overrides, seeded into the channel
    /// registry at device construction.
    pub channel_names: BTreeMap<i64, String>,
}

impl DeviceConfig {
    /// Config for `host` with the usual defaults: port 80, plain HTTP,
    /// Basic auth, the default monitored code list, attach channel 1.
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: SecretString,
        channel_offset: i64,
    ) -> Self {
        Self {
            host: host.into(),
            port: 80,
            use_tls: false,
            username: username.into(),
            password,
            auth: AuthMethod::Basic,
            channel_offset,
            monitored_codes: DEFAULT_EVENT_CODES.iter().map(ToString::to_string).collect(),
            alarm_channel: DEFAULT_ALARM_CHANNEL,
            channel_names: BTreeMap::new(),
        }
    }
}
