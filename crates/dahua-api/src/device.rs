// Device handle: URL construction, one-shot commands, info queries.
//
// Wraps two reqwest::Client profiles (command + stream) with the CGI URL
// conventions and the `Authorization` header shared by every request.
// The long-lived attach stream itself lives in `listener`; this module
// owns everything request-shaped.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, RwLock};

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::auth::{self, AuthMethod};
use crate::channel::{Channel, ChannelRegistry};
use crate::config::DeviceConfig;
use crate::dump;
use crate::error::Error;
use crate::listener::{EventsListener, ReconnectConfig};
use crate::transport::TransportConfig;

// ── CGI endpoints ────────────────────────────────────────────────────

pub(crate) const CGI_CONFIG_MANAGER: &str = "/cgi-bin/configManager.cgi";
pub(crate) const CGI_MAGIC_BOX: &str = "/cgi-bin/magicBox.cgi";
pub(crate) const CGI_EVENT_MANAGER: &str = "/cgi-bin/eventManager.cgi";

/// Query-value escape set: everything non-alphanumeric except `,` `-`
/// `_` `.` `~`. Device firmware requires literal commas inside bracketed
/// list parameters (`codes=[VideoMotion,VideoLoss]`); the brackets
/// themselves are escaped.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b',')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

// ── Device ───────────────────────────────────────────────────────────

/// Handle to one camera/DVR.
///
/// Immutable after construction except for the channel registry (updated
/// by info refreshes and live events) and the cached info snapshot.
#[derive(Debug)]
pub struct Device {
    config: DeviceConfig,
    auth_header: HeaderValue,
    command_client: reqwest::Client,
    stream_client: reqwest::Client,
    channels: ChannelRegistry,
    info: RwLock<Option<DeviceInfo>>,
}

/// Device identity and configuration collected by [`Device::get_info`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub serial: String,
    pub device_type: String,
    pub software: BTreeMap<String, String>,
    /// The `table.Network` subtree of the config dump; carries interface
    /// MAC addresses among other things.
    pub network: Value,
    /// User-facing channel number → display title.
    pub channel_titles: BTreeMap<i64, String>,
}

impl Device {
    /// Create a device handle.
    ///
    /// Fails fast with [`Error::Configuration`] if the config selects
    /// Digest auth — challenge-response is not implemented and the
    /// client never downgrades to Basic on its own.
    pub fn new(config: DeviceConfig, transport: &TransportConfig) -> Result<Self, Error> {
        let auth_header = match config.auth {
            AuthMethod::Basic => auth::basic_authorization(&config.username, &config.password)?,
            AuthMethod::Digest => {
                return Err(Error::Configuration {
                    message: "digest authentication is not supported; use basic".into(),
                });
            }
        };

        let command_client = transport.build_command_client()?;
        let stream_client = transport.build_stream_client()?;

        let channels = ChannelRegistry::new(config.channel_offset);
        for (number, name) in &config.channel_names {
            channels.upsert(*number, name.clone());
        }

        Ok(Self {
            config,
            auth_header,
            command_client,
            stream_client,
            channels,
            info: RwLock::new(None),
        })
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// The channel registry owned by this device.
    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    /// Snapshot of a single channel by user-facing number.
    pub fn channel(&self, number: i64) -> Option<Channel> {
        self.channels.get(number)
    }

    /// Last successful [`Device::get_info`] result, if any.
    pub fn cached_info(&self) -> Option<DeviceInfo> {
        self.info.read().expect("info lock poisoned").clone()
    }

    pub(crate) fn stream_client(&self) -> &reqwest::Client {
        &self.stream_client
    }

    pub(crate) fn auth_header(&self) -> &HeaderValue {
        &self.auth_header
    }

    /// Create an events listener for this device. The listener is inert
    /// until [`EventsListener::start`] is called.
    pub fn create_listener(self: &Arc<Self>, reconnect: ReconnectConfig) -> EventsListener {
        EventsListener::new(Arc::clone(self), reconnect)
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build a fully qualified command URL with percent-encoded,
    /// comma-preserving query parameters.
    pub fn command_url(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, Error> {
        let scheme = if self.config.use_tls { "https" } else { "http" };
        let mut raw = format!(
            "{scheme}://{}:{}{path}",
            self.config.host, self.config.port
        );
        for (i, (key, value)) in params.iter().enumerate() {
            raw.push(if i == 0 { '?' } else { '&' });
            let _ = write!(raw, "{key}={}", utf8_percent_encode(value, QUERY_VALUE));
        }
        Ok(Url::parse(&raw)?)
    }

    /// URL for the long-lived event-attach stream.
    pub fn attach_url(&self, alarm_channel: i64, codes: &[String]) -> Result<Url, Error> {
        let codes = format!("[{}]", codes.join(","));
        self.command_url(
            CGI_EVENT_MANAGER,
            &[
                ("action", "attach"),
                ("channel", &alarm_channel.to_string()),
                ("codes", &codes),
            ],
        )
    }

    // ── One-shot commands ────────────────────────────────────────────

    /// Issue a one-shot GET and return the normalized response body
    /// (CRLF folded to LF, surrounding whitespace trimmed).
    pub async fn command(&self, path: &str, params: &[(&str, &str)]) -> Result<String, Error> {
        let url = self.command_url(path, params)?;
        debug!(%url, "device command");

        let resp = self
            .command_client
            .get(url)
            .header(AUTHORIZATION, self.auth_header.clone())
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication {
                message: "device rejected credentials".into(),
            });
        }
        if !status.is_success() {
            return Err(Error::Protocol {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            });
        }

        let body = resp.text().await?;
        Ok(body.replace("\r\n", "\n").trim().to_string())
    }

    /// `configManager.cgi?action=getConfig&name={name}`
    pub async fn get_config(&self, name: &str) -> Result<String, Error> {
        self.command(CGI_CONFIG_MANAGER, &[("action", "getConfig"), ("name", name)])
            .await
    }

    /// `magicBox.cgi?action={action}`
    pub async fn magic_box(&self, action: &str) -> Result<String, Error> {
        self.command(CGI_MAGIC_BOX, &[("action", action)]).await
    }

    // ── Info queries ─────────────────────────────────────────────────

    /// Device serial number.
    pub async fn get_serial(&self) -> Result<String, Error> {
        let body = self.magic_box("getSerialNo").await?;
        single_value(&body)
    }

    /// Device hardware type, e.g. `"IPC-HDW4431C-A"`.
    pub async fn get_device_type(&self) -> Result<String, Error> {
        let body = self.magic_box("getDeviceType").await?;
        single_value(&body)
    }

    /// Software version table (`version`, `build date`, ...).
    pub async fn get_software_version(&self) -> Result<BTreeMap<String, String>, Error> {
        let body = self.magic_box("getSoftwareVersion").await?;
        body.lines()
            .filter(|line| !line.is_empty())
            .map(|line| {
                line.split_once('=')
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .ok_or_else(|| Error::Decode {
                        line: line.to_string(),
                    })
            })
            .collect()
    }

    /// The `table.Network` subtree of the network config dump.
    pub async fn get_network(&self) -> Result<Value, Error> {
        let body = self.get_config("Network").await?;
        let decoded = dump::decode(&body)?;
        Ok(decoded
            .get("table")
            .and_then(|table| table.get("Network"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Channel titles keyed by user-facing (offset-adjusted) number.
    pub async fn get_channel_titles(&self) -> Result<BTreeMap<i64, String>, Error> {
        let body = self.get_config("ChannelTitle").await?;
        let decoded = dump::decode(&body)?;

        let mut titles = BTreeMap::new();
        if let Some(Value::Object(entries)) = decoded
            .get("table")
            .and_then(|table| table.get("ChannelTitle"))
        {
            for (index, entry) in entries {
                let Ok(index) = index.parse::<i64>() else {
                    continue;
                };
                if let Some(name) = entry.get("Name").and_then(Value::as_str) {
                    titles.insert(self.channels.index_to_number(index), name.to_string());
                }
            }
        }
        Ok(titles)
    }

    /// Run the full set of info queries concurrently as a fail-fast
    /// join: any single failure aborts the whole result and nothing is
    /// applied. On success the channel registry picks up the reported
    /// titles and the snapshot is cached.
    ///
    /// The query list is explicit and ordered — serial, type, software,
    /// network, channel titles — so the join set is auditable.
    pub async fn get_info(&self) -> Result<DeviceInfo, Error> {
        let (serial, device_type, software, network, channel_titles) = tokio::try_join!(
            self.get_serial(),
            self.get_device_type(),
            self.get_software_version(),
            self.get_network(),
            self.get_channel_titles(),
        )?;

        for (number, name) in &channel_titles {
            self.channels.upsert(*number, name.clone());
        }

        let info = DeviceInfo {
            serial,
            device_type,
            software,
            network,
            channel_titles,
        };
        *self.info.write().expect("info lock poisoned") = Some(info.clone());
        Ok(info)
    }
}

/// Extract the value of a single `key=value` response body.
fn single_value(body: &str) -> Result<String, Error> {
    body.lines()
        .next()
        .unwrap_or("")
        .split_once('=')
        .map(|(_, value)| value.trim().to_string())
        .ok_or_else(|| Error::Decode {
            line: body.to_string(),
        })
}
