// dahua-api: Async Rust client for Dahua camera/DVR HTTP APIs

pub mod auth;
pub mod channel;
pub mod config;
pub mod device;
pub mod dump;
pub mod error;
pub mod event;
pub mod listener;
pub mod transport;

pub use auth::AuthMethod;
pub use channel::{Channel, ChannelRegistry};
pub use config::DeviceConfig;
pub use device::{Device, DeviceInfo};
pub use error::Error;
pub use event::{DeviceEvent, EventRecord};
pub use listener::{
    ConnectionState, EventCallback, EventsListener, IdlePolicy, ListenerHandle, ReconnectConfig,
};
pub use transport::{TlsMode, TransportConfig};
