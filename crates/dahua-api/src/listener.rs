//! Live event stream with fixed-delay reconnect.
//!
//! Attaches to the device's `eventManager.cgi?action=attach` endpoint
//! and keeps the feed alive: one worker task per device, cooperative
//! shutdown via [`CancellationToken`], decoded events fanned out
//! synchronously to registered callbacks from the reading task.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dahua_api::{Device, DeviceConfig, ReconnectConfig, TransportConfig};
//!
//! let device = Arc::new(Device::new(config, &TransportConfig::default())?);
//! let listener = device.create_listener(ReconnectConfig::default());
//! listener.add_event_callback(Arc::new(|event| {
//!     println!("{}: {:?}", event.code, event.channel_number);
//! }));
//!
//! let handle = listener.start();
//! // ... later
//! handle.shutdown();
//! handle.join().await;
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{AUTHORIZATION, CONNECTION, HeaderValue};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::device::Device;
use crate::error::Error;
use crate::event::{DeviceEvent, LineBuffer, is_status_line, parse_event_line};

// ── Connection state ─────────────────────────────────────────────────

/// Lifecycle of the single connection behind a listener. Exactly one
/// state is live at any instant, and a TCP/HTTP resource is held only
/// in `Streaming` (and transiently while `Connecting`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Streaming,
    Stopping,
    Stopped,
}

// ── Reconnect policy ─────────────────────────────────────────────────

/// Pacing applied after a benign read timeout (the device idles between
/// events; a timed-out read is not a fault).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdlePolicy {
    /// Reconnect immediately.
    #[default]
    Immediate,
    /// Wait out the regular retry delay first.
    Delayed,
}

/// Reconnection pacing for the attach stream.
///
/// The delay is fixed rather than exponential: the attach endpoint is a
/// singleton resource per device, and the only hard requirement is that
/// retries never busy-loop.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay between a failed/closed connection and the next attempt.
    pub retry_delay: Duration,
    /// Pacing after a benign idle timeout.
    pub idle_policy: IdlePolicy,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(5),
            idle_policy: IdlePolicy::Immediate,
        }
    }
}

// ── Callback registry ────────────────────────────────────────────────

/// Subscriber callback, fired from the listening task.
pub type EventCallback = Arc<dyn Fn(&DeviceEvent) + Send + Sync>;

/// Registered callbacks in registration order, keyed by `Arc` identity.
#[derive(Default)]
pub(crate) struct CallbackRegistry {
    callbacks: Mutex<Vec<EventCallback>>,
}

impl CallbackRegistry {
    /// Register a callback. Adding the same `Arc` twice is a no-op.
    pub(crate) fn add(&self, callback: EventCallback) {
        let mut callbacks = self.callbacks.lock().expect("callback registry poisoned");
        if callbacks.iter().any(|cb| Arc::ptr_eq(cb, &callback)) {
            return;
        }
        callbacks.push(callback);
    }

    /// Remove a previously registered callback.
    pub(crate) fn remove(&self, callback: &EventCallback) -> Result<(), Error> {
        let mut callbacks = self.callbacks.lock().expect("callback registry poisoned");
        match callbacks.iter().position(|cb| Arc::ptr_eq(cb, callback)) {
            Some(position) => {
                callbacks.remove(position);
                Ok(())
            }
            None => Err(Error::CallbackNotFound),
        }
    }

    /// Invoke every callback in registration order. A panicking
    /// subscriber is isolated and logged; delivery to the remaining
    /// subscribers and the stream reader itself continue.
    pub(crate) fn dispatch(&self, event: &DeviceEvent) {
        let snapshot: Vec<EventCallback> = self
            .callbacks
            .lock()
            .expect("callback registry poisoned")
            .clone();
        for callback in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                warn!(code = %event.code, "event callback panicked");
            }
        }
    }
}

// ── EventsListener ───────────────────────────────────────────────────

/// Configured-but-not-started event listener for one device.
pub struct EventsListener {
    device: Arc<Device>,
    reconnect: ReconnectConfig,
    callbacks: Arc<CallbackRegistry>,
}

impl EventsListener {
    pub fn new(device: Arc<Device>, reconnect: ReconnectConfig) -> Self {
        Self {
            device,
            reconnect,
            callbacks: Arc::new(CallbackRegistry::default()),
        }
    }

    /// The attach URL this listener subscribes to.
    pub fn subscribe_url(&self) -> Result<Url, Error> {
        let config = self.device.config();
        self.device
            .attach_url(config.alarm_channel, &config.monitored_codes)
    }

    /// Register a callback. Adding the same `Arc` twice is a no-op.
    pub fn add_event_callback(&self, callback: EventCallback) {
        self.callbacks.add(callback);
    }

    /// Remove a previously registered callback.
    pub fn remove_event_callback(&self, callback: &EventCallback) -> Result<(), Error> {
        self.callbacks.remove(callback)
    }

    /// Spawn the worker task and return a handle to it.
    pub fn start(self) -> ListenerHandle {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(listen_loop(
            Arc::clone(&self.device),
            self.reconnect.clone(),
            Arc::clone(&self.callbacks),
            state_tx,
            cancel.clone(),
        ));

        ListenerHandle {
            cancel,
            state_rx,
            callbacks: self.callbacks,
            task,
        }
    }
}

/// Handle to a running listener.
pub struct ListenerHandle {
    cancel: CancellationToken,
    state_rx: watch::Receiver<ConnectionState>,
    callbacks: Arc<CallbackRegistry>,
    task: tokio::task::JoinHandle<()>,
}

impl ListenerHandle {
    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch receiver for observing state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Register a callback on the running listener.
    pub fn add_event_callback(&self, callback: EventCallback) {
        self.callbacks.add(callback);
    }

    /// Remove a previously registered callback.
    pub fn remove_event_callback(&self, callback: &EventCallback) -> Result<(), Error> {
        self.callbacks.remove(callback)
    }

    /// Request cooperative shutdown. The stop flag is polled between
    /// reads and between backoff waits; an in-flight read finishes or
    /// times out naturally.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for the worker task to exit.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

// ── Worker loop ──────────────────────────────────────────────────────

/// How one connection attempt ended.
enum StreamEnd {
    /// The device closed the stream (EOF).
    Closed,
    /// A single read timed out with the device idle.
    Idle,
    /// A stop request was observed at a record boundary.
    Stopped,
}

/// Supervisor: connect → stream → classify the ending → delay → retry,
/// forever, until a stop request. Never more than one connection at a
/// time; the previous response is dropped before the next attempt.
async fn listen_loop(
    device: Arc<Device>,
    reconnect: ReconnectConfig,
    callbacks: Arc<CallbackRegistry>,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let _ = state_tx.send(ConnectionState::Connecting);
        let outcome = attach_once(&device, &callbacks, &state_tx, &cancel).await;
        let _ = state_tx.send(ConnectionState::Disconnected);

        let delay = match outcome {
            Ok(StreamEnd::Stopped) => break,
            Ok(StreamEnd::Idle) => match reconnect.idle_policy {
                IdlePolicy::Immediate => {
                    debug!("event stream idle, reconnecting immediately");
                    None
                }
                IdlePolicy::Delayed => {
                    debug!("event stream idle, reconnecting after delay");
                    Some(reconnect.retry_delay)
                }
            },
            Ok(StreamEnd::Closed) => {
                info!(
                    host = device.host(),
                    "event stream closed by device, reconnecting"
                );
                Some(reconnect.retry_delay)
            }
            Err(e) if e.is_auth() => {
                warn!(
                    host = device.host(),
                    error = %e,
                    "device rejected credentials on event attach, retrying"
                );
                Some(reconnect.retry_delay)
            }
            Err(e) => {
                warn!(host = device.host(), error = %e, "event stream failed");
                Some(reconnect.retry_delay)
            }
        };

        if let Some(delay) = delay {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    let _ = state_tx.send(ConnectionState::Stopping);
    let _ = state_tx.send(ConnectionState::Stopped);
    debug!(host = device.host(), "event listener exiting");
}

/// One full connection attempt: request, status check, stream
/// consumption until it ends one way or another.
async fn attach_once(
    device: &Device,
    callbacks: &CallbackRegistry,
    state_tx: &watch::Sender<ConnectionState>,
    cancel: &CancellationToken,
) -> Result<StreamEnd, Error> {
    let config = device.config();
    let url = device.attach_url(config.alarm_channel, &config.monitored_codes)?;
    debug!(%url, "attaching to event stream");

    let resp = device
        .stream_client()
        .get(url)
        .header(AUTHORIZATION, device.auth_header().clone())
        .header(CONNECTION, HeaderValue::from_static("keep-alive"))
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

    let _ = state_tx.send(ConnectionState::Streaming);
    info!(host = device.host(), "event stream established");

    let mut stream = resp.bytes_stream();
    let mut lines = LineBuffer::new();
    let mut confirmed = false;

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) if e.is_timeout() => {
                debug!(host = device.host(), "read timeout on idle event stream");
                return Ok(StreamEnd::Idle);
            }
            Err(e) => return Err(Error::Transport(e)),
        };

        for line in lines.push(&chunk) {
            if is_status_line(&line) {
                if !confirmed {
                    confirmed = true;
                    debug!(line = %line, "event stream confirmed by status line");
                }
                continue;
            }
            match parse_event_line(&line) {
                Ok(Some(record)) => {
                    let event = record.resolve(device.channels());
                    debug!(
                        code = %event.code,
                        action = ?event.action,
                        channel = ?event.channel_number,
                        "event received"
                    );
                    callbacks.dispatch(&event);
                }
                Ok(None) => {} // keep-alive filler between records
                Err(e) => warn!(error = %e, "dropping malformed event record"),
            }
        }

        // stop is polled at record/read boundaries, not pre-emptively
        if cancel.is_cancelled() {
            return Ok(StreamEnd::Stopped);
        }
    }

    Ok(StreamEnd::Closed)
}
