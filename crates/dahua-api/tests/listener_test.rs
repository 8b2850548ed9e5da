// Integration tests for the event listener: streaming, reconnect,
// failure classification, and cooperative stop. wiremock serves finite
// attach bodies; the end of each body looks like the device closing the
// stream, which drives the reconnect machinery.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use secrecy::SecretString;
use tokio::sync::watch;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dahua_api::{
    ConnectionState, Device, DeviceConfig, DeviceEvent, EventCallback, ListenerHandle,
    ReconnectConfig, TlsMode, TransportConfig,
};

// ── Helpers ─────────────────────────────────────────────────────────

const RETRY_DELAY: Duration = Duration::from_millis(300);

fn transport() -> TransportConfig {
    TransportConfig {
        tls: TlsMode::System,
        command_timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(5),
        read_timeout: Duration::from_secs(5),
    }
}

fn device_for(server: &MockServer) -> Arc<Device> {
    let uri = url::Url::parse(&server.uri()).unwrap();
    let mut config = DeviceConfig::new(
        uri.host_str().unwrap(),
        "admin",
        SecretString::from("admin".to_string()),
        1,
    );
    config.port = uri.port().unwrap();
    config.monitored_codes = vec!["All".to_string()];
    Arc::new(Device::new(config, &transport()).unwrap())
}

fn attach_body(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/plain")
}

async fn mount_attach_once(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/cgi-bin/eventManager.cgi"))
        .and(query_param("action", "attach"))
        .respond_with(response)
        .up_to_n_times(1)
        .mount(server)
        .await;
}

/// Start a listener on `device`, collecting delivered events and
/// observed state transitions.
fn start_collecting(
    device: &Arc<Device>,
) -> (
    ListenerHandle,
    Arc<Mutex<Vec<DeviceEvent>>>,
    Arc<Mutex<Vec<ConnectionState>>>,
) {
    let listener = device.create_listener(ReconnectConfig {
        retry_delay: RETRY_DELAY,
        idle_policy: dahua_api::IdlePolicy::Immediate,
    });

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let callback: EventCallback = Arc::new(move |event: &DeviceEvent| {
        sink.lock().unwrap().push(event.clone());
    });
    listener.add_event_callback(callback);

    let handle = listener.start();

    let states = Arc::new(Mutex::new(Vec::new()));
    let state_sink = Arc::clone(&states);
    let mut state_rx: watch::Receiver<ConnectionState> = handle.state_changes();
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = *state_rx.borrow();
            state_sink.lock().unwrap().push(state);
            if state == ConnectionState::Stopped {
                break;
            }
        }
    });

    (handle, events, states)
}

/// Poll until `events` holds at least `count` entries or the deadline
/// passes.
async fn wait_for_events(events: &Arc<Mutex<Vec<DeviceEvent>>>, count: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while events.lock().unwrap().len() < count {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {count} events, got {}",
            events.lock().unwrap().len()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn attach_request_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|req| req.url.path() == "/cgi-bin/eventManager.cgi")
        .count()
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_events_delivered_in_order_across_reconnect() {
    let server = MockServer::start().await;

    // first connection: echoed status line plus three records, then EOF
    mount_attach_once(
        &server,
        attach_body(
            "HTTP/1.1 200 OK\r\n\
             Code=VideoMotion;action=Start;index=0\r\n\
             Code=VideoMotion;action=Stop;index=0\r\n\
             Code=AlarmLocal;action=Start;index=1\r\n",
        ),
    )
    .await;
    // second connection after the reconnect delay: two more records
    mount_attach_once(
        &server,
        attach_body(
            "Code=VideoLoss;action=Start;index=2\r\n\
             Code=VideoBlind;action=Start;index=3\r\n",
        ),
    )
    .await;

    let device = device_for(&server);
    let (handle, events, states) = start_collecting(&device);

    wait_for_events(&events, 5).await;

    handle.shutdown();
    handle.join().await;

    // both attempts hit the server, with one delay in between, and the
    // stop request prevented a third
    assert_eq!(attach_request_count(&server).await, 2);

    let codes: Vec<String> = events.lock().unwrap().iter().map(|e| e.code.clone()).collect();
    assert_eq!(
        codes,
        vec![
            "VideoMotion",
            "VideoMotion",
            "AlarmLocal",
            "VideoLoss",
            "VideoBlind"
        ]
    );

    // channel resolution applied the configured offset
    let numbers: Vec<Option<i64>> = events
        .lock()
        .unwrap()
        .iter()
        .map(|e| e.channel_number)
        .collect();
    assert_eq!(numbers, vec![Some(1), Some(1), Some(2), Some(3), Some(4)]);

    // the lifecycle walked connect -> stream -> disconnect and back
    // (watch receivers coalesce rapid transitions, so assert presence
    // rather than the exact trace)
    let observed = states.lock().unwrap().clone();
    assert!(observed.contains(&ConnectionState::Connecting));
    assert!(observed.contains(&ConnectionState::Streaming));
    assert!(observed.contains(&ConnectionState::Disconnected));
    assert_eq!(observed.last(), Some(&ConnectionState::Stopped));
}

#[tokio::test]
async fn test_malformed_record_does_not_break_the_stream() {
    let server = MockServer::start().await;
    mount_attach_once(
        &server,
        attach_body(
            "Code=VideoMotion;action=Start;index=0\r\n\
             Code=Broken;no-separator-here\r\n\
             Code=VideoLoss;action=Start;index=1\r\n",
        ),
    )
    .await;

    let device = device_for(&server);
    let (handle, events, _states) = start_collecting(&device);

    wait_for_events(&events, 2).await;
    handle.shutdown();
    handle.join().await;

    let codes: Vec<String> = events.lock().unwrap().iter().map(|e| e.code.clone()).collect();
    assert_eq!(codes, vec!["VideoMotion", "VideoLoss"]);
}

#[tokio::test]
async fn test_unauthorized_connect_is_retried() {
    let server = MockServer::start().await;
    mount_attach_once(&server, ResponseTemplate::new(401)).await;
    mount_attach_once(&server, attach_body("Code=VideoMotion;action=Start;index=0\r\n")).await;

    let device = device_for(&server);
    let (handle, events, _states) = start_collecting(&device);

    wait_for_events(&events, 1).await;
    assert!(attach_request_count(&server).await >= 2);

    handle.shutdown();
    handle.join().await;
}

#[tokio::test]
async fn test_server_error_connect_is_retried() {
    let server = MockServer::start().await;
    mount_attach_once(&server, ResponseTemplate::new(500)).await;
    mount_attach_once(&server, attach_body("Code=AlarmLocal;action=Start;index=0\r\n")).await;

    let device = device_for(&server);
    let (handle, events, _states) = start_collecting(&device);

    wait_for_events(&events, 1).await;
    assert!(attach_request_count(&server).await >= 2);

    handle.shutdown();
    handle.join().await;
}

#[tokio::test]
async fn test_stop_during_backoff_exits_without_reconnecting() {
    let server = MockServer::start().await;
    // single empty-bodied connection; everything after it is backoff
    mount_attach_once(&server, attach_body("")).await;

    let device = device_for(&server);
    let listener = device.create_listener(ReconnectConfig {
        retry_delay: Duration::from_secs(30),
        idle_policy: dahua_api::IdlePolicy::Immediate,
    });
    let handle = listener.start();
    let state_rx = handle.state_changes();

    // wait until the first (and only) attempt has come and gone
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while attach_request_count(&server).await < 1 {
        assert!(tokio::time::Instant::now() < deadline, "no attach attempt seen");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    handle.shutdown();
    tokio::time::timeout(Duration::from_secs(2), handle.join())
        .await
        .expect("listener did not stop within the backoff interval");

    assert_eq!(*state_rx.borrow(), ConnectionState::Stopped);
    assert_eq!(attach_request_count(&server).await, 1);
}

#[tokio::test]
async fn test_callback_registration_semantics_on_running_listener() {
    let server = MockServer::start().await;
    mount_attach_once(&server, attach_body("Code=VideoMotion;action=Start;index=0\r\n")).await;

    let device = device_for(&server);
    let listener = device.create_listener(ReconnectConfig {
        retry_delay: Duration::from_secs(30),
        idle_policy: dahua_api::IdlePolicy::Immediate,
    });

    let count = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&count);
    let callback: EventCallback = Arc::new(move |_event: &DeviceEvent| {
        *sink.lock().unwrap() += 1;
    });

    // duplicate registration collapses to one
    listener.add_event_callback(Arc::clone(&callback));
    listener.add_event_callback(Arc::clone(&callback));

    // removing something never registered fails and changes nothing
    let stranger: EventCallback = Arc::new(|_event: &DeviceEvent| {});
    assert!(listener.remove_event_callback(&stranger).is_err());

    let handle = listener.start();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while *count.lock().unwrap() < 1 {
        assert!(tokio::time::Instant::now() < deadline, "event never delivered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // small grace period: a duplicate registration would double-fire
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*count.lock().unwrap(), 1);

    handle.shutdown();
    handle.join().await;
}
