use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use hdhomerun_client::{ClientConfig, ControlError, DeviceHandle, DeviceSelector, DiscoveredDevice};
use hdhomerun_protocol::DEVICE_TYPE_TUNER;
use hdhomerun_test_harness::{MockTransport, SimulatedTuner};

const DEVICE_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 20);
const DEVICE_ID: u32 = 0x1040_A1B6;

fn setup() -> (MockTransport, SimulatedTuner, DeviceHandle) {
    let transport = MockTransport::new();
    let tuner = SimulatedTuner::new("hdhomerun4_atsc")
        .with_var("/tuner1/channelmap", "us-bcast")
        .with_var(
            "/tuner1/status",
            "ch=8vsb:177000000 lock=8vsb ss=82 snq=71 seq=100 bps=19394080 pps=1000",
        );
    transport.add_tuner(DEVICE_IP, tuner.clone());

    let device = DeviceHandle::new(
        Arc::new(transport.clone()),
        ClientConfig::default(),
        DEVICE_ID,
        DEVICE_IP,
        1,
    );
    (transport, tuner, device)
}

fn announce(transport: &MockTransport) {
    transport.add_device(
        Duration::from_millis(5),
        DiscoveredDevice {
            ip_addr: DEVICE_IP,
            device_type: DEVICE_TYPE_TUNER,
            device_id: DEVICE_ID,
            tuner_count: 2,
            is_legacy: false,
            device_auth: String::new(),
            base_url: format!("http://{}:80", DEVICE_IP),
        },
    );
}

#[tokio::test]
async fn test_basic_queries() {
    let (transport, _tuner, mut device) = setup();

    assert!(!device.is_connected());
    assert_eq!(device.get_model_str().await.unwrap(), "hdhomerun4_atsc");
    assert_eq!(device.get_tuner_channelmap().await.unwrap(), "us-bcast");

    let status = device.get_tuner_status().await.unwrap();
    assert!(status.lock_supported);
    assert_eq!(status.signal_strength, 82);

    assert!(device.is_connected());
    assert_eq!(transport.connect_count(), 1);
    assert_eq!(
        transport.connected_addrs()[0],
        SocketAddrV4::new(DEVICE_IP, 65001)
    );
}

#[tokio::test]
async fn test_set_var_sends_lockkey() {
    let (_transport, tuner, mut device) = setup();
    device.set_lockkey(Some(0xCAFE));

    device.set_channelscan_channelmap("us-cable").await.unwrap();
    device.get_model_str().await.unwrap();

    let requests = tuner.requests();
    assert_eq!(requests[0].name, "/tuner1/channelscan/channelmap");
    assert_eq!(requests[0].value.as_deref(), Some("us-cable"));
    assert_eq!(requests[0].lockkey, Some(0xCAFE));
    assert_eq!(requests[1].lockkey, None);
    assert_eq!(
        tuner.var("/tuner1/channelscan/channelmap").as_deref(),
        Some("us-cable")
    );
}

#[tokio::test]
async fn test_unknown_variable_is_unsupported() {
    let (transport, _tuner, mut device) = setup();
    assert_eq!(
        device.get_var("/sys/bogus").await,
        Err(ControlError::Unsupported("/sys/bogus".to_string()))
    );
    assert!(device.is_connected());
    assert_eq!(device.get_model_str().await.unwrap(), "hdhomerun4_atsc");
    assert_eq!(transport.connect_count(), 1);
}

#[tokio::test]
async fn test_error_message_is_rejected() {
    let (transport, tuner, mut device) = setup();
    tuner.reject("/tuner1/channelscan/init", "ERROR: resource locked");
    assert_eq!(
        device.channelscan_init("us-bcast").await,
        Err(ControlError::Rejected("ERROR: resource locked".to_string()))
    );
    assert!(device.is_connected());
    device.get_model_str().await.unwrap();
    assert_eq!(transport.connect_count(), 1);
}

#[tokio::test]
async fn test_resends_on_stale_connection() {
    let (transport, tuner, mut device) = setup();
    device.get_model_str().await.unwrap();

    tuner.drop_connections();
    assert_eq!(device.get_model_str().await.unwrap(), "hdhomerun4_atsc");
    assert_eq!(transport.connect_count(), 2);
    assert_eq!(tuner.requests().len(), 2);
}

#[tokio::test]
async fn test_hangup_after_send_is_not_retried() {
    let (transport, tuner, mut device) = setup();
    tuner.hang_up_after_next(1);

    assert_eq!(
        device.set_var("/tuner1/channelmap", "us-cable").await,
        Err(ControlError::ConnectionClosed)
    );
    assert!(!device.is_connected());
    assert_eq!(transport.connect_count(), 1);
    assert_eq!(tuner.requests().len(), 1);
    assert_eq!(tuner.var("/tuner1/channelmap").as_deref(), Some("us-cable"));

    assert_eq!(device.get_tuner_channelmap().await.unwrap(), "us-cable");
    assert_eq!(transport.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_closes_connection() {
    let (transport, tuner, mut device) = setup();
    tuner.set_silent(true);

    assert_eq!(device.get_model_str().await, Err(ControlError::Timeout));
    assert!(!device.is_connected());

    tuner.set_silent(false);
    assert_eq!(device.get_model_str().await.unwrap(), "hdhomerun4_atsc");
    assert_eq!(transport.connect_count(), 2);
}

#[tokio::test]
async fn test_reassembles_split_replies() {
    let (transport, _tuner, mut device) = setup();
    transport.set_chunk_size(3);

    assert_eq!(device.get_model_str().await.unwrap(), "hdhomerun4_atsc");
    assert_eq!(device.get_tuner_channelmap().await.unwrap(), "us-bcast");
}

#[tokio::test]
async fn test_unreachable_device() {
    let transport = MockTransport::new();
    let mut device = DeviceHandle::new(
        Arc::new(transport),
        ClientConfig::default(),
        DEVICE_ID,
        DEVICE_IP,
        0,
    );
    assert!(matches!(
        device.get_model_str().await,
        Err(ControlError::Unreachable(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_resolves_ip_from_id() {
    let (transport, _tuner, _) = setup();
    announce(&transport);

    let selector: DeviceSelector = "1040A1B6-1".parse().unwrap();
    let mut device =
        DeviceHandle::from_selector(Arc::new(transport.clone()), ClientConfig::default(), selector);

    assert_eq!(device.get_device_ip().await.unwrap(), DEVICE_IP);
    assert_eq!(device.tuner_index(), 1);
    assert_eq!(device.get_tuner_channelmap().await.unwrap(), "us-bcast");

    let sent = transport.sent_datagrams();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.ip().is_broadcast());
}

#[tokio::test(start_paused = true)]
async fn test_resolves_id_from_ip() {
    let (transport, _tuner, _) = setup();
    announce(&transport);

    let mut device = DeviceHandle::from_device_str(
        Arc::new(transport.clone()),
        ClientConfig::default(),
        "192.168.1.20",
    )
    .unwrap();

    assert_eq!(device.get_device_id().await.unwrap(), DEVICE_ID);
    assert_eq!(device.get_device_id().await.unwrap(), DEVICE_ID);
    assert_eq!(transport.sent_datagrams().len(), 1);
    assert_eq!(transport.sent_datagrams()[0].1.ip(), &DEVICE_IP);
}

#[tokio::test(start_paused = true)]
async fn test_unresolvable_id() {
    let transport = MockTransport::new();
    let mut device = DeviceHandle::from_device_str(
        Arc::new(transport),
        ClientConfig::default(),
        "1040A1B6",
    )
    .unwrap();
    assert!(matches!(
        device.get_device_ip().await,
        Err(ControlError::Unreachable(_))
    ));
}
