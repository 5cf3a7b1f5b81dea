mod common;

use common::{EventLog, Inbound, MockBroker, publish_frame, publish_topic};
use embassy_futures::join::join;
use futures::executor::block_on;
use tracker_cloud::backend::MqttBackend;
use tracker_cloud::cloud::{ClientId, CloudConfig, CloudWrapEvent, CloudWrapper, StateGetPolicy};
use tracker_cloud::codec::{CloudCodec, CloudCommand, CommandType, Recipient};
use tracker_cloud::config::BackendConfig;
use tracker_cloud::error::WrapError;

#[derive(Debug, Clone, PartialEq)]
enum App {
    Connecting,
    Connected,
    Disconnected,
    Command(CloudCommand),
}

const CONFIG: CloudConfig<'static> = CloudConfig::new(BackendConfig::new("broker.test"));

#[test]
fn full_session_through_the_wrapper() {
    let backend = MqttBackend::new();
    let broker = MockBroker::new();
    let log = EventLog::<App>::new();

    // The application decodes every inbound payload as a command document.
    let on_event = |event: CloudWrapEvent<'_>| match event {
        CloudWrapEvent::Connecting => log.record(App::Connecting),
        CloudWrapEvent::Connected => log.record(App::Connected),
        CloudWrapEvent::Disconnected => log.record(App::Disconnected),
        CloudWrapEvent::DataReceived(payload) => {
            let mut codec = CloudCodec::init(|cmd: &CloudCommand| log.record(App::Command(*cmd)));
            codec.decode_command(payload).unwrap();
        }
    };

    let client_id = ClientId::custom("352656100123456").unwrap();
    let (cloud, mut poll) =
        CloudWrapper::init(&backend, client_id, CONFIG, broker.connector(), on_event).unwrap();
    assert_eq!(poll.client_id(), "nrf-352656100123456");
    assert_eq!(cloud.topics().cfg.as_str(), "352656100123456/cfg");

    cloud.connect().unwrap();
    assert_eq!(
        cloud.connect(),
        Err(WrapError::Backend(tracker_cloud::BackendError::InProgress))
    );

    block_on(join(poll.poll_once(), async {
        broker.accept().await;

        // The config topic is subscribed before the application hears about it.
        let subscribe = broker.next_sent().await;
        assert_eq!(subscribe[0], 0x82);
        assert!(subscribe.ends_with(b"352656100123456/cfg\x01"));
        log.wait_for(&App::Connected).await;
        broker.send(&[0x90, 0x03, 0x00, 0x01, 0x01]);

        let command = br#"{"set":{"environment":{"temperature":{"threshold_high":30}}}}"#;
        broker.send(&publish_frame("352656100123456/cfg", command, None));

        cloud.data_send(br#"{"appId":"TEMP","data":"21.5","messageType":"DATA"}"#).unwrap();
        assert_eq!(publish_topic(&broker.next_sent().await), "352656100123456/messages");
        cloud.batch_send(b"[]").unwrap();
        assert_eq!(publish_topic(&broker.next_sent().await), "352656100123456/batch");
        cloud.ui_send(b"{}").unwrap();
        assert_eq!(publish_topic(&broker.next_sent().await), "352656100123456/messages");
        cloud.state_send(b"{}").unwrap();
        let state = broker.next_sent().await;
        assert_eq!(state[0], 0x30, "sends are at most once");
        assert_eq!(publish_topic(&state), "352656100123456/messages");

        assert_eq!(cloud.state_get(), Ok(()));
        cloud.disconnect().unwrap();
        assert_eq!(broker.next_sent().await, common::DISCONNECT);
    }));

    let events = log.events();
    assert_eq!(events.len(), 4, "{events:?}");
    assert_eq!(events[0], App::Connecting);
    assert_eq!(events[1], App::Connected);
    let App::Command(cmd) = &events[2] else {
        panic!("expected a command, got {:?}", events[2]);
    };
    assert_eq!(cmd.recipient, Recipient::Environment);
    assert_eq!(cmd.kind, CommandType::ThresholdHigh);
    assert_eq!(cmd.value, Some(30.0));
    assert_eq!(events[3], App::Disconnected);

    assert!(matches!(
        cloud.data_send(b"{}"),
        Err(WrapError::Backend(tracker_cloud::BackendError::NotConnected))
    ));
}

#[test]
fn faults_surface_only_as_disconnected() {
    let backend = MqttBackend::new();
    let broker = MockBroker::new();
    let log = EventLog::<App>::new();
    let on_event = |event: CloudWrapEvent<'_>| {
        if let CloudWrapEvent::Disconnected = event {
            log.record(App::Disconnected)
        }
    };

    let client_id = ClientId::custom("dev").unwrap();
    let (cloud, mut poll) =
        CloudWrapper::init(&backend, client_id, CONFIG, broker.connector(), on_event).unwrap();

    for _ in 0..2 {
        cloud.connect().unwrap();
        block_on(join(poll.poll_once(), async {
            broker.accept().await;
            broker.next_sent().await;
            broker.push(Inbound::Fault);
        }));
    }

    assert_eq!(log.events(), [App::Disconnected, App::Disconnected]);
}

#[test]
fn init_rejects_oversized_ids_and_honours_state_get_policy() {
    let backend = MqttBackend::new();
    let broker = MockBroker::new();

    // Fits the id limit on its own but not with the "nrf-" prefix.
    let client_id = ClientId::custom(&"d".repeat(38)).unwrap();
    let ignore = |_: CloudWrapEvent<'_>| {};
    let err = CloudWrapper::init(&backend, client_id, CONFIG, broker.connector(), ignore);
    assert!(matches!(err, Err(WrapError::ClientIdTooLong)));

    let config = CONFIG.with_state_get(StateGetPolicy::Unsupported);
    let client_id = ClientId::custom("dev").unwrap();
    let (cloud, _poll) =
        CloudWrapper::init(&backend, client_id, config, broker.connector(), ignore).unwrap();
    assert_eq!(cloud.state_get(), Err(WrapError::NotSupported));
}
