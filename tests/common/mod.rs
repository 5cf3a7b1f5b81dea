//! In-memory broker for driving the backend without a network.
#![allow(dead_code)]

use core::cell::RefCell;
use core::sync::atomic::{AtomicUsize, Ordering};

use embassy_futures::yield_now;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, with_timeout};
use tracker_cloud::backend::BackendEvent;
use tracker_cloud::config::BrokerConfig;
use tracker_cloud::transport::{Connector, MqttTransport};

pub const CONNACK_OK: &[u8] = &[0x20, 0x02, 0x00, 0x00];
pub const PINGREQ: &[u8] = &[0xC0, 0x00];
pub const PINGRESP: &[u8] = &[0xD0, 0x00];
pub const DISCONNECT: &[u8] = &[0xE0, 0x00];

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// What the broker does next on the device's socket.
#[derive(Debug)]
pub enum Inbound {
    Data(Vec<u8>),
    /// Orderly hangup.
    Close,
    /// Socket error.
    Fault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockError;

pub struct MockBroker {
    to_device: Channel<CriticalSectionRawMutex, Inbound, 16>,
    from_device: Channel<CriticalSectionRawMutex, Vec<u8>, 16>,
    pub connects: AtomicUsize,
    pub aborts: AtomicUsize,
}

impl MockBroker {
    pub fn new() -> Self {
        Self {
            to_device: Channel::new(),
            from_device: Channel::new(),
            connects: AtomicUsize::new(0),
            aborts: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, inbound: Inbound) {
        self.to_device.try_send(inbound).unwrap();
    }

    pub fn send(&self, bytes: &[u8]) {
        self.push(Inbound::Data(bytes.to_vec()));
    }

    /// Next packet written by the device.
    pub async fn next_sent(&self) -> Vec<u8> {
        with_timeout(STEP_TIMEOUT, self.from_device.receive())
            .await
            .expect("device sent nothing")
    }

    pub fn nothing_sent(&self) -> bool {
        self.from_device.is_empty()
    }

    /// Performs the CONNECT/CONNACK exchange.
    pub async fn accept(&self) {
        let connect = self.next_sent().await;
        assert_eq!(connect[0], 0x10, "expected CONNECT, got {connect:02x?}");
        self.send(CONNACK_OK);
    }

    pub fn connector(&self) -> MockConnector<'_> {
        MockConnector {
            broker: self,
            failures: 0,
        }
    }
}

pub struct MockConnector<'b> {
    broker: &'b MockBroker,
    /// Connection attempts left to fail.
    pub failures: usize,
}

impl<'b> Connector for MockConnector<'b> {
    type Transport<'c>
        = MockTransport<'b>
    where
        Self: 'c;

    type Error = MockError;

    async fn connect<'c>(
        &'c mut self,
        _broker: &BrokerConfig<'_>,
    ) -> Result<MockTransport<'b>, MockError> {
        self.broker.connects.fetch_add(1, Ordering::SeqCst);
        if self.failures > 0 {
            self.failures -= 1;
            return Err(MockError);
        }
        Ok(MockTransport {
            broker: self.broker,
            pending: Vec::new(),
        })
    }
}

pub struct MockTransport<'b> {
    broker: &'b MockBroker,
    pending: Vec<u8>,
}

impl MqttTransport for MockTransport<'_> {
    type Error = MockError;

    async fn send(&mut self, buf: &[u8]) -> Result<(), MockError> {
        self.broker.from_device.try_send(buf.to_vec()).map_err(|_| MockError)
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, MockError> {
        if self.pending.is_empty() {
            match self.broker.to_device.receive().await {
                Inbound::Data(data) => self.pending = data,
                Inbound::Close => return Ok(0),
                Inbound::Fault => return Err(MockError),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    fn abort(&mut self) {
        self.broker.aborts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Owned copy of a backend event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Connecting,
    Connected,
    Ready,
    Disconnected,
    Data { topic: String, payload: Vec<u8> },
}

impl From<BackendEvent<'_>> for Seen {
    fn from(event: BackendEvent<'_>) -> Self {
        match event {
            BackendEvent::Connecting => Seen::Connecting,
            BackendEvent::Connected => Seen::Connected,
            BackendEvent::Ready => Seen::Ready,
            BackendEvent::Disconnected => Seen::Disconnected,
            BackendEvent::DataReceived { topic, payload } => Seen::Data {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            },
        }
    }
}

/// Records events in arrival order.
pub struct EventLog<T>(RefCell<Vec<T>>);

impl<T: Clone + PartialEq + core::fmt::Debug> EventLog<T> {
    pub fn new() -> Self {
        Self(RefCell::new(Vec::new()))
    }

    pub fn record(&self, event: T) {
        self.0.borrow_mut().push(event);
    }

    pub fn events(&self) -> Vec<T> {
        self.0.borrow().clone()
    }

    /// Waits until `event` has been recorded.
    pub async fn wait_for(&self, event: &T) {
        let seen = async {
            while !self.0.borrow().contains(event) {
                yield_now().await;
            }
        };
        with_timeout(STEP_TIMEOUT, seen)
            .await
            .unwrap_or_else(|_| panic!("{event:?} never happened, saw {:?}", self.events()));
    }
}

impl EventLog<Seen> {
    pub fn backend_handler(&self) -> impl FnMut(BackendEvent<'_>) + '_ {
        move |event: BackendEvent<'_>| self.record(event.into())
    }
}

/// Topic of a PUBLISH sent by the device.
pub fn publish_topic(frame: &[u8]) -> String {
    assert_eq!(frame[0] & 0xF0, 0x30, "expected PUBLISH, got {frame:02x?}");
    let len = u16::from_be_bytes([frame[2], frame[3]]) as usize;
    String::from_utf8(frame[4..4 + len].to_vec()).unwrap()
}

/// Builds an inbound PUBLISH frame.
pub fn publish_frame(topic: &str, payload: &[u8], qos1_id: Option<u16>) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    body.extend_from_slice(topic.as_bytes());
    if let Some(id) = qos1_id {
        body.extend_from_slice(&id.to_be_bytes());
    }
    body.extend_from_slice(payload);

    let mut frame = vec![if qos1_id.is_some() { 0x32 } else { 0x30 }];
    let mut len = body.len();
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        frame.push(byte);
        if len == 0 {
            break;
        }
    }
    frame.extend_from_slice(&body);
    frame
}
