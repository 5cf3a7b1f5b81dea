//! # MQTT Transport Backend
//!
//! The backend is split in two halves:
//!
//! - [`MqttBackend`] is the shared handle. It only holds atomics, two signals
//!   and the request queue, so it can live in a `static` and be used from any
//!   task. `connect`, `disconnect`, `publish` and `subscribe` never block and
//!   never touch the socket.
//! - [`ConnectionPoll`] owns the connector, the session and the event
//!   handler. Its [`run`](ConnectionPoll::run) future is the dedicated task
//!   that performs all socket I/O and every state transition.
//!
//! ```text
//!            connect()                       CONNACK ok
//!   Idle ─────────────▶ Connecting ─────────────────────▶ Connected ─▶ Ready
//!    ▲                      │ resolve/connect/refused          │
//!    │                      ▼                                  ▼ fault / hangup / disconnect()
//!    └──────────────── Disconnected ◀──────────────────────────┘
//! ```
//!
//! Transport faults never surface as errors: the task notifies
//! [`BackendEvent::Disconnected`] once, closes the socket and goes back to
//! waiting for the next connect request.
//!
//! ```ignore
//! static BACKEND: MqttBackend = MqttBackend::new();
//!
//! let mut poll = ConnectionPoll::new(&BACKEND, config, "352656100123456", connector, handler)?;
//! spawner.spawn(async move { poll.run().await });
//! BACKEND.connect()?;
//! ```

mod poll;
mod request;

pub use poll::ConnectionPoll;
pub use request::{OwnedPublishRequest, Request, RequestChannel, Topic, TxMessage, owned_topic};

use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

use crate::error::BackendError;

/// Connection state of the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ConnectionState {
    Idle = 0,
    Connecting = 1,
    Connected = 2,
    Ready = 3,
    Disconnected = 4,
}

impl ConnectionState {
    fn from_u8(val: u8) -> Self {
        match val {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Ready,
            4 => Self::Disconnected,
            _ => Self::Idle,
        }
    }

    /// Whether publish and subscribe requests are accepted.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Ready)
    }
}

/// Events raised by the polling task, in the order they happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BackendEvent<'a> {
    Connecting,
    /// The broker accepted the session.
    Connected,
    /// The session can be used for publish and subscribe.
    Ready,
    Disconnected,
    /// A publish arrived. The payload is only valid during the callback.
    DataReceived { topic: &'a str, payload: &'a [u8] },
}

/// Receives backend events on the polling task.
pub trait BackendEventHandler {
    fn on_event(&mut self, event: BackendEvent<'_>);
}

impl<F> BackendEventHandler for F
where
    F: FnMut(BackendEvent<'_>),
{
    fn on_event(&mut self, event: BackendEvent<'_>) {
        self(event)
    }
}

/// Shared handle to the transport backend.
pub struct MqttBackend {
    /// Set from an accepted connect request until the task resets to idle.
    poll_active: AtomicBool,
    disconnect_requested: AtomicBool,
    state: AtomicU8,
    connect_signal: Signal<CriticalSectionRawMutex, ()>,
    disconnect_signal: Signal<CriticalSectionRawMutex, ()>,
    pub(crate) requests: RequestChannel,
}

impl MqttBackend {
    pub const fn new() -> Self {
        Self {
            poll_active: AtomicBool::new(false),
            disconnect_requested: AtomicBool::new(false),
            state: AtomicU8::new(ConnectionState::Idle as u8),
            connect_signal: Signal::new(),
            disconnect_signal: Signal::new(),
            requests: RequestChannel::new(),
        }
    }

    /// Asks the polling task to open a connection.
    ///
    /// Returns [`BackendError::InProgress`] while an attempt or a session is
    /// active; requests are not queued.
    pub fn connect(&self) -> Result<(), BackendError> {
        if !self.claim() {
            debug!("Connection poll in progress");
            return Err(BackendError::InProgress);
        }
        self.connect_signal.signal(());
        Ok(())
    }

    /// Asks the polling task to close the session. Does nothing when idle.
    pub fn disconnect(&self) -> Result<(), BackendError> {
        if self.poll_active.load(Ordering::Acquire) {
            self.disconnect_requested.store(true, Ordering::Release);
            self.disconnect_signal.signal(());
        }
        Ok(())
    }

    /// Queues a publish. Acknowledgements are logged by the task, not reported.
    pub fn publish(&self, msg: &TxMessage<'_>) -> Result<(), BackendError> {
        if !self.state().is_connected() {
            return Err(BackendError::NotConnected);
        }
        let request = OwnedPublishRequest::from_message(msg)?;
        self.requests
            .try_send(Request::Publish(request))
            .map_err(|_| BackendError::QueueFull)
    }

    /// Queues a subscription to `topic` at QoS 1.
    pub fn subscribe(&self, topic: &str) -> Result<(), BackendError> {
        if !self.state().is_connected() {
            return Err(BackendError::NotConnected);
        }
        let topic = owned_topic(topic)?;
        self.requests
            .try_send(Request::Subscribe(topic))
            .map_err(|_| BackendError::QueueFull)
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether a connection attempt or session is in progress.
    pub fn is_active(&self) -> bool {
        self.poll_active.load(Ordering::Acquire)
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        debug!("Backend state: {:?}", state);
        self.state.store(state as u8, Ordering::Release);
    }

    /// Takes the connection slot. Returns `false` if it was already taken.
    pub(crate) fn claim(&self) -> bool {
        if self
            .poll_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.disconnect_requested.store(false, Ordering::Release);
        self.disconnect_signal.reset();
        true
    }

    fn disconnect_requested(&self) -> bool {
        self.disconnect_requested.load(Ordering::Acquire)
    }
}

impl Default for MqttBackend {
    fn default() -> Self {
        Self::new()
    }
}
