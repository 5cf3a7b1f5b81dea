//! # Cloud Wrapper
//!
//! A small, transport-agnostic face for the application. The wrapper owns the
//! client id and the per-device topics and forwards sends to the MQTT
//! backend. The backend's events reach the application through
//! [`EventTranslator`], which runs on the polling task:
//!
//! | Backend event   | Wrapper action                     | Application event |
//! |-----------------|------------------------------------|-------------------|
//! | `Connecting`    | forward                            | `Connecting`      |
//! | `Connected`     | subscribe to `<id>/cfg`            | none              |
//! | `Ready`         | forward                            | `Connected`       |
//! | `Disconnected`  | forward                            | `Disconnected`    |
//! | `DataReceived`  | forward payload                    | `DataReceived`    |
//!
//! ```ignore
//! static BACKEND: MqttBackend = MqttBackend::new();
//!
//! let client_id = ClientId::from_identity(&mut modem).await?;
//! let config = CloudConfig::new(BackendConfig::new("mqtt.example.com"));
//! let (cloud, mut poll) = CloudWrapper::init(&BACKEND, client_id, config, connector, on_cloud_event)?;
//! spawner.spawn(async move { poll.run().await });
//! cloud.connect()?;
//! ```

mod identity;

pub use identity::{ClientId, DeviceIdentity, IMEI_LEN, TopicSet};

use crate::backend::{
    BackendEvent, BackendEventHandler, ConnectionPoll, MqttBackend, Topic, TxMessage,
};
use crate::config::BackendConfig;
use crate::error::{BackendError, WrapError};
use crate::packet::QoS;
use crate::transport::Connector;

/// Events delivered to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CloudWrapEvent<'a> {
    Connecting,
    Connected,
    Disconnected,
    /// Raw payload of a message from the cloud, valid during the callback.
    DataReceived(&'a [u8]),
}

/// Receives [`CloudWrapEvent`]s on the polling task.
pub trait CloudWrapEventHandler {
    fn on_event(&mut self, event: CloudWrapEvent<'_>);
}

impl<F> CloudWrapEventHandler for F
where
    F: FnMut(CloudWrapEvent<'_>),
{
    fn on_event(&mut self, event: CloudWrapEvent<'_>) {
        self(event)
    }
}

/// What `state_get` does. Fetching the device state is not provided by this
/// integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateGetPolicy {
    /// Succeed without doing anything.
    #[default]
    NoOp,
    /// Fail with [`WrapError::NotSupported`].
    Unsupported,
}

/// Configuration of the cloud wrapper.
#[derive(Debug, Clone, Copy)]
pub struct CloudConfig<'a> {
    pub backend: BackendConfig<'a>,
    pub state_get: StateGetPolicy,
}

impl<'a> CloudConfig<'a> {
    pub const fn new(backend: BackendConfig<'a>) -> Self {
        Self {
            backend,
            state_get: StateGetPolicy::NoOp,
        }
    }

    pub const fn with_state_get(mut self, policy: StateGetPolicy) -> Self {
        self.state_get = policy;
        self
    }
}

/// Translates backend events into application events.
pub struct EventTranslator<'a, H> {
    backend: &'a MqttBackend,
    cfg_topic: Topic,
    handler: H,
}

impl<'a, H: CloudWrapEventHandler> EventTranslator<'a, H> {
    pub fn new(backend: &'a MqttBackend, cfg_topic: Topic, handler: H) -> Self {
        Self {
            backend,
            cfg_topic,
            handler,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }
}

impl<H: CloudWrapEventHandler> BackendEventHandler for EventTranslator<'_, H> {
    fn on_event(&mut self, event: BackendEvent<'_>) {
        let forward = match event {
            BackendEvent::Connecting => {
                debug!("Backend connecting");
                CloudWrapEvent::Connecting
            }
            BackendEvent::Connected => {
                debug!("Backend connected");
                if let Err(_e) = self.backend.subscribe(&self.cfg_topic) {
                    error!("Subscribing to {} failed: {:?}", self.cfg_topic.as_str(), _e);
                }
                return;
            }
            BackendEvent::Ready => {
                debug!("Backend ready");
                CloudWrapEvent::Connected
            }
            BackendEvent::Disconnected => {
                debug!("Backend disconnected");
                CloudWrapEvent::Disconnected
            }
            BackendEvent::DataReceived { topic: _topic, payload } => {
                debug!("Data received on {}", _topic);
                CloudWrapEvent::DataReceived(payload)
            }
        };
        self.handler.on_event(forward);
    }
}

/// The application's handle to the cloud connection.
pub struct CloudWrapper<'a> {
    backend: &'a MqttBackend,
    client_id: ClientId,
    topics: TopicSet,
    state_get: StateGetPolicy,
}

impl<'a> CloudWrapper<'a> {
    /// Builds the topics and the backend's polling task.
    ///
    /// The returned [`ConnectionPoll`] must be run on its own task before
    /// [`connect`](Self::connect) has any effect.
    #[allow(clippy::type_complexity)]
    pub fn init<C, H>(
        backend: &'a MqttBackend,
        client_id: ClientId,
        config: CloudConfig<'a>,
        connector: C,
        handler: H,
    ) -> Result<(Self, ConnectionPoll<'a, C, EventTranslator<'a, H>>), WrapError>
    where
        C: Connector,
        H: CloudWrapEventHandler,
    {
        let topics = TopicSet::new(&client_id)?;
        let translator = EventTranslator::new(backend, topics.cfg.clone(), handler);
        let poll = ConnectionPoll::new(
            backend,
            config.backend,
            client_id.as_str(),
            connector,
            translator,
        )
        .map_err(|e| match e {
            BackendError::ClientIdTooLong => WrapError::ClientIdTooLong,
            other => WrapError::Backend(other),
        })?;

        info!("********************************************");
        info!(" Cloud integration v{}", env!("CARGO_PKG_VERSION"));
        info!(" Client ID:   {}", client_id.as_str());
        info!(" Endpoint:    {}", config.backend.broker.hostname);
        info!("********************************************");

        Ok((
            Self {
                backend,
                client_id,
                topics,
                state_get: config.state_get,
            },
            poll,
        ))
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    pub fn connect(&self) -> Result<(), WrapError> {
        self.backend.connect().map_err(|e| {
            error!("Backend connect failed: {:?}", e);
            e.into()
        })
    }

    pub fn disconnect(&self) -> Result<(), WrapError> {
        self.backend.disconnect().map_err(|e| {
            error!("Backend disconnect failed: {:?}", e);
            e.into()
        })
    }

    /// Requests the device state from the cloud. Not provided by this
    /// integration, see [`StateGetPolicy`].
    pub fn state_get(&self) -> Result<(), WrapError> {
        match self.state_get {
            StateGetPolicy::NoOp => Ok(()),
            StateGetPolicy::Unsupported => {
                warn!("state_get is not supported");
                Err(WrapError::NotSupported)
            }
        }
    }

    pub fn state_send(&self, buf: &[u8]) -> Result<(), WrapError> {
        self.send(&self.topics.messages, buf)
    }

    pub fn data_send(&self, buf: &[u8]) -> Result<(), WrapError> {
        self.send(&self.topics.messages, buf)
    }

    pub fn batch_send(&self, buf: &[u8]) -> Result<(), WrapError> {
        self.send(&self.topics.batch, buf)
    }

    pub fn ui_send(&self, buf: &[u8]) -> Result<(), WrapError> {
        self.send(&self.topics.messages, buf)
    }

    fn send(&self, topic: &str, payload: &[u8]) -> Result<(), WrapError> {
        let msg = TxMessage {
            topic,
            payload,
            qos: QoS::AtMostOnce,
        };
        self.backend.publish(&msg).map_err(|e| {
            error!("Publish to {} failed: {:?}", topic, e);
            e.into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ConnectionState;
    use std::vec::Vec;

    #[test]
    fn state_get_follows_policy() {
        let backend = MqttBackend::new();
        let wrapper = CloudWrapper {
            backend: &backend,
            client_id: ClientId::custom("dev").unwrap(),
            topics: TopicSet::new(&ClientId::custom("dev").unwrap()).unwrap(),
            state_get: StateGetPolicy::NoOp,
        };
        assert_eq!(wrapper.state_get(), Ok(()));

        let wrapper = CloudWrapper {
            state_get: StateGetPolicy::Unsupported,
            ..wrapper
        };
        assert_eq!(wrapper.state_get(), Err(WrapError::NotSupported));
    }

    #[test]
    fn connected_subscribes_instead_of_forwarding() {
        let backend = MqttBackend::new();
        let mut seen = Vec::new();
        let mut translator = EventTranslator::new(
            &backend,
            crate::backend::owned_topic("dev/cfg").unwrap(),
            |ev: CloudWrapEvent<'_>| seen.push(format!("{ev:?}")),
        );

        translator.on_event(BackendEvent::Connecting);
        backend.set_state(ConnectionState::Connected);
        translator.on_event(BackendEvent::Connected);
        translator.on_event(BackendEvent::Ready);
        translator.on_event(BackendEvent::DataReceived {
            topic: "dev/cfg",
            payload: b"{}",
        });
        translator.on_event(BackendEvent::Disconnected);
        drop(translator);

        assert_eq!(
            seen,
            ["Connecting", "Connected", "DataReceived([123, 125])", "Disconnected"]
        );
        assert!(matches!(
            backend.requests.try_receive(),
            Ok(crate::backend::Request::Subscribe(t)) if t.as_str() == "dev/cfg"
        ));
    }
}
