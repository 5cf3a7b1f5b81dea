//! The connection polling task.

use embassy_futures::select::{Either3, select3};
use embassy_time::{Duration, with_timeout};
use heapless::String;

use super::{BackendEvent, BackendEventHandler, ConnectionState, MqttBackend, Request};
use crate::client::{MqttClient, MqttOptions};
use crate::config::{BackendConfig, MQTT_CLIENT_ID_MAX_LEN, MQTT_PAYLOAD_BUFFER_LEN, MQTT_RX_TX_BUFFER_LEN};
use crate::error::{BackendError, ConnectReasonCode, MqttError};
use crate::fmt::Dbg;
use crate::packet::{MqttPacket, QoS};
use crate::transport::{Connector, MqttTransport};

/// How long to block on the socket when keep-alive is disabled.
const IDLE_WAIT: Duration = Duration::from_secs(3600);

type Client<'a, T> = MqttClient<'a, T, MQTT_RX_TX_BUFFER_LEN>;

/// Drives connection attempts and sessions for one [`MqttBackend`].
///
/// Owns everything the socket side needs, so the shared handle stays free of
/// locks. Spawn [`run`](Self::run) on its own task.
pub struct ConnectionPoll<'a, C, H> {
    backend: &'a MqttBackend,
    config: BackendConfig<'a>,
    client_id: String<MQTT_CLIENT_ID_MAX_LEN>,
    connector: C,
    handler: H,
}

impl<'a, C, H> ConnectionPoll<'a, C, H>
where
    C: Connector,
    H: BackendEventHandler,
{
    /// Creates the task state. The MQTT client id is the configured prefix
    /// followed by `id`.
    pub fn new(
        backend: &'a MqttBackend,
        config: BackendConfig<'a>,
        id: &str,
        connector: C,
        handler: H,
    ) -> Result<Self, BackendError> {
        let mut client_id = String::<MQTT_CLIENT_ID_MAX_LEN>::new();
        client_id
            .push_str(config.client_id_prefix)
            .and_then(|_| client_id.push_str(id))
            .map_err(|_| BackendError::ClientIdTooLong)?;
        debug!("client_id = {}", client_id.as_str());
        Ok(Self {
            backend,
            config,
            client_id,
            connector,
            handler,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Serves connect requests forever.
    pub async fn run(&mut self) -> ! {
        loop {
            self.backend.connect_signal.wait().await;
            self.poll_once().await;
        }
    }

    /// Runs one connection attempt and its session, then returns to idle.
    ///
    /// Consumes a pending connect request, or takes the connection slot
    /// itself when there is none, so `connect()` reports
    /// [`BackendError::InProgress`] until the attempt is over. Useful to
    /// drive the backend from an executor that cannot hold a `!` future.
    pub async fn poll_once(&mut self) {
        if self.backend.claim() {
            debug!("Polling without a connect request");
        }
        let mut session = Session {
            backend: self.backend,
            handler: &mut self.handler,
            disconnect_notified: false,
        };
        session.notify(ConnectionState::Connecting, BackendEvent::Connecting);

        if self.backend.disconnect_requested() {
            debug!("Disconnect requested before connecting");
            session.notify_disconnected();
        } else {
            match self.connector.connect(&self.config.broker).await {
                Ok(transport) => {
                    let options = MqttOptions::new(&self.client_id)
                        .with_keep_alive(self.config.keep_alive);
                    let mut client: Client<'_, _> = MqttClient::new(transport, options);
                    if let Err(_e) = session.run(&mut client).await {
                        error!("MQTT session ended: {:?}", Dbg(&_e));
                    }
                    session.notify_disconnected();
                    client.abort();
                }
                Err(_e) => {
                    error!("Could not connect to broker: {:?}", Dbg(&_e));
                    session.notify_disconnected();
                }
            }
        }

        self.reset();
    }

    fn reset(&mut self) {
        while let Ok(_request) = self.backend.requests.try_receive() {
            debug!("Dropping request queued for closed session");
        }
        self.backend.connect_signal.reset();
        self.backend.set_state(ConnectionState::Idle);
        // Last, so a connect() racing with the reset lands on a clean slate.
        self.backend
            .poll_active
            .store(false, core::sync::atomic::Ordering::Release);
    }
}

/// Follow-up owed to the broker after handling an inbound packet.
enum FollowUp {
    None,
    PubAck(u16),
    PubRel(u16),
}

struct Session<'s, H> {
    backend: &'s MqttBackend,
    handler: &'s mut H,
    disconnect_notified: bool,
}

impl<H: BackendEventHandler> Session<'_, H> {
    fn notify(&mut self, state: ConnectionState, event: BackendEvent<'_>) {
        self.backend.set_state(state);
        self.handler.on_event(event);
    }

    /// Reports the end of the session exactly once.
    fn notify_disconnected(&mut self) {
        if !self.disconnect_notified {
            self.disconnect_notified = true;
            info!("MQTT client disconnected");
            self.notify(ConnectionState::Disconnected, BackendEvent::Disconnected);
        }
    }

    async fn run<T: MqttTransport>(
        &mut self,
        client: &mut Client<'_, T>,
    ) -> Result<(), MqttError<T::Error>> {
        client.connect().await?;
        debug!("CONNECT sent");

        loop {
            let wait = client.keepalive_time_left().unwrap_or(IDLE_WAIT);
            let next = select3(
                with_timeout(wait, client.fill()),
                self.backend.requests.receive(),
                self.backend.disconnect_signal.wait(),
            )
            .await;

            match next {
                Either3::First(Ok(filled)) => {
                    filled?;
                    self.drain(client).await?;
                }
                Either3::First(Err(_)) => self.on_keepalive(client).await?,
                Either3::Second(request) => self.execute(client, request).await?,
                Either3::Third(()) => {
                    info!("Disconnecting from broker");
                    if let Err(_e) = client.disconnect().await {
                        warn!("DISCONNECT not sent: {:?}", Dbg(&_e));
                    }
                    self.notify_disconnected();
                    return Ok(());
                }
            }
        }
    }

    /// Pings the broker when the keep-alive budget runs out. A broker that
    /// has not answered `CONNECT` yet is pinged too; the attempt only ends on
    /// a refused `CONNACK` or a socket fault.
    async fn on_keepalive<T: MqttTransport>(
        &mut self,
        client: &mut Client<'_, T>,
    ) -> Result<(), MqttError<T::Error>> {
        if client.keepalive_time_left().is_none() {
            return Ok(());
        }
        if self.backend.state() == ConnectionState::Connecting {
            debug!("Still waiting for CONNACK");
        }
        trace!("PINGREQ");
        client.ping().await
    }

    async fn execute<T: MqttTransport>(
        &mut self,
        client: &mut Client<'_, T>,
        request: Request,
    ) -> Result<(), MqttError<T::Error>> {
        match request {
            Request::Publish(req) => {
                let _id = client.publish(&req.topic, &req.payload, req.qos).await?;
                debug!(
                    "Published {} bytes to {} (id {})",
                    req.payload.len(),
                    req.topic.as_str(),
                    _id
                );
            }
            Request::Subscribe(topic) => {
                let _id = client.subscribe(&topic, QoS::AtLeastOnce).await?;
                info!("Subscribing to {} (id {})", topic.as_str(), _id);
            }
        }
        Ok(())
    }

    /// Handles every complete packet in the receive buffer.
    async fn drain<T: MqttTransport>(
        &mut self,
        client: &mut Client<'_, T>,
    ) -> Result<(), MqttError<T::Error>> {
        loop {
            let follow_up = match client.next_packet()? {
                Some(packet) => self.handle::<T::Error>(packet)?,
                None => return Ok(()),
            };
            match follow_up {
                FollowUp::None => {}
                FollowUp::PubAck(id) => client.puback(id).await?,
                FollowUp::PubRel(id) => client.pubrel(id).await?,
            }
        }
    }

    fn handle<E>(&mut self, packet: MqttPacket<'_>) -> Result<FollowUp, MqttError<E>> {
        match packet {
            MqttPacket::ConnAck(ack) => match ConnectReasonCode::from(ack.return_code) {
                ConnectReasonCode::Success => {
                    if self.backend.state() != ConnectionState::Connecting {
                        warn!("Unexpected CONNACK");
                        return Ok(FollowUp::None);
                    }
                    info!("MQTT client connected");
                    self.notify(ConnectionState::Connected, BackendEvent::Connected);
                    self.notify(ConnectionState::Ready, BackendEvent::Ready);
                }
                code => {
                    error!("MQTT connect refused: {:?}", code);
                    return Err(MqttError::ConnectionRefused(code));
                }
            },
            MqttPacket::Publish(publish) => {
                debug!(
                    "PUBLISH on {} ({} bytes, {:?})",
                    publish.topic,
                    publish.payload.len(),
                    publish.qos
                );
                if publish.payload.len() > MQTT_PAYLOAD_BUFFER_LEN {
                    warn!(
                        "Dropping {} byte payload, limit is {}",
                        publish.payload.len(),
                        MQTT_PAYLOAD_BUFFER_LEN
                    );
                    return Ok(FollowUp::None);
                }
                self.handler.on_event(BackendEvent::DataReceived {
                    topic: publish.topic,
                    payload: publish.payload,
                });
                if let (QoS::AtLeastOnce, Some(id)) = (publish.qos, publish.packet_id) {
                    return Ok(FollowUp::PubAck(id));
                }
            }
            MqttPacket::PubAck(_ack) => debug!("PUBACK packet id: {}", _ack.packet_id),
            MqttPacket::PubRec(rec) => {
                debug!("PUBREC packet id: {}", rec.packet_id);
                return Ok(FollowUp::PubRel(rec.packet_id));
            }
            MqttPacket::PubComp(_comp) => debug!("PUBCOMP packet id: {}", _comp.packet_id),
            MqttPacket::PubRel(_rel) => debug!("PUBREL packet id: {}", _rel.packet_id),
            MqttPacket::SubAck(ack) => {
                if ack.is_rejected() {
                    warn!("Subscription {} rejected by broker", ack.packet_id);
                } else {
                    debug!("SUBACK packet id: {}", ack.packet_id);
                }
            }
            MqttPacket::PingResp => trace!("PINGRESP"),
        }
        Ok(FollowUp::None)
    }
}
