//! # MQTT Session Client
//!
//! `MqttClient` runs one MQTT 3.1.1 session over one transport. It owns the
//! receive and transmit buffers, frames inbound packets, hands out packet
//! identifiers and tracks the keep-alive budget. It does not loop on its own:
//! the backend's polling task decides when to read, ping or publish.

use crate::error::{MqttError, ProtocolError};
use crate::packet::{
    self, Connect, Disconnect, EncodePacket, MqttPacket, PingReq, PubAck, PubRel, Publish, QoS,
    Subscribe,
};
use crate::transport::MqttTransport;
use crate::util;
use embassy_time::{Duration, Instant};

/// Session parameters sent in `CONNECT`.
#[derive(Debug, Clone, Copy)]
pub struct MqttOptions<'a> {
    client_id: &'a str,
    /// Whole seconds, at most `u16::MAX`, so `CONNECT` announces what the
    /// client enforces.
    keep_alive: Duration,
    clean_session: bool,
}

impl<'a> MqttOptions<'a> {
    pub fn new(client_id: &'a str) -> Self {
        Self {
            client_id,
            keep_alive: Duration::from_secs(60),
            clean_session: true,
        }
    }

    /// Sets the keep-alive interval. Sub-second parts are dropped and values
    /// beyond the protocol's 16-bit field are clamped.
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        let secs = keep_alive.as_secs().min(u64::from(u16::MAX));
        self.keep_alive = Duration::from_secs(secs);
        self
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    fn keep_alive_secs(&self) -> u16 {
        u16::try_from(self.keep_alive.as_secs()).unwrap_or(u16::MAX)
    }
}

/// One MQTT session over transport `T` with `BUF_SIZE`-byte rx/tx buffers.
pub struct MqttClient<'a, T, const BUF_SIZE: usize> {
    transport: T,
    options: MqttOptions<'a>,
    rx_buf: [u8; BUF_SIZE],
    rx_len: usize,
    /// Length of the frame handed out by the last `next_packet` call.
    consumed: usize,
    tx_buf: [u8; BUF_SIZE],
    last_tx: Instant,
    packet_id: u16,
}

impl<'a, T, const BUF_SIZE: usize> MqttClient<'a, T, BUF_SIZE>
where
    T: MqttTransport,
{
    pub fn new(transport: T, options: MqttOptions<'a>) -> Self {
        Self {
            transport,
            options,
            rx_buf: [0; BUF_SIZE],
            rx_len: 0,
            consumed: 0,
            tx_buf: [0; BUF_SIZE],
            last_tx: Instant::now(),
            packet_id: 0,
        }
    }

    /// Sends `CONNECT`. The broker's answer arrives as a `CONNACK` packet.
    pub async fn connect(&mut self) -> Result<(), MqttError<T::Error>> {
        let options = &self.options;
        let connect = Connect::new(options.client_id, options.keep_alive_secs(), options.clean_session);
        self.send_packet(&connect).await
    }

    /// Publishes `payload` on `topic`, returning the packet identifier used.
    pub async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
    ) -> Result<u16, MqttError<T::Error>> {
        let packet_id = self.next_packet_id();
        let publish = Publish::new(topic, payload, qos, Some(packet_id));
        self.send_packet(&publish).await?;
        Ok(packet_id)
    }

    /// Subscribes to a single topic filter, returning the packet identifier used.
    pub async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<u16, MqttError<T::Error>> {
        let packet_id = self.next_packet_id();
        self.send_packet(&Subscribe::new(packet_id, topic, qos)).await?;
        Ok(packet_id)
    }

    pub async fn ping(&mut self) -> Result<(), MqttError<T::Error>> {
        self.send_packet(&PingReq).await
    }

    /// Acknowledges an inbound QoS 1 publish.
    pub async fn puback(&mut self, packet_id: u16) -> Result<(), MqttError<T::Error>> {
        self.send_packet(&PubAck { packet_id }).await
    }

    /// Releases an outbound QoS 2 publish after `PUBREC`.
    pub async fn pubrel(&mut self, packet_id: u16) -> Result<(), MqttError<T::Error>> {
        self.send_packet(&PubRel { packet_id }).await
    }

    /// Sends `DISCONNECT`. The transport stays open until [`Self::abort`].
    pub async fn disconnect(&mut self) -> Result<(), MqttError<T::Error>> {
        self.send_packet(&Disconnect).await
    }

    /// Drops the underlying connection.
    pub fn abort(&mut self) {
        self.transport.abort();
    }

    /// Time left before a `PINGREQ` is due, or `None` when keep-alive is off.
    pub fn keepalive_time_left(&self) -> Option<Duration> {
        if self.options.keep_alive.as_ticks() == 0 {
            return None;
        }
        let elapsed = Instant::now().saturating_duration_since(self.last_tx);
        Some(
            self.options
                .keep_alive
                .checked_sub(elapsed)
                .unwrap_or(Duration::from_ticks(0)),
        )
    }

    /// Reads once from the transport into the receive buffer.
    ///
    /// Fails with `ConnectionClosed` when the broker hangs up.
    pub async fn fill(&mut self) -> Result<(), MqttError<T::Error>> {
        self.discard_consumed();
        let free = &mut self.rx_buf[self.rx_len..];
        if free.is_empty() {
            return Err(ProtocolError::PayloadTooLarge.into());
        }
        let n = self.transport.recv(free).await.map_err(MqttError::Transport)?;
        if n == 0 {
            return Err(ProtocolError::ConnectionClosed.into());
        }
        self.rx_len += n;
        Ok(())
    }

    /// Returns the next complete packet in the receive buffer, if any.
    ///
    /// The packet borrows the buffer; it is released by the next call to
    /// `next_packet` or `fill`.
    pub fn next_packet(&mut self) -> Result<Option<MqttPacket<'_>>, MqttError<T::Error>> {
        self.discard_consumed();
        let Some(len) = util::frame_len(&self.rx_buf[..self.rx_len], BUF_SIZE)? else {
            return Ok(None);
        };
        self.consumed = len;
        Ok(Some(packet::decode(&self.rx_buf[..len])?))
    }

    fn discard_consumed(&mut self) {
        if self.consumed > 0 {
            self.rx_buf.copy_within(self.consumed..self.rx_len, 0);
            self.rx_len -= self.consumed;
            self.consumed = 0;
        }
    }

    /// Next non-zero packet identifier.
    fn next_packet_id(&mut self) -> u16 {
        self.packet_id = self.packet_id.wrapping_add(1);
        if self.packet_id == 0 {
            self.packet_id = 1;
        }
        self.packet_id
    }

    async fn send_packet(&mut self, packet: &impl EncodePacket) -> Result<(), MqttError<T::Error>> {
        let len = packet.encode(&mut self.tx_buf)?;
        self.transport
            .send(&self.tx_buf[..len])
            .await
            .map_err(MqttError::Transport)?;
        self.last_tx = Instant::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    /// Transport replaying canned reads and recording writes.
    struct Script {
        reads: Vec<Vec<u8>>,
        sent: Vec<Vec<u8>>,
    }

    impl MqttTransport for &mut Script {
        type Error = ();

        async fn send(&mut self, buf: &[u8]) -> Result<(), ()> {
            self.sent.push(buf.to_vec());
            Ok(())
        }

        async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, ()> {
            if self.reads.is_empty() {
                return Ok(0);
            }
            let chunk = self.reads.remove(0);
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    fn script(reads: &[&[u8]]) -> Script {
        Script {
            reads: reads.iter().map(|r| r.to_vec()).collect(),
            sent: Vec::new(),
        }
    }

    #[test]
    fn frames_split_and_coalesced_reads() {
        // CONNACK split over two reads, then PINGRESP and SUBACK in one read.
        let mut script = script(&[&[0x20, 0x02], &[0x00, 0x00, 0xD0, 0x00, 0x90, 0x03, 0x00, 0x01, 0x01]]);
        futures::executor::block_on(async {
            let mut client: MqttClient<'_, _, 64> =
                MqttClient::new(&mut script, MqttOptions::new("id"));
            client.fill().await.unwrap();
            assert!(client.next_packet().unwrap().is_none());
            client.fill().await.unwrap();
            assert!(matches!(client.next_packet(), Ok(Some(MqttPacket::ConnAck(_)))));
            assert!(matches!(client.next_packet(), Ok(Some(MqttPacket::PingResp))));
            assert!(matches!(client.next_packet(), Ok(Some(MqttPacket::SubAck(_)))));
            assert!(client.next_packet().unwrap().is_none());
            assert!(matches!(
                client.fill().await,
                Err(MqttError::Protocol(ProtocolError::ConnectionClosed))
            ));
        });
    }

    #[test]
    fn oversized_inbound_frame_is_rejected() {
        let mut script = script(&[&[0x30, 0x7F, 0x00]]);
        futures::executor::block_on(async {
            let mut client: MqttClient<'_, _, 16> =
                MqttClient::new(&mut script, MqttOptions::new("id"));
            client.fill().await.unwrap();
            assert!(matches!(
                client.next_packet(),
                Err(MqttError::Protocol(ProtocolError::PayloadTooLarge))
            ));
        });
    }

    #[test]
    fn packet_ids_skip_zero() {
        let mut script = script(&[]);
        futures::executor::block_on(async {
            let mut client: MqttClient<'_, _, 64> =
                MqttClient::new(&mut script, MqttOptions::new("id"));
            client.packet_id = u16::MAX;
            assert_eq!(client.publish("t", b"x", QoS::AtLeastOnce).await.unwrap(), 1);
            assert_eq!(client.subscribe("t", QoS::AtLeastOnce).await.unwrap(), 2);
        });
        assert_eq!(script.sent.len(), 2);
        assert_eq!(&script.sent[0][..2], &[0x32, 6]);
    }

    #[test]
    fn keepalive_disabled_and_enabled() {
        let mut script = script(&[]);
        let client: MqttClient<'_, _, 16> = MqttClient::new(
            &mut script,
            MqttOptions::new("id").with_keep_alive(Duration::from_secs(0)),
        );
        assert_eq!(client.keepalive_time_left(), None);

        let mut script = self::script(&[]);
        let client: MqttClient<'_, _, 16> = MqttClient::new(
            &mut script,
            MqttOptions::new("id").with_keep_alive(Duration::from_secs(30)),
        );
        let left = client.keepalive_time_left().unwrap();
        assert!(left <= Duration::from_secs(30) && left > Duration::from_secs(25));
    }

    #[test]
    fn keepalive_announced_matches_enforced() {
        let options = MqttOptions::new("id").with_keep_alive(Duration::from_secs(100_000));
        assert_eq!(options.keep_alive(), Duration::from_secs(u64::from(u16::MAX)));
        assert_eq!(
            MqttOptions::new("id").with_keep_alive(Duration::from_millis(1500)).keep_alive(),
            Duration::from_secs(1)
        );

        let mut script = script(&[]);
        futures::executor::block_on(async {
            let mut client: MqttClient<'_, _, 64> = MqttClient::new(&mut script, options);
            client.connect().await.unwrap();
            let left = client.keepalive_time_left().unwrap();
            assert!(left > Duration::from_secs(u64::from(u16::MAX) - 5));
        });
        // Keep-alive is the last field of the variable header.
        let connect = &script.sent[0];
        assert_eq!(&connect[10..12], &u16::MAX.to_be_bytes());
    }
}
