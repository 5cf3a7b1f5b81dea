//! TLS 1.3 transport over `embassy-net` TCP sockets, using `embedded-tls`.
//!
//! The broker's [`TlsConfig`](crate::config::TlsConfig) drives the handshake:
//! the SNI name comes from [`BrokerConfig::tls_hostname`], the security tag
//! selects credentials from a caller-supplied [`TlsCredentials`] store, and
//! [`PeerVerify`] decides whether a handshake without them is acceptable.

use embassy_net::Stack;
use embassy_net::tcp::TcpSocket;
use embassy_time::Duration;
use embedded_io_async::Write;
use embedded_tls::{
    Aes128GcmSha256, CryptoProvider, NoVerify, TlsConfig as HandshakeConfig, TlsConnection,
    TlsContext, TlsError, TlsVerifier,
};
use rand_core::CryptoRngCore;

use super::{ConnectError, Connector, MqttTransport, open_socket};
use crate::config::{BrokerConfig, PeerVerify};
use crate::fmt::Dbg;

/// Cipher suite offered to the broker.
pub type CipherSuite = Aes128GcmSha256;

/// Credential store addressed by security tag.
pub trait TlsCredentials {
    type Rng: CryptoRngCore;

    /// Provider verifying the broker with the credentials under one tag.
    type Provider<'p>: CryptoProvider<CipherSuite = CipherSuite>
    where
        Self: 'p;

    /// Randomness for handshakes that skip peer verification.
    fn rng(&mut self) -> &mut Self::Rng;

    /// Returns `None` when nothing is provisioned under `sec_tag`.
    fn verifying_provider(&mut self, sec_tag: u32) -> Option<Self::Provider<'_>>;
}

/// Crypto provider that accepts any server certificate.
struct UnverifiedProvider<'r, R> {
    rng: &'r mut R,
    verifier: NoVerify,
}

impl<'r, R> UnverifiedProvider<'r, R> {
    fn new(rng: &'r mut R) -> Self {
        Self {
            rng,
            verifier: NoVerify,
        }
    }
}

impl<R> CryptoProvider for UnverifiedProvider<'_, R>
where
    R: CryptoRngCore,
{
    type CipherSuite = CipherSuite;
    type Signature = &'static [u8];

    fn rng(&mut self) -> impl CryptoRngCore {
        &mut *self.rng
    }

    fn verifier(&mut self) -> Result<&mut impl TlsVerifier<Self::CipherSuite>, TlsError> {
        Ok(&mut self.verifier)
    }
}

/// Handshake parameters taken from the broker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Handshake<'b> {
    server_name: &'b str,
    sec_tag: u32,
    peer_verify: PeerVerify,
}

impl<'b> Handshake<'b> {
    fn for_broker(broker: &BrokerConfig<'b>) -> Result<Self, ConnectError> {
        let (Some(tls), Some(server_name)) = (broker.tls, broker.tls_hostname()) else {
            return Err(ConnectError::TlsMissing);
        };
        Ok(Self {
            server_name,
            sec_tag: tls.sec_tag,
            peer_verify: tls.peer_verify,
        })
    }

    /// Whether the credential store is consulted at all.
    fn wants_credentials(&self) -> bool {
        self.peer_verify != PeerVerify::None
    }

    /// Decides what to do when no credentials are stored under the tag.
    fn without_credentials(&self) -> Result<(), ConnectError> {
        match self.peer_verify {
            PeerVerify::Required => {
                error!("No credentials under security tag {}", self.sec_tag);
                Err(ConnectError::NoCredentials(self.sec_tag))
            }
            PeerVerify::Optional => {
                warn!(
                    "No credentials under security tag {}, broker not verified",
                    self.sec_tag
                );
                Ok(())
            }
            PeerVerify::None => Ok(()),
        }
    }
}

/// TLS session over a TCP socket.
pub struct TlsTransport<'a> {
    connection: TlsConnection<'a, TcpSocket<'a>, CipherSuite>,
}

impl MqttTransport for TlsTransport<'_> {
    type Error = TlsError;

    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        self.connection.write_all(buf).await?;
        self.connection.flush().await
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.connection.read(buf).await
    }

    // The socket is released when the transport is dropped.
}

/// Opens TLS connections through an `embassy-net` stack.
///
/// `READ` must hold a full TLS record (16640 bytes) unless the broker is
/// known to send smaller ones. `WRITE` bounds the largest outgoing record.
pub struct TlsConnector<'d, C, const RX: usize, const TX: usize, const READ: usize, const WRITE: usize>
{
    stack: Stack<'d>,
    credentials: C,
    rx_buffer: [u8; RX],
    tx_buffer: [u8; TX],
    record_read: [u8; READ],
    record_write: [u8; WRITE],
    timeout: Option<Duration>,
}

impl<'d, C, const RX: usize, const TX: usize, const READ: usize, const WRITE: usize>
    TlsConnector<'d, C, RX, TX, READ, WRITE>
where
    C: TlsCredentials,
{
    pub fn new(stack: Stack<'d>, credentials: C) -> Self {
        Self {
            stack,
            credentials,
            rx_buffer: [0; RX],
            tx_buffer: [0; TX],
            record_read: [0; READ],
            record_write: [0; WRITE],
            timeout: None,
        }
    }

    /// Inactivity timeout applied to every socket.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn credentials_mut(&mut self) -> &mut C {
        &mut self.credentials
    }
}

impl<'d, C, const RX: usize, const TX: usize, const READ: usize, const WRITE: usize> Connector
    for TlsConnector<'d, C, RX, TX, READ, WRITE>
where
    C: TlsCredentials,
{
    type Transport<'c>
        = TlsTransport<'c>
    where
        Self: 'c;

    type Error = ConnectError;

    async fn connect<'c>(
        &'c mut self,
        broker: &BrokerConfig<'_>,
    ) -> Result<TlsTransport<'c>, ConnectError> {
        let handshake = Handshake::for_broker(broker)?;
        let provider = if handshake.wants_credentials() {
            self.credentials.verifying_provider(handshake.sec_tag)
        } else {
            None
        };
        if provider.is_none() {
            handshake.without_credentials()?;
        }

        let socket = open_socket(
            self.stack,
            &mut self.rx_buffer,
            &mut self.tx_buffer,
            self.timeout,
            broker,
        )
        .await?;
        let mut connection =
            TlsConnection::new(socket, &mut self.record_read, &mut self.record_write);
        let config = HandshakeConfig::new().with_server_name(handshake.server_name);

        let opened = match provider {
            Some(provider) => connection.open(TlsContext::new(&config, provider)).await,
            None => {
                // Ends the (empty) store borrow before taking the RNG.
                drop(provider);
                let provider = UnverifiedProvider::new(self.credentials.rng());
                connection.open(TlsContext::new(&config, provider)).await
            }
        };
        opened.map_err(|e| {
            error!("TLS handshake with {} failed: {:?}", handshake.server_name, Dbg(&e));
            ConnectError::Tls(e)
        })?;
        info!("TLS session established with {}", handshake.server_name);
        Ok(TlsTransport { connection })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, TlsConfig};

    #[test]
    fn handshake_follows_broker_tls_settings() {
        let config = BackendConfig::new("mqtt.example.com")
            .with_port(8883)
            .with_tls(TlsConfig::new(201));
        let handshake = Handshake::for_broker(&config.broker).unwrap();
        assert_eq!(
            handshake,
            Handshake {
                server_name: "mqtt.example.com",
                sec_tag: 201,
                peer_verify: PeerVerify::Required,
            }
        );
        assert!(handshake.wants_credentials());

        let config = config.with_tls(
            TlsConfig::new(42)
                .with_hostname("sni.example.com")
                .with_peer_verify(PeerVerify::None),
        );
        let handshake = Handshake::for_broker(&config.broker).unwrap();
        assert_eq!(handshake.server_name, "sni.example.com");
        assert_eq!(handshake.sec_tag, 42);
        assert!(!handshake.wants_credentials());
    }

    #[test]
    fn plain_broker_is_rejected() {
        let config = BackendConfig::new("mqtt.example.com");
        assert!(matches!(
            Handshake::for_broker(&config.broker),
            Err(ConnectError::TlsMissing)
        ));
    }

    #[test]
    fn missing_credentials_per_verify_mode() {
        let broker = |verify| {
            BackendConfig::new("h")
                .with_tls(TlsConfig::new(7).with_peer_verify(verify))
                .broker
        };
        let required = Handshake::for_broker(&broker(PeerVerify::Required)).unwrap();
        assert!(matches!(
            required.without_credentials(),
            Err(ConnectError::NoCredentials(7))
        ));
        let optional = Handshake::for_broker(&broker(PeerVerify::Optional)).unwrap();
        assert!(optional.without_credentials().is_ok());
        let none = Handshake::for_broker(&broker(PeerVerify::None)).unwrap();
        assert!(none.without_credentials().is_ok());
    }
}
