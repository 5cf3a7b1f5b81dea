//! # MQTT Transport Abstraction
//!
//! [`MqttTransport`] abstracts the reliable byte stream a session runs on.
//! [`Connector`] produces a fresh transport for every connection attempt:
//! it resolves the broker, opens the socket and applies TLS settings.
//!
//! [`TcpConnector`] is the plain TCP implementation on top of `embassy-net`.
//! [`TlsConnector`] runs TLS 1.3 over the same sockets, with credentials
//! looked up by the broker configuration's security tag.

mod tls;

pub use tls::{CipherSuite, TlsConnector, TlsCredentials, TlsTransport};

use crate::config::{AddressFamily, BrokerConfig};
use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::{ConnectError as TcpConnectError, Error as TcpError, TcpSocket};
use embassy_net::{IpAddress, Stack};
use embassy_time::Duration;
use embedded_io_async::Write;
use embedded_tls::TlsError;
use thiserror::Error;

/// A reliable, ordered byte stream carrying MQTT packets.
#[allow(async_fn_in_trait)]
pub trait MqttTransport {
    /// The error type returned by the transport.
    type Error: core::fmt::Debug;

    /// Sends the whole buffer.
    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error>;

    /// Receives data into `buf`, returning the number of bytes read.
    ///
    /// `Ok(0)` means the peer closed the stream. The future must be safe to
    /// drop before completion; the session races it against other work.
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Tears the connection down without a graceful shutdown.
    fn abort(&mut self) {}
}

/// Opens transports to the broker.
#[allow(async_fn_in_trait)]
pub trait Connector {
    /// The transport produced for one connection.
    type Transport<'c>: MqttTransport
    where
        Self: 'c;

    type Error: core::fmt::Debug;

    /// Resolves the broker address and opens a connection to it.
    async fn connect<'c>(
        &'c mut self,
        broker: &BrokerConfig<'_>,
    ) -> Result<Self::Transport<'c>, Self::Error>;
}

/// Reasons a connector could not open a connection.
#[derive(Debug, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectError {
    /// The hostname did not resolve to an address of the requested family.
    #[error("broker hostname did not resolve")]
    Resolve,
    /// The TCP handshake failed.
    #[error("tcp connect failed: {0:?}")]
    Tcp(TcpConnectError),
    /// The broker configuration asks for TLS; use a [`TlsConnector`].
    #[error("tls not supported by this connector")]
    TlsUnsupported,
    /// A [`TlsConnector`] was given a broker configuration without TLS.
    #[error("broker configuration has no tls settings")]
    TlsMissing,
    /// Peer verification is required but no credentials are stored under the tag.
    #[error("no credentials for security tag {0}")]
    NoCredentials(u32),
    /// The TLS handshake failed.
    #[error("tls handshake failed: {0:?}")]
    Tls(TlsError),
}

/// TCP transport implementation using `embassy-net`.
pub struct TcpTransport<'a> {
    socket: TcpSocket<'a>,
}

impl<'a> TcpTransport<'a> {
    pub fn new(socket: TcpSocket<'a>) -> Self {
        Self { socket }
    }
}

impl MqttTransport for TcpTransport<'_> {
    type Error = TcpError;

    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        self.socket.write_all(buf).await?;
        // Flush to ensure data is actually sent to the network
        self.socket.flush().await
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.socket.read(buf).await
    }

    fn abort(&mut self) {
        self.socket.abort();
    }
}

/// Opens plain TCP connections through an `embassy-net` stack.
///
/// The socket buffers live in the connector and are lent to one connection
/// at a time.
pub struct TcpConnector<'d, const RX: usize, const TX: usize> {
    stack: Stack<'d>,
    rx_buffer: [u8; RX],
    tx_buffer: [u8; TX],
    timeout: Option<Duration>,
}

impl<'d, const RX: usize, const TX: usize> TcpConnector<'d, RX, TX> {
    pub fn new(stack: Stack<'d>) -> Self {
        Self {
            stack,
            rx_buffer: [0; RX],
            tx_buffer: [0; TX],
            timeout: None,
        }
    }

    /// Inactivity timeout applied to every socket. The broker keep-alive
    /// should be shorter than this.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

}

/// Resolves `hostname` and keeps the first address of the wanted family.
async fn resolve(
    stack: Stack<'_>,
    hostname: &str,
    family: AddressFamily,
) -> Result<IpAddress, ConnectError> {
    let query = match family {
        AddressFamily::Ipv4 => DnsQueryType::A,
        AddressFamily::Ipv6 => DnsQueryType::Aaaa,
    };
    let addresses = stack.dns_query(hostname, query).await.map_err(|_e| {
        error!("DNS query for {} failed: {:?}", hostname, _e);
        ConnectError::Resolve
    })?;
    let address = addresses.first().copied().ok_or(ConnectError::Resolve)?;
    debug!("Broker address found: {:?}", address);
    Ok(address)
}

/// Resolves the broker and opens a TCP socket to it over the given buffers.
async fn open_socket<'s>(
    stack: Stack<'s>,
    rx_buffer: &'s mut [u8],
    tx_buffer: &'s mut [u8],
    timeout: Option<Duration>,
    broker: &BrokerConfig<'_>,
) -> Result<TcpSocket<'s>, ConnectError> {
    let address = resolve(stack, broker.hostname, broker.family).await?;

    let mut socket = TcpSocket::new(stack, rx_buffer, tx_buffer);
    socket.set_timeout(timeout);
    if let Err(e) = socket.connect((address, broker.port)).await {
        socket.abort();
        return Err(ConnectError::Tcp(e));
    }
    info!("TCP connected to {}:{}", broker.hostname, broker.port);
    Ok(socket)
}

impl<'d, const RX: usize, const TX: usize> Connector for TcpConnector<'d, RX, TX> {
    type Transport<'c>
        = TcpTransport<'c>
    where
        Self: 'c;

    type Error = ConnectError;

    async fn connect<'c>(
        &'c mut self,
        broker: &BrokerConfig<'_>,
    ) -> Result<TcpTransport<'c>, ConnectError> {
        if broker.tls.is_some() {
            return Err(ConnectError::TlsUnsupported);
        }
        let socket = open_socket(
            self.stack,
            &mut self.rx_buffer,
            &mut self.tx_buffer,
            self.timeout,
            broker,
        )
        .await?;
        Ok(TcpTransport::new(socket))
    }
}
