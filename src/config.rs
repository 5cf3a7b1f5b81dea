//! Backend configuration.
//!
//! Buffer limits are fixed at compile time so that every buffer in the crate
//! can be a `heapless` container or a plain array. Broker settings are runtime
//! inputs assembled with the `with_*` builder methods.

use embassy_time::Duration;

/// Maximum length of the MQTT client identifier, including its prefix.
pub const MQTT_CLIENT_ID_MAX_LEN: usize = 40;

/// Size of each of the session's receive and transmit buffers.
pub const MQTT_RX_TX_BUFFER_LEN: usize = 1280;

/// Largest payload accepted for inbound notifications and outbound publishes.
pub const MQTT_PAYLOAD_BUFFER_LEN: usize = 1024;

/// Maximum length for a single topic string.
pub const MAX_TOPIC_LEN: usize = 128;

/// Number of publish/subscribe requests that can wait for the polling task.
pub const REQUEST_QUEUE_DEPTH: usize = 4;

/// Address family used when resolving the broker hostname.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressFamily {
    #[default]
    Ipv4,
    Ipv6,
}

/// How strictly the TLS peer certificate is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PeerVerify {
    None,
    Optional,
    #[default]
    Required,
}

/// TLS settings for a secure broker connection.
///
/// Credentials are not carried here; `sec_tag` refers to a credential set
/// provisioned in the modem or secure storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TlsConfig<'a> {
    pub peer_verify: PeerVerify,
    pub sec_tag: u32,
    /// Hostname for SNI and certificate checks. Defaults to the broker hostname.
    pub hostname: Option<&'a str>,
}

impl<'a> TlsConfig<'a> {
    pub const fn new(sec_tag: u32) -> Self {
        Self {
            peer_verify: PeerVerify::Required,
            sec_tag,
            hostname: None,
        }
    }

    pub const fn with_peer_verify(mut self, peer_verify: PeerVerify) -> Self {
        self.peer_verify = peer_verify;
        self
    }

    pub const fn with_hostname(mut self, hostname: &'a str) -> Self {
        self.hostname = Some(hostname);
        self
    }
}

/// Where and how to reach the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BrokerConfig<'a> {
    pub hostname: &'a str,
    pub port: u16,
    pub family: AddressFamily,
    pub tls: Option<TlsConfig<'a>>,
}

impl<'a> BrokerConfig<'a> {
    /// Name used for TLS server verification.
    pub fn tls_hostname(&self) -> Option<&'a str> {
        self.tls.map(|tls| tls.hostname.unwrap_or(self.hostname))
    }
}

/// Configuration of the MQTT transport backend.
///
/// ```ignore
/// let config = BackendConfig::new("mqtt.example.com")
///     .with_port(8883)
///     .with_tls(TlsConfig::new(201))
///     .with_keep_alive(Duration::from_secs(120));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendConfig<'a> {
    pub broker: BrokerConfig<'a>,
    pub keep_alive: Duration,
    pub client_id_prefix: &'a str,
}

impl<'a> BackendConfig<'a> {
    pub const DEFAULT_PORT: u16 = 1883;
    pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);
    pub const DEFAULT_CLIENT_ID_PREFIX: &'static str = "nrf-";

    pub const fn new(hostname: &'a str) -> Self {
        Self {
            broker: BrokerConfig {
                hostname,
                port: Self::DEFAULT_PORT,
                family: AddressFamily::Ipv4,
                tls: None,
            },
            keep_alive: Self::DEFAULT_KEEP_ALIVE,
            client_id_prefix: Self::DEFAULT_CLIENT_ID_PREFIX,
        }
    }

    pub const fn with_port(mut self, port: u16) -> Self {
        self.broker.port = port;
        self
    }

    pub const fn with_family(mut self, family: AddressFamily) -> Self {
        self.broker.family = family;
        self
    }

    pub const fn with_tls(mut self, tls: TlsConfig<'a>) -> Self {
        self.broker.tls = Some(tls);
        self
    }

    /// Keep-alive interval announced in `CONNECT`. Zero disables pings.
    pub const fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub const fn with_client_id_prefix(mut self, prefix: &'a str) -> Self {
        self.client_id_prefix = prefix;
        self
    }
}
