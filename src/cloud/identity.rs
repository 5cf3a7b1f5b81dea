//! Client identifier and the topics derived from it.

use core::fmt::Write as _;
use core::str;

use heapless::String;

use crate::backend::Topic;
use crate::config::MQTT_CLIENT_ID_MAX_LEN;
use crate::error::WrapError;
use crate::fmt::Dbg;

/// Length of a modem IMEI.
pub const IMEI_LEN: usize = 15;

/// Source of the device's identity string, such as the modem's `AT+CGSN` answer.
#[allow(async_fn_in_trait)]
pub trait DeviceIdentity {
    type Error: core::fmt::Debug;

    /// Writes the raw identity into `buf` and returns the number of bytes.
    async fn read_identity(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

/// Identifier of this device towards the cloud. Never empty, and free of
/// characters with a meaning in MQTT topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientId(String<MQTT_CLIENT_ID_MAX_LEN>);

impl ClientId {
    /// Uses a statically configured identifier.
    pub fn custom(id: &str) -> Result<Self, WrapError> {
        if id.is_empty() || id.contains(['/', '+', '#']) || id.contains(char::is_whitespace) {
            return Err(WrapError::InvalidClientId);
        }
        let mut owned = String::new();
        owned.push_str(id).map_err(|_| WrapError::ClientIdTooLong)?;
        Ok(Self(owned))
    }

    /// Reads the identity from `source` and keeps its first [`IMEI_LEN`]
    /// characters.
    pub async fn from_identity<D: DeviceIdentity>(source: &mut D) -> Result<Self, WrapError> {
        let mut buf = [0u8; 32];
        let len = source.read_identity(&mut buf).await.map_err(|_e| {
            error!("Not able to retrieve device identity: {:?}", Dbg(&_e));
            WrapError::Identity
        })?;
        let raw = buf.get(..len.min(IMEI_LEN)).ok_or(WrapError::Identity)?;
        let id = str::from_utf8(raw).map_err(|_| WrapError::Identity)?;
        Self::custom(id.trim_end())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The per-device topics, fixed once the client id is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    /// Configuration updates from the cloud. Subscribed on connect.
    pub cfg: Topic,
    pub batch: Topic,
    pub messages: Topic,
}

impl TopicSet {
    pub fn new(client_id: &ClientId) -> Result<Self, WrapError> {
        Ok(Self {
            cfg: topic(client_id, "cfg")?,
            batch: topic(client_id, "batch")?,
            messages: topic(client_id, "messages")?,
        })
    }
}

fn topic(client_id: &ClientId, leaf: &str) -> Result<Topic, WrapError> {
    let mut topic = Topic::new();
    write!(topic, "{}/{}", client_id.as_str(), leaf).map_err(|_| WrapError::TopicTooLong)?;
    Ok(topic)
}
