//! Outbound requests queued for the polling task.
//!
//! Callers never touch the session directly. A publish or subscribe is copied
//! into an owned request and handed to the task through a channel, so the
//! caller's buffer is free again as soon as the call returns.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use heapless::{String, Vec};

use crate::config::{MAX_TOPIC_LEN, MQTT_PAYLOAD_BUFFER_LEN, REQUEST_QUEUE_DEPTH};
use crate::error::BackendError;
use crate::packet::QoS;

/// A message to publish, borrowed from the caller.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TxMessage<'a> {
    /// The topic to publish to
    pub topic: &'a str,
    /// The payload bytes
    pub payload: &'a [u8],
    /// Quality of Service level
    pub qos: QoS,
}

/// An owned topic string.
pub type Topic = String<MAX_TOPIC_LEN>;

/// Copies `topic` into an owned topic string.
pub fn owned_topic(topic: &str) -> Result<Topic, BackendError> {
    let mut owned = Topic::new();
    owned.push_str(topic).map_err(|_| BackendError::TopicTooLong)?;
    Ok(owned)
}

/// A publish request with inline storage for topic and payload.
#[derive(Debug, Clone)]
pub struct OwnedPublishRequest {
    pub topic: Topic,
    pub payload: Vec<u8, MQTT_PAYLOAD_BUFFER_LEN>,
    pub qos: QoS,
}

impl OwnedPublishRequest {
    pub fn from_message(msg: &TxMessage<'_>) -> Result<Self, BackendError> {
        let topic = owned_topic(msg.topic)?;
        let payload = Vec::from_slice(msg.payload).map_err(|_| BackendError::PayloadTooLarge)?;
        Ok(Self {
            topic,
            payload,
            qos: msg.qos,
        })
    }
}

/// Work for the polling task.
#[derive(Debug, Clone)]
pub enum Request {
    Publish(OwnedPublishRequest),
    /// Subscribe to a topic at QoS 1.
    Subscribe(Topic),
}

pub type RequestChannel = Channel<CriticalSectionRawMutex, Request, REQUEST_QUEUE_DEPTH>;
