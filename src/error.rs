//! # Error Types
//!
//! Errors for every layer of the crate: MQTT wire and session faults, the
//! cloud codec, the transport backend handle and the cloud wrapper.

use thiserror::Error;

/// Wire-level MQTT faults raised while encoding or decoding packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// A packet with an unknown or unexpected control type was received.
    #[error("invalid packet type {0}")]
    InvalidPacketType(u8),
    /// The broker closed the stream.
    #[error("connection closed by broker")]
    ConnectionClosed,
    /// A packet was received that was not correctly formed.
    #[error("malformed packet")]
    MalformedPacket,
    /// A packet or string exceeds what the buffers or the protocol allow.
    #[error("payload too large")]
    PayloadTooLarge,
    /// A string was not valid UTF-8.
    #[error("invalid UTF-8 string")]
    InvalidUtf8String,
    /// The output buffer cannot hold the encoded packet.
    #[error("buffer too small")]
    BufferTooSmall,
}

/// Return codes carried by a `CONNACK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectReasonCode {
    Success,
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadUserNameOrPassword,
    NotAuthorized,
    Other(u8),
}

impl From<u8> for ConnectReasonCode {
    fn from(val: u8) -> Self {
        match val {
            0 => Self::Success,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadUserNameOrPassword,
            5 => Self::NotAuthorized,
            _ => Self::Other(val),
        }
    }
}

/// Errors of a single MQTT session, generic over the transport error `E`.
#[derive(Debug, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MqttError<E> {
    /// The underlying byte stream failed.
    #[error("transport error: {0:?}")]
    Transport(E),
    /// The peer violated the protocol, or a packet did not fit.
    #[error("protocol error: {0}")]
    Protocol(ProtocolError),
    /// The broker refused the session.
    #[error("connection refused: {0:?}")]
    ConnectionRefused(ConnectReasonCode),
}

impl<E> From<ProtocolError> for MqttError<E> {
    fn from(err: ProtocolError) -> Self {
        MqttError::Protocol(err)
    }
}

/// Errors returned by the cloud codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecError {
    /// A required input was empty or the command tree is inconsistent.
    #[error("invalid argument")]
    InvalidArgument,
    /// The encoded document does not fit the output buffer.
    #[error("out of memory")]
    OutOfMemory,
    /// The input is not a JSON document.
    #[error("malformed JSON input")]
    Malformed,
    /// The sensor reading has no cloud channel.
    #[error("unsupported sensor")]
    UnsupportedSensor,
}

/// Errors returned synchronously by the transport backend handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BackendError {
    /// A connection attempt or session is already active.
    #[error("connection already in progress")]
    InProgress,
    /// The backend has no usable session.
    #[error("not connected")]
    NotConnected,
    /// The outbound request queue is full.
    #[error("request queue full")]
    QueueFull,
    /// The topic exceeds `MAX_TOPIC_LEN`.
    #[error("topic too long")]
    TopicTooLong,
    /// The payload exceeds `MQTT_PAYLOAD_BUFFER_LEN`.
    #[error("payload too large")]
    PayloadTooLarge,
    /// The prefixed client identifier exceeds `MQTT_CLIENT_ID_MAX_LEN`.
    #[error("client id too long")]
    ClientIdTooLong,
}

/// Errors returned by the cloud wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WrapError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// The client identifier is empty or contains topic metacharacters.
    #[error("invalid client id")]
    InvalidClientId,
    #[error("client id too long")]
    ClientIdTooLong,
    /// A derived topic does not fit `MAX_TOPIC_LEN`.
    #[error("topic too long")]
    TopicTooLong,
    /// The device identity source failed.
    #[error("device identity unavailable")]
    Identity,
    /// The operation is not provided by this integration.
    #[error("operation not supported")]
    NotSupported,
}
