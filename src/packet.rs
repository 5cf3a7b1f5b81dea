//! # MQTT Packet Structures and Serialization
//!
//! MQTT 3.1.1 control packets used by the client, with the traits for
//! encoding them into and decoding them from a byte buffer. Outbound packets
//! implement [`EncodePacket`], inbound ones [`DecodePacket`]; [`decode`] turns
//! one complete frame into an [`MqttPacket`].

use crate::error::ProtocolError;
use crate::util::{self, Reader, Writer};
use heapless::Vec;

/// Protocol level byte for MQTT 3.1.1.
const PROTOCOL_LEVEL: u8 = 4;

/// Bytes reserved in front of the body for the fixed header (type + 4-byte length).
const HEADER_RESERVE: usize = 5;

/// Represents the Quality of Service (QoS) levels for MQTT messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = ProtocolError;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        match val {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(ProtocolError::MalformedPacket),
        }
    }
}

/// A trait for packets that can be encoded into a byte buffer.
pub trait EncodePacket {
    /// Encodes the packet at the start of `buf`, returning its length.
    fn encode(&self, buf: &mut [u8]) -> Result<usize, ProtocolError>;
}

/// A trait for packets that can be decoded from one complete frame.
pub trait DecodePacket<'a>: Sized {
    fn decode(frame: &'a [u8]) -> Result<Self, ProtocolError>;
}

/// Packets a client can receive from the broker.
#[derive(Debug)]
pub enum MqttPacket<'a> {
    ConnAck(ConnAck),
    Publish(Publish<'a>),
    PubAck(PubAck),
    PubRec(PubRec),
    PubRel(PubRel),
    PubComp(PubComp),
    SubAck(SubAck),
    PingResp,
}

/// Decodes one complete frame received from the broker.
pub fn decode(frame: &[u8]) -> Result<MqttPacket<'_>, ProtocolError> {
    let first = *frame.first().ok_or(ProtocolError::MalformedPacket)?;
    let packet_type = first >> 4;
    let packet = match packet_type {
        2 => MqttPacket::ConnAck(ConnAck::decode(frame)?),
        3 => MqttPacket::Publish(Publish::decode(frame)?),
        4 => MqttPacket::PubAck(PubAck::decode(frame)?),
        5 => MqttPacket::PubRec(PubRec::decode(frame)?),
        6 => MqttPacket::PubRel(PubRel::decode(frame)?),
        7 => MqttPacket::PubComp(PubComp::decode(frame)?),
        9 => MqttPacket::SubAck(SubAck::decode(frame)?),
        13 => MqttPacket::PingResp,
        _ => return Err(ProtocolError::InvalidPacketType(packet_type)),
    };
    Ok(packet)
}

/// Writes a packet body with `body`, then prepends the fixed header.
fn encode_with(
    buf: &mut [u8],
    header: u8,
    body: impl FnOnce(&mut Writer<'_>) -> Result<(), ProtocolError>,
) -> Result<usize, ProtocolError> {
    if buf.len() < HEADER_RESERVE {
        return Err(ProtocolError::BufferTooSmall);
    }
    let mut writer = Writer::at(buf, HEADER_RESERVE);
    body(&mut writer)?;
    let body_end = writer.position();
    let buf = writer.into_inner();

    let remaining_len = body_end - HEADER_RESERVE;
    let mut len_bytes = [0u8; 4];
    let len_size = util::write_variable_byte_integer(&mut len_bytes, remaining_len)?;
    let header_len = 1 + len_size;
    buf[0] = header;
    buf[1..header_len].copy_from_slice(&len_bytes[..len_size]);
    buf.copy_within(HEADER_RESERVE..body_end, header_len);
    Ok(header_len + remaining_len)
}

/// Splits a frame into its fixed-header flags and a reader over the body.
fn split_frame(frame: &[u8]) -> Result<(u8, Reader<'_>), ProtocolError> {
    let mut reader = Reader::new(frame);
    let flags = reader.u8()? & 0x0F;
    let remaining_len = reader.variable_byte_integer()?;
    Ok((flags, Reader::new(reader.bytes(remaining_len)?)))
}

// --- CONNECT Packet ---
#[derive(Debug)]
pub struct Connect<'a> {
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: &'a str,
}

impl<'a> Connect<'a> {
    pub fn new(client_id: &'a str, keep_alive: u16, clean_session: bool) -> Self {
        Self {
            client_id,
            keep_alive,
            clean_session,
        }
    }
}

impl EncodePacket for Connect<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        encode_with(buf, 0x10, |w| {
            w.put_str("MQTT")?;
            w.put_u8(PROTOCOL_LEVEL)?;
            w.put_u8(if self.clean_session { 0x02 } else { 0x00 })?;
            w.put_u16(self.keep_alive)?;
            w.put_str(self.client_id)
        })
    }
}

// --- CONNACK Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub return_code: u8,
}

impl DecodePacket<'_> for ConnAck {
    fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let (_, mut body) = split_frame(frame)?;
        let session_present = (body.u8()? & 0x01) != 0;
        let return_code = body.u8()?;
        Ok(Self {
            session_present,
            return_code,
        })
    }
}

// --- PUBLISH Packet ---
#[derive(Debug)]
pub struct Publish<'a> {
    pub topic: &'a str,
    pub qos: QoS,
    pub payload: &'a [u8],
    pub packet_id: Option<u16>,
    pub retain: bool,
    pub dup: bool,
}

impl<'a> Publish<'a> {
    pub fn new(topic: &'a str, payload: &'a [u8], qos: QoS, packet_id: Option<u16>) -> Self {
        Self {
            topic,
            qos,
            payload,
            packet_id,
            retain: false,
            dup: false,
        }
    }
}

impl<'a> DecodePacket<'a> for Publish<'a> {
    fn decode(frame: &'a [u8]) -> Result<Self, ProtocolError> {
        let (flags, mut body) = split_frame(frame)?;
        let qos = QoS::try_from((flags >> 1) & 0x03)?;
        let topic = body.str()?;
        let packet_id = if qos != QoS::AtMostOnce {
            Some(body.u16()?)
        } else {
            None
        };
        Ok(Publish {
            topic,
            qos,
            payload: body.rest(),
            packet_id,
            retain: (flags & 0x01) != 0,
            dup: (flags & 0x08) != 0,
        })
    }
}

impl EncodePacket for Publish<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        let mut header = 0x30 | ((self.qos as u8) << 1);
        if self.retain {
            header |= 0x01;
        }
        if self.dup {
            header |= 0x08;
        }
        encode_with(buf, header, |w| {
            w.put_str(self.topic)?;
            if self.qos != QoS::AtMostOnce {
                let id = self.packet_id.ok_or(ProtocolError::MalformedPacket)?;
                w.put_u16(id)?;
            }
            w.put_bytes(self.payload)
        })
    }
}

/// Acknowledgement packets made of a packet identifier only.
macro_rules! id_only_packet {
    ($(#[$meta:meta])* $name:ident, $header:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            pub packet_id: u16,
        }

        impl DecodePacket<'_> for $name {
            fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
                let (_, mut body) = split_frame(frame)?;
                Ok(Self {
                    packet_id: body.u16()?,
                })
            }
        }

        impl EncodePacket for $name {
            fn encode(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
                encode_with(buf, $header, |w| w.put_u16(self.packet_id))
            }
        }
    };
}

id_only_packet!(
    /// QoS 1 publish acknowledgement.
    PubAck,
    0x40
);
id_only_packet!(
    /// QoS 2 publish received, first step of the handshake.
    PubRec,
    0x50
);
id_only_packet!(
    /// QoS 2 publish release.
    PubRel,
    0x62
);
id_only_packet!(
    /// QoS 2 publish complete.
    PubComp,
    0x70
);

// --- SUBSCRIBE Packet ---
#[derive(Debug)]
pub struct Subscribe<'a> {
    pub packet_id: u16,
    pub topics: Vec<(&'a str, QoS), 8>,
}

impl<'a> Subscribe<'a> {
    /// Creates a new Subscribe packet with a single topic.
    pub fn new(packet_id: u16, topic: &'a str, qos: QoS) -> Self {
        let mut topics = Vec::new();
        let _ = topics.push((topic, qos));
        Self { packet_id, topics }
    }
}

impl EncodePacket for Subscribe<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        // SUBSCRIBE carries the mandatory reserved bits 0b0010.
        encode_with(buf, 0x82, |w| {
            w.put_u16(self.packet_id)?;
            for (topic, qos) in &self.topics {
                w.put_str(topic)?;
                w.put_u8(*qos as u8)?;
            }
            Ok(())
        })
    }
}

// --- SUBACK Packet ---
#[derive(Debug)]
pub struct SubAck {
    pub packet_id: u16,
    pub return_codes: Vec<u8, 8>,
}

impl SubAck {
    /// Return code the broker uses to reject a topic filter.
    pub const FAILURE: u8 = 0x80;

    pub fn is_rejected(&self) -> bool {
        self.return_codes.contains(&Self::FAILURE)
    }
}

impl DecodePacket<'_> for SubAck {
    fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let (_, mut body) = split_frame(frame)?;
        let packet_id = body.u16()?;
        let mut return_codes = Vec::new();
        for code in body.rest() {
            return_codes
                .push(*code)
                .map_err(|_| ProtocolError::PayloadTooLarge)?;
        }
        Ok(SubAck {
            packet_id,
            return_codes,
        })
    }
}

// --- PINGREQ Packet ---
#[derive(Debug)]
pub struct PingReq;

impl EncodePacket for PingReq {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        Writer::new(buf).put_bytes(&[0xC0, 0x00])?;
        Ok(2)
    }
}

// --- DISCONNECT Packet ---
#[derive(Debug)]
pub struct Disconnect;

impl EncodePacket for Disconnect {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        Writer::new(buf).put_bytes(&[0xE0, 0x00])?;
        Ok(2)
    }
}
