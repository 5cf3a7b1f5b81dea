//! # MQTT Serialization Utilities
//!
//! Helpers for reading and writing MQTT-specific data types from and to byte
//! buffers: variable-byte integers, length-prefixed strings and the framing
//! of packets inside a receive buffer.

use crate::error::ProtocolError;

/// Largest value a variable-byte integer can carry (four bytes).
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Reads a variable-byte integer starting at `cursor`.
///
/// Returns `Ok(None)` when the buffer ends before the integer does.
pub fn read_variable_byte_integer(
    cursor: &mut usize,
    buf: &[u8],
) -> Result<Option<usize>, ProtocolError> {
    let mut multiplier = 1;
    let mut value = 0;
    for i in 0..4 {
        let Some(encoded_byte) = buf.get(*cursor + i) else {
            return Ok(None);
        };
        value += (encoded_byte & 127) as usize * multiplier;
        if (encoded_byte & 128) == 0 {
            *cursor += i + 1;
            return Ok(Some(value));
        }
        multiplier *= 128;
    }
    Err(ProtocolError::MalformedPacket)
}

/// Writes a variable-byte integer at the start of `buf`, returning the byte count.
pub fn write_variable_byte_integer(buf: &mut [u8], mut val: usize) -> Result<usize, ProtocolError> {
    if val > MAX_REMAINING_LENGTH {
        return Err(ProtocolError::PayloadTooLarge);
    }
    let mut i = 0;
    loop {
        let mut encoded_byte = (val % 128) as u8;
        val /= 128;
        if val > 0 {
            encoded_byte |= 128;
        }
        *buf.get_mut(i).ok_or(ProtocolError::BufferTooSmall)? = encoded_byte;
        i += 1;
        if val == 0 {
            return Ok(i);
        }
    }
}

/// Returns the total length of the first packet in `buf` once it is complete.
///
/// `capacity` is the size of the buffer the packet must eventually fit in; a
/// packet announcing more than that can never be assembled.
pub fn frame_len(buf: &[u8], capacity: usize) -> Result<Option<usize>, ProtocolError> {
    if buf.is_empty() {
        return Ok(None);
    }
    let mut cursor = 1;
    let Some(remaining) = read_variable_byte_integer(&mut cursor, buf)? else {
        return Ok(None);
    };
    let total = cursor + remaining;
    if total > capacity {
        return Err(ProtocolError::PayloadTooLarge);
    }
    Ok((buf.len() >= total).then_some(total))
}

/// Bounds-checked sequential writer over an output buffer.
pub struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Starts writing at `pos`, leaving the bytes before it untouched.
    pub fn at(buf: &'a mut [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn put_u8(&mut self, val: u8) -> Result<(), ProtocolError> {
        self.put_bytes(&[val])
    }

    pub fn put_u16(&mut self, val: u16) -> Result<(), ProtocolError> {
        self.put_bytes(&val.to_be_bytes())
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let end = self.pos + bytes.len();
        self.buf
            .get_mut(self.pos..end)
            .ok_or(ProtocolError::BufferTooSmall)?
            .copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    /// Writes a UTF-8 string prefixed with its 2-byte length.
    pub fn put_str(&mut self, s: &str) -> Result<(), ProtocolError> {
        let len = u16::try_from(s.len()).map_err(|_| ProtocolError::PayloadTooLarge)?;
        self.put_u16(len)?;
        self.put_bytes(s.as_bytes())
    }

    pub fn into_inner(self) -> &'a mut [u8] {
        self.buf
    }
}

/// Bounds-checked sequential reader over one packet.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn u8(&mut self) -> Result<u8, ProtocolError> {
        let byte = *self.buf.get(self.pos).ok_or(ProtocolError::MalformedPacket)?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn u16(&mut self) -> Result<u16, ProtocolError> {
        let bytes = self.bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        let slice = self
            .buf
            .get(self.pos..self.pos + len)
            .ok_or(ProtocolError::MalformedPacket)?;
        self.pos += len;
        Ok(slice)
    }

    /// Reads a UTF-8 string prefixed with a 2-byte length.
    pub fn str(&mut self) -> Result<&'a str, ProtocolError> {
        let len = self.u16()? as usize;
        core::str::from_utf8(self.bytes(len)?).map_err(|_| ProtocolError::InvalidUtf8String)
    }

    pub fn variable_byte_integer(&mut self) -> Result<usize, ProtocolError> {
        read_variable_byte_integer(&mut self.pos, self.buf)?.ok_or(ProtocolError::MalformedPacket)
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let rest = self.buf.get(self.pos..).unwrap_or_default();
        self.pos = self.buf.len();
        rest
    }
}
