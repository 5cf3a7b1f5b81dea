//! # Cloud Codec
//!
//! Encodes telemetry into the cloud's JSON envelope and decodes command
//! documents through the static command tree.
//!
//! ```ignore
//! let mut codec = CloudCodec::init(|cmd: &CloudCommand| {
//!     info!("{:?} {:?} {:?}", cmd.recipient, cmd.channel, cmd.kind);
//! });
//! codec.decode_command(br#"{"get":{"modem_info":{"device":{"read":true}}}}"#)?;
//!
//! let mut buf = [0u8; 128];
//! let len = encode_data(&ChannelData::new(CloudChannel::Temp, "21.5", tag), &mut buf)?;
//! ```

pub mod channel;
pub mod command;

pub use channel::{ChannelData, CloudChannel, EnvSensor, EnvSensorData, Tag, TagSequence};
pub use command::{
    CloudCommand, CommandGroup, CommandNode, CommandType, GET_COMMANDS, NodeKind, Recipient,
    SET_COMMANDS, search_commands,
};

use core::fmt::Write as _;

use serde::Serialize;
use serde_json::Value;

use crate::error::CodecError;
use crate::fmt::Dbg;

/// Receives decoded commands. The command is only valid during the call.
pub trait CommandHandler {
    fn on_command(&mut self, command: &CloudCommand);
}

impl<F> CommandHandler for F
where
    F: FnMut(&CloudCommand),
{
    fn on_command(&mut self, command: &CloudCommand) {
        self(command)
    }
}

/// Decoder state: the registered command handler.
pub struct CloudCodec<H> {
    handler: H,
}

impl<H: CommandHandler> CloudCodec<H> {
    pub fn init(handler: H) -> Self {
        Self { handler }
    }

    /// Replaces the command handler. There is only ever one.
    pub fn set_handler(&mut self, handler: H) {
        self.handler = handler;
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Decodes a command document, calling the handler once per matched
    /// command. `"get"` is processed before `"set"`.
    ///
    /// Returns the number of commands dispatched. On error, commands matched
    /// before the fault have already been dispatched.
    pub fn decode_command(&mut self, input: &[u8]) -> Result<usize, CodecError> {
        if input.is_empty() {
            return Err(CodecError::InvalidArgument);
        }
        let root: Value = serde_json::from_slice(input).map_err(|_e| {
            debug!("Command is not JSON: {:?}", Dbg(&_e));
            CodecError::Malformed
        })?;

        let mut dispatched = 0;
        for group in [CommandGroup::Get, CommandGroup::Set] {
            let tree = group.commands();
            let Some(group_obj) = command::lookup(&root, tree.name) else {
                continue;
            };
            dispatched += search_commands(tree, group_obj, |cmd| self.handler.on_command(cmd))?;
        }
        if dispatched == 0 {
            debug!("No known command in document");
        }
        Ok(dispatched)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<'a> {
    app_id: &'a str,
    data: &'a str,
    message_type: &'static str,
}

/// Encodes one reading as `{"appId":..,"data":..,"messageType":"DATA"}` into
/// `out`, returning the encoded length.
///
/// Fails with [`CodecError::InvalidArgument`] for empty data or a channel
/// without a cloud name, and with [`CodecError::OutOfMemory`] when `out` is
/// too small. `out` is left untouched on failure.
pub fn encode_data(channel: &ChannelData<'_>, out: &mut [u8]) -> Result<usize, CodecError> {
    if channel.data.is_empty() {
        return Err(CodecError::InvalidArgument);
    }
    let app_id = channel.channel.app_id().ok_or(CodecError::InvalidArgument)?;

    let envelope = Envelope {
        app_id,
        data: channel.data,
        message_type: "DATA",
    };
    let json = serde_json::to_vec(&envelope).map_err(|_| CodecError::OutOfMemory)?;
    let dst = out.get_mut(..json.len()).ok_or(CodecError::OutOfMemory)?;
    dst.copy_from_slice(&json);
    trace!("Encoded tag {}: {} bytes", channel.tag.get(), json.len());
    Ok(json.len())
}

/// Encodes an environmental sensor sample, value rendered with one decimal.
pub fn encode_env_sensor_data(sample: &EnvSensorData, out: &mut [u8]) -> Result<usize, CodecError> {
    let channel = sample.sensor.channel().ok_or(CodecError::UnsupportedSensor)?;

    let mut data = heapless::String::<16>::new();
    write!(data, "{:.1}", sample.value).map_err(|_| CodecError::OutOfMemory)?;

    encode_data(&ChannelData::new(channel, &data, Tag::FIRST), out)
}
