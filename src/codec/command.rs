//! # Command Tree
//!
//! The cloud may only send commands from a fixed vocabulary. The vocabulary
//! is a four-level tree, `group -> recipient -> channel -> type`, declared
//! once as static data. Decoding a command document is a walk of that tree
//! against the parsed JSON: every leaf present in the document yields one
//! [`CloudCommand`].
//!
//! ```text
//! {"set": {"environment": {"humidity": {"threshold_high": 80}}}}
//!    │          │               │              └─ CommandType::ThresholdHigh
//!    │          │               └─ CloudChannel::Humid
//!    │          └─ Recipient::Environment
//!    └─ CommandGroup::Set
//! ```
//!
//! Commands are reported in tree order, not in the order keys appear in the
//! document.

use serde_json::Value;

use super::channel::CloudChannel;
use crate::error::CodecError;

/// Top-level command category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandGroup {
    Set,
    Get,
}

/// Subsystem a command is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Recipient {
    Environment,
    Motion,
    Ui,
    ModemInfo,
}

/// The leaf operation of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandType {
    Enable,
    Disable,
    ThresholdHigh,
    ThresholdLow,
    Read,
    ReadNew,
    Pwm,
    LedRed,
    LedGreen,
    LedBlue,
    LedPulseLength,
    LedPauseLength,
    PlayMelody,
    PlayNote,
}

/// What a node stands for. The variant fixes the node's level in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Group(CommandGroup),
    Recipient(Recipient),
    Channel(CloudChannel),
    Type(CommandType),
}

/// One node of a command tree.
#[derive(Debug)]
pub struct CommandNode {
    /// JSON key matched against the document.
    pub name: &'static str,
    pub kind: NodeKind,
    pub children: &'static [CommandNode],
}

/// A fully matched command, handed to the command handler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloudCommand {
    pub group: CommandGroup,
    pub recipient: Recipient,
    pub channel: CloudChannel,
    pub kind: CommandType,
    /// Set when the JSON leaf is a number.
    pub value: Option<f64>,
    /// Set when the JSON leaf is a boolean.
    pub state: Option<bool>,
}

macro_rules! cmd {
    ($name:ident, $kind:expr) => {
        CommandNode {
            name: stringify!($name),
            kind: $kind,
            children: &[],
        }
    };
    ($name:ident, $kind:expr, [$($child:expr),* $(,)?]) => {
        CommandNode {
            name: stringify!($name),
            kind: $kind,
            children: &[$($child),*],
        }
    };
}

macro_rules! channel {
    ($name:ident, $channel:ident, [$($child:expr),* $(,)?]) => {
        cmd!($name, NodeKind::Channel(CloudChannel::$channel), [$($child),*])
    };
}

macro_rules! leaf {
    ($name:ident, $kind:ident) => {
        cmd!($name, NodeKind::Type(CommandType::$kind))
    };
}

/// Sensor channel settings shared by every configurable sensor.
macro_rules! threshold_channel {
    ($name:ident, $channel:ident) => {
        channel!($name, $channel, [
            leaf!(enable, Enable),
            leaf!(disable, Disable),
            leaf!(threshold_high, ThresholdHigh),
            leaf!(threshold_low, ThresholdLow),
        ])
    };
}

/// A channel that can only be read.
macro_rules! read_channel {
    ($name:ident, $channel:ident $(, $extra:expr)*) => {
        channel!($name, $channel, [
            leaf!(read, Read),
            leaf!(read_all, Read)
            $(, $extra)*
        ])
    };
}

/// Root of the `"set"` vocabulary.
pub static SET_COMMANDS: CommandNode = cmd!(set, NodeKind::Group(CommandGroup::Set), [
    cmd!(environment, NodeKind::Recipient(Recipient::Environment), [
        threshold_channel!(humidity, Humid),
        threshold_channel!(pressure, AirPress),
        threshold_channel!(temperature, Temp),
        threshold_channel!(air_quality, AirQual),
    ]),
    cmd!(motion, NodeKind::Recipient(Recipient::Motion), [
        threshold_channel!(flip, Flip),
        threshold_channel!(impact, Impact),
    ]),
    cmd!(ui, NodeKind::Recipient(Recipient::Ui), [
        channel!(pin, Pin, [
            leaf!(enable, Enable),
            leaf!(disable, Disable),
            leaf!(pwm, Pwm),
        ]),
        channel!(led, RgbLed, [
            leaf!(red, LedRed),
            leaf!(green, LedGreen),
            leaf!(blue, LedBlue),
            leaf!(pulse_length, LedPulseLength),
            leaf!(pause, LedPauseLength),
        ]),
        channel!(buzzer, Buzzer, [
            leaf!(enable, Enable),
            leaf!(disable, Disable),
            leaf!(play_melody, PlayMelody),
            leaf!(play_note, PlayNote),
        ]),
    ]),
]);

/// Root of the `"get"` vocabulary.
pub static GET_COMMANDS: CommandNode = cmd!(get, NodeKind::Group(CommandGroup::Get), [
    cmd!(environment, NodeKind::Recipient(Recipient::Environment), [
        read_channel!(humidity, Humid),
        read_channel!(pressure, AirPress),
        read_channel!(temperature, Temp),
        read_channel!(air_quality, AirQual),
    ]),
    cmd!(modem_info, NodeKind::Recipient(Recipient::ModemInfo), [
        read_channel!(device, DeviceInfo, leaf!(read_new, ReadNew)),
        read_channel!(rsrp, LteLinkRsrp),
    ]),
    cmd!(motion, NodeKind::Recipient(Recipient::Motion), [
        read_channel!(flip, Flip),
        read_channel!(impact, Impact),
    ]),
    cmd!(ui, NodeKind::Recipient(Recipient::Ui), [
        read_channel!(pin, Pin),
        read_channel!(led, RgbLed),
        read_channel!(buzzer, Buzzer),
    ]),
]);

impl CommandGroup {
    /// The static tree holding this group's vocabulary.
    pub fn commands(self) -> &'static CommandNode {
        match self {
            CommandGroup::Set => &SET_COMMANDS,
            CommandGroup::Get => &GET_COMMANDS,
        }
    }
}

/// Looks up `key` in a JSON object, ignoring ASCII case. An exact match wins.
pub(crate) fn lookup<'v>(obj: &'v Value, key: &str) -> Option<&'v Value> {
    let map = obj.as_object()?;
    map.get(key).or_else(|| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

/// Walks `root` against `group_obj`, calling `on_match` for every matched leaf.
///
/// Returns the number of commands reported. A key missing at any level is
/// not an error, that branch simply yields nothing. A tree whose levels are
/// out of order is rejected with [`CodecError::InvalidArgument`]; commands
/// reported before the bad node was reached stay reported.
pub fn search_commands<F>(
    root: &CommandNode,
    group_obj: &Value,
    mut on_match: F,
) -> Result<usize, CodecError>
where
    F: FnMut(&CloudCommand),
{
    let NodeKind::Group(group) = root.kind else {
        return Err(CodecError::InvalidArgument);
    };

    let mut matched = 0;
    for rcpt in root.children {
        let NodeKind::Recipient(recipient) = rcpt.kind else {
            return Err(CodecError::InvalidArgument);
        };
        let Some(rcpt_obj) = lookup(group_obj, rcpt.name) else {
            continue;
        };

        for chan in rcpt.children {
            let NodeKind::Channel(channel) = chan.kind else {
                return Err(CodecError::InvalidArgument);
            };
            let Some(chan_obj) = lookup(rcpt_obj, chan.name) else {
                continue;
            };

            for typ in chan.children {
                let NodeKind::Type(kind) = typ.kind else {
                    return Err(CodecError::InvalidArgument);
                };
                let Some(leaf) = lookup(chan_obj, typ.name) else {
                    continue;
                };

                let command = CloudCommand {
                    group,
                    recipient,
                    channel,
                    kind,
                    value: leaf.as_f64(),
                    state: leaf.as_bool(),
                };
                on_match(&command);
                matched += 1;
            }
        }
    }

    Ok(matched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::vec::Vec;

    fn collect(root: &CommandNode, doc: &Value) -> Vec<CloudCommand> {
        let mut out = Vec::new();
        search_commands(root, doc, |cmd| out.push(*cmd)).unwrap();
        out
    }

    fn assert_tree_shape(node: &CommandNode, depth: usize) {
        let level_ok = matches!(
            (depth, node.kind),
            (0, NodeKind::Group(_))
                | (1, NodeKind::Recipient(_))
                | (2, NodeKind::Channel(_))
                | (3, NodeKind::Type(_))
        );
        assert!(level_ok, "{} at depth {}", node.name, depth);
        assert_eq!(node.children.is_empty(), depth == 3, "{}", node.name);

        let names: BTreeSet<_> = node.children.iter().map(|c| c.name).collect();
        assert_eq!(names.len(), node.children.len(), "duplicate key under {}", node.name);
        for child in node.children {
            assert_tree_shape(child, depth + 1);
        }
    }

    #[test]
    fn trees_have_four_levels_and_unique_siblings() {
        assert_tree_shape(&SET_COMMANDS, 0);
        assert_tree_shape(&GET_COMMANDS, 0);
    }

    #[test]
    fn every_leaf_path_matches_exactly_once() {
        for root in [&SET_COMMANDS, &GET_COMMANDS] {
            let NodeKind::Group(group) = root.kind else {
                unreachable!()
            };
            for rcpt in root.children {
                for chan in rcpt.children {
                    for typ in chan.children {
                        let doc = json!({ rcpt.name: { chan.name: { typ.name: 1 } } });
                        let found = collect(root, &doc);
                        assert_eq!(found.len(), 1, "{}.{}.{}", rcpt.name, chan.name, typ.name);

                        let cmd = found[0];
                        assert_eq!(cmd.group, group);
                        assert_eq!(NodeKind::Recipient(cmd.recipient), rcpt.kind);
                        assert_eq!(NodeKind::Channel(cmd.channel), chan.kind);
                        assert_eq!(NodeKind::Type(cmd.kind), typ.kind);
                    }
                }
            }
        }
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let doc = json!({
            "kitchen": { "humidity": { "enable": true } },
            "environment": {
                "rainfall": { "enable": true },
                "humidity": { "explode": 1, "enable": true },
            },
        });
        let found = collect(&SET_COMMANDS, &doc);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].channel, CloudChannel::Humid);
        assert_eq!(found[0].kind, CommandType::Enable);
    }

    #[test]
    fn matches_follow_tree_order() {
        // Temperature is declared after humidity in the tree.
        let doc = json!({
            "environment": {
                "temperature": { "threshold_low": 1 },
                "humidity": { "threshold_low": 2 },
            }
        });
        let found = collect(&SET_COMMANDS, &doc);
        let channels: Vec<_> = found.iter().map(|c| c.channel).collect();
        assert_eq!(channels, [CloudChannel::Humid, CloudChannel::Temp]);
    }

    #[test]
    fn leaf_values_are_carried() {
        let doc = json!({
            "ui": { "led": { "red": 255, "pause": "soon" }, "pin": { "enable": false } }
        });
        let found = collect(&SET_COMMANDS, &doc);
        assert_eq!(found.len(), 3);

        assert_eq!(found[0].channel, CloudChannel::Pin);
        assert_eq!(found[0].state, Some(false));
        assert_eq!(found[0].value, None);

        assert_eq!(found[1].kind, CommandType::LedRed);
        assert_eq!(found[1].value, Some(255.0));

        assert_eq!(found[2].kind, CommandType::LedPauseLength);
        assert_eq!((found[2].value, found[2].state), (None, None));
    }

    #[test]
    fn keys_match_ignoring_case() {
        let doc = json!({ "Modem_Info": { "DEVICE": { "Read_New": null } } });
        let found = collect(&GET_COMMANDS, &doc);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, CommandType::ReadNew);
    }

    #[test]
    fn non_object_levels_yield_nothing() {
        let doc = json!({ "environment": 5, "motion": ["flip"] });
        assert!(collect(&GET_COMMANDS, &doc).is_empty());
    }

    static BROKEN: CommandNode = cmd!(set, NodeKind::Group(CommandGroup::Set), [
        cmd!(environment, NodeKind::Recipient(Recipient::Environment), [
            channel!(humidity, Humid, [leaf!(enable, Enable)]),
            // A type node where a channel belongs.
            leaf!(temperature, Enable),
        ]),
    ]);

    #[test]
    fn malformed_tree_is_rejected_after_earlier_matches() {
        let doc = json!({ "environment": { "humidity": { "enable": 1 } } });
        let mut calls = 0;
        let res = search_commands(&BROKEN, &doc, |_| calls += 1);
        assert_eq!(res, Err(CodecError::InvalidArgument));
        assert_eq!(calls, 1);

        let leaf_root = &BROKEN.children[0];
        assert_eq!(
            search_commands(leaf_root, &doc, |_| {}),
            Err(CodecError::InvalidArgument)
        );
    }
}
