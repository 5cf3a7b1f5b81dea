//! # Cloud Connectivity for Cellular Asset Trackers
//!
//! `tracker-cloud` is a `no_std` library that connects a tracker to its cloud
//! over MQTT, built on the [Embassy](https://embassy.dev/) async ecosystem.
//!
//! ## Layers
//!
//! - **Cloud codec** ([`codec`]): encodes sensor readings into the cloud's
//!   JSON envelope and decodes command documents by walking a static command
//!   tree, calling a handler once per recognized command.
//! - **Transport backend** ([`backend`]): a single MQTT connection slot. A
//!   shared [`MqttBackend`] handle accepts connect, disconnect, publish and
//!   subscribe requests from any task; a [`ConnectionPoll`] task owns the
//!   socket, keeps the session alive and recovers from faults by returning to
//!   idle.
//! - **Cloud wrapper** ([`cloud`]): derives the client id and per-device
//!   topics and turns backend events into a small set of application events.
//!
//! The MQTT 3.1.1 session itself lives in [`client`] on top of the
//! [`packet`] codecs, over any [`transport::MqttTransport`]: plain TCP or
//! TLS 1.3 through `embassy-net`, or a custom link.
//!
//! ## Features
//!
//! - `log`: log through the `log` crate.
//! - `defmt`: log through `defmt`. Mutually exclusive with `log`.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

// This mod MUST go first, so that the others see its macros.
#[macro_use]
mod fmt;

pub mod backend;
pub mod client;
pub mod cloud;
pub mod codec;
pub mod config;
pub mod error;
pub mod packet;
pub mod transport;
pub mod util;

// Re-export key types for easier access at the crate root.
pub use backend::{BackendEvent, ConnectionPoll, ConnectionState, MqttBackend, TxMessage};
pub use client::{MqttClient, MqttOptions};
pub use cloud::{ClientId, CloudConfig, CloudWrapEvent, CloudWrapper};
pub use codec::{ChannelData, CloudChannel, CloudCodec, CloudCommand};
pub use config::{BackendConfig, BrokerConfig, TlsConfig};
pub use error::{BackendError, CodecError, MqttError, WrapError};
pub use packet::QoS;
pub use transport::{
    Connector, MqttTransport, TcpConnector, TcpTransport, TlsConnector, TlsCredentials, TlsTransport,
};
