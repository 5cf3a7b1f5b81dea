//! Telemetry channels and the data sent on them.

use core::num::NonZeroU32;
use core::sync::atomic::{AtomicU32, Ordering};

/// A sensor or actuator channel known to the cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CloudChannel {
    Gps,
    Flip,
    Impact,
    Button,
    Pin,
    RgbLed,
    Buzzer,
    Temp,
    Humid,
    AirPress,
    AirQual,
    LteLinkRsrp,
    DeviceInfo,
}

impl CloudChannel {
    /// Name of the channel in the `appId` field, if the channel can carry
    /// telemetry.
    pub fn app_id(self) -> Option<&'static str> {
        match self {
            CloudChannel::Gps => Some("GPS"),
            CloudChannel::Flip => Some("FLIP"),
            CloudChannel::Button => Some("BUTTON"),
            CloudChannel::Temp => Some("TEMP"),
            CloudChannel::Humid => Some("HUMID"),
            CloudChannel::AirPress => Some("AIR_PRESS"),
            CloudChannel::AirQual => Some("AIR_QUAL"),
            CloudChannel::LteLinkRsrp => Some("RSRP"),
            CloudChannel::DeviceInfo => Some("DEVICE"),
            CloudChannel::Impact | CloudChannel::Pin | CloudChannel::RgbLed | CloudChannel::Buzzer => {
                None
            }
        }
    }
}

/// Correlation identifier of an outbound reading. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Tag(NonZeroU32);

impl Tag {
    pub const FIRST: Tag = Tag(NonZeroU32::MIN);

    pub fn new(val: u32) -> Option<Self> {
        NonZeroU32::new(val).map(Tag)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// The following tag. Wraps from `u32::MAX` to 1.
    #[must_use]
    pub fn next(self) -> Self {
        Tag(self.0.checked_add(1).unwrap_or(NonZeroU32::MIN))
    }
}

impl Default for Tag {
    fn default() -> Self {
        Self::FIRST
    }
}

/// Hands out increasing tags, shareable between tasks.
#[derive(Debug)]
pub struct TagSequence {
    last: AtomicU32,
}

impl TagSequence {
    pub const fn new() -> Self {
        Self {
            last: AtomicU32::new(0),
        }
    }

    pub fn next(&self) -> Tag {
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let next = Tag::new(current).map_or(Tag::FIRST, Tag::next);
            match self.last.compare_exchange_weak(
                current,
                next.get(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for TagSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// One outbound reading.
///
/// `data` is the reading already rendered as text, numbers with one decimal.
#[derive(Debug, Clone, Copy)]
pub struct ChannelData<'a> {
    pub channel: CloudChannel,
    pub data: &'a str,
    pub tag: Tag,
}

impl<'a> ChannelData<'a> {
    pub fn new(channel: CloudChannel, data: &'a str, tag: Tag) -> Self {
        Self { channel, data, tag }
    }
}

/// Kind of environmental sensor reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EnvSensor {
    Temperature,
    Humidity,
    AirPressure,
    AirQuality,
}

impl EnvSensor {
    /// Channel the reading is reported on, if the cloud accepts it.
    pub fn channel(self) -> Option<CloudChannel> {
        match self {
            EnvSensor::Temperature => Some(CloudChannel::Temp),
            EnvSensor::Humidity => Some(CloudChannel::Humid),
            EnvSensor::AirPressure => Some(CloudChannel::AirPress),
            EnvSensor::AirQuality => None,
        }
    }
}

/// A single environmental sensor sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvSensorData {
    pub sensor: EnvSensor,
    pub value: f64,
}
