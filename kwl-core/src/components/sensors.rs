//! Additional climate and CO2 sensors with change-driven publishing.
//!
//! Readings are sampled on their own periods. Two send tasks share one
//! operation: the regular one only publishes when a value moved enough, the
//! forced one publishes unconditionally on a long period. Whichever sends
//! restarts both periods. Publishing goes through a [`PublishTask`] whose
//! message is a bitmask of values still to be sent, so a busy link resumes
//! where it stopped.

use core::cell::Cell;
use core::fmt;
use core::time::Duration;

use crate::scheduler::{
    PublishTask, RegisterError, Scheduler, SendStatus, StatsGroup, StatsGrouping, TimedTask,
};

pub const STATS_NAME: &str = "AdditionalSensors";

pub const CLIMATE_READ_INTERVAL: Duration = Duration::from_secs(10);
pub const CO2_READ_INTERVAL: Duration = Duration::from_secs(10);
pub const CLIMATE_SEND_INTERVAL: Duration = Duration::from_secs(5);
pub const CLIMATE_FORCE_INTERVAL: Duration = Duration::from_secs(300);
pub const CO2_SEND_INTERVAL: Duration = Duration::from_secs(60);
pub const CO2_FORCE_INTERVAL: Duration = Duration::from_secs(300);
/// Delay before the first send, so the first reading is in.
pub const FIRST_SEND_DELAY: Duration = Duration::from_secs(11);
pub const PUBLISH_RETRY: Duration = Duration::from_millis(100);

/// Temperature change (0.1 °C) below which a regular send is skipped.
const TEMPERATURE_HYSTERESIS: i16 = 1;
/// Humidity change (0.1 %) below which a regular send is skipped.
const HUMIDITY_HYSTERESIS: u16 = 10;
/// CO2 change (ppm) below which a regular send is skipped.
const CO2_HYSTERESIS: u16 = 20;

pub const CLIMATE_CHANNELS: usize = 2;

const TASK_NAMES: [&str; 8] = [
    "ClimateRead",
    "Co2Read",
    "ClimateSend",
    "ClimateSendForce",
    "Co2Send",
    "Co2SendForce",
    "ClimatePublish",
    "Co2Publish",
];

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ClimateReading {
    pub deci_celsius: i16,
    pub deci_percent: u16,
}

/// A single value handed to the bus.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Reading {
    Temperature { channel: u8, deci_celsius: i16 },
    Humidity { channel: u8, deci_percent: u16 },
    Co2 { ppm: u16 },
}

impl Reading {
    /// State topic suffix below `/state/kwl/`.
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        match self {
            Reading::Temperature { channel: 0, .. } => "dht1/temperatur",
            Reading::Temperature { .. } => "dht2/temperatur",
            Reading::Humidity { channel: 0, .. } => "dht1/humidity",
            Reading::Humidity { .. } => "dht2/humidity",
            Reading::Co2 { .. } => "abluft/co2",
        }
    }
}

/// Formats the payload: one decimal for climate values, whole ppm for CO2.
impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Reading::Temperature { deci_celsius, .. } => {
                let sign = if deci_celsius < 0 { "-" } else { "" };
                let abs = deci_celsius.unsigned_abs();
                write!(f, "{sign}{}.{}", abs / 10, abs % 10)
            }
            Reading::Humidity { deci_percent, .. } => {
                write!(f, "{}.{}", deci_percent / 10, deci_percent % 10)
            }
            Reading::Co2 { ppm } => write!(f, "{ppm}"),
        }
    }
}

/// Sensor drivers.
pub trait SensorPort {
    /// Returns `None` when the sensor is absent or the read failed.
    fn read_climate(&self, channel: usize) -> Option<ClimateReading>;
    fn read_co2(&self) -> Option<u16>;
}

/// Outbound link for readings.
pub trait ReadingSink {
    /// Returns `false` when the link is busy and the value must be retried.
    fn publish(&self, reading: Reading) -> bool;
}

pub struct SensorHub<'a, P, K> {
    port: P,
    sink: K,
    climate: [Cell<Option<ClimateReading>>; CLIMATE_CHANNELS],
    climate_sent: [Cell<Option<ClimateReading>>; CLIMATE_CHANNELS],
    co2: Cell<Option<u16>>,
    co2_sent: Cell<Option<u16>>,
    stats: StatsGroup<'a, 8>,
    climate_read: TimedTask<'a, SensorHub<'a, P, K>>,
    co2_read: TimedTask<'a, SensorHub<'a, P, K>>,
    climate_send: TimedTask<'a, SensorHub<'a, P, K>, bool>,
    climate_send_force: TimedTask<'a, SensorHub<'a, P, K>, bool>,
    co2_send: TimedTask<'a, SensorHub<'a, P, K>, bool>,
    co2_send_force: TimedTask<'a, SensorHub<'a, P, K>, bool>,
    climate_publish: PublishTask<'a, SensorHub<'a, P, K>, u8>,
    co2_publish: PublishTask<'a, SensorHub<'a, P, K>, u16>,
}

impl<'a, P: SensorPort, K: ReadingSink> SensorHub<'a, P, K> {
    #[must_use]
    pub fn new(port: P, sink: K, grouping: StatsGrouping) -> Self {
        Self {
            port,
            sink,
            climate: [const { Cell::new(None) }; CLIMATE_CHANNELS],
            climate_sent: [const { Cell::new(None) }; CLIMATE_CHANNELS],
            co2: Cell::new(None),
            co2_sent: Cell::new(None),
            stats: StatsGroup::new(STATS_NAME, TASK_NAMES, grouping),
            climate_read: TimedTask::new(Self::read_climate),
            co2_read: TimedTask::new(Self::read_co2),
            climate_send: TimedTask::with_args(Self::send_climate, false),
            climate_send_force: TimedTask::with_args(Self::send_climate, true),
            co2_send: TimedTask::with_args(Self::send_co2, false),
            co2_send_force: TimedTask::with_args(Self::send_co2, true),
            climate_publish: PublishTask::new(Self::publish_climate, PUBLISH_RETRY),
            co2_publish: PublishTask::new(Self::publish_co2, PUBLISH_RETRY),
        }
    }

    /// Registers every task of the hub; nothing runs until [`begin`](Self::begin).
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::AlreadyRegistered`] when attached twice.
    pub fn attach(&'a self, scheduler: &Scheduler<'a>) -> Result<(), RegisterError> {
        let stats = &self.stats;
        self.climate_read.attach(self, stats.for_task(0), scheduler)?;
        self.co2_read.attach(self, stats.for_task(1), scheduler)?;
        self.climate_send.attach(self, stats.for_task(2), scheduler)?;
        self.climate_send_force
            .attach(self, stats.for_task(3), scheduler)?;
        self.co2_send.attach(self, stats.for_task(4), scheduler)?;
        self.co2_send_force.attach(self, stats.for_task(5), scheduler)?;
        self.climate_publish
            .attach(self, stats.for_task(6), scheduler)?;
        self.co2_publish.attach(self, stats.for_task(7), scheduler)
    }

    /// Probes the sensors and starts sampling and sending for those present.
    pub fn begin(&self) {
        let mut any_climate = false;
        for (channel, slot) in self.climate.iter().enumerate() {
            let reading = self.port.read_climate(channel);
            any_climate |= reading.is_some();
            slot.set(reading);
        }
        if any_climate {
            self.climate_read.run_repeated(CLIMATE_READ_INTERVAL);
            self.climate_send
                .run_repeated_after(FIRST_SEND_DELAY, CLIMATE_SEND_INTERVAL);
            self.climate_send_force
                .run_repeated_after(FIRST_SEND_DELAY, CLIMATE_FORCE_INTERVAL);
        }

        let co2 = self.port.read_co2();
        self.co2.set(co2);
        if co2.is_some() {
            self.co2_read.run_repeated(CO2_READ_INTERVAL);
            self.co2_send
                .run_repeated_after(FIRST_SEND_DELAY, CO2_SEND_INTERVAL);
            self.co2_send_force
                .run_repeated_after(FIRST_SEND_DELAY, CO2_FORCE_INTERVAL);
        }
    }

    /// Publishes every present value on the next pass regardless of change.
    pub fn force_send(&self) {
        if self.climate.iter().any(|reading| reading.get().is_some()) {
            self.send_climate(true);
        }
        if self.co2.get().is_some() {
            self.send_co2(true);
        }
    }

    #[must_use]
    pub fn climate(&self, channel: usize) -> Option<ClimateReading> {
        self.climate.get(channel).and_then(Cell::get)
    }

    #[must_use]
    pub fn co2(&self) -> Option<u16> {
        self.co2.get()
    }

    #[must_use]
    pub const fn stats(&self) -> &StatsGroup<'a, 8> {
        &self.stats
    }

    #[must_use]
    pub fn is_publishing(&self) -> bool {
        self.climate_publish.is_pending() || self.co2_publish.is_pending()
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    fn read_climate(&self) {
        for (channel, slot) in self.climate.iter().enumerate() {
            if let Some(reading) = self.port.read_climate(channel) {
                slot.set(Some(reading));
            }
        }
    }

    fn read_co2(&self) {
        if let Some(ppm) = self.port.read_co2() {
            self.co2.set(Some(ppm));
        }
    }

    fn send_climate(&self, force: bool) {
        let changed = self
            .climate
            .iter()
            .zip(&self.climate_sent)
            .any(|(now, sent)| climate_changed(now.get(), sent.get()));
        if !force && !changed {
            return;
        }

        let mut bitmap = 0u8;
        for (channel, (now, sent)) in self.climate.iter().zip(&self.climate_sent).enumerate() {
            sent.set(now.get());
            if now.get().is_some() {
                bitmap |= 0b11 << (channel * 2);
            }
        }
        if bitmap != 0 {
            self.climate_publish.publish(bitmap);
        }
        self.climate_send.run_repeated(CLIMATE_SEND_INTERVAL);
        self.climate_send_force.run_repeated(CLIMATE_FORCE_INTERVAL);
    }

    fn send_co2(&self, force: bool) {
        let Some(ppm) = self.co2.get() else {
            return;
        };
        let changed = self
            .co2_sent
            .get()
            .is_none_or(|sent| ppm.abs_diff(sent) >= CO2_HYSTERESIS);
        if !force && !changed {
            return;
        }

        self.co2_sent.set(Some(ppm));
        self.co2_publish.publish(ppm);
        self.co2_send.run_repeated(CO2_SEND_INTERVAL);
        self.co2_send_force.run_repeated(CO2_FORCE_INTERVAL);
    }

    fn publish_climate(&self, bitmap: &mut u8) -> SendStatus {
        for bit in 0..(CLIMATE_CHANNELS * 2) {
            let mask = 1u8 << bit;
            if *bitmap & mask == 0 {
                continue;
            }
            let channel = bit / 2;
            if let Some(reading) = self.climate(channel) {
                let channel_id = u8::try_from(channel).unwrap_or(u8::MAX);
                let value = if bit % 2 == 0 {
                    Reading::Temperature {
                        channel: channel_id,
                        deci_celsius: reading.deci_celsius,
                    }
                } else {
                    Reading::Humidity {
                        channel: channel_id,
                        deci_percent: reading.deci_percent,
                    }
                };
                if !self.sink.publish(value) {
                    return SendStatus::Retry;
                }
            }
            *bitmap &= !mask;
        }
        SendStatus::Sent
    }

    fn publish_co2(&self, ppm: &mut u16) -> SendStatus {
        if self.sink.publish(Reading::Co2 { ppm: *ppm }) {
            SendStatus::Sent
        } else {
            SendStatus::Retry
        }
    }
}

fn climate_changed(now: Option<ClimateReading>, sent: Option<ClimateReading>) -> bool {
    match (now, sent) {
        (Some(now), Some(sent)) => {
            now.deci_celsius.abs_diff(sent.deci_celsius) >= TEMPERATURE_HYSTERESIS.unsigned_abs()
                || now.deci_percent.abs_diff(sent.deci_percent) >= HUMIDITY_HYSTERESIS
        }
        (None, None) => false,
        _ => true,
    }
}
