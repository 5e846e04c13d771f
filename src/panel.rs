//! Entity registry shared between the periodic tasks and the interface layer.
//!
//! Every entity lives for the whole program in one of three fixed-size arrays,
//! each behind its own blocking mutex. Lock scopes are short and never span an
//! `.await`: readers perform their hardware I/O first and then lock to apply it.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::Instant;
use heapless::Vec;

use crate::channel::AnalogChannel;
use crate::config::{ChannelConfig, ChannelSettings, PanelConfig, RelayConfig, RelaySettings, SensorConfig};
use crate::error::PanelError;
use crate::relay::{RelayBank, RelayOutputs, RelayStatus};
use crate::snapshot::{ChannelReading, TemperatureReading};
use crate::temperature::{RtdConversion, TemperatureSensor};
use crate::{ANALOG_CHANNELS, MAX_FILTER_LIMIT, RELAY_CHANNELS, TEMP_SENSORS};

pub struct Panel<M: RawMutex, O> {
    channels: Mutex<M, RefCell<[AnalogChannel; ANALOG_CHANNELS]>>,
    relays: Mutex<M, RefCell<RelayBank<O>>>,
    sensors: Mutex<M, RefCell<[TemperatureSensor; TEMP_SENSORS]>>,
    rtd: RtdConversion,
}

impl<M: RawMutex, O: RelayOutputs> Panel<M, O> {
    /// Build every entity from `config`. All relay outputs are driven LOW.
    pub fn new(config: &PanelConfig, outputs: O) -> Self {
        Self {
            channels: Mutex::new(RefCell::new(core::array::from_fn(|i| {
                AnalogChannel::from_config(&config.channels[i])
            }))),
            relays: Mutex::new(RefCell::new(RelayBank::new(&config.relays, outputs))),
            sensors: Mutex::new(RefCell::new(core::array::from_fn(|i| {
                TemperatureSensor::from_config(&config.sensors[i])
            }))),
            rtd: config.rtd,
        }
    }

    /// Current configuration of every entity, in persisted form.
    pub fn config(&self) -> PanelConfig {
        PanelConfig {
            channels: self.with_channels(|channels| core::array::from_fn(|i| channels[i].config())),
            relays: self.with_relays(|bank| core::array::from_fn(|i| bank.relays()[i].config())),
            sensors: self.with_sensors(|sensors| core::array::from_fn(|i| sensors[i].config())),
            rtd: self.rtd,
        }
    }

    pub fn rtd_conversion(&self) -> RtdConversion {
        self.rtd
    }

    pub(crate) fn with_channel<R>(
        &self,
        index: usize,
        f: impl FnOnce(&mut AnalogChannel) -> R,
    ) -> Result<R, PanelError> {
        self.channels.lock(|cell| {
            let mut channels = cell.borrow_mut();
            channels.get_mut(index).map(f).ok_or(PanelError::ChannelOutOfRange)
        })
    }

    pub(crate) fn with_channels<R>(&self, f: impl FnOnce(&[AnalogChannel; ANALOG_CHANNELS]) -> R) -> R {
        self.channels.lock(|cell| f(&cell.borrow()))
    }

    pub(crate) fn with_sensor<R>(
        &self,
        index: usize,
        f: impl FnOnce(&mut TemperatureSensor) -> R,
    ) -> Result<R, PanelError> {
        self.sensors.lock(|cell| {
            let mut sensors = cell.borrow_mut();
            sensors.get_mut(index).map(f).ok_or(PanelError::SensorOutOfRange)
        })
    }

    pub(crate) fn with_sensors<R>(&self, f: impl FnOnce(&[TemperatureSensor; TEMP_SENSORS]) -> R) -> R {
        self.sensors.lock(|cell| f(&cell.borrow()))
    }

    fn with_relays<R>(&self, f: impl FnOnce(&mut RelayBank<O>) -> R) -> R {
        self.relays.lock(|cell| f(&mut cell.borrow_mut()))
    }

    // Analog channels

    pub fn read_channel(&self, index: usize) -> Result<ChannelReading, PanelError> {
        self.with_channel(index, |ch| ch.reading(index))
    }

    pub fn channel_config(&self, index: usize) -> Result<ChannelConfig, PanelError> {
        self.with_channel(index, |ch| ch.config())
    }

    pub fn channel_configs(&self) -> [ChannelConfig; ANALOG_CHANNELS] {
        self.with_channels(|channels| core::array::from_fn(|i| channels[i].config()))
    }

    pub fn set_channel_config(&self, index: usize, settings: ChannelSettings) -> Result<(), PanelError> {
        settings.validate()?;
        self.with_channel(index, |ch| ch.apply(settings))?;
        info!("channel {}: configuration updated", index);
        Ok(())
    }

    pub fn set_filter_limit(&self, index: usize, limit: u16) -> Result<(), PanelError> {
        if limit > MAX_FILTER_LIMIT {
            return Err(PanelError::FilterLimitOutOfRange);
        }
        self.with_channel(index, |ch| ch.filter_limit = limit)?;
        info!("channel {}: filter limit {}", index, limit);
        Ok(())
    }

    // Relays

    pub fn relay_status(&self, index: usize) -> Result<RelayStatus, PanelError> {
        self.with_relays(|bank| bank.get(index).map(|r| r.status()))
    }

    pub fn relay_statuses(&self) -> Vec<RelayStatus, RELAY_CHANNELS> {
        self.with_relays(|bank| bank.relays().iter().map(|r| r.status()).collect())
    }

    pub fn relay_config(&self, index: usize) -> Result<RelayConfig, PanelError> {
        self.with_relays(|bank| bank.get(index).map(|r| r.config()))
    }

    /// Replace a relay's name, mode and schedule. Running automation halts.
    pub fn set_relay_config(&self, index: usize, settings: RelaySettings) -> Result<(), PanelError> {
        self.with_relays(|bank| bank.apply(index, settings))
    }

    /// Manual output command; `NotPermitted` while automation runs.
    pub fn set_relay_output(&self, index: usize, state: bool) -> Result<(), PanelError> {
        self.with_relays(|bank| bank.set_output(index, state))
    }

    /// Start or stop automation; `NotPermitted` for a manual relay.
    pub fn set_relay_running(&self, index: usize, running: bool, now: Instant) -> Result<(), PanelError> {
        self.with_relays(|bank| bank.set_running(index, running, now))
    }

    /// Advance every relay's automation to `now`.
    pub fn tick_relays(&self, now: Instant) {
        self.with_relays(|bank| bank.poll(now))
    }

    // Temperature sensors

    pub fn read_temperature(&self, index: usize) -> Result<TemperatureReading, PanelError> {
        self.with_sensor(index, |s| s.reading())
    }

    pub fn sensor_config(&self, index: usize) -> Result<SensorConfig, PanelError> {
        self.with_sensor(index, |s| s.config())
    }

    pub fn sensor_configs(&self) -> [SensorConfig; TEMP_SENSORS] {
        self.with_sensors(|sensors| core::array::from_fn(|i| sensors[i].config()))
    }

    pub fn set_sensor_config(&self, index: usize, config: SensorConfig) -> Result<(), PanelError> {
        self.with_sensor(index, |s| s.apply(config))?;
        info!("RTD {}: configuration updated", index);
        Ok(())
    }
}
