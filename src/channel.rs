//! Analog channel sampling and stabilization.

use core::future::Future;

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::calibration::CalibrationTable;
use crate::config::{ChannelConfig, ChannelSettings};
use crate::error::PanelError;
use crate::panel::Panel;
use crate::relay::RelayOutputs;
use crate::snapshot::ChannelReading;
use crate::{Name, Unit, ADC_FULL_SCALE, ADC_VREF, ANALOG_CHANNELS, MAX_INPUT_VOLTAGE, SAMPLE_WINDOW};

/// Error type for ADC reads
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdcError {
    /// No ADC input is wired to the requested GPIO
    Unmapped,
    /// Conversion failed
    ReadFailed,
}

/// Port for raw ADC conversions, addressed by GPIO number.
pub trait AnalogSource {
    fn read(&mut self, gpio: u8) -> impl Future<Output = Result<u16, AdcError>>;
}

/// Convert raw ADC counts to volts, capped at `MAX_INPUT_VOLTAGE`.
#[inline]
pub fn adc_to_voltage(raw: u16) -> f32 {
    (raw as f32 * ADC_VREF / ADC_FULL_SCALE).min(MAX_INPUT_VOLTAGE)
}

/// Fixed-capacity window of raw samples, yielding the median once full.
#[derive(Clone, Debug, Default)]
pub struct SampleWindow {
    buffer: [u16; SAMPLE_WINDOW],
    count: usize,
}

impl SampleWindow {
    /// Add a sample. Returns the window median when this sample completes the window,
    /// and starts a new window.
    pub fn push(&mut self, raw: u16) -> Option<u16> {
        self.buffer[self.count] = raw;
        self.count += 1;
        if self.count < SAMPLE_WINDOW {
            return None;
        }
        self.count = 0;
        let mut sorted = self.buffer;
        sorted.sort_unstable();
        Some(sorted[SAMPLE_WINDOW / 2])
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn clear(&mut self) {
        self.count = 0;
    }
}

/// One analog input: its configuration and the live sampling state.
#[derive(Clone, Debug)]
pub struct AnalogChannel {
    pub enabled: bool,
    pub name: Name,
    pub unit: Unit,
    pub gpio: u8,
    pub calibration: CalibrationTable,
    pub filter_limit: u16,
    pub compensation: f32,
    window: SampleWindow,
    last_raw: u16,
    // None until the first window completes
    last_accepted: Option<u16>,
    value: f32,
    difference: u16,
}

impl AnalogChannel {
    pub fn from_config(config: &ChannelConfig) -> Self {
        let mut channel = Self {
            enabled: config.enabled,
            name: config.name.clone(),
            unit: config.unit.clone(),
            gpio: config.gpio,
            calibration: config.calib_points.clone(),
            filter_limit: config.filter_limit,
            compensation: config.compensation,
            window: SampleWindow::default(),
            last_raw: 0,
            last_accepted: None,
            value: 0.0,
            difference: 0,
        };
        channel.value = channel.convert(0);
        channel
    }

    pub fn config(&self) -> ChannelConfig {
        ChannelConfig {
            enabled: self.enabled,
            name: self.name.clone(),
            unit: self.unit.clone(),
            gpio: self.gpio,
            filter_limit: self.filter_limit,
            compensation: self.compensation,
            calib_points: self.calibration.clone(),
        }
    }

    /// Replace the user-settable part of the configuration.
    ///
    /// The partially filled window is dropped; the last accepted value is kept and
    /// re-converted through the new calibration.
    pub fn apply(&mut self, settings: ChannelSettings) {
        self.enabled = settings.enabled;
        self.name = settings.name;
        self.unit = settings.unit;
        self.filter_limit = settings.filter_limit;
        self.compensation = settings.compensation;
        self.calibration = settings.calib_points;
        self.window.clear();
        self.value = self.convert(self.last_accepted.unwrap_or(0));
    }

    /// Feed one raw ADC sample.
    ///
    /// Every `SAMPLE_WINDOW` samples the window median becomes the candidate. The
    /// candidate replaces the accepted value only when it differs from it by more
    /// than `filter_limit`. The first completed window has nothing to compare
    /// against and is always accepted, even when it is within `filter_limit` of
    /// zero. Returns true when a new value was accepted.
    pub fn ingest(&mut self, raw: u16) -> bool {
        if !self.enabled {
            return false;
        }
        self.last_raw = raw;
        let candidate = match self.window.push(raw) {
            Some(candidate) => candidate,
            None => return false,
        };

        if let Some(previous) = self.last_accepted {
            let difference = candidate.abs_diff(previous);
            if difference <= self.filter_limit {
                return false;
            }
            self.difference = difference;
        }
        self.last_accepted = Some(candidate);
        self.value = self.convert(candidate);
        debug!("channel {} accepted raw={} value={}", self.gpio, candidate, self.value);
        true
    }

    fn convert(&self, raw: u16) -> f32 {
        let voltage = adc_to_voltage(raw).clamp(0.0, MAX_INPUT_VOLTAGE);
        self.calibration.map(voltage) + self.compensation
    }

    /// Current calibrated value (compensation included).
    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn last_raw(&self) -> u16 {
        self.last_raw
    }

    pub fn last_accepted(&self) -> Option<u16> {
        self.last_accepted
    }

    pub fn difference(&self) -> u16 {
        self.difference
    }

    pub fn reading(&self, index: usize) -> ChannelReading {
        ChannelReading {
            channel: index as u8,
            name: self.name.clone(),
            value: self.value,
            unit: self.unit.clone(),
            raw_voltage: adc_to_voltage(self.last_raw),
            voltage: adc_to_voltage(self.last_accepted.unwrap_or(0)),
            raw_value: self.last_raw,
            difference: self.difference,
        }
    }
}

/// Periodic sampler: one raw conversion per enabled channel per tick.
pub struct ChannelSampler<A> {
    adc: A,
}

impl<A: AnalogSource> ChannelSampler<A> {
    pub fn new(adc: A) -> Self {
        Self { adc }
    }

    /// Sample every enabled channel once.
    pub async fn tick<M: RawMutex, O: RelayOutputs>(&mut self, panel: &Panel<M, O>) {
        for index in 0..ANALOG_CHANNELS {
            // Index is always in range here
            let _ = self.tick_channel(panel, index).await;
        }
    }

    /// Sample one channel. Disabled channels are skipped without touching their state.
    ///
    /// The conversion runs outside the channel lock; the result is applied under it.
    pub async fn tick_channel<M: RawMutex, O: RelayOutputs>(
        &mut self,
        panel: &Panel<M, O>,
        index: usize,
    ) -> Result<bool, PanelError> {
        let gpio = match panel.with_channel(index, |ch| ch.enabled.then_some(ch.gpio))? {
            Some(gpio) => gpio,
            None => return Ok(false),
        };

        let raw = match self.adc.read(gpio).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("ADC read on GPIO{} failed: {}", gpio, e);
                return Ok(false);
            }
        };

        panel.with_channel(index, |ch| ch.ingest(raw))
    }

    pub fn into_inner(self) -> A {
        self.adc
    }
}
