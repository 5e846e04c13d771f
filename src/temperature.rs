//! RTD temperature inputs: fault handling and resistance to temperature conversion.

use core::future::Future;

use embassy_sync::blocking_mutex::raw::RawMutex;
use serde::{Deserialize, Serialize};

use crate::config::SensorConfig;
use crate::error::PanelError;
use crate::panel::Panel;
use crate::relay::RelayOutputs;
use crate::snapshot::TemperatureReading;
use crate::{Name, TEMP_SENSORS};

/// RTD element type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(into = "u8", try_from = "u8")]
pub enum RtdKind {
    #[default]
    Pt100 = 0,
    Pt1000 = 1,
}

impl RtdKind {
    /// Nominal resistance at 0 °C. Informational only: the conversion uses
    /// `RtdConversion::r0` for both element types.
    pub const fn nominal_ohms(&self) -> f32 {
        match self {
            RtdKind::Pt100 => 100.0,
            RtdKind::Pt1000 => 1000.0,
        }
    }
}

impl From<RtdKind> for u8 {
    fn from(kind: RtdKind) -> Self {
        kind as u8
    }
}

impl TryFrom<u8> for RtdKind {
    type Error = PanelError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RtdKind::Pt100),
            1 => Ok(RtdKind::Pt1000),
            _ => Err(PanelError::InvalidEncoding),
        }
    }
}

/// Device-wide RTD conversion constants.
///
/// `temp = (R / r0 - 1) / alpha`, with `R = raw / 2^15 * reference_ohms`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtdConversion {
    /// Reference resistor on the converter board, calibrated per device
    pub reference_ohms: f32,
    pub r0: f32,
    pub alpha: f32,
}

impl RtdConversion {
    pub const DEFAULT: Self = Self {
        reference_ohms: 439.78,
        r0: 100.0,
        alpha: 0.00385,
    };

    const RAW_FULL_SCALE: f32 = 32768.0; // 15-bit RTD ratio

    /// Measured resistance for a raw 15-bit RTD ratio.
    pub fn resistance(&self, raw: u16) -> f32 {
        raw as f32 / Self::RAW_FULL_SCALE * self.reference_ohms
    }

    /// Linear RTD approximation.
    pub fn temperature(&self, ohms: f32) -> f32 {
        (ohms / self.r0 - 1.0) / self.alpha
    }
}

impl Default for RtdConversion {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Error type for RTD front-end operations
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RtdError {
    /// Bus transaction with the converter failed
    Bus,
}

/// Port for one RTD-to-digital converter.
pub trait RtdFrontEnd {
    /// Fault status register; zero means no fault.
    fn read_fault(&mut self) -> impl Future<Output = Result<u8, RtdError>>;

    fn clear_fault(&mut self) -> impl Future<Output = Result<(), RtdError>>;

    /// Raw 15-bit resistance ratio.
    fn read_rtd(&mut self) -> impl Future<Output = Result<u16, RtdError>>;
}

/// One RTD input.
#[derive(Clone, Debug)]
pub struct TemperatureSensor {
    pub enabled: bool,
    pub name: Name,
    pub kind: RtdKind,
    pub cs_pin: u8,
    last_temp: f32,
    last_resistance: f32,
    fault: bool,
}

impl TemperatureSensor {
    pub fn from_config(config: &SensorConfig) -> Self {
        Self {
            enabled: config.enabled,
            name: config.name.clone(),
            kind: config.kind,
            cs_pin: config.cs_pin,
            last_temp: 0.0,
            last_resistance: 0.0,
            fault: false,
        }
    }

    pub fn config(&self) -> SensorConfig {
        SensorConfig {
            enabled: self.enabled,
            name: self.name.clone(),
            kind: self.kind,
            cs_pin: self.cs_pin,
        }
    }

    pub fn apply(&mut self, config: SensorConfig) {
        self.enabled = config.enabled;
        self.name = config.name;
        self.kind = config.kind;
        self.cs_pin = config.cs_pin;
    }

    /// Mark the current read cycle as faulted. The last temperature is kept.
    pub fn record_fault(&mut self) {
        self.fault = true;
    }

    /// Store a good reading.
    pub fn record(&mut self, raw: u16, conversion: &RtdConversion) {
        self.last_resistance = conversion.resistance(raw);
        self.last_temp = conversion.temperature(self.last_resistance);
        self.fault = false;
    }

    pub fn last_temp(&self) -> f32 {
        self.last_temp
    }

    pub fn last_resistance(&self) -> f32 {
        self.last_resistance
    }

    pub fn fault(&self) -> bool {
        self.fault
    }

    pub fn reading(&self) -> TemperatureReading {
        TemperatureReading {
            name: self.name.clone(),
            value: self.last_temp,
            resistance: self.last_resistance,
            kind: self.kind,
            fault: self.fault,
            enabled: self.enabled,
        }
    }
}

/// Periodic RTD reader, one front end per sensor slot.
pub struct TemperatureReader<F> {
    front_ends: [F; TEMP_SENSORS],
}

impl<F: RtdFrontEnd> TemperatureReader<F> {
    pub fn new(front_ends: [F; TEMP_SENSORS]) -> Self {
        Self { front_ends }
    }

    pub async fn tick<M: RawMutex, O: RelayOutputs>(&mut self, panel: &Panel<M, O>) {
        for index in 0..TEMP_SENSORS {
            let _ = self.tick_sensor(panel, index).await;
        }
    }

    /// Read one sensor.
    ///
    /// A reported fault is cleared on the converter and the reading skipped;
    /// the stored temperature stays as it was. Returns whether a new
    /// temperature was stored.
    pub async fn tick_sensor<M: RawMutex, O: RelayOutputs>(
        &mut self,
        panel: &Panel<M, O>,
        index: usize,
    ) -> Result<bool, PanelError> {
        if !panel.with_sensor(index, |s| s.enabled)? {
            return Ok(false);
        }
        let front_end = &mut self.front_ends[index];

        let raw = match front_end.read_fault().await {
            Ok(0) => front_end.read_rtd().await,
            Ok(code) => {
                warn!("RTD {} fault {}, clearing", index, code);
                if let Err(e) = front_end.clear_fault().await {
                    warn!("RTD {} fault clear failed: {}", index, e);
                }
                panel.with_sensor(index, |s| s.record_fault())?;
                return Ok(false);
            }
            Err(e) => Err(e),
        };

        match raw {
            Ok(raw) => {
                let conversion = panel.rtd_conversion();
                panel.with_sensor(index, |s| {
                    s.record(raw, &conversion);
                    debug!("RTD {}: {} ohm, {} C", index, s.last_resistance(), s.last_temp());
                })?;
                Ok(true)
            }
            Err(e) => {
                warn!("RTD {} read failed: {}", index, e);
                panel.with_sensor(index, |s| s.record_fault())?;
                Ok(false)
            }
        }
    }

    pub fn front_end(&mut self, index: usize) -> Option<&mut F> {
        self.front_ends.get_mut(index)
    }
}
