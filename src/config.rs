//! Configuration records exchanged with the interface / persistence layer.
//!
//! The persisted records (`*Config`) carry every field of an entity's
//! configuration including its wiring (GPIO, chip select). The command records
//! (`*Settings`) carry only what a user may change at runtime.

use core::fmt::Write;

use embassy_time::Duration;
use serde::{Deserialize, Serialize};

use crate::calibration::{CalibrationPoint, CalibrationTable};
use crate::error::PanelError;
use crate::relay::{DutyCycle, RelayMode};
use crate::temperature::{RtdConversion, RtdKind};
use crate::{
    Name, Unit, ANALOG_CHANNELS, DEFAULT_FILTER_LIMIT, MAX_CALIBRATION_POINTS, MAX_FILTER_LIMIT, MAX_PHASE_MS,
    MIN_CALIBRATION_POINTS, RELAY_CHANNELS, TEMP_SENSORS,
};

const RELAY_GPIOS: [u8; RELAY_CHANNELS] = [21, 45, 47, 48];
const RTD_CS_PINS: [u8; TEMP_SENSORS] = [10, 39];

fn numbered(prefix: &str, index: usize) -> Name {
    let mut name = Name::new();
    // "<prefix> NN" always fits NAME_LEN for the prefixes used here
    let _ = write!(name, "{} {}", prefix, index + 1);
    name
}

fn check_calibration(table: &CalibrationTable) -> Result<(), PanelError> {
    if (MIN_CALIBRATION_POINTS..=MAX_CALIBRATION_POINTS).contains(&table.len()) {
        Ok(())
    } else {
        Err(PanelError::InvalidCalibration)
    }
}

fn check_filter_limit(limit: u16) -> Result<(), PanelError> {
    if limit <= MAX_FILTER_LIMIT {
        Ok(())
    } else {
        Err(PanelError::FilterLimitOutOfRange)
    }
}

/// Persisted configuration of one analog channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    pub enabled: bool,
    pub name: Name,
    pub unit: Unit,
    pub gpio: u8,
    pub filter_limit: u16,
    #[serde(default)]
    pub compensation: f32,
    pub calib_points: CalibrationTable,
}

impl ChannelConfig {
    /// Factory defaults: disabled, identity 0-3 V calibration, GPIO 1-8 then 15-18.
    pub fn default_for(index: usize) -> Self {
        let gpio = if index < 8 { index + 1 } else { index + 7 };
        Self {
            enabled: false,
            name: numbered("Sensor", index),
            unit: Unit::try_from("unit").unwrap_or_default(),
            gpio: gpio as u8,
            filter_limit: DEFAULT_FILTER_LIMIT,
            compensation: 0.0,
            calib_points: CalibrationTable::new(&[CalibrationPoint::new(0.0, 0.0), CalibrationPoint::new(3.0, 3.0)])
                .unwrap_or_default(),
        }
    }

    pub fn validate(&self) -> Result<(), PanelError> {
        check_filter_limit(self.filter_limit)?;
        check_calibration(&self.calib_points)
    }
}

/// Runtime update of an analog channel (everything but its wiring).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSettings {
    pub enabled: bool,
    pub name: Name,
    pub unit: Unit,
    pub filter_limit: u16,
    #[serde(default)]
    pub compensation: f32,
    pub calib_points: CalibrationTable,
}

impl ChannelSettings {
    pub fn validate(&self) -> Result<(), PanelError> {
        check_filter_limit(self.filter_limit)?;
        check_calibration(&self.calib_points)
    }
}

impl From<ChannelConfig> for ChannelSettings {
    fn from(config: ChannelConfig) -> Self {
        Self {
            enabled: config.enabled,
            name: config.name,
            unit: config.unit,
            filter_limit: config.filter_limit,
            compensation: config.compensation,
            calib_points: config.calib_points,
        }
    }
}

/// Persisted configuration of one relay. Times are in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    pub name: Name,
    pub gpio: u8,
    pub mode: RelayMode,
    pub on_time: u64,
    pub off_time: u64,
    pub max_cycles: u32,
}

impl RelayConfig {
    pub fn default_for(index: usize) -> Self {
        Self {
            name: numbered("Relay", index),
            gpio: RELAY_GPIOS.get(index).copied().unwrap_or_default(),
            mode: RelayMode::Manual,
            on_time: 1000,
            off_time: 1000,
            max_cycles: 1,
        }
    }

    pub fn settings(&self) -> RelaySettings {
        RelaySettings {
            name: self.name.clone(),
            mode: self.mode,
            on_time: self.on_time,
            off_time: self.off_time,
            max_cycles: self.max_cycles,
        }
    }

    pub fn validate(&self) -> Result<(), PanelError> {
        self.settings().validate()
    }
}

/// Runtime update of a relay. Times are in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelaySettings {
    pub name: Name,
    pub mode: RelayMode,
    #[serde(default)]
    pub on_time: u64,
    #[serde(default)]
    pub off_time: u64,
    #[serde(default)]
    pub max_cycles: u32,
}

impl RelaySettings {
    /// Phase durations are capped at `MAX_PHASE_MS`.
    pub fn schedule(&self) -> DutyCycle {
        DutyCycle {
            on_time: Duration::from_millis(self.on_time.min(MAX_PHASE_MS)),
            off_time: Duration::from_millis(self.off_time.min(MAX_PHASE_MS)),
            max_cycles: self.max_cycles,
        }
    }

    /// Phases longer than `MAX_PHASE_MS` are rejected in either mode. Beyond that,
    /// manual relays accept any timing (it is stored but unused); automatic relays
    /// need non-zero phases and at least one cycle.
    pub fn validate(&self) -> Result<(), PanelError> {
        if self.on_time > MAX_PHASE_MS || self.off_time > MAX_PHASE_MS {
            return Err(PanelError::InvalidSchedule);
        }
        match self.mode {
            RelayMode::Manual => Ok(()),
            RelayMode::Automatic => self.schedule().validate(),
        }
    }
}

/// Persisted configuration of one RTD input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorConfig {
    pub enabled: bool,
    pub name: Name,
    #[serde(rename = "type")]
    pub kind: RtdKind,
    pub cs_pin: u8,
}

impl SensorConfig {
    pub fn default_for(index: usize) -> Self {
        Self {
            enabled: false,
            name: numbered("Temperature", index),
            kind: RtdKind::Pt100,
            cs_pin: RTD_CS_PINS.get(index).copied().unwrap_or_default(),
        }
    }
}

/// Everything the panel needs at boot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PanelConfig {
    pub channels: [ChannelConfig; ANALOG_CHANNELS],
    pub relays: [RelayConfig; RELAY_CHANNELS],
    pub sensors: [SensorConfig; TEMP_SENSORS],
    #[serde(default)]
    pub rtd: RtdConversion,
}

impl PanelConfig {
    /// Check every record. Loaders fall back to `PanelConfig::default()` when this fails.
    pub fn validate(&self) -> Result<(), PanelError> {
        for channel in &self.channels {
            channel.validate()?;
        }
        for relay in &self.relays {
            relay.validate()?;
        }
        Ok(())
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            channels: core::array::from_fn(ChannelConfig::default_for),
            relays: core::array::from_fn(RelayConfig::default_for),
            sensors: core::array::from_fn(SensorConfig::default_for),
            rtd: RtdConversion::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded;

    #[test]
    fn test_defaults_follow_board_wiring() {
        let config = PanelConfig::default();
        let gpios: std::vec::Vec<u8> = config.channels.iter().map(|c| c.gpio).collect();
        assert_eq!(gpios, [1, 2, 3, 4, 5, 6, 7, 8, 15, 16, 17, 18]);
        assert_eq!(config.relays[3].gpio, 48);
        assert_eq!(config.sensors[1].cs_pin, 39);
        assert_eq!(config.channels[11].name.as_str(), "Sensor 12");
        assert_eq!(config.channels[0].filter_limit, DEFAULT_FILTER_LIMIT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_channel_config_round_trips_through_json() {
        let config = ChannelConfig {
            enabled: true,
            name: bounded("Tank level").unwrap(),
            unit: bounded("cm").unwrap(),
            gpio: 4,
            filter_limit: 35,
            compensation: -1.25,
            calib_points: CalibrationTable::new(&[
                CalibrationPoint::new(0.2, 0.0),
                CalibrationPoint::new(1.4, 60.5),
                CalibrationPoint::new(2.8, 100.0),
            ])
            .unwrap(),
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"filterLimit\":35"));
        assert!(json.contains("\"calibPoints\""));
        let back: ChannelConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_panel_config_round_trips_through_json() {
        let mut config = PanelConfig::default();
        config.relays[1].mode = RelayMode::Automatic;
        config.relays[1].max_cycles = 7;
        config.sensors[0].kind = RtdKind::Pt1000;
        config.sensors[0].enabled = true;
        let json = serde_json::to_string(&config).unwrap();
        let back: PanelConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_modes_and_types_encode_as_integers() {
        let relay = RelayConfig::default_for(0);
        let json = serde_json::to_value(&relay).unwrap();
        assert_eq!(json["mode"], 0);
        assert_eq!(json["onTime"], 1000);

        let sensor = SensorConfig { kind: RtdKind::Pt1000, ..SensorConfig::default_for(0) };
        let json = serde_json::to_value(&sensor).unwrap();
        assert_eq!(json["type"], 1);
        assert_eq!(json["csPin"], 10);

        assert!(serde_json::from_str::<RelayMode>("2").is_err());
    }

    #[test]
    fn test_channel_settings_validation() {
        let mut settings = ChannelSettings::from(ChannelConfig::default_for(0));
        assert!(settings.validate().is_ok());

        settings.filter_limit = MAX_FILTER_LIMIT + 1;
        assert_eq!(settings.validate(), Err(PanelError::FilterLimitOutOfRange));

        settings.filter_limit = MAX_FILTER_LIMIT;
        settings.calib_points = CalibrationTable::new(&[CalibrationPoint::new(1.0, 1.0)]).unwrap();
        assert_eq!(settings.validate(), Err(PanelError::InvalidCalibration));
    }

    #[test]
    fn test_relay_settings_validation() {
        let mut settings = RelayConfig::default_for(0).settings();
        settings.on_time = 0;
        assert!(settings.validate().is_ok());

        settings.mode = RelayMode::Automatic;
        assert_eq!(settings.validate(), Err(PanelError::InvalidSchedule));

        settings.on_time = 1000;
        settings.max_cycles = 0;
        assert_eq!(settings.validate(), Err(PanelError::InvalidSchedule));

        settings.max_cycles = 3;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_phase_length_is_bounded_in_both_modes() {
        for mode in [RelayMode::Manual, RelayMode::Automatic] {
            let mut settings = RelayConfig::default_for(0).settings();
            settings.mode = mode;
            settings.on_time = MAX_PHASE_MS;
            settings.off_time = MAX_PHASE_MS;
            assert!(settings.validate().is_ok());

            settings.on_time = MAX_PHASE_MS + 1;
            assert_eq!(settings.validate(), Err(PanelError::InvalidSchedule));

            settings.on_time = 1000;
            settings.off_time = u64::MAX;
            assert_eq!(settings.validate(), Err(PanelError::InvalidSchedule));
            assert_eq!(settings.schedule().off_time, Duration::from_millis(MAX_PHASE_MS));
        }
    }

    #[test]
    fn test_panel_config_rejects_oversized_relay_times() {
        let mut config = PanelConfig::default();
        config.relays[2].on_time = u64::MAX;
        assert_eq!(config.validate(), Err(PanelError::InvalidSchedule));
    }
}
