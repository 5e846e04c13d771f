#![cfg_attr(not(test), no_std)]

// Must come first so the logging macros are visible to every module
#[macro_use]
mod fmt;

pub mod calibration;
pub mod channel;
pub mod config;
pub mod error;
pub mod max31865;
pub mod panel;
pub mod relay;
pub mod snapshot;
pub mod temperature;

pub use calibration::{CalibrationPoint, CalibrationTable};
pub use channel::{AdcError, AnalogChannel, AnalogSource, ChannelSampler};
pub use config::{ChannelConfig, ChannelSettings, PanelConfig, RelayConfig, RelaySettings, SensorConfig};
pub use error::PanelError;
pub use panel::Panel;
pub use relay::{AutomationState, DutyCycle, PinBank, RelayChannel, RelayMode, RelayOutputs, RelayStatus};
pub use snapshot::{ChannelReading, Snapshot, SnapshotBroadcaster, TemperatureReading};
pub use temperature::{RtdConversion, RtdError, RtdFrontEnd, RtdKind, TemperatureReader, TemperatureSensor};

pub const ANALOG_CHANNELS: usize = 12; // Analog inputs on the panel
pub const RELAY_CHANNELS: usize = 4; // Relay outputs on the panel
pub const TEMP_SENSORS: usize = 2; // RTD inputs (one MAX31865 each)

pub const MIN_CALIBRATION_POINTS: usize = 2; // Fewer points than this maps everything to 0.0
pub const MAX_CALIBRATION_POINTS: usize = 8;
pub const SAMPLE_WINDOW: usize = 5; // Raw samples per stabilization window
pub const MAX_FILTER_LIMIT: u16 = 200; // Upper bound for the stabilization threshold (ADC counts)
pub const DEFAULT_FILTER_LIMIT: u16 = 20;

pub const ADC_VREF: f32 = 3.3; // Nominal ADC reference (volts)
pub const ADC_FULL_SCALE: f32 = 4095.0; // 12-bit converter
pub const MAX_INPUT_VOLTAGE: f32 = 3.0; // Readings above this sit in the ADC dead zone

pub const SAMPLE_INTERVAL_MS: u64 = 200; // One raw sample per channel; a full window per second
pub const TEMP_CHECK_INTERVAL_MS: u64 = 1000; // RTD read cadence
pub const RELAY_TICK_MS: u64 = 50; // Automation poll cadence, bounds phase timing jitter
pub const BROADCAST_INTERVAL_MS: u64 = 1000; // Snapshot publish cadence
pub const MAX_PHASE_MS: u64 = 86_400_000; // Longest relay ON/OFF phase (one day)

pub const NAME_LEN: usize = 32;
pub const UNIT_LEN: usize = 16;

/// Display name of a channel, relay or sensor.
pub type Name = heapless::String<NAME_LEN>;
/// Engineering unit shown next to an analog value.
pub type Unit = heapless::String<UNIT_LEN>;

/// Copy `text` into a fixed-capacity string, failing if it does not fit.
pub fn bounded<const N: usize>(text: &str) -> Result<heapless::String<N>, PanelError> {
    heapless::String::try_from(text).map_err(|_| PanelError::NameTooLong)
}
