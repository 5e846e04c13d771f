use core::fmt;

/// Errors reported to the configuration / command interface.
///
/// Transient sensor faults are not errors at this level: the readers absorb
/// them and only flag the affected entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PanelError {
    /// Analog channel index outside the channel array
    ChannelOutOfRange,
    /// Relay index outside the relay array
    RelayOutOfRange,
    /// Temperature sensor index outside the sensor array
    SensorOutOfRange,
    /// Command not allowed in the relay's current mode
    NotPermitted,
    /// Calibration table with the wrong number of points or decreasing voltages
    InvalidCalibration,
    /// Stabilization threshold above `MAX_FILTER_LIMIT`
    FilterLimitOutOfRange,
    /// Phase longer than `MAX_PHASE_MS`, or automatic mode with a zero phase duration or no cycles
    InvalidSchedule,
    /// Name or unit longer than its fixed capacity
    NameTooLong,
    /// Integer code that maps to no relay mode or sensor type
    InvalidEncoding,
    /// Relay GPIO write failed
    Output,
}

impl fmt::Display for PanelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            PanelError::ChannelOutOfRange => "analog channel out of range",
            PanelError::RelayOutOfRange => "relay out of range",
            PanelError::SensorOutOfRange => "temperature sensor out of range",
            PanelError::NotPermitted => "command not permitted in the current relay mode",
            PanelError::InvalidCalibration => "calibration needs 2-8 points sorted by voltage",
            PanelError::FilterLimitOutOfRange => "filter limit must be within 0-200",
            PanelError::InvalidSchedule => "on/off times above the maximum, or automatic mode without non-zero times and a cycle",
            PanelError::NameTooLong => "name too long",
            PanelError::InvalidEncoding => "unknown mode or type code",
            PanelError::Output => "relay output write failed",
        };
        f.write_str(msg)
    }
}
