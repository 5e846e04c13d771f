//! Piecewise-linear voltage to physical value mapping.

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::error::PanelError;
use crate::MAX_CALIBRATION_POINTS;

/// One anchor of the transfer curve.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub voltage: f32,
    pub physical: f32,
}

impl CalibrationPoint {
    pub const fn new(voltage: f32, physical: f32) -> Self {
        Self { voltage, physical }
    }
}

/// Ordered calibration table (at most `MAX_CALIBRATION_POINTS`, voltages non-decreasing).
///
/// The table never sorts on its own: whoever builds it hands the points over in
/// order, and anything out of order is rejected. A table with fewer than two
/// points is representable (an unconfigured channel) and maps every voltage to 0.0.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "Vec<CalibrationPoint, MAX_CALIBRATION_POINTS>",
    into = "Vec<CalibrationPoint, MAX_CALIBRATION_POINTS>"
)]
pub struct CalibrationTable {
    points: Vec<CalibrationPoint, MAX_CALIBRATION_POINTS>,
}

impl CalibrationTable {
    pub const fn empty() -> Self {
        Self { points: Vec::new() }
    }

    pub fn new(points: &[CalibrationPoint]) -> Result<Self, PanelError> {
        let points = Vec::from_slice(points).map_err(|_| PanelError::InvalidCalibration)?;
        Self::try_from(points)
    }

    pub fn points(&self) -> &[CalibrationPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Convert a voltage to the physical quantity.
    ///
    /// Voltages outside the table are held at the first / last point's value
    /// (flat extrapolation). Inside, the value is interpolated linearly on the
    /// bracketing segment.
    pub fn map(&self, voltage: f32) -> f32 {
        let (first, last) = match self.points.as_slice() {
            [first, .., last] => (first, last),
            _ => return 0.0,
        };

        if voltage <= first.voltage {
            return first.physical;
        }
        if voltage >= last.voltage {
            return last.physical;
        }

        for pair in self.points.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if voltage >= lo.voltage && voltage <= hi.voltage {
                let span = hi.voltage - lo.voltage;
                if span <= 0.0 {
                    return lo.physical;
                }
                let ratio = (voltage - lo.voltage) / span;
                return lo.physical + ratio * (hi.physical - lo.physical);
            }
        }
        0.0
    }
}

impl TryFrom<Vec<CalibrationPoint, MAX_CALIBRATION_POINTS>> for CalibrationTable {
    type Error = PanelError;

    fn try_from(points: Vec<CalibrationPoint, MAX_CALIBRATION_POINTS>) -> Result<Self, Self::Error> {
        let sorted = points.windows(2).all(|pair| pair[0].voltage <= pair[1].voltage);
        let finite = points.iter().all(|p| p.voltage.is_finite() && p.physical.is_finite());
        if !sorted || !finite {
            return Err(PanelError::InvalidCalibration);
        }
        Ok(Self { points })
    }
}

impl From<CalibrationTable> for Vec<CalibrationPoint, MAX_CALIBRATION_POINTS> {
    fn from(table: CalibrationTable) -> Self {
        table.points
    }
}
