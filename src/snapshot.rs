//! Point-in-time view of the panel, published for the transport layer.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::signal::Signal;
use heapless::Vec;
use portable_atomic::{AtomicU32, Ordering};
use serde::Serialize;

use crate::panel::Panel;
use crate::relay::RelayOutputs;
use crate::temperature::RtdKind;
use crate::{Name, Unit, ANALOG_CHANNELS, TEMP_SENSORS};

/// Analog channel entry of a snapshot.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelReading {
    pub channel: u8,
    pub name: Name,
    pub value: f32,
    pub unit: Unit,
    /// Latest raw sample in volts
    pub raw_voltage: f32,
    /// Accepted (stabilized) sample in volts
    pub voltage: f32,
    pub raw_value: u16,
    pub difference: u16,
}

/// Temperature entry of a snapshot.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TemperatureReading {
    pub name: Name,
    pub value: f32,
    pub resistance: f32,
    #[serde(rename = "type")]
    pub kind: RtdKind,
    pub fault: bool,
    pub enabled: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub seq: u32,
    /// Enabled analog channels only
    pub values: Vec<ChannelReading, ANALOG_CHANNELS>,
    pub temperatures: Vec<TemperatureReading, TEMP_SENSORS>,
}

impl Snapshot {
    /// Copy the current state out of the panel. Each entity array is read
    /// under its own lock; nothing is modified.
    pub fn capture<M: RawMutex, O: RelayOutputs>(panel: &Panel<M, O>, seq: u32) -> Self {
        let values = panel.with_channels(|channels| {
            channels
                .iter()
                .enumerate()
                .filter(|(_, ch)| ch.enabled)
                .map(|(i, ch)| ch.reading(i))
                .collect()
        });
        let temperatures = panel.with_sensors(|sensors| sensors.iter().map(|s| s.reading()).collect());
        Self { seq, values, temperatures }
    }
}

/// Publishes the latest snapshot to a single consumer. A newer snapshot
/// replaces one that was not taken yet.
pub struct SnapshotBroadcaster<M: RawMutex> {
    latest: Signal<M, Snapshot>,
    seq: AtomicU32,
}

impl<M: RawMutex> SnapshotBroadcaster<M> {
    pub const fn new() -> Self {
        Self {
            latest: Signal::new(),
            seq: AtomicU32::new(0),
        }
    }

    /// Capture and publish. Returns the sequence number of the new snapshot.
    pub fn publish<PM: RawMutex, O: RelayOutputs>(&self, panel: &Panel<PM, O>) -> u32 {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        self.latest.signal(Snapshot::capture(panel, seq));
        trace!("snapshot {} published", seq);
        seq
    }

    /// Wait for the next snapshot.
    pub async fn wait(&self) -> Snapshot {
        self.latest.wait().await
    }

    /// Take the pending snapshot, if any.
    pub fn try_take(&self) -> Option<Snapshot> {
        self.latest.try_take()
    }
}

impl<M: RawMutex> Default for SnapshotBroadcaster<M> {
    fn default() -> Self {
        Self::new()
    }
}
