//! Relay outputs and the timed automatic duty-cycle state machine.

use embassy_time::{Duration, Instant};
use embedded_hal::digital::OutputPin;
use serde::{Deserialize, Serialize};

use crate::config::{RelayConfig, RelaySettings};
use crate::error::PanelError;
use crate::{Name, RELAY_CHANNELS};

/// Relay operating mode as configured by the user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(into = "u8", try_from = "u8")]
pub enum RelayMode {
    #[default]
    Manual = 0,
    Automatic = 1,
}

impl From<RelayMode> for u8 {
    fn from(mode: RelayMode) -> Self {
        mode as u8
    }
}

impl TryFrom<u8> for RelayMode {
    type Error = PanelError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RelayMode::Manual),
            1 => Ok(RelayMode::Automatic),
            _ => Err(PanelError::InvalidEncoding),
        }
    }
}

/// Timing of the automatic duty cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DutyCycle {
    pub on_time: Duration,
    pub off_time: Duration,
    /// Completed ON phases after which automation stops
    pub max_cycles: u32,
}

impl DutyCycle {
    pub fn validate(&self) -> Result<(), PanelError> {
        if self.on_time.as_ticks() == 0 || self.off_time.as_ticks() == 0 || self.max_cycles == 0 {
            return Err(PanelError::InvalidSchedule);
        }
        Ok(())
    }
}

/// Where a relay is in its control cycle.
///
/// `Manual` is the only state of a manual relay. An automatic relay is `Idle`
/// until its run flag is set, then alternates `AutoOff` / `AutoOn`. Each phase
/// carries the instant it was entered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutomationState {
    Manual,
    Idle,
    AutoOff { since: Instant },
    AutoOn { since: Instant },
}

impl AutomationState {
    pub fn mode(&self) -> RelayMode {
        match self {
            AutomationState::Manual => RelayMode::Manual,
            _ => RelayMode::Automatic,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, AutomationState::AutoOff { .. } | AutomationState::AutoOn { .. })
    }
}

/// Output level a transition asks for.
pub type Drive = Option<bool>;

/// One relay channel.
#[derive(Clone, Debug)]
pub struct RelayChannel {
    pub name: Name,
    pub gpio: u8,
    state: bool,
    automation: AutomationState,
    schedule: DutyCycle,
    cycles: u32,
}

impl RelayChannel {
    pub fn from_config(config: &RelayConfig) -> Self {
        let settings = config.settings();
        Self {
            name: config.name.clone(),
            gpio: config.gpio,
            state: false,
            automation: idle_state(config.mode),
            schedule: settings.schedule(),
            cycles: 0,
        }
    }

    pub fn config(&self) -> RelayConfig {
        RelayConfig {
            name: self.name.clone(),
            gpio: self.gpio,
            mode: self.mode(),
            on_time: self.schedule.on_time.as_millis(),
            off_time: self.schedule.off_time.as_millis(),
            max_cycles: self.schedule.max_cycles,
        }
    }

    pub fn state(&self) -> bool {
        self.state
    }

    pub fn mode(&self) -> RelayMode {
        self.automation.mode()
    }

    pub fn automation(&self) -> AutomationState {
        self.automation
    }

    pub fn is_running(&self) -> bool {
        self.automation.is_running()
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn schedule(&self) -> DutyCycle {
        self.schedule
    }

    /// Apply new settings. Any running automation halts; a relay that was
    /// running asks for its output to go LOW.
    pub fn apply(&mut self, settings: RelaySettings) -> Drive {
        let was_running = self.is_running();
        self.name = settings.name.clone();
        self.schedule = settings.schedule();
        self.automation = idle_state(settings.mode);
        self.cycles = 0;
        was_running.then_some(false)
    }

    /// Start automation. The cycle begins in the OFF phase with the output LOW.
    pub fn start(&mut self, now: Instant) -> Result<Drive, PanelError> {
        match self.automation {
            AutomationState::Manual => Err(PanelError::NotPermitted),
            AutomationState::AutoOff { .. } | AutomationState::AutoOn { .. } => Ok(None),
            AutomationState::Idle => {
                self.cycles = 0;
                self.automation = AutomationState::AutoOff { since: now };
                Ok(Some(false))
            }
        }
    }

    /// Halt automation and drop the output.
    pub fn stop(&mut self) -> Result<Drive, PanelError> {
        match self.automation {
            AutomationState::Manual => Err(PanelError::NotPermitted),
            AutomationState::Idle => Ok(None),
            AutomationState::AutoOff { .. } | AutomationState::AutoOn { .. } => {
                self.automation = AutomationState::Idle;
                Ok(Some(false))
            }
        }
    }

    /// Advance the state machine to `now`.
    pub fn poll(&mut self, now: Instant) -> Drive {
        match self.automation {
            AutomationState::AutoOff { since } if now.saturating_duration_since(since) >= self.schedule.off_time => {
                self.automation = AutomationState::AutoOn { since: now };
                Some(true)
            }
            AutomationState::AutoOn { since } if now.saturating_duration_since(since) >= self.schedule.on_time => {
                self.cycles = self.cycles.saturating_add(1);
                if self.cycles >= self.schedule.max_cycles {
                    self.automation = AutomationState::Idle;
                } else {
                    self.automation = AutomationState::AutoOff { since: now };
                }
                Some(false)
            }
            _ => None,
        }
    }

    pub fn status(&self) -> RelayStatus {
        RelayStatus {
            name: self.name.clone(),
            gpio: self.gpio,
            state: self.state,
            mode: self.mode(),
            auto_running: self.is_running(),
            on_time: self.schedule.on_time.as_millis(),
            off_time: self.schedule.off_time.as_millis(),
            max_cycles: self.schedule.max_cycles,
            current_cycles: self.cycles,
        }
    }
}

fn idle_state(mode: RelayMode) -> AutomationState {
    match mode {
        RelayMode::Manual => AutomationState::Manual,
        RelayMode::Automatic => AutomationState::Idle,
    }
}

/// Relay status as reported to the interface layer. Times are in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStatus {
    pub name: Name,
    pub gpio: u8,
    pub state: bool,
    pub mode: RelayMode,
    pub auto_running: bool,
    pub on_time: u64,
    pub off_time: u64,
    pub max_cycles: u32,
    pub current_cycles: u32,
}

/// Port for driving relay outputs (true = energized).
pub trait RelayOutputs {
    fn drive(&mut self, relay: usize, high: bool) -> Result<(), PanelError>;
}

/// Active-high relay outputs on plain GPIO pins, indexed by relay number.
pub struct PinBank<P, const N: usize> {
    pins: [P; N],
}

impl<P: OutputPin, const N: usize> PinBank<P, N> {
    pub fn new(pins: [P; N]) -> Self {
        Self { pins }
    }
}

impl<P: OutputPin, const N: usize> RelayOutputs for PinBank<P, N> {
    fn drive(&mut self, relay: usize, high: bool) -> Result<(), PanelError> {
        let pin = self.pins.get_mut(relay).ok_or(PanelError::RelayOutOfRange)?;
        let result = if high { pin.set_high() } else { pin.set_low() };
        result.map_err(|_| PanelError::Output)
    }
}

/// Relay channels together with the outputs they drive, so that entity state
/// and pin level change under the same lock.
pub struct RelayBank<O> {
    relays: [RelayChannel; RELAY_CHANNELS],
    outputs: O,
}

impl<O: RelayOutputs> RelayBank<O> {
    pub fn new(configs: &[RelayConfig; RELAY_CHANNELS], outputs: O) -> Self {
        let mut bank = Self {
            relays: core::array::from_fn(|i| RelayChannel::from_config(&configs[i])),
            outputs,
        };
        for index in 0..RELAY_CHANNELS {
            if let Err(e) = bank.write(index, false) {
                error!("relay {} init failed: {}", index, e);
            }
        }
        bank
    }

    pub fn get(&self, index: usize) -> Result<&RelayChannel, PanelError> {
        self.relays.get(index).ok_or(PanelError::RelayOutOfRange)
    }

    fn get_mut(&mut self, index: usize) -> Result<&mut RelayChannel, PanelError> {
        self.relays.get_mut(index).ok_or(PanelError::RelayOutOfRange)
    }

    pub fn relays(&self) -> &[RelayChannel; RELAY_CHANNELS] {
        &self.relays
    }

    pub fn outputs(&self) -> &O {
        &self.outputs
    }

    fn write(&mut self, index: usize, high: bool) -> Result<(), PanelError> {
        self.outputs.drive(index, high)?;
        self.relays[index].state = high;
        Ok(())
    }

    fn follow(&mut self, index: usize, drive: Drive) -> Result<(), PanelError> {
        match drive {
            Some(level) => self.write(index, level),
            None => Ok(()),
        }
    }

    /// Drive the pin for a command that already moved the entity; on a failed
    /// write the entity is restored to `previous`.
    fn commit(&mut self, index: usize, previous: RelayChannel, drive: Drive) -> Result<(), PanelError> {
        let result = self.follow(index, drive);
        if result.is_err() {
            self.relays[index] = previous;
        }
        result
    }

    /// Direct output command. Rejected while the relay runs automatically.
    pub fn set_output(&mut self, index: usize, state: bool) -> Result<(), PanelError> {
        if self.get(index)?.is_running() {
            warn!("relay {}: manual command rejected, automation running", index);
            return Err(PanelError::NotPermitted);
        }
        self.write(index, state)
    }

    /// Set or clear the automation run flag.
    pub fn set_running(&mut self, index: usize, running: bool, now: Instant) -> Result<(), PanelError> {
        let relay = self.get_mut(index)?;
        let previous = relay.clone();
        let drive = if running { relay.start(now) } else { relay.stop() };
        let drive = drive.inspect_err(|_| warn!("relay {}: run flag rejected in manual mode", index))?;
        self.commit(index, previous, drive)?;
        if drive.is_some() {
            info!("relay {}: automation {}", index, if running { "started" } else { "stopped" });
        }
        Ok(())
    }

    pub fn apply(&mut self, index: usize, settings: RelaySettings) -> Result<(), PanelError> {
        settings.validate()?;
        let relay = self.get_mut(index)?;
        let previous = relay.clone();
        let drive = relay.apply(settings);
        self.commit(index, previous, drive)?;
        info!("relay {}: configuration updated", index);
        Ok(())
    }

    /// Advance every running relay to `now`.
    pub fn poll(&mut self, now: Instant) {
        for index in 0..RELAY_CHANNELS {
            let drive = self.relays[index].poll(now);
            if let Some(level) = drive {
                let relay = &self.relays[index];
                if relay.is_running() {
                    debug!("relay {}: {} (cycle {})", index, if level { "ON" } else { "OFF" }, relay.cycles());
                } else {
                    info!("relay {}: automation finished after {} cycles", index, relay.cycles());
                }
            }
            if let Err(e) = self.follow(index, drive) {
                error!("relay {}: output write failed: {}", index, e);
            }
        }
    }
}
