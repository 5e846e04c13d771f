use std::cell::{Cell, RefCell};
use std::rc::Rc;

use embassy_futures::block_on;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_time::Instant;

use io_panel_rs::{
    bounded, AdcError, AnalogSource, CalibrationPoint, CalibrationTable, ChannelConfig, ChannelSampler,
    ChannelSettings, Panel, PanelConfig, PanelError, RelayMode, RelayOutputs, RelaySettings, RtdError, RtdFrontEnd,
    SnapshotBroadcaster, TemperatureReader, RELAY_CHANNELS, RELAY_TICK_MS, SAMPLE_WINDOW,
};

#[derive(Default)]
struct OutputLog {
    high: [bool; RELAY_CHANNELS],
    rising_edges: [u32; RELAY_CHANNELS],
}

/// Relay outputs recording pin levels; clones share the log.
#[derive(Clone, Default)]
struct Relays {
    log: Rc<RefCell<OutputLog>>,
}

impl RelayOutputs for Relays {
    fn drive(&mut self, relay: usize, high: bool) -> Result<(), PanelError> {
        let mut log = self.log.borrow_mut();
        if high && !log.high[relay] {
            log.rising_edges[relay] += 1;
        }
        log.high[relay] = high;
        Ok(())
    }
}

/// ADC returning the same count on every GPIO, adjustable between ticks.
#[derive(Clone, Default)]
struct FixedAdc {
    raw: Rc<Cell<u16>>,
    failing: Rc<Cell<bool>>,
}

impl AnalogSource for FixedAdc {
    async fn read(&mut self, _gpio: u8) -> Result<u16, AdcError> {
        if self.failing.get() {
            return Err(AdcError::ReadFailed);
        }
        Ok(self.raw.get())
    }
}

#[derive(Default)]
struct FakeRtd {
    fault: u8,
    raw: u16,
    clears: u32,
    fault_bus_error: bool,
    rtd_bus_error: bool,
}

impl RtdFrontEnd for FakeRtd {
    async fn read_fault(&mut self) -> Result<u8, RtdError> {
        if self.fault_bus_error {
            return Err(RtdError::Bus);
        }
        Ok(self.fault)
    }

    async fn clear_fault(&mut self) -> Result<(), RtdError> {
        self.clears += 1;
        self.fault = 0;
        Ok(())
    }

    async fn read_rtd(&mut self) -> Result<u16, RtdError> {
        if self.rtd_bus_error {
            return Err(RtdError::Bus);
        }
        Ok(self.raw)
    }
}

fn calibrated_config() -> PanelConfig {
    let mut config = PanelConfig::default();
    config.channels[0].enabled = true;
    config.channels[0].calib_points =
        CalibrationTable::new(&[CalibrationPoint::new(0.2, 0.0), CalibrationPoint::new(2.8, 100.0)]).unwrap();
    config
}

fn sample(sampler: &mut ChannelSampler<FixedAdc>, panel: &Panel<NoopRawMutex, Relays>, ticks: usize) {
    for _ in 0..ticks {
        block_on(sampler.tick(panel));
    }
}

#[test]
fn test_calibrated_channel_reaches_midpoint() {
    let panel: Panel<NoopRawMutex, _> = Panel::new(&calibrated_config(), Relays::default());
    let adc = FixedAdc::default();
    // 1.5 V
    adc.raw.set(1861);
    let mut sampler = ChannelSampler::new(adc);

    sample(&mut sampler, &panel, SAMPLE_WINDOW - 1);
    assert_eq!(panel.read_channel(0).unwrap().value, 0.0);

    sample(&mut sampler, &panel, 1);
    let reading = panel.read_channel(0).unwrap();
    assert!((reading.value - 50.0).abs() < 0.05, "value {}", reading.value);
    assert_eq!(reading.raw_value, 1861);
}

#[test]
fn test_filter_limit_through_sampler() {
    let panel: Panel<NoopRawMutex, _> = Panel::new(&calibrated_config(), Relays::default());
    let adc = FixedAdc::default();
    let level = adc.raw.clone();
    let mut sampler = ChannelSampler::new(adc);

    level.set(1000);
    sample(&mut sampler, &panel, SAMPLE_WINDOW);
    let settled = panel.read_channel(0).unwrap().value;

    level.set(1020);
    sample(&mut sampler, &panel, SAMPLE_WINDOW);
    assert_eq!(panel.read_channel(0).unwrap().value, settled);

    level.set(1021);
    sample(&mut sampler, &panel, SAMPLE_WINDOW);
    let reading = panel.read_channel(0).unwrap();
    assert!(reading.value > settled);
    assert_eq!(reading.difference, 21);
}

#[test]
fn test_failed_adc_read_leaves_channel_untouched() {
    let panel: Panel<NoopRawMutex, _> = Panel::new(&calibrated_config(), Relays::default());
    let adc = FixedAdc::default();
    let (level, failing) = (adc.raw.clone(), adc.failing.clone());
    let mut sampler = ChannelSampler::new(adc);

    level.set(1000);
    sample(&mut sampler, &panel, SAMPLE_WINDOW);
    let settled = panel.read_channel(0).unwrap();

    level.set(1500);
    sample(&mut sampler, &panel, 2);

    failing.set(true);
    level.set(3000);
    for _ in 0..3 {
        assert_eq!(block_on(sampler.tick_channel(&panel, 0)), Ok(false));
    }
    let reading = panel.read_channel(0).unwrap();
    assert_eq!(reading.raw_value, 1500);
    assert_eq!(reading.value, settled.value);

    // Failed reads added nothing to the window: it completes on the fifth good sample
    failing.set(false);
    level.set(1500);
    sample(&mut sampler, &panel, 2);
    assert_eq!(panel.read_channel(0).unwrap().value, settled.value);
    sample(&mut sampler, &panel, 1);
    let reading = panel.read_channel(0).unwrap();
    assert!(reading.value > settled.value);
    assert_eq!(reading.difference, 500);
}

#[test]
fn test_disabled_channels_are_not_sampled() {
    let panel: Panel<NoopRawMutex, _> = Panel::new(&calibrated_config(), Relays::default());
    let adc = FixedAdc::default();
    adc.raw.set(2000);
    let mut sampler = ChannelSampler::new(adc);

    sample(&mut sampler, &panel, SAMPLE_WINDOW);
    assert_eq!(panel.read_channel(1).unwrap().raw_value, 0);
    assert_eq!(block_on(sampler.tick_channel(&panel, 12)), Err(PanelError::ChannelOutOfRange));
}

#[test]
fn test_relay_runs_configured_cycles_then_stops() {
    let outputs = Relays::default();
    let panel: Panel<NoopRawMutex, _> = Panel::new(&PanelConfig::default(), outputs.clone());
    panel
        .set_relay_config(
            1,
            RelaySettings {
                name: bounded("Valve").unwrap(),
                mode: RelayMode::Automatic,
                on_time: 1000,
                off_time: 500,
                max_cycles: 3,
            },
        )
        .unwrap();
    panel.set_relay_running(1, true, Instant::from_millis(0)).unwrap();
    assert_eq!(panel.set_relay_output(1, true), Err(PanelError::NotPermitted));

    let mut t = 0;
    while t <= 6000 {
        panel.tick_relays(Instant::from_millis(t));
        t += RELAY_TICK_MS;
    }

    let status = panel.relay_status(1).unwrap();
    assert_eq!(status.current_cycles, 3);
    assert!(!status.auto_running);
    assert!(!status.state);
    assert_eq!(outputs.log.borrow().rising_edges[1], 3);
    assert!(!outputs.log.borrow().high[1]);

    // Finished relays accept manual commands again
    panel.set_relay_output(1, true).unwrap();
    assert!(panel.relay_status(1).unwrap().state);
}

#[test]
fn test_manual_relay_rejects_run_flag() {
    let panel: Panel<NoopRawMutex, _> = Panel::new(&PanelConfig::default(), Relays::default());
    assert_eq!(panel.relay_status(2).unwrap().mode, RelayMode::Manual);
    assert_eq!(panel.set_relay_running(2, true, Instant::from_millis(0)), Err(PanelError::NotPermitted));
    assert!(!panel.relay_status(2).unwrap().auto_running);
}

#[test]
fn test_rtd_fault_keeps_last_temperature() {
    let mut config = PanelConfig::default();
    config.sensors[0].enabled = true;
    let panel: Panel<NoopRawMutex, _> = Panel::new(&config, Relays::default());
    let mut reader = TemperatureReader::new([
        FakeRtd { raw: 8000, ..Default::default() },
        FakeRtd::default(),
    ]);

    assert_eq!(block_on(reader.tick_sensor(&panel, 0)), Ok(true));
    let good = panel.read_temperature(0).unwrap();
    assert!(!good.fault);
    assert!(good.value > 0.0);

    reader.front_end(0).unwrap().fault = 0x40;
    assert_eq!(block_on(reader.tick_sensor(&panel, 0)), Ok(false));
    let faulted = panel.read_temperature(0).unwrap();
    assert!(faulted.fault);
    assert_eq!(faulted.value, good.value);
    assert_eq!(reader.front_end(0).unwrap().clears, 1);

    // Disabled sensor is never read
    assert_eq!(block_on(reader.tick_sensor(&panel, 1)), Ok(false));
    assert_eq!(panel.read_temperature(1).unwrap().resistance, 0.0);

    // Fault clears on the next good read
    block_on(reader.tick(&panel));
    assert!(!panel.read_temperature(0).unwrap().fault);
}

#[test]
fn test_rtd_bus_error_is_treated_as_fault() {
    let mut config = PanelConfig::default();
    config.sensors[0].enabled = true;
    let panel: Panel<NoopRawMutex, _> = Panel::new(&config, Relays::default());
    let mut reader = TemperatureReader::new([
        FakeRtd { raw: 8000, ..Default::default() },
        FakeRtd::default(),
    ]);
    block_on(reader.tick_sensor(&panel, 0)).unwrap();
    let good = panel.read_temperature(0).unwrap();

    // Fault status register unreadable
    reader.front_end(0).unwrap().fault_bus_error = true;
    reader.front_end(0).unwrap().raw = 9000;
    assert_eq!(block_on(reader.tick_sensor(&panel, 0)), Ok(false));
    let reading = panel.read_temperature(0).unwrap();
    assert!(reading.fault);
    assert_eq!(reading.value, good.value);
    assert_eq!(reading.resistance, good.resistance);
    assert_eq!(reader.front_end(0).unwrap().clears, 0);

    // Conversion read fails after a clean fault status
    let rtd = reader.front_end(0).unwrap();
    rtd.fault_bus_error = false;
    rtd.rtd_bus_error = true;
    assert_eq!(block_on(reader.tick_sensor(&panel, 0)), Ok(false));
    let reading = panel.read_temperature(0).unwrap();
    assert!(reading.fault);
    assert_eq!(reading.value, good.value);

    reader.front_end(0).unwrap().rtd_bus_error = false;
    assert_eq!(block_on(reader.tick_sensor(&panel, 0)), Ok(true));
    let reading = panel.read_temperature(0).unwrap();
    assert!(!reading.fault);
    assert!(reading.value > good.value);
}

#[test]
fn test_channel_config_round_trip() {
    let panel: Panel<NoopRawMutex, _> = Panel::new(&PanelConfig::default(), Relays::default());
    let settings = ChannelSettings {
        enabled: true,
        name: bounded("Level").unwrap(),
        unit: bounded("%").unwrap(),
        filter_limit: 35,
        compensation: -1.5,
        calib_points: CalibrationTable::new(&[
            CalibrationPoint::new(0.5, 0.0),
            CalibrationPoint::new(1.5, 40.0),
            CalibrationPoint::new(2.5, 100.0),
        ])
        .unwrap(),
    };
    panel.set_channel_config(4, settings.clone()).unwrap();

    let config: ChannelConfig = panel.channel_config(4).unwrap();
    assert_eq!(ChannelSettings::from(config.clone()), settings);
    assert_eq!(config.gpio, ChannelConfig::default_for(4).gpio);

    let json = serde_json::to_string(&config).unwrap();
    assert!(json.contains("\"calibPoints\""));
    let parsed: ChannelConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn test_broadcast_reflects_sampled_values() {
    let panel: Panel<NoopRawMutex, _> = Panel::new(&calibrated_config(), Relays::default());
    let broadcaster: SnapshotBroadcaster<NoopRawMutex> = SnapshotBroadcaster::new();
    let adc = FixedAdc::default();
    adc.raw.set(1861);
    let mut sampler = ChannelSampler::new(adc);
    sample(&mut sampler, &panel, SAMPLE_WINDOW);

    broadcaster.publish(&panel);
    let snapshot = block_on(broadcaster.wait());
    assert_eq!(snapshot.seq, 1);
    assert_eq!(snapshot.values.len(), 1);
    assert_eq!(snapshot.values[0].channel, 0);
    assert!((snapshot.values[0].value - 50.0).abs() < 0.05);
}
