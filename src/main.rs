#![no_std]
#![no_main]

use defmt::*;

use embassy_embedded_hal::shared_bus::asynch::spi::SpiDevice;
use embassy_executor::Spawner;
use embassy_rp::adc::{self, Adc};
use embassy_rp::bind_interrupts;
use embassy_rp::gpio::{Level, Output, Pull};
use embassy_rp::peripherals::SPI0;
use embassy_rp::spi::{self, Phase, Polarity, Spi};
use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, NoopRawMutex};
use embassy_sync::mutex::Mutex;
use embassy_time::{Delay, Duration, Instant, Ticker};
use static_cell::StaticCell;

use {defmt_rtt as _, panic_probe as _};

use io_panel_rs::max31865::Max31865;
use io_panel_rs::{
    AdcError, AnalogSource, ChannelSampler, Panel, PanelConfig, PinBank, SnapshotBroadcaster, TemperatureReader,
    BROADCAST_INTERVAL_MS, RELAY_CHANNELS, RELAY_TICK_MS, SAMPLE_INTERVAL_MS, TEMP_CHECK_INTERVAL_MS,
};

bind_interrupts!(struct Irqs {
    ADC_IRQ_FIFO => adc::InterruptHandler;
});

const ADC_GPIO_BASE: u8 = 26; // GPIO26-28 are the Pico's analog inputs
const RELAY_GPIOS: [u8; RELAY_CHANNELS] = [2, 3, 4, 5];
const RTD_CS_GPIOS: [u8; 2] = [17, 20];

type SpiBus = Mutex<NoopRawMutex, Spi<'static, SPI0, spi::Async>>;
type Rtd = Max31865<SpiDevice<'static, NoopRawMutex, Spi<'static, SPI0, spi::Async>, Output<'static>>, Delay>;
type SharedPanel = Panel<CriticalSectionRawMutex, PinBank<Output<'static>, RELAY_CHANNELS>>;

static PANEL: StaticCell<SharedPanel> = StaticCell::new();
static SPI_BUS: StaticCell<SpiBus> = StaticCell::new();
static SNAPSHOTS: SnapshotBroadcaster<CriticalSectionRawMutex> = SnapshotBroadcaster::new();

/// On-chip ADC with the three inputs the Pico breaks out.
struct BoardAdc {
    adc: Adc<'static, adc::Async>,
    inputs: [adc::Channel<'static>; 3],
}

impl AnalogSource for BoardAdc {
    async fn read(&mut self, gpio: u8) -> Result<u16, AdcError> {
        let input = gpio
            .checked_sub(ADC_GPIO_BASE)
            .and_then(|i| self.inputs.get_mut(i as usize))
            .ok_or(AdcError::Unmapped)?;
        self.adc.read(input).await.map_err(|_| AdcError::ReadFailed)
    }
}

/// Factory defaults with the GPIO assignment of this board.
fn board_config() -> PanelConfig {
    let mut config = PanelConfig::default();
    for (i, channel) in config.channels.iter_mut().take(3).enumerate() {
        channel.gpio = ADC_GPIO_BASE + i as u8;
    }
    for (relay, gpio) in config.relays.iter_mut().zip(RELAY_GPIOS) {
        relay.gpio = gpio;
    }
    for (sensor, cs) in config.sensors.iter_mut().zip(RTD_CS_GPIOS) {
        sensor.cs_pin = cs;
    }
    config
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Program start");
    let p = embassy_rp::init(Default::default());

    // Relay outputs, LOW until the panel says otherwise
    let relay_pins = [
        Output::new(p.PIN_2, Level::Low),
        Output::new(p.PIN_3, Level::Low),
        Output::new(p.PIN_4, Level::Low),
        Output::new(p.PIN_5, Level::Low),
    ];

    let mut config = board_config();
    if let Err(e) = config.validate() {
        error!("board configuration rejected, using factory defaults: {}", e);
        config = PanelConfig::default();
    }
    let panel: &'static SharedPanel = PANEL.init(Panel::new(&config, PinBank::new(relay_pins)));

    // Analog inputs
    let adc = Adc::new(p.ADC, Irqs, adc::Config::default());
    let inputs = [
        adc::Channel::new_pin(p.PIN_26, Pull::None),
        adc::Channel::new_pin(p.PIN_27, Pull::None),
        adc::Channel::new_pin(p.PIN_28, Pull::None),
    ];
    let sampler = ChannelSampler::new(BoardAdc { adc, inputs });

    // RTD converters share SPI0, MAX31865 wants mode 1 or 3
    let mut spi_config = spi::Config::default();
    spi_config.frequency = 1_000_000;
    spi_config.phase = Phase::CaptureOnSecondTransition;
    spi_config.polarity = Polarity::IdleLow;

    let sclk = p.PIN_18; // Serial Clock
    let mosi = p.PIN_19; // Master Out Slave In
    let miso = p.PIN_16; // Master In Slave Out
    let spi = Spi::new(p.SPI0, sclk, mosi, miso, p.DMA_CH0, p.DMA_CH1, spi_config);
    let bus: &'static SpiBus = SPI_BUS.init(Mutex::new(spi));

    let mut rtds: [Rtd; 2] = [
        Max31865::new(SpiDevice::new(bus, Output::new(p.PIN_17, Level::High)), Delay),
        Max31865::new(SpiDevice::new(bus, Output::new(p.PIN_20, Level::High)), Delay),
    ];
    for (i, rtd) in rtds.iter_mut().enumerate() {
        if let Err(e) = rtd.init().await {
            error!("RTD {} init failed: {}", i, e);
        }
    }
    let reader = TemperatureReader::new(rtds);

    unwrap!(spawner.spawn(sampler_task(panel, sampler)));
    unwrap!(spawner.spawn(temperature_task(panel, reader)));
    unwrap!(spawner.spawn(relay_task(panel)));
    unwrap!(spawner.spawn(broadcast_task(panel)));
    unwrap!(spawner.spawn(transport_task()));
}

#[embassy_executor::task]
async fn sampler_task(panel: &'static SharedPanel, mut sampler: ChannelSampler<BoardAdc>) {
    let mut ticker = Ticker::every(Duration::from_millis(SAMPLE_INTERVAL_MS));
    loop {
        sampler.tick(panel).await;
        ticker.next().await;
    }
}

#[embassy_executor::task]
async fn temperature_task(panel: &'static SharedPanel, mut reader: TemperatureReader<Rtd>) {
    let mut ticker = Ticker::every(Duration::from_millis(TEMP_CHECK_INTERVAL_MS));
    loop {
        reader.tick(panel).await;
        ticker.next().await;
    }
}

#[embassy_executor::task]
async fn relay_task(panel: &'static SharedPanel) {
    let mut ticker = Ticker::every(Duration::from_millis(RELAY_TICK_MS));
    loop {
        panel.tick_relays(Instant::now());
        ticker.next().await;
    }
}

#[embassy_executor::task]
async fn broadcast_task(panel: &'static SharedPanel) {
    let mut ticker = Ticker::every(Duration::from_millis(BROADCAST_INTERVAL_MS));
    loop {
        SNAPSHOTS.publish(panel);
        ticker.next().await;
    }
}

// Stands in for the network push: drains snapshots and logs them
#[embassy_executor::task]
async fn transport_task() {
    loop {
        let snapshot = SNAPSHOTS.wait().await;
        for reading in &snapshot.values {
            info!(
                "#{} ch{} {} = {} {} ({} V)",
                snapshot.seq,
                reading.channel,
                reading.name.as_str(),
                reading.value,
                reading.unit.as_str(),
                reading.voltage
            );
        }
        for temp in &snapshot.temperatures {
            if temp.enabled {
                info!("#{} {} = {} C fault={}", snapshot.seq, temp.name.as_str(), temp.value, temp.fault);
            }
        }
    }
}
