use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::SpiDevice;

use crate::temperature::{RtdError, RtdFrontEnd};

const REG_CONFIG: u8 = 0x00;
const REG_RTD_MSB: u8 = 0x01; // RTD LSB follows at 0x02
const REG_HIGH_FAULT_MSB: u8 = 0x03; // High fault threshold MSB, LSB at 0x04
const REG_LOW_FAULT_MSB: u8 = 0x05; // Low fault threshold MSB, LSB at 0x06
const REG_FAULT_STATUS: u8 = 0x07;

const WRITE: u8 = 0x80; // Address bit 7 selects a write

const CONFIG_BIAS: u8 = 0x80; // V_BIAS on
const CONFIG_AUTO_CONVERT: u8 = 0x40; // Continuous conversion
const CONFIG_ONE_SHOT: u8 = 0x20; // Single conversion, self-clearing
const CONFIG_3WIRE: u8 = 0x10; // 3-wire when set, 2/4-wire otherwise
const CONFIG_FAULT_CYCLE: u8 = 0x0C; // Fault detection cycle control bits
const CONFIG_FAULT_CLEAR: u8 = 0x02; // Clear fault status, self-clearing

const BIAS_SETTLE_MS: u32 = 10;
const CONVERSION_MS: u32 = 65; // One-shot conversion time with the 60 Hz filter

/// MAX31865 RTD-to-digital converter on its own chip select, wired for a
/// two-wire PT100 / PT1000 element.
pub struct Max31865<SPI, D> {
    spi: SPI,
    delay: D,
}

impl<SPI: SpiDevice, D: DelayNs> Max31865<SPI, D> {
    pub fn new(spi: SPI, delay: D) -> Self {
        Self { spi, delay }
    }

    /// Two-wire mode, bias and auto-conversion off, widest fault thresholds,
    /// fault status cleared.
    pub async fn init(&mut self) -> Result<(), RtdError> {
        let config = self.read_register(REG_CONFIG).await?;
        let config = config & !(CONFIG_3WIRE | CONFIG_BIAS | CONFIG_AUTO_CONVERT);
        self.write_register(REG_CONFIG, config).await?;
        self.write_registers(REG_LOW_FAULT_MSB, &[0x00, 0x00]).await?;
        self.write_registers(REG_HIGH_FAULT_MSB, &[0xFF, 0xFF]).await?;
        self.clear_fault().await
    }

    pub async fn read_fault(&mut self) -> Result<u8, RtdError> {
        self.read_register(REG_FAULT_STATUS).await
    }

    pub async fn clear_fault(&mut self) -> Result<(), RtdError> {
        let config = self.read_register(REG_CONFIG).await?;
        let config = (config & !(CONFIG_ONE_SHOT | CONFIG_FAULT_CYCLE)) | CONFIG_FAULT_CLEAR;
        self.write_register(REG_CONFIG, config).await
    }

    /// Run a one-shot conversion and return the 15-bit RTD ratio.
    pub async fn read_rtd(&mut self) -> Result<u16, RtdError> {
        self.clear_fault().await?;
        self.set_bias(true).await?;
        self.delay.delay_ms(BIAS_SETTLE_MS).await;

        let config = self.read_register(REG_CONFIG).await? | CONFIG_ONE_SHOT;
        self.write_register(REG_CONFIG, config).await?;
        self.delay.delay_ms(CONVERSION_MS).await;

        let mut data = [0u8; 2];
        self.read_registers(REG_RTD_MSB, &mut data).await?;
        self.set_bias(false).await?;

        // Bit 0 of the LSB is the fault flag
        Ok(u16::from_be_bytes(data) >> 1)
    }

    async fn set_bias(&mut self, on: bool) -> Result<(), RtdError> {
        let config = self.read_register(REG_CONFIG).await?;
        let config = if on { config | CONFIG_BIAS } else { config & !CONFIG_BIAS };
        self.write_register(REG_CONFIG, config).await
    }

    async fn read_register(&mut self, reg: u8) -> Result<u8, RtdError> {
        let mut data = [0u8; 1];
        self.read_registers(reg, &mut data).await?;
        Ok(data[0])
    }

    async fn read_registers(&mut self, reg: u8, data: &mut [u8]) -> Result<(), RtdError> {
        let mut buf = [0u8; 3];
        let len = data.len() + 1;
        buf[0] = reg & !WRITE;
        self.spi.transfer_in_place(&mut buf[..len]).await.map_err(|_| RtdError::Bus)?;
        data.copy_from_slice(&buf[1..len]);
        Ok(())
    }

    async fn write_register(&mut self, reg: u8, value: u8) -> Result<(), RtdError> {
        self.write_registers(reg, &[value]).await
    }

    async fn write_registers(&mut self, reg: u8, values: &[u8]) -> Result<(), RtdError> {
        let mut buf = [0u8; 3];
        let len = values.len() + 1;
        buf[0] = reg | WRITE;
        buf[1..len].copy_from_slice(values);
        self.spi.write(&buf[..len]).await.map_err(|_| RtdError::Bus)
    }
}

impl<SPI: SpiDevice, D: DelayNs> RtdFrontEnd for Max31865<SPI, D> {
    async fn read_fault(&mut self) -> Result<u8, RtdError> {
        Max31865::read_fault(self).await
    }

    async fn clear_fault(&mut self) -> Result<(), RtdError> {
        Max31865::clear_fault(self).await
    }

    async fn read_rtd(&mut self) -> Result<u16, RtdError> {
        Max31865::read_rtd(self).await
    }
}
