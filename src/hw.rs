use std::collections::HashMap;
use std::sync::Arc;

use esp_idf_hal::gpio::{AnyIOPin, AnyOutputPin, Level, Output, PinDriver};
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::prelude::*;
use esp_idf_hal::spi::{config::Config as SpiConfig, SpiDeviceDriver, SpiDriver, SpiDriverConfig, SPI2};
use esp_idf_hal::uart::{self, UartDriver};
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use esp_idf_svc::sys::EspError;

use turnstile_access::actuator::{ActuatorError, PinBank};
use turnstile_access::config::{ConfigError, ConfigStore, QrUart, Rc522Pins};
use turnstile_access::transport::SpiRegisterBus;

const NVS_NAMESPACE: &str = "app_cfg";
const NVS_KEY: &str = "cfg";
/// RC522 SPI 时钟。
const RC522_SPI_HZ: u32 = 1_000_000;

pub type ReaderDevice = SpiDeviceDriver<'static, Arc<SpiDriver<'static>>>;
pub type ResetPin = PinDriver<'static, AnyOutputPin, Output>;

/// 两片 RC522 共用 SPI2，各自片选；复位脚拉高并在进程生命周期内保持。
pub fn card_bus(spi: SPI2, pins: &Rc522Pins) -> anyhow::Result<(SpiRegisterBus<ReaderDevice>, [ResetPin; 2])> {
    // SAFETY: 引脚号来自配置，且只在此处为 SPI 占用
    let (sck, mosi, miso, ss_in, ss_out) = unsafe {
        (
            AnyOutputPin::new(pins.sck),
            AnyOutputPin::new(pins.mosi),
            AnyIOPin::new(pins.miso),
            AnyOutputPin::new(pins.ss_in),
            AnyOutputPin::new(pins.ss_out),
        )
    };
    let driver = Arc::new(SpiDriver::new(spi, sck, mosi, Some(miso), &SpiDriverConfig::new())?);
    let config = SpiConfig::new()
        .baudrate(Hertz(RC522_SPI_HZ))
        .data_mode(embedded_hal::spi::MODE_0);
    let entry = SpiDeviceDriver::new(driver.clone(), Some(ss_in), &config)?;
    let exit = SpiDeviceDriver::new(driver, Some(ss_out), &config)?;

    let mut rst_in = PinDriver::output(unsafe { AnyOutputPin::new(pins.rst_in) })?;
    let mut rst_out = PinDriver::output(unsafe { AnyOutputPin::new(pins.rst_out) })?;
    rst_in.set_high()?;
    rst_out.set_high()?;
    log::info!(
        "RC522 SPI up: sck={} mosi={} miso={} ss={}/{} rst={}/{}",
        pins.sck,
        pins.mosi,
        pins.miso,
        pins.ss_in,
        pins.ss_out,
        pins.rst_in,
        pins.rst_out
    );

    Ok((SpiRegisterBus::new(entry, exit), [rst_in, rst_out]))
}

/// 二维码模组串口。
pub fn qr_uart<U: uart::Uart>(
    uart: impl Peripheral<P = U> + 'static,
    cfg: &QrUart,
) -> anyhow::Result<UartDriver<'static>> {
    let config = uart::config::Config::new().baudrate(Hertz(cfg.baud));
    // SAFETY: 引脚号来自配置
    let (tx, rx) = unsafe { (AnyOutputPin::new(cfg.tx), AnyIOPin::new(cfg.rx)) };
    let driver = UartDriver::new(
        uart,
        tx,
        rx,
        Option::<AnyIOPin>::None,
        Option::<AnyOutputPin>::None,
        &config,
    )?;
    log::info!("QR UART{} up: tx={} rx={} baud={}", cfg.port, cfg.tx, cfg.rx, cfg.baud);
    Ok(driver)
}

/// 按需创建的 GPIO 输出驱动。
#[derive(Default)]
pub struct GpioBank {
    outputs: HashMap<i32, PinDriver<'static, AnyOutputPin, Output>>,
}

fn driver_error(pin: i32, err: EspError) -> ActuatorError {
    ActuatorError::Driver {
        pin,
        message: err.to_string(),
    }
}

impl PinBank for GpioBank {
    fn configure_output(&mut self, pin: i32) -> Result<(), ActuatorError> {
        // SAFETY: 执行器模块已检查引脚范围
        let mut driver =
            PinDriver::output(unsafe { AnyOutputPin::new(pin) }).map_err(|err| driver_error(pin, err))?;
        driver.set_low().map_err(|err| driver_error(pin, err))?;
        self.outputs.insert(pin, driver);
        Ok(())
    }

    fn write(&mut self, pin: i32, high: bool) -> Result<(), ActuatorError> {
        let driver = self.outputs.get_mut(&pin).ok_or(ActuatorError::InvalidPin(pin))?;
        driver
            .set_level(Level::from(high))
            .map_err(|err| driver_error(pin, err))
    }
}

/// NVS 中的配置 JSON。
pub struct NvsStore {
    nvs: EspNvs<NvsDefault>,
}

impl NvsStore {
    pub fn open(partition: EspDefaultNvsPartition) -> Result<Self, EspError> {
        Ok(Self {
            nvs: EspNvs::new(partition, NVS_NAMESPACE, true)?,
        })
    }
}

fn storage_error(err: EspError) -> ConfigError {
    ConfigError::Storage(err.to_string())
}

impl ConfigStore for NvsStore {
    fn read(&mut self) -> Result<Option<Vec<u8>>, ConfigError> {
        let Some(len) = self.nvs.blob_len(NVS_KEY).map_err(storage_error)? else {
            return Ok(None);
        };
        let mut buf = vec![0u8; len];
        let data = self.nvs.get_blob(NVS_KEY, &mut buf).map_err(storage_error)?;
        Ok(data.map(<[u8]>::to_vec))
    }

    fn write(&mut self, data: &[u8]) -> Result<(), ConfigError> {
        self.nvs.set_blob(NVS_KEY, data).map_err(storage_error)
    }
}
