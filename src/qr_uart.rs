use std::thread;

use esp_idf_hal::delay::{FreeRtos, TickType};
use esp_idf_hal::uart::UartDriver;

use turnstile_access::clock;
use turnstile_access::outbound::OutboundQueue;
use turnstile_access::qr::{
    log_bytes, zone_write_command, QrSource, SERIAL_OUTPUT_PROTOCOL_CRLF, UART_IDLE_MS,
    UART_READ_TIMEOUT_MS, ZONE_SERIAL_OUTPUT, ZONE_SETTLE_MS,
};

/// 写入串口输出配置并清掉模组的二进制应答。
pub fn configure_scanner(uart: &UartDriver<'static>) -> anyhow::Result<()> {
    uart.clear_rx()?;
    log::info!(
        "QR scanner serial output: zone 0x{:04X} = 0x{:02X}",
        ZONE_SERIAL_OUTPUT,
        SERIAL_OUTPUT_PROTOCOL_CRLF
    );
    let command = zone_write_command(ZONE_SERIAL_OUTPUT, SERIAL_OUTPUT_PROTOCOL_CRLF);
    log_bytes("QR TX:", &command);
    uart.write(&command)?;
    FreeRtos::delay_ms(ZONE_SETTLE_MS);
    uart.clear_rx()?;
    Ok(())
}

pub fn spawn_qr_task(uart: UartDriver<'static>, mut source: QrSource<OutboundQueue>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let timeout = TickType::new_millis(UART_READ_TIMEOUT_MS as u64).ticks();
        let mut buf = [0u8; 128];
        loop {
            match uart.read(&mut buf, timeout) {
                Ok(count) if count > 0 => {
                    source.feed(&buf[..count], clock::now_us());
                }
                Ok(_) => {}
                Err(err) => {
                    log::warn!("QR UART read error: {:?}", err);
                }
            }
            FreeRtos::delay_ms(UART_IDLE_MS);
        }
    })
}
