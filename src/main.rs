// 模块划分：硬件接线、Wi-Fi、MQTT 与二维码串口
#[cfg(target_os = "espidf")]
mod hw;
#[cfg(target_os = "espidf")]
mod mqtt;
#[cfg(target_os = "espidf")]
mod net;
#[cfg(target_os = "espidf")]
mod qr_uart;

#[cfg(target_os = "espidf")]
mod firmware {
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;

    use esp_idf_hal::delay::FreeRtos;
    use esp_idf_hal::prelude::*;
    use esp_idf_hal::spi::SPI2;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;

    use turnstile_access::actuator::Actuators;
    use turnstile_access::clock;
    use turnstile_access::config::{AppConfig, ConfigHandle};
    use turnstile_access::dispatcher::{Dispatcher, COMMAND_QUEUE_CAPACITY};
    use turnstile_access::gate::{AccessCoordinator, AccessGate};
    use turnstile_access::link::{LinkState, LinkStatus};
    use turnstile_access::outbound::OutboundQueue;
    use turnstile_access::picc::Mfrc522;
    use turnstile_access::qr::QrSource;
    use turnstile_access::reader::{CardWriter, ReaderPoller};
    use turnstile_access::status::ReaderHealth;
    use turnstile_access::transport::{ReaderHandle, ReaderRole};

    use crate::{hw, mqtt, net, qr_uart};

    /// 出站队列容量。
    const OUTBOUND_CAPACITY: usize = 64;
    const TASK_STACK_SIZE: usize = 8192;

    /// 初始化两片读卡器并启动轮询线程，返回写卡入口。
    fn start_card_readers(
        spi: SPI2,
        cfg: &AppConfig,
        coordinator: AccessCoordinator<OutboundQueue>,
        link: LinkStatus,
        health: Arc<ReaderHealth>,
    ) -> anyhow::Result<CardWriter> {
        let (bus, reset_pins) = hw::card_bus(spi, &cfg.rc522)?;
        let bus = Arc::new(bus);
        let entry = Mfrc522::new(ReaderHandle::new(ReaderRole::In, bus.clone()));
        let exit = Mfrc522::new(ReaderHandle::new(ReaderRole::Out, bus));

        let mut delay = FreeRtos;
        for chip in [&entry, &exit] {
            let version = chip.init(&mut delay)?;
            log::info!("RC522 {} version 0x{:02X}", chip.role().as_str(), version);
        }

        let (writer, jobs) = CardWriter::channel();
        let poller = ReaderPoller::new(entry, exit, coordinator, link, health, jobs);
        thread::Builder::new()
            .name("rc522".into())
            .stack_size(TASK_STACK_SIZE)
            .spawn(move || {
                // 复位脚随轮询线程一直保持高电平
                let _reset_pins = reset_pins;
                let mut delay = FreeRtos;
                poller.run(&mut delay)
            })?;
        Ok(writer)
    }

    pub fn run() -> anyhow::Result<()> {
        // ESP-IDF 运行时初始化（链接补丁 & 日志）
        esp_idf_svc::sys::link_patches();
        esp_idf_svc::log::EspLogger::initialize_default();
        clock::now_us();

        log::info!("Turnstile access controller booting (fw {})", env!("CARGO_PKG_VERSION"));

        let peripherals = Peripherals::take()?;
        let sys_loop = EspSystemEventLoop::take()?;
        let nvs = EspDefaultNvsPartition::take()?;

        let config = ConfigHandle::load(Box::new(hw::NvsStore::open(nvs.clone())?));
        let cfg = config.snapshot();
        log::info!(
            "Device {} ({}) cards={} qr={}",
            cfg.device_id,
            cfg.device_name,
            cfg.enable_cards,
            cfg.enable_qr
        );

        // 共享状态：链路、闸门、读卡器健康
        let (outbound, outbound_rx) = OutboundQueue::bounded(OUTBOUND_CAPACITY);
        let (command_tx, command_rx) = mpsc::sync_channel(COMMAND_QUEUE_CAPACITY);
        let link = LinkStatus::new();
        let health = Arc::new(ReaderHealth::default());
        let sink = Arc::new(outbound.clone());
        let coordinator = AccessCoordinator::new(Arc::new(AccessGate::new()), sink.clone(), config.clone());

        // Wi-Fi 失败不阻塞本地初始化，守护线程负责重连
        match net::connect_wifi(peripherals.modem, sys_loop, Some(nvs)) {
            Ok(wifi) => {
                net::spawn_wifi_supervisor(wifi, link.clone());
            }
            Err(err) => {
                log::warn!("Wi-Fi start failed: {:?}", err);
                link.set(LinkState::Offline);
            }
        }

        let (client, connection) = mqtt::start(&config)?;
        mqtt::spawn_event_loop(
            connection,
            client.clone(),
            config.clone(),
            link.clone(),
            outbound.clone(),
            command_tx,
        );
        mqtt::spawn_publisher(client, link.clone(), outbound_rx);

        let writer = if cfg.enable_cards {
            match start_card_readers(peripherals.spi2, &cfg, coordinator.clone(), link.clone(), health.clone()) {
                Ok(writer) => writer,
                Err(err) => {
                    log::error!("RC522 init failed, card readers disabled: {:?}", err);
                    CardWriter::disabled()
                }
            }
        } else {
            log::info!("Card readers disabled by config");
            CardWriter::disabled()
        };

        if cfg.enable_qr {
            let uart = match cfg.qr_uart.port {
                2 => hw::qr_uart(peripherals.uart2, &cfg.qr_uart),
                _ => hw::qr_uart(peripherals.uart1, &cfg.qr_uart),
            };
            match uart {
                Ok(uart) => {
                    if let Err(err) = qr_uart::configure_scanner(&uart) {
                        log::warn!("QR scanner setup failed: {:?}", err);
                    }
                    qr_uart::spawn_qr_task(uart, QrSource::new(coordinator.clone(), link.clone()));
                }
                Err(err) => log::error!("QR UART init failed, scanner disabled: {:?}", err),
            }
        }

        mqtt::spawn_status_reporter(config.clone(), link.clone(), health, outbound);

        let actuators = Actuators::new(hw::GpioBank::default(), FreeRtos);
        let dispatcher = Dispatcher::new(sink, actuators, config, coordinator, writer);
        thread::Builder::new()
            .name("dispatch".into())
            .stack_size(TASK_STACK_SIZE)
            .spawn(move || dispatcher.run(command_rx))?;

        // 主循环保持任务存活
        loop {
            FreeRtos::delay_ms(1000);
        }
    }
}

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    firmware::run()
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!("turnstile-access firmware only runs on ESP-IDF targets; use `cargo test --lib` on the host");
}
