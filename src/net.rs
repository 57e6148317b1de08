use core::convert::TryInto;
use std::thread;
use std::time::Duration;

use anyhow::anyhow;
use embedded_svc::wifi::{AuthMethod, ClientConfiguration, Configuration};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::sys::EspError;
use esp_idf_svc::wifi::{BlockingWifi, EspWifi};

use turnstile_access::link::{LinkState, LinkStatus};
use turnstile_access::status::RSSI_UNKNOWN;

const WIFI_SSID: &str = match option_env!("WIFI_SSID") {
    Some(ssid) => ssid,
    None => "",
};
const WIFI_PASS: &str = match option_env!("WIFI_PASS") {
    Some(pass) => pass,
    None => "",
};

/// 断线后的重连检查间隔。
const RECONNECT_CHECK: Duration = Duration::from_secs(5);

type Wifi = BlockingWifi<EspWifi<'static>>;

pub fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs: Option<EspDefaultNvsPartition>,
) -> anyhow::Result<Wifi> {
    if WIFI_SSID.is_empty() {
        return Err(anyhow!("WIFI_SSID not set at build time"));
    }
    let mut wifi = BlockingWifi::wrap(EspWifi::new(modem, sys_loop.clone(), nvs)?, sys_loop)?;

    let auth_method = if WIFI_PASS.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPA2Personal
    };

    let wifi_configuration = Configuration::Client(ClientConfiguration {
        ssid: WIFI_SSID
            .try_into()
            .map_err(|_| anyhow!("WIFI_SSID too long"))?,
        bssid: None,
        auth_method,
        password: WIFI_PASS
            .try_into()
            .map_err(|_| anyhow!("WIFI_PASS too long"))?,
        channel: None,
        ..Default::default()
    });

    wifi.set_configuration(&wifi_configuration)?;
    wifi.start()?;
    log::info!("Wi-Fi started");
    Ok(wifi)
}

fn join(wifi: &mut Wifi) -> Result<(), EspError> {
    wifi.connect()?;
    log::info!("Wi-Fi connected to {}", WIFI_SSID);
    wifi.wait_netif_up()?;
    log::info!("Wi-Fi netif up");
    Ok(())
}

/// Wi-Fi 守护线程：保持连接并维护链路状态（MQTT 连上后由 MQTT 线程置为 Online）。
pub fn spawn_wifi_supervisor(mut wifi: Wifi, link: LinkStatus) -> thread::JoinHandle<()> {
    thread::spawn(move || loop {
        let connected = wifi.is_connected().unwrap_or(false);
        if connected {
            if link.get() == LinkState::Offline {
                link.set(LinkState::WifiUp);
            }
        } else {
            link.set(LinkState::Offline);
            match join(&mut wifi) {
                Ok(()) => link.set(LinkState::WifiUp),
                Err(err) => log::warn!("Wi-Fi connect failed: {:?}", err),
            }
        }
        thread::sleep(RECONNECT_CHECK);
    })
}

/// 当前 AP 信号强度，未连接时为占位值。
pub fn rssi() -> i32 {
    let mut info = esp_idf_svc::sys::wifi_ap_record_t::default();
    // SAFETY: 传入有效的输出结构体指针
    let err = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut info) };
    if err == esp_idf_svc::sys::ESP_OK {
        info.rssi as i32
    } else {
        RSSI_UNKNOWN
    }
}

pub fn free_heap() -> u32 {
    // SAFETY: 只读查询
    unsafe { esp_idf_svc::sys::esp_get_free_heap_size() }
}
