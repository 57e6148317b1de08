use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

const DEFAULT_DEVICE_ID: &str = "SFTCLUB_DEVICE";
const DEFAULT_TOPIC_ROOT: &str = "/var/deploys/topics";
const DEFAULT_RESPONSE_TOPIC: &str = "/var/deploys/topics/SFTCLUB";
const DEFAULT_MQTT_URL: &str = "mqtt://127.0.0.1:1883";

/// 配置持久化 / 解析错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config storage: {0}")]
    Storage(String),
}

/// RC522 SPI 总线与片选 / 复位引脚。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Rc522Pins {
    pub mosi: i32,
    pub miso: i32,
    pub sck: i32,
    pub ss_in: i32,
    pub rst_in: i32,
    pub ss_out: i32,
    pub rst_out: i32,
}

impl Default for Rc522Pins {
    fn default() -> Self {
        Self {
            mosi: 11,
            miso: 13,
            sck: 12,
            ss_in: 10,
            rst_in: 16,
            ss_out: 15,
            rst_out: 17,
        }
    }
}

/// 闸机继电器与蜂鸣器引脚。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputPins {
    pub relay_in: i32,
    pub relay_out: i32,
    pub buzzer: i32,
}

impl Default for OutputPins {
    fn default() -> Self {
        Self {
            relay_in: 19,
            relay_out: 20,
            buzzer: 21,
        }
    }
}

/// 二维码模组串口参数。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QrUart {
    pub port: u8,
    pub baud: u32,
    pub tx: i32,
    pub rx: i32,
}

impl Default for QrUart {
    fn default() -> Self {
        Self {
            port: 1,
            baud: 9600,
            tx: 17,
            rx: 18,
        }
    }
}

/// 各输出是否低电平有效。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Polarity {
    pub relay_in: bool,
    pub relay_out: bool,
    pub buzzer: bool,
    pub switch: bool,
    pub horn: bool,
    pub material_door: bool,
    pub entry_door: bool,
}

/// 脉冲时长（毫秒）。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Timing {
    pub relay_ms: u32,
    pub buzzer_ms: u32,
    pub buzzer_gap_ms: u32,
    pub push_ms: u32,
    pub material_door_ms: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            relay_ms: 2000,
            buzzer_ms: 150,
            buzzer_gap_ms: 100,
            push_ms: 500,
            material_door_ms: 3000,
        }
    }
}

/// 设备运行配置（NVS 中以 JSON 保存）。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub device_id: String,
    pub device_name: String,
    pub id_torno: String,
    pub enable_cards: bool,
    pub enable_qr: bool,
    pub mqtt_url: String,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub topic_root: String,
    pub response_topic: String,
    pub rc522: Rc522Pins,
    pub outputs: OutputPins,
    pub qr_uart: QrUart,
    pub polarity: Polarity,
    pub timing: Timing,
}

impl Default for AppConfig {
    fn default() -> Self {
        let device_id = option_env!("DEVICE_ID").unwrap_or(DEFAULT_DEVICE_ID).to_string();
        Self {
            device_name: device_id.clone(),
            device_id,
            id_torno: "1".to_string(),
            enable_cards: false,
            enable_qr: true,
            mqtt_url: option_env!("MQTT_URL").unwrap_or(DEFAULT_MQTT_URL).to_string(),
            mqtt_user: option_env!("MQTT_USER").unwrap_or("").to_string(),
            mqtt_pass: option_env!("MQTT_PASS").unwrap_or("").to_string(),
            topic_root: option_env!("TOPIC_ROOT").unwrap_or(DEFAULT_TOPIC_ROOT).to_string(),
            response_topic: option_env!("RESPONSE_TOPIC")
                .unwrap_or(DEFAULT_RESPONSE_TOPIC)
                .to_string(),
            rc522: Rc522Pins::default(),
            outputs: OutputPins::default(),
            qr_uart: QrUart::default(),
            polarity: Polarity::default(),
            timing: Timing::default(),
        }
    }
}

impl AppConfig {
    /// 订阅的命令主题。
    pub fn command_topic(&self) -> String {
        format!("{}/{}", self.topic_root, self.device_id)
    }

    /// 周期状态主题。
    pub fn status_topic(&self) -> String {
        format!("{}/{}/status", self.topic_root, self.device_id)
    }
}

/// 远程 setConfig 可修改的字段。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigPatch {
    pub enable_cards: Option<bool>,
    pub enable_qr: Option<bool>,
    pub id_torno: Option<String>,
}

impl ConfigPatch {
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(enable) = self.enable_cards {
            config.enable_cards = enable;
        }
        if let Some(enable) = self.enable_qr {
            config.enable_qr = enable;
        }
        if let Some(id_torno) = &self.id_torno {
            config.id_torno = id_torno.clone();
        }
    }
}

/// 配置持久化后端。
pub trait ConfigStore: Send {
    fn read(&mut self) -> Result<Option<Vec<u8>>, ConfigError>;
    fn write(&mut self, data: &[u8]) -> Result<(), ConfigError>;
}

/// 内存存储（主机测试）。
#[derive(Default)]
pub struct MemoryStore {
    pub data: Option<Vec<u8>>,
}

impl ConfigStore for MemoryStore {
    fn read(&mut self) -> Result<Option<Vec<u8>>, ConfigError> {
        Ok(self.data.clone())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), ConfigError> {
        self.data = Some(data.to_vec());
        Ok(())
    }
}

/// 共享配置句柄：快照读 + 修改后落盘。
#[derive(Clone)]
pub struct ConfigHandle {
    current: Arc<RwLock<AppConfig>>,
    store: Arc<Mutex<Box<dyn ConfigStore>>>,
}

impl ConfigHandle {
    /// 读取已保存配置；缺失或无法解析时使用默认值并立即保存。
    pub fn load(mut store: Box<dyn ConfigStore>) -> Self {
        let loaded = match store.read() {
            Ok(Some(bytes)) => match serde_json::from_slice::<AppConfig>(&bytes) {
                Ok(config) => {
                    log::info!("Config loaded from storage");
                    Some(config)
                }
                Err(err) => {
                    log::warn!("Stored config unreadable ({}), using defaults", err);
                    None
                }
            },
            Ok(None) => {
                log::warn!("No stored config, using defaults");
                None
            }
            Err(err) => {
                log::warn!("Config storage read failed: {}", err);
                None
            }
        };

        let needs_save = loaded.is_none();
        let handle = Self {
            current: Arc::new(RwLock::new(loaded.unwrap_or_default())),
            store: Arc::new(Mutex::new(store)),
        };
        if needs_save {
            if let Err(err) = handle.save() {
                log::error!("Saving default config failed: {}", err);
            }
        }
        handle
    }

    pub fn snapshot(&self) -> AppConfig {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 修改并保存，返回修改后的快照。
    pub fn update<F>(&self, change: F) -> Result<AppConfig, ConfigError>
    where
        F: FnOnce(&mut AppConfig),
    {
        let updated = {
            let mut config = self.current.write().unwrap_or_else(PoisonError::into_inner);
            change(&mut config);
            config.clone()
        };
        self.save()?;
        Ok(updated)
    }

    fn save(&self) -> Result<(), ConfigError> {
        let bytes = serde_json::to_vec(&self.snapshot())?;
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        store.write(&bytes)?;
        log::info!("Config saved");
        Ok(())
    }
}
