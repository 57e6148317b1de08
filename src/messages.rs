//! MQTT JSON 报文（入站命令解析 + 出站报文结构）。

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::config::ConfigPatch;

const NO_REQUEST_ID: &str = "-";

/// 入站命令的动作类型。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    LightPulse,
    LightSwitch,
    Pulse,
    InvertedPulse,
    Switch,
    OpenDoor,
    OpenMaterialDoor,
    OpenSalesDoor,
    GetConfig,
    SetConfig,
    StatusNow,
    WriteCard,
    HasAccess,
    OtaUpdate,
    Unknown(String),
}

impl Command {
    pub fn from_action(action: &str) -> Self {
        match action {
            "pulsadorLuz" => Command::LightPulse,
            "interruptorLuz" => Command::LightSwitch,
            "pulsador" => Command::Pulse,
            "pulsadorInverso" => Command::InvertedPulse,
            "interruptor" => Command::Switch,
            "obrirPorta" => Command::OpenDoor,
            "obrirPortaMaterial" => Command::OpenMaterialDoor,
            "obrirPortaVenta" => Command::OpenSalesDoor,
            "getConfig" => Command::GetConfig,
            "setConfig" => Command::SetConfig,
            "status_now" => Command::StatusNow,
            "writeCard" => Command::WriteCard,
            "hasAccess" => Command::HasAccess,
            "otaUpdate" => Command::OtaUpdate,
            other => Command::Unknown(other.to_string()),
        }
    }
}

/// 解析后的入站命令。
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CommandRecord {
    #[serde(default, deserialize_with = "string_or_empty")]
    pub action: String,
    #[serde(default, deserialize_with = "lenient_int")]
    pub pin: i32,
    #[serde(default, deserialize_with = "lenient_int")]
    pub estat: i32,
    #[serde(default, rename = "idPista", deserialize_with = "lenient_int")]
    pub id_pista: i32,
    #[serde(
        default = "no_request_id",
        rename = "idPeticion",
        deserialize_with = "string_or_dash"
    )]
    pub id_peticion: String,
    #[serde(default, deserialize_with = "string_or_empty")]
    pub result: String,
    #[serde(default, rename = "type", deserialize_with = "string_or_empty")]
    pub kind: String,
    #[serde(default, deserialize_with = "optional_string")]
    pub url: Option<String>,
    /// 原始报文（writeCard / setConfig 需要再次解析）。
    #[serde(skip)]
    pub raw: String,
}

impl CommandRecord {
    pub fn parse(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let mut record: CommandRecord = serde_json::from_slice(bytes)?;
        record.raw = String::from_utf8_lossy(bytes).into_owned();
        Ok(record)
    }

    pub fn command(&self) -> Command {
        Command::from_action(&self.action)
    }
}

fn no_request_id() -> String {
    NO_REQUEST_ID.to_string()
}

fn string_or_empty<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => s,
        _ => String::new(),
    })
}

fn string_or_dash<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => s,
        _ => no_request_id(),
    })
}

fn optional_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

/// 数字或数字字符串（取开头的整数部分，解析不出为 0）。
fn lenient_int<'de, D: Deserializer<'de>>(d: D) -> Result<i32, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0) as i32,
        Value::String(s) => leading_int(&s),
        _ => 0,
    })
}

pub(crate) fn leading_int(text: &str) -> i32 {
    let text = text.trim_start();
    let (sign, digits) = match text.as_bytes().first() {
        Some(b'-') => (-1i64, &text[1..]),
        Some(b'+') => (1, &text[1..]),
        _ => (1, text),
    };
    let mut value: i64 = 0;
    for b in digits.bytes() {
        if !b.is_ascii_digit() {
            break;
        }
        value = (value * 10 + (b - b'0') as i64).min(i32::MAX as i64 + 1);
    }
    (sign * value).clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// writeCard 请求体。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteCardRequest {
    pub id_user: String,
    pub id_peticion: String,
}

impl WriteCardRequest {
    /// idUser 和 idPeticion 都必须是字符串。
    pub fn from_raw(raw: &str) -> Option<Self> {
        let root: Value = serde_json::from_str(raw).ok()?;
        Some(Self {
            id_user: root.get("idUser")?.as_str()?.to_string(),
            id_peticion: root.get("idPeticion")?.as_str()?.to_string(),
        })
    }
}

/// setConfig 请求体。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetConfigRequest {
    /// `config` 不是对象时为 None。
    pub patch: Option<ConfigPatch>,
    pub id_peticion: String,
}

impl SetConfigRequest {
    pub fn from_raw(raw: &str) -> Result<Self, serde_json::Error> {
        let root: Value = serde_json::from_str(raw)?;
        let id_peticion = root
            .get("idPeticion")
            .and_then(Value::as_str)
            .unwrap_or(NO_REQUEST_ID)
            .to_string();
        let patch = root.get("config").and_then(Value::as_object).map(|cfg| ConfigPatch {
            enable_cards: cfg.get("enableCards").and_then(Value::as_bool),
            enable_qr: cfg.get("enableQr").and_then(Value::as_bool),
            id_torno: match cfg.get("idTorno") {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            },
        });
        Ok(Self { patch, id_peticion })
    }
}

/// 刷卡 / 扫码后请求后台授权。
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequest<'a> {
    pub action: &'static str,
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub card_id: &'a str,
    pub user: &'a str,
    pub name: &'a str,
    pub id_torno: &'a str,
}

impl<'a> AccessRequest<'a> {
    pub fn new(kind: &'a str, card_id: &'a str, user: &'a str, name: &'a str, id_torno: &'a str) -> Self {
        Self {
            action: "getAccessTorn",
            kind,
            card_id,
            user,
            name,
            id_torno,
        }
    }
}

/// 授权结果执行确认。
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AccessConfirmation<'a> {
    pub action: &'static str,
    pub id_peticion: &'a str,
    pub ok: bool,
    #[serde(rename = "type")]
    pub kind: &'a str,
}

impl<'a> AccessConfirmation<'a> {
    pub fn new(id_peticion: &'a str, ok: bool, kind: &'a str) -> Self {
        Self {
            action: "retornoAccessTorn",
            id_peticion,
            ok,
            kind,
        }
    }
}

/// 写卡结果。
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct WriteCardResult<'a> {
    pub action: &'static str,
    pub ok: bool,
    pub lector: &'static str,
    pub uid: &'a str,
    pub user: &'a str,
    pub id_peticion: &'a str,
}

impl<'a> WriteCardResult<'a> {
    pub fn new(ok: bool, uid: &'a str, user: &'a str, id_peticion: &'a str) -> Self {
        Self {
            action: "retornoWriteCard",
            ok,
            lector: "OUT",
            uid,
            user,
            id_peticion,
        }
    }
}

/// 通用执行器应答；estat/idPista 以字符串形式出现。
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ActuatorResponse<'a> {
    pub action: &'static str,
    pub pin: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_pista: Option<String>,
    pub id_peticion: &'a str,
}

impl<'a> ActuatorResponse<'a> {
    pub fn plain(action: &'static str, pin: i32, id_peticion: &'a str) -> Self {
        Self {
            action,
            pin,
            estat: None,
            id_pista: None,
            id_peticion,
        }
    }

    pub fn with_pista(action: &'static str, pin: i32, estat: i32, id_pista: i32, id_peticion: &'a str) -> Self {
        Self {
            action,
            pin,
            estat: Some(estat.to_string()),
            id_pista: Some(id_pista.to_string()),
            id_peticion,
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ConfigReport<'a> {
    pub action: &'static str,
    pub enable_cards: bool,
    pub enable_qr: bool,
    pub id: &'a str,
    pub id_torno: &'a str,
    pub id_peticion: &'a str,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SetConfigAck<'a> {
    pub action: &'static str,
    pub ok: bool,
    pub enable_cards: bool,
    pub enable_qr: bool,
    pub id_peticion: &'a str,
    pub id: &'a str,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StatusReply<'a> {
    pub action: &'static str,
    pub online: bool,
    pub id: &'a str,
    pub id_peticion: &'a str,
}

/// 固件升级结果（本设备不支持远程升级，恒为失败）。
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct OtaResult<'a> {
    pub action: &'static str,
    pub ok: bool,
    pub id: &'a str,
    pub id_peticion: &'a str,
    pub url: &'a str,
}
