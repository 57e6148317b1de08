//! 入站命令分发。
//!
//! MQTT 事件回调只做解析和入队（otaUpdate 除外，直接应答）；单个分发线程按顺序
//! 取出命令并执行，执行器脉冲在该线程内阻塞完成。

use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::Arc;

use embedded_hal::delay::DelayNs;
use serde::Serialize;

use crate::actuator::{ActuatorError, Actuators, PinBank};
use crate::config::ConfigHandle;
use crate::gate::AccessCoordinator;
use crate::messages::{
    ActuatorResponse, Command, CommandRecord, ConfigReport, OtaResult, SetConfigAck, SetConfigRequest,
    StatusReply, WriteCardRequest, WriteCardResult,
};
use crate::outbound::{MessageSink, QoS};
use crate::reader::{CardWriter, WRITE_TIMEOUT_MS};

/// 入站命令队列容量。
pub const COMMAND_QUEUE_CAPACITY: usize = 64;

/// 编码并入队，失败只记日志。
fn publish<S: MessageSink, T: Serialize>(sink: &S, topic: &str, message: &T, qos: QoS, what: &str) {
    match serde_json::to_string(message) {
        Ok(payload) => {
            log::debug!("MQTT enqueue -> topic='{}' payload={}", topic, payload);
            if !sink.enqueue(topic, &payload, qos, false) {
                log::warn!("{} not queued", what);
            }
        }
        Err(err) => log::warn!("{} encode failed: {}", what, err),
    }
}

/// otaUpdate 的直接应答；缺少 url 时不应答。
pub fn ota_reply<'a>(record: &'a CommandRecord, device_id: &'a str) -> Option<OtaResult<'a>> {
    let Some(url) = record.url.as_deref() else {
        log::warn!("otaUpdate without 'url', ignored");
        return None;
    };
    log::info!("otaUpdate requested: url={} idPeticion={}", url, record.id_peticion);
    log::warn!("Firmware update over the air is not supported");
    Some(OtaResult {
        action: "retornoOta",
        ok: false,
        id: device_id,
        id_peticion: &record.id_peticion,
        url,
    })
}

/// MQTT 数据事件入口：解析报文，otaUpdate 直接应答，其余命令非阻塞入队。
pub fn route_inbound<S: MessageSink>(
    data: &[u8],
    config: &ConfigHandle,
    sink: &S,
    commands: &SyncSender<CommandRecord>,
) {
    let record = match CommandRecord::parse(data) {
        Ok(record) => record,
        Err(err) => {
            log::warn!("Command JSON parse error: {}", err);
            return;
        }
    };

    if record.command() == Command::OtaUpdate {
        let config = config.snapshot();
        if let Some(reply) = ota_reply(&record, &config.device_id) {
            publish(sink, &config.response_topic, &reply, QoS::AtLeastOnce, "retornoOta");
        }
        return;
    }

    match commands.try_send(record) {
        Ok(()) => {}
        Err(TrySendError::Full(record)) => {
            log::warn!("Command queue full, dropping '{}'", record.action);
        }
        Err(TrySendError::Disconnected(record)) => {
            log::warn!("Command dispatcher gone, dropping '{}'", record.action);
        }
    }
}

fn check(result: Result<(), ActuatorError>) {
    if let Err(err) = result {
        log::warn!("Actuator command failed: {}", err);
    }
}

/// 交互式开关：estat 2 视为 1。
fn switch_state(estat: i32) -> i32 {
    if estat == 2 {
        1
    } else {
        estat
    }
}

/// 命令分发器：独占执行器，按顺序处理命令。
pub struct Dispatcher<S, P, D> {
    sink: Arc<S>,
    actuators: Actuators<P, D>,
    config: ConfigHandle,
    coordinator: AccessCoordinator<S>,
    writer: CardWriter,
}

impl<S, P, D> Dispatcher<S, P, D>
where
    S: MessageSink,
    P: PinBank,
    D: DelayNs,
{
    pub fn new(
        sink: Arc<S>,
        actuators: Actuators<P, D>,
        config: ConfigHandle,
        coordinator: AccessCoordinator<S>,
        writer: CardWriter,
    ) -> Self {
        Self {
            sink,
            actuators,
            config,
            coordinator,
            writer,
        }
    }

    /// 消费命令队列直到发送端全部关闭。
    pub fn run(mut self, commands: Receiver<CommandRecord>) {
        log::info!("Command dispatcher started");
        while let Ok(record) = commands.recv() {
            self.dispatch(&record);
        }
        log::warn!("Command queue closed, dispatcher exiting");
    }

    pub fn dispatch(&mut self, record: &CommandRecord) {
        log::info!("Command '{}' pin={} idPeticion={}", record.action, record.pin, record.id_peticion);
        let config = self.config.snapshot();
        let timing = &config.timing;
        let polarity = &config.polarity;
        let pin = record.pin;

        match record.command() {
            Command::LightPulse => {
                check(self.actuators.pulse(pin, timing.push_ms, false));
                self.respond(&ActuatorResponse::with_pista(
                    "retornoLuz",
                    pin,
                    record.estat,
                    record.id_pista,
                    &record.id_peticion,
                ));
            }
            Command::LightSwitch => {
                let state = switch_state(record.estat);
                check(self.actuators.set_level(pin, state, polarity.switch));
                self.respond(&ActuatorResponse::with_pista(
                    "retornoLuz",
                    pin,
                    state,
                    record.id_pista,
                    &record.id_peticion,
                ));
            }
            Command::Pulse => {
                check(self.actuators.pulse(pin, timing.push_ms, false));
                self.respond(&ActuatorResponse::plain("retornoPulsador", pin, &record.id_peticion));
            }
            Command::InvertedPulse => {
                check(self.actuators.pulse(pin, timing.push_ms, polarity.horn));
                self.respond(&ActuatorResponse::plain("retornoPulsador", pin, &record.id_peticion));
            }
            Command::Switch => {
                let state = switch_state(record.estat);
                check(self.actuators.set_level(pin, state, polarity.switch));
                self.respond(&ActuatorResponse::plain("retornoInterruptor", pin, &record.id_peticion));
            }
            Command::OpenDoor => {
                check(self.actuators.pulse(pin, timing.push_ms, polarity.entry_door));
                self.respond(&ActuatorResponse::plain("retornoObrirPorta", pin, &record.id_peticion));
            }
            Command::OpenMaterialDoor => {
                check(
                    self.actuators
                        .pulse(pin, timing.material_door_ms, polarity.material_door),
                );
                self.respond(&ActuatorResponse::plain(
                    "retornoObrirPortaMaterial",
                    pin,
                    &record.id_peticion,
                ));
            }
            Command::OpenSalesDoor => {
                check(self.actuators.pulse(pin, timing.push_ms, false));
                self.respond(&ActuatorResponse::plain("retornoObrirPortaVenta", pin, &record.id_peticion));
            }
            Command::GetConfig => {
                let report = ConfigReport {
                    action: "retornoConfig",
                    enable_cards: config.enable_cards,
                    enable_qr: config.enable_qr,
                    id: &config.device_id,
                    id_torno: &config.id_torno,
                    id_peticion: &record.id_peticion,
                };
                publish(&*self.sink, &config.response_topic, &report, QoS::AtLeastOnce, "retornoConfig");
            }
            Command::SetConfig => self.set_config(record),
            Command::StatusNow => {
                let reply = StatusReply {
                    action: "status",
                    online: true,
                    id: &config.device_id,
                    id_peticion: &record.id_peticion,
                };
                publish(&*self.sink, &config.response_topic, &reply, QoS::AtMostOnce, "status");
            }
            Command::WriteCard => self.write_card(record),
            Command::HasAccess => {
                self.coordinator.handle_decision(record, &mut self.actuators);
            }
            Command::OtaUpdate => {
                if let Some(reply) = ota_reply(record, &config.device_id) {
                    publish(&*self.sink, &config.response_topic, &reply, QoS::AtLeastOnce, "retornoOta");
                }
            }
            Command::Unknown(action) => log::warn!("Unknown action '{}'", action),
        }
    }

    fn respond(&self, response: &ActuatorResponse<'_>) {
        let topic = self.config.snapshot().response_topic;
        publish(&*self.sink, &topic, response, QoS::AtMostOnce, response.action);
    }

    fn set_config(&mut self, record: &CommandRecord) {
        let request = match SetConfigRequest::from_raw(&record.raw) {
            Ok(request) => request,
            Err(err) => {
                log::warn!("setConfig: invalid JSON: {}", err);
                return;
            }
        };

        let config = match &request.patch {
            Some(patch) => match self.config.update(|cfg| patch.apply(cfg)) {
                Ok(updated) => updated,
                Err(err) => {
                    log::error!("setConfig: saving config failed: {}", err);
                    self.config.snapshot()
                }
            },
            None => {
                log::warn!("setConfig: 'config' is not an object");
                self.config.snapshot()
            }
        };

        let ack = SetConfigAck {
            action: "retornoSetConfig",
            ok: true,
            enable_cards: config.enable_cards,
            enable_qr: config.enable_qr,
            id_peticion: &request.id_peticion,
            id: &config.device_id,
        };
        publish(&*self.sink, &config.response_topic, &ack, QoS::AtLeastOnce, "retornoSetConfig");
    }

    fn write_card(&mut self, record: &CommandRecord) {
        let Some(request) = WriteCardRequest::from_raw(&record.raw) else {
            log::warn!("writeCard: 'idUser' or 'idPeticion' missing");
            return;
        };
        log::info!(
            "writeCard: idUser='{}' idPeticion='{}'",
            request.id_user,
            request.id_peticion
        );

        let written = self.writer.write(&request.id_user, WRITE_TIMEOUT_MS);
        let uid = written.map(|uid| uid.to_hex()).unwrap_or_default();
        let result = WriteCardResult::new(written.is_some(), &uid, &request.id_user, &request.id_peticion);
        let topic = self.config.snapshot().response_topic;
        publish(&*self.sink, &topic, &result, QoS::AtLeastOnce, "retornoWriteCard");
    }
}
