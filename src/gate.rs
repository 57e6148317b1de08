//! 单请求在途闸门 + 授权结果处理。
//!
//! 三个输入源（入口读卡器、出口读卡器、二维码）共用一把闸门：同一时刻最多一个
//! getAccessTorn 在等待后台回复。收到任何 hasAccess 都会释放闸门；回复丢失时
//! 由下一次获取尝试按超时强制清除。

use std::cell::Cell;
use std::sync::Arc;

use critical_section::Mutex;
use embedded_hal::delay::DelayNs;

use crate::actuator::{ActuatorError, Actuators, PinBank};
use crate::config::{AppConfig, ConfigHandle};
use crate::messages::{AccessConfirmation, AccessRequest, CommandRecord};
use crate::outbound::{MessageSink, QoS};

/// 在途请求的超时阈值。
pub const STALE_AFTER_MS: u64 = 3000;

/// 授权请求来源。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceType {
    In,
    Out,
    Qr,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::In => "IN",
            SourceType::Out => "OUT",
            SourceType::Qr => "QR",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "IN" => Some(SourceType::In),
            "OUT" => Some(SourceType::Out),
            "QR" => Some(SourceType::Qr),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Default)]
struct GateState {
    held: bool,
    since_us: u64,
}

/// 临界区保护的在途标记；不阻塞任务，也从不跨 I/O 持有。
pub struct AccessGate {
    state: Mutex<Cell<GateState>>,
    stale_after_us: u64,
}

impl Default for AccessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessGate {
    pub fn new() -> Self {
        Self::with_timeout_ms(STALE_AFTER_MS)
    }

    pub fn with_timeout_ms(stale_after_ms: u64) -> Self {
        Self {
            state: Mutex::new(Cell::new(GateState::default())),
            stale_after_us: stale_after_ms * 1000,
        }
    }

    /// 检查并占用；持有超时的旧占用先被清除。
    pub fn try_acquire(&self, now_us: u64) -> bool {
        critical_section::with(|cs| {
            let cell = self.state.borrow(cs);
            let mut state = cell.get();
            if state.held && now_us.saturating_sub(state.since_us) > self.stale_after_us {
                state.held = false;
            }
            if state.held {
                cell.set(state);
                return false;
            }
            cell.set(GateState {
                held: true,
                since_us: now_us,
            });
            true
        })
    }

    pub fn release(&self) {
        critical_section::with(|cs| {
            let cell = self.state.borrow(cs);
            let mut state = cell.get();
            state.held = false;
            cell.set(state);
        });
    }

    pub fn is_held(&self) -> bool {
        critical_section::with(|cs| self.state.borrow(cs).get().held)
    }
}

/// 后台授权结果：忽略大小写的 "true"/"ok"，或严格的 "1"。
pub fn is_granted(result: &str) -> bool {
    result.eq_ignore_ascii_case("true") || result == "1" || result.eq_ignore_ascii_case("ok")
}

/// 一次提交的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Offer {
    Published,
    GateBusy,
    QueueFull,
}

/// 闸门协调器：所有输入源经此申请后台授权。
pub struct AccessCoordinator<S> {
    gate: Arc<AccessGate>,
    sink: Arc<S>,
    config: ConfigHandle,
}

impl<S> Clone for AccessCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            gate: self.gate.clone(),
            sink: self.sink.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: MessageSink> AccessCoordinator<S> {
    pub fn new(gate: Arc<AccessGate>, sink: Arc<S>, config: ConfigHandle) -> Self {
        Self { gate, sink, config }
    }

    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    /// 去抖通过的标识：占用闸门并发出 getAccessTorn。
    pub fn offer(&self, source: SourceType, id: &str, user: &str, now_us: u64) -> Offer {
        if !self.gate.try_acquire(now_us) {
            log::warn!("{} -> {} ignored, waiting for hasAccess", source.as_str(), id);
            return Offer::GateBusy;
        }

        let config = self.config.snapshot();
        let request = AccessRequest::new(source.as_str(), id, user, &config.device_id, &config.id_torno);
        let accepted = match serde_json::to_string(&request) {
            Ok(payload) => self
                .sink
                .enqueue(&config.response_topic, &payload, QoS::AtLeastOnce, false),
            Err(err) => {
                log::warn!("getAccessTorn encode failed: {}", err);
                false
            }
        };

        if !accepted {
            // 未入队的请求不会有回复
            self.gate.release();
            log::warn!("{} -> {} dropped, getAccessTorn not queued", source.as_str(), id);
            return Offer::QueueFull;
        }

        log::info!("{} -> id={} user='{}' (published)", source.as_str(), id, user);
        Offer::Published
    }

    /// hasAccess：释放闸门，开闸或鸣叫，始终回 retornoAccessTorn。
    pub fn handle_decision<P: PinBank, D: DelayNs>(
        &self,
        record: &CommandRecord,
        actuators: &mut Actuators<P, D>,
    ) -> bool {
        log::info!(
            "hasAccess: result={} type={} idPeticion={}",
            record.result,
            record.kind,
            record.id_peticion
        );
        self.gate.release();

        let granted = is_granted(&record.result);
        let config = self.config.snapshot();
        let outcome = if granted {
            match SourceType::parse(&record.kind) {
                Some(SourceType::In) => {
                    log::info!("Access granted (IN), opening entry");
                    actuators.pulse(config.outputs.relay_in, config.timing.relay_ms, config.polarity.relay_in)
                }
                Some(SourceType::Out) => {
                    log::info!("Access granted (OUT), opening exit");
                    actuators.pulse(config.outputs.relay_out, config.timing.relay_ms, config.polarity.relay_out)
                }
                _ => {
                    log::warn!("hasAccess granted for unhandled type '{}'", record.kind);
                    Ok(())
                }
            }
        } else {
            log::info!("Access denied, sounding buzzer");
            double_beep(actuators, &config)
        };
        if let Err(err) = outcome {
            log::warn!("hasAccess actuator failed: {}", err);
        }

        let confirmation = AccessConfirmation::new(&record.id_peticion, granted, &record.kind);
        match serde_json::to_string(&confirmation) {
            Ok(payload) => {
                if !self
                    .sink
                    .enqueue(&config.response_topic, &payload, QoS::AtLeastOnce, false)
                {
                    log::warn!("retornoAccessTorn not queued");
                }
            }
            Err(err) => log::warn!("retornoAccessTorn encode failed: {}", err),
        }
        granted
    }
}

fn double_beep<P: PinBank, D: DelayNs>(
    actuators: &mut Actuators<P, D>,
    config: &AppConfig,
) -> Result<(), ActuatorError> {
    let buzzer = config.outputs.buzzer;
    actuators.pulse(buzzer, config.timing.buzzer_ms, config.polarity.buzzer)?;
    actuators.pause_ms(config.timing.buzzer_gap_ms);
    actuators.pulse(buzzer, config.timing.buzzer_ms, config.polarity.buzzer)
}
