//! 双读卡器轮询任务。
//!
//! 一个任务顺序轮询入口、出口两片 RC522：寻卡、防冲突、选卡、读 8 块，去抖后交给
//! 闸门协调器。出口读卡器同时承担写卡任务：有待处理的 `WriteJob` 时，每轮用出口
//! 读卡器尝试写卡而不是读卡，直到成功或超时。

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use embedded_hal::delay::DelayNs;

use crate::block::{decode_text, encode_text, USER_BLOCK};
use crate::clock;
use crate::debounce::Debounce;
use crate::gate::{AccessCoordinator, Offer, SourceType};
use crate::link::LinkStatus;
use crate::outbound::MessageSink;
use crate::picc::{Mfrc522, PiccError, Uid};
use crate::status::ReaderHealth;
use crate::transport::{ReaderRole, RegisterBus};

/// 两轮完整轮询之间的间隔。
pub const POLL_INTERVAL_MS: u32 = 60;
/// 消息总线未就绪时的空闲间隔。
pub const OFFLINE_IDLE_MS: u32 = 500;
/// writeCard 等待出口刷卡的时限。
pub const WRITE_TIMEOUT_MS: u32 = 7000;
/// 调用方在时限之外多等的余量。
const WRITE_REPLY_MARGIN_MS: u32 = 500;

/// 写卡结果：成功带卡号，超时为 None。
pub type WriteReply = Option<Uid>;

/// 交给轮询任务的写卡请求。
pub struct WriteJob {
    pub text: String,
    pub deadline_us: u64,
    reply: Sender<WriteReply>,
}

impl WriteJob {
    pub fn finish(self, outcome: WriteReply) {
        // 调用方可能已超时离开
        let _ = self.reply.send(outcome);
    }
}

/// 写卡请求入口（命令分发线程持有）。
#[derive(Clone)]
pub struct CardWriter {
    tx: Option<Sender<WriteJob>>,
}

impl CardWriter {
    pub fn channel() -> (Self, Receiver<WriteJob>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// 读卡功能未启用时使用：所有写卡立即失败。
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// 提交写卡任务，返回结果通道；轮询任务不存在时返回 None。
    pub fn submit(&self, text: &str, deadline_us: u64) -> Option<Receiver<WriteReply>> {
        let tx = self.tx.as_ref()?;
        let (reply, rx) = mpsc::channel();
        let job = WriteJob {
            text: text.to_string(),
            deadline_us,
            reply,
        };
        tx.send(job).ok()?;
        Some(rx)
    }

    /// 阻塞等待出口读卡器完成写卡。
    pub fn write(&self, text: &str, timeout_ms: u32) -> WriteReply {
        let deadline_us = clock::now_us() + timeout_ms as u64 * 1000;
        let Some(rx) = self.submit(text, deadline_us) else {
            log::warn!("writeCard: card reader task not running");
            return None;
        };
        let wait = Duration::from_millis((timeout_ms + WRITE_REPLY_MARGIN_MS) as u64);
        rx.recv_timeout(wait).ok().flatten()
    }
}

/// 一个读卡器在一轮中的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Poll {
    /// 场内无卡。
    Idle,
    /// 去抖窗口内的重复卡号。
    Suppressed,
    Offered(Offer),
    /// 卡片交互失败，本轮放弃。
    Failed,
    /// 出口读卡器正在执行写卡任务。
    Writing,
}

struct Station<B> {
    chip: Mfrc522<B>,
    debounce: Debounce,
}

fn source_of(role: ReaderRole) -> SourceType {
    match role {
        ReaderRole::In => SourceType::In,
        ReaderRole::Out => SourceType::Out,
    }
}

/// REQA → 防冲突 → SELECT。
fn identify<B: RegisterBus>(chip: &Mfrc522<B>) -> Result<Uid, PiccError> {
    chip.request_a()?;
    let uid = chip.anticollision()?;
    chip.select(&uid)?;
    Ok(uid)
}

impl<B: RegisterBus> Station<B> {
    fn new(chip: Mfrc522<B>) -> Self {
        Self {
            chip,
            debounce: Debounce::for_cards(),
        }
    }

    fn scan<S: MessageSink>(
        &mut self,
        coordinator: &AccessCoordinator<S>,
        health: &ReaderHealth,
        now_us: u64,
    ) -> Poll {
        let role = self.chip.role();
        let uid = match identify(&self.chip) {
            Ok(uid) => uid,
            Err(err) if err.is_no_card() => {
                self.debounce.mark_absent();
                return Poll::Idle;
            }
            Err(err) => {
                log::warn!("{}: card select failed: {}", role.as_str(), err);
                health.record(role, false);
                self.debounce.mark_absent();
                return Poll::Failed;
            }
        };

        // 8 块读不出时仍按卡号申请授权
        let user = match self.chip.read_block(USER_BLOCK, &uid) {
            Ok(raw) => decode_text(&raw),
            Err(err) => {
                log::warn!("{}: block {} unreadable for {}: {}", role.as_str(), USER_BLOCK, uid, err);
                String::new()
            }
        };
        health.record(role, true);

        let card_id = uid.to_hex();
        if !self.debounce.should_publish(&card_id, now_us) {
            return Poll::Suppressed;
        }
        Poll::Offered(coordinator.offer(source_of(role), &card_id, &user, now_us))
    }

    fn try_write(&mut self, text: &str, health: &ReaderHealth) -> Result<Uid, PiccError> {
        let role = self.chip.role();
        let result = identify(&self.chip)
            .and_then(|uid| self.chip.write_block(USER_BLOCK, &uid, &encode_text(text)).map(|_| uid));
        match &result {
            Ok(uid) => {
                log::info!("{}: wrote '{}' to block {} of {}", role.as_str(), text, USER_BLOCK, uid);
                health.record(role, true);
            }
            Err(err) if err.is_no_card() => {}
            Err(err) => {
                log::warn!("{}: card write failed: {}", role.as_str(), err);
                health.record(role, false);
            }
        }
        result
    }
}

/// 轮询任务：独占两片芯片及其去抖状态。
pub struct ReaderPoller<B, S> {
    entry: Station<B>,
    exit: Station<B>,
    coordinator: AccessCoordinator<S>,
    link: LinkStatus,
    health: Arc<ReaderHealth>,
    jobs: Receiver<WriteJob>,
    pending: Option<WriteJob>,
}

impl<B: RegisterBus, S: MessageSink> ReaderPoller<B, S> {
    pub fn new(
        entry: Mfrc522<B>,
        exit: Mfrc522<B>,
        coordinator: AccessCoordinator<S>,
        link: LinkStatus,
        health: Arc<ReaderHealth>,
        jobs: Receiver<WriteJob>,
    ) -> Self {
        Self {
            entry: Station::new(entry),
            exit: Station::new(exit),
            coordinator,
            link,
            health,
            jobs,
            pending: None,
        }
    }

    /// 一轮完整轮询：先入口，后出口。
    pub fn poll_cycle(&mut self, now_us: u64) -> (Poll, Poll) {
        self.take_job(now_us);
        let entry = self.entry.scan(&self.coordinator, &self.health, now_us);
        let exit = match self.pending.take() {
            Some(job) => {
                match self.exit.try_write(&job.text, &self.health) {
                    Ok(uid) => job.finish(Some(uid)),
                    Err(_) => self.pending = Some(job),
                }
                Poll::Writing
            }
            None => self.exit.scan(&self.coordinator, &self.health, now_us),
        };
        (entry, exit)
    }

    /// 取新任务并让过期任务以失败结束。
    fn take_job(&mut self, now_us: u64) {
        if let Some(job) = self.pending.take() {
            if now_us >= job.deadline_us {
                log::warn!("writeCard: no card on OUT reader before deadline");
                job.finish(None);
            } else {
                self.pending = Some(job);
            }
        }
        if self.pending.is_none() {
            match self.jobs.try_recv() {
                Ok(job) => {
                    log::info!("writeCard: waiting for card on OUT reader");
                    self.pending = Some(job);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            }
        }
    }

    pub fn is_writing(&self) -> bool {
        self.pending.is_some()
    }

    pub fn run<D: DelayNs>(mut self, delay: &mut D) -> ! {
        log::info!("Card poll loop started");
        loop {
            let now_us = clock::now_us();
            if !self.link.is_transport_ready() {
                self.take_job(now_us);
                delay.delay_ms(OFFLINE_IDLE_MS);
                continue;
            }
            self.poll_cycle(now_us);
            delay.delay_ms(POLL_INTERVAL_MS);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::testing::actuators;
    use crate::config::{ConfigHandle, MemoryStore};
    use crate::gate::AccessGate;
    use crate::messages::CommandRecord;
    use crate::outbound::RecordingSink;
    use crate::sim::{Fault, SimBus, SimCard};
    use crate::transport::ReaderHandle;
    use serde_json::json;

    const MS: u64 = 1000;
    const ALICE: [u8; 4] = [0x04, 0xA1, 0x3B, 0xFF];
    const BOB: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];

    struct Rig {
        bus: Arc<SimBus>,
        sink: Arc<RecordingSink>,
        coordinator: AccessCoordinator<RecordingSink>,
        health: Arc<ReaderHealth>,
        poller: ReaderPoller<SimBus, RecordingSink>,
        writer: CardWriter,
    }

    fn rig() -> Rig {
        let bus = Arc::new(SimBus::new());
        let sink = Arc::new(RecordingSink::new());
        let config = ConfigHandle::load(Box::new(MemoryStore::default()));
        let coordinator = AccessCoordinator::new(Arc::new(AccessGate::new()), sink.clone(), config);
        let health = Arc::new(ReaderHealth::default());
        let (writer, jobs) = CardWriter::channel();
        let poller = ReaderPoller::new(
            Mfrc522::new(ReaderHandle::new(ReaderRole::In, bus.clone())),
            Mfrc522::new(ReaderHandle::new(ReaderRole::Out, bus.clone())),
            coordinator.clone(),
            LinkStatus::new(),
            health.clone(),
            jobs,
        );
        Rig {
            bus,
            sink,
            coordinator,
            health,
            poller,
            writer,
        }
    }

    fn card_with_user(uid: [u8; 4], user: &str) -> SimCard {
        let mut card = SimCard::new(uid);
        card.set_block(USER_BLOCK, encode_text(user));
        card
    }

    #[test]
    fn empty_field_is_idle() {
        let mut rig = rig();
        assert_eq!(rig.poller.poll_cycle(0), (Poll::Idle, Poll::Idle));
        assert!(rig.sink.messages().is_empty());
    }

    #[test]
    fn new_card_requests_access_with_block_text() {
        let mut rig = rig();
        rig.bus.present(ReaderRole::In, card_with_user(ALICE, "ALICE"));

        let (entry, _) = rig.poller.poll_cycle(0);
        assert_eq!(entry, Poll::Offered(Offer::Published));
        let payload = &rig.sink.payloads()[0];
        assert_eq!(payload["type"], json!("IN"));
        assert_eq!(payload["cardId"], json!("04A13BFF"));
        assert_eq!(payload["user"], json!("ALICE"));
        assert!(!rig.bus.crypto_active(ReaderRole::In));
    }

    #[test]
    fn held_card_is_debounced_then_hits_busy_gate() {
        let mut rig = rig();
        rig.bus.present(ReaderRole::In, card_with_user(ALICE, "ALICE"));

        rig.poller.poll_cycle(0);
        assert_eq!(rig.poller.poll_cycle(60 * MS).0, Poll::Suppressed);
        assert_eq!(rig.poller.poll_cycle(899 * MS).0, Poll::Suppressed);
        // 窗口已过，但前一请求仍在途
        assert_eq!(rig.poller.poll_cycle(950 * MS).0, Poll::Offered(Offer::GateBusy));
        assert_eq!(rig.sink.messages().len(), 1);
    }

    #[test]
    fn removed_card_keeps_last_id_for_debounce() {
        let mut rig = rig();
        rig.bus.present(ReaderRole::In, card_with_user(ALICE, "ALICE"));
        rig.poller.poll_cycle(0);
        rig.coordinator.gate().release();

        rig.bus.remove(ReaderRole::In);
        assert_eq!(rig.poller.poll_cycle(100 * MS).0, Poll::Idle);
        assert!(!rig.poller.entry.debounce.is_present());
        assert_eq!(rig.poller.entry.debounce.last_id(), "04A13BFF");

        rig.bus.present(ReaderRole::In, card_with_user(ALICE, "ALICE"));
        assert_eq!(rig.poller.poll_cycle(200 * MS).0, Poll::Suppressed);
        assert_eq!(rig.poller.poll_cycle(1_000 * MS).0, Poll::Offered(Offer::Published));
    }

    #[test]
    fn unreadable_block_still_requests_access() {
        let mut rig = rig();
        let mut card = SimCard::new(BOB);
        card.accept_key_a = false;
        card.accept_key_b = false;
        rig.bus.present(ReaderRole::Out, card);

        assert_eq!(rig.poller.poll_cycle(0).1, Poll::Offered(Offer::Published));
        let payload = &rig.sink.payloads()[0];
        assert_eq!(payload["cardId"], json!("DEADBEEF"));
        assert_eq!(payload["user"], json!(""));
        assert!(rig.health.is_ok(ReaderRole::Out));
    }

    #[test]
    fn malformed_block_read_yields_empty_user() {
        let mut rig = rig();
        rig.bus.present(ReaderRole::In, card_with_user(ALICE, "ALICE"));
        rig.bus.inject(ReaderRole::In, Fault::ShortRead(10));

        rig.poller.poll_cycle(0);
        assert_eq!(rig.sink.payloads()[0]["user"], json!(""));
    }

    #[test]
    fn bus_failure_marks_reader_unhealthy() {
        let mut rig = rig();
        rig.bus.present(ReaderRole::In, card_with_user(ALICE, "ALICE"));
        rig.bus.break_bus(ReaderRole::In);

        assert_eq!(rig.poller.poll_cycle(0).0, Poll::Failed);
        assert!(!rig.health.is_ok(ReaderRole::In));
        assert!(rig.health.is_ok(ReaderRole::Out));
        assert!(rig.sink.messages().is_empty());
    }

    #[test]
    fn entry_grant_end_to_end() {
        let mut rig = rig();
        let (mut act, pins) = actuators();
        rig.bus.present(ReaderRole::In, card_with_user(ALICE, "ALICE"));

        rig.poller.poll_cycle(0);
        assert!(rig.coordinator.gate().is_held());
        assert_eq!(rig.sink.payloads()[0]["action"], json!("getAccessTorn"));

        let decision = CommandRecord::parse(
            br#"{"action":"hasAccess","result":"true","type":"IN","idPeticion":"p-1"}"#,
        )
        .unwrap();
        assert!(rig.coordinator.handle_decision(&decision, &mut act));

        assert!(!rig.coordinator.gate().is_held());
        assert_eq!(pins.levels(), vec![(19, true, 0), (19, false, 2000)]);
        assert_eq!(
            rig.sink.payloads()[1],
            json!({"action":"retornoAccessTorn","idPeticion":"p-1","ok":true,"type":"IN"})
        );
    }

    #[test]
    fn exit_card_dropped_while_entry_outstanding() {
        let mut rig = rig();
        let (mut act, _pins) = actuators();
        rig.bus.present(ReaderRole::In, card_with_user(ALICE, "ALICE"));
        rig.bus.present(ReaderRole::Out, card_with_user(BOB, "BOB"));

        let (entry, exit) = rig.poller.poll_cycle(0);
        assert_eq!(entry, Poll::Offered(Offer::Published));
        assert_eq!(exit, Poll::Offered(Offer::GateBusy));
        assert_eq!(rig.sink.messages().len(), 1);

        let decision =
            CommandRecord::parse(br#"{"action":"hasAccess","result":"no","type":"IN"}"#).unwrap();
        rig.coordinator.handle_decision(&decision, &mut act);

        // 出口卡号已计入去抖，窗口过后才会再次申请
        rig.bus.remove(ReaderRole::In);
        assert_eq!(rig.poller.poll_cycle(500 * MS).1, Poll::Suppressed);
        assert_eq!(rig.poller.poll_cycle(1_000 * MS).1, Poll::Offered(Offer::Published));
        assert_eq!(rig.sink.payloads().last().unwrap()["type"], json!("OUT"));
    }

    #[test]
    fn write_job_waits_for_card_then_writes() {
        let mut rig = rig();
        let reply = rig.writer.submit("CAROL", 7_000 * MS).unwrap();

        assert_eq!(rig.poller.poll_cycle(0).1, Poll::Writing);
        assert!(rig.poller.is_writing());
        assert!(reply.try_recv().is_err());

        rig.bus.present(ReaderRole::Out, SimCard::new(BOB));
        assert_eq!(rig.poller.poll_cycle(100 * MS).1, Poll::Writing);
        assert_eq!(reply.try_recv().unwrap(), Some(Uid(BOB)));
        assert!(!rig.poller.is_writing());
        assert_eq!(
            rig.bus.card_block(ReaderRole::Out, USER_BLOCK),
            Some(*b"CAROL           ")
        );
        // 写卡期间出口不申请授权
        assert!(rig.sink.messages().is_empty());
    }

    #[test]
    fn write_job_times_out() {
        let mut rig = rig();
        let reply = rig.writer.submit("CAROL", 7_000 * MS).unwrap();

        rig.poller.poll_cycle(0);
        rig.poller.poll_cycle(6_999 * MS);
        assert!(reply.try_recv().is_err());
        rig.poller.poll_cycle(7_000 * MS);
        assert_eq!(reply.try_recv().unwrap(), None);
        assert!(!rig.poller.is_writing());
    }

    #[test]
    fn nacked_write_is_retried() {
        let mut rig = rig();
        rig.bus.present(ReaderRole::Out, SimCard::new(BOB));
        rig.bus.inject(ReaderRole::Out, Fault::WriteNak);
        let reply = rig.writer.submit("DAVE", 7_000 * MS).unwrap();

        rig.poller.poll_cycle(0);
        assert!(reply.try_recv().is_err());
        assert!(!rig.health.is_ok(ReaderRole::Out));

        rig.poller.poll_cycle(100 * MS);
        assert_eq!(reply.try_recv().unwrap(), Some(Uid(BOB)));
        assert!(rig.health.is_ok(ReaderRole::Out));
    }

    #[test]
    fn disabled_writer_fails_immediately() {
        assert_eq!(CardWriter::disabled().write("X", 10), None);
    }
}
