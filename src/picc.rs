//! MFRC522 读卡芯片 + MIFARE Classic 卡片协议引擎。
//!
//! 所有等待均为迭代次数上限的自旋轮询（每次迭代一次 SPI 寄存器交换），
//! 不使用墙钟超时。

use std::fmt;

use embedded_hal::delay::DelayNs;

use crate::transport::{BusError, ReaderHandle, ReaderRole, RegisterBus};

/// 芯片寄存器地址。
pub mod reg {
    pub const COMMAND: u8 = 0x01;
    pub const COM_IEN: u8 = 0x02;
    pub const COM_IRQ: u8 = 0x04;
    pub const DIV_IRQ: u8 = 0x05;
    pub const ERROR: u8 = 0x06;
    pub const STATUS2: u8 = 0x08;
    pub const FIFO_DATA: u8 = 0x09;
    pub const FIFO_LEVEL: u8 = 0x0A;
    pub const CONTROL: u8 = 0x0C;
    pub const BIT_FRAMING: u8 = 0x0D;
    pub const MODE: u8 = 0x11;
    pub const TX_CONTROL: u8 = 0x14;
    pub const TX_ASK: u8 = 0x15;
    pub const CRC_RESULT_H: u8 = 0x21;
    pub const CRC_RESULT_L: u8 = 0x22;
    pub const T_MODE: u8 = 0x2A;
    pub const T_PRESCALER: u8 = 0x2B;
    pub const T_RELOAD_H: u8 = 0x2C;
    pub const T_RELOAD_L: u8 = 0x2D;
    pub const VERSION: u8 = 0x37;
}

/// 读卡芯片（PCD）命令。
pub mod pcd {
    pub const IDLE: u8 = 0x00;
    pub const CALC_CRC: u8 = 0x03;
    pub const TRANSCEIVE: u8 = 0x0C;
    pub const AUTHENT: u8 = 0x0E;
    pub const SOFT_RESET: u8 = 0x0F;
}

/// 卡片（PICC）命令。
pub mod picc_cmd {
    pub const REQA: u8 = 0x26;
    pub const SELECT_CL1: u8 = 0x93;
    pub const ANTICOLL_NVB: u8 = 0x20;
    pub const SELECT_NVB: u8 = 0x70;
    pub const READ: u8 = 0x30;
    pub const WRITE: u8 = 0xA0;
}

// ComIrq 位
const IRQ_SET1: u8 = 0x80;
const IRQ_TIMER: u8 = 0x01;
// DivIrq.CRCIRq
const DIV_IRQ_CRC: u8 = 0x04;
// FIFOLevel.FlushBuffer
const FIFO_FLUSH: u8 = 0x80;
// BitFraming.StartSend
const START_SEND: u8 = 0x80;
// Status2.MFCrypto1On
const CRYPTO1_ON: u8 = 0x08;
// ErrorReg: BufferOvfl | CollErr | ParityErr | ProtocolErr
const ERROR_MASK: u8 = 0x1B;

const FIFO_CAPACITY: usize = 64;

/// 收发命令的轮询上限。每次迭代一次 16 位 SPI 交换（1 MHz 下约 20 µs），
/// 2000 次约 40 ms，覆盖芯片定时器 TReload=30 时约 15 ms 的无应答超时。
pub const TRANSCEIVE_POLL_BUDGET: u16 = 2000;

/// CRC 协处理器的轮询上限。18 字节的 CRC 在芯片内几微秒完成，255 次约 5 ms。
pub const CRC_POLL_BUDGET: u16 = 255;

/// 复位后芯片振荡器稳定时间。
pub const SOFT_RESET_SETTLE_MS: u32 = 50;

/// 出厂默认密钥（6 × 0xFF）。
pub const DEFAULT_KEY: [u8; 6] = [0xFF; 6];

/// 读写块的有效数据长度。
pub const BLOCK_SIZE: usize = 16;

const CRC_LEN: usize = 2;
const ACK_NIBBLE: u8 = 0x0A;

/// 协议层错误分类。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PiccError {
    #[error("no card in field")]
    NoCard,
    #[error("poll budget exhausted waiting for the reader")]
    BusTimeout,
    #[error("reader error register 0x{0:02X}")]
    ProtocolError(u8),
    #[error("authentication failed with key A and key B")]
    AuthFailed,
    #[error("malformed response ({bytes} bytes, {bits} bits)")]
    MalformedResponse { bytes: usize, bits: usize },
    #[error("card did not acknowledge write")]
    WriteNotAcknowledged,
    #[error(transparent)]
    Bus(#[from] BusError),
}

impl PiccError {
    /// 无卡属于预期情况，不计为故障。
    pub fn is_no_card(&self) -> bool {
        matches!(self, PiccError::NoCard)
    }
}

/// 4 字节卡号。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Uid(pub [u8; 4]);

impl Uid {
    /// 块校验字节（4 个卡号字节异或）。
    pub fn bcc(&self) -> u8 {
        self.0.iter().fold(0, |acc, b| acc ^ b)
    }

    /// 8 位大写十六进制，无分隔符。
    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

/// 认证密钥类型。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyKind {
    A,
    B,
}

impl KeyKind {
    fn command(self) -> u8 {
        match self {
            KeyKind::A => 0x60,
            KeyKind::B => 0x61,
        }
    }
}

/// 一次收发得到的 FIFO 数据和有效位数。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub bits: usize,
}

/// 单片 MFRC522 的协议驱动。
pub struct Mfrc522<B> {
    reader: ReaderHandle<B>,
}

impl<B: RegisterBus> Mfrc522<B> {
    pub fn new(reader: ReaderHandle<B>) -> Self {
        Self { reader }
    }

    pub fn role(&self) -> ReaderRole {
        self.reader.role()
    }

    /// 软复位 + 定时器/调制/CRC 预置 + 打开天线，返回 VersionReg。
    pub fn init<D: DelayNs>(&self, delay: &mut D) -> Result<u8, PiccError> {
        self.reader.write(reg::COMMAND, pcd::SOFT_RESET)?;
        delay.delay_ms(SOFT_RESET_SETTLE_MS);

        // TAuto=1，预分频 0xD3E，约 0.5 ms/tick；重载 30 → 约 15 ms 无应答超时
        self.reader.write(reg::T_MODE, 0x8D)?;
        self.reader.write(reg::T_PRESCALER, 0x3E)?;
        self.reader.write(reg::T_RELOAD_L, 30)?;
        self.reader.write(reg::T_RELOAD_H, 0)?;
        // 100% ASK
        self.reader.write(reg::TX_ASK, 0x40)?;
        // CRC 预置值 0x6363
        self.reader.write(reg::MODE, 0x3D)?;
        self.antenna_on()?;

        let version = self.version()?;
        log::info!("[{}] RC522 VersionReg=0x{:02X}", self.role().as_str(), version);
        Ok(version)
    }

    pub fn version(&self) -> Result<u8, PiccError> {
        Ok(self.reader.read(reg::VERSION)?)
    }

    fn antenna_on(&self) -> Result<(), PiccError> {
        let value = self.reader.read(reg::TX_CONTROL)?;
        if value & 0x03 != 0x03 {
            self.reader.write(reg::TX_CONTROL, value | 0x03)?;
        }
        Ok(())
    }

    /// REQA：7 位短帧，期望 2 字节 ATQA。
    pub fn request_a(&self) -> Result<[u8; 2], PiccError> {
        self.reader.write(reg::BIT_FRAMING, 0x07)?;
        let frame = self
            .communicate(pcd::TRANSCEIVE, &[picc_cmd::REQA])
            .map_err(absent_unless_bus)?;
        match frame.data.as_slice() {
            [lo, hi] => Ok([*lo, *hi]),
            _ => Err(PiccError::NoCard),
        }
    }

    /// 防冲突：整字节帧，至少 5 字节应答，前 4 字节为卡号。
    pub fn anticollision(&self) -> Result<Uid, PiccError> {
        self.reader.write(reg::BIT_FRAMING, 0x00)?;
        let frame = self
            .communicate(pcd::TRANSCEIVE, &[picc_cmd::SELECT_CL1, picc_cmd::ANTICOLL_NVB])
            .map_err(absent_unless_bus)?;
        if frame.data.len() < 5 {
            return Err(PiccError::NoCard);
        }
        Ok(Uid([frame.data[0], frame.data[1], frame.data[2], frame.data[3]]))
    }

    /// 芯片协处理器计算 CRC_A，返回 [低字节, 高字节]。
    pub fn calculate_crc(&self, data: &[u8]) -> Result<[u8; 2], PiccError> {
        self.reader.clear_bits(reg::DIV_IRQ, DIV_IRQ_CRC)?;
        self.reader.set_bits(reg::FIFO_LEVEL, FIFO_FLUSH)?;
        for byte in data {
            self.reader.write(reg::FIFO_DATA, *byte)?;
        }
        self.reader.write(reg::COMMAND, pcd::CALC_CRC)?;

        let mut done = false;
        for _ in 0..CRC_POLL_BUDGET {
            if self.reader.read(reg::DIV_IRQ)? & DIV_IRQ_CRC != 0 {
                done = true;
                break;
            }
        }
        if !done {
            return Err(PiccError::BusTimeout);
        }

        let low = self.reader.read(reg::CRC_RESULT_L)?;
        let high = self.reader.read(reg::CRC_RESULT_H)?;
        Ok([low, high])
    }

    /// SELECT：任意 ≥1 字节应答即视为成功，SAK 仅记录。
    pub fn select(&self, uid: &Uid) -> Result<u8, PiccError> {
        let mut frame = [0u8; 9];
        frame[0] = picc_cmd::SELECT_CL1;
        frame[1] = picc_cmd::SELECT_NVB;
        frame[2..6].copy_from_slice(&uid.0);
        frame[6] = uid.bcc();
        let crc = self.calculate_crc(&frame[..7])?;
        frame[7..].copy_from_slice(&crc);

        let response = self.communicate(pcd::TRANSCEIVE, &frame)?;
        let Some(sak) = response.data.first().copied() else {
            return Err(PiccError::MalformedResponse {
                bytes: 0,
                bits: response.bits,
            });
        };
        log::debug!("[{}] SELECT {} SAK=0x{:02X}", self.role().as_str(), uid, sak);
        Ok(sak)
    }

    /// MFAuthent；成功以 Status2.MFCrypto1On 为准。
    pub fn authenticate(
        &self,
        kind: KeyKind,
        block: u8,
        key: &[u8; 6],
        uid: &Uid,
    ) -> Result<(), PiccError> {
        let mut payload = [0u8; 12];
        payload[0] = kind.command();
        payload[1] = block;
        payload[2..8].copy_from_slice(key);
        payload[8..].copy_from_slice(&uid.0);

        self.communicate(pcd::AUTHENT, &payload)?;
        let status2 = self.reader.read(reg::STATUS2)?;
        if status2 & CRYPTO1_ON == 0 {
            log::debug!(
                "[{}] Status2=0x{:02X}, key {:?} rejected on block {}",
                self.role().as_str(),
                status2,
                kind,
                block
            );
            return Err(PiccError::AuthFailed);
        }
        Ok(())
    }

    /// 默认密钥先作 Key A，失败再作 Key B 重试一次。
    pub fn authenticate_default(&self, block: u8, uid: &Uid) -> Result<(), PiccError> {
        match self.authenticate(KeyKind::A, block, &DEFAULT_KEY, uid) {
            Ok(()) => Ok(()),
            Err(PiccError::Bus(err)) => Err(PiccError::Bus(err)),
            Err(_) => match self.authenticate(KeyKind::B, block, &DEFAULT_KEY, uid) {
                Ok(()) => Ok(()),
                Err(PiccError::Bus(err)) => Err(PiccError::Bus(err)),
                Err(_) => Err(PiccError::AuthFailed),
            },
        }
    }

    /// 清除 MFCrypto1On，结束加密会话。
    pub fn stop_crypto(&self) -> Result<(), PiccError> {
        Ok(self.reader.clear_bits(reg::STATUS2, CRYPTO1_ON)?)
    }

    /// 认证 + READ。应答为 16 字节数据加 2 字节 CRC_A，数据部分必须恰好 128 位。
    pub fn read_block(&self, block: u8, uid: &Uid) -> Result<[u8; BLOCK_SIZE], PiccError> {
        let result = self
            .authenticate_default(block, uid)
            .and_then(|_| self.read_authenticated(block));
        self.stop_crypto()?;
        result
    }

    fn read_authenticated(&self, block: u8) -> Result<[u8; BLOCK_SIZE], PiccError> {
        let frame = self.with_crc(&[picc_cmd::READ, block])?;
        let response = self.communicate(pcd::TRANSCEIVE, &frame)?;

        let data_bits = response.bits.saturating_sub(CRC_LEN * 8);
        if data_bits != BLOCK_SIZE * 8 || response.data.len() < BLOCK_SIZE {
            return Err(PiccError::MalformedResponse {
                bytes: response.data.len(),
                bits: response.bits,
            });
        }

        let mut out = [0u8; BLOCK_SIZE];
        out.copy_from_slice(&response.data[..BLOCK_SIZE]);
        Ok(out)
    }

    /// 认证 + 两阶段 WRITE，每一阶段都要 4 位 ACK（低半字节 0xA）。
    pub fn write_block(&self, block: u8, uid: &Uid, data: &[u8; BLOCK_SIZE]) -> Result<(), PiccError> {
        let result = self
            .authenticate_default(block, uid)
            .and_then(|_| self.write_authenticated(block, data));
        self.stop_crypto()?;
        result
    }

    fn write_authenticated(&self, block: u8, data: &[u8; BLOCK_SIZE]) -> Result<(), PiccError> {
        let command = self.with_crc(&[picc_cmd::WRITE, block])?;
        let ack = self.communicate(pcd::TRANSCEIVE, &command)?;
        expect_ack(&ack)?;

        let payload = self.with_crc(data)?;
        let ack = self.communicate(pcd::TRANSCEIVE, &payload)?;
        expect_ack(&ack)
    }

    fn with_crc(&self, data: &[u8]) -> Result<Vec<u8>, PiccError> {
        let crc = self.calculate_crc(data)?;
        let mut frame = Vec::with_capacity(data.len() + CRC_LEN);
        frame.extend_from_slice(data);
        frame.extend_from_slice(&crc);
        Ok(frame)
    }

    /// 通用收发：装载 FIFO、启动命令、轮询中断位、检查错误寄存器、取回应答。
    pub fn communicate(&self, command: u8, send: &[u8]) -> Result<Frame, PiccError> {
        let (irq_enable, wait_irq) = match command {
            // ErrIEn | IdleIEn，等待 IdleIRq
            pcd::AUTHENT => (0x12, 0x10),
            // Tx/Rx/Idle/LoAlert/Err/Timer，等待 RxIRq | IdleIRq
            _ => (0x77, 0x30),
        };

        self.reader.write(reg::COM_IEN, irq_enable | IRQ_SET1)?;
        self.reader.clear_bits(reg::COM_IRQ, IRQ_SET1)?;
        self.reader.set_bits(reg::FIFO_LEVEL, FIFO_FLUSH)?;
        self.reader.write(reg::COMMAND, pcd::IDLE)?;

        for byte in send {
            self.reader.write(reg::FIFO_DATA, *byte)?;
        }
        self.reader.write(reg::COMMAND, command)?;
        if command == pcd::TRANSCEIVE {
            self.reader.set_bits(reg::BIT_FRAMING, START_SEND)?;
        }

        let mut completed = false;
        for _ in 0..TRANSCEIVE_POLL_BUDGET {
            let irq = self.reader.read(reg::COM_IRQ)?;
            if irq & (wait_irq | IRQ_TIMER) != 0 {
                completed = true;
                break;
            }
        }

        self.reader.clear_bits(reg::BIT_FRAMING, START_SEND)?;
        if !completed {
            log::warn!(
                "[{}] reader command 0x{:02X} exhausted poll budget",
                self.role().as_str(),
                command
            );
            return Err(PiccError::BusTimeout);
        }

        let error = self.reader.read(reg::ERROR)?;
        if error & ERROR_MASK != 0 {
            return Err(PiccError::ProtocolError(error));
        }

        if command != pcd::TRANSCEIVE {
            return Ok(Frame {
                data: Vec::new(),
                bits: 0,
            });
        }

        let level = (self.reader.read(reg::FIFO_LEVEL)? & 0x7F) as usize;
        let level = level.min(FIFO_CAPACITY);
        let mut data = Vec::with_capacity(level);
        for _ in 0..level {
            data.push(self.reader.read(reg::FIFO_DATA)?);
        }
        let last_bits = (self.reader.read(reg::CONTROL)? & 0x07) as usize;
        let bits = if last_bits != 0 && level > 0 {
            (level - 1) * 8 + last_bits
        } else {
            level * 8
        };
        Ok(Frame { data, bits })
    }
}

fn absent_unless_bus(err: PiccError) -> PiccError {
    match err {
        PiccError::Bus(bus) => PiccError::Bus(bus),
        _ => PiccError::NoCard,
    }
}

fn expect_ack(frame: &Frame) -> Result<(), PiccError> {
    match frame.data.first() {
        Some(first) if frame.bits == 4 && first & 0x0F == ACK_NIBBLE => Ok(()),
        _ => Err(PiccError::WriteNotAcknowledged),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Fault, SimBus, SimCard};
    use std::sync::Arc;

    fn engine(bus: &Arc<SimBus>, role: ReaderRole) -> Mfrc522<SimBus> {
        Mfrc522::new(ReaderHandle::new(role, bus.clone()))
    }

    #[test]
    fn uid_formats_as_eight_uppercase_hex_chars() {
        let uid = Uid([0x04, 0xA1, 0x3B, 0xFF]);
        assert_eq!(uid.to_hex(), "04A13BFF");
        assert_eq!(Uid([0, 0, 0, 0x0A]).to_hex(), "0000000A");
    }

    #[test]
    fn bcc_is_xor_of_uid_bytes() {
        assert_eq!(Uid([0x04, 0xA1, 0x3B, 0xFF]).bcc(), 0x04 ^ 0xA1 ^ 0x3B ^ 0xFF);
    }

    #[test]
    fn init_reports_version_and_turns_antenna_on() {
        let bus = Arc::new(SimBus::new());
        let chip = engine(&bus, ReaderRole::In);
        let mut delay = crate::sim::NoDelay;

        assert_eq!(chip.init(&mut delay).unwrap(), 0x92);
        assert_eq!(bus.register(ReaderRole::In, reg::TX_CONTROL) & 0x03, 0x03);
        assert_eq!(bus.register(ReaderRole::In, reg::MODE), 0x3D);
    }

    #[test]
    fn empty_field_is_no_card() {
        let bus = Arc::new(SimBus::new());
        let chip = engine(&bus, ReaderRole::In);
        assert_eq!(chip.request_a(), Err(PiccError::NoCard));
    }

    #[test]
    fn request_and_anticollision_yield_uid() {
        let bus = Arc::new(SimBus::new());
        bus.present(ReaderRole::Out, SimCard::new([0xDE, 0xAD, 0xBE, 0xEF]));
        let chip = engine(&bus, ReaderRole::Out);

        assert_eq!(chip.request_a().unwrap(), [0x04, 0x00]);
        assert_eq!(chip.anticollision().unwrap(), Uid([0xDE, 0xAD, 0xBE, 0xEF]));
    }

    #[test]
    fn crc_matches_known_select_vector() {
        // READ block 0 帧 30 00 02 A8
        let bus = Arc::new(SimBus::new());
        let chip = engine(&bus, ReaderRole::In);
        assert_eq!(chip.calculate_crc(&[0x30, 0x00]).unwrap(), [0x02, 0xA8]);
    }

    #[test]
    fn read_block_returns_sixteen_bytes() {
        let bus = Arc::new(SimBus::new());
        let mut card = SimCard::new([1, 2, 3, 4]);
        card.set_block(8, *b"ALICE           ");
        bus.present(ReaderRole::In, card);
        let chip = engine(&bus, ReaderRole::In);

        chip.request_a().unwrap();
        let uid = chip.anticollision().unwrap();
        chip.select(&uid).unwrap();
        assert_eq!(&chip.read_block(8, &uid).unwrap(), b"ALICE           ");
        assert!(!bus.crypto_active(ReaderRole::In));
    }

    #[test]
    fn key_b_fallback_authenticates() {
        let bus = Arc::new(SimBus::new());
        let mut card = SimCard::new([9, 9, 9, 9]);
        card.accept_key_a = false;
        bus.present(ReaderRole::In, card);
        let chip = engine(&bus, ReaderRole::In);

        let uid = chip.anticollision().unwrap();
        chip.select(&uid).unwrap();
        assert!(chip.read_block(8, &uid).is_ok());
        assert_eq!(bus.auth_attempts(ReaderRole::In), vec![KeyKind::A, KeyKind::B]);
    }

    #[test]
    fn no_working_key_is_auth_failed_and_crypto_stopped() {
        let bus = Arc::new(SimBus::new());
        let mut card = SimCard::new([9, 9, 9, 9]);
        card.accept_key_a = false;
        card.accept_key_b = false;
        bus.present(ReaderRole::In, card);
        let chip = engine(&bus, ReaderRole::In);

        let uid = chip.anticollision().unwrap();
        chip.select(&uid).unwrap();
        assert_eq!(chip.read_block(8, &uid), Err(PiccError::AuthFailed));
        assert!(!bus.crypto_active(ReaderRole::In));
    }

    #[test]
    fn authentication_without_select_fails() {
        let bus = Arc::new(SimBus::new());
        bus.present(ReaderRole::In, SimCard::new([5, 6, 7, 8]));
        let chip = engine(&bus, ReaderRole::In);

        let uid = chip.anticollision().unwrap();
        assert_eq!(chip.read_block(8, &uid), Err(PiccError::AuthFailed));
    }

    #[test]
    fn short_read_is_malformed() {
        let bus = Arc::new(SimBus::new());
        bus.present(ReaderRole::In, SimCard::new([1, 1, 1, 1]));
        bus.inject(ReaderRole::In, Fault::ShortRead(10));
        let chip = engine(&bus, ReaderRole::In);

        let uid = chip.anticollision().unwrap();
        chip.select(&uid).unwrap();
        assert!(matches!(
            chip.read_block(8, &uid),
            Err(PiccError::MalformedResponse { bytes: 10, .. })
        ));
    }

    #[test]
    fn error_register_bits_are_protocol_errors() {
        let bus = Arc::new(SimBus::new());
        bus.present(ReaderRole::In, SimCard::new([1, 1, 1, 1]));
        let chip = engine(&bus, ReaderRole::In);
        let uid = chip.anticollision().unwrap();

        bus.inject(ReaderRole::In, Fault::ErrorBits(0x02));
        assert_eq!(chip.select(&uid), Err(PiccError::ProtocolError(0x02)));
    }

    #[test]
    fn stalled_chip_exhausts_budget() {
        let bus = Arc::new(SimBus::new());
        bus.present(ReaderRole::In, SimCard::new([1, 1, 1, 1]));
        let chip = engine(&bus, ReaderRole::In);
        let uid = chip.anticollision().unwrap();

        bus.inject(ReaderRole::In, Fault::Stall);
        assert_eq!(chip.select(&uid), Err(PiccError::BusTimeout));
    }

    #[test]
    fn write_then_read_round_trips_block() {
        let bus = Arc::new(SimBus::new());
        bus.present(ReaderRole::Out, SimCard::new([4, 3, 2, 1]));
        let chip = engine(&bus, ReaderRole::Out);
        let data = *b"0123456789ABCDEF";

        let uid = chip.anticollision().unwrap();
        chip.select(&uid).unwrap();
        chip.write_block(8, &uid, &data).unwrap();
        assert_eq!(chip.read_block(8, &uid).unwrap(), data);
    }

    #[test]
    fn missing_ack_aborts_write() {
        let bus = Arc::new(SimBus::new());
        bus.present(ReaderRole::Out, SimCard::new([4, 3, 2, 1]));
        bus.inject(ReaderRole::Out, Fault::WriteNak);
        let chip = engine(&bus, ReaderRole::Out);

        let uid = chip.anticollision().unwrap();
        chip.select(&uid).unwrap();
        assert_eq!(
            chip.write_block(8, &uid, &[0x20; BLOCK_SIZE]),
            Err(PiccError::WriteNotAcknowledged)
        );
        assert!(!bus.crypto_active(ReaderRole::Out));
        assert_eq!(bus.card_block(ReaderRole::Out, 8), Some([0u8; BLOCK_SIZE]));
    }
}
