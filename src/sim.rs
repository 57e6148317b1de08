//! 主机测试用的 MFRC522 + MIFARE Classic 1K 仿真。
//!
//! 按寄存器语义建模 FIFO、ComIrq/DivIrq 置位清位、CRC 协处理器、
//! MFAuthent 以及 REQA/防冲突/SELECT/READ/两阶段 WRITE 应答。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use embedded_hal::delay::DelayNs;
use embedded_hal::spi::ErrorKind;

use crate::picc::{pcd, picc_cmd, reg, KeyKind, BLOCK_SIZE, DEFAULT_KEY};
use crate::transport::{BusError, ReaderRole, RegisterBus};

const VERSION_V2: u8 = 0x92;
const IRQ_RX_IDLE: u8 = 0x30;
const IRQ_IDLE: u8 = 0x10;
const IRQ_TIMER: u8 = 0x01;
const IRQ_ERR: u8 = 0x02;

/// 单次注入的故障，被下一条匹配的卡片命令消费。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// 下一次收发置 ErrorReg。
    ErrorBits(u8),
    /// 下一次收发/认证不产生任何中断位。
    Stall,
    /// 下一次 READ 只返回 n 字节。
    ShortRead(usize),
    /// 下一次 WRITE 第一阶段回 NAK。
    WriteNak,
}

/// 仿真卡片。
#[derive(Clone, Debug)]
pub struct SimCard {
    pub uid: [u8; 4],
    pub accept_key_a: bool,
    pub accept_key_b: bool,
    blocks: HashMap<u8, [u8; BLOCK_SIZE]>,
}

impl SimCard {
    pub fn new(uid: [u8; 4]) -> Self {
        Self {
            uid,
            accept_key_a: true,
            accept_key_b: true,
            blocks: HashMap::new(),
        }
    }

    pub fn set_block(&mut self, block: u8, data: [u8; BLOCK_SIZE]) {
        self.blocks.insert(block, data);
    }

    fn block(&self, block: u8) -> [u8; BLOCK_SIZE] {
        self.blocks.get(&block).copied().unwrap_or([0u8; BLOCK_SIZE])
    }

    fn bcc(&self) -> u8 {
        self.uid.iter().fold(0, |acc, b| acc ^ b)
    }
}

#[derive(Default)]
struct SimChip {
    regs: HashMap<u8, u8>,
    fifo: VecDeque<u8>,
    card: Option<SimCard>,
    faults: Vec<Fault>,
    auth_log: Vec<KeyKind>,
    selected: bool,
    pending_write: Option<u8>,
    broken: bool,
}

impl SimChip {
    fn new() -> Self {
        let mut chip = Self::default();
        chip.power_on_defaults();
        chip
    }

    fn power_on_defaults(&mut self) {
        self.regs.clear();
        self.regs.insert(reg::TX_CONTROL, 0x80);
        self.regs.insert(reg::VERSION, VERSION_V2);
        self.fifo.clear();
        self.selected = false;
        self.pending_write = None;
    }

    fn get(&self, addr: u8) -> u8 {
        self.regs.get(&addr).copied().unwrap_or(0)
    }

    fn set(&mut self, addr: u8, value: u8) {
        self.regs.insert(addr, value);
    }

    fn read(&mut self, addr: u8) -> u8 {
        match addr {
            reg::FIFO_DATA => self.fifo.pop_front().unwrap_or(0),
            reg::FIFO_LEVEL => self.fifo.len() as u8,
            _ => self.get(addr),
        }
    }

    fn write(&mut self, addr: u8, value: u8) {
        match addr {
            // bit7 为 Set 位：1 置位其余位，0 清除其余位
            reg::COM_IRQ | reg::DIV_IRQ => {
                let current = self.get(addr);
                let bits = value & 0x7F;
                let next = if value & 0x80 != 0 {
                    current | bits
                } else {
                    current & !bits
                };
                self.set(addr, next);
            }
            reg::FIFO_LEVEL => {
                if value & 0x80 != 0 {
                    self.fifo.clear();
                }
            }
            reg::FIFO_DATA => self.fifo.push_back(value),
            reg::COMMAND => {
                self.set(addr, value & 0x0F);
                self.run_command(value & 0x0F);
            }
            reg::BIT_FRAMING => {
                self.set(addr, value);
                if value & 0x80 != 0 && self.get(reg::COMMAND) == pcd::TRANSCEIVE {
                    self.transceive(value & 0x07);
                }
            }
            _ => self.set(addr, value),
        }
    }

    fn run_command(&mut self, command: u8) {
        match command {
            pcd::SOFT_RESET => self.power_on_defaults(),
            pcd::CALC_CRC => {
                let data: Vec<u8> = self.fifo.drain(..).collect();
                let [low, high] = crc_a(&data);
                self.set(reg::CRC_RESULT_L, low);
                self.set(reg::CRC_RESULT_H, high);
                let div = self.get(reg::DIV_IRQ);
                self.set(reg::DIV_IRQ, div | 0x04);
            }
            pcd::AUTHENT => self.authenticate(),
            _ => {}
        }
    }

    fn take_fault(&mut self, accept: impl Fn(&Fault) -> bool) -> Option<Fault> {
        let pos = self.faults.iter().position(accept)?;
        Some(self.faults.remove(pos))
    }

    fn raise(&mut self, bits: u8) {
        let irq = self.get(reg::COM_IRQ);
        self.set(reg::COM_IRQ, irq | bits);
    }

    fn authenticate(&mut self) {
        self.set(reg::ERROR, 0);
        let payload: Vec<u8> = self.fifo.drain(..).collect();
        if self.take_fault(|f| *f == Fault::Stall).is_some() {
            return;
        }
        self.raise(IRQ_IDLE);
        if payload.len() != 12 {
            return;
        }
        let kind = match payload[0] {
            0x60 => KeyKind::A,
            0x61 => KeyKind::B,
            _ => return,
        };
        self.auth_log.push(kind);
        let Some(card) = self.card.as_ref() else {
            return;
        };
        let key_ok = payload[2..8] == DEFAULT_KEY
            && match kind {
                KeyKind::A => card.accept_key_a,
                KeyKind::B => card.accept_key_b,
            };
        if self.selected && key_ok && payload[8..12] == card.uid {
            let status2 = self.get(reg::STATUS2);
            self.set(reg::STATUS2, status2 | 0x08);
        }
    }

    fn crypto_active(&self) -> bool {
        self.get(reg::STATUS2) & 0x08 != 0
    }

    fn respond(&mut self, data: &[u8], last_bits: u8) {
        self.fifo.extend(data.iter().copied());
        self.set(reg::CONTROL, last_bits);
        self.raise(IRQ_RX_IDLE);
    }

    fn no_response(&mut self) {
        self.set(reg::CONTROL, 0);
        self.raise(IRQ_TIMER);
    }

    fn transceive(&mut self, tx_last_bits: u8) {
        self.set(reg::ERROR, 0);
        let frame: Vec<u8> = self.fifo.drain(..).collect();

        if self.take_fault(|f| *f == Fault::Stall).is_some() {
            return;
        }
        if let Some(Fault::ErrorBits(bits)) = self.take_fault(|f| matches!(f, Fault::ErrorBits(_))) {
            self.set(reg::ERROR, bits);
            self.raise(IRQ_RX_IDLE | IRQ_ERR);
            return;
        }
        let Some(card) = self.card.clone() else {
            self.no_response();
            return;
        };

        if let Some(block) = self.pending_write.take() {
            if frame.len() == BLOCK_SIZE + 2 && crc_ok(&frame) {
                let mut data = [0u8; BLOCK_SIZE];
                data.copy_from_slice(&frame[..BLOCK_SIZE]);
                if let Some(card) = self.card.as_mut() {
                    card.set_block(block, data);
                }
                self.respond(&[0x0A], 4);
            } else {
                self.respond(&[0x04], 4);
            }
            return;
        }

        match frame.as_slice() {
            [picc_cmd::REQA] if tx_last_bits == 7 => {
                self.selected = false;
                self.respond(&[0x04, 0x00], 0);
            }
            [picc_cmd::SELECT_CL1, picc_cmd::ANTICOLL_NVB] => {
                let mut reply = card.uid.to_vec();
                reply.push(card.bcc());
                self.respond(&reply, 0);
            }
            [picc_cmd::SELECT_CL1, picc_cmd::SELECT_NVB, ..] if frame.len() == 9 => {
                if frame[2..6] == card.uid && frame[6] == card.bcc() && crc_ok(&frame) {
                    self.selected = true;
                    let mut reply = vec![0x08];
                    reply.extend_from_slice(&crc_a(&[0x08]));
                    self.respond(&reply, 0);
                } else {
                    self.no_response();
                }
            }
            [picc_cmd::READ, block, _, _] if self.crypto_active() && crc_ok(&frame) => {
                let mut reply = card.block(*block).to_vec();
                reply.extend_from_slice(&crc_a(&reply));
                if let Some(Fault::ShortRead(n)) =
                    self.take_fault(|f| matches!(f, Fault::ShortRead(_)))
                {
                    reply.truncate(n);
                }
                self.respond(&reply, 0);
            }
            [picc_cmd::WRITE, block, _, _] if self.crypto_active() && crc_ok(&frame) => {
                if self.take_fault(|f| *f == Fault::WriteNak).is_some() {
                    self.respond(&[0x04], 4);
                } else {
                    self.pending_write = Some(*block);
                    self.respond(&[0x0A], 4);
                }
            }
            _ => self.no_response(),
        }
    }
}

/// ISO/IEC 14443-3 CRC_A（初值 0x6363），返回 [低字节, 高字节]。
pub fn crc_a(data: &[u8]) -> [u8; 2] {
    let mut crc: u16 = 0x6363;
    for &byte in data {
        let mut ch = byte ^ (crc as u8);
        ch ^= ch << 4;
        let ch = ch as u16;
        crc = (crc >> 8) ^ (ch << 8) ^ (ch << 3) ^ (ch >> 4);
    }
    [crc as u8, (crc >> 8) as u8]
}

fn crc_ok(frame: &[u8]) -> bool {
    let (body, crc) = frame.split_at(frame.len() - 2);
    crc_a(body) == [crc[0], crc[1]]
}

/// 两片仿真芯片共享的寄存器总线。
pub struct SimBus {
    chips: Mutex<HashMap<ReaderRole, SimChip>>,
}

impl SimBus {
    pub fn new() -> Self {
        let mut chips = HashMap::new();
        chips.insert(ReaderRole::In, SimChip::new());
        chips.insert(ReaderRole::Out, SimChip::new());
        Self {
            chips: Mutex::new(chips),
        }
    }

    fn with_chip<T>(&self, role: ReaderRole, f: impl FnOnce(&mut SimChip) -> T) -> T {
        let mut chips = self.chips.lock().unwrap();
        f(chips.get_mut(&role).unwrap())
    }

    pub fn present(&self, role: ReaderRole, card: SimCard) {
        self.with_chip(role, |chip| chip.card = Some(card));
    }

    pub fn remove(&self, role: ReaderRole) {
        self.with_chip(role, |chip| {
            chip.card = None;
            chip.selected = false;
        });
    }

    pub fn inject(&self, role: ReaderRole, fault: Fault) {
        self.with_chip(role, |chip| chip.faults.push(fault));
    }

    pub fn break_bus(&self, role: ReaderRole) {
        self.with_chip(role, |chip| chip.broken = true);
    }

    pub fn register(&self, role: ReaderRole, addr: u8) -> u8 {
        self.with_chip(role, |chip| chip.get(addr))
    }

    pub fn crypto_active(&self, role: ReaderRole) -> bool {
        self.with_chip(role, |chip| chip.crypto_active())
    }

    pub fn auth_attempts(&self, role: ReaderRole) -> Vec<KeyKind> {
        self.with_chip(role, |chip| chip.auth_log.clone())
    }

    pub fn card_block(&self, role: ReaderRole, block: u8) -> Option<[u8; BLOCK_SIZE]> {
        self.with_chip(role, |chip| chip.card.as_ref().map(|card| card.block(block)))
    }
}

impl RegisterBus for SimBus {
    fn write_register(&self, role: ReaderRole, addr: u8, value: u8) -> Result<(), BusError> {
        self.with_chip(role, |chip| {
            if chip.broken {
                return Err(BusError::Transfer(ErrorKind::Other));
            }
            chip.write(addr, value);
            Ok(())
        })
    }

    fn read_register(&self, role: ReaderRole, addr: u8) -> Result<u8, BusError> {
        self.with_chip(role, |chip| {
            if chip.broken {
                return Err(BusError::Transfer(ErrorKind::Other));
            }
            Ok(chip.read(addr))
        })
    }
}

/// 不等待的延时。
pub struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}
