//! 二维码扫码模组（串口）数据解析与授权申请。
//!
//! 模组输出两种格式：带协议头的帧 `0x03 <len> <data>`，以及以 CR/LF/TAB 结尾的
//! 文本行。解析器先尝试协议帧，再尝试文本行。

use std::fmt::Write as _;

use crate::debounce::{Debounce, QR_TEXT_CAPACITY};
use crate::gate::{AccessCoordinator, Offer, SourceType};
use crate::link::LinkStatus;
use crate::outbound::MessageSink;

/// 串口累积缓冲区大小，写满即清空。
pub const BUFFER_CAPACITY: usize = 1024;
/// 协议帧起始字节。
pub const FRAME_START: u8 = 0x03;
/// 协议帧数据最大长度。
pub const MAX_FRAME_LEN: usize = 250;
/// 文本行中可打印字符的最低占比（百分比）。
pub const MIN_PRINTABLE_PERCENT: usize = 80;

/// 串口输出配置所在的参数区地址。
pub const ZONE_SERIAL_OUTPUT: u16 = 0x0060;
/// 串口输出：带协议 + CRLF 结尾。
pub const SERIAL_OUTPUT_PROTOCOL_CRLF: u8 = 0x21;
/// 写参数后清空串口输入前的等待。
pub const ZONE_SETTLE_MS: u32 = 80;
/// 单次串口读超时。
pub const UART_READ_TIMEOUT_MS: u32 = 200;
/// 每轮读取后的让出时间。
pub const UART_IDLE_MS: u32 = 10;

fn is_separator(byte: u8) -> bool {
    matches!(byte, b'\n' | b'\r' | b'\t')
}

fn is_printable(byte: u8) -> bool {
    (0x20..=0x7E).contains(&byte)
}

/// 参数区写命令：`7E 00 08 01 <addr_hi> <addr_lo> <value> AB CD`（AB CD 为免校验尾）。
pub fn zone_write_command(addr: u16, value: u8) -> [u8; 9] {
    let [hi, lo] = addr.to_be_bytes();
    [0x7E, 0x00, 0x08, 0x01, hi, lo, value, 0xAB, 0xCD]
}

/// 以十六进制记录串口字节。
pub fn log_bytes(prefix: &str, bytes: &[u8]) {
    if bytes.is_empty() || !log::log_enabled!(log::Level::Debug) {
        return;
    }
    let mut line = String::with_capacity(prefix.len() + bytes.len() * 3);
    line.push_str(prefix);
    for byte in bytes {
        let _ = write!(line, " {:02X}", byte);
    }
    log::debug!("{}", line);
}

/// 扫码数据解析器。
pub struct QrFrameParser {
    buffer: Vec<u8>,
}

impl Default for QrFrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl QrFrameParser {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(BUFFER_CAPACITY),
        }
    }

    /// 追加串口数据；缓冲区已满时整体丢弃。
    pub fn push(&mut self, bytes: &[u8]) {
        let space = BUFFER_CAPACITY - self.buffer.len();
        if space == 0 {
            log::warn!("QR buffer full, discarding {} buffered bytes", self.buffer.len());
            self.buffer.clear();
            return;
        }
        let take = bytes.len().min(space);
        self.buffer.extend_from_slice(&bytes[..take]);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// 取出下一条扫码文本；数据不完整时返回 None 并保留缓冲。
    pub fn next_payload(&mut self) -> Option<String> {
        loop {
            let before = self.buffer.len();
            let parsed = self.take_frame().or_else(|| self.take_line());
            match parsed {
                Some(bytes) => {
                    let text = to_text(&bytes);
                    if !text.is_empty() {
                        return Some(text);
                    }
                }
                None if self.buffer.len() == before => return None,
                None => {}
            }
        }
    }

    fn take_frame(&mut self) -> Option<Vec<u8>> {
        let start = self.buffer.iter().position(|b| *b == FRAME_START)?;
        self.buffer.drain(..start);
        let len = *self.buffer.get(1)? as usize;
        if len == 0 || len > MAX_FRAME_LEN {
            self.buffer.remove(0);
            return None;
        }
        if self.buffer.len() < 2 + len {
            return None;
        }
        let frame: Vec<u8> = self.buffer.drain(..2 + len).skip(2).collect();
        Some(frame)
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let end = self.buffer.iter().position(|b| is_separator(*b))?;
        let mut len = end;
        while len > 0 && (is_separator(self.buffer[len - 1]) || self.buffer[len - 1] == b' ') {
            len -= 1;
        }
        let printable = self.buffer[..len].iter().filter(|b| is_printable(**b)).count();
        let line = self.buffer[..len].to_vec();

        let mut consumed = end + 1;
        while consumed < self.buffer.len() && is_separator(self.buffer[consumed]) {
            consumed += 1;
        }
        self.buffer.drain(..consumed);

        if len == 0 || printable * 100 / len < MIN_PRINTABLE_PERCENT {
            log::debug!("QR line discarded ({} bytes, {} printable)", len, printable);
            return None;
        }
        Some(line)
    }
}

/// 截断到第一个 0 字节和 255 字节上限。
fn to_text(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    let end = end.min(QR_TEXT_CAPACITY);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// 一条扫码文本的处理结果。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QrOutcome {
    Offered(Offer),
    Suppressed,
    /// 消息总线未连接，只记录。
    Offline,
}

/// 扫码源：解析、去抖后以 QR 类型申请授权。
pub struct QrSource<S> {
    parser: QrFrameParser,
    debounce: Debounce,
    coordinator: AccessCoordinator<S>,
    link: LinkStatus,
}

impl<S: MessageSink> QrSource<S> {
    pub fn new(coordinator: AccessCoordinator<S>, link: LinkStatus) -> Self {
        Self {
            parser: QrFrameParser::new(),
            debounce: Debounce::for_qr(),
            coordinator,
            link,
        }
    }

    /// 处理一批串口数据，返回其中每条扫码文本的结果。
    pub fn feed(&mut self, bytes: &[u8], now_us: u64) -> Vec<(String, QrOutcome)> {
        log_bytes("QR RX:", bytes);
        self.parser.push(bytes);

        let mut outcomes = Vec::new();
        while let Some(text) = self.parser.next_payload() {
            log::info!("QR detected: '{}'", text);
            let outcome = if !self.debounce.should_publish(&text, now_us) {
                log::info!("QR repeated within debounce window, ignored");
                QrOutcome::Suppressed
            } else if !self.link.is_transport_ready() {
                log::warn!("QR '{}' not published, MQTT not connected", text);
                QrOutcome::Offline
            } else {
                QrOutcome::Offered(self.coordinator.offer(SourceType::Qr, &text, "", now_us))
            };
            outcomes.push((text, outcome));
        }
        outcomes
    }
}
