/// 卡片重复刷卡抑制窗口。
pub const CARD_WINDOW_MS: u32 = 900;
/// 二维码重复扫码抑制窗口。
pub const QR_WINDOW_MS: u32 = 1200;

/// 卡号最多保存 15 个字符。
pub const CARD_ID_CAPACITY: usize = 15;
/// 二维码文本最多保存 255 字节。
pub const QR_TEXT_CAPACITY: usize = 255;

/// 单个输入源的去抖状态（仅由所属轮询任务读写）。
pub struct Debounce {
    window_us: u64,
    capacity: usize,
    last_id: String,
    last_published_us: u64,
    present: bool,
}

impl Debounce {
    pub fn new(window_ms: u32, capacity: usize) -> Self {
        Self {
            window_us: window_ms as u64 * 1000,
            capacity,
            last_id: String::new(),
            last_published_us: 0,
            present: false,
        }
    }

    pub fn for_cards() -> Self {
        Self::new(CARD_WINDOW_MS, CARD_ID_CAPACITY)
    }

    pub fn for_qr() -> Self {
        Self::new(QR_WINDOW_MS, QR_TEXT_CAPACITY)
    }

    /// 同一标识在窗口内重复出现时返回 false；否则记录并返回 true。
    pub fn should_publish(&mut self, id: &str, now_us: u64) -> bool {
        let stored = truncate_at_boundary(id, self.capacity);
        let elapsed = now_us.saturating_sub(self.last_published_us);
        if !self.last_id.is_empty() && self.last_id == stored && elapsed < self.window_us {
            return false;
        }

        self.last_id.clear();
        self.last_id.push_str(stored);
        self.last_published_us = now_us;
        self.present = true;
        true
    }

    /// 卡片离场：只清在场标记，保留上次标识继续参与去抖。
    pub fn mark_absent(&mut self) {
        self.present = false;
    }

    pub fn is_present(&self) -> bool {
        self.present
    }

    pub fn last_id(&self) -> &str {
        &self.last_id
    }
}

fn truncate_at_boundary(text: &str, max_len: usize) -> &str {
    if text.len() <= max_len {
        return text;
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
