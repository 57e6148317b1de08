use crate::picc::BLOCK_SIZE;

/// 存放用户文本的数据块。
pub const USER_BLOCK: u8 = 8;

const PAD: u8 = b' ';

fn is_blank(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

/// 块内容转文本：截断到第一个 0 字节，去掉首尾空白。
pub fn decode_text(raw: &[u8; BLOCK_SIZE]) -> String {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end])
        .trim_matches(is_blank)
        .to_string()
}

/// 文本转块内容：超过 16 字节截断，不足右补空格。
pub fn encode_text(text: &str) -> [u8; BLOCK_SIZE] {
    let mut out = [PAD; BLOCK_SIZE];
    let bytes = text.as_bytes();
    let len = bytes.len().min(BLOCK_SIZE);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}
