use std::sync::OnceLock;
use std::time::Instant;

static BOOT: OnceLock<Instant> = OnceLock::new();

/// 单调时钟（微秒），以首次调用为零点。
pub fn now_us() -> u64 {
    let boot = BOOT.get_or_init(Instant::now);
    boot.elapsed().as_micros() as u64
}

/// 启动后经过的秒数。
pub fn uptime_secs() -> u64 {
    now_us() / 1_000_000
}
