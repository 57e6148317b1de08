use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::transport::ReaderRole;

/// 周期状态上报间隔。
pub const STATUS_INTERVAL_MS: u32 = 30_000;

/// 固件版本号取自包版本。
pub const FW_VERSION: &str = env!("CARGO_PKG_VERSION");

/// 两个读卡器最近一次卡片交互的结果（无卡不改变状态）。
pub struct ReaderHealth {
    entry_ok: AtomicBool,
    exit_ok: AtomicBool,
}

impl Default for ReaderHealth {
    fn default() -> Self {
        Self {
            entry_ok: AtomicBool::new(true),
            exit_ok: AtomicBool::new(true),
        }
    }
}

impl ReaderHealth {
    pub fn record(&self, role: ReaderRole, ok: bool) {
        let flag = match role {
            ReaderRole::In => &self.entry_ok,
            ReaderRole::Out => &self.exit_ok,
        };
        flag.store(ok, Ordering::Relaxed);
    }

    pub fn is_ok(&self, role: ReaderRole) -> bool {
        match role {
            ReaderRole::In => self.entry_ok.load(Ordering::Relaxed),
            ReaderRole::Out => self.exit_ok.load(Ordering::Relaxed),
        }
    }

    fn label(&self, role: ReaderRole, cards_enabled: bool) -> &'static str {
        if !cards_enabled {
            "DISABLED"
        } else if self.is_ok(role) {
            "OK"
        } else {
            "FAIL"
        }
    }
}

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct ReaderStates {
    #[serde(rename = "in")]
    pub entry: &'static str,
    #[serde(rename = "out")]
    pub exit: &'static str,
}

/// 周期状态报文。
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport<'a> {
    pub action: &'static str,
    pub online: bool,
    pub id: &'a str,
    pub rssi: i32,
    pub uptime: u64,
    pub free_heap: u32,
    pub fw: &'static str,
    pub rc522: ReaderStates,
}

/// 系统指标（目标板从 Wi-Fi / 堆 / 定时器读取）。
#[derive(Clone, Copy, Debug)]
pub struct SystemMetrics {
    pub rssi: i32,
    pub uptime_secs: u64,
    pub free_heap: u32,
}

/// 未连上 AP 时的 RSSI 占位值。
pub const RSSI_UNKNOWN: i32 = -999;

pub fn build_report<'a>(
    device_id: &'a str,
    metrics: SystemMetrics,
    health: &ReaderHealth,
    cards_enabled: bool,
) -> StatusReport<'a> {
    StatusReport {
        action: "status",
        online: true,
        id: device_id,
        rssi: metrics.rssi,
        uptime: metrics.uptime_secs,
        free_heap: metrics.free_heap,
        fw: FW_VERSION,
        rc522: ReaderStates {
            entry: health.label(ReaderRole::In, cards_enabled),
            exit: health.label(ReaderRole::Out, cards_enabled),
        },
    }
}
