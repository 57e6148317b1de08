use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// 网络链路状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Offline = 0,
    WifiUp = 1,
    Online = 2,
}

impl LinkState {
    fn from_u8(value: u8) -> Self {
        match value {
            2 => LinkState::Online,
            1 => LinkState::WifiUp,
            _ => LinkState::Offline,
        }
    }
}

/// 跨任务共享的链路状态句柄；网络任务写，核心只读。
#[derive(Clone, Default)]
pub struct LinkStatus {
    state: Arc<AtomicU8>,
}

impl LinkStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, state: LinkState) {
        let previous = self.state.swap(state as u8, Ordering::AcqRel);
        if previous != state as u8 {
            log::info!("Link state -> {:?}", state);
        }
    }

    pub fn get(&self) -> LinkState {
        LinkState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// 消息总线可用（MQTT 已连接）。
    pub fn is_transport_ready(&self) -> bool {
        self.get() == LinkState::Online
    }
}
