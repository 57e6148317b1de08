use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

/// 出站队列容量。
pub const OUTBOUND_CAPACITY: usize = 64;

/// MQTT 服务质量等级。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
}

/// 待发布的一条消息。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

/// 消息总线出口：非阻塞入队，返回是否被接受。
pub trait MessageSink: Send + Sync {
    fn enqueue(&self, topic: &str, payload: &str, qos: QoS, retain: bool) -> bool;
}

/// 生产环境出口：有界通道，满则丢弃。
#[derive(Clone)]
pub struct OutboundQueue {
    tx: SyncSender<OutboundMessage>,
}

impl OutboundQueue {
    /// 创建队列，接收端交给发布线程。
    pub fn bounded(capacity: usize) -> (Self, Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::sync_channel(capacity);
        (Self { tx }, rx)
    }
}

impl MessageSink for OutboundQueue {
    fn enqueue(&self, topic: &str, payload: &str, qos: QoS, retain: bool) -> bool {
        let message = OutboundMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
            qos,
            retain,
        };
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("Outbound queue full, dropping message for '{}'", topic);
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                log::warn!("Outbound queue closed, dropping message for '{}'", topic);
                false
            }
        }
    }
}

/// 测试用出口：记录全部消息，可模拟队列满。
#[cfg(test)]
#[derive(Default)]
pub struct RecordingSink {
    messages: std::sync::Mutex<Vec<OutboundMessage>>,
    reject: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_all(&self, reject: bool) {
        self.reject
            .store(reject, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.messages()
            .iter()
            .map(|m| serde_json::from_str(&m.payload).unwrap())
            .collect()
    }
}

#[cfg(test)]
impl MessageSink for RecordingSink {
    fn enqueue(&self, topic: &str, payload: &str, qos: QoS, retain: bool) -> bool {
        if self.reject.load(std::sync::atomic::Ordering::SeqCst) {
            return false;
        }
        self.messages.lock().unwrap().push(OutboundMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
            qos,
            retain,
        });
        true
    }
}
