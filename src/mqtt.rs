use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use esp_idf_svc::mqtt::client::{
    Details, EspMqttClient, EspMqttConnection, EventPayload, MqttClientConfiguration, QoS as MqttQoS,
};

use turnstile_access::clock;
use turnstile_access::config::ConfigHandle;
use turnstile_access::dispatcher::route_inbound;
use turnstile_access::link::{LinkState, LinkStatus};
use turnstile_access::messages::CommandRecord;
use turnstile_access::outbound::{MessageSink, OutboundMessage, OutboundQueue, QoS};
use turnstile_access::status::{build_report, ReaderHealth, SystemMetrics, STATUS_INTERVAL_MS};

use crate::net;

/// 发布线程等待连接时的检查间隔。
const LINK_WAIT: Duration = Duration::from_millis(200);

type SharedClient = Arc<Mutex<EspMqttClient<'static>>>;

fn to_mqtt_qos(qos: QoS) -> MqttQoS {
    match qos {
        QoS::AtMostOnce => MqttQoS::AtMostOnce,
        QoS::AtLeastOnce => MqttQoS::AtLeastOnce,
    }
}

/// 创建客户端；会话不清除，客户端 ID 即设备 ID。
pub fn start(config: &ConfigHandle) -> anyhow::Result<(SharedClient, EspMqttConnection)> {
    let cfg = config.snapshot();
    let mqtt_config = MqttClientConfiguration {
        client_id: Some(cfg.device_id.as_str()),
        username: (!cfg.mqtt_user.is_empty()).then_some(cfg.mqtt_user.as_str()),
        password: (!cfg.mqtt_pass.is_empty()).then_some(cfg.mqtt_pass.as_str()),
        disable_clean_session: true,
        ..Default::default()
    };
    let (client, connection) = EspMqttClient::new(&cfg.mqtt_url, &mqtt_config)?;
    log::info!("MQTT client started for {}", cfg.mqtt_url);
    Ok((Arc::new(Mutex::new(client)), connection))
}

/// 事件线程：维护链路状态，连上后订阅命令主题，数据交给命令队列。
pub fn spawn_event_loop(
    mut connection: EspMqttConnection,
    client: SharedClient,
    config: ConfigHandle,
    link: LinkStatus,
    outbound: OutboundQueue,
    commands: SyncSender<CommandRecord>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while let Ok(event) = connection.next() {
            match event.payload() {
                EventPayload::Connected(_) => {
                    log::info!("MQTT connected");
                    link.set(LinkState::Online);
                    let topic = config.snapshot().command_topic();
                    let mut client = client.lock().unwrap_or_else(PoisonError::into_inner);
                    match client.subscribe(&topic, MqttQoS::AtLeastOnce) {
                        Ok(_) => log::info!("Subscribed to {}", topic),
                        Err(err) => log::warn!("Subscribe to {} failed: {:?}", topic, err),
                    }
                }
                EventPayload::Disconnected => {
                    log::warn!("MQTT disconnected");
                    if link.get() == LinkState::Online {
                        link.set(LinkState::WifiUp);
                    }
                }
                EventPayload::Received {
                    topic,
                    data,
                    details: Details::Complete,
                    ..
                } => {
                    log::info!(
                        "MQTT data: topic={} data={}",
                        topic.unwrap_or(""),
                        String::from_utf8_lossy(data)
                    );
                    route_inbound(data, &config, &outbound, &commands);
                }
                EventPayload::Received { .. } => {
                    log::warn!("Chunked MQTT message ignored");
                }
                EventPayload::Error(err) => log::warn!("MQTT error: {:?}", err),
                _ => {}
            }
        }
        log::warn!("MQTT connection closed");
    })
}

/// 发布线程：未连接时等待，连接后依次发布出站队列中的消息。
pub fn spawn_publisher(
    client: SharedClient,
    link: LinkStatus,
    outbound_rx: Receiver<OutboundMessage>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while let Ok(message) = outbound_rx.recv() {
            while !link.is_transport_ready() {
                thread::sleep(LINK_WAIT);
            }
            let mut client = client.lock().unwrap_or_else(PoisonError::into_inner);
            match client.publish(
                &message.topic,
                to_mqtt_qos(message.qos),
                message.retain,
                message.payload.as_bytes(),
            ) {
                Ok(_) => log::debug!("Published to {}", message.topic),
                Err(err) => log::warn!("Publish to {} failed: {:?}", message.topic, err),
            }
        }
    })
}

/// 状态上报线程：在线时每 30 秒发布一次保留状态消息。
pub fn spawn_status_reporter(
    config: ConfigHandle,
    link: LinkStatus,
    health: Arc<ReaderHealth>,
    outbound: OutboundQueue,
) -> thread::JoinHandle<()> {
    thread::spawn(move || loop {
        thread::sleep(Duration::from_millis(u64::from(STATUS_INTERVAL_MS)));
        if !link.is_transport_ready() {
            continue;
        }
        let cfg = config.snapshot();
        let metrics = SystemMetrics {
            rssi: net::rssi(),
            uptime_secs: clock::uptime_secs(),
            free_heap: net::free_heap(),
        };
        let report = build_report(&cfg.device_id, metrics, &health, cfg.enable_cards);
        match serde_json::to_string(&report) {
            Ok(payload) => {
                outbound.enqueue(&cfg.status_topic(), &payload, QoS::AtLeastOnce, true);
            }
            Err(err) => log::warn!("Status encode failed: {}", err),
        }
    })
}
