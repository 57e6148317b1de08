//! 闸机门禁控制器核心：双 RC522 读卡、二维码扫码、单请求授权闸门与 MQTT 命令处理。
//!
//! 本 crate 不依赖具体芯片 HAL，硬件通过 `embedded-hal` 的 SPI / 延时接口和
//! 本地的 [`actuator::PinBank`]、[`config::ConfigStore`] 接入；ESP-IDF 相关的接线
//! 全部在二进制目标里。

// 硬件层：SPI 寄存器访问与 MFRC522 / MIFARE 协议
pub mod block;
pub mod picc;
pub mod transport;

// 输入源
pub mod debounce;
pub mod qr;
pub mod reader;

// 授权闸门、执行器与命令分发
pub mod actuator;
pub mod dispatcher;
pub mod gate;

// 配置、消息与链路状态
pub mod clock;
pub mod config;
pub mod link;
pub mod messages;
pub mod outbound;
pub mod status;

#[cfg(test)]
mod sim;
