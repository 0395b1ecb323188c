//! 驱动层错误类型定义

use roomba_protocol::ProtocolError;
use roomba_serial::SerialError;
use thiserror::Error;

/// 连接致命故障
///
/// IO 线程遇到不可恢复的错误时记录该值并退出；之后 `Roomba::health()`
/// 返回 `Err(DriverError::Connection(fault))`，调用方应执行 `shutdown()`。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionFault {
    /// 串口读取失败（设备断开、IO 错误）
    #[error("serial read failed: {0}")]
    Read(String),

    /// 读取到的字节数少于可用字节数声明的值
    #[error("short read: requested {requested} bytes, {available} available")]
    ShortRead { requested: usize, available: usize },

    /// 帧长度与解码布局不一致（解码契约被破坏）
    #[error("decode contract violated: {0}")]
    DecodeContract(String),

    /// 流模式下超过超时时间没有收到任何字节
    #[error("no bytes received for {elapsed_ms} ms (timeout {timeout_ms} ms)")]
    InactivityTimeout { elapsed_ms: u64, timeout_ms: u64 },
}

impl ConnectionFault {
    pub(crate) fn from_serial(err: &SerialError) -> Self {
        match err {
            SerialError::ShortRead {
                requested,
                available,
            } => ConnectionFault::ShortRead {
                requested: *requested,
                available: *available,
            },
            other => ConnectionFault::Read(other.to_string()),
        }
    }
}

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 串口错误
    #[error("Serial error: {0}")]
    Serial(#[from] SerialError),

    /// 协议编码错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 命令通道（串口发送端）已关闭
    #[error("Command sink closed")]
    SinkClosed,

    /// 连接已因致命故障中断
    #[error("Connection lost: {0}")]
    Connection(ConnectionFault),

    /// 配置错误
    #[error("Config error: {0}")]
    Config(String),

    /// IO 线程错误
    #[error("IO thread error: {0}")]
    IoThread(String),
}
