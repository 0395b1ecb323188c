//! # Roomba Protocol
//!
//! Roomba / Create Open Interface 串口协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `constants`: 协议常量（魔数、操作码、限幅）
//! - `framer`: 字节流分帧器（跨 chunk 重组 + 校验和）
//! - `sensors`: 传感器包布局与解码
//! - `command`: 下行命令编码
//!
//! ## 字节序
//!
//! 协议中的 16 位字段均为大端字节序（高位在前）。
//! 本模块提供了字节序转换工具函数。

pub mod command;
pub mod constants;
pub mod framer;
pub mod sensors;

// 重新导出常用类型
pub use command::*;
pub use constants::*;
pub use framer::*;
pub use sensors::*;

use thiserror::Error;

/// 协议层错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid payload length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Short read: requested {requested} bytes, {available} available")]
    ShortRead { requested: usize, available: usize },

    #[error("Unknown sensor packet id: {id}")]
    UnknownSensorPacket { id: u8 },

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: String, value: i32 },
}

/// 大端字节序转 i16
pub fn bytes_to_i16_be(bytes: [u8; 2]) -> i16 {
    i16::from_be_bytes(bytes)
}

/// 大端字节序转 u16
pub fn bytes_to_u16_be(bytes: [u8; 2]) -> u16 {
    u16::from_be_bytes(bytes)
}

/// i16 转大端字节序
pub fn i16_to_bytes_be(value: i16) -> [u8; 2] {
    value.to_be_bytes()
}
