//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use roomba_sdk::prelude::*;
//! ```

// 驱动层（推荐使用）
pub use crate::driver::{
    ChannelEventHook, DeviceEvent, DriverConfig, EventCallback, PipelineConfig, Roomba,
    RoombaBuilder, StateFeed,
};

// 协议层
pub use crate::protocol::{Command, LedState, RobotFlags, RobotState, SensorLayout, SensorPacketId};

// 串口层（常用 Trait）
pub use crate::serial::SplittablePort;

// 错误类型
pub use crate::driver::{ConnectionFault, DriverError};
pub use crate::protocol::ProtocolError;
pub use crate::serial::SerialError;
