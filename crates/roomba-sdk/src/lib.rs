//! Roomba SDK - iRobot Roomba / Create 串口驱动
//!
//! 通过 Open Interface 串口协议读取传感器数据流、触发边沿事件并写入控制命令。
//!
//! # 架构设计
//!
//! 本 SDK 采用分层架构，从底层到高层：
//!
//! - **串口层** (`serial`): 串口抽象，支持真实串口和内存 Mock
//! - **协议层** (`protocol`): 分帧、传感器解码、命令编码
//! - **驱动层** (`driver`): IO 线程管理、状态发布、边沿事件、Play 回放
//!
//! # 快速开始
//!
//! ```rust
//! use roomba_sdk::prelude::*;
//! ```
//!
//! ```no_run
//! use roomba_sdk::{RoombaBuilder, init_logger};
//!
//! init_logger();
//! let roomba = RoombaBuilder::new().port("/dev/ttyUSB0").build().unwrap();
//! roomba.set_play_callback(|_distance: f64, _angle: f64| -> Result<Vec<u8>, String> {
//!     Ok(vec![60, 16, 64, 16])
//! });
//! roomba.drive(0.2, f64::INFINITY).unwrap();
//! ```

// 内部模块结构
pub mod driver {
    pub use roomba_driver::*;
}
pub mod protocol {
    pub use roomba_protocol::*;
}
pub mod serial {
    pub use roomba_serial::*;
}

mod logging;

// Prelude 模块
pub mod prelude;

// --- 用户以此为界 ---
// 以下是通过 Facade Pattern 提供的公共 API

// 串口层常用类型
pub use serial::{SerialError, SerialRx, SerialTx, SplittablePort};

// 协议层
pub use protocol::{Command, LedState, ProtocolError, RobotFlags, RobotState, SensorLayout};

// 驱动层
pub use driver::{
    ConnectionFault, DeviceEvent, DriverConfig, DriverError, EventCallback, MetricsSnapshot,
    PipelineConfig, Roomba, RoombaBuilder, StateFeed,
};

pub use logging::{DEFAULT_FILTER, init_logger, init_logger_with_filter};
