//! 驱动层模块
//!
//! 本模块提供 Roomba / Create 的设备驱动功能，包括：
//! - RX 线程管理（分帧、解码、发布）
//! - 状态同步（粗粒度锁 + ArcSwap 无锁 feed）
//! - 边沿触发事件与钩子系统
//! - Play 按钮回放工作线程
//! - 命令写入与流控制
//!
//! 大多数用户应该通过 `roomba-sdk` 使用本模块。

mod builder;
pub mod config;
mod error;
pub mod events;
pub mod heartbeat;
pub mod metrics;
pub mod pipeline;
pub mod playback;
mod roomba;
pub mod state;
pub mod writer;

pub use builder::RoombaBuilder;
pub use config::DriverConfig;
pub use error::{ConnectionFault, DriverError};
pub use events::{
    ChannelEventHook, DeviceEvent, EdgeState, Edges, EventCallback, EventDispatcher, EventHooks,
};
pub use heartbeat::ConnectionMonitor;
pub use metrics::{DriverMetrics, MetricsSnapshot};
pub use pipeline::{PipelineConfig, rx_loop};
pub use playback::{PlayCallback, PlaybackTrigger, PlaybackWorker};
pub use roomba::Roomba;
pub use state::{RoombaContext, SharedLink, StateFeed, StatePublisher};
pub use writer::CommandWriter;
