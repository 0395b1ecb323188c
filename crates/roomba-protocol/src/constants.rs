//! 协议常量定义
//!
//! 集中定义所有协议相关的常量，避免在代码中散落"魔法数"。

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 传感器流数据包起始魔数（Open Interface packet header）
pub const STREAM_MAGIC: u8 = 19;

/// 帧头长度（魔数 + 长度字节）
pub const HEADER_LEN: usize = 2;

/// 校验和错误批量告警间隔（每累计 N 次输出一次 warn）
pub const CHECKSUM_WARN_BATCH: u32 = 20;

/// 驱动轮速度限幅（mm/s）
pub const MAX_WHEEL_VELOCITY_MM_S: i16 = 500;

/// 转弯半径限幅（mm）
pub const MAX_RADIUS_MM: i16 = 2000;

/// 直线行驶的特殊半径值（0x8000）
pub const RADIUS_STRAIGHT: i16 = i16::MIN;

/// 直线行驶的另一个特殊半径值（0x7FFF）
pub const RADIUS_STRAIGHT_ALT: i16 = i16::MAX;

/// 原地逆时针旋转
pub const RADIUS_TURN_IN_PLACE_CCW: i16 = 1;

/// 原地顺时针旋转
pub const RADIUS_TURN_IN_PLACE_CW: i16 = -1;

/// 可定义的歌曲编号上限（0..=15）
pub const MAX_SONG_NUMBER: u8 = 15;

/// 单首歌曲最多音符数
pub const MAX_SONG_NOTES: usize = 16;

/// 流帧负载长度上限（帧头长度字段为单字节）
pub const MAX_STREAM_PAYLOAD_LEN: usize = u8::MAX as usize;

/// 下行命令操作码
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    /// 启动 OI，进入 Passive 模式（也是复位后的基础状态）
    Start = 128,
    /// Safe 模式
    Safe = 131,
    /// Full 模式
    Full = 132,
    /// 速度 + 半径驱动
    Drive = 137,
    /// LED 控制
    Leds = 139,
    /// 定义歌曲
    Song = 140,
    /// 播放歌曲
    Play = 141,
    /// 左右轮直接驱动
    DriveDirect = 145,
    /// 请求传感器数据流
    Stream = 148,
    /// 暂停/恢复数据流
    PauseResumeStream = 150,
}
