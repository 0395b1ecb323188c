//! 传感器包布局与解码
//!
//! 数据流负载是按请求顺序拼接的 `[包 ID][包数据]` 组。解码器按固定偏移读取，
//! 包 ID 字节直接跳过（不校验）。每种包的解码方式由 [`SensorPacketId::field`]
//! 声明式给出，[`SensorLayout`] 据此计算偏移表和期望负载长度。
//!
//! | ID | 包 | 宽度 | 解码 |
//! |----|----|------|------|
//! | 7  | 碰撞 & 轮落 | 1 | 标志位 |
//! | 8  | 墙 | 1 | 标志位 |
//! | 9-12 | 悬崖（左/左前/右前/右） | 1 | 标志位 |
//! | 13 | 虚拟墙 | 1 | 标志位 |
//! | 18 | 按钮 | 1 | 标志位 |
//! | 19 | 距离 | 2 | i16, mm → m |
//! | 20 | 角度 | 2 | i16, 度 → 弧度 |
//! | 25/26 | 电量/容量 | 2 | u16, 原始值 |
//! | 39-42 | 请求速度/半径/右轮/左轮 | 2 | i16, mm(/s) → m(/s) |

use crate::constants::MAX_STREAM_PAYLOAD_LEN;
use crate::{ProtocolError, bytes_to_i16_be, bytes_to_u16_be};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use smallvec::SmallVec;
use std::ops::{BitOr, BitOrAssign};
use std::time::{SystemTime, UNIX_EPOCH};

/// 对外的数字标志位掩码
///
/// 每个输入位唯一映射到一个输出位，多个输入字节可以贡献到同一个掩码。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RobotFlags(u32);

impl RobotFlags {
    pub const BUMP_RIGHT: Self = Self(0x0001);
    pub const BUMP_LEFT: Self = Self(0x0002);
    pub const WHEEL_DROP_RIGHT: Self = Self(0x0004);
    pub const WHEEL_DROP_LEFT: Self = Self(0x0008);
    pub const WHEEL_DROP_CASTER: Self = Self(0x0010);
    pub const WALL: Self = Self(0x0020);
    pub const CLIFF_LEFT: Self = Self(0x0040);
    pub const CLIFF_FRONT_LEFT: Self = Self(0x0080);
    pub const CLIFF_FRONT_RIGHT: Self = Self(0x0100);
    pub const CLIFF_RIGHT: Self = Self(0x0200);
    pub const VIRTUAL_WALL: Self = Self(0x0400);
    pub const PLAY_BUTTON: Self = Self(0x0800);
    pub const ADVANCE_BUTTON: Self = Self(0x1000);

    /// 任一碰撞位
    pub const BUMP_ANY: Self = Self(Self::BUMP_RIGHT.0 | Self::BUMP_LEFT.0);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// 是否包含 `other` 的全部位
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// 是否与 `other` 有任一公共位
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for RobotFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for RobotFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// 解码后的机器人状态
///
/// 每个有效帧产生一个新实例，旧实例被替换而不是修改。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RobotState {
    /// 解码时刻的墙钟时间（UNIX 秒）
    pub timestamp: f64,
    /// 数字标志位
    pub flags: RobotFlags,
    /// 自上次读取以来行驶距离（m）
    pub distance_traveled: f64,
    /// 自上次读取以来转过角度（rad）
    pub angle_traveled: f64,
    /// 请求的线速度（m/s）
    pub velocity: f64,
    /// 请求的转弯半径（m）
    pub radius: f64,
    /// 请求的左轮速度（m/s）
    pub left_wheel_velocity: f64,
    /// 请求的右轮速度（m/s）
    pub right_wheel_velocity: f64,
    /// 电池电量（原始值，mAh）
    pub battery_charge: f64,
    /// 电池容量（原始值，mAh）
    pub battery_capacity: f64,
}

impl RobotState {
    /// 任一碰撞位被置位
    pub fn is_bumped(&self) -> bool {
        self.flags.intersects(RobotFlags::BUMP_ANY)
    }

    /// Play 按钮被按下
    pub fn play_pressed(&self) -> bool {
        self.flags.contains(RobotFlags::PLAY_BUTTON)
    }
}

/// 16 位字段的单位换算
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    /// 原始计数，不换算
    Raw,
    /// 毫米（每秒）→ 米（每秒）
    Milli,
    /// 度 → 弧度
    Degrees,
}

impl Scale {
    pub fn apply(self, raw: f64) -> f64 {
        match self {
            Scale::Raw => raw,
            Scale::Milli => raw / 1000.0,
            Scale::Degrees => raw.to_radians(),
        }
    }
}

/// 16 位字段写入 `RobotState` 的目标字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordTarget {
    DistanceTraveled,
    AngleTraveled,
    BatteryCharge,
    BatteryCapacity,
    Velocity,
    Radius,
    RightWheelVelocity,
    LeftWheelVelocity,
}

impl WordTarget {
    fn assign(self, state: &mut RobotState, value: f64) {
        let slot = match self {
            WordTarget::DistanceTraveled => &mut state.distance_traveled,
            WordTarget::AngleTraveled => &mut state.angle_traveled,
            WordTarget::BatteryCharge => &mut state.battery_charge,
            WordTarget::BatteryCapacity => &mut state.battery_capacity,
            WordTarget::Velocity => &mut state.velocity,
            WordTarget::Radius => &mut state.radius,
            WordTarget::RightWheelVelocity => &mut state.right_wheel_velocity,
            WordTarget::LeftWheelVelocity => &mut state.left_wheel_velocity,
        };
        *slot = value;
    }
}

/// 单个传感器包的解码方式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorField {
    /// 1 字节标志位：(输入位掩码, 输出标志) 映射表
    Flags(&'static [(u8, RobotFlags)]),
    /// 2 字节大端整数
    Word {
        signed: bool,
        scale: Scale,
        target: WordTarget,
    },
}

impl SensorField {
    /// 数据宽度（不含包 ID 字节）
    pub const fn width(&self) -> usize {
        match self {
            SensorField::Flags(_) => 1,
            SensorField::Word { .. } => 2,
        }
    }
}

const BUMPS_WHEEL_DROPS_BITS: &[(u8, RobotFlags)] = &[
    (0x01, RobotFlags::BUMP_RIGHT),
    (0x02, RobotFlags::BUMP_LEFT),
    (0x04, RobotFlags::WHEEL_DROP_RIGHT),
    (0x08, RobotFlags::WHEEL_DROP_LEFT),
    (0x10, RobotFlags::WHEEL_DROP_CASTER),
];

const BUTTON_BITS: &[(u8, RobotFlags)] = &[
    (0x01, RobotFlags::PLAY_BUTTON),
    (0x04, RobotFlags::ADVANCE_BUTTON),
];

const WALL_BITS: &[(u8, RobotFlags)] = &[(0x01, RobotFlags::WALL)];
const CLIFF_LEFT_BITS: &[(u8, RobotFlags)] = &[(0x01, RobotFlags::CLIFF_LEFT)];
const CLIFF_FRONT_LEFT_BITS: &[(u8, RobotFlags)] = &[(0x01, RobotFlags::CLIFF_FRONT_LEFT)];
const CLIFF_FRONT_RIGHT_BITS: &[(u8, RobotFlags)] = &[(0x01, RobotFlags::CLIFF_FRONT_RIGHT)];
const CLIFF_RIGHT_BITS: &[(u8, RobotFlags)] = &[(0x01, RobotFlags::CLIFF_RIGHT)];
const VIRTUAL_WALL_BITS: &[(u8, RobotFlags)] = &[(0x01, RobotFlags::VIRTUAL_WALL)];

/// 传感器包 ID（Open Interface packet id）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SensorPacketId {
    BumpsWheelDrops = 7,
    Wall = 8,
    CliffLeft = 9,
    CliffFrontLeft = 10,
    CliffFrontRight = 11,
    CliffRight = 12,
    VirtualWall = 13,
    Buttons = 18,
    Distance = 19,
    Angle = 20,
    BatteryCharge = 25,
    BatteryCapacity = 26,
    RequestedVelocity = 39,
    RequestedRadius = 40,
    RequestedRightVelocity = 41,
    RequestedLeftVelocity = 42,
}

impl SensorPacketId {
    /// 默认请求的完整传感器集合（按流请求顺序）
    pub const STANDARD: [SensorPacketId; 16] = [
        SensorPacketId::BumpsWheelDrops,
        SensorPacketId::Wall,
        SensorPacketId::CliffLeft,
        SensorPacketId::CliffFrontLeft,
        SensorPacketId::CliffFrontRight,
        SensorPacketId::CliffRight,
        SensorPacketId::VirtualWall,
        SensorPacketId::Buttons,
        SensorPacketId::Distance,
        SensorPacketId::Angle,
        SensorPacketId::BatteryCharge,
        SensorPacketId::BatteryCapacity,
        SensorPacketId::RequestedVelocity,
        SensorPacketId::RequestedRadius,
        SensorPacketId::RequestedRightVelocity,
        SensorPacketId::RequestedLeftVelocity,
    ];

    /// 字段表
    pub const fn field(self) -> SensorField {
        use SensorField::{Flags, Word};
        match self {
            Self::BumpsWheelDrops => Flags(BUMPS_WHEEL_DROPS_BITS),
            Self::Wall => Flags(WALL_BITS),
            Self::CliffLeft => Flags(CLIFF_LEFT_BITS),
            Self::CliffFrontLeft => Flags(CLIFF_FRONT_LEFT_BITS),
            Self::CliffFrontRight => Flags(CLIFF_FRONT_RIGHT_BITS),
            Self::CliffRight => Flags(CLIFF_RIGHT_BITS),
            Self::VirtualWall => Flags(VIRTUAL_WALL_BITS),
            Self::Buttons => Flags(BUTTON_BITS),
            Self::Distance => Word {
                signed: true,
                scale: Scale::Milli,
                target: WordTarget::DistanceTraveled,
            },
            Self::Angle => Word {
                signed: true,
                scale: Scale::Degrees,
                target: WordTarget::AngleTraveled,
            },
            Self::BatteryCharge => Word {
                signed: false,
                scale: Scale::Raw,
                target: WordTarget::BatteryCharge,
            },
            Self::BatteryCapacity => Word {
                signed: false,
                scale: Scale::Raw,
                target: WordTarget::BatteryCapacity,
            },
            Self::RequestedVelocity => Word {
                signed: true,
                scale: Scale::Milli,
                target: WordTarget::Velocity,
            },
            Self::RequestedRadius => Word {
                signed: true,
                scale: Scale::Milli,
                target: WordTarget::Radius,
            },
            Self::RequestedRightVelocity => Word {
                signed: true,
                scale: Scale::Milli,
                target: WordTarget::RightWheelVelocity,
            },
            Self::RequestedLeftVelocity => Word {
                signed: true,
                scale: Scale::Milli,
                target: WordTarget::LeftWheelVelocity,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct LayoutField {
    /// 数据在负载中的偏移（已跳过包 ID 字节）
    offset: usize,
    field: SensorField,
}

/// 传感器流布局
///
/// 同一个布局既生成流请求命令，也用于解码，保证两者一致。
#[derive(Debug, Clone, PartialEq)]
pub struct SensorLayout {
    packets: SmallVec<[SensorPacketId; 16]>,
    fields: SmallVec<[LayoutField; 16]>,
    payload_len: usize,
}

impl SensorLayout {
    /// 按包 ID 顺序构建布局
    pub fn new(packets: &[SensorPacketId]) -> Self {
        let mut fields = SmallVec::new();
        let mut offset = 0;

        for id in packets {
            let field = id.field();
            offset += 1; // 包 ID
            fields.push(LayoutField { offset, field });
            offset += field.width();
        }

        Self {
            packets: packets.iter().copied().collect(),
            fields,
            payload_len: offset,
        }
    }

    /// 默认完整布局（40 字节负载）
    pub fn standard() -> Self {
        Self::new(&SensorPacketId::STANDARD)
    }

    /// 从原始包 ID 构建（配置文件使用）
    pub fn from_ids(ids: &[u8]) -> Result<Self, ProtocolError> {
        let packets = ids
            .iter()
            .map(|&id| {
                SensorPacketId::try_from(id).map_err(|_| ProtocolError::UnknownSensorPacket { id })
            })
            .collect::<Result<SmallVec<[SensorPacketId; 16]>, _>>()?;
        let layout = Self::new(&packets);
        layout.validate()?;
        Ok(layout)
    }

    /// 检查布局能否用单字节长度字段表达
    ///
    /// # 错误
    ///
    /// 包列表为空或超过 255 个时返回 `InvalidValue`；
    /// 负载长度超过 255 字节时返回 `InvalidLength`。
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.packets.is_empty() || self.packets.len() > usize::from(u8::MAX) {
            return Err(ProtocolError::InvalidValue {
                field: "stream_packets".to_string(),
                value: i32::try_from(self.packets.len()).unwrap_or(i32::MAX),
            });
        }
        if self.payload_len > MAX_STREAM_PAYLOAD_LEN {
            return Err(ProtocolError::InvalidLength {
                expected: MAX_STREAM_PAYLOAD_LEN,
                actual: self.payload_len,
            });
        }
        Ok(())
    }

    pub fn packets(&self) -> &[SensorPacketId] {
        &self.packets
    }

    /// 期望的负载长度（帧头中的 L）
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// 解码并打上当前墙钟时间戳
    pub fn decode(&self, payload: &[u8]) -> Result<RobotState, ProtocolError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        self.decode_at(payload, timestamp)
    }

    /// 以给定时间戳解码（纯函数）
    ///
    /// # 错误
    ///
    /// 负载长度与布局不符时返回 `InvalidLength`。分帧器保证长度等于帧头声明值，
    /// 因此该错误意味着设备流配置与布局不一致，调用方应视为致命错误。
    pub fn decode_at(&self, payload: &[u8], timestamp: f64) -> Result<RobotState, ProtocolError> {
        if payload.len() != self.payload_len {
            return Err(ProtocolError::InvalidLength {
                expected: self.payload_len,
                actual: payload.len(),
            });
        }

        let mut state = RobotState {
            timestamp,
            ..RobotState::default()
        };

        for LayoutField { offset, field } in &self.fields {
            match *field {
                SensorField::Flags(bits) => {
                    let byte = payload[*offset];
                    for &(mask, flag) in bits {
                        if byte & mask != 0 {
                            state.flags |= flag;
                        }
                    }
                },
                SensorField::Word {
                    signed,
                    scale,
                    target,
                } => {
                    let raw = [payload[*offset], payload[*offset + 1]];
                    let value = if signed {
                        bytes_to_i16_be(raw) as f64
                    } else {
                        bytes_to_u16_be(raw) as f64
                    };
                    target.assign(&mut state, scale.apply(value));
                },
            }
        }

        Ok(state)
    }
}

impl Default for SensorLayout {
    fn default() -> Self {
        Self::standard()
    }
}
