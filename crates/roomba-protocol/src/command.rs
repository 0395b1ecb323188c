//! 下行命令编码
//!
//! 所有下行命令都是 `[opcode][参数...]` 的短定长字节序列，不经过流数据包的
//! 分帧/校验和机制。

use crate::ProtocolError;
use crate::constants::*;
use crate::i16_to_bytes_be;
use crate::sensors::{SensorLayout, SensorPacketId};
use bilge::prelude::*;
use smallvec::SmallVec;

/// 命令字节缓冲区
///
/// 最长的命令是 16 个音符的歌曲定义（3 + 32 = 35 字节），栈上预留 64 字节。
pub type CommandBytes = SmallVec<[u8; 64]>;

/// LED 位域（LEDs 命令 Byte 1）
///
/// - Bit 1: Play LED
/// - Bit 3: Advance LED
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedBits {
    reserved_0: bool, // Bit 0: 保留
    pub play: bool,   // Bit 1: Play LED
    reserved_2: bool, // Bit 2: 保留
    pub advance: bool, // Bit 3: Advance LED
    reserved_4: u4,   // Bit 4-7: 保留
}

/// LED 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedState {
    pub play: bool,
    pub advance: bool,
    /// 电源 LED 颜色（0 = 绿, 255 = 红）
    pub power_color: u8,
    /// 电源 LED 亮度（0 = 灭, 255 = 最亮）
    pub power_intensity: u8,
}

impl LedState {
    fn bits(&self) -> u8 {
        let mut bits = LedBits::from(u8::new(0));
        bits.set_play(self.play);
        bits.set_advance(self.advance);
        u8::from(bits)
    }
}

/// 音符：(MIDI 音高, 时长，单位 1/64 秒)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Note {
    pub pitch: u8,
    pub duration: u8,
}

/// 歌曲音符序列
pub type Notes = SmallVec<[Note; MAX_SONG_NOTES]>;

/// 把 `[pitch, duration, pitch, duration, ...]` 形式的音调序列解析为音符
///
/// # 错误
///
/// 序列为空、长度为奇数或超过 16 个音符时返回 `InvalidValue`。
pub fn notes_from_tones(tones: &[u8]) -> Result<Notes, ProtocolError> {
    if tones.is_empty() || tones.len() % 2 != 0 || tones.len() / 2 > MAX_SONG_NOTES {
        return Err(ProtocolError::InvalidValue {
            field: "tones".to_string(),
            value: tones.len() as i32,
        });
    }

    Ok(tones
        .chunks_exact(2)
        .map(|pair| Note {
            pitch: pair[0],
            duration: pair[1],
        })
        .collect())
}

/// 下行命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 启动 OI / 回到 Passive 基础状态
    Start,
    Safe,
    Full,
    /// 速度（mm/s）+ 半径（mm）驱动
    Drive { velocity_mm_s: i16, radius_mm: i16 },
    /// 左右轮直接驱动（mm/s）
    DriveDirect { right_mm_s: i16, left_mm_s: i16 },
    Leds(LedState),
    /// 定义歌曲
    Song { number: u8, notes: Notes },
    /// 播放已定义的歌曲
    Play { number: u8 },
    /// 请求传感器数据流
    StreamRequest(SmallVec<[SensorPacketId; 16]>),
    /// 暂停（false）/ 恢复（true）数据流
    PauseResumeStream { resume: bool },
}

impl Command {
    /// 构造驱动命令（速度和半径限幅，特殊半径值保留）
    pub fn drive(velocity_mm_s: i16, radius_mm: i16) -> Self {
        let radius_mm = match radius_mm {
            RADIUS_STRAIGHT
            | RADIUS_STRAIGHT_ALT
            | RADIUS_TURN_IN_PLACE_CW
            | RADIUS_TURN_IN_PLACE_CCW => radius_mm,
            r => r.clamp(-MAX_RADIUS_MM, MAX_RADIUS_MM),
        };
        Command::Drive {
            velocity_mm_s: clamp_velocity(velocity_mm_s),
            radius_mm,
        }
    }

    /// 以 SI 单位构造驱动命令（m/s, m）
    ///
    /// 非有限的半径（如 `f64::INFINITY`）视为直线行驶。
    pub fn drive_si(velocity: f64, radius: f64) -> Self {
        let radius_mm = if radius.is_finite() {
            mm_from_si(radius)
        } else {
            RADIUS_STRAIGHT
        };
        Self::drive(mm_from_si(velocity), radius_mm)
    }

    /// 构造左右轮直接驱动命令（限幅）
    pub fn drive_direct(right_mm_s: i16, left_mm_s: i16) -> Self {
        Command::DriveDirect {
            right_mm_s: clamp_velocity(right_mm_s),
            left_mm_s: clamp_velocity(left_mm_s),
        }
    }

    /// 以 SI 单位构造左右轮直接驱动命令（m/s）
    pub fn drive_direct_si(right: f64, left: f64) -> Self {
        Self::drive_direct(mm_from_si(right), mm_from_si(left))
    }

    /// 按布局生成流请求命令
    pub fn stream_request(layout: &SensorLayout) -> Self {
        Command::StreamRequest(layout.packets().iter().copied().collect())
    }

    /// 操作码
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::Start => Opcode::Start,
            Command::Safe => Opcode::Safe,
            Command::Full => Opcode::Full,
            Command::Drive { .. } => Opcode::Drive,
            Command::DriveDirect { .. } => Opcode::DriveDirect,
            Command::Leds(_) => Opcode::Leds,
            Command::Song { .. } => Opcode::Song,
            Command::Play { .. } => Opcode::Play,
            Command::StreamRequest(_) => Opcode::Stream,
            Command::PauseResumeStream { .. } => Opcode::PauseResumeStream,
        }
    }

    /// 编码为线格式
    ///
    /// # 错误
    ///
    /// 歌曲编号超出 0..=15、音符数不在 1..=16 或流请求包数不在 1..=255 时返回 `InvalidValue`。
    pub fn encode(&self) -> Result<CommandBytes, ProtocolError> {
        let mut bytes = CommandBytes::new();
        bytes.push(self.opcode().into());

        match self {
            Command::Start | Command::Safe | Command::Full => {},
            Command::Drive {
                velocity_mm_s,
                radius_mm,
            } => {
                bytes.extend_from_slice(&i16_to_bytes_be(*velocity_mm_s));
                bytes.extend_from_slice(&i16_to_bytes_be(*radius_mm));
            },
            Command::DriveDirect {
                right_mm_s,
                left_mm_s,
            } => {
                bytes.extend_from_slice(&i16_to_bytes_be(*right_mm_s));
                bytes.extend_from_slice(&i16_to_bytes_be(*left_mm_s));
            },
            Command::Leds(leds) => {
                bytes.push(leds.bits());
                bytes.push(leds.power_color);
                bytes.push(leds.power_intensity);
            },
            Command::Song { number, notes } => {
                check_song_number(*number)?;
                if notes.is_empty() || notes.len() > MAX_SONG_NOTES {
                    return Err(ProtocolError::InvalidValue {
                        field: "song_length".to_string(),
                        value: notes.len() as i32,
                    });
                }
                bytes.push(*number);
                bytes.push(notes.len() as u8);
                for note in notes {
                    bytes.push(note.pitch);
                    bytes.push(note.duration);
                }
            },
            Command::Play { number } => {
                check_song_number(*number)?;
                bytes.push(*number);
            },
            Command::StreamRequest(packets) => {
                let count = match u8::try_from(packets.len()) {
                    Ok(0) | Err(_) => {
                        return Err(ProtocolError::InvalidValue {
                            field: "stream_packets".to_string(),
                            value: i32::try_from(packets.len()).unwrap_or(i32::MAX),
                        });
                    },
                    Ok(count) => count,
                };
                bytes.push(count);
                bytes.extend(packets.iter().map(|id| u8::from(*id)));
            },
            Command::PauseResumeStream { resume } => {
                bytes.push(u8::from(*resume));
            },
        }

        Ok(bytes)
    }
}

fn clamp_velocity(mm_s: i16) -> i16 {
    mm_s.clamp(-MAX_WHEEL_VELOCITY_MM_S, MAX_WHEEL_VELOCITY_MM_S)
}

/// m → mm（四舍五入，饱和到 i16）
fn mm_from_si(value: f64) -> i16 {
    (value * 1000.0).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

fn check_song_number(number: u8) -> Result<(), ProtocolError> {
    if number > MAX_SONG_NUMBER {
        return Err(ProtocolError::InvalidValue {
            field: "song_number".to_string(),
            value: number as i32,
        });
    }
    Ok(())
}
