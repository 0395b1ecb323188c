//! 字节流分帧器
//!
//! 从串口按任意大小分块到达的字节流中重组传感器流数据包：
//!
//! ```text
//! [0x13][L][payload: L bytes][checksum]
//! (0x13 + L + Σpayload + checksum) mod 256 == 0
//! ```
//!
//! # 状态机
//!
//! ```text
//! ScanningForMagic ──(2 字节, 首字节 == 19)──> PacketDetected
//!        ^                                          │
//!        └──────(L+1 字节到齐, 接受或拒绝)───────────┘
//! ```
//!
//! 只有在当前状态所需的字节数全部可用时才会读取，因此分帧结果与字节流
//! 的切分方式无关：同一段字节无论如何分块喂入，输出的帧序列都相同。

use crate::ProtocolError;
use crate::constants::{CHECKSUM_WARN_BATCH, HEADER_LEN, STREAM_MAGIC};
use smallvec::{SmallVec, smallvec};
use std::collections::VecDeque;
use tracing::{trace, warn};

/// 字节源抽象
///
/// 分帧器只依赖两个操作："当前可读字节数" 和 "精确读取 N 字节"。
/// 实现方保证 `read_exact` 不会只读取部分字节（阻塞或缓冲由实现方负责）。
pub trait ByteSource {
    type Error;

    /// 当前可立即读取的字节数
    fn bytes_available(&mut self) -> Result<usize, Self::Error>;

    /// 精确读取 `buf.len()` 个字节
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), Self::Error>;
}

impl<T: ByteSource + ?Sized> ByteSource for &mut T {
    type Error = T::Error;

    fn bytes_available(&mut self) -> Result<usize, Self::Error> {
        (**self).bytes_available()
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), Self::Error> {
        (**self).read_exact(buf)
    }
}

/// 帧负载缓冲区
///
/// 标准传感器布局的负载为 40 字节，栈上预留 64 字节避免堆分配。
pub type Payload = SmallVec<[u8; 64]>;

/// 一次 `feed` 调用产生的帧
pub type FrameBatch = SmallVec<[RawFrame; 2]>;

/// 已通过校验的原始帧（仅负载，不含帧头和校验和）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    payload: Payload,
}

impl RawFrame {
    /// 负载字节
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// 负载长度（等于帧头中的 L）
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// 分帧器状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FramerState {
    /// 是否已检测到魔数（处于 PacketDetected 状态）
    pub magic_found: bool,
    /// 帧头声明的负载长度，仅在 `magic_found == true` 时有意义
    pub expected_len: u8,
    /// 当前批次内的校验和错误数（每满 20 次告警一次并清零）
    pub checksum_error_count: u32,
}

/// 流分帧器
///
/// 由字节投递线程独占，跨多次 `feed` 调用保持解析状态。
#[derive(Debug, Default)]
pub struct Framer {
    state: FramerState,
    frames_accepted: u64,
    checksum_errors_total: u64,
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前状态快照
    pub fn state(&self) -> FramerState {
        self.state
    }

    /// 累计接受的帧数
    pub fn frames_accepted(&self) -> u64 {
        self.frames_accepted
    }

    /// 累计校验和错误数（不随批量告警清零）
    pub fn checksum_errors_total(&self) -> u64 {
        self.checksum_errors_total
    }

    /// 丢弃进行中的半帧，回到 ScanningForMagic
    ///
    /// 在数据流（重新）启动时调用。校验和错误计数保留。
    pub fn reset(&mut self) {
        self.state.magic_found = false;
        self.state.expected_len = 0;
    }

    /// 从字节源中尽可能多地取出完整帧
    ///
    /// 不会等待尚未到达的字节：当可用字节不足以推进当前状态时立即返回，
    /// 已消费的帧头不会被重新请求。
    ///
    /// # 错误
    ///
    /// 仅透传字节源的错误（短读、端口关闭），校验和错误不会作为错误返回。
    pub fn feed<S: ByteSource + ?Sized>(&mut self, source: &mut S) -> Result<FrameBatch, S::Error> {
        let mut frames = FrameBatch::new();

        loop {
            if !self.state.magic_found {
                if source.bytes_available()? < HEADER_LEN {
                    break;
                }

                let mut header = [0u8; HEADER_LEN];
                source.read_exact(&mut header)?;

                if header[0] != STREAM_MAGIC {
                    // 重同步：两个字节一起丢弃
                    trace!("Discarding non-magic header bytes {:02X?}", header);
                    continue;
                }

                self.state.magic_found = true;
                self.state.expected_len = header[1];
            }

            let expected_len = self.state.expected_len;
            let needed = expected_len as usize + 1;
            if source.bytes_available()? < needed {
                break;
            }

            let mut payload: Payload = smallvec![0u8; needed];
            source.read_exact(&mut payload)?;
            let checksum = payload.pop().unwrap_or_default();

            self.state.magic_found = false;

            if verify_checksum(expected_len, &payload, checksum) {
                self.frames_accepted += 1;
                frames.push(RawFrame { payload });
            } else {
                self.record_checksum_error();
            }
        }

        Ok(frames)
    }

    fn record_checksum_error(&mut self) {
        self.checksum_errors_total += 1;
        self.state.checksum_error_count += 1;

        if self.state.checksum_error_count >= CHECKSUM_WARN_BATCH {
            warn!(
                "{} sensor stream checksum errors (total {})",
                self.state.checksum_error_count, self.checksum_errors_total
            );
            self.state.checksum_error_count = 0;
        }
    }
}

/// 计算帧尾校验和，使 `(19 + L + Σpayload + checksum) mod 256 == 0`
pub fn checksum(len: u8, payload: &[u8]) -> u8 {
    let sum = payload
        .iter()
        .fold(STREAM_MAGIC.wrapping_add(len), |acc, b| acc.wrapping_add(*b));
    0u8.wrapping_sub(sum)
}

/// 校验帧尾
pub fn verify_checksum(len: u8, payload: &[u8], checksum: u8) -> bool {
    let sum = payload
        .iter()
        .fold(STREAM_MAGIC.wrapping_add(len), |acc, b| acc.wrapping_add(*b));
    sum.wrapping_add(checksum) == 0
}

/// 按线格式编码一个完整的流数据包（设备侧 / 测试使用）
pub fn encode_stream_frame(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let len = u8::try_from(payload.len()).map_err(|_| ProtocolError::InvalidLength {
        expected: u8::MAX as usize,
        actual: payload.len(),
    })?;

    let mut bytes = Vec::with_capacity(payload.len() + HEADER_LEN + 1);
    bytes.push(STREAM_MAGIC);
    bytes.push(len);
    bytes.extend_from_slice(payload);
    bytes.push(checksum(len, payload));
    Ok(bytes)
}

/// 内存字节队列
///
/// 按块推入字节，由分帧器按需取出。投递循环用它承接每次从串口读到的
/// 数据块，测试用它模拟任意切分。
#[derive(Debug, Default, Clone)]
pub struct ByteQueue {
    bytes: VecDeque<u8>,
}

impl ByteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个数据块
    pub fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend(chunk.iter().copied());
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}

impl ByteSource for ByteQueue {
    type Error = ProtocolError;

    fn bytes_available(&mut self) -> Result<usize, Self::Error> {
        Ok(self.bytes.len())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), Self::Error> {
        if self.bytes.len() < buf.len() {
            return Err(ProtocolError::ShortRead {
                requested: buf.len(),
                available: self.bytes.len(),
            });
        }
        let n = buf.len();
        for (dst, src) in buf.iter_mut().zip(self.bytes.drain(..n)) {
            *dst = src;
        }
        Ok(())
    }
}
