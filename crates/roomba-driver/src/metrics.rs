//! 驱动运行指标
//!
//! 原子计数器，IO 线程、回放线程和命令路径各自更新，任意线程读取快照。

use std::sync::atomic::{AtomicU64, Ordering};

/// 驱动实时指标
///
/// # 使用示例
///
/// ```rust
/// use roomba_driver::DriverMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = DriverMetrics::new();
/// metrics.frames_accepted.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(metrics.snapshot().frames_accepted, 1);
/// ```
#[derive(Debug, Default)]
pub struct DriverMetrics {
    /// 分帧器从串口读取的总字节数
    pub bytes_received: AtomicU64,

    /// 通过校验的帧数
    pub frames_accepted: AtomicU64,

    /// 校验和错误次数
    pub checksum_errors: AtomicU64,

    /// 解码失败次数（布局与帧长度不一致）
    pub decode_failures: AtomicU64,

    /// 成功写出的命令数
    pub commands_written: AtomicU64,

    /// 碰撞上升沿次数
    pub bump_events: AtomicU64,

    /// 开始执行的回放次数
    pub playback_started: AtomicU64,

    /// 因已有回放在进行而被丢弃的播放请求
    pub playback_skipped: AtomicU64,

    /// 回放失败次数（回调返回错误 / panic / 写入失败）
    pub playback_failed: AtomicU64,
}

impl DriverMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            frames_accepted: self.frames_accepted.load(Ordering::Relaxed),
            checksum_errors: self.checksum_errors.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            commands_written: self.commands_written.load(Ordering::Relaxed),
            bump_events: self.bump_events.load(Ordering::Relaxed),
            playback_started: self.playback_started.load(Ordering::Relaxed),
            playback_skipped: self.playback_skipped.load(Ordering::Relaxed),
            playback_failed: self.playback_failed.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        self.bytes_received.store(0, Ordering::Relaxed);
        self.frames_accepted.store(0, Ordering::Relaxed);
        self.checksum_errors.store(0, Ordering::Relaxed);
        self.decode_failures.store(0, Ordering::Relaxed);
        self.commands_written.store(0, Ordering::Relaxed);
        self.bump_events.store(0, Ordering::Relaxed);
        self.playback_started.store(0, Ordering::Relaxed);
        self.playback_skipped.store(0, Ordering::Relaxed);
        self.playback_failed.store(0, Ordering::Relaxed);
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub bytes_received: u64,
    pub frames_accepted: u64,
    pub checksum_errors: u64,
    pub decode_failures: u64,
    pub commands_written: u64,
    pub bump_events: u64,
    pub playback_started: u64,
    pub playback_skipped: u64,
    pub playback_failed: u64,
}

impl MetricsSnapshot {
    /// 校验和错误率（百分比），无帧时返回 0.0
    pub fn checksum_error_rate(&self) -> f64 {
        let total = self.frames_accepted + self.checksum_errors;
        if total == 0 {
            return 0.0;
        }
        (self.checksum_errors as f64 / total as f64) * 100.0
    }
}
