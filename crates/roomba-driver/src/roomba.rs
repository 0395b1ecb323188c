//! Robot API 模块
//!
//! 提供对外的 `Roomba` 结构体，封装 IO 线程、回放线程和共享状态。

use crate::error::DriverError;
use crate::events::EventCallback;
use crate::metrics::MetricsSnapshot;
use crate::pipeline::{PipelineConfig, rx_loop};
use crate::playback::{PlayCallback, PlayCallbackSlot, PlaybackWorker};
use crate::state::{RoombaContext, StateFeed, StatePublisher};
use crate::writer::CommandWriter;
use parking_lot::RwLock;
use roomba_protocol::{Command, LedState, RobotState, SensorLayout, notes_from_tones};
use roomba_serial::SplittablePort;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::Duration;
use tracing::{error, info, warn};

/// Extension trait for timeout-capable thread joins
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: std::marker::Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();

        // Watchdog thread joins the target; it is abandoned on timeout
        spawn(move || {
            let result = self.join();
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

/// Roomba 驱动（对外 API）
///
/// - RX 线程：独占串口接收端，分帧、解码、发布、边沿分发
/// - 回放线程：执行 Play 回调并写出歌曲
/// - 命令写入：任意线程，经粗粒度锁写入串口发送端
///
/// Drop 时自动执行 [`shutdown`](Self::shutdown)。
pub struct Roomba {
    ctx: Arc<RoombaContext>,
    writer: CommandWriter,
    layout: SensorLayout,
    config: PipelineConfig,
    is_running: Arc<AtomicBool>,
    rx_thread: Option<JoinHandle<()>>,
    playback: PlaybackWorker,
    play_callback: PlayCallbackSlot,
    shut_down: bool,
}

impl Roomba {
    /// 拆分串口并启动后台线程（不启动数据流）
    ///
    /// # 参数
    /// - `port`: 可拆分的串口
    /// - `layout`: 传感器布局（流请求与解码共用）
    /// - `config`: Pipeline 配置
    /// - `song_number`: Play 回放使用的歌曲槽位
    pub fn new<P: SplittablePort>(
        port: P,
        layout: SensorLayout,
        config: PipelineConfig,
        song_number: u8,
    ) -> Result<Self, DriverError> {
        let (rx, tx) = port.split()?;
        let ctx = Arc::new(RoombaContext::new(
            Box::new(tx),
            config.inactivity_timeout().unwrap_or(Duration::MAX),
        ));
        let is_running = Arc::new(AtomicBool::new(true));

        let play_callback: PlayCallbackSlot = Arc::new(RwLock::new(None));
        let playback = PlaybackWorker::spawn(ctx.clone(), play_callback.clone(), song_number)
            .map_err(|e| DriverError::IoThread(e.to_string()))?;
        ctx.hooks.write().add_callback(playback.trigger());

        let rx_ctx = ctx.clone();
        let rx_layout = layout.clone();
        let rx_config = config.clone();
        let rx_running = is_running.clone();
        let rx_thread = std::thread::Builder::new()
            .name("roomba-rx".to_string())
            .spawn(move || {
                let mut rx = rx;
                rx_loop(&mut rx, rx_ctx, rx_layout, rx_config, rx_running);
            });

        let rx_thread = match rx_thread {
            Ok(handle) => handle,
            Err(e) => {
                let mut playback = playback;
                if let Some(handle) = playback.stop() {
                    let _ = handle.join_timeout(config.join_timeout());
                }
                return Err(DriverError::IoThread(e.to_string()));
            },
        };

        info!(
            "Roomba driver started ({} byte sensor payload)",
            layout.payload_len()
        );

        Ok(Self {
            writer: CommandWriter::new(ctx.clone()),
            ctx,
            layout,
            config,
            is_running,
            rx_thread: Some(rx_thread),
            playback,
            play_callback,
            shut_down: false,
        })
    }

    /// 启动传感器数据流：Start → Full → StreamRequest(layout)
    pub fn start_streaming(&self) -> Result<(), DriverError> {
        self.writer.start_streaming(&self.layout)
    }

    pub fn is_streaming(&self) -> bool {
        self.ctx.is_streaming()
    }

    /// 写入任意命令
    pub fn send(&self, command: &Command) -> Result<(), DriverError> {
        self.writer.send(command)
    }

    /// 速度（m/s）+ 半径（m）驱动；`f64::INFINITY` 半径表示直线
    pub fn drive(&self, velocity: f64, radius: f64) -> Result<(), DriverError> {
        self.send(&Command::drive_si(velocity, radius))
    }

    /// 左右轮直接驱动（m/s）
    pub fn drive_direct(&self, right: f64, left: f64) -> Result<(), DriverError> {
        self.send(&Command::drive_direct_si(right, left))
    }

    /// 停止运动
    pub fn stop(&self) -> Result<(), DriverError> {
        self.send(&Command::drive_direct(0, 0))
    }

    pub fn set_leds(&self, leds: LedState) -> Result<(), DriverError> {
        self.send(&Command::Leds(leds))
    }

    /// 定义并立即播放歌曲（同一次持锁）
    pub fn play_song(&self, number: u8, tones: &[u8]) -> Result<(), DriverError> {
        let notes = notes_from_tones(tones)?;
        self.writer
            .send_batch(&[Command::Song { number, notes }, Command::Play { number }])
    }

    /// 最新状态的一致快照
    pub fn read_state(&self) -> Option<Arc<RobotState>> {
        StatePublisher::new(self.ctx.clone()).read()
    }

    /// 注册消费者并返回状态 feed
    pub fn attach_feed(&self) -> StateFeed {
        StatePublisher::new(self.ctx.clone()).attach()
    }

    /// 设置 Play 按钮回调（替换已有回调）
    pub fn set_play_callback(&self, callback: impl PlayCallback + 'static) {
        *self.play_callback.write() = Some(Arc::new(callback));
    }

    pub fn clear_play_callback(&self) {
        *self.play_callback.write() = None;
    }

    /// 注册事件回调（在 IO 线程中调用，必须非阻塞）
    pub fn register_event_callback(&self, callback: Arc<dyn EventCallback>) {
        self.ctx.hooks.write().add_callback(callback);
    }

    pub fn is_playing(&self) -> bool {
        self.playback.is_playing()
    }

    /// 连接健康状态
    ///
    /// IO 线程记录了致命故障时返回 `Err(DriverError::Connection(fault))`，
    /// 调用方应随后执行 `shutdown()`。
    pub fn health(&self) -> Result<(), DriverError> {
        match self.ctx.fault() {
            Some(fault) => Err(DriverError::Connection(fault)),
            None => Ok(()),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.ctx.metrics.reset();
    }

    pub fn layout(&self) -> &SensorLayout {
        &self.layout
    }

    pub fn pipeline_config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 关闭驱动
    ///
    /// 1. 持锁：暂停数据流 → Start（回到基础状态）→ 关闭发送端
    /// 2. 停止回放、清除运行标志
    /// 3. 在超时内 join RX / 回放线程（超时的线程被放弃并记录）
    ///
    /// 幂等；返回第 1 步中的第一个写入错误。
    pub fn shutdown(&mut self) -> Result<(), DriverError> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        let result = self.writer.stop_and_close();
        if let Err(e) = &result {
            warn!("Roomba shutdown: stream stop incomplete: {}", e);
        }

        let playback_thread = self.playback.stop();
        // Release: 看到 false 的线程也能看到之前的所有写入
        self.is_running.store(false, Ordering::Release);

        let join_timeout = self.config.join_timeout();
        if let Some(handle) = self.rx_thread.take()
            && let Err(_e) = handle.join_timeout(join_timeout)
        {
            error!(
                "RX thread failed to shut down within {:?}, abandoning it",
                join_timeout
            );
        }
        if let Some(handle) = playback_thread
            && let Err(_e) = handle.join_timeout(join_timeout)
        {
            error!(
                "Playback thread failed to shut down within {:?}, abandoning it",
                join_timeout
            );
        }

        info!("Roomba driver shut down");
        result
    }
}

impl Drop for Roomba {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
