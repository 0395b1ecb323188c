//! Pipeline IO 循环模块
//!
//! 后台 RX 线程：等待串口可读 → 分帧 → 解码 → 发布 → 边沿分发。
//! 分帧器、解码布局和分发器都由该线程独占。

use crate::error::ConnectionFault;
use crate::events::EventDispatcher;
use crate::state::{RoombaContext, StatePublisher};
use roomba_protocol::{ByteSource, Framer, SensorLayout};
use roomba_serial::{RxSource, SerialRx};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Pipeline 配置
///
/// # Example
///
/// ```
/// use roomba_driver::PipelineConfig;
///
/// let config = PipelineConfig::default();
/// assert_eq!(config.poll_interval_ms, 5);
///
/// let config = PipelineConfig {
///     inactivity_timeout_ms: 0, // 关闭超时检测
///     ..PipelineConfig::default()
/// };
/// # let _ = config;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 串口等待粒度（毫秒），同时也是检查运行标志的间隔
    pub poll_interval_ms: u64,
    /// 流模式下无字节到达的超时（毫秒），0 表示不检测
    pub inactivity_timeout_ms: u64,
    /// 关闭时等待后台线程退出的超时（毫秒）
    pub join_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5,
            inactivity_timeout_ms: 1000,
            join_timeout_ms: 2000,
        }
    }
}

impl PipelineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn inactivity_timeout(&self) -> Option<Duration> {
        (self.inactivity_timeout_ms > 0).then(|| Duration::from_millis(self.inactivity_timeout_ms))
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// 统计实际读取字节数的字节源
struct CountingSource<S> {
    inner: S,
    bytes_read: u64,
}

impl<S: ByteSource> ByteSource for CountingSource<S> {
    type Error = S::Error;

    fn bytes_available(&mut self) -> Result<usize, Self::Error> {
        self.inner.bytes_available()
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), Self::Error> {
        self.inner.read_exact(buf)?;
        self.bytes_read += buf.len() as u64;
        Ok(())
    }
}

/// 单次循环的结果
enum Step {
    Continue,
    Fatal(ConnectionFault),
}

/// RX 线程主循环
///
/// # 参数
/// - `rx`: 串口接收端（独占）
/// - `ctx`: 共享上下文
/// - `layout`: 解码布局（与流请求一致）
/// - `config`: Pipeline 配置（超时阈值取自 `ctx.monitor`）
/// - `is_running`: 运行标志（Drop / shutdown 时置 false）
///
/// 致命错误（读失败、短读、解码契约破坏、超时）记录到 `ctx` 后退出循环。
/// 校验和错误只计数，不影响循环。
pub fn rx_loop<R: SerialRx + ?Sized>(
    rx: &mut R,
    ctx: Arc<RoombaContext>,
    layout: SensorLayout,
    config: PipelineConfig,
    is_running: Arc<AtomicBool>,
) {
    // 设置线程优先级（可选 feature）
    #[cfg(feature = "realtime")]
    {
        use thread_priority::*;
        use tracing::info;

        match set_current_thread_priority(ThreadPriority::Max) {
            Ok(_) => info!("RX thread priority set to MAX (realtime)"),
            Err(e) => warn!(
                "Failed to set RX thread priority: {}. \
                On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                e
            ),
        }
    }

    let publisher = StatePublisher::new(ctx.clone());
    let mut framer = Framer::new();
    let mut dispatcher = EventDispatcher::new();
    let mut epoch = ctx.stream_epoch();
    let poll_interval = config.poll_interval();

    loop {
        // Acquire: 看到 false 时也能看到关闭前的所有写入
        if !is_running.load(Ordering::Acquire) {
            trace!("RX thread: is_running flag is false, exiting");
            break;
        }

        let available = match rx.wait_readable(poll_interval) {
            Ok(n) => n,
            Err(e) => {
                if !stopping(&is_running) {
                    ctx.record_fault(ConnectionFault::from_serial(&e));
                }
                break;
            },
        };

        if available == 0 {
            if !ctx.monitor.check_connection() && ctx.is_streaming() && !stopping(&is_running) {
                let elapsed = ctx.monitor.time_since_last_activity();
                warn!("RX thread: no bytes for {:?}", elapsed);
                ctx.record_fault(ConnectionFault::InactivityTimeout {
                    elapsed_ms: elapsed.as_millis() as u64,
                    timeout_ms: ctx.monitor.timeout().as_millis() as u64,
                });
                break;
            }
            continue;
        }

        // 纪元在写 Start 之前递增，新流的字节一定在此处之后才可见
        let current_epoch = ctx.stream_epoch();
        if current_epoch != epoch {
            debug!("RX thread: stream restarted, resetting framer");
            framer.reset();
            epoch = current_epoch;
        }

        ctx.monitor.register_activity();

        match process_available(rx, &ctx, &layout, &publisher, &mut framer, &mut dispatcher) {
            Step::Continue => {},
            Step::Fatal(fault) => {
                if !stopping(&is_running) {
                    ctx.record_fault(fault);
                }
                break;
            },
        }
    }

    trace!("RX thread: loop exited");
}

fn stopping(is_running: &AtomicBool) -> bool {
    !is_running.load(Ordering::Acquire)
}

/// 把当前可读字节全部喂给分帧器，逐帧解码、发布、分发
fn process_available<R: SerialRx + ?Sized>(
    rx: &mut R,
    ctx: &RoombaContext,
    layout: &SensorLayout,
    publisher: &StatePublisher,
    framer: &mut Framer,
    dispatcher: &mut EventDispatcher,
) -> Step {
    let checksum_errors_before = framer.checksum_errors_total();
    let mut source = CountingSource {
        inner: RxSource(rx),
        bytes_read: 0,
    };
    let result = framer.feed(&mut source);

    let metrics = &ctx.metrics;
    metrics
        .bytes_received
        .fetch_add(source.bytes_read, Ordering::Relaxed);
    metrics.checksum_errors.fetch_add(
        framer.checksum_errors_total() - checksum_errors_before,
        Ordering::Relaxed,
    );

    let frames = match result {
        Ok(frames) => frames,
        Err(e) => return Step::Fatal(ConnectionFault::from_serial(&e)),
    };

    for frame in frames {
        metrics.frames_accepted.fetch_add(1, Ordering::Relaxed);

        let state = match layout.decode(frame.payload()) {
            Ok(state) => state,
            Err(e) => {
                metrics.decode_failures.fetch_add(1, Ordering::Relaxed);
                error!("RX thread: frame does not match sensor layout: {}", e);
                return Step::Fatal(ConnectionFault::DecodeContract(e.to_string()));
            },
        };

        trace!(
            "RX frame: len={} flags={:#06x}",
            frame.len(),
            state.flags.bits()
        );

        let state = publisher.publish(state);
        let edges = {
            let hooks = ctx.hooks.read();
            dispatcher.dispatch(&state, &hooks)
        };
        if edges.bump {
            metrics.bump_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    Step::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelEventHook, DeviceEvent};
    use crate::state::tests::NullTx;
    use roomba_protocol::{RobotFlags, SensorPacketId, encode_stream_frame};
    use roomba_serial::SerialError;
    use std::collections::VecDeque;
    use std::time::Instant;

    /// 预置字节的接收端（按脚本分批可读）
    struct ScriptedRx {
        chunks: VecDeque<Vec<u8>>,
        buffer: VecDeque<u8>,
        fail_when_empty: bool,
        /// 第 N 次等待期间重新启动数据流（模拟写线程并发调用 start_streaming）
        restart: Option<(usize, Arc<RoombaContext>)>,
        waits: usize,
    }

    impl ScriptedRx {
        fn new(chunks: Vec<Vec<u8>>) -> Self {
            Self {
                chunks: chunks.into(),
                buffer: VecDeque::new(),
                fail_when_empty: false,
                restart: None,
                waits: 0,
            }
        }
    }

    impl SerialRx for ScriptedRx {
        fn bytes_available(&mut self) -> Result<usize, SerialError> {
            Ok(self.buffer.len())
        }

        fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), SerialError> {
            if self.buffer.len() < buf.len() {
                return Err(SerialError::ShortRead {
                    requested: buf.len(),
                    available: self.buffer.len(),
                });
            }
            let n = buf.len();
            for (dst, src) in buf.iter_mut().zip(self.buffer.drain(..n)) {
                *dst = src;
            }
            Ok(())
        }

        fn wait_readable(&mut self, timeout: Duration) -> Result<usize, SerialError> {
            if let Some((at, ctx)) = &self.restart
                && *at == self.waits
            {
                ctx.stream_epoch.fetch_add(1, Ordering::AcqRel);
            }
            self.waits += 1;
            match self.chunks.pop_front() {
                Some(chunk) => self.buffer.extend(chunk),
                None if self.fail_when_empty => {
                    return Err(SerialError::Io(std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        "unplugged",
                    )));
                },
                None => std::thread::sleep(timeout),
            }
            Ok(self.buffer.len())
        }
    }

    fn bump_layout() -> SensorLayout {
        SensorLayout::new(&[
            SensorPacketId::BumpsWheelDrops,
            SensorPacketId::Wall,
            SensorPacketId::Buttons,
        ])
    }

    fn frame(bumps: u8, buttons: u8) -> Vec<u8> {
        encode_stream_frame(&[7, bumps, 8, 0, 18, buttons]).unwrap()
    }

    fn context(timeout_ms: u64) -> Arc<RoombaContext> {
        Arc::new(RoombaContext::new(
            Box::new(NullTx),
            Duration::from_millis(timeout_ms),
        ))
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            poll_interval_ms: 1,
            inactivity_timeout_ms: 0,
            join_timeout_ms: 100,
        }
    }

    #[test]
    fn test_pipeline_config_default() {
        let config = PipelineConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(5));
        assert_eq!(config.inactivity_timeout(), Some(Duration::from_secs(1)));
        assert_eq!(config.join_timeout(), Duration::from_secs(2));

        let disabled = PipelineConfig {
            inactivity_timeout_ms: 0,
            poll_interval_ms: 0,
            ..config
        };
        assert_eq!(disabled.inactivity_timeout(), None);
        assert_eq!(disabled.poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_loop_publishes_and_dispatches() {
        let ctx = context(1000);
        let (hook, events) = ChannelEventHook::new();
        ctx.hooks.write().add_callback(Arc::new(hook));

        let mut stream = frame(0x01, 0);
        stream.extend(frame(0x01, 0));
        stream.extend(frame(0x00, 0));
        stream.extend(frame(0x02, 0));
        let mut rx = ScriptedRx::new(vec![stream[..5].to_vec(), stream[5..].to_vec()]);
        rx.fail_when_empty = true;

        rx_loop(
            &mut rx,
            ctx.clone(),
            bump_layout(),
            config(),
            Arc::new(AtomicBool::new(true)),
        );

        let snapshot = ctx.metrics.snapshot();
        assert_eq!(snapshot.frames_accepted, 4);
        assert_eq!(snapshot.bump_events, 2);
        assert_eq!(snapshot.bytes_received, stream.len() as u64);

        let latest = StatePublisher::new(ctx.clone()).read().unwrap();
        assert_eq!(latest.flags, RobotFlags::BUMP_LEFT);

        let bumps = events
            .try_iter()
            .filter(|e| matches!(e, DeviceEvent::Bump { .. }))
            .count();
        assert_eq!(bumps, 2);

        // 脚本耗尽后的读错误被记录为致命故障
        assert!(matches!(ctx.fault(), Some(ConnectionFault::Read(_))));
    }

    #[test]
    fn test_checksum_errors_counted_not_fatal() {
        let ctx = context(1000);
        let mut bad = frame(0x01, 0);
        let last = bad.len() - 1;
        bad[last] ^= 0x01;
        let mut stream = bad;
        stream.extend(frame(0x01, 0));

        let mut rx = ScriptedRx::new(vec![stream]);
        rx.fail_when_empty = true;
        rx_loop(
            &mut rx,
            ctx.clone(),
            bump_layout(),
            config(),
            Arc::new(AtomicBool::new(true)),
        );

        let snapshot = ctx.metrics.snapshot();
        assert_eq!(snapshot.checksum_errors, 1);
        assert_eq!(snapshot.frames_accepted, 1);
        assert_eq!(snapshot.bump_events, 1);
    }

    #[test]
    fn test_layout_mismatch_is_fatal() {
        let ctx = context(1000);
        let mut rx = ScriptedRx::new(vec![encode_stream_frame(&[7, 1]).unwrap()]);

        rx_loop(
            &mut rx,
            ctx.clone(),
            bump_layout(),
            config(),
            Arc::new(AtomicBool::new(true)),
        );

        assert!(matches!(
            ctx.fault(),
            Some(ConnectionFault::DecodeContract(_))
        ));
        assert_eq!(ctx.metrics.snapshot().decode_failures, 1);
        assert!(StatePublisher::new(ctx).read().is_none());
    }

    #[test]
    fn test_restart_during_wait_drops_stale_partial_frame() {
        let ctx = context(1000);
        let stale = frame(0x00, 0);
        let fresh = frame(0x01, 0);

        let mut rx = ScriptedRx::new(vec![stale[..4].to_vec(), fresh]);
        rx.fail_when_empty = true;
        rx.restart = Some((1, ctx.clone()));
        rx_loop(
            &mut rx,
            ctx.clone(),
            bump_layout(),
            config(),
            Arc::new(AtomicBool::new(true)),
        );

        let snapshot = ctx.metrics.snapshot();
        assert_eq!(snapshot.frames_accepted, 1);
        assert_eq!(snapshot.checksum_errors, 0);
        assert_eq!(snapshot.bump_events, 1);
        let latest = StatePublisher::new(ctx).read().unwrap();
        assert_eq!(latest.flags, RobotFlags::BUMP_RIGHT);
    }

    #[test]
    fn test_inactivity_timeout_only_while_streaming() {
        let ctx = context(30);
        ctx.link.lock().streaming = true;
        ctx.monitor.register_activity();

        let mut rx = ScriptedRx::new(Vec::new());
        let start = Instant::now();
        rx_loop(
            &mut rx,
            ctx.clone(),
            bump_layout(),
            PipelineConfig {
                inactivity_timeout_ms: 30,
                ..config()
            },
            Arc::new(AtomicBool::new(true)),
        );

        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(matches!(
            ctx.fault(),
            Some(ConnectionFault::InactivityTimeout { timeout_ms: 30, .. })
        ));
    }

    #[test]
    fn test_stops_when_flag_cleared() {
        let ctx = context(10);
        let is_running = Arc::new(AtomicBool::new(true));
        let flag = is_running.clone();
        let loop_ctx = ctx.clone();

        let handle = std::thread::spawn(move || {
            let mut rx = ScriptedRx::new(Vec::new());
            rx_loop(
                &mut rx,
                loop_ctx,
                bump_layout(),
                PipelineConfig {
                    inactivity_timeout_ms: 10,
                    ..config()
                },
                flag,
            );
        });

        std::thread::sleep(Duration::from_millis(50));
        is_running.store(false, Ordering::Release);
        handle.join().unwrap();

        // 未启动数据流，不触发超时
        assert!(ctx.fault().is_none());
    }

    #[test]
    fn test_disabled_timeout_never_fires() {
        // Roomba::new 在超时关闭时以 Duration::MAX 构造监视器
        let ctx = Arc::new(RoombaContext::new(Box::new(NullTx), Duration::MAX));
        ctx.link.lock().streaming = true;
        let is_running = Arc::new(AtomicBool::new(true));
        let flag = is_running.clone();
        let loop_ctx = ctx.clone();

        let handle = std::thread::spawn(move || {
            let mut rx = ScriptedRx::new(Vec::new());
            rx_loop(&mut rx, loop_ctx, bump_layout(), config(), flag);
        });

        std::thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        is_running.store(false, Ordering::Release);
        handle.join().unwrap();
        assert!(ctx.fault().is_none());
    }
}
