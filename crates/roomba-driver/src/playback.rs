//! 回放工作线程
//!
//! Play 按钮上升沿不会在 IO 线程里执行回调：分发器只把
//! `(distance, angle)` 投递给专用工作线程，由它调用用户回调取得音调序列，
//! 再在一次持锁内写出 "定义歌曲" + "播放歌曲"。
//!
//! 回放是串行的：`in_flight` 标志通过 compare-exchange 占用，回放进行中到达的
//! 请求直接丢弃并计入 `playback_skipped`。

use crate::events::EventCallback;
use crate::metrics::DriverMetrics;
use crate::state::RoombaContext;
use crate::writer::CommandWriter;
use crossbeam_channel::{Receiver, Sender, bounded, select};
use parking_lot::RwLock;
use roomba_protocol::{Command, RobotState, notes_from_tones};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use tracing::{debug, error, trace, warn};

/// Play 回调：根据行驶距离（m）和转角（rad）返回音调序列
/// `[pitch, duration, pitch, duration, ...]`
pub trait PlayCallback: Send + Sync {
    fn tones(&self, distance: f64, angle: f64) -> Result<Vec<u8>, String>;
}

impl<F> PlayCallback for F
where
    F: Fn(f64, f64) -> Result<Vec<u8>, String> + Send + Sync,
{
    fn tones(&self, distance: f64, angle: f64) -> Result<Vec<u8>, String> {
        self(distance, angle)
    }
}

/// 回调插槽（可在运行时替换）
pub type PlayCallbackSlot = Arc<RwLock<Option<Arc<dyn PlayCallback>>>>;

#[derive(Debug, Clone, Copy)]
struct PlayJob {
    distance: f64,
    angle: f64,
}

/// 投递端：注册为事件回调，在 Play 上升沿时尝试占用回放
pub struct PlaybackTrigger {
    jobs: Sender<PlayJob>,
    in_flight: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    callback: PlayCallbackSlot,
    // 触发器注册在 ctx.hooks 中，持有强引用会形成环
    ctx: Weak<RoombaContext>,
}

impl PlaybackTrigger {
    /// 请求一次回放；返回是否已投递
    pub fn request(&self, distance: f64, angle: f64) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        if self.callback.read().is_none() {
            trace!("Play requested with no callback registered");
            return false;
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            if let Some(ctx) = self.ctx.upgrade() {
                ctx.metrics.playback_skipped.fetch_add(1, Ordering::Relaxed);
            }
            debug!("Playback in progress, dropping play request");
            return false;
        }

        if self.jobs.try_send(PlayJob { distance, angle }).is_err() {
            // 工作线程已停止
            self.in_flight.store(false, Ordering::Release);
            return false;
        }
        true
    }
}

impl EventCallback for PlaybackTrigger {
    fn on_play_requested(&self, state: &RobotState) {
        self.request(state.distance_traveled, state.angle_traveled);
    }
}

/// 回放工作线程
pub struct PlaybackWorker {
    trigger: Arc<PlaybackTrigger>,
    in_flight: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PlaybackWorker {
    /// 启动工作线程
    ///
    /// `song_number` 是定义/播放时使用的歌曲槽位（0..=15）。
    pub fn spawn(
        ctx: Arc<RoombaContext>,
        callback: PlayCallbackSlot,
        song_number: u8,
    ) -> std::io::Result<Self> {
        // 容量 1：同一时刻最多一个回放任务
        let (jobs_tx, jobs_rx) = bounded(1);
        let (shutdown_tx, shutdown_rx) = bounded(0);
        let in_flight = Arc::new(AtomicBool::new(false));
        let stopped = Arc::new(AtomicBool::new(false));

        let worker_ctx = ctx.clone();
        let worker_callback = callback.clone();
        let worker_in_flight = in_flight.clone();
        let handle = std::thread::Builder::new()
            .name("roomba-playback".to_string())
            .spawn(move || {
                playback_loop(
                    jobs_rx,
                    shutdown_rx,
                    worker_ctx,
                    worker_callback,
                    worker_in_flight,
                    song_number,
                )
            })?;

        let trigger = Arc::new(PlaybackTrigger {
            jobs: jobs_tx,
            in_flight: in_flight.clone(),
            stopped: stopped.clone(),
            callback,
            ctx: Arc::downgrade(&ctx),
        });

        Ok(Self {
            trigger,
            in_flight,
            stopped,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn trigger(&self) -> Arc<PlaybackTrigger> {
        self.trigger.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// 停止接收新任务并通知工作线程退出，返回线程句柄供调用方 join
    ///
    /// 正在执行的回放会先完成；已排队但未开始的任务被丢弃。
    pub fn stop(&mut self) -> Option<JoinHandle<()>> {
        self.stopped.store(true, Ordering::Release);
        self.shutdown.take();
        self.handle.take()
    }
}

fn playback_loop(
    jobs: Receiver<PlayJob>,
    shutdown: Receiver<()>,
    ctx: Arc<RoombaContext>,
    callback: PlayCallbackSlot,
    in_flight: Arc<AtomicBool>,
    song_number: u8,
) {
    let writer = CommandWriter::new(ctx.clone());
    loop {
        select! {
            recv(shutdown) -> _ => break,
            recv(jobs) -> job => {
                let Ok(job) = job else { break };
                let callback = callback.read().clone();
                if let Some(callback) = callback {
                    run_playback(&writer, &ctx.metrics, callback.as_ref(), job, song_number);
                }
                in_flight.store(false, Ordering::Release);
            },
        }
    }
    trace!("Playback worker exited");
}

fn run_playback(
    writer: &CommandWriter,
    metrics: &DriverMetrics,
    callback: &dyn PlayCallback,
    job: PlayJob,
    song_number: u8,
) {
    metrics.playback_started.fetch_add(1, Ordering::Relaxed);

    let tones = match catch_unwind(AssertUnwindSafe(|| callback.tones(job.distance, job.angle))) {
        Ok(Ok(tones)) => tones,
        Ok(Err(e)) => {
            warn!("Play callback failed: {}", e);
            metrics.playback_failed.fetch_add(1, Ordering::Relaxed);
            return;
        },
        Err(_) => {
            error!("Play callback panicked");
            metrics.playback_failed.fetch_add(1, Ordering::Relaxed);
            return;
        },
    };

    let notes = match notes_from_tones(&tones) {
        Ok(notes) => notes,
        Err(e) => {
            warn!("Play callback returned invalid tones: {}", e);
            metrics.playback_failed.fetch_add(1, Ordering::Relaxed);
            return;
        },
    };

    let note_count = notes.len();
    let result = writer.send_batch(&[
        Command::Song {
            number: song_number,
            notes,
        },
        Command::Play {
            number: song_number,
        },
    ]);
    match result {
        Ok(()) => debug!("Playing song {} ({} notes)", song_number, note_count),
        Err(e) => {
            warn!("Failed to write song: {}", e);
            metrics.playback_failed.fetch_add(1, Ordering::Relaxed);
        },
    }
}
