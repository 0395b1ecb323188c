//! 边沿触发事件（Edge-Triggered Events）
//!
//! [`EventDispatcher`] 逐帧观察解码后的 [`RobotState`]，在数字标志位的
//! 0→1 跳变时触发一次回调：
//!
//! - **碰撞**: "无碰撞位" → "任一碰撞位"（左 / 右）
//! - **Play 按钮**: 未按下 → 按下
//!
//! 标志位保持置位期间不会重复触发；清零后重新布防。
//!
//! 回调通过 [`EventHooks`] 注册：所有回调在 IO 线程
//! 中同步调用，必须是非阻塞的。需要做耗时工作的回调应当把事件转发到
//! 通道（见 [`ChannelEventHook`]）或工作线程（回放即如此实现）。
//!
//! # 使用示例
//!
//! ```rust
//! use roomba_driver::events::{ChannelEventHook, EventCallback, EventHooks};
//! use std::sync::Arc;
//!
//! let mut hooks = EventHooks::new();
//! let (hook, rx) = ChannelEventHook::new();
//! hooks.add_callback(Arc::new(hook) as Arc<dyn EventCallback>);
//! assert_eq!(hooks.len(), 1);
//! # drop(rx);
//! ```

use crossbeam_channel::{Receiver, Sender, bounded};
use roomba_protocol::{RobotFlags, RobotState};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error};

/// 边沿检测状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EdgeState {
    pub bump_latched: bool,
    pub play_button_latched: bool,
}

/// 单帧检测到的上升沿
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Edges {
    pub bump: bool,
    pub play: bool,
}

impl Edges {
    pub fn any(&self) -> bool {
        self.bump || self.play
    }
}

/// 离散设备事件（通道转发用）
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceEvent {
    Bump {
        timestamp: f64,
        flags: RobotFlags,
    },
    PlayRequested {
        timestamp: f64,
        distance_traveled: f64,
        angle_traveled: f64,
    },
}

/// 事件回调 Trait
///
/// 在 IO 线程中调用，实现必须非阻塞（推荐 `try_send`）。
pub trait EventCallback: Send + Sync {
    /// 碰撞上升沿
    fn on_bump(&self, state: &RobotState) {
        let _ = state;
    }

    /// Play 按钮上升沿
    fn on_play_requested(&self, state: &RobotState) {
        let _ = state;
    }
}

/// 事件回调注册表
///
/// 本身不是线程安全的，由外部 `RwLock` 同步。
#[derive(Default)]
pub struct EventHooks {
    callbacks: Vec<Arc<dyn EventCallback>>,
}

impl EventHooks {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }

    pub fn add_callback(&mut self, callback: Arc<dyn EventCallback>) {
        self.callbacks.push(callback);
    }

    pub fn clear(&mut self) {
        self.callbacks.clear();
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// 触发所有碰撞回调
    ///
    /// 单个回调 panic 只影响它自己，不会中断 IO 线程。
    pub fn trigger_bump(&self, state: &RobotState) {
        for callback in self.callbacks.iter() {
            if catch_unwind(AssertUnwindSafe(|| callback.on_bump(state))).is_err() {
                error!("Bump callback panicked");
            }
        }
    }

    /// 触发所有 Play 回调
    pub fn trigger_play(&self, state: &RobotState) {
        for callback in self.callbacks.iter() {
            if catch_unwind(AssertUnwindSafe(|| callback.on_play_requested(state))).is_err() {
                error!("Play callback panicked");
            }
        }
    }
}

/// 边沿触发分发器
///
/// 由 IO 线程独占，每个解码帧调用一次 [`dispatch`](Self::dispatch)。
#[derive(Debug, Default)]
pub struct EventDispatcher {
    edges: EdgeState,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edge_state(&self) -> EdgeState {
        self.edges
    }

    /// 更新锁存状态并返回本帧的上升沿（不触发回调）
    pub fn observe(&mut self, state: &RobotState) -> Edges {
        let bumped = state.is_bumped();
        let play = state.play_pressed();

        let edges = Edges {
            bump: bumped && !self.edges.bump_latched,
            play: play && !self.edges.play_button_latched,
        };

        self.edges = EdgeState {
            bump_latched: bumped,
            play_button_latched: play,
        };
        edges
    }

    /// 检测上升沿并触发对应回调
    pub fn dispatch(&mut self, state: &RobotState, hooks: &EventHooks) -> Edges {
        let edges = self.observe(state);
        if edges.bump {
            debug!("Bump detected (flags={:#06x})", state.flags.bits());
            hooks.trigger_bump(state);
        }
        if edges.play {
            debug!("Play button pressed");
            hooks.trigger_play(state);
        }
        edges
    }
}

/// 通道事件钩子
///
/// 把事件转发到有界通道，队列满时丢弃事件并计数。
pub struct ChannelEventHook {
    tx: Sender<DeviceEvent>,
    dropped_events: Arc<AtomicU64>,
    event_counter: Arc<AtomicU64>,
}

impl ChannelEventHook {
    /// 默认队列容量
    pub const DEFAULT_CAPACITY: usize = 1024;

    #[must_use]
    pub fn new() -> (Self, Receiver<DeviceEvent>) {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> (Self, Receiver<DeviceEvent>) {
        let (tx, rx) = bounded(capacity);
        let hook = Self {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
            event_counter: Arc::new(AtomicU64::new(0)),
        };
        (hook, rx)
    }

    pub fn dropped_events(&self) -> &Arc<AtomicU64> {
        &self.dropped_events
    }

    pub fn event_counter(&self) -> &Arc<AtomicU64> {
        &self.event_counter
    }

    fn forward(&self, event: DeviceEvent) {
        if self.tx.try_send(event).is_ok() {
            self.event_counter.fetch_add(1, Ordering::Relaxed);
        } else {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl EventCallback for ChannelEventHook {
    fn on_bump(&self, state: &RobotState) {
        self.forward(DeviceEvent::Bump {
            timestamp: state.timestamp,
            flags: state.flags,
        });
    }

    fn on_play_requested(&self, state: &RobotState) {
        self.forward(DeviceEvent::PlayRequested {
            timestamp: state.timestamp,
            distance_traveled: state.distance_traveled,
            angle_traveled: state.angle_traveled,
        });
    }
}
