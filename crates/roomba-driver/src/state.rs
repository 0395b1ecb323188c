//! 共享状态与状态发布
//!
//! - [`SharedLink`]: 粗粒度锁保护的连接状态（最新状态、消费者标志、发送端、流标志）。
//!   发布、命令写入和流控制都在同一把锁下进行，互相串行。
//! - [`StatePublisher`]: IO 线程发布最新状态；任意线程读取一致快照。
//! - [`StateFeed`]: 解耦的消费者接口（无锁最新值插槽 + 序号），不排队、无背压。
//! - [`RoombaContext`]: IO 线程、回放线程与对外 API 共享的上下文。

use crate::error::ConnectionFault;
use crate::events::EventHooks;
use crate::heartbeat::ConnectionMonitor;
use crate::metrics::DriverMetrics;
use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, RwLock};
use roomba_protocol::RobotState;
use roomba_serial::SerialTx;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::error;

/// 粗粒度锁保护的连接状态
pub struct SharedLink {
    /// 命令发送端（关闭后为 None）
    pub(crate) tx: Option<Box<dyn SerialTx>>,
    /// 传感器数据流是否已启动
    pub(crate) streaming: bool,
    /// 最新解码状态
    pub(crate) latest: Option<Arc<RobotState>>,
    /// 是否曾有消费者 attach
    pub(crate) consumer_attached: bool,
}

impl SharedLink {
    pub fn new(tx: Box<dyn SerialTx>) -> Self {
        Self {
            tx: Some(tx),
            streaming: false,
            latest: None,
            consumer_attached: false,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }
}

/// 最新值插槽（无锁）
#[derive(Default)]
pub(crate) struct FeedSlot {
    latest: ArcSwapOption<RobotState>,
    sequence: AtomicU64,
}

impl FeedSlot {
    fn store(&self, state: Arc<RobotState>) {
        self.latest.store(Some(state));
        self.sequence.fetch_add(1, Ordering::Release);
    }
}

/// 状态消费者
///
/// 按自己的节奏读取最新状态：`peek` 总是返回最新值，`poll_new` 只在
/// 自上次读取后有新状态时返回。两次读取之间发布的中间状态不保留。
#[derive(Clone)]
pub struct StateFeed {
    slot: Arc<FeedSlot>,
    last_seen: u64,
}

impl StateFeed {
    pub(crate) fn new(slot: Arc<FeedSlot>) -> Self {
        Self { slot, last_seen: 0 }
    }

    /// 最新状态（不改变已读序号）
    pub fn peek(&self) -> Option<Arc<RobotState>> {
        self.slot.latest.load_full()
    }

    /// 自上次 `poll_new` 以来若有新状态则返回
    pub fn poll_new(&mut self) -> Option<Arc<RobotState>> {
        let sequence = self.slot.sequence.load(Ordering::Acquire);
        if sequence == self.last_seen {
            return None;
        }
        self.last_seen = sequence;
        self.peek()
    }

    /// 已发布到该 feed 的状态总数
    pub fn sequence(&self) -> u64 {
        self.slot.sequence.load(Ordering::Acquire)
    }
}

/// 共享上下文
///
/// 热数据（feed）使用 ArcSwap，连接状态使用粗粒度 Mutex，
/// 冷数据（故障原因、回调注册表）使用 RwLock。
pub struct RoombaContext {
    pub(crate) link: Mutex<SharedLink>,
    pub(crate) feed: Arc<FeedSlot>,
    pub hooks: RwLock<EventHooks>,
    pub metrics: DriverMetrics,
    pub monitor: ConnectionMonitor,
    /// 每次（重新）启动数据流时递增，IO 线程据此重置分帧器
    pub(crate) stream_epoch: AtomicU64,
    fault: RwLock<Option<ConnectionFault>>,
    connection_lost: AtomicBool,
}

impl RoombaContext {
    pub fn new(tx: Box<dyn SerialTx>, inactivity_timeout: Duration) -> Self {
        Self {
            link: Mutex::new(SharedLink::new(tx)),
            feed: Arc::new(FeedSlot::default()),
            hooks: RwLock::new(EventHooks::new()),
            metrics: DriverMetrics::new(),
            monitor: ConnectionMonitor::new(inactivity_timeout),
            stream_epoch: AtomicU64::new(0),
            fault: RwLock::new(None),
            connection_lost: AtomicBool::new(false),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.link.lock().streaming
    }

    pub fn is_connection_lost(&self) -> bool {
        self.connection_lost.load(Ordering::Acquire)
    }

    /// 首个致命故障（之后的故障不覆盖）
    pub fn fault(&self) -> Option<ConnectionFault> {
        self.fault.read().clone()
    }

    pub(crate) fn record_fault(&self, fault: ConnectionFault) {
        error!("Connection fault: {}", fault);
        let mut slot = self.fault.write();
        if slot.is_none() {
            *slot = Some(fault);
        }
        self.connection_lost.store(true, Ordering::Release);
    }

    pub(crate) fn stream_epoch(&self) -> u64 {
        self.stream_epoch.load(Ordering::Acquire)
    }
}

/// 状态发布器
#[derive(Clone)]
pub struct StatePublisher {
    ctx: Arc<RoombaContext>,
}

impl StatePublisher {
    pub fn new(ctx: Arc<RoombaContext>) -> Self {
        Self { ctx }
    }

    /// 替换最新状态（没有消费者时只存储）
    pub fn publish(&self, state: RobotState) -> Arc<RobotState> {
        let state = Arc::new(state);
        let mut link = self.ctx.link.lock();
        link.latest = Some(state.clone());
        if link.consumer_attached {
            self.ctx.feed.store(state.clone());
        }
        state
    }

    /// 一致的最新状态快照
    pub fn read(&self) -> Option<Arc<RobotState>> {
        self.ctx.link.lock().latest.clone()
    }

    /// 注册消费者并返回 feed（已有状态时立即可见）
    pub fn attach(&self) -> StateFeed {
        let mut link = self.ctx.link.lock();
        if !link.consumer_attached {
            link.consumer_attached = true;
            if let Some(latest) = &link.latest {
                self.ctx.feed.store(latest.clone());
            }
        }
        StateFeed::new(self.ctx.feed.clone())
    }

    pub fn has_consumer(&self) -> bool {
        self.ctx.link.lock().consumer_attached
    }
}
