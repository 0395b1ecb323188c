//! 命令写入器
//!
//! 所有写入都在粗粒度锁下进行，与状态发布和流控制互相串行。

use crate::error::DriverError;
use crate::state::{RoombaContext, SharedLink};
use roomba_protocol::{Command, SensorLayout};
use roomba_serial::SerialError;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, info, trace, warn};

/// 命令写入器（可克隆，任意线程可用）
#[derive(Clone)]
pub struct CommandWriter {
    ctx: Arc<RoombaContext>,
}

impl CommandWriter {
    pub fn new(ctx: Arc<RoombaContext>) -> Self {
        Self { ctx }
    }

    /// 写入单条命令
    pub fn send(&self, command: &Command) -> Result<(), DriverError> {
        let mut link = self.ctx.link.lock();
        self.write_locked(&mut link, command)
    }

    /// 在一次持锁内按顺序写入多条命令（中途失败即返回）
    pub fn send_batch(&self, commands: &[Command]) -> Result<(), DriverError> {
        let mut link = self.ctx.link.lock();
        for command in commands {
            self.write_locked(&mut link, command)?;
        }
        Ok(())
    }

    /// 启动传感器数据流：Start → Full → StreamRequest
    pub fn start_streaming(&self, layout: &SensorLayout) -> Result<(), DriverError> {
        let request = Command::stream_request(layout);
        let mut link = self.ctx.link.lock();
        // 先递增纪元再写命令：RX 线程读到新流字节前必然看到新纪元
        self.ctx.stream_epoch.fetch_add(1, Ordering::AcqRel);
        self.write_locked(&mut link, &Command::Start)?;
        self.write_locked(&mut link, &Command::Full)?;
        self.write_locked(&mut link, &request)?;
        link.streaming = true;
        self.ctx.monitor.register_activity();
        info!(
            "Sensor stream started ({} packets, {} byte payload)",
            layout.packets().len(),
            layout.payload_len()
        );
        Ok(())
    }

    /// 停止数据流、回到基础状态并关闭发送端
    ///
    /// 顺序（同一持锁内）：PauseResumeStream(false) → Start → close。
    /// 每一步失败都只记录并继续，返回第一个错误。已关闭时直接返回 `Ok`。
    pub fn stop_and_close(&self) -> Result<(), DriverError> {
        let mut link = self.ctx.link.lock();
        if link.is_closed() {
            return Ok(());
        }

        let mut first_error = None;
        for command in [Command::PauseResumeStream { resume: false }, Command::Start] {
            if let Err(e) = self.write_locked(&mut link, &command) {
                warn!("Failed to write {:?} during shutdown: {}", command.opcode(), e);
                first_error.get_or_insert(e);
            }
        }
        link.streaming = false;

        if let Some(mut tx) = link.tx.take()
            && let Err(e) = tx.close()
        {
            warn!("Failed to close serial sink: {}", e);
            first_error.get_or_insert(DriverError::Serial(e));
        }
        debug!("Serial sink closed");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.ctx.link.lock().is_closed()
    }

    fn write_locked(&self, link: &mut SharedLink, command: &Command) -> Result<(), DriverError> {
        let bytes = command.encode()?;
        let tx = link.tx.as_mut().ok_or(DriverError::SinkClosed)?;
        match tx.write_all(&bytes) {
            Ok(()) => {
                self.ctx.metrics.commands_written.fetch_add(1, Ordering::Relaxed);
                trace!("TX {:?}: {:02X?}", command.opcode(), bytes.as_slice());
                Ok(())
            },
            Err(SerialError::Closed) => Err(DriverError::SinkClosed),
            Err(e) => Err(e.into()),
        }
    }
}
