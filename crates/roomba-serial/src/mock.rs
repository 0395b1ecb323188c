//! 内存串口（测试用）
//!
//! `MockSerialPort` 拆分出的 RX/TX 与 `MockHandle` 共享同一块缓冲区：
//! 测试通过 handle 注入"设备发来的"字节、检查驱动写出的命令字节，
//! 或模拟设备断开。

use crate::{SerialError, SerialRx, SerialTx, SplittablePort};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct MockState {
    /// 设备 → 主机
    inbound: VecDeque<u8>,
    /// 主机 → 设备
    written: Vec<u8>,
    /// 每次 write_all 的边界（用于按命令拆分）
    writes: Vec<Vec<u8>>,
    closed: bool,
    disconnected: bool,
}

#[derive(Default)]
struct MockShared {
    state: Mutex<MockState>,
    readable: Condvar,
}

/// 内存串口
#[derive(Default)]
pub struct MockSerialPort {
    shared: Arc<MockShared>,
}

impl MockSerialPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// 测试侧句柄（可在 split 之后继续使用）
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            shared: self.shared.clone(),
        }
    }
}

impl SplittablePort for MockSerialPort {
    type Rx = MockSerialRx;
    type Tx = MockSerialTx;

    fn split(self) -> Result<(Self::Rx, Self::Tx), SerialError> {
        Ok((
            MockSerialRx {
                shared: self.shared.clone(),
            },
            MockSerialTx {
                shared: self.shared,
            },
        ))
    }
}

/// 测试侧句柄
#[derive(Clone)]
pub struct MockHandle {
    shared: Arc<MockShared>,
}

impl MockHandle {
    /// 注入设备发来的字节
    pub fn inject(&self, bytes: &[u8]) {
        let mut state = self.shared.state.lock();
        state.inbound.extend(bytes.iter().copied());
        self.shared.readable.notify_all();
    }

    /// 模拟设备断开：之后的读操作返回 IO 错误
    pub fn disconnect(&self) {
        self.shared.state.lock().disconnected = true;
        self.shared.readable.notify_all();
    }

    /// 驱动写出的全部字节
    pub fn written(&self) -> Vec<u8> {
        self.shared.state.lock().written.clone()
    }

    /// 驱动每次写出的字节块（一条命令一块）
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.shared.state.lock().writes.clone()
    }

    /// 清空已记录的写出字节
    pub fn clear_written(&self) {
        let mut state = self.shared.state.lock();
        state.written.clear();
        state.writes.clear();
    }

    /// TX 是否已关闭
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// 尚未被读取的注入字节数
    pub fn pending_inbound(&self) -> usize {
        self.shared.state.lock().inbound.len()
    }
}

/// 内存串口接收端
pub struct MockSerialRx {
    shared: Arc<MockShared>,
}

fn disconnected_error() -> SerialError {
    SerialError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "mock serial port disconnected",
    ))
}

impl SerialRx for MockSerialRx {
    fn bytes_available(&mut self) -> Result<usize, SerialError> {
        let state = self.shared.state.lock();
        if state.disconnected {
            return Err(disconnected_error());
        }
        Ok(state.inbound.len())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), SerialError> {
        let mut state = self.shared.state.lock();
        if state.disconnected {
            return Err(disconnected_error());
        }
        if state.inbound.len() < buf.len() {
            return Err(SerialError::ShortRead {
                requested: buf.len(),
                available: state.inbound.len(),
            });
        }
        let n = buf.len();
        for (dst, src) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *dst = src;
        }
        Ok(())
    }

    fn wait_readable(&mut self, timeout: Duration) -> Result<usize, SerialError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if state.disconnected {
                return Err(disconnected_error());
            }
            if !state.inbound.is_empty() {
                return Ok(state.inbound.len());
            }
            if self
                .shared
                .readable
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return Ok(state.inbound.len());
            }
        }
    }
}

/// 内存串口发送端
pub struct MockSerialTx {
    shared: Arc<MockShared>,
}

impl SerialTx for MockSerialTx {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SerialError> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(SerialError::Closed);
        }
        state.written.extend_from_slice(bytes);
        state.writes.push(bytes.to_vec());
        Ok(())
    }

    fn close(&mut self) -> Result<(), SerialError> {
        self.shared.state.lock().closed = true;
        Ok(())
    }
}
