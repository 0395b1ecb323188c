//! # Roomba Serial Adapter Layer
//!
//! 串口硬件抽象层：把物理串口视为字节源（RX）和字节汇（TX）。
//!
//! - `SerialRx` / `SerialTx`: 分离后的接收端 / 发送端
//! - `SplittablePort`: 打开的串口可以拆分为独立的 RX / TX，分别交给 IO 线程和命令路径
//! - `RxSource`: 把任意 `SerialRx` 适配为分帧器使用的 `ByteSource`
//! - `mock`（feature `mock`）: 内存串口，用于无硬件测试
//! - `serial_port`（feature `serialport`）: 基于 `serialport` crate 的真实串口

use roomba_protocol::ByteSource;
use std::time::Duration;
use thiserror::Error;

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockHandle, MockSerialPort, MockSerialRx, MockSerialTx};

#[cfg(feature = "serialport")]
pub mod serial_port;

#[cfg(feature = "serialport")]
pub use serial_port::{SerialPortAdapter, SerialPortRx, SerialPortTx};

/// Open Interface 默认波特率
pub const DEFAULT_BAUD_RATE: u32 = 57_600;

/// 串口适配层统一错误类型
#[derive(Error, Debug)]
pub enum SerialError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(String),
    #[error("Read timeout")]
    Timeout,
    #[error("Short read: requested {requested} bytes, {available} available")]
    ShortRead { requested: usize, available: usize },
    #[error("Port closed")]
    Closed,
}

impl SerialError {
    /// 是否为超时（可重试）
    pub fn is_timeout(&self) -> bool {
        matches!(self, SerialError::Timeout)
    }
}

/// 接收端
pub trait SerialRx: Send {
    /// 当前可立即读取的字节数
    fn bytes_available(&mut self) -> Result<usize, SerialError>;

    /// 精确读取 `buf.len()` 个字节（调用方保证字节已可用）
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), SerialError>;

    /// 等待直到有字节可读或超时，返回当前可读字节数（超时返回 0）
    fn wait_readable(&mut self, timeout: Duration) -> Result<usize, SerialError>;
}

/// 发送端
pub trait SerialTx: Send {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SerialError>;

    /// 释放底层设备；之后的写入返回 `SerialError::Closed`
    fn close(&mut self) -> Result<(), SerialError> {
        Ok(())
    }
}

impl<T: SerialRx + ?Sized> SerialRx for Box<T> {
    fn bytes_available(&mut self) -> Result<usize, SerialError> {
        (**self).bytes_available()
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), SerialError> {
        (**self).read_exact(buf)
    }

    fn wait_readable(&mut self, timeout: Duration) -> Result<usize, SerialError> {
        (**self).wait_readable(timeout)
    }
}

impl<T: SerialTx + ?Sized> SerialTx for Box<T> {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SerialError> {
        (**self).write_all(bytes)
    }

    fn close(&mut self) -> Result<(), SerialError> {
        (**self).close()
    }
}

/// 可拆分的串口
///
/// 拆分后 RX 交给 IO 线程独占，TX 放入驱动的共享锁中供命令路径使用。
pub trait SplittablePort {
    type Rx: SerialRx + 'static;
    type Tx: SerialTx + 'static;

    fn split(self) -> Result<(Self::Rx, Self::Tx), SerialError>;
}

/// `SerialRx` → `ByteSource` 适配器
pub struct RxSource<'a, R: SerialRx + ?Sized>(pub &'a mut R);

impl<R: SerialRx + ?Sized> ByteSource for RxSource<'_, R> {
    type Error = SerialError;

    fn bytes_available(&mut self) -> Result<usize, Self::Error> {
        self.0.bytes_available()
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), Self::Error> {
        self.0.read_exact(buf)
    }
}
