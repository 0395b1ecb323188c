//! 基于 `serialport` crate 的真实串口适配器
//!
//! 8N1、无流控。拆分通过 `try_clone()` 实现：RX 与 TX 共享同一个底层设备，
//! 关闭 TX 只释放发送端句柄。

use crate::{SerialError, SerialRx, SerialTx, SplittablePort};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// 读超时（`read_exact` 在字节已可用时调用，仅作兜底）
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// `wait_readable` 的轮询间隔
const POLL_INTERVAL: Duration = Duration::from_micros(500);

impl From<serialport::Error> for SerialError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::Io(kind) => SerialError::Io(std::io::Error::new(kind, e.description)),
            _ => SerialError::Device(e.description),
        }
    }
}

/// 已打开的串口
pub struct SerialPortAdapter {
    port: Box<dyn SerialPort>,
    path: String,
}

impl SerialPortAdapter {
    /// 打开串口
    ///
    /// # 参数
    /// * `path` - 串口路径（如 "/dev/ttyUSB0"）
    /// * `baud_rate` - 波特率（Open Interface 默认 57600）
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, SerialError> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()?;

        info!("Opened serial port: {} at {} baud", path, baud_rate);

        Ok(Self {
            port,
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl SplittablePort for SerialPortAdapter {
    type Rx = SerialPortRx;
    type Tx = SerialPortTx;

    fn split(self) -> Result<(Self::Rx, Self::Tx), SerialError> {
        let tx_port = self.port.try_clone()?;
        trace!("Serial port '{}' split into RX and TX", self.path);
        Ok((
            SerialPortRx { port: self.port },
            SerialPortTx {
                port: Some(tx_port),
                path: self.path,
            },
        ))
    }
}

/// 串口接收端
pub struct SerialPortRx {
    port: Box<dyn SerialPort>,
}

impl SerialRx for SerialPortRx {
    fn bytes_available(&mut self) -> Result<usize, SerialError> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), SerialError> {
        match self.port.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::TimedOut => Err(SerialError::Timeout),
            Err(e) => Err(e.into()),
        }
    }

    fn wait_readable(&mut self, timeout: Duration) -> Result<usize, SerialError> {
        let deadline = Instant::now() + timeout;
        loop {
            let available = self.bytes_available()?;
            if available > 0 || Instant::now() >= deadline {
                return Ok(available);
            }
            spin_sleep::sleep(POLL_INTERVAL);
        }
    }
}

/// 串口发送端
pub struct SerialPortTx {
    port: Option<Box<dyn SerialPort>>,
    path: String,
}

impl SerialTx for SerialPortTx {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SerialError> {
        let port = self.port.as_mut().ok_or(SerialError::Closed)?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SerialError> {
        if let Some(mut port) = self.port.take() {
            port.flush()?;
            debug!("Serial port '{}' TX closed", self.path);
        }
        Ok(())
    }
}
