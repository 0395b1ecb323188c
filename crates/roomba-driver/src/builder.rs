//! Builder 模式实现
//!
//! 提供链式构造 `Roomba` 实例的便捷方式。

use crate::config::DriverConfig;
use crate::error::DriverError;
use crate::pipeline::PipelineConfig;
use crate::roomba::Roomba;
use roomba_protocol::SensorLayout;
use roomba_serial::SplittablePort;

/// Roomba Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use roomba_driver::{PipelineConfig, RoombaBuilder};
///
/// let roomba = RoombaBuilder::new()
///     .port("/dev/ttyUSB0")
///     .pipeline_config(PipelineConfig {
///         inactivity_timeout_ms: 500,
///         ..PipelineConfig::default()
///     })
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct RoombaBuilder {
    config: DriverConfig,
    layout: Option<SensorLayout>,
    auto_start: bool,
}

impl Default for RoombaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RoombaBuilder {
    pub fn new() -> Self {
        Self {
            config: DriverConfig::default(),
            layout: None,
            auto_start: true,
        }
    }

    /// 从配置创建（之后的链式调用覆盖配置中的值）
    pub fn from_config(config: DriverConfig) -> Self {
        Self {
            config,
            ..Self::new()
        }
    }

    /// 设置串口路径
    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.config.port = port.into();
        self
    }

    /// 设置波特率（默认 57600）
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.config.baud_rate = baud_rate;
        self
    }

    pub fn pipeline_config(mut self, config: PipelineConfig) -> Self {
        self.config.pipeline = config;
        self
    }

    /// 设置传感器布局（覆盖配置中的包 ID 列表）
    pub fn sensor_layout(mut self, layout: SensorLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Play 回放使用的歌曲槽位（0..=15）
    pub fn song_number(mut self, song_number: u8) -> Self {
        self.config.song_number = song_number;
        self
    }

    /// 构建后是否立即启动数据流（默认 true）
    pub fn auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// 打开配置的串口并构建
    #[cfg(feature = "serialport")]
    pub fn build(self) -> Result<Roomba, DriverError> {
        let port = roomba_serial::SerialPortAdapter::open(&self.config.port, self.config.baud_rate)?;
        self.build_with_port(port)
    }

    /// 使用已打开的串口构建（测试中传入 `MockSerialPort`）
    pub fn build_with_port<P: SplittablePort>(self, port: P) -> Result<Roomba, DriverError> {
        self.config.validate()?;
        let layout = match self.layout {
            Some(layout) => {
                layout.validate()?;
                layout
            },
            None => self.config.sensor_layout()?,
        };

        let mut roomba = Roomba::new(
            port,
            layout,
            self.config.pipeline.clone(),
            self.config.song_number,
        )?;

        if self.auto_start
            && let Err(e) = roomba.start_streaming()
        {
            let _ = roomba.shutdown();
            return Err(e);
        }
        Ok(roomba)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomba_protocol::SensorPacketId;
    use roomba_serial::MockSerialPort;

    #[test]
    fn test_builder_auto_starts_stream() {
        let port = MockSerialPort::new();
        let handle = port.handle();
        let roomba = RoombaBuilder::new()
            .sensor_layout(SensorLayout::new(&[SensorPacketId::Buttons]))
            .build_with_port(port)
            .unwrap();

        assert!(roomba.is_streaming());
        assert_eq!(
            handle.writes(),
            vec![vec![128], vec![132], vec![148, 1, 18]]
        );
    }

    #[test]
    fn test_builder_without_auto_start() {
        let port = MockSerialPort::new();
        let handle = port.handle();
        let roomba = RoombaBuilder::new()
            .auto_start(false)
            .build_with_port(port)
            .unwrap();

        assert!(!roomba.is_streaming());
        assert!(handle.writes().is_empty());
        assert_eq!(roomba.layout().payload_len(), 40);
    }

    #[test]
    fn test_builder_uses_config_packets() {
        let config = DriverConfig::from_toml_str("sensor_packets = [7, 19, 20]").unwrap();
        let roomba = RoombaBuilder::from_config(config)
            .auto_start(false)
            .build_with_port(MockSerialPort::new())
            .unwrap();
        assert_eq!(roomba.layout().payload_len(), 8);
    }

    #[test]
    fn test_builder_rejects_invalid_song_number() {
        let result = RoombaBuilder::new()
            .song_number(20)
            .build_with_port(MockSerialPort::new());
        assert!(matches!(result, Err(DriverError::Config(_))));
    }

    #[test]
    fn test_builder_rejects_oversized_layout() {
        let port = MockSerialPort::new();
        let handle = port.handle();
        let result = RoombaBuilder::new()
            .sensor_layout(SensorLayout::new(&[SensorPacketId::Distance; 86]))
            .build_with_port(port);
        assert!(matches!(result, Err(DriverError::Protocol(_))));
        assert!(handle.writes().is_empty());
    }
}
