//! # 驱动配置
//!
//! 从 TOML 加载的驱动配置。所有字段都有默认值，配置文件只需写出要覆盖的项：
//!
//! ```toml
//! port = "/dev/ttyUSB0"
//! baud_rate = 57600
//! song_number = 1
//! sensor_packets = [7, 8, 18, 19, 20]
//!
//! [pipeline]
//! inactivity_timeout_ms = 500
//! ```

use crate::error::DriverError;
use crate::pipeline::PipelineConfig;
use roomba_protocol::{MAX_SONG_NUMBER, SensorLayout, SensorPacketId};
use roomba_serial::DEFAULT_BAUD_RATE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 驱动配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// 串口路径
    pub port: String,
    /// 波特率
    pub baud_rate: u32,
    /// IO 线程配置
    pub pipeline: PipelineConfig,
    /// 请求的传感器包 ID（按顺序），为空时使用标准布局
    pub sensor_packets: Vec<u8>,
    /// Play 按钮回放使用的歌曲槽位
    pub song_number: u8,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            pipeline: PipelineConfig::default(),
            sensor_packets: SensorPacketId::STANDARD.iter().map(|id| u8::from(*id)).collect(),
            song_number: 0,
        }
    }
}

impl DriverConfig {
    /// 从 TOML 字符串解析并校验
    pub fn from_toml_str(content: &str) -> Result<Self, DriverError> {
        let config: Self =
            toml::from_str(content).map_err(|e| DriverError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, DriverError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| DriverError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// 序列化为 TOML
    pub fn to_toml_string(&self) -> Result<String, DriverError> {
        toml::to_string(self).map_err(|e| DriverError::Config(e.to_string()))
    }

    /// 解码布局
    pub fn sensor_layout(&self) -> Result<SensorLayout, DriverError> {
        if self.sensor_packets.is_empty() {
            return Ok(SensorLayout::standard());
        }
        Ok(SensorLayout::from_ids(&self.sensor_packets)?)
    }

    pub fn validate(&self) -> Result<(), DriverError> {
        if self.song_number > MAX_SONG_NUMBER {
            return Err(DriverError::Config(format!(
                "song_number must be 0..={}, got {}",
                MAX_SONG_NUMBER, self.song_number
            )));
        }
        if self.baud_rate == 0 {
            return Err(DriverError::Config("baud_rate must be non-zero".to_string()));
        }
        self.sensor_layout()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomba_protocol::ProtocolError;

    #[test]
    fn test_default_config() {
        let config = DriverConfig::default();
        assert_eq!(config.baud_rate, 57_600);
        assert_eq!(config.song_number, 0);
        assert_eq!(config.pipeline, PipelineConfig::default());
        assert_eq!(config.sensor_layout().unwrap(), SensorLayout::standard());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = DriverConfig::from_toml_str(
            r#"
            port = "/dev/ttyS3"
            sensor_packets = [7, 8, 18]

            [pipeline]
            inactivity_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.port, "/dev/ttyS3");
        assert_eq!(config.baud_rate, 57_600);
        assert_eq!(config.pipeline.inactivity_timeout_ms, 250);
        assert_eq!(config.pipeline.poll_interval_ms, 5);
        assert_eq!(config.sensor_layout().unwrap().payload_len(), 6);
    }

    #[test]
    fn test_empty_packet_list_means_standard() {
        let config = DriverConfig::from_toml_str("sensor_packets = []").unwrap();
        assert_eq!(config.sensor_layout().unwrap().payload_len(), 40);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            DriverConfig::from_toml_str("song_number = 16"),
            Err(DriverError::Config(_))
        ));
        assert!(matches!(
            DriverConfig::from_toml_str("sensor_packets = [7, 99]"),
            Err(DriverError::Protocol(_))
        ));
        assert!(matches!(
            DriverConfig::from_toml_str("baud_rate = \"fast\""),
            Err(DriverError::Config(_))
        ));
    }

    #[test]
    fn test_payload_longer_than_length_byte_rejected() {
        // 85 个 Distance 包恰好 255 字节
        let config = DriverConfig {
            sensor_packets: vec![19; 85],
            ..Default::default()
        };
        assert_eq!(config.sensor_layout().unwrap().payload_len(), 255);
        assert!(config.validate().is_ok());

        let config = DriverConfig {
            sensor_packets: vec![19; 86],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DriverError::Protocol(ProtocolError::InvalidLength {
                expected: 255,
                actual: 258,
            }))
        ));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = DriverConfig {
            port: "/dev/ttyACM0".to_string(),
            song_number: 4,
            ..Default::default()
        };
        let text = config.to_toml_string().unwrap();
        assert_eq!(DriverConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_load_from_missing_file() {
        assert!(matches!(
            DriverConfig::load_from_file("/nonexistent/roomba.toml"),
            Err(DriverError::Config(_))
        ));
    }
}
