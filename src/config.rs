//! Runtime configuration. Every field has a default, so a partial JSON object
//! (or none at all) is enough.

use crate::domain::chart::value_objects::VolumePalette;
use crate::domain::errors::AppError;
use crate::domain::logging::LogLevel;
use crate::domain::stream::BackoffPolicy;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub gateway_url: String,
    pub namespace: String,
    pub heartbeat_interval_ms: u32,
    pub reconnect_base_ms: u64,
    pub reconnect_ceiling_ms: u64,
    pub max_reconnect_attempts: u32,
    pub order_book_depth: u32,
    pub trade_limit: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            gateway_url: "ws://localhost:3001".to_string(),
            namespace: "/market-data".to_string(),
            heartbeat_interval_ms: 25_000,
            reconnect_base_ms: 1_000,
            reconnect_ceiling_ms: 30_000,
            max_reconnect_attempts: 5,
            order_book_depth: 20,
            trade_limit: 50,
        }
    }
}

impl StreamConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_ms: self.reconnect_base_ms,
            ceiling_ms: self.reconnect_ceiling_ms.max(self.reconnect_base_ms),
            max_attempts: self.max_reconnect_attempts,
        }
    }

    /// Socket URL for the configured namespace.
    pub fn endpoint(&self) -> String {
        let base = self.gateway_url.trim_end_matches('/');
        let namespace = self.namespace.trim_matches('/');
        if namespace.is_empty() { base.to_string() } else { format!("{base}/{namespace}") }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub rest_base_url: String,
    pub default_limit: u32,
    pub max_limit: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { rest_base_url: "/api".to_string(), default_limit: 200, max_limit: 1000 }
    }
}

impl HistoryConfig {
    /// Requested limit clamped to `[1, max_limit]`; zero means the default.
    pub fn clamp_limit(&self, requested: u32) -> u32 {
        let limit = if requested == 0 { self.default_limit } else { requested };
        limit.clamp(1, self.max_limit.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    pub mount_retry_ms: u32,
    pub mount_attempts: u32,
    pub moving_average_windows: Vec<usize>,
    pub up_color: u32,
    pub down_color: u32,
    pub volume_alpha: f32,
    pub max_candles: usize,
    pub height: u32,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            mount_retry_ms: 50,
            mount_attempts: 10,
            moving_average_windows: vec![5, 10],
            up_color: 0x26a69a,
            down_color: 0xef5350,
            volume_alpha: 0.5,
            max_candles: 2_000,
            height: 400,
        }
    }
}

impl ChartConfig {
    pub fn volume_palette(&self) -> VolumePalette {
        VolumePalette::from_hex(self.up_color, self.down_color, self.volume_alpha)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub stale_after_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { stale_after_ms: 10_000 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub stream: StreamConfig,
    pub history: HistoryConfig,
    pub chart: ChartConfig,
    pub cache: CacheConfig,
    pub log_level: Option<String>,
}

impl AppConfig {
    pub fn from_json(json: &str) -> Result<Self, AppError> {
        let config: AppConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.stream.gateway_url.trim().is_empty() {
            return Err(AppError::ValidationError("stream.gateway_url is empty".to_string()));
        }
        if self.stream.heartbeat_interval_ms == 0 {
            return Err(AppError::ValidationError(
                "stream.heartbeat_interval_ms must be positive".to_string(),
            ));
        }
        if self.chart.moving_average_windows.contains(&0) {
            return Err(AppError::ValidationError(
                "chart.moving_average_windows cannot contain 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn log_level(&self) -> LogLevel {
        let fallback = if cfg!(debug_assertions) { LogLevel::Debug } else { LogLevel::Info };
        self.log_level.as_deref().and_then(LogLevel::parse).unwrap_or(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = AppConfig::from_json(
            r#"{"stream":{"gateway_url":"wss://gw.example/","max_reconnect_attempts":3},"log_level":"warn"}"#,
        )
        .expect("valid config");
        assert_eq!(config.stream.max_reconnect_attempts, 3);
        assert_eq!(config.stream.heartbeat_interval_ms, 25_000);
        assert_eq!(config.stream.endpoint(), "wss://gw.example/market-data");
        assert_eq!(config.chart.moving_average_windows, vec![5, 10]);
        assert_eq!(config.log_level(), LogLevel::Warn);
    }

    #[test]
    fn rejects_zero_window() {
        let err = AppConfig::from_json(r#"{"chart":{"moving_average_windows":[0,5]}}"#);
        assert!(matches!(err, Err(AppError::ValidationError(_))));
    }

    #[test]
    fn history_limit_is_clamped() {
        let history = HistoryConfig::default();
        assert_eq!(history.clamp_limit(0), 200);
        assert_eq!(history.clamp_limit(5_000), 1000);
    }
}
