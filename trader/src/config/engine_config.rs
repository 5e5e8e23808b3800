use crate::config::Config;
use crate::errors::{Result, TradeError};
use crate::models::MarginMode;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_futures_allocation_percent() -> Decimal {
    dec!(25)
}

fn default_leverage() -> u32 {
    5
}

fn default_spot_allocation_percent() -> Decimal {
    dec!(100)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuturesConfig {
    /// 可用余额中用于单次开仓的百分比
    #[serde(default = "default_futures_allocation_percent")]
    pub allocation_percent: Decimal,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default)]
    pub margin_mode: MarginMode,
}

impl Default for FuturesConfig {
    fn default() -> Self {
        Self {
            allocation_percent: default_futures_allocation_percent(),
            leverage: default_leverage(),
            margin_mode: MarginMode::Isolated,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotConfig {
    #[serde(default = "default_spot_allocation_percent")]
    pub allocation_percent: Decimal,
}

impl Default for SpotConfig {
    fn default() -> Self {
        Self {
            allocation_percent: default_spot_allocation_percent(),
        }
    }
}

/// 有界指数退避
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryConfig {
    /// 第 attempt 次失败后的等待时间（attempt 从 1 开始）
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub db_path: String,
    pub log_file: Option<String>,
    pub log_level: String,
    /// 计价资产，开仓时从该资产的可用余额计算仓位
    pub quote_asset: String,
    /// 未指定止损价时距离入场价的百分比
    pub default_stop_percent: Decimal,
    pub futures: FuturesConfig,
    pub spot: SpotConfig,
    pub retry: RetryConfig,
    pub worker_count: usize,
    pub task_queue_capacity: usize,
    pub reconcile_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: ":memory:".to_string(),
            log_file: None,
            log_level: "info".to_string(),
            quote_asset: "USDT".to_string(),
            default_stop_percent: Decimal::ONE,
            futures: FuturesConfig::default(),
            spot: SpotConfig::default(),
            retry: RetryConfig::default(),
            worker_count: 8,
            task_queue_capacity: 1000,
            reconcile_interval_secs: 60,
        }
    }
}

fn optional<'de, T: Deserialize<'de>>(config: &Config, key: &str, default: T) -> Result<T> {
    if !config.contains(key) {
        return Ok(default);
    }
    config.get(key).map_err(|e| TradeError::ConfigError {
        message: format!("get {} err: {}", key, e),
    })
}

impl EngineConfig {
    pub fn from_config(config: Config) -> Result<Self> {
        let defaults = EngineConfig::default();
        let db_path: String = config.get("db_path").map_err(|e| TradeError::ConfigError {
            message: format!("get db_path err: {}", e),
        })?;

        let engine_config = Self {
            db_path,
            log_file: optional(&config, "log_file", defaults.log_file)?,
            log_level: optional(&config, "log_level", defaults.log_level)?,
            quote_asset: optional(&config, "quote_asset", defaults.quote_asset)?,
            default_stop_percent: optional(
                &config,
                "default_stop_percent",
                defaults.default_stop_percent,
            )?,
            futures: optional(&config, "futures", defaults.futures)?,
            spot: optional(&config, "spot", defaults.spot)?,
            retry: optional(&config, "retry", defaults.retry)?,
            worker_count: optional(&config, "worker_count", defaults.worker_count)?,
            task_queue_capacity: optional(
                &config,
                "task_queue_capacity",
                defaults.task_queue_capacity,
            )?,
            reconcile_interval_secs: optional(
                &config,
                "reconcile_interval_secs",
                defaults.reconcile_interval_secs,
            )?,
        };
        engine_config.validate()?;
        Ok(engine_config)
    }

    fn validate(&self) -> Result<()> {
        let percent_ok = |p: Decimal| p > Decimal::ZERO && p <= Decimal::ONE_HUNDRED;
        if !percent_ok(self.futures.allocation_percent) || !percent_ok(self.spot.allocation_percent)
        {
            return Err(TradeError::ConfigError {
                message: "allocation_percent must be within (0, 100]".to_string(),
            });
        }
        if self.futures.leverage == 0 {
            return Err(TradeError::ConfigError {
                message: "futures.leverage must be at least 1".to_string(),
            });
        }
        if self.retry.max_attempts == 0 || self.worker_count == 0 {
            return Err(TradeError::ConfigError {
                message: "retry.max_attempts and worker_count must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_engine_config_defaults() {
        let mut config_file = NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut config_file, br#"{ "db_path": "trader.db" }"#).unwrap();
        let config = Config::from_json(config_file.path().to_str().unwrap()).unwrap();

        let engine_config = EngineConfig::from_config(config).unwrap();
        assert_eq!(engine_config.db_path, "trader.db");
        assert_eq!(engine_config.futures.leverage, 5);
        assert_eq!(engine_config.futures.allocation_percent, dec!(25));
        assert_eq!(engine_config.futures.margin_mode, MarginMode::Isolated);
        assert_eq!(engine_config.spot.allocation_percent, dec!(100));
        assert_eq!(engine_config.retry.max_attempts, 3);
        assert_eq!(engine_config.quote_asset, "USDT");
    }

    #[test]
    fn test_engine_config_overrides() {
        let config_content = r#"
    {
        "db_path": "trader.db",
        "log_file": "trader.log",
        "default_stop_percent": 2,
        "futures": { "allocation_percent": 10, "leverage": 3, "margin_mode": "cross" },
        "retry": { "max_attempts": 5, "initial_backoff_ms": 100 },
        "reconcile_interval_secs": 15
    }
    "#;
        let mut config_file = NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut config_file, config_content.as_bytes()).unwrap();
        let config = Config::from_json(config_file.path().to_str().unwrap()).unwrap();

        let engine_config = EngineConfig::from_config(config).unwrap();
        assert_eq!(engine_config.log_file.as_deref(), Some("trader.log"));
        assert_eq!(engine_config.default_stop_percent, dec!(2));
        assert_eq!(engine_config.futures.leverage, 3);
        assert_eq!(engine_config.futures.margin_mode, MarginMode::Cross);
        assert_eq!(engine_config.retry.max_attempts, 5);
        assert_eq!(engine_config.retry.max_backoff_ms, 8000);
        assert_eq!(engine_config.reconcile_interval_secs, 15);
    }

    #[test]
    fn test_engine_config_rejects_zero_leverage() {
        let mut config_file = NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut config_file,
            br#"{ "db_path": "trader.db", "futures": { "leverage": 0 } }"#,
        )
        .unwrap();
        let config = Config::from_json(config_file.path().to_str().unwrap()).unwrap();
        assert!(matches!(
            EngineConfig::from_config(config),
            Err(TradeError::ConfigError { .. })
        ));
    }

    #[test]
    fn test_retry_backoff_is_bounded() {
        let retry = RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 1500,
        };
        assert_eq!(retry.backoff(1), Duration::from_millis(500));
        assert_eq!(retry.backoff(2), Duration::from_millis(1000));
        assert_eq!(retry.backoff(3), Duration::from_millis(1500));
        assert_eq!(retry.backoff(80), Duration::from_millis(1500));
    }
}
