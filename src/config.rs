//! Configuration loading: YAML file at the `-config` path when present,
//! otherwise environment variables (with `.env` support), mirroring the
//! teacher's `Config::from_env` / `load_env` split.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::CoreError;

#[derive(Debug, Clone, Deserialize)]
pub struct BybitConfig {
    pub base_url: String,
    pub ws_base_url: String,
    pub api_key: String,
    pub api_secret: String,
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: i64,
}

fn default_recv_window_ms() -> i64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct BingXConfig {
    #[serde(default = "default_bingx_base_url")]
    pub base_url: String,
    pub ws_url: String,
    pub api_key: String,
    pub api_secret: String,
}

fn default_bingx_base_url() -> String {
    "https://open-api.bingx.com".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsClientConfig {
    pub buffer_size: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_chunk_size() -> usize {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct PumpBotConfig {
    #[serde(with = "duration_secs")]
    pub check_interval: Duration,
    #[serde(with = "duration_secs")]
    pub startup_delay: Duration,
    pub filter_tickers_turnover: f64,
    pub pump_interval: i64,
    pub target_price_change: f64,
    pub alert_step: f64,
    pub rps_timer_interval: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArbitrageBotConfig {
    pub max_age_ms: i64,
    pub min_spread_percent: f64,
    pub percent_for_close_spread: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    pub bybit: BybitConfig,
    pub bingx: BingXConfig,
    pub ws_client: WsClientConfig,
    pub bot: PumpBotConfig,
    pub arbitrage_bot: ArbitrageBotConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NotificationsConfig {
    pub telegram: Option<TelegramConfig>,
}

/// Left over from the distilled spec's §6 Postgres-shaped schema. Nothing in
/// this crate consumes it (the user-accounts subsystem it would feed is out
/// of scope); kept so a config file written against that schema still
/// parses. See DESIGN.md.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db_name: String,
    #[serde(default)]
    pub port: String,
    #[serde(default)]
    pub ssl_mode: String,
    /// The actually-used sqlite path for the ArbitrageSpread table.
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
}

fn default_sqlite_path() -> String {
    "./crossex.db".to_string()
}

/// Inert config surface only: no HTTP server is started by this crate.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default)]
    pub jwt_expires_in: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct HttpConfig {
    #[serde(default)]
    pub server_port: String,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

impl Config {
    /// Load from `path` if it exists, falling back to environment variables
    /// (plus `.env`) otherwise.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(data) => {
                tracing::info!(path = %path.display(), "loading config from yaml file");
                let cfg: Config = serde_yaml::from_str(&data)
                    .with_context(|| format!("failed to parse config yaml at {}", path.display()))?;
                Ok(cfg)
            }
            Err(_) => {
                tracing::info!(
                    path = %path.display(),
                    "yaml config not found, loading configuration from environment"
                );
                Self::from_env()
            }
        }
    }

    pub fn from_env() -> Result<Self> {
        let _ = dotenv::dotenv();

        let http = HttpConfig {
            server_port: env_or("HTTP_SERVER_PORT", ":8080"),
            auth: AuthConfig {
                jwt_secret: env_or("JWT_SECRET", ""),
                jwt_expires_in: env_or("JWT_EXPIRES_IN", "24").parse().unwrap_or(24),
            },
        };

        let database = DatabaseConfig {
            host: env_or("DB_HOST", ""),
            user: env_or("DB_USER", ""),
            password: env_or("DB_PASSWORD", ""),
            db_name: env_or("DB_NAME", ""),
            port: env_or("DB_PORT", "5432"),
            ssl_mode: env_or("DB_SSL_MODE", "disable"),
            sqlite_path: env_or("SQLITE_PATH", &default_sqlite_path()),
        };

        let bybit = BybitConfig {
            base_url: env_or("BYBIT_BASE_URL", ""),
            ws_base_url: env_or("BYBIT_WS_BASE_URL", ""),
            api_key: env_or("BYBIT_API_KEY", ""),
            api_secret: env_or("BYBIT_API_SECRET", ""),
            recv_window_ms: env_or("BYBIT_RECV_WINDOW_MS", "5000")
                .parse()
                .unwrap_or(5000),
        };

        let bingx = BingXConfig {
            base_url: env_or("BINGX_BASE_URL", &default_bingx_base_url()),
            ws_url: env_or("BINGX_WS_URL", ""),
            api_key: env_or("BINGX_API_KEY", ""),
            api_secret: env_or("BINGX_API_SECRET", ""),
        };

        let ws_client = WsClientConfig {
            buffer_size: parse_env("WS_CLIENT_BUFFER_SIZE", "5000")?,
            chunk_size: parse_env("WS_CLIENT_CHUNK_SIZE", "100")?,
        };

        let raw_turnover = env_or("FILTER_TICKERS_TURNOVER", "800000").replace('_', "");
        let filter_tickers_turnover: f64 = raw_turnover
            .parse()
            .map_err(|_| CoreError::Config("invalid FILTER_TICKERS_TURNOVER".into()))?;

        let bot = PumpBotConfig {
            check_interval: Duration::from_secs(parse_env("CHECK_INTERVAL", "5")?),
            startup_delay: Duration::from_secs(parse_env("STARTUP_DELAY", "10")?),
            filter_tickers_turnover,
            pump_interval: parse_env("PUMP_INTERVAL", "60")?,
            target_price_change: parse_env("TARGET_PRICE_CHANGE", "5.0")?,
            alert_step: parse_env("ALERT_STEP", "5.0")?,
            rps_timer_interval: parse_env("RPS_TIMER_INTERVAL", "60")?,
        };

        let arbitrage_bot = ArbitrageBotConfig {
            max_age_ms: parse_env("MAX_AGE_MS", "60000")?,
            min_spread_percent: parse_env("MIN_SPREAD_PERCENT", "1.0")?,
            percent_for_close_spread: parse_env("PERCENT_FOR_CLOSE_SPREAD", "0.1")?,
        };

        let telegram_token = env_or("TELEGRAM_BOT_TOKEN", "");
        let telegram = if telegram_token.is_empty() {
            None
        } else {
            Some(TelegramConfig {
                bot_token: telegram_token,
                chat_id: env_or("TELEGRAM_CHAT_ID", ""),
            })
        };

        Ok(Config {
            http,
            database,
            exchange: ExchangeConfig {
                bybit,
                bingx,
                ws_client,
                bot,
                arbitrage_bot,
            },
            notifications: NotificationsConfig { telegram },
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.exchange.bybit.base_url.is_empty() {
            return Err(CoreError::Config("exchange.bybit.base_url is empty".into()).into());
        }
        if self.exchange.bybit.ws_base_url.is_empty() {
            return Err(CoreError::Config("exchange.bybit.ws_base_url is empty".into()).into());
        }
        if self.exchange.bingx.ws_url.is_empty() {
            return Err(CoreError::Config("exchange.bingx.ws_url is empty".into()).into());
        }
        if self.exchange.ws_client.buffer_size == 0 {
            return Err(CoreError::Config("exchange.ws_client.buffer_size must be > 0".into()).into());
        }
        if !(0.0..=0.5).contains(&self.exchange.arbitrage_bot.percent_for_close_spread) {
            return Err(CoreError::Config(
                "exchange.arbitrage_bot.percent_for_close_spread must be in [0, 0.5]".into(),
            )
            .into());
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: &str) -> Result<T> {
    env_or(key, default)
        .parse()
        .map_err(|_| CoreError::Config(format!("invalid value for {key}")).into())
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_bybit_url() {
        let mut cfg = sample();
        cfg.exchange.bybit.base_url.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_close_threshold_out_of_range() {
        let mut cfg = sample();
        cfg.exchange.arbitrage_bot.percent_for_close_spread = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_accepts_sample() {
        assert!(sample().validate().is_ok());
    }

    fn sample() -> Config {
        Config {
            http: HttpConfig::default(),
            database: DatabaseConfig::default(),
            exchange: ExchangeConfig {
                bybit: BybitConfig {
                    base_url: "https://api.bybit.com".into(),
                    ws_base_url: "wss://stream.bybit.com".into(),
                    api_key: "k".into(),
                    api_secret: "s".into(),
                    recv_window_ms: 5000,
                },
                bingx: BingXConfig {
                    base_url: "https://open-api.bingx.com".into(),
                    ws_url: "wss://open-api-swap.bingx.com/swap-market".into(),
                    api_key: "k".into(),
                    api_secret: "s".into(),
                },
                ws_client: WsClientConfig {
                    buffer_size: 5000,
                    chunk_size: 100,
                },
                bot: PumpBotConfig {
                    check_interval: Duration::from_secs(5),
                    startup_delay: Duration::from_secs(10),
                    filter_tickers_turnover: 800_000.0,
                    pump_interval: 60,
                    target_price_change: 5.0,
                    alert_step: 5.0,
                    rps_timer_interval: 60,
                },
                arbitrage_bot: ArbitrageBotConfig {
                    max_age_ms: 60_000,
                    min_spread_percent: 1.0,
                    percent_for_close_spread: 0.1,
                },
            },
            notifications: NotificationsConfig::default(),
        }
    }
}
