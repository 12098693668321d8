//! Service configuration
//!
//! Layered the usual way:
//! 1. Compiled-in defaults.
//! 2. TOML file, when a path is given.
//! 3. `FEEDS_` environment variables, `__` separating nested keys
//!    (e.g. `FEEDS_LOG__JSON=true`).
//!
//! ```toml
//! [log]
//! json = false
//!
//! [[exchanges]]
//! exchange = "huobipro"
//! order_books = ["btc_usdt"]
//! trades = ["btc_usdt"]
//! watchdog_interval_ms = 30000
//! ```

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use types::ids::{ExchangeId, Symbol};

use crate::exchanges::{profile_for, ExchangeProfile};
use crate::liveness::LivenessPolicy;
use crate::registry::ChannelParams;
use crate::session::SessionConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// JSON log lines instead of pretty output.
    #[serde(default)]
    pub json: bool,
}

/// One exchange connection and what to subscribe on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeSettings {
    pub exchange: ExchangeId,
    /// Overrides the exchange's public endpoint.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub order_books: Vec<Symbol>,
    #[serde(default)]
    pub trades: Vec<Symbol>,
    #[serde(default)]
    pub tickers: Vec<Symbol>,
    #[serde(default)]
    pub book_depth: Option<u32>,
    #[serde(default)]
    pub book_precision: Option<String>,
    /// 0 disables the heartbeat.
    #[serde(default)]
    pub ping_interval_ms: Option<u64>,
    /// 0 disables the watchdog.
    #[serde(default)]
    pub watchdog_interval_ms: Option<u64>,
    #[serde(default)]
    pub liveness_deadline_ms: Option<u64>,
}

impl ExchangeSettings {
    pub fn new(exchange: ExchangeId) -> Self {
        Self {
            exchange,
            url: None,
            order_books: Vec::new(),
            trades: Vec::new(),
            tickers: Vec::new(),
            book_depth: None,
            book_precision: None,
            ping_interval_ms: None,
            watchdog_interval_ms: None,
            liveness_deadline_ms: None,
        }
    }

    pub fn url(&self, profile: &dyn ExchangeProfile) -> String {
        self.url
            .clone()
            .unwrap_or_else(|| profile.default_url().to_string())
    }

    pub fn book_params(&self) -> ChannelParams {
        ChannelParams {
            depth: self.book_depth,
            precision: self.book_precision.clone(),
        }
    }

    /// The exchange's liveness defaults with any configured overrides applied.
    pub fn liveness_policy(&self, defaults: LivenessPolicy) -> LivenessPolicy {
        let interval = |ms: u64| (ms > 0).then(|| Duration::from_millis(ms));
        LivenessPolicy {
            ping_interval: self.ping_interval_ms.map_or(defaults.ping_interval, interval),
            watchdog_interval: self
                .watchdog_interval_ms
                .map_or(defaults.watchdog_interval, interval),
            deadline: self
                .liveness_deadline_ms
                .map_or(defaults.deadline, Duration::from_millis),
        }
    }

    pub fn session_config(&self, profile: &dyn ExchangeProfile) -> SessionConfig {
        SessionConfig {
            liveness: Some(self.liveness_policy(profile.liveness())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedsConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub exchanges: Vec<ExchangeSettings>,
}

impl FeedsConfig {
    /// Load defaults, then the optional file at `path`, then `FEEDS_*`
    /// environment overrides, and validate the result.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().set_default("log.json", false)?;

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Prefix separator must be explicit, or it defaults to `__` as well
        builder = builder.add_source(
            Environment::with_prefix("FEEDS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: FeedsConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject liveness settings that would time out between two pings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for settings in &self.exchanges {
            let policy = settings.liveness_policy(profile_for(settings.exchange).liveness());
            if let Some(ping) = policy.ping_interval {
                if policy.deadline < ping {
                    return Err(ConfigError::Message(format!(
                        "{}: liveness deadline {} ms is shorter than ping interval {} ms",
                        settings.exchange,
                        policy.deadline.as_millis(),
                        ping.as_millis()
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_only() {
        let cfg = FeedsConfig::load(None).unwrap();
        assert!(!cfg.log.json);
        assert!(cfg.exchanges.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("feeds-config-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[log]
json = true

[[exchanges]]
exchange = "bitfinex"
order_books = ["btc_usd"]
book_precision = "R0"
ping_interval_ms = 10000

[[exchanges]]
exchange = "zb"
tickers = ["btc_usdt", "eth_usdt"]
"#
        )
        .unwrap();

        let cfg = FeedsConfig::load(path.to_str()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(cfg.log.json);
        assert_eq!(cfg.exchanges.len(), 2);
        let bitfinex = &cfg.exchanges[0];
        assert_eq!(bitfinex.exchange, ExchangeId::Bitfinex);
        assert_eq!(bitfinex.order_books, vec![Symbol::new("btc_usd")]);
        assert_eq!(bitfinex.book_params().precision.as_deref(), Some("R0"));
        assert_eq!(cfg.exchanges[1].tickers.len(), 2);
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(FeedsConfig::load(Some("/nonexistent/feeds.toml")).is_err());
    }

    #[test]
    fn test_liveness_overrides() {
        let mut settings = ExchangeSettings::new(ExchangeId::Bitmex);
        settings.ping_interval_ms = Some(0);
        settings.liveness_deadline_ms = Some(45_000);
        let policy = settings.liveness_policy(LivenessPolicy::default());
        assert_eq!(policy.ping_interval, None);
        assert_eq!(policy.watchdog_interval, Some(Duration::from_secs(60)));
        assert_eq!(policy.deadline, Duration::from_secs(45));
    }

    #[test]
    fn test_session_config_uses_profile_defaults() {
        let settings = ExchangeSettings::new(ExchangeId::Bitmex);
        let profile = profile_for(ExchangeId::Bitmex);
        let config = settings.session_config(profile.as_ref());
        assert_eq!(config.liveness, Some(profile.liveness()));
        assert_eq!(settings.url(profile.as_ref()), "wss://www.bitmex.com/realtime");
    }

    #[test]
    fn test_deadline_shorter_than_ping_rejected() {
        let mut settings = ExchangeSettings::new(ExchangeId::Okex);
        settings.ping_interval_ms = Some(30_000);
        settings.liveness_deadline_ms = Some(10_000);
        let cfg = FeedsConfig {
            log: LogConfig::default(),
            exchanges: vec![settings],
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("okex"));
    }
}
