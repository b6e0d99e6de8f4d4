use crate::error::ConfigError;
use core_types::Interval;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub exchange: ExchangeConfig,
    pub trading: TradingConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub orders: OrderConfig,
    #[serde(default)]
    pub backfill: BackfillConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection settings for the exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    /// Trade against the futures testnet instead of production.
    #[serde(default = "default_true")]
    pub testnet: bool,
    /// Send `positionSide=LONG` with every order (account in hedge mode).
    #[serde(default)]
    pub hedge_mode: bool,
    #[serde(default)]
    pub api: ApiConfig,
}

/// API key pairs for both environments. The active pair is picked by `testnet`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub production: ApiKeys,
    #[serde(default)]
    pub testnet: ApiKeys,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiKeys {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub secret: String,
}

/// Strategy parameters for the traded instrument.
#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// The symbol to trade (e.g., "ETHUSDT").
    pub symbol: String,
    /// The kline interval driving the strategy (e.g., "5m").
    pub interval: Interval,
    /// Added to the HA high to form the entry limit price.
    pub buy_offset: Decimal,
    /// Subtracted from the HA low to form the trailing stop trigger.
    pub sell_offset: Decimal,
    pub quantity: QuantityConfig,
}

/// How the entry order quantity is sized.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum QuantityConfig {
    /// A fixed base-asset quantity.
    Fixed { quantity: Decimal },
    /// A percentage (0-100) of the available USDT balance.
    Percentage { percent: Decimal },
    /// A fixed quote value in USDT.
    Notional { notional: Decimal },
}

/// WebSocket reconnect policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub max_retries: u32,
    pub initial_backoff_secs: f64,
    pub backoff_factor: f64,
    /// No single reconnect delay exceeds this.
    pub max_backoff_secs: f64,
}

impl StreamConfig {
    /// Zero for values `validate` would refuse.
    pub fn initial_backoff(&self) -> Duration {
        Duration::try_from_secs_f64(self.initial_backoff_secs).unwrap_or_default()
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::try_from_secs_f64(self.max_backoff_secs).unwrap_or_default()
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_secs: 5.0,
            backoff_factor: 1.5,
            max_backoff_secs: 60.0,
        }
    }
}

/// How hard reconciliation polls an order that is still partially filled.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrderConfig {
    pub status_poll_attempts: u32,
    pub status_poll_delay_ms: u64,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            status_poll_attempts: 3,
            status_poll_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackfillConfig {
    /// Closed candles replayed before going live. Zero disables backfill.
    pub candles: u16,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self { candles: 50 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub chat_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback filter when `RUST_LOG` is not set.
    pub level: String,
    pub directory: String,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: "logs".to_string(),
            file_prefix: "heikin-trader.log".to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Values given on the command line that take precedence over the files.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
pub struct Overrides {
    /// Override the traded symbol (e.g., "BTCUSDT").
    #[cfg_attr(feature = "clap", arg(long))]
    pub symbol: Option<String>,
    /// Override the kline interval (e.g., "15m").
    #[cfg_attr(feature = "clap", arg(long))]
    pub interval: Option<Interval>,
    /// Override `exchange.testnet` (`--testnet false` trades on production).
    #[cfg_attr(feature = "clap", arg(long))]
    pub testnet: Option<bool>,
}

impl Config {
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(symbol) = &overrides.symbol {
            self.trading.symbol = symbol.clone();
        }
        if let Some(interval) = overrides.interval {
            self.trading.interval = interval;
        }
        if let Some(testnet) = overrides.testnet {
            self.exchange.testnet = testnet;
        }
    }

    /// The key pair for the environment selected by `exchange.testnet`.
    pub fn active_keys(&self) -> &ApiKeys {
        if self.exchange.testnet {
            &self.exchange.api.testnet
        } else {
            &self.exchange.api.production
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let trading = &self.trading;
        if trading.symbol.trim().is_empty() {
            return Err(ConfigError::ValidationError("trading.symbol is empty".to_string()));
        }
        if trading.buy_offset.is_sign_negative() || trading.sell_offset.is_sign_negative() {
            return Err(ConfigError::ValidationError(
                "trading offsets must not be negative".to_string(),
            ));
        }
        let sizing_ok = match &trading.quantity {
            QuantityConfig::Fixed { quantity } => *quantity > Decimal::ZERO,
            QuantityConfig::Percentage { percent } => {
                *percent > Decimal::ZERO && *percent <= Decimal::ONE_HUNDRED
            }
            QuantityConfig::Notional { notional } => *notional > Decimal::ZERO,
        };
        if !sizing_ok {
            return Err(ConfigError::ValidationError(format!(
                "invalid quantity setting: {:?}",
                trading.quantity
            )));
        }
        if self.stream.max_retries == 0 {
            return Err(ConfigError::ValidationError(
                "stream.max_retries must be at least 1".to_string(),
            ));
        }
        let stream = &self.stream;
        let finite = [
            stream.initial_backoff_secs,
            stream.backoff_factor,
            stream.max_backoff_secs,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !finite {
            return Err(ConfigError::ValidationError(
                "stream backoff settings must be finite numbers".to_string(),
            ));
        }
        if stream.backoff_factor < 1.0 || stream.initial_backoff_secs < 0.0 {
            return Err(ConfigError::ValidationError(
                "stream backoff must be non-negative and must not shrink".to_string(),
            ));
        }
        if stream.max_backoff_secs < stream.initial_backoff_secs {
            return Err(ConfigError::ValidationError(
                "stream.max_backoff_secs must not be below stream.initial_backoff_secs".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SAMPLE: &str = r#"
        [exchange]
        testnet = true

        [exchange.api.testnet]
        key = "k"
        secret = "s"

        [trading]
        symbol = "ETHUSDT"
        interval = "5m"
        buy_offset = 0.1
        sell_offset = 0.1
        quantity = { mode = "fixed", quantity = 0.5 }

        [stream]
        max_retries = 4
        initial_backoff_secs = 5.0
        backoff_factor = 1.5
    "#;

    fn sample() -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(SAMPLE, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn deserializes_sample_with_defaults() {
        let cfg = sample();
        assert_eq!(cfg.trading.symbol, "ETHUSDT");
        assert_eq!(cfg.trading.interval.to_string(), "5m");
        assert_eq!(cfg.trading.buy_offset, dec!(0.1));
        assert_eq!(cfg.trading.quantity, QuantityConfig::Fixed { quantity: dec!(0.5) });
        assert_eq!(cfg.stream.max_retries, 4);
        assert_eq!(cfg.backfill.candles, 50);
        assert_eq!(cfg.active_keys().key, "k");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn overrides_take_precedence() {
        let mut cfg = sample();
        cfg.apply_overrides(&Overrides {
            symbol: Some("BTCUSDT".to_string()),
            interval: Some("1h".parse().unwrap()),
            testnet: Some(false),
        });
        assert_eq!(cfg.trading.symbol, "BTCUSDT");
        assert_eq!(cfg.trading.interval.to_string(), "1h");
        assert!(!cfg.exchange.testnet);
        assert!(cfg.active_keys().key.is_empty());
    }

    #[test]
    fn rejects_bad_settings() {
        let mut cfg = sample();
        cfg.trading.sell_offset = dec!(-1);
        assert!(cfg.validate().is_err());

        let mut cfg = sample();
        cfg.trading.quantity = QuantityConfig::Percentage { percent: dec!(150) };
        assert!(cfg.validate().is_err());

        let mut cfg = sample();
        cfg.stream.backoff_factor = 0.5;
        assert!(cfg.validate().is_err());

        let mut cfg = sample();
        cfg.stream.max_backoff_secs = 1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_non_finite_backoff() {
        for bad in [f64::NAN, f64::INFINITY] {
            let mut cfg = sample();
            cfg.stream.initial_backoff_secs = bad;
            assert!(cfg.validate().is_err(), "initial_backoff_secs = {bad}");

            let mut cfg = sample();
            cfg.stream.backoff_factor = bad;
            assert!(cfg.validate().is_err(), "backoff_factor = {bad}");

            let mut cfg = sample();
            cfg.stream.max_backoff_secs = bad;
            assert!(cfg.validate().is_err(), "max_backoff_secs = {bad}");
        }
        let mut cfg = sample();
        cfg.stream.initial_backoff_secs = f64::NAN;
        assert_eq!(cfg.stream.initial_backoff(), Duration::ZERO);
    }

    #[test]
    fn testnet_override_switches_either_way() {
        let mut cfg = sample();
        cfg.exchange.testnet = false;
        cfg.apply_overrides(&Overrides {
            testnet: Some(true),
            ..Overrides::default()
        });
        assert!(cfg.exchange.testnet);

        cfg.apply_overrides(&Overrides::default());
        assert!(cfg.exchange.testnet);
    }
}
