use crate::error::ConfigError;

// Declare the modules that make up this crate.
pub mod error;
pub mod logging;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use logging::init_tracing;
pub use settings::{
    ApiConfig, ApiKeys, BackfillConfig, Config, ExchangeConfig, LoggingConfig, OrderConfig,
    Overrides, QuantityConfig, StreamConfig, TelegramConfig, TradingConfig,
};

/// Loads the application configuration.
///
/// Reads `config.toml` from the working directory when present, then overlays
/// environment variables prefixed with `HEIKIN`, using `__` as the section
/// separator (e.g. `HEIKIN_EXCHANGE__API__TESTNET__SECRET`). The result is
/// validated before it is returned.
pub fn load_config() -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name("config").required(false))
        .add_source(
            config::Environment::with_prefix("HEIKIN")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let config = builder.try_deserialize::<Config>()?;
    config.validate()?;

    Ok(config)
}
