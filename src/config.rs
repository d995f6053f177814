use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::domain::VolatilityClass;
use crate::error::{Result, WardenError};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub instruments: Vec<InstrumentConfig>,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub sizing: SizingConfig,
    #[serde(default)]
    pub exit: ExitConfig,
    #[serde(default)]
    pub governor: GovernorConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub signal: SignalConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub dry_run: DryRunConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// REST API endpoint for orders and account data
    pub rest_url: String,
    /// WebSocket endpoint for market data
    pub ws_url: String,
    /// Quote currency all instruments are priced in
    pub quote_asset: String,
    /// Signed request validity window in milliseconds
    pub recv_window_ms: u64,
    /// Upper bound on a single exchange call
    pub call_timeout_ms: u64,
    pub connect_timeout_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            rest_url: "https://api.binance.com".to_string(),
            ws_url: "wss://stream.binance.com:9443/ws".to_string(),
            quote_asset: "USDT".to_string(),
            recv_window_ms: 5000,
            call_timeout_ms: 10_000,
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentConfig {
    /// Exchange symbol, e.g. "BTCUSDT"
    pub symbol: String,
    #[serde(default = "default_category")]
    pub category: VolatilityClass,
}

fn default_category() -> VolatilityClass {
    VolatilityClass::Mid
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Minimum seconds between entry attempts on one instrument
    pub cooldown_secs: u64,
    /// Concurrency ceiling on open positions
    pub max_open_positions: usize,
    /// Positions below this notional do not count toward the ceiling
    pub exposure_floor_usd: Decimal,
    /// Signals below this confidence are never entered
    pub min_confidence: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 120,
            max_open_positions: 3,
            exposure_floor_usd: dec!(1),
            min_confidence: 0.6,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Fraction of available balance put at risk per trade (e.g., 0.01 = 1%)
    pub risk_fraction: Decimal,
    /// Number of recent prices used for volatility
    pub window: usize,
    pub stop_multiplier: Decimal,
    /// Notional cap per position as a fraction of free quote balance
    pub max_position_fraction: Decimal,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            risk_fraction: dec!(0.01),
            window: 20,
            stop_multiplier: dec!(2),
            max_position_fraction: dec!(0.25),
        }
    }
}

/// Per-category exit limits
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CategoryLimits {
    /// Holding time after which a non-negative position is closed
    pub time_limit_hours: Decimal,
    /// Retrace from the high-water mark that fires the trailing stop
    pub trailing_stop_pct: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CategoryTable {
    pub major: CategoryLimits,
    pub mid: CategoryLimits,
    pub high: CategoryLimits,
}

impl CategoryTable {
    pub fn limits(&self, category: VolatilityClass) -> CategoryLimits {
        match category {
            VolatilityClass::Major => self.major,
            VolatilityClass::Mid => self.mid,
            VolatilityClass::High => self.high,
        }
    }
}

impl Default for CategoryTable {
    fn default() -> Self {
        Self {
            major: CategoryLimits {
                time_limit_hours: dec!(48),
                trailing_stop_pct: dec!(0.02),
            },
            mid: CategoryLimits {
                time_limit_hours: dec!(24),
                trailing_stop_pct: dec!(0.03),
            },
            high: CategoryLimits {
                time_limit_hours: dec!(12),
                trailing_stop_pct: dec!(0.05),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExitConfig {
    pub categories: CategoryTable,
    /// Trailing stop arms once the high-water mark is this far above entry
    pub trailing_activation_pct: Decimal,
    pub fallback_take_profit_pct: Decimal,
    pub fallback_take_profit_fraction: Decimal,
    /// Loss (positive number) that triggers the hard stop
    pub hard_stop_pct: Decimal,
    pub conservative_fraction: Decimal,
    pub realistic_fraction: Decimal,
    /// Fraction sold at the realistic tier while waiting on the optimistic one
    pub realistic_patient_fraction: Decimal,
    pub optimistic_fraction: Decimal,
    /// Patience holds while elapsed < this share of the optimistic ETA
    pub patience_eta_fraction: Decimal,
    pub patience_min_probability: f64,
    /// Exit monitor polling interval
    pub monitor_interval_secs: u64,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            categories: CategoryTable::default(),
            trailing_activation_pct: dec!(0.015),
            fallback_take_profit_pct: dec!(0.04),
            fallback_take_profit_fraction: dec!(0.6),
            hard_stop_pct: dec!(0.03),
            conservative_fraction: dec!(0.3),
            realistic_fraction: dec!(0.7),
            realistic_patient_fraction: dec!(0.5),
            optimistic_fraction: dec!(1),
            patience_eta_fraction: dec!(0.7),
            patience_min_probability: 0.5,
            monitor_interval_secs: 5,
        }
    }
}

/// Decision applied when a paused governor receives no explicit answer in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultDecision {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Primary daily target as a fraction of starting equity
    pub primary_target_pct: Decimal,
    pub stretch_target_pct: Decimal,
    /// Claw-back floor as a fraction of the primary target
    pub floor_ratio: Decimal,
    pub decision_timeout_secs: u64,
    pub default_decision: DefaultDecision,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            primary_target_pct: dec!(0.01),
            stretch_target_pct: dec!(0.02),
            floor_ratio: dec!(0.8),
            decision_timeout_secs: 300,
            default_decision: DefaultDecision::Stop,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub reconnect_base_secs: u64,
    pub reconnect_max_secs: u64,
    /// Consecutive failed connections before the stream is reported degraded
    pub max_reconnect_attempts: u32,
    /// Reconnect when no tick arrives for this long
    pub idle_timeout_secs: u64,
    pub price_window: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_base_secs: 2,
            reconnect_max_secs: 60,
            max_reconnect_attempts: 10,
            idle_timeout_secs: 60,
            price_window: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Minimum window return for the momentum scorer to say BUY
    pub momentum_threshold: Decimal,
    pub strategy_tag: String,
    pub score_timeout_ms: u64,
    pub forecast_timeout_ms: u64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            momentum_threshold: dec!(0.003),
            strategy_tag: "momentum".to_string(),
            score_timeout_ms: 2_000,
            forecast_timeout_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub data_dir: PathBuf,
    pub snapshot_interval_secs: u64,
}

impl PersistenceConfig {
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("trades.jsonl")
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("positions.json")
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            snapshot_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// JSON webhook; notifications only go to the log when unset
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DryRunConfig {
    /// Enable dry run mode (no real orders)
    pub enabled: bool,
    pub taker_fee: Decimal,
    /// Simulated quote balance at startup
    pub starting_quote: Decimal,
}

impl Default for DryRunConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            taker_fee: dec!(0.001),
            starting_quote: dec!(1000),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable JSON formatted logs
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// API credentials read from the environment
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| WardenError::Auth(format!("{name} is not set")))
        };
        Ok(Self {
            api_key: read("BINANCE_API_KEY")?,
            api_secret: read("BINANCE_API_SECRET")?,
        })
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> std::result::Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();
        let env_name = std::env::var("WARDEN_ENV").unwrap_or_else(|_| "development".to_string());

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific overrides (e.g., config/production.toml)
            .add_source(File::from(config_dir.join(format!("{env_name}.toml"))).required(false))
            // WARDEN_RISK__COOLDOWN_SECS=60, etc.
            .add_source(
                Environment::with_prefix("WARDEN")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Symbols of every configured instrument
    pub fn symbols(&self) -> Vec<String> {
        self.instruments.iter().map(|i| i.symbol.clone()).collect()
    }

    pub fn category_of(&self, symbol: &str) -> VolatilityClass {
        self.instruments
            .iter()
            .find(|i| i.symbol == symbol)
            .map(|i| i.category)
            .unwrap_or_else(default_category)
    }

    /// Validate configuration values, collecting every violation
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.instruments.is_empty() {
            errors.push("at least one instrument must be configured".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for inst in &self.instruments {
            if inst.symbol.trim().is_empty() {
                errors.push("instrument symbol must not be empty".to_string());
            } else if !inst.symbol.ends_with(&self.exchange.quote_asset) {
                errors.push(format!(
                    "instrument {} is not quoted in {}",
                    inst.symbol, self.exchange.quote_asset
                ));
            }
            if !seen.insert(inst.symbol.as_str()) {
                errors.push(format!("instrument {} configured twice", inst.symbol));
            }
        }

        // Risk
        if self.risk.max_open_positions == 0 {
            errors.push("risk.max_open_positions must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.risk.min_confidence) {
            errors.push("risk.min_confidence must be between 0 and 1".to_string());
        }

        // Sizing
        if self.sizing.risk_fraction <= Decimal::ZERO || self.sizing.risk_fraction >= Decimal::ONE
        {
            errors.push("sizing.risk_fraction must be between 0 and 1".to_string());
        }
        if self.sizing.window < 2 {
            errors.push("sizing.window must be at least 2".to_string());
        }
        if self.sizing.stop_multiplier <= Decimal::ZERO {
            errors.push("sizing.stop_multiplier must be positive".to_string());
        }
        if self.sizing.max_position_fraction <= Decimal::ZERO
            || self.sizing.max_position_fraction > Decimal::ONE
        {
            errors.push("sizing.max_position_fraction must be in (0, 1]".to_string());
        }
        if self.stream.price_window < self.sizing.window {
            errors.push(format!(
                "stream.price_window ({}) must be at least sizing.window ({})",
                self.stream.price_window, self.sizing.window
            ));
        }

        // Exit
        for (name, frac) in [
            ("exit.conservative_fraction", self.exit.conservative_fraction),
            ("exit.realistic_fraction", self.exit.realistic_fraction),
            (
                "exit.realistic_patient_fraction",
                self.exit.realistic_patient_fraction,
            ),
            ("exit.optimistic_fraction", self.exit.optimistic_fraction),
            (
                "exit.fallback_take_profit_fraction",
                self.exit.fallback_take_profit_fraction,
            ),
        ] {
            if frac <= Decimal::ZERO || frac > Decimal::ONE {
                errors.push(format!("{name} must be in (0, 1]"));
            }
        }
        if self.exit.hard_stop_pct <= Decimal::ZERO {
            errors.push("exit.hard_stop_pct must be positive".to_string());
        }
        if self.exit.monitor_interval_secs == 0 {
            errors.push("exit.monitor_interval_secs must be positive".to_string());
        }

        // Governor
        if self.governor.primary_target_pct <= Decimal::ZERO {
            errors.push("governor.primary_target_pct must be positive".to_string());
        }
        if self.governor.stretch_target_pct <= self.governor.primary_target_pct {
            errors.push("governor.stretch_target_pct must exceed primary_target_pct".to_string());
        }
        if self.governor.floor_ratio <= Decimal::ZERO || self.governor.floor_ratio >= Decimal::ONE {
            errors.push("governor.floor_ratio must be between 0 and 1".to_string());
        }

        // Retry / stream
        if self.retry.max_attempts == 0 {
            errors.push("retry.max_attempts must be at least 1".to_string());
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            errors.push("retry.base_delay_ms must not exceed max_delay_ms".to_string());
        }
        if self.stream.max_reconnect_attempts == 0 {
            errors.push("stream.max_reconnect_attempts must be at least 1".to_string());
        }
        if self.stream.reconnect_base_secs > self.stream.reconnect_max_secs {
            errors.push("stream.reconnect_base_secs must not exceed reconnect_max_secs".to_string());
        }

        if self.dry_run.enabled && self.dry_run.starting_quote <= Decimal::ZERO {
            errors.push("dry_run.starting_quote must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
