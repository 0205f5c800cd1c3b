use crate::TradingMode;

/// Process configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
///
/// Trading parameters (symbol, strategies, indicators) live in the TOML file
/// at `trading_config_path` and can be reloaded while running.
#[derive(Debug, Clone)]
pub struct Config {
    pub trading_mode: TradingMode,

    // Exchange (USDⓈ-M futures REST)
    pub binance_base_url: String,
    pub binance_api_key: Option<String>,
    pub binance_secret: Option<String>,

    // Telegram control surface; disabled when no token is set
    pub telegram_token: Option<String>,
    pub telegram_allowed_user_ids: Vec<i64>,

    // Decision-maker
    pub ollama_host: String,
    pub ollama_model: String,

    // Paper trading
    pub paper_slippage_bps: f64,
    pub paper_fill_delay_ms: u64,

    // Execution verification
    pub verify_timeout_secs: u64,

    pub database_url: String,
    pub trading_config_path: String,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let mode_raw = required_env("TRADING_MODE");
        let trading_mode = parse_trading_mode(&mode_raw).unwrap_or_else(|| {
            panic!("ERROR: TRADING_MODE must be 'paper', 'live' or 'manual', got: '{mode_raw}'")
        });

        // Manual mode reads positions from the account to verify operator fills
        let (binance_api_key, binance_secret) = match trading_mode {
            TradingMode::Live | TradingMode::Manual => (
                Some(required_env("BINANCE_API_KEY")),
                Some(required_env("BINANCE_SECRET")),
            ),
            _ => (optional_env("BINANCE_API_KEY"), optional_env("BINANCE_SECRET")),
        };

        let telegram_token = optional_env("TELEGRAM_TOKEN");
        let telegram_allowed_user_ids = match &telegram_token {
            Some(_) => parse_user_ids(&required_env("TELEGRAM_ALLOWED_USER_IDS"))
                .unwrap_or_else(|bad| {
                    panic!("TELEGRAM_ALLOWED_USER_IDS contains non-numeric ID: '{bad}'")
                }),
            None => Vec::new(),
        };

        Config {
            trading_mode,
            binance_base_url: optional_env("BINANCE_BASE_URL")
                .unwrap_or_else(|| "https://fapi.binance.com".to_string()),
            binance_api_key,
            binance_secret,
            telegram_token,
            telegram_allowed_user_ids,
            ollama_host: optional_env("OLLAMA_HOST")
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            ollama_model: optional_env("OLLAMA_MODEL")
                .unwrap_or_else(|| "qwen2.5:3b-instruct-q4_K_M".to_string()),
            paper_slippage_bps: optional_env("PAPER_SLIPPAGE_BPS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(10.0),
            paper_fill_delay_ms: optional_env("PAPER_FILL_DELAY_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(500),
            verify_timeout_secs: optional_env("VERIFY_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            database_url: required_env("DATABASE_URL"),
            trading_config_path: optional_env("TRADING_CONFIG_PATH")
                .unwrap_or_else(|| "config/trading.toml".to_string()),
        }
    }
}

fn parse_trading_mode(raw: &str) -> Option<TradingMode> {
    match raw.trim().to_lowercase().as_str() {
        "paper" => Some(TradingMode::Paper),
        "live" => Some(TradingMode::Live),
        "manual" => Some(TradingMode::Manual),
        _ => None,
    }
}

/// Comma-separated Telegram user ids. Returns the offending entry on failure.
fn parse_user_ids(raw: &str) -> Result<Vec<i64>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<i64>().map_err(|_| s.to_string()))
        .collect()
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
