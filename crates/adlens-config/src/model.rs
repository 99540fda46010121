use serde::{Deserialize, Serialize};

/// Top-level application configuration, deserialized from `adlens.toml`
/// with environment overrides applied by the loader.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub reasoning: ReasoningConfig,
    pub memory: MemoryConfig,
    pub orchestrator: OrchestratorConfig,
    pub ads_api: AdsApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind: String,
    /// Path to the SQLite database file. Empty string selects in-memory.
    pub db_path: String,
    /// Hard ceiling on one turn, in seconds. The last good checkpoint is
    /// persisted even when the turn times out.
    pub turn_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8700".to_string(),
            db_path: "adlens.db".to_string(),
            turn_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    /// OpenAI-compatible chat completions endpoint base URL.
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub max_tokens: u32,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "ADLENS_REASONING_API_KEY".to_string(),
            max_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Half-life of the recency decay applied to relevance scores, in hours.
    pub decay_half_life_hours: f64,
    /// Entries whose importance falls below this floor are swept.
    pub retention_floor: f64,
    pub sweep_interval_secs: u64,
    /// How many recent transcript messages to load into context per turn.
    pub history_window: usize,
    pub recall_limit: usize,
    /// Active sessions idle for longer than this are archived by the sweep.
    pub session_idle_hours: i64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            decay_half_life_hours: 72.0,
            retention_floor: 0.1,
            sweep_interval_secs: 600,
            history_window: 20,
            recall_limit: 5,
            session_idle_hours: 72,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Step errors tolerated before the turn routes to End with an apology.
    pub max_retries: u32,
    /// Ceiling on reason/tools round-trips within one turn.
    pub max_tool_rounds: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_tool_rounds: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdsApiConfig {
    pub base_url: String,
    pub token_url: String,
    /// TTL for the ephemeral account-id cache tier, in seconds.
    pub account_cache_ttl_secs: u64,
}

impl Default for AdsApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://ads.example.com/api/v2".to_string(),
            token_url: "https://ads.example.com/oauth/token".to_string(),
            account_cache_ttl_secs: 300,
        }
    }
}
