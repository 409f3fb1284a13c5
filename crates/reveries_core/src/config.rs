use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReveriesConfig {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub memory: MemoryConfig,
    pub retrieval: RetrievalConfig,
    pub monologue: MonologueConfig,
    pub breaker: BreakerConfig,
    pub conversation: ConversationConfig,
    /// Override for the `~/.reveries` data directory.
    pub data_dir: Option<PathBuf>,
}

impl ReveriesConfig {
    /// Load config from a JSON file, falling back to defaults for missing
    /// fields. Env var overrides are applied after the file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: ReveriesConfig =
            serde_json::from_str(&content).context("Failed to parse JSON config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Try to load from path; if the file is absent or invalid, return
    /// defaults with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("REVERIES_CHAT_PROVIDER") {
            self.llm.provider = v;
        }
        if let Ok(v) = std::env::var("REVERIES_CHAT_MODEL") {
            self.llm.chat_model = v;
        }
        if let Ok(v) = std::env::var("REVERIES_EMBEDDING_PROVIDER") {
            self.embedding.provider = v;
        }
        if let Ok(v) = std::env::var("REVERIES_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("REVERIES_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("REVERIES_CONSOLIDATION_INTERVAL_SECS") {
            if let Ok(n) = v.parse() {
                self.memory.consolidation_interval_secs = n;
            }
        }
    }

    /// Validate that every credential the configured providers need is
    /// present. Fails with a human-readable listing of what is missing.
    pub fn validate_credentials(&self) -> Result<()> {
        let mut missing = Vec::new();
        if let Some(var) = provider_credential(&self.llm.provider) {
            if std::env::var(var).is_err() {
                missing.push(format!("{} (chat provider '{}')", var, self.llm.provider));
            }
        }
        if let Some(var) = provider_credential(&self.embedding.provider) {
            if std::env::var(var).is_err() {
                missing.push(format!(
                    "{} (embedding provider '{}')",
                    var, self.embedding.provider
                ));
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Missing required credentials:\n  - {}",
                missing.join("\n  - ")
            )
        }
    }

    /// Resolve the data directory and the well-known files inside it.
    pub fn paths(&self) -> ReveriesPaths {
        let dir = self
            .data_dir
            .clone()
            .or_else(|| dirs::home_dir().map(|h| h.join(".reveries")))
            .unwrap_or_else(|| PathBuf::from(".reveries"));
        ReveriesPaths {
            store: dir.join("reveries.db"),
            socket: dir.join("reveries.sock"),
            pid: dir.join("reveries.pid"),
            config: dir.join("config.json"),
            dir,
        }
    }
}

fn provider_credential(provider: &str) -> Option<&'static str> {
    match provider {
        "cerebras" => Some("CEREBRAS_API_KEY"),
        "openai" => Some("OPENAI_API_KEY"),
        "voyage" => Some("VOYAGE_API_KEY"),
        // "mock" and unknown providers carry their own defaults
        _ => None,
    }
}

/// Well-known files under the per-user data directory.
#[derive(Debug, Clone)]
pub struct ReveriesPaths {
    pub dir: PathBuf,
    pub store: PathBuf,
    pub socket: PathBuf,
    pub pid: PathBuf,
    pub config: PathBuf,
}

// ============================================================================
// Sub-configs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// "cerebras", "openai", or "mock".
    pub provider: String,
    pub chat_model: String,
    /// Model used for monologue generation; defaults to the chat model.
    pub monologue_model: Option<String>,
    /// Model used for consolidation abstraction; defaults to the chat model.
    pub abstraction_model: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "cerebras".to_string(),
            chat_model: "llama-3.3-70b".to_string(),
            monologue_model: None,
            abstraction_model: None,
            base_url: None,
            max_tokens: 2048,
            temperature: 0.8,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "voyage", "openai", or "mock".
    pub provider: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "voyage".to_string(),
            model: "voyage-3-lite".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub half_life_days: f64,
    pub minimum_salience: f32,
    pub minimum_link_strength: f32,
    /// Cosine threshold above which a consolidation candidate merges into
    /// its nearest existing episode.
    pub merge_threshold: f32,
    pub consolidation_interval_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            half_life_days: 30.0,
            minimum_salience: 0.1,
            minimum_link_strength: 0.05,
            merge_threshold: 0.85,
            consolidation_interval_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub limit: usize,
    pub max_hops: u32,
    pub decay_per_hop: f32,
    pub activation_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            max_hops: 3,
            decay_per_hop: 0.5,
            activation_threshold: 0.01,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonologueConfig {
    /// Character budget per cycle; a cycle hard-stops at 1.5x this.
    pub max_tokens_per_cycle: usize,
    /// Idle reactivation interval.
    pub idle_interval_secs: u64,
    /// How long the partner must be silent before a reach-out is invited.
    pub partner_idle_secs: u64,
    /// Minimum time between reach-outs.
    pub reach_out_cooldown_secs: u64,
}

impl Default for MonologueConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_cycle: 2000,
            idle_interval_secs: 300,
            partner_idle_secs: 300,
            reach_out_cooldown_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub distress_threshold: f32,
    pub max_consecutive_distress: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            distress_threshold: 0.6,
            max_consecutive_distress: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Turns of history kept in memory per session.
    pub history_turns: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self { history_turns: 20 }
    }
}

// ============================================================================
// Tests
// ============================================================================
