//! Configuration loader, retrieval settings and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars
//! (`APP_RETRIEVAL__BM25__K1=1.2` sets `retrieval.bm25.k1`).
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::{FusionMethod, TokenizerKind};

pub struct Config {
    figment: Figment,
    /// Directory of the loaded config file; relative paths in it resolve here.
    base_dir: Option<PathBuf>,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from("config.toml")
    }

    /// Loads `path` plus the `config.<env>.toml` next to it, then `APP_*` env vars.
    pub fn load_from<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        let dir = path.parent().filter(|d| !d.as_os_str().is_empty());
        let sibling = |name: &str| dir.map_or_else(|| PathBuf::from(name), |d| d.join(name));

        let mut figment = Figment::new().merge(Toml::file(path));
        let overlay = match env_name.as_str() {
            "dev" | "development" => Some("config.dev.toml"),
            "prod" | "production" => Some("config.prod.toml"),
            "test" | "testing" => Some("config.test.toml"),
            _ => None,
        };
        if let Some(name) = overlay {
            figment = figment.merge(Toml::file(sibling(name)));
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment, base_dir: dir.map(Path::to_path_buf) };
        config.validate_for_env(&env_name)?;
        Ok(config)
    }

    /// Builds a config from an inline TOML document, without env overlays.
    pub fn from_toml_str(toml: &str) -> Self {
        Self { figment: Figment::new().merge(Toml::string(toml)), base_dir: None }
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// The `[retrieval]` table, defaults filled in and validated.
    /// A missing table yields the defaults. A relative `cache_dir` is taken
    /// relative to the config file's directory.
    pub fn retrieval(&self) -> anyhow::Result<RetrievalSettings> {
        let mut settings = if self.figment.find_value("retrieval").is_ok() {
            self.get::<RetrievalSettings>("retrieval")?
        } else {
            RetrievalSettings::default()
        };
        if let Some(base) = &self.base_dir {
            let resolved = resolve_with_base(base, &settings.cache_dir);
            settings.cache_dir = resolved.to_string_lossy().into_owned();
        }
        settings.validate()?;
        Ok(settings)
    }

    fn validate_for_env(&self, env: &str) -> anyhow::Result<()> {
        match env {
            "prod" | "production" => {
                if let Ok(dir) = self.get::<String>("retrieval.cache_dir") {
                    if dir.trim().is_empty() {
                        anyhow::bail!("retrieval.cache_dir must not be empty in production");
                    }
                }
            }
            "dev" | "development" | "test" | "testing" => {}
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub collection: String,
    pub cache_dir: String,
    pub bm25: Bm25Settings,
    pub fusion: FusionSettings,
    pub backend: BackendSettings,
    pub rerank: RerankSettings,
    pub batch: BatchSettings,
    pub llm: LlmSettings,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            collection: "knowledge_base".to_string(),
            cache_dir: "~/.cache/kbsearch/bm25".to_string(),
            bm25: Bm25Settings::default(),
            fusion: FusionSettings::default(),
            backend: BackendSettings::default(),
            rerank: RerankSettings::default(),
            batch: BatchSettings::default(),
            llm: LlmSettings::default(),
        }
    }
}

impl RetrievalSettings {
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(Error::InvalidConfig(msg));
        if self.collection.trim().is_empty() {
            return bad("collection must not be empty".into());
        }
        if !(self.bm25.k1 > 0.0) {
            return bad(format!("bm25.k1 must be positive, got {}", self.bm25.k1));
        }
        if !(0.0..=1.0).contains(&self.bm25.b) {
            return bad(format!("bm25.b must be within [0, 1], got {}", self.bm25.b));
        }
        if !(self.fusion.rrf_k > 0.0) {
            return bad(format!("fusion.rrf_k must be positive, got {}", self.fusion.rrf_k));
        }
        let (vw, bw) = (self.fusion.vector_weight, self.fusion.bm25_weight);
        if !(vw >= 0.0 && bw >= 0.0) || vw + bw <= 0.0 {
            let msg =
                format!("fusion weights must be non-negative with a positive sum, got {vw}/{bw}");
            return bad(msg);
        }
        if self.fusion.candidate_multiplier == 0 || self.fusion.max_candidates == 0 {
            let msg = "fusion.candidate_multiplier and fusion.max_candidates must be at least 1";
            return bad(msg.to_string());
        }
        if self.backend.timeout_ms == 0 || self.llm.timeout_ms == 0 {
            return bad("timeouts must be positive".into());
        }
        if self.batch.item_timeout_ms == Some(0) || self.batch.deadline_ms == Some(0) {
            return bad("batch timeouts must be positive when set".into());
        }
        if !(0.0..=1.0).contains(&self.rerank.unscored_score) {
            let got = self.rerank.unscored_score;
            return bad(format!("rerank.unscored_score must be within [0, 1], got {got}"));
        }
        Ok(())
    }

    pub fn cache_path(&self) -> PathBuf {
        expand_path(&self.cache_dir)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Settings {
    pub k1: f32,
    pub b: f32,
    pub tokenizer: TokenizerKind,
    pub stop_words: Vec<String>,
}

impl Default for Bm25Settings {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75, tokenizer: TokenizerKind::Auto, stop_words: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionSettings {
    pub method: FusionMethod,
    pub rrf_k: f32,
    pub vector_weight: f32,
    pub bm25_weight: f32,
    /// Candidate pool is `top_k * candidate_multiplier`, capped at `max_candidates`.
    pub candidate_multiplier: usize,
    pub max_candidates: usize,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            method: FusionMethod::Weighted,
            rrf_k: 60.0,
            vector_weight: 0.5,
            bm25_weight: 0.5,
            candidate_multiplier: 3,
            max_candidates: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self { timeout_ms: 30_000, max_retries: 2, backoff_ms: 200 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankSettings {
    pub unscored_score: f32,
    pub max_content_chars: usize,
}

impl Default for RerankSettings {
    fn default() -> Self {
        Self { unscored_score: 0.3, max_content_chars: 800 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub item_timeout_ms: Option<u64>,
    pub deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_ms: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.siliconflow.cn/v1".to_string(),
            api_key_env: "SILICONFLOW_API_KEY".to_string(),
            model: "deepseek-ai/DeepSeek-V3.2".to_string(),
            temperature: 0.1,
            timeout_ms: 60_000,
        }
    }
}

/// `~` and `$VAR`/`${VAR}` expansion. Unknown variables leave the input untouched.
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let with_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    PathBuf::from(shellexpand::tilde(&with_env).as_ref())
}

/// Expands `p`, then joins it onto `base` unless it is already absolute.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() {
        p
    } else {
        base.join(p)
    }
}
