use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure for pdf-chat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub embedder: EmbedderConfig,
    pub vectordb: VectorDbConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
    pub title: String,
    pub caption: String,
    /// Seconds without a request before a session is dropped from memory
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

fn default_session_idle_secs() -> u64 {
    60 * 60
}

/// Completion backend settings handed to every session's knowledge store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderConfig {
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorDbConfig {
    /// Parent directory for per-session index directories (system temp dir when unset)
    #[serde(default)]
    pub root_dir: Option<PathBuf>,
    /// Number of chunks retrieved as context for each prompt
    pub top_k: usize,
    /// Chunk size in characters
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub max_bytes: usize,
}

impl Config {
    /// Load configuration from file with environment variable overrides
    /// ALWAYS returns a valid config - never fails
    pub fn load() -> Self {
        let env_paths = ["../.env", ".env"];

        let mut env_loaded = false;
        for path in &env_paths {
            if dotenvy::from_path(path).is_ok() {
                tracing::info!("Loaded .env from: {}", path);
                env_loaded = true;
                break;
            }
        }

        if !env_loaded {
            tracing::debug!("No .env file found - continuing with env vars only");
        }

        let config_path =
            env::var("PDFCHAT_CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());

        let mut config = Self::from_file(Path::new(&config_path));

        config.apply_env_overrides();

        // Validate configuration - log warnings but don't fail
        if let Err(e) = config.validate() {
            tracing::warn!("Config validation warnings: {} - continuing anyway", e);
        }

        config
    }

    /// Read a YAML config file, falling back to defaults when missing or malformed
    pub fn from_file(path: &Path) -> Self {
        if !path.exists() {
            tracing::warn!(
                "Config file not found at {} - using defaults",
                path.display()
            );
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str::<Config>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to parse config file {}: {} - using defaults",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(e) => {
                tracing::error!(
                    "Failed to read config file {}: {} - using defaults",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// Apply overrides from a key lookup (the process environment in production)
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("PDFCHAT_BIND") {
            self.server.bind = bind;
        }
        if let Some(idle) = lookup("PDFCHAT_SESSION_IDLE_SECS") {
            if let Ok(v) = idle.parse() {
                self.server.session_idle_secs = v;
            }
        }

        // A single Ollama endpoint serves both completion and embeddings
        if let Some(base_url) = lookup("OLLAMA_BASE_URL") {
            self.llm.base_url = base_url.clone();
            self.embedder.base_url = base_url;
        }
        if let Some(model) = lookup("PDFCHAT_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(model) = lookup("PDFCHAT_EMBED_MODEL") {
            self.embedder.model = model;
        }
        if let Some(max_tokens) = lookup("PDFCHAT_MAX_TOKENS") {
            if let Ok(v) = max_tokens.parse() {
                self.llm.max_tokens = v;
            }
        }
        if let Some(temperature) = lookup("PDFCHAT_TEMPERATURE") {
            if let Ok(v) = temperature.parse() {
                self.llm.temperature = v;
            }
        }
        if let Some(stream) = lookup("PDFCHAT_STREAM") {
            if let Ok(v) = stream.parse() {
                self.llm.stream = v;
            }
        }

        if let Some(root) = lookup("PDFCHAT_DB_ROOT") {
            self.vectordb.root_dir = Some(PathBuf::from(root));
        }
        if let Some(top_k) = lookup("PDFCHAT_TOP_K") {
            if let Ok(v) = top_k.parse() {
                self.vectordb.top_k = v;
            }
        }

        if let Some(max_bytes) = lookup("PDFCHAT_MAX_UPLOAD_BYTES") {
            if let Ok(v) = max_bytes.parse() {
                self.upload.max_bytes = v;
            }
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.llm.model.trim().is_empty() {
            return Err("llm.model cannot be empty".into());
        }
        if self.embedder.model.trim().is_empty() {
            return Err("embedder.model cannot be empty".into());
        }
        if self.llm.max_tokens == 0 {
            return Err("llm.max_tokens cannot be 0".into());
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err("llm.temperature must be between 0.0 and 2.0".into());
        }
        for (name, url) in [
            ("llm.base_url", &self.llm.base_url),
            ("embedder.base_url", &self.embedder.base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(format!("{name} must be an http(s) URL").into());
            }
        }
        if self.vectordb.top_k == 0 {
            return Err("vectordb.top_k cannot be 0".into());
        }
        if self.vectordb.chunk_size == 0 {
            return Err("vectordb.chunk_size cannot be 0".into());
        }
        if self.vectordb.chunk_overlap >= self.vectordb.chunk_size {
            return Err("vectordb.chunk_overlap must be smaller than chunk_size".into());
        }
        if self.upload.max_bytes == 0 {
            return Err("upload.max_bytes cannot be 0".into());
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind: "127.0.0.1:8501".to_string(),
                title: "Chat with PDF using Llama 2".to_string(),
                caption: "This app allows you to chat with a PDF using Llama 2 running locally with Ollama"
                    .to_string(),
                session_idle_secs: default_session_idle_secs(),
            },
            llm: LlmConfig {
                model: "llama2:latest".to_string(),
                max_tokens: 250,
                temperature: 0.5,
                stream: true,
                base_url: "http://localhost:11434".to_string(),
            },
            embedder: EmbedderConfig {
                model: "llama2:latest".to_string(),
                base_url: "http://localhost:11434".to_string(),
            },
            vectordb: VectorDbConfig {
                root_dir: None,
                top_k: 3,
                chunk_size: 1000,
                chunk_overlap: 0,
            },
            upload: UploadConfig {
                max_bytes: 200 * 1024 * 1024,
            },
        }
    }
}
