use inkstream_ai::{TokenSourceConfig, TokenSourceKind};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Send `Access-Control-Allow-Origin: *` on stream responses.
    pub allow_any_origin: bool,
    /// Interval of SSE keep-alive comments; `None` disables them.
    pub keep_alive: Option<Duration>,
    pub source: TokenSourceConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allow_any_origin: true,
            keep_alive: keep_alive_from_secs(default_keep_alive_secs()),
            source: TokenSourceConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    source: SourceSection,
    #[serde(default)]
    openai: OpenAiSection,
}

#[derive(Debug, Deserialize)]
struct ServerSection {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_true")]
    allow_any_origin: bool,
    #[serde(default = "default_keep_alive_secs")]
    keep_alive_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allow_any_origin: true,
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SourceSection {
    #[serde(default)]
    kind: TokenSourceKind,
    #[serde(default = "default_mock_delay_ms")]
    mock_delay_ms: u64,
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            kind: TokenSourceKind::default(),
            mock_delay_ms: default_mock_delay_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct OpenAiSection {
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    max_tokens: Option<u32>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_keep_alive_secs() -> u64 {
    15
}

fn default_mock_delay_ms() -> u64 {
    50
}

fn keep_alive_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl ServerConfig {
    /// Load from `INKSTREAM_SERVER_CONFIG` or `./server.toml`, else from the environment.
    pub fn load() -> anyhow::Result<Self> {
        if let Some(path) = config_path() {
            return Self::from_file(&path);
        }

        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parse a TOML file. The API key falls back to `OPENAI_API_KEY` so it can stay out of the file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|err| anyhow::anyhow!("Failed to read config {}: {}", path, err))?;
        let parsed: FileConfig = toml::from_str(&contents)
            .map_err(|err| anyhow::anyhow!("Failed to parse config {}: {}", path, err))?;

        let mut source = TokenSourceConfig {
            kind: parsed.source.kind,
            mock_delay: Duration::from_millis(parsed.source.mock_delay_ms),
            ..TokenSourceConfig::default()
        };
        source.openai.api_key = parsed
            .openai
            .api_key
            .or_else(|| env::var("OPENAI_API_KEY").ok());
        if let Some(model) = parsed.openai.model {
            source.openai.model = model;
        }
        if let Some(base_url) = parsed.openai.base_url {
            source.openai.base_url = base_url;
        }
        if let Some(max_tokens) = parsed.openai.max_tokens {
            source.openai.max_tokens = max_tokens;
        }

        Ok(Self {
            host: parsed.server.host,
            port: parsed.server.port,
            allow_any_origin: parsed.server.allow_any_origin,
            keep_alive: keep_alive_from_secs(parsed.server.keep_alive_secs),
            source,
        })
    }

    /// Build from environment-style key lookups. Unparseable numbers fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let parsed = |key: &str| lookup(key).and_then(|value| value.trim().parse::<u64>().ok());

        let host = lookup("INKSTREAM_SERVER_HOST").unwrap_or_else(default_host);
        let port = lookup("INKSTREAM_SERVER_PORT")
            .and_then(|value| value.trim().parse::<u16>().ok())
            .unwrap_or_else(default_port);
        let allow_any_origin = lookup("INKSTREAM_ALLOW_ANY_ORIGIN")
            .map(|value| !matches!(value.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);
        let keep_alive = keep_alive_from_secs(
            parsed("INKSTREAM_KEEP_ALIVE_SECS").unwrap_or_else(default_keep_alive_secs),
        );

        let kind = match lookup("INKSTREAM_TOKEN_SOURCE") {
            Some(value) => value.parse::<TokenSourceKind>()?,
            None => TokenSourceKind::default(),
        };
        let mut source = TokenSourceConfig {
            kind,
            mock_delay: Duration::from_millis(
                parsed("INKSTREAM_MOCK_DELAY_MS").unwrap_or_else(default_mock_delay_ms),
            ),
            ..TokenSourceConfig::default()
        };
        source.openai.api_key = lookup("OPENAI_API_KEY");
        if let Some(model) = lookup("INKSTREAM_OPENAI_MODEL") {
            source.openai.model = model;
        }
        if let Some(base_url) = lookup("INKSTREAM_OPENAI_BASE_URL") {
            source.openai.base_url = base_url;
        }
        if let Some(max_tokens) = parsed("INKSTREAM_OPENAI_MAX_TOKENS") {
            source.openai.max_tokens = max_tokens.min(u32::MAX as u64) as u32;
        }

        Ok(Self {
            host,
            port,
            allow_any_origin,
            keep_alive,
            source,
        })
    }
}

fn config_path() -> Option<String> {
    if let Ok(path) = env::var("INKSTREAM_SERVER_CONFIG") {
        return Some(path);
    }
    Path::new("server.toml")
        .exists()
        .then(|| "server.toml".to_string())
}
