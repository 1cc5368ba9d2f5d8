//! Provider configuration loaded once at startup.
//!
//! | Variable                     | Default                     |
//! |------------------------------|-----------------------------|
//! | `VISION_PROVIDER`            | `mock`                      |
//! | `VISION_MODEL`               | required for `external`     |
//! | `VISION_API_KEY`             | required for `external`     |
//! | `VISION_ENDPOINT`            | `https://api.openai.com/v1` |
//! | `TEXT_PROVIDER`              | `mock`                      |
//! | `TEXT_MODEL`                 | required for `external`     |
//! | `TEXT_API_KEY`               | required for `external`     |
//! | `TEXT_ENDPOINT`              | `https://api.openai.com/v1` |
//! | `AI_REQUEST_TIMEOUT_SECONDS` | `20`                        |
//! | `AI_MAX_RETRIES`             | `2`                         |

use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: f64 = 20.0;
pub const DEFAULT_MAX_RETRIES: u32 = 2;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unsupported {key} '{value}' (supported values: mock, external, openai)")]
    UnknownProvider { key: String, value: String },

    #[error("{key} is required when {provider_key} is '{provider}'")]
    Missing {
        key: String,
        provider_key: String,
        provider: String,
    },

    #[error("{key} must be {expected}, got '{value}'")]
    InvalidNumber {
        key: String,
        value: String,
        expected: &'static str,
    },

    #[error("failed to build HTTP client for {role} provider: {reason}")]
    HttpClient { role: &'static str, reason: String },
}

impl From<ConfigError> for prolix_contracts::error::NarrationError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderRole {
    Vision,
    Text,
}

impl ProviderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vision => "vision",
            Self::Text => "text",
        }
    }

    fn env_prefix(&self) -> &'static str {
        match self {
            Self::Vision => "VISION",
            Self::Text => "TEXT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Mock,
    External,
}

impl ProviderKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mock" => Some(Self::Mock),
            "external" | "openai" => Some(Self::External),
            _ => None,
        }
    }
}

/// One provider role. The API key never appears in `Debug` output.
#[derive(Clone, PartialEq)]
pub struct EndpointConfig {
    pub role: ProviderRole,
    pub kind: ProviderKind,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub endpoint: String,
}

impl EndpointConfig {
    pub fn mock(role: ProviderRole) -> Self {
        Self {
            role,
            kind: ProviderKind::Mock,
            model: None,
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("role", &self.role)
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub vision: EndpointConfig,
    pub text: EndpointConfig,
    pub request_timeout: Duration,
    pub max_retries: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            vision: EndpointConfig::mock(ProviderRole::Vision),
            text: EndpointConfig::mock(ProviderRole::Text),
            request_timeout: Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_SECONDS),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl ProviderConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Values are trimmed and blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let vision = endpoint_from(ProviderRole::Vision, &get)?;
        let text = endpoint_from(ProviderRole::Text, &get)?;

        let request_timeout = match get("AI_REQUEST_TIMEOUT_SECONDS") {
            None => Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_SECONDS),
            Some(raw) => {
                let seconds = raw
                    .parse::<f64>()
                    .ok()
                    .filter(|value| value.is_finite() && *value > 0.0)
                    .ok_or_else(|| ConfigError::InvalidNumber {
                        key: "AI_REQUEST_TIMEOUT_SECONDS".to_string(),
                        value: raw.clone(),
                        expected: "a positive number of seconds",
                    })?;
                Duration::from_secs_f64(seconds)
            }
        };

        let max_retries = match get("AI_MAX_RETRIES") {
            None => DEFAULT_MAX_RETRIES,
            Some(raw) => raw.parse::<u32>().map_err(|_| ConfigError::InvalidNumber {
                key: "AI_MAX_RETRIES".to_string(),
                value: raw.clone(),
                expected: "a non-negative integer",
            })?,
        };

        Ok(Self {
            vision,
            text,
            request_timeout,
            max_retries,
        })
    }
}

fn endpoint_from<G>(role: ProviderRole, get: &G) -> Result<EndpointConfig, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let prefix = role.env_prefix();
    let provider_key = format!("{prefix}_PROVIDER");
    let provider = get(&provider_key).unwrap_or_else(|| "mock".to_string());
    let kind = ProviderKind::parse(&provider).ok_or_else(|| ConfigError::UnknownProvider {
        key: provider_key.clone(),
        value: provider.clone(),
    })?;

    let model = get(&format!("{prefix}_MODEL"));
    let api_key = get(&format!("{prefix}_API_KEY"));
    let endpoint = get(&format!("{prefix}_ENDPOINT"))
        .map(|value| value.trim_end_matches('/').to_string())
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

    if kind == ProviderKind::External {
        let missing = |key: String| ConfigError::Missing {
            key,
            provider_key: provider_key.clone(),
            provider: provider.clone(),
        };
        if api_key.is_none() {
            return Err(missing(format!("{prefix}_API_KEY")));
        }
        if model.is_none() {
            return Err(missing(format!("{prefix}_MODEL")));
        }
    }

    Ok(EndpointConfig {
        role,
        kind,
        model,
        api_key,
        endpoint,
    })
}
