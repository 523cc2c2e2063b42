use directories::BaseDirs;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8081";
pub const DEFAULT_IDENTITY_BASE_URL: &str = "http://localhost:8080";

const API_URL_ENV: &str = "RAGCHAT_API_BASE_URL";
const IDENTITY_URL_ENV: &str = "RAGCHAT_IDENTITY_URL";

#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Chatbot backend (`/ai/...` endpoints).
    pub api_base_url: Url,
    /// Identity service (`/users/...` endpoints).
    pub identity_base_url: Url,
    /// Location of the persisted session; `None` selects the user data dir.
    pub storage_path: Option<PathBuf>,
    pub request_timeout: Option<Duration>,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("configuration invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Invalid(detail) => format!("Ragchat not configured: {detail}. Update ragchat.yaml."),
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: fixed_url(DEFAULT_API_BASE_URL),
            identity_base_url: fixed_url(DEFAULT_IDENTITY_BASE_URL),
            storage_path: None,
            request_timeout: None,
        }
    }
}

impl ClientSettings {
    /// Builds settings from `ragchat.yaml` (if any) overlaid with environment
    /// variables. A `.env` file in the working directory is honored.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let section = match locate_config_file() {
            Some(path) => {
                let contents = fs::read_to_string(&path).map_err(|err| {
                    ConfigError::Invalid(format!("failed to read {}: {err}", path.display()))
                })?;
                let config: RagchatConfig = serde_yaml::from_str(&contents)
                    .map_err(|err| ConfigError::Invalid(format!("invalid ragchat.yaml: {err}")))?;
                config.client.unwrap_or_default()
            }
            None => ClientSection::default(),
        };
        let overrides = EnvOverrides {
            api_base_url: std::env::var(API_URL_ENV).ok(),
            identity_base_url: std::env::var(IDENTITY_URL_ENV).ok(),
        };
        resolve_settings(section, overrides)
    }

    pub fn with_api_base_url(mut self, url: &str) -> Result<Self, ConfigError> {
        self.api_base_url = parse_base_url("api_base_url", url)?;
        Ok(self)
    }

    pub fn with_identity_base_url(mut self, url: &str) -> Result<Self, ConfigError> {
        self.identity_base_url = parse_base_url("identity_base_url", url)?;
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Default)]
struct EnvOverrides {
    api_base_url: Option<String>,
    identity_base_url: Option<String>,
}

fn resolve_settings(
    section: ClientSection,
    overrides: EnvOverrides,
) -> Result<ClientSettings, ConfigError> {
    let api = pick(overrides.api_base_url, section.api_base_url, DEFAULT_API_BASE_URL);
    let identity = pick(
        overrides.identity_base_url,
        section.identity_base_url,
        DEFAULT_IDENTITY_BASE_URL,
    );
    Ok(ClientSettings {
        api_base_url: parse_base_url("api_base_url", &api)?,
        identity_base_url: parse_base_url("identity_base_url", &identity)?,
        storage_path: section.storage_path,
        request_timeout: section
            .request_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs),
    })
}

fn pick(env: Option<String>, file: Option<String>, fallback: &str) -> String {
    env.into_iter()
        .chain(file)
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn parse_base_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim())
        .map_err(|err| ConfigError::Invalid(format!("{field} `{raw}` is not a URL: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid(format!(
            "{field} must use http or https, got `{}`",
            url.scheme()
        )));
    }
    if url.cannot_be_a_base() {
        return Err(ConfigError::Invalid(format!("{field} `{raw}` cannot be a base URL")));
    }
    Ok(url)
}

fn fixed_url(raw: &str) -> Url {
    Url::parse(raw).expect("built-in default URL is valid")
}

fn locate_config_file() -> Option<PathBuf> {
    ragchat_yaml_candidates()
        .into_iter()
        .find(|path| path.exists())
}

fn ragchat_yaml_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(base) = BaseDirs::new() {
        let config_dir = base.config_dir().join("ragchat");
        paths.push(config_dir.join("ragchat.yaml"));
        paths.push(config_dir.join("ragchat.yml"));
        let home_dir = base.home_dir();
        paths.push(home_dir.join(".ragchat").join("ragchat.yaml"));
    }
    paths.push(PathBuf::from("ragchat.yaml"));
    paths
}

#[derive(Debug, Deserialize)]
struct RagchatConfig {
    client: Option<ClientSection>,
}

#[derive(Debug, Default, Deserialize)]
struct ClientSection {
    #[serde(default)]
    api_base_url: Option<String>,
    #[serde(default)]
    identity_base_url: Option<String>,
    #[serde(default)]
    storage_path: Option<PathBuf>,
    #[serde(default)]
    request_timeout_secs: Option<u64>,
}
