use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ClarityError, Result};
use crate::generator::GenerationParams;
use crate::payload::ImageEncoding;
use crate::writer::{ArtifactWriter, NamingMode};

/// Credential value written by `clarity config init`; treated as "not configured"
pub const PLACEHOLDER_API_KEY: &str = "YOUR_API_KEY_HERE";

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_LOCATION: &str = "us-central1";
pub const DEFAULT_OUTPUT_DIR: &str = "refinEI";

/// Commented bootstrap file written by `clarity config init`
pub const CONFIG_TEMPLATE: &str = include_str!("../../.clarity-config.template.toml");

/// Centralized configuration, loaded from ~/.clarity/config.toml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClarityConfig {
    pub credentials: CredentialsConfig,
    pub inference: InferenceConfig,
    pub output: OutputConfig,
    pub catalog: CatalogConfig,
    pub ambient: AmbientConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialMode {
    /// Generative Language API with an API key
    #[default]
    ApiKey,
    /// Vertex AI with a project id, region and bearer token
    Project,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub mode: CredentialMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub location: String,
    /// When absent in project mode the CLI asks `gcloud` for one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            mode: CredentialMode::ApiKey,
            api_key: None,
            project_id: None,
            location: DEFAULT_LOCATION.to_string(),
            access_token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub model: String,
    /// Overrides the endpoint host, e.g. to point at a local mock server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        let params = GenerationParams::default();
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: None,
            temperature: params.temperature,
            max_output_tokens: params.max_output_tokens,
            max_attempts: 3,
            backoff_base_ms: 1000,
            timeout_secs: 90,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub naming: NamingMode,
    pub image_format: ImageFormat,
    pub jpeg_quality: u8,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            naming: NamingMode::Timestamped,
            image_format: ImageFormat::Png,
            jpeg_quality: 85,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Directory holding `pbi.md` / `technical_task.md` / `bug.md` overrides
    #[serde(skip_serializing_if = "Option::is_none")]
    pub templates_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmbientConfig {
    pub interval_secs: u64,
    pub watch_dir: PathBuf,
}

impl Default for AmbientConfig {
    fn default() -> Self {
        Self {
            interval_secs: 15,
            watch_dir: PathBuf::from("images"),
        }
    }
}

/// Credentials after validation, ready to hand to an inference client
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    ApiKey(String),
    Project {
        project_id: String,
        location: String,
        access_token: Option<String>,
    },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::ApiKey(key) => f.debug_tuple("ApiKey").field(&redact_secret(key)).finish(),
            Credentials::Project {
                project_id,
                location,
                access_token,
            } => f
                .debug_struct("Project")
                .field("project_id", project_id)
                .field("location", location)
                .field("access_token", &access_token.as_deref().map(redact_secret))
                .finish(),
        }
    }
}

impl ClarityConfig {
    /// Load ~/.clarity/config.toml (defaults when absent), then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            debug!(path = %config_path.display(), "no config file, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a config file without touching the environment.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| ClarityError::local_io(path, e))?;
        toml::from_str(&content)
            .map_err(|e| ClarityError::config(format!("{}: {e}", path.display())))
    }

    /// Get config directory: ~/.clarity
    pub fn config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".clarity")
    }

    /// Get config file path: ~/.clarity/config.toml
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// Apply overrides from `lookup`. `CLARITY_API_KEY` wins over `GEMINI_API_KEY`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("CLARITY_API_KEY").or_else(|| get("GEMINI_API_KEY")) {
            self.credentials.api_key = Some(key);
        }
        if let Some(project) = get("CLARITY_PROJECT_ID") {
            self.credentials.project_id = Some(project);
        }
        if let Some(token) = get("CLARITY_ACCESS_TOKEN") {
            self.credentials.access_token = Some(token);
        }
        if let Some(model) = get("CLARITY_MODEL") {
            self.inference.model = model;
        }
        if let Some(base_url) = get("CLARITY_BASE_URL") {
            self.inference.base_url = Some(base_url);
        }
    }

    /// Validated credentials for the configured mode, or `ConfigurationMissing`.
    pub fn resolve_credentials(&self) -> Result<Credentials> {
        let creds = &self.credentials;
        match creds.mode {
            CredentialMode::ApiKey => {
                let key = creds
                    .api_key
                    .as_deref()
                    .map(str::trim)
                    .filter(|k| !k.is_empty() && *k != PLACEHOLDER_API_KEY)
                    .ok_or_else(|| {
                        ClarityError::configuration_missing(
                            "set credentials.api_key or GEMINI_API_KEY",
                        )
                    })?;
                Ok(Credentials::ApiKey(key.to_string()))
            }
            CredentialMode::Project => {
                let project_id = creds
                    .project_id
                    .as_deref()
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| {
                        ClarityError::configuration_missing(
                            "credentials.mode is \"project\" but no project_id is set",
                        )
                    })?;
                let location = if creds.location.trim().is_empty() {
                    DEFAULT_LOCATION.to_string()
                } else {
                    creds.location.trim().to_string()
                };
                Ok(Credentials::Project {
                    project_id: project_id.to_string(),
                    location,
                    access_token: creds.access_token.clone().filter(|t| !t.trim().is_empty()),
                })
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.resolve_credentials().is_ok()
    }

    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.inference.temperature,
            max_output_tokens: self.inference.max_output_tokens,
        }
    }

    pub fn image_encoding(&self) -> ImageEncoding {
        match self.output.image_format {
            ImageFormat::Png => ImageEncoding::Png,
            ImageFormat::Jpeg => ImageEncoding::Jpeg {
                quality: self.output.jpeg_quality,
            },
        }
    }

    pub fn artifact_writer(&self) -> ArtifactWriter {
        ArtifactWriter::new(&self.output.dir, self.output.naming)
    }

    /// Copy with secrets masked, for `config show`.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.credentials.api_key = copy.credentials.api_key.as_deref().map(redact_secret);
        copy.credentials.access_token = copy.credentials.access_token.as_deref().map(redact_secret);
        copy
    }

    /// Defaults plus the placeholder credential; what `CONFIG_TEMPLATE` parses to.
    pub fn template() -> Self {
        let mut config = Self::default();
        config.credentials.api_key = Some(PLACEHOLDER_API_KEY.to_string());
        config
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ClarityError::config(format!("failed to serialize config: {e}")))
    }

    /// Save config to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ClarityError::local_io(parent, e))?;
        }
        fs::write(path, self.to_toml()?).map_err(|e| ClarityError::local_io(path, e))?;
        info!(path = %path.display(), "config saved");
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }
}

/// `abcd****` for long secrets, `****` otherwise.
pub fn redact_secret(secret: &str) -> String {
    if secret == PLACEHOLDER_API_KEY {
        return secret.to_string();
    }
    if secret.chars().count() < 8 {
        return "****".to_string();
    }
    let prefix: String = secret.chars().take(4).collect();
    format!("{prefix}****")
}

/// Load environment variables from `./.env` and `~/.clarity/.env`.
///
/// Existing variables are never overwritten, so the current directory wins
/// over the home directory and the real environment wins over both.
pub fn load_dotenv() {
    let mut loaded_from = Vec::new();

    if let Ok(path) = dotenvy::dotenv() {
        debug!("Loaded .env from current directory: {}", path.display());
        loaded_from.push(path.display().to_string());
    }

    let env_file = ClarityConfig::config_dir().join(".env");
    if env_file.exists() {
        match dotenvy::from_path(&env_file) {
            Ok(()) => {
                debug!("Loaded .env from ~/.clarity: {}", env_file.display());
                loaded_from.push(env_file.display().to_string());
            }
            Err(e) => debug!("Failed to load ~/.clarity/.env: {}", e),
        }
    }

    if loaded_from.is_empty() {
        debug!("No .env files found (current dir or ~/.clarity)");
    } else {
        info!("Loaded environment from: {}", loaded_from.join(", "));
    }
}
