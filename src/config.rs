use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::cli::Cli;
use crate::error::{Error, Result};
use crate::inject::DeliveryMode;
use crate::llm::{DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_TEMPERATURE};

pub const DEFAULT_CONFIG_FILE: &str = ".diffreview.toml";
pub const DEFAULT_CREDENTIAL_ENV: &str = "OPENAI_API_KEY";
const DEFAULT_INTERPRETER: &str = "osascript";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_AUTOMATION_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    pub delivery: Option<String>,
    pub target_app: Option<String>,
    pub interpreter: Option<String>,
    pub prompt_dir: Option<String>,
    pub preview: Option<bool>,
    pub credential_env: Option<String>,
    pub git_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub automation_timeout_secs: Option<u64>,
}

/// API key for the review service. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub delivery: DeliveryMode,
    pub target_app: Option<String>,
    pub interpreter: String,
    pub prompt_dir: Option<PathBuf>,
    pub preview: bool,
    pub assume_yes: bool,
    pub credential_env: String,
    pub git_timeout: Option<Duration>,
    pub request_timeout: Option<Duration>,
    pub automation_timeout: Option<Duration>,
    pub credential: Option<Credential>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            delivery: DeliveryMode::Buffer,
            target_app: None,
            interpreter: DEFAULT_INTERPRETER.to_string(),
            prompt_dir: None,
            preview: false,
            assume_yes: false,
            credential_env: DEFAULT_CREDENTIAL_ENV.to_string(),
            git_timeout: timeout_from_secs(DEFAULT_TIMEOUT_SECS),
            request_timeout: timeout_from_secs(DEFAULT_TIMEOUT_SECS),
            automation_timeout: timeout_from_secs(DEFAULT_AUTOMATION_TIMEOUT_SECS),
            credential: None,
        }
    }
}

impl Config {
    /// Load the config file, apply CLI overrides and resolve the credential.
    ///
    /// A missing default config file is fine; a missing `--config` path is not.
    pub fn load(cli: &Cli) -> Result<Self> {
        let file_config = match cli.config {
            Some(ref path) => {
                if !path.exists() {
                    return Err(Error::ConfigNotFound(path.clone()));
                }
                parse_config(&std::fs::read_to_string(path)?)?
            }
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    parse_config(&std::fs::read_to_string(path)?)?
                } else {
                    ConfigFile::default()
                }
            }
        };

        let mut config = merge(file_config, cli)?;
        validate_merged(&config)?;

        let sources = CredentialSource::default_chain();
        config.credential = resolve_credential(&config.credential_env, &sources);
        Ok(config)
    }
}

pub fn parse_config(content: &str) -> Result<ConfigFile> {
    let config: ConfigFile = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

fn parse_delivery(value: &str) -> Result<DeliveryMode> {
    match value {
        "buffer" => Ok(DeliveryMode::Buffer),
        "automation" => Ok(DeliveryMode::Automation),
        other => Err(Error::ConfigValidation(format!(
            "unknown delivery: {other} (expected: buffer, automation)"
        ))),
    }
}

fn validate(config: &ConfigFile) -> Result<()> {
    if let Some(ref delivery) = config.delivery {
        parse_delivery(delivery)?;
    }
    if let Some(temperature) = config.temperature
        && !(0.0..=2.0).contains(&temperature)
    {
        return Err(Error::ConfigValidation(format!(
            "temperature must be between 0.0 and 2.0, got {temperature}"
        )));
    }
    if let Some(ref env) = config.credential_env
        && env.trim().is_empty()
    {
        return Err(Error::ConfigValidation(
            "credential_env must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_merged(config: &Config) -> Result<()> {
    if config.delivery == DeliveryMode::Automation
        && config.target_app.as_deref().is_none_or(|a| a.trim().is_empty())
    {
        return Err(Error::ConfigValidation(
            "automation delivery requires target_app".to_string(),
        ));
    }
    Ok(())
}

/// `0` disables a timeout.
fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

pub fn merge(file: ConfigFile, cli: &Cli) -> Result<Config> {
    let defaults = Config::default();
    let delivery = match (cli.delivery, file.delivery) {
        (Some(d), _) => d,
        (None, Some(d)) => parse_delivery(&d)?,
        (None, None) => defaults.delivery,
    };

    Ok(Config {
        model: cli.model.clone().or(file.model).unwrap_or(defaults.model),
        base_url: file.base_url.unwrap_or(defaults.base_url),
        temperature: file.temperature.unwrap_or(defaults.temperature),
        delivery,
        target_app: cli.target_app.clone().or(file.target_app),
        interpreter: file.interpreter.unwrap_or(defaults.interpreter),
        prompt_dir: file.prompt_dir.map(PathBuf::from),
        preview: cli.preview || file.preview.unwrap_or(false),
        assume_yes: cli.yes,
        credential_env: file.credential_env.unwrap_or(defaults.credential_env),
        git_timeout: file
            .git_timeout_secs
            .map_or(defaults.git_timeout, timeout_from_secs),
        request_timeout: file
            .request_timeout_secs
            .map_or(defaults.request_timeout, timeout_from_secs),
        automation_timeout: file
            .automation_timeout_secs
            .map_or(defaults.automation_timeout, timeout_from_secs),
        credential: None,
    })
}

/// One place the credential may come from, tried in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// A dotenv-style file.
    DotEnvFile(PathBuf),
    /// The process environment.
    Environment,
}

impl CredentialSource {
    /// `.env` in the current directory, then next to the executable and in
    /// each of its ancestors, then in the home directory, then the environment.
    pub fn default_chain() -> Vec<CredentialSource> {
        let mut sources = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            sources.push(CredentialSource::DotEnvFile(cwd.join(".env")));
        }
        if let Ok(exe) = std::env::current_exe()
            && let Some(dir) = exe.parent()
        {
            for ancestor in dir.ancestors() {
                sources.push(CredentialSource::DotEnvFile(ancestor.join(".env")));
            }
        }
        if let Some(home) = std::env::var_os("HOME") {
            sources.push(CredentialSource::DotEnvFile(Path::new(&home).join(".env")));
        }
        sources.dedup();
        sources.push(CredentialSource::Environment);
        sources
    }

    fn lookup(&self, var: &str) -> Option<String> {
        match self {
            CredentialSource::DotEnvFile(path) => {
                let iter = dotenvy::from_path_iter(path).ok()?;
                iter.filter_map(|item| item.ok())
                    .find(|(key, _)| key == var)
                    .map(|(_, value)| value)
            }
            CredentialSource::Environment => std::env::var(var).ok(),
        }
    }
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::DotEnvFile(path) => write!(f, "{}", path.display()),
            CredentialSource::Environment => write!(f, "process environment"),
        }
    }
}

/// First non-empty value of `var` across `sources`.
pub fn resolve_credential(var: &str, sources: &[CredentialSource]) -> Option<Credential> {
    for source in sources {
        if let Some(value) = source.lookup(var).filter(|v| !v.trim().is_empty()) {
            debug!(var, %source, "credential found");
            return Some(Credential::new(value));
        }
    }
    debug!(var, "credential not found in any source");
    None
}
