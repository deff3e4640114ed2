use anyhow::{Context, Result, anyhow, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::Path, path::PathBuf, str::FromStr, time::Duration};

use crate::{breaker, model::Upstream, provider::ProviderId};

/// Configuration for a single provider (e.g., API key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,

    /// Overrides the provider's public endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Country code appended to location queries (openweather only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 3 }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Dispatch settings for one position in the fallback chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Provider id, e.g. "weatherstack" or "openweather".
    pub provider: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_min_requests")]
    pub min_requests: u32,
    #[serde(default = "default_failure_ratio")]
    pub failure_ratio: f64,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_timeout_secs() -> u64 {
    3
}

fn default_min_requests() -> u32 {
    3
}

fn default_failure_ratio() -> f64 {
    0.6
}

fn default_cooldown_secs() -> u64 {
    60
}

impl UpstreamConfig {
    fn with_provider(id: ProviderId) -> Self {
        Self {
            provider: id.as_str().to_string(),
            timeout_secs: default_timeout_secs(),
            min_requests: default_min_requests(),
            failure_ratio: default_failure_ratio(),
            cooldown_secs: default_cooldown_secs(),
        }
    }

    pub fn provider_id(&self) -> Result<ProviderId> {
        ProviderId::try_from(self.provider.as_str())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn breaker_settings(&self, name: impl Into<String>) -> breaker::Settings {
        breaker::Settings {
            min_requests: self.min_requests,
            failure_ratio: self.failure_ratio,
            cooldown: Duration::from_secs(self.cooldown_secs),
            ..breaker::Settings::new(name)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamsConfig {
    pub primary: UpstreamConfig,
    pub failover: UpstreamConfig,
}

impl Default for UpstreamsConfig {
    fn default() -> Self {
        Self {
            primary: UpstreamConfig::with_provider(ProviderId::WeatherStack),
            failover: UpstreamConfig::with_provider(ProviderId::OpenWeather),
        }
    }
}

impl UpstreamsConfig {
    pub fn get(&self, role: Upstream) -> &UpstreamConfig {
        match role {
            Upstream::Primary => &self.primary,
            Upstream::Failover => &self.failover,
        }
    }

    fn get_mut(&mut self, role: Upstream) -> &mut UpstreamConfig {
        match role {
            Upstream::Primary => &mut self.primary,
            Upstream::Failover => &mut self.failover,
        }
    }
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// [cache]
/// ttl_secs = 3
///
/// [upstreams.primary]
/// provider = "weatherstack"
/// timeout_secs = 3
///
/// [providers.weatherstack]
/// api_key = "..."
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub upstreams: UpstreamsConfig,

    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

impl Config {
    pub fn has_provider(&self, id: ProviderId) -> bool {
        self.providers.contains_key(id.as_str())
    }

    pub fn provider_config(&self, id: ProviderId) -> Option<&ProviderConfig> {
        self.providers.get(id.as_str())
    }

    /// Load config from the platform config directory, apply environment
    /// overrides and validate.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    /// Same as [`Config::load`] with an explicit file path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = Self::read_file(path)?;
        cfg.apply_env(|name| std::env::var(name).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read the file alone, or return an empty default if it doesn't exist yet.
    pub fn read_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "weather-fallback", "weather")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Overlay values from environment variables. `lookup` resolves a
    /// variable name to its value.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.server.bind = bind_address(&port);
        }
        if let Some(ttl) = parse_env(&lookup, "CACHE_TTL_SECONDS")? {
            self.cache.ttl_secs = ttl;
        }

        for (role, prefix) in [(Upstream::Primary, "PRIMARY"), (Upstream::Failover, "FAILOVER")] {
            let upstream = self.upstreams.get_mut(role);

            if let Some(timeout) = parse_env(&lookup, &format!("{prefix}_TIMEOUT_SECONDS"))? {
                upstream.timeout_secs = timeout;
            }
            if let Some(requests) = parse_env(&lookup, &format!("{prefix}_REQUESTS"))? {
                upstream.min_requests = requests;
            }
            if let Some(ratio) = parse_env(&lookup, &format!("{prefix}_FAILURE_RATIO"))? {
                upstream.failure_ratio = ratio;
            }

            let key = lookup(&format!("{prefix}_ACCESS_KEY"));
            let endpoint = lookup(&format!("{prefix}_END_POINT"));
            if key.is_none() && endpoint.is_none() {
                continue;
            }

            let id = upstream.provider_id()?;
            let entry = self
                .providers
                .entry(id.as_str().to_string())
                .or_insert_with(|| ProviderConfig {
                    api_key: String::new(),
                    endpoint: None,
                    country: None,
                });
            if let Some(key) = key {
                entry.api_key = key;
            }
            if endpoint.is_some() {
                entry.endpoint = endpoint;
            }
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        validate_bind(&self.server.bind)?;

        if self.cache.ttl_secs == 0 {
            bail!("cache.ttl_secs must be greater than zero");
        }

        for role in [Upstream::Primary, Upstream::Failover] {
            let upstream = self.upstreams.get(role);
            upstream
                .provider_id()
                .with_context(|| format!("Invalid provider for upstreams.{role}"))?;

            if upstream.timeout_secs == 0 {
                bail!("upstreams.{role}.timeout_secs must be greater than zero");
            }
            if upstream.min_requests == 0 {
                bail!("upstreams.{role}.min_requests must be at least 1");
            }
            if !upstream.failure_ratio.is_finite() || upstream.failure_ratio <= 0.0 {
                bail!(
                    "upstreams.{role}.failure_ratio must be a positive number, got {}",
                    upstream.failure_ratio
                );
            }
        }

        Ok(())
    }

    /// Convenience helper: set/replace a provider API key, keeping any other settings.
    pub fn upsert_provider_api_key(&mut self, provider_id: ProviderId, api_key: String) {
        self.providers
            .entry(provider_id.as_str().to_string())
            .and_modify(|cfg| cfg.api_key = api_key.clone())
            .or_insert(ProviderConfig {
                api_key,
                endpoint: None,
                country: None,
            });
    }

    /// Returns API key for a provider, if present and non-empty.
    pub fn provider_api_key(&self, provider_id: ProviderId) -> Option<&str> {
        self.providers
            .get(provider_id.as_str())
            .map(|cfg| cfg.api_key.as_str())
            .filter(|key| !key.is_empty())
    }

    pub fn is_provider_configured(&self, provider_id: ProviderId) -> bool {
        self.provider_api_key(provider_id).is_some()
    }
}

fn parse_env<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("Invalid value '{raw}' for environment variable {name}"))
        })
        .transpose()
}

/// `host:port` with a non-empty host and a numeric port; the host may be a name.
fn validate_bind(bind: &str) -> Result<()> {
    let (host, port) = bind
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("server.bind '{bind}' must be host:port"))?;
    if host.is_empty() {
        bail!("server.bind '{bind}' has no host");
    }
    port.parse::<u16>()
        .with_context(|| format!("server.bind '{bind}' has an invalid port '{port}'"))?;
    Ok(())
}

/// Accepts "8080", ":8080" or a full "host:port".
fn bind_address(port: &str) -> String {
    let port = port.trim();
    if let Some(rest) = port.strip_prefix(':') {
        format!("0.0.0.0:{rest}")
    } else if port.contains(':') {
        port.to_string()
    } else {
        format!("0.0.0.0:{port}")
    }
}
