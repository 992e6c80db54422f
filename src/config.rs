use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Context as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::render::Credentials;
use crate::resolve::Topology;
use crate::sites::SiteProfile;

/// A run configuration, read from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub institution: String,
    pub site: SiteRef,
    pub subunits: Vec<SubunitEntry>,
    #[serde(default)]
    pub render: RenderSettings,
    #[serde(default = "RunConfig::default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub credentials: Option<CredentialsEnv>,
    /// Metric name -> report phrase.
    #[serde(default)]
    pub report: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SiteRef {
    Preset(String),
    Inline(Box<SiteProfile>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubunitEntry {
    pub name: String,
    #[serde(default)]
    pub topology: Topology,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderSettings {
    #[serde(default = "RenderSettings::default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "RenderSettings::default_user_agent")]
    pub user_agent: String,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout_secs(),
            user_agent: Self::default_user_agent(),
        }
    }
}

impl RenderSettings {
    fn default_timeout_secs() -> u64 {
        30
    }

    fn default_user_agent() -> String {
        format!("unitmetrics/{}", env!("CARGO_PKG_VERSION"))
    }
}

/// Names of the environment variables holding login credentials. The values
/// are passed through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsEnv {
    pub username_env: String,
    pub password_env: String,
}

impl RunConfig {
    fn default_concurrency() -> usize {
        1
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        let config: Self = from_yaml(&text)
            .with_context(|| format!("parse config: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.institution.trim().is_empty() {
            anyhow::bail!("institution must not be empty");
        }
        let mut seen = BTreeSet::new();
        for entry in &self.subunits {
            if entry.name.trim().is_empty() {
                anyhow::bail!("subunit names must not be empty");
            }
            if !seen.insert(entry.name.as_str()) {
                anyhow::bail!("duplicate subunit: {}", entry.name);
            }
        }
        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be at least 1");
        }
        if self.render.timeout_secs == 0 {
            anyhow::bail!("render.timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn site_profile(&self) -> anyhow::Result<SiteProfile> {
        match &self.site {
            SiteRef::Preset(name) => SiteProfile::preset(name)
                .ok_or_else(|| anyhow::anyhow!("unknown site preset: {name}")),
            SiteRef::Inline(profile) => Ok(profile.as_ref().clone()),
        }
    }

    pub fn credentials(&self) -> anyhow::Result<Credentials> {
        let env = self
            .credentials
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("site requires login but no credentials are configured"))?;
        let username = std::env::var(&env.username_env)
            .with_context(|| format!("read {}", env.username_env))?;
        let password = std::env::var(&env.password_env)
            .with_context(|| format!("read {}", env.password_env))?;
        Ok(Credentials { username, password })
    }
}

/// Parses YAML where enum variants are written as single-key maps
/// (`discover: <url>`, `parse: {token: 1}`) or bare unit names (`absent`).
pub fn from_yaml<T: DeserializeOwned>(text: &str) -> Result<T, serde_yaml::Error> {
    serde_yaml::with::singleton_map_recursive::deserialize(serde_yaml::Deserializer::from_str(text))
}
