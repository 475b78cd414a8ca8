use serde::Deserialize;

use crate::discover::JobConfig;
use crate::error::ConfigError;

/// Top-level configuration document, loaded once at startup. Live reload is
/// out of scope; a restart picks up changes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub config: GlobalConfig,
    #[serde(default)]
    pub backends: Backends,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(rename = "type", default = "default_output_type")]
    pub kind: String,
    #[serde(default)]
    pub path: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            kind: default_output_type(),
            path: None,
        }
    }
}

fn default_output_type() -> String {
    "stdout".to_string()
}

/// Instance lists, one per source type. A missing section is an empty list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Backends {
    #[serde(default)]
    pub cattle: Vec<CattleConfig>,
    #[serde(default)]
    pub puppetdb: Vec<PuppetDbConfig>,
    #[serde(rename = "static", default)]
    pub static_jobs: Vec<JobConfig>,
}

impl Backends {
    pub fn is_empty(&self) -> bool {
        self.cattle.is_empty() && self.puppetdb.is_empty() && self.static_jobs.is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CattleConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    /// Seconds; defaults to 30.
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Seconds; defaults to 5.
    #[serde(default)]
    pub refresh_interval: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PuppetDbConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    /// PQL query selecting the nodes and their exporter facts.
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub certfile: Option<String>,
    #[serde(default)]
    pub keyfile: Option<String>,
    #[serde(default)]
    pub cacert: Option<String>,
    #[serde(default)]
    pub ssl_skip_verify: bool,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub refresh_interval: Option<u64>,
}

pub fn load(raw: &str) -> Result<Settings, ConfigError> {
    Ok(serde_yaml::from_str(raw)?)
}
