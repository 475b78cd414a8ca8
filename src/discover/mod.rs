use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

pub mod cattle;
pub mod puppetdb;
pub mod static_targets;

/// One static target group inside a scrape job: a set of `host:port`
/// addresses sharing a label set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticConfig {
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// A Prometheus scrape job, in the shape the file_sd document uses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub job_name: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub honor_labels: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub metrics_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scheme: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_config: Option<BTreeMap<String, serde_yaml::Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub static_configs: Vec<StaticConfig>,
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// The materialized output of one poll of one source instance.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendData {
    pub backend: &'static str,
    pub id: String,
    pub jobs: Vec<JobConfig>,
}

impl BackendData {
    /// Key of this instance inside the aggregate document. The backend tag
    /// disambiguates instances of different types carrying the same name.
    pub fn key(&self) -> String {
        format!("{}_{}", self.backend, self.id)
    }
}

/// Capability shared by every source variant: identity, cadence, and one
/// fetch-and-transform cycle against the backing system.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Backend type tag, e.g. `"cattle"`.
    fn name(&self) -> &'static str;

    /// Configured instance identity.
    fn id(&self) -> &str;

    /// How long the poll loop sleeps between fetches.
    fn refresh_interval(&self) -> Duration;

    async fn poll(&self) -> Result<Vec<JobConfig>, FetchError>;
}

/// Closed set of source variants. Construction happens in `main` from the
/// matching config section; everything downstream dispatches through
/// [`Backend`] and never inspects the tag again.
pub enum Discovery {
    Cattle(cattle::Cattle),
    PuppetDb(puppetdb::PuppetDb),
    Static(static_targets::StaticTargets),
}

#[async_trait]
impl Backend for Discovery {
    fn name(&self) -> &'static str {
        match self {
            Discovery::Cattle(b) => b.name(),
            Discovery::PuppetDb(b) => b.name(),
            Discovery::Static(b) => b.name(),
        }
    }

    fn id(&self) -> &str {
        match self {
            Discovery::Cattle(b) => b.id(),
            Discovery::PuppetDb(b) => b.id(),
            Discovery::Static(b) => b.id(),
        }
    }

    fn refresh_interval(&self) -> Duration {
        match self {
            Discovery::Cattle(b) => b.refresh_interval(),
            Discovery::PuppetDb(b) => b.refresh_interval(),
            Discovery::Static(b) => b.refresh_interval(),
        }
    }

    async fn poll(&self) -> Result<Vec<JobConfig>, FetchError> {
        match self {
            Discovery::Cattle(b) => b.poll().await,
            Discovery::PuppetDb(b) => b.poll().await,
            Discovery::Static(b) => b.poll().await,
        }
    }
}

/// Replaces every character outside `[a-zA-Z0-9_]` with an underscore and
/// prefixes one if the name would start with a digit.
pub fn sanitize_label_name(name: &str) -> String {
    let invalid_label_char_re = Regex::new(r"[^a-zA-Z0-9_]").unwrap();
    let name = invalid_label_char_re.replace_all(name, "_").to_string();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{}", name)
    } else {
        name
    }
}

pub fn is_valid_label_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
