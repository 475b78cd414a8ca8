use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use log::error;
use serde::Deserialize;

use crate::config::CattleConfig;
use crate::discover::{Backend, BasicAuth, JobConfig, StaticConfig};
use crate::error::{ConfigError, FetchError};

const FQDN_KEY: &str = "PROMETHEUS_FQDN";
const PORT_KEY: &str = "PROMETHEUS_PORT";
const USERNAME_KEY: &str = "PROMETHEUS_USERNAME";
const PASSWORD_KEY: &str = "PROMETHEUS_PASSWORD";
const SCHEME_KEY: &str = "PROMETHEUS_SCHEME";

const DEFAULT_PORT: &str = "9443";
const DEFAULT_SCHEME: &str = "https";
const DEFAULT_REFRESH_INTERVAL: u64 = 5;
const DEFAULT_TIMEOUT: u64 = 30;

/// Discovers Prometheus servers advertised through stack metadata in a
/// Rancher/Cattle environment. Only stacks carrying `PROMETHEUS_FQDN` in
/// their environment qualify as targets.
#[derive(Debug)]
pub struct Cattle {
    name: String,
    endpoint: String,
    access_key: String,
    secret_key: String,
    refresh_interval: Duration,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct Collection<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Stack {
    #[serde(default)]
    pub(crate) account_id: String,
    /// Stack metadata; values are free-form, strings and numbers both occur.
    #[serde(default)]
    pub(crate) environment: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Project {
    #[serde(default)]
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) name: String,
}

/// One qualifying stack, reduced to the fields the job needs.
#[derive(Debug)]
struct PrometheusServer {
    name: String,
    host: String,
    port: String,
    username: Option<String>,
    password: Option<String>,
    scheme: String,
}

impl Cattle {
    pub fn new(cfg: CattleConfig) -> Result<Self, ConfigError> {
        if cfg.endpoint.is_empty() {
            return Err(ConfigError::MissingField("endpoint"));
        }
        if cfg.name.is_empty() {
            return Err(ConfigError::MissingField("name"));
        }
        if cfg.access_key.is_empty() {
            return Err(ConfigError::MissingField("access_key"));
        }
        if cfg.secret_key.is_empty() {
            return Err(ConfigError::MissingField("secret_key"));
        }

        let timeout = cfg.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()?;

        Ok(Cattle {
            name: cfg.name,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            access_key: cfg.access_key,
            secret_key: cfg.secret_key,
            refresh_interval: Duration::from_secs(
                cfg.refresh_interval.unwrap_or(DEFAULT_REFRESH_INTERVAL),
            ),
            client,
        })
    }

    async fn stacks(&self) -> Result<Vec<Stack>, FetchError> {
        let url = format!("{}/stacks?all=true&limit=-2", self.endpoint);
        let collection: Collection<Stack> = self
            .client
            .get(&url)
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(collection.data)
    }

    async fn project(&self, id: &str) -> Result<Project, FetchError> {
        let url = format!("{}/projects/{}", self.endpoint, id);
        let project = self
            .client
            .get(&url)
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(project)
    }

    async fn get_targets(&self) -> Result<Vec<PrometheusServer>, FetchError> {
        let stacks = self.stacks().await?;
        let mut targets = Vec::new();

        for stack in stacks {
            if env_value(&stack, FQDN_KEY).is_none() {
                continue;
            }
            // A project lookup failure drops this stack only.
            let project = match self.project(&stack.account_id).await {
                Ok(project) => project,
                Err(err) => {
                    error!(
                        "[cattle/{}] failed to retrieve project `{}`: {}",
                        self.name, stack.account_id, err
                    );
                    continue;
                }
            };
            if let Some(server) = self.server_from_stack(&stack, &project) {
                targets.push(server);
            }
        }
        Ok(targets)
    }

    /// Shapes one qualifying stack into a server entry. The job name is
    /// derived from the owning project rather than the stack so that names
    /// stay unique across projects.
    fn server_from_stack(&self, stack: &Stack, project: &Project) -> Option<PrometheusServer> {
        let host = env_value(stack, FQDN_KEY)?;
        Some(PrometheusServer {
            name: format!("{}_{}_{}", self.name, project.name, project.id),
            host,
            port: env_value(stack, PORT_KEY).unwrap_or_else(|| DEFAULT_PORT.to_string()),
            username: env_value(stack, USERNAME_KEY),
            password: env_value(stack, PASSWORD_KEY),
            scheme: env_value(stack, SCHEME_KEY).unwrap_or_else(|| DEFAULT_SCHEME.to_string()),
        })
    }

    fn format_targets(&self, targets: Vec<PrometheusServer>) -> Vec<JobConfig> {
        let mut jobs = Vec::with_capacity(targets.len());

        for target in targets {
            // Both credentials must be set and non-empty for auth to be emitted.
            let basic_auth = match (target.username, target.password) {
                (Some(username), Some(password))
                    if !username.is_empty() && !password.is_empty() =>
                {
                    Some(BasicAuth { username, password })
                }
                _ => None,
            };
            let mut labels = std::collections::BTreeMap::new();
            labels.insert("rancher_url".to_string(), self.endpoint.clone());
            labels.insert("rancher_site".to_string(), self.name.clone());

            jobs.push(JobConfig {
                job_name: target.name,
                honor_labels: true,
                metrics_path: "/federate".to_string(),
                scheme: target.scheme,
                basic_auth,
                tls_config: None,
                static_configs: vec![StaticConfig {
                    targets: vec![format!("{}:{}", target.host, target.port)],
                    labels,
                }],
            });
        }
        jobs
    }
}

fn env_value(stack: &Stack, key: &str) -> Option<String> {
    match stack.environment.get(key)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl Backend for Cattle {
    fn name(&self) -> &'static str {
        "cattle"
    }

    fn id(&self) -> &str {
        &self.name
    }

    fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    async fn poll(&self) -> Result<Vec<JobConfig>, FetchError> {
        let targets = self.get_targets().await?;
        Ok(self.format_targets(targets))
    }
}
