use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::config::PuppetDbConfig;
use crate::discover::{sanitize_label_name, Backend, JobConfig, StaticConfig};
use crate::error::{ConfigError, FetchError};

const DEFAULT_REFRESH_INTERVAL: u64 = 5;
const DEFAULT_TIMEOUT: u64 = 30;

/// Discovers exporters registered in PuppetDB. One query returns the nodes
/// and their exporter facts; every exporter entry across every node ends up
/// in a single job named after the instance.
#[derive(Debug)]
pub struct PuppetDb {
    name: String,
    url: String,
    query: String,
    refresh_interval: Duration,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Node {
    #[serde(default)]
    pub(crate) certname: String,
    /// Exporter name -> instances of that exporter on the node.
    #[serde(rename = "value", default)]
    pub(crate) exporters: HashMap<String, Vec<Exporter>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Exporter {
    pub(crate) url: String,
    #[serde(default)]
    pub(crate) labels: BTreeMap<String, String>,
}

impl PuppetDb {
    pub fn new(cfg: PuppetDbConfig) -> Result<Self, ConfigError> {
        if cfg.name.is_empty() {
            return Err(ConfigError::MissingField("name"));
        }
        if cfg.url.is_empty() {
            return Err(ConfigError::MissingField("url"));
        }
        if cfg.query.is_empty() {
            return Err(ConfigError::MissingField("query"));
        }

        let parsed = Url::parse(&cfg.url)
            .map_err(|_| ConfigError::InvalidScheme(cfg.url.clone()))?;
        let scheme = parsed.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(ConfigError::InvalidScheme(scheme.to_string()));
        }

        let timeout = cfg.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(timeout));

        if scheme == "https" {
            let certfile = cfg.certfile.ok_or(ConfigError::MissingField("certfile"))?;
            let keyfile = cfg.keyfile.ok_or(ConfigError::MissingField("keyfile"))?;
            let cacert = cfg.cacert.ok_or(ConfigError::MissingField("cacert"))?;

            let cert = std::fs::read(&certfile).map_err(ConfigError::Tls)?;
            let key = std::fs::read(&keyfile).map_err(ConfigError::Tls)?;
            let ca = std::fs::read(&cacert).map_err(ConfigError::Tls)?;

            let identity = reqwest::Identity::from_pkcs8_pem(&cert, &key)?;
            let ca = reqwest::Certificate::from_pem(&ca)?;
            builder = builder
                .identity(identity)
                .add_root_certificate(ca)
                .danger_accept_invalid_certs(cfg.ssl_skip_verify);
        }

        Ok(PuppetDb {
            name: cfg.name,
            url: cfg.url.trim_end_matches('/').to_string(),
            query: cfg.query,
            refresh_interval: Duration::from_secs(
                cfg.refresh_interval.unwrap_or(DEFAULT_REFRESH_INTERVAL),
            ),
            client: builder.build()?,
        })
    }

    async fn nodes(&self) -> Result<Vec<Node>, FetchError> {
        let endpoint = format!("{}/pdb/query/v4", self.url);
        let nodes = self
            .client
            .post(&endpoint)
            .json(&serde_json::json!({ "query": self.query }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(nodes)
    }

    /// Flattens the exporter facts of every node into static target groups.
    fn static_configs(&self, nodes: &[Node]) -> Result<Vec<StaticConfig>, FetchError> {
        let mut configs = Vec::new();

        for node in nodes {
            for (job_name, exporters) in &node.exporters {
                for exporter in exporters {
                    let url = Url::parse(&exporter.url).map_err(|err| {
                        FetchError::Malformed(format!(
                            "invalid exporter url `{}`: {}",
                            exporter.url, err
                        ))
                    })?;
                    let host = url.host_str().ok_or_else(|| {
                        FetchError::Malformed(format!(
                            "exporter url `{}` has no host",
                            exporter.url
                        ))
                    })?;
                    let target = match url.port() {
                        Some(port) => format!("{}:{}", host, port),
                        None => host.to_string(),
                    };

                    let mut labels = BTreeMap::new();
                    labels.insert("certname".to_string(), node.certname.clone());
                    labels.insert("metrics_path".to_string(), url.path().to_string());
                    labels.insert("job".to_string(), job_name.clone());
                    labels.insert("scheme".to_string(), url.scheme().to_string());

                    // First value wins for repeated query parameters; each
                    // parameter doubles as a scrape param and a plain label.
                    let mut params: BTreeMap<String, String> = BTreeMap::new();
                    for (key, value) in url.query_pairs() {
                        params
                            .entry(sanitize_label_name(&key))
                            .or_insert_with(|| value.to_string());
                    }
                    for (key, value) in params {
                        labels.insert(format!("__param_{}", key), value.clone());
                        labels.insert(key, value);
                    }

                    // Explicit exporter labels are applied last and win.
                    for (key, value) in &exporter.labels {
                        labels.insert(sanitize_label_name(key), value.clone());
                    }

                    configs.push(StaticConfig {
                        targets: vec![target],
                        labels,
                    });
                }
            }
        }
        Ok(configs)
    }
}

#[async_trait]
impl Backend for PuppetDb {
    fn name(&self) -> &'static str {
        "puppetdb"
    }

    fn id(&self) -> &str {
        &self.name
    }

    fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    async fn poll(&self) -> Result<Vec<JobConfig>, FetchError> {
        let nodes = self.nodes().await?;
        let static_configs = self.static_configs(&nodes)?;
        Ok(vec![JobConfig {
            job_name: self.name.clone(),
            honor_labels: true,
            metrics_path: "/metrics".to_string(),
            scheme: "http".to_string(),
            basic_auth: None,
            tls_config: None,
            static_configs,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> PuppetDb {
        PuppetDb::new(PuppetDbConfig {
            name: "puppet-prod".to_string(),
            url: "http://puppetdb.example.com:8080".to_string(),
            query: "inventory[certname, facts.exporters] {}".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    fn node(certname: &str, exporters: serde_json::Value) -> Node {
        serde_json::from_value(serde_json::json!({
            "certname": certname,
            "value": exporters,
        }))
        .unwrap()
    }

    #[test]
    fn initialization_validates_required_fields() {
        let err = PuppetDb::new(PuppetDbConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("name")));

        let err = PuppetDb::new(PuppetDbConfig {
            name: "p".to_string(),
            url: "http://puppetdb:8080".to_string(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("query")));
    }

    #[test]
    fn https_requires_tls_material() {
        let err = PuppetDb::new(PuppetDbConfig {
            name: "p".to_string(),
            url: "https://puppetdb:8081".to_string(),
            query: "nodes {}".to_string(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("certfile")));
    }

    #[test]
    fn rejects_non_http_scheme() {
        let err = PuppetDb::new(PuppetDbConfig {
            name: "p".to_string(),
            url: "ftp://puppetdb:8080".to_string(),
            query: "nodes {}".to_string(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidScheme(s) if s == "ftp"));
    }

    #[test]
    fn node_exporter_scenario() {
        let pdb = backend();
        let nodes = vec![node(
            "node-1",
            serde_json::json!({
                "node_exporter": [
                    {"url": "http://10.0.0.5:9100/metrics?collect=cpu", "labels": {"env": "prod"}}
                ]
            }),
        )];
        let configs = pdb.static_configs(&nodes).unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].targets, vec!["10.0.0.5:9100".to_string()]);

        let labels = &configs[0].labels;
        let expect = [
            ("certname", "node-1"),
            ("metrics_path", "/metrics"),
            ("job", "node_exporter"),
            ("scheme", "http"),
            ("__param_collect", "cpu"),
            ("collect", "cpu"),
            ("env", "prod"),
        ];
        assert_eq!(labels.len(), expect.len());
        for (key, value) in expect {
            assert_eq!(labels.get(key).map(String::as_str), Some(value), "{}", key);
        }
    }

    #[test]
    fn one_job_per_instance_shape() {
        let pdb = backend();
        let nodes = vec![
            node(
                "node-1",
                serde_json::json!({"node_exporter": [{"url": "http://10.0.0.5:9100/metrics"}]}),
            ),
            node(
                "node-2",
                serde_json::json!({"mysqld_exporter": [{"url": "http://10.0.0.6:9104/metrics"}]}),
            ),
        ];
        let configs = pdb.static_configs(&nodes).unwrap();
        assert_eq!(configs.len(), 2);
    }

    #[test]
    fn explicit_labels_take_precedence() {
        let pdb = backend();
        let nodes = vec![node(
            "node-1",
            serde_json::json!({
                "node_exporter": [
                    {"url": "http://10.0.0.5:9100/metrics", "labels": {"scheme": "https", "team": "db"}}
                ]
            }),
        )];
        let configs = pdb.static_configs(&nodes).unwrap();
        let labels = &configs[0].labels;
        assert_eq!(labels.get("scheme").map(String::as_str), Some("https"));
        assert_eq!(labels.get("team").map(String::as_str), Some("db"));
    }

    #[test]
    fn repeated_query_parameter_keeps_first_value() {
        let pdb = backend();
        let nodes = vec![node(
            "node-1",
            serde_json::json!({
                "node_exporter": [
                    {"url": "http://10.0.0.5:9100/metrics?collect=cpu&collect=mem"}
                ]
            }),
        )];
        let configs = pdb.static_configs(&nodes).unwrap();
        let labels = &configs[0].labels;
        assert_eq!(labels.get("__param_collect").map(String::as_str), Some("cpu"));
        assert_eq!(labels.get("collect").map(String::as_str), Some("cpu"));
    }

    #[test]
    fn malformed_exporter_url_fails_the_poll() {
        let pdb = backend();
        let nodes = vec![node(
            "node-1",
            serde_json::json!({"node_exporter": [{"url": "not a url"}]}),
        )];
        let err = pdb.static_configs(&nodes).unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
    }
}
