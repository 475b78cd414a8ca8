use std::time::Duration;

use async_trait::async_trait;

use crate::discover::{is_valid_label_name, Backend, JobConfig};
use crate::error::{ConfigError, FetchError};

/// The source never changes at runtime, so the cadence is a long fixed
/// interval; the loop exists for uniformity with the polling protocol.
const REFRESH_INTERVAL: u64 = 1000;

/// Wraps one operator-declared job verbatim.
#[derive(Debug)]
pub struct StaticTargets {
    job: JobConfig,
}

impl StaticTargets {
    pub fn new(mut job: JobConfig) -> Result<Self, ConfigError> {
        if job.job_name.is_empty() {
            return Err(ConfigError::MissingField("job_name"));
        }
        if let Some(auth) = &job.basic_auth {
            if auth.username.is_empty() {
                return Err(ConfigError::MissingField("basic_auth.username"));
            }
            if auth.password.is_empty() {
                return Err(ConfigError::MissingField("basic_auth.password"));
            }
        }
        for static_config in &job.static_configs {
            if static_config.targets.iter().any(String::is_empty) {
                return Err(ConfigError::MissingField("static_configs.targets"));
            }
            for key in static_config.labels.keys() {
                if !is_valid_label_name(key) {
                    return Err(ConfigError::InvalidLabelName(key.clone()));
                }
            }
        }

        if job.metrics_path.is_empty() {
            job.metrics_path = "/metrics".to_string();
        }
        if job.scheme.is_empty() {
            job.scheme = "http".to_string();
        }

        Ok(StaticTargets { job })
    }
}

#[async_trait]
impl Backend for StaticTargets {
    fn name(&self) -> &'static str {
        "static"
    }

    fn id(&self) -> &str {
        &self.job.job_name
    }

    fn refresh_interval(&self) -> Duration {
        Duration::from_secs(REFRESH_INTERVAL)
    }

    async fn poll(&self) -> Result<Vec<JobConfig>, FetchError> {
        Ok(vec![self.job.clone()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discover::{BasicAuth, StaticConfig};

    fn job() -> JobConfig {
        JobConfig {
            job_name: "pushgateway".to_string(),
            static_configs: vec![StaticConfig {
                targets: vec!["pushgateway.example.com:9091".to_string()],
                labels: Default::default(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn defaults_applied_at_initialization() {
        let backend = StaticTargets::new(job()).unwrap();
        assert_eq!(backend.job.metrics_path, "/metrics");
        assert_eq!(backend.job.scheme, "http");
        assert_eq!(backend.id(), "pushgateway");
    }

    #[test]
    fn declared_values_are_kept() {
        let backend = StaticTargets::new(JobConfig {
            metrics_path: "/probe".to_string(),
            scheme: "https".to_string(),
            ..job()
        })
        .unwrap();
        assert_eq!(backend.job.metrics_path, "/probe");
        assert_eq!(backend.job.scheme, "https");
    }

    #[test]
    fn job_name_is_required() {
        let err = StaticTargets::new(JobConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("job_name")));
    }

    #[test]
    fn incomplete_basic_auth_is_rejected() {
        let err = StaticTargets::new(JobConfig {
            basic_auth: Some(BasicAuth {
                username: "admin".to_string(),
                password: String::new(),
            }),
            ..job()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("basic_auth.password")));
    }

    #[test]
    fn invalid_label_key_is_rejected() {
        let mut declared = job();
        declared.static_configs[0]
            .labels
            .insert("bad-key".to_string(), "v".to_string());
        let err = StaticTargets::new(declared).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLabelName(k) if k == "bad-key"));
    }

    #[tokio::test]
    async fn poll_returns_the_declared_job_unchanged() {
        let backend = StaticTargets::new(job()).unwrap();
        let first = backend.poll().await.unwrap();
        let second = backend.poll().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].job_name, "pushgateway");
    }
}
