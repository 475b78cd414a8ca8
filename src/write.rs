use std::fs;
use std::path::PathBuf;

use log::debug;

use crate::config::OutputConfig;
use crate::error::{ConfigError, SinkError};

/// Destination for the serialized target document. Every call publishes the
/// whole document or reports an error; a reader must never see a partial one.
pub trait Sink: Send {
    fn publish(&self, document: &str) -> Result<(), SinkError>;
}

pub fn from_config(cfg: &OutputConfig) -> Result<Box<dyn Sink>, ConfigError> {
    match cfg.kind.as_str() {
        "stdout" => Ok(Box::new(StdoutSink)),
        "file" => {
            let path = cfg
                .path
                .as_deref()
                .ok_or(ConfigError::MissingField("config.output.path"))?;
            Ok(Box::new(FileSink::new(path)))
        }
        other => Err(ConfigError::UnknownOutput(other.to_string())),
    }
}

pub struct StdoutSink;

impl Sink for StdoutSink {
    fn publish(&self, document: &str) -> Result<(), SinkError> {
        debug!("{}", document);
        Ok(())
    }
}

/// Overwrites the configured path on every publish, creating parent
/// directories as needed. The document lands in a sibling temp file first
/// and is renamed into place so the collector never reads a torn write.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSink { path: path.into() }
    }
}

impl Sink for FileSink {
    fn publish(&self, document: &str) -> Result<(), SinkError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, document)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
