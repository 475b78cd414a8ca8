use std::collections::BTreeMap;

use log::error;
use tokio::sync::mpsc;

use crate::discover::{BackendData, JobConfig};
use crate::error::SinkError;
use crate::write::Sink;

/// Sole consumer of the poll loops. Owns the per-instance snapshot map
/// outright; updates arrive one at a time over the channel, so no locking is
/// involved. A key, once written, is never removed — an instance that goes
/// silent keeps serving its last known-good snapshot.
pub struct Aggregator {
    rx: mpsc::Receiver<BackendData>,
    exported: BTreeMap<String, Vec<JobConfig>>,
    sink: Box<dyn Sink>,
}

impl Aggregator {
    pub fn new(rx: mpsc::Receiver<BackendData>, sink: Box<dyn Sink>) -> Self {
        Aggregator {
            rx,
            exported: BTreeMap::new(),
            sink,
        }
    }

    /// Runs until every poll loop has dropped its sender.
    pub async fn run(mut self) {
        while let Some(data) = self.rx.recv().await {
            self.apply(data);
            if let Err(err) = self.publish() {
                error!("failed to write output: {}", err);
            }
        }
    }

    fn apply(&mut self, data: BackendData) {
        let key = data.key();
        self.exported.insert(key, data.jobs);
    }

    /// Flattens the sorted instance map into one document. Instance keys are
    /// sorted, so the output is stable across runs.
    fn document(&self) -> Vec<JobConfig> {
        self.exported.values().flatten().cloned().collect()
    }

    fn publish(&self) -> Result<(), SinkError> {
        let body = serde_yaml::to_string(&self.document())?;
        self.sink.publish(&body)
    }
}
