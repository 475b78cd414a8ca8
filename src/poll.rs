use log::{debug, error};
use tokio::sync::{mpsc, watch};

use crate::discover::{Backend, BackendData};

/// Drives one source instance forever: sleep for the configured cadence,
/// fetch, and forward the snapshot only when it differs from the last one
/// this loop emitted. Fetch failures leave the previously emitted snapshot
/// untouched downstream.
pub struct PollLoop<B> {
    backend: B,
    tx: mpsc::Sender<BackendData>,
    shutdown: watch::Receiver<bool>,
}

impl<B: Backend> PollLoop<B> {
    pub fn new(backend: B, tx: mpsc::Sender<BackendData>, shutdown: watch::Receiver<bool>) -> Self {
        PollLoop {
            backend,
            tx,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut last_emitted: Option<BackendData> = None;

        loop {
            debug!(
                "[{}/{}] sleeping for {:?}",
                self.backend.name(),
                self.backend.id(),
                self.backend.refresh_interval()
            );
            tokio::select! {
                _ = tokio::time::sleep(self.backend.refresh_interval()) => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        return;
                    }
                    continue;
                }
            }

            let jobs = match self.backend.poll().await {
                Ok(jobs) => jobs,
                Err(err) => {
                    error!(
                        "[{}/{}] failed to retrieve targets: {}",
                        self.backend.name(),
                        self.backend.id(),
                        err
                    );
                    continue;
                }
            };

            let data = BackendData {
                backend: self.backend.name(),
                id: self.backend.id().to_string(),
                jobs,
            };
            if last_emitted.as_ref() == Some(&data) {
                continue;
            }

            // The aggregator going away means shutdown.
            if self.tx.send(data.clone()).await.is_err() {
                return;
            }
            last_emitted = Some(data);
        }
    }
}
