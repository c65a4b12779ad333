use std::future::Future;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::Error;
use crate::Result;

/// WorkerGroup tracks the workers of one stage. Waiting on the group returns once every worker
/// has exited, which is the completion signal of the stage.
pub(crate) struct WorkerGroup {
    stage: &'static str,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    pub(crate) fn new(stage: &'static str) -> Self {
        Self {
            stage,
            handles: Vec::new(),
        }
    }

    pub(crate) fn spawn<F>(&mut self, worker: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handles.push(tokio::spawn(worker));
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    /// Waits for all the workers. A panicked worker does not stop the wait for the others, the
    /// first failure is returned after all of them are done.
    pub(crate) async fn wait(self) -> Result<()> {
        let workers = self.handles.len();
        let mut result = Ok(());
        for joined in join_all(self.handles).await {
            if let Err(e) = joined {
                error!(stage = self.stage, ?e, "Worker failed");
                if result.is_ok() {
                    result = Err(Error::Worker(format!("{} worker failed: {e}", self.stage)));
                }
            }
        }
        info!(stage = self.stage, workers, "All workers completed");
        result
    }
}
