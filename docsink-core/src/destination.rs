//! The destination runs the two stage pipeline for one sync.
//!
//! ```text
//! (records) --[c]--> (marshal workers) --[c]--> (sink workers) --> (store)
//!                          |                          |
//!                          +--------> [errors] <------+
//!
//! [c] - channel
//! ```
//!
//! Shutdown is sequenced stage by stage. The host closes the record queue, every marshal worker
//! drains it and exits, only then is the document queue closed. Closing it earlier could leave a
//! marshal worker sending into a closed queue. The sink workers then drain the document queue, the
//! last one to exit does the final flush, and the error sink is closed once nothing can report
//! anymore. A worker that panics stops its stage and the write fails with a worker error.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::Error;
use crate::Result;
use crate::config::catalog::ConfiguredCatalog;
use crate::config::{DestinationConfig, RunConfig};
use crate::marshaler::Marshaler;
use crate::normalizer::{Normalize, Normalizer};
use crate::queue::{ErrorSink, QUEUE_CAPACITY, RecordReceiver};
use crate::sinker::Sinker;
use crate::store::{Store, StoreBackend};

/// Pings the store, a failure means the destination cannot be used at all.
pub async fn check_store<S>(store: &S) -> Result<()>
where
    S: Store + Sync,
{
    store
        .ping()
        .await
        .map_err(|e| Error::Connection(format!("store is not reachable: {e}")))
}

/// Destination writes the records of a sync into a store.
#[derive(Debug)]
pub struct Destination<S = StoreBackend> {
    store: Arc<S>,
    config: RunConfig,
}

impl Destination<StoreBackend> {
    /// Builds the destination and its store from the user configuration and the catalog.
    pub fn from_config(config: &DestinationConfig, catalog: &ConfiguredCatalog) -> Result<Self> {
        let run_config = RunConfig::new(config, catalog)?;
        Self::new(StoreBackend::from_config(config)?, run_config)
    }
}

impl<S> Destination<S>
where
    S: Store + Sync + 'static,
{
    pub fn new(store: S, config: RunConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store: Arc::new(store),
            config,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Verifies the store can be reached.
    pub async fn check(&self) -> Result<()> {
        check_store(self.store.as_ref()).await
    }

    /// Releases the connection to the store, the destination is not usable afterwards.
    pub async fn close(&self) {
        if let Err(e) = self.store.close().await {
            warn!(%e, "Failed to close the store");
        }
    }

    /// Runs the pipeline until the record queue is closed and everything has been flushed.
    ///
    /// Non-fatal errors go to `errors`, fatal ones are returned. The error sink is closed when
    /// this returns, whatever the outcome.
    pub async fn write(&self, records: RecordReceiver, errors: ErrorSink) -> Result<()> {
        let normalizer = Arc::new(Normalizer::new(
            self.config.mode,
            &self.config.fields_per_stream,
        ));
        self.write_with(normalizer, records, errors).await
    }

    pub(crate) async fn write_with<N>(
        &self,
        normalizer: Arc<N>,
        records: RecordReceiver,
        errors: ErrorSink,
    ) -> Result<()>
    where
        N: Normalize + Send + Sync + 'static,
    {
        let result = self.run(normalizer, records, &errors).await;
        errors.close();
        if let Err(e) = &result {
            error!(%e, "Write failed");
        }
        result
    }

    async fn run<N>(
        &self,
        normalizer: Arc<N>,
        records: RecordReceiver,
        errors: &ErrorSink,
    ) -> Result<()>
    where
        N: Normalize + Send + Sync + 'static,
    {
        self.check().await?;

        info!(
            mode = %self.config.mode,
            batch_size = self.config.batch_size,
            marshal_workers = self.config.marshal_workers,
            sink_workers = self.config.sink_workers,
            "Starting write"
        );

        let (doc_tx, doc_rx) = async_channel::bounded(QUEUE_CAPACITY);

        let mut marshaler = Marshaler::new(normalizer, records, doc_tx.clone(), errors.clone());
        let mut sinker = Sinker::new(
            Arc::clone(&self.store),
            self.config.batch_size,
            doc_rx,
            errors.clone(),
        );

        for _ in 0..self.config.marshal_workers {
            marshaler.add_worker();
        }
        for _ in 0..self.config.sink_workers {
            sinker.add_worker().await;
        }

        // a panicked sink worker closes the document queue, so this returns even when the sink
        // stage is gone
        let marshal_result = marshaler.wait().await;
        doc_tx.close();
        let sink_result = sinker.wait().await;

        marshal_result.and(sink_result)?;
        info!("Write completed");
        Ok(())
    }
}
