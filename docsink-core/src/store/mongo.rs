use std::time::Duration;

use mongodb::bson::doc;
use mongodb::options::{
    ClientOptions, Credential, ReadPreference, SelectionCriteria, ServerAddress,
};
use mongodb::{Client, Collection, Database};
use tracing::{debug, info};

use super::{CollectionHandle, Store, is_valid_name};
use crate::Error;
use crate::Result;
use crate::config::MongoConfig;
use crate::message::Document;

/// Upper bound for reaching the deployment, used for connecting, server selection and the ping.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const APP_NAME: &str = "docsink";

/// MongoStore writes every stream into a collection of one database. Creating the store does not
/// connect, the driver connects on the first operation.
#[derive(Debug, Clone)]
pub struct MongoStore {
    client: Client,
    database: Database,
}

impl MongoStore {
    pub fn new(config: &MongoConfig, db_name: &str) -> Result<Self> {
        Self::with_timeout(config, db_name, CONNECT_TIMEOUT)
    }

    pub(crate) fn with_timeout(
        config: &MongoConfig,
        db_name: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let mut options = ClientOptions::builder()
            .hosts(vec![ServerAddress::Tcp {
                host: config.host.clone(),
                port: Some(config.port),
            }])
            .app_name(APP_NAME.to_string())
            .connect_timeout(timeout)
            .server_selection_timeout(timeout)
            .build();
        if let Some(user) = &config.user {
            options.credential = Some(
                Credential::builder()
                    .username(user.clone())
                    .password(config.password.clone())
                    .build(),
            );
        }

        let client = Client::with_options(options)
            .map_err(|e| Error::Config(format!("invalid mongo settings: {e}")))?;
        let database = client.database(db_name);
        Ok(Self { client, database })
    }

    pub fn database_name(&self) -> &str {
        self.database.name()
    }

    fn documents(&self, collection: &CollectionHandle) -> Collection<Document> {
        self.database.collection(collection.name())
    }
}

impl Store for MongoStore {
    async fn ping(&self) -> Result<()> {
        let ping = async {
            self.database
                .run_command(doc! { "ping": 1 })
                .selection_criteria(SelectionCriteria::ReadPreference(ReadPreference::Primary))
                .await
        };
        match tokio::time::timeout(CONNECT_TIMEOUT, ping).await {
            Ok(Ok(_)) => {
                debug!(database = self.database.name(), "Mongo ping succeeded");
                Ok(())
            }
            Ok(Err(e)) => Err(Error::Store(format!("mongo ping failed: {e}"))),
            Err(_) => Err(Error::Store(format!(
                "mongo ping timed out after {CONNECT_TIMEOUT:?}"
            ))),
        }
    }

    async fn collection(&self, name: &str) -> Result<CollectionHandle> {
        if !is_valid_name(name) || name.contains('$') || name.starts_with("system.") {
            return Err(Error::Store(format!("invalid collection name {name:?}")));
        }
        Ok(CollectionHandle::new(name))
    }

    async fn reset(&self, collection: &CollectionHandle) -> Result<()> {
        self.documents(collection)
            .drop()
            .await
            .map_err(|e| Error::Store(format!("failed to drop collection {collection}: {e}")))?;
        info!(database = self.database.name(), %collection, "Dropped collection");
        Ok(())
    }

    async fn insert_many(
        &self,
        collection: &CollectionHandle,
        documents: Vec<Document>,
    ) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let count = documents.len();
        let result = self
            .documents(collection)
            .insert_many(documents)
            .await
            .map_err(|e| {
                Error::Store(format!(
                    "failed to insert {count} documents into {collection}: {e}"
                ))
            })?;
        debug!(%collection, inserted = result.inserted_ids.len(), "Inserted documents");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.client.clone().shutdown().await;
        Ok(())
    }
}
