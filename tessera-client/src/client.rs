use std::sync::Arc;

use tessera_core::ontology::OntologyCatalog;
use tessera_core::transport::{ChannelFactory, TimeWindow};

use crate::config::WriterConfig;
use crate::connection_pool::ConnectionPool;
use crate::errors::{Result, TesseraError};
use crate::executor_pool::ExecutorPool;
use crate::sequence_reader::SequenceDataStreamer;
use crate::sequence_writer::SequenceWriter;
use crate::topic_handler::TopicHandler;

/// The main client for interacting with the Tessera platform.
///
/// Owns the shared resource pools — reusable remote channels and background
/// flush workers — and hands them out to the writers, handlers and
/// streamers it creates. Cloning is cheap; clones share the pools.
#[derive(Debug, Clone)]
pub struct TesseraClient {
    cnx_pool: Arc<ConnectionPool>,
    executor_pool: Arc<ExecutorPool>,
    catalog: OntologyCatalog,
}

impl TesseraClient {
    /// Initializes a new [`TesseraClientBuilder`].
    pub fn builder() -> TesseraClientBuilder {
        TesseraClientBuilder::default()
    }

    /// The ontology catalog this client decodes read-side payloads with.
    pub fn catalog(&self) -> &OntologyCatalog {
        &self.catalog
    }

    /// Creates a new sequence on the server and returns the writer
    /// controlling its Create → Write → Finalize/Abort lifecycle.
    pub async fn sequence_create(
        &self,
        sequence_name: impl Into<String>,
        user_metadata: serde_json::Value,
        config: WriterConfig,
    ) -> Result<SequenceWriter> {
        SequenceWriter::create(
            self.cnx_pool.clone(),
            self.executor_pool.clone(),
            sequence_name.into(),
            user_metadata,
            config,
        )
        .await
    }

    /// Connects a handle onto an existing topic, resolving its metadata and
    /// storage diagnostics.
    pub async fn topic_handler(
        &self,
        sequence_name: &str,
        topic_name: &str,
    ) -> Result<TopicHandler> {
        TopicHandler::connect(
            self.cnx_pool.clone(),
            self.catalog.clone(),
            sequence_name,
            topic_name,
        )
        .await
    }

    /// Opens a single chronological stream over every topic of a sequence,
    /// optionally sliced server-side to a time window.
    pub async fn sequence_streamer(
        &self,
        sequence_name: &str,
        window: TimeWindow,
    ) -> Result<SequenceDataStreamer> {
        SequenceDataStreamer::connect(&self.cnx_pool, self.catalog.clone(), sequence_name, window)
            .await
    }

    /// Drains and joins the background flush workers. Call once writing is
    /// done; open writers can no longer flush asynchronously afterwards.
    pub async fn shutdown(&self) {
        self.executor_pool.shutdown().await;
    }
}

/// A builder for configuring and creating a [`TesseraClient`].
#[derive(Default)]
pub struct TesseraClientBuilder {
    factory: Option<Arc<dyn ChannelFactory>>,
    connections: Option<usize>,
    executor_workers: Option<usize>,
    catalog: Option<OntologyCatalog>,
}

impl TesseraClientBuilder {
    /// Sets the transport the client dials its channels through. Required.
    pub fn with_transport(mut self, factory: Arc<dyn ChannelFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Sets the connection pool size (default 4). Each topic writer/reader
    /// leases one pooled channel for its lifetime.
    pub fn with_connections(mut self, connections: usize) -> Self {
        self.connections = Some(connections);
        self
    }

    /// Sets the number of background flush workers (default 4). Zero
    /// workers degrades every topic writer to synchronous flushing.
    pub fn with_executor_workers(mut self, workers: usize) -> Self {
        self.executor_workers = Some(workers);
        self
    }

    /// Replaces the default ontology catalog (the built-in sensor types).
    pub fn with_catalog(mut self, catalog: OntologyCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Dials the connection pool and starts the executor workers.
    pub async fn build(self) -> Result<TesseraClient> {
        let factory = self.factory.ok_or_else(|| {
            TesseraError::Validation(
                "a transport is required to build a TesseraClient".to_string(),
            )
        })?;
        let connections = self.connections.unwrap_or(4);
        let executor_workers = self.executor_workers.unwrap_or(4);

        let cnx_pool = ConnectionPool::connect(&factory, connections).await?;
        let executor_pool = ExecutorPool::start(executor_workers);
        let catalog = self.catalog.unwrap_or_else(OntologyCatalog::with_builtins);
        tracing::info!(
            connections = cnx_pool.size(),
            executor_workers = executor_pool.worker_count(),
            "tessera client ready"
        );

        Ok(TesseraClient {
            cnx_pool: Arc::new(cnx_pool),
            executor_pool: Arc::new(executor_pool),
            catalog,
        })
    }
}
