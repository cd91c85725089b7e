use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use tessera_core::ontology::Ontology;
use tessera_core::transport::{ActionRequest, DataChannel};

use crate::config::{OnErrorPolicy, WriterConfig};
use crate::connection_pool::{ChannelLease, ConnectionPool};
use crate::errors::{Result, TesseraError};
use crate::executor_pool::ExecutorPool;
use crate::topic_writer::{SharedWriteState, TopicWriter};

/// Lifecycle state of a sequence being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceStatus {
    Uninitialized,
    /// Created on the server, no topic written yet.
    Pending,
    /// At least one topic stream is open.
    Active,
    Finalized,
    Aborted,
}

struct TopicRegistration {
    name: String,
    state: SharedWriteState,
    closed: Arc<AtomicBool>,
}

/// Orchestrates the creation and data-ingestion lifecycle of one sequence.
///
/// The writer walks the sequence through **Create → Write →
/// Finalize/Abort**: creation captures the server authorization key, topic
/// factories distribute pooled connections and executor lanes to individual
/// [`TopicWriter`]s, and [`SequenceWriter::finalize`] /
/// [`SequenceWriter::abort`] settle every topic stream on exit.
///
/// Obtained from [`TesseraClient::sequence_create`](crate::TesseraClient::sequence_create).
pub struct SequenceWriter {
    name: String,
    key: String,
    lease: ChannelLease,
    cnx_pool: Arc<ConnectionPool>,
    executor_pool: Arc<ExecutorPool>,
    flush_gate: Arc<Semaphore>,
    config: WriterConfig,
    status: SequenceStatus,
    topics: Vec<TopicRegistration>,
}

impl std::fmt::Debug for SequenceWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceWriter")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("status", &self.status)
            .field("topics", &self.topics.len())
            .finish_non_exhaustive()
    }
}

pub(crate) fn validate_sequence_name(name: &str) -> Result<()> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(TesseraError::Validation(format!(
            "invalid sequence name '{}': must be non-empty without whitespace",
            name
        )));
    }
    Ok(())
}

impl SequenceWriter {
    /// Performs the server-side handshake creating the new sequence and
    /// capturing the authorization key used by every subsequent topic
    /// creation.
    pub(crate) async fn create(
        cnx_pool: Arc<ConnectionPool>,
        executor_pool: Arc<ExecutorPool>,
        name: String,
        user_metadata: serde_json::Value,
        config: WriterConfig,
    ) -> Result<Self> {
        validate_sequence_name(&name)?;
        let lease = cnx_pool.lease();

        let response = lease
            .channel()
            .create_resource(ActionRequest::SequenceCreate {
                name: name.clone(),
                user_metadata,
            })
            .await
            .map_err(|e| {
                TesseraError::Lifecycle(format!("server rejected sequence '{}': {}", name, e))
            })?;
        let key = response
            .key
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                TesseraError::Lifecycle(format!(
                    "sequence '{}' creation returned an empty acknowledgment",
                    name
                ))
            })?;
        info!(sequence = %name, "sequence created");

        let flush_permits = if config.max_concurrent_flushes > 0 {
            config.max_concurrent_flushes
        } else {
            executor_pool.worker_count().max(1)
        };

        Ok(SequenceWriter {
            name,
            key,
            lease,
            cnx_pool,
            executor_pool,
            flush_gate: Arc::new(Semaphore::new(flush_permits)),
            config,
            status: SequenceStatus::Pending,
            topics: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> SequenceStatus {
        self.status
    }

    /// Opens a new topic stream under this sequence.
    ///
    /// Each topic receives the sequence authorization key, a connection
    /// drawn from the shared pool, an executor lane (when the pool has
    /// workers; otherwise flushing is synchronous) and the configured batch
    /// thresholds.
    pub async fn topic_create<T: Ontology>(
        &mut self,
        topic_name: &str,
        user_metadata: serde_json::Value,
    ) -> Result<TopicWriter<T>> {
        match self.status {
            SequenceStatus::Pending | SequenceStatus::Active => {}
            status => {
                return Err(TesseraError::Lifecycle(format!(
                    "cannot create topic '{}' in {:?} sequence '{}'",
                    topic_name, status, self.name
                )))
            }
        }
        if self.topics.iter().any(|t| t.name == topic_name) {
            return Err(TesseraError::Lifecycle(format!(
                "topic '{}' already created in sequence '{}'",
                topic_name, self.name
            )));
        }

        let writer = TopicWriter::<T>::create(
            &self.name,
            topic_name,
            &self.key,
            self.cnx_pool.lease(),
            self.executor_pool.lane(),
            self.flush_gate.clone(),
            &self.config,
            user_metadata,
        )
        .await?;

        self.topics.push(TopicRegistration {
            name: topic_name.to_string(),
            state: writer.shared_state(),
            closed: writer.closed_flag(),
        });
        self.status = SequenceStatus::Active;
        Ok(writer)
    }

    /// Closes every owned topic stream, with or without flushing, keeping
    /// the first failure.
    async fn close_topics(&mut self, with_error: bool) -> Result<()> {
        let mut first_err = None;
        for topic in &self.topics {
            if topic.closed.load(Ordering::SeqCst) {
                continue;
            }
            let result = {
                let mut state = topic.state.lock().await;
                state.close(with_error).await
            };
            if let Err(e) = result {
                error!(
                    sequence = %self.name,
                    topic = %topic.name,
                    error = %e,
                    "failed to close topic stream"
                );
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Flushes and closes all owned topic writers, completing the sequence.
    ///
    /// A finalize failure triggers the on-error policy and aborts the
    /// sequence server-side so a partially-transmitted recording is never
    /// left behind; the original failure is what propagates. Idempotent.
    pub async fn finalize(&mut self) -> Result<()> {
        match self.status {
            SequenceStatus::Finalized => return Ok(()),
            SequenceStatus::Aborted => {
                return Err(TesseraError::Lifecycle(format!(
                    "sequence '{}' was already aborted",
                    self.name
                )))
            }
            _ => {}
        }

        match self.close_topics(false).await {
            Ok(()) => {
                self.status = SequenceStatus::Finalized;
                info!(sequence = %self.name, "sequence finalized");
                Ok(())
            }
            Err(e) => {
                self.report_sequence_error(&e).await;
                self.abort_on_server().await;
                self.status = SequenceStatus::Aborted;
                Err(e)
            }
        }
    }

    /// Abandons the sequence: topic buffers are discarded unflushed and the
    /// server is told to drop the partial sequence. Idempotent.
    pub async fn abort(&mut self, reason: &str) -> Result<()> {
        match self.status {
            SequenceStatus::Aborted => return Ok(()),
            SequenceStatus::Finalized => {
                return Err(TesseraError::Lifecycle(format!(
                    "sequence '{}' was already finalized",
                    self.name
                )))
            }
            _ => {}
        }

        if let Err(e) = self.close_topics(true).await {
            warn!(sequence = %self.name, error = %e, "topic cleanup during abort");
        }
        self.report_sequence_error(&TesseraError::Lifecycle(reason.to_string()))
            .await;
        self.abort_on_server().await;
        self.status = SequenceStatus::Aborted;
        warn!(sequence = %self.name, reason, "sequence aborted");
        Ok(())
    }

    /// Best-effort server-side abort; failures are logged, never raised.
    async fn abort_on_server(&self) {
        let result = self
            .lease
            .channel()
            .create_resource(ActionRequest::SequenceAbort {
                name: self.name.clone(),
                key: self.key.clone(),
            })
            .await;
        if let Err(e) = result {
            error!(sequence = %self.name, error = %e, "server-side abort failed");
        }
    }

    /// Best-effort error notification, honoring the on-error policy.
    async fn report_sequence_error(&self, err: &TesseraError) {
        if self.config.on_error != OnErrorPolicy::Report {
            return;
        }
        let result = self
            .lease
            .channel()
            .create_resource(ActionRequest::SequenceNotify {
                name: self.name.clone(),
                notify_type: "error".to_string(),
                msg: err.to_string(),
            })
            .await;
        match result {
            Ok(_) => info!(sequence = %self.name, "reported sequence error"),
            Err(e) => error!(sequence = %self.name, error = %e, "failed to report sequence error"),
        }
    }
}

impl Drop for SequenceWriter {
    fn drop(&mut self) {
        if matches!(
            self.status,
            SequenceStatus::Pending | SequenceStatus::Active
        ) {
            warn!(
                sequence = %self.name,
                "SequenceWriter dropped without finalize() or abort(); resources may not have been released properly"
            );
        }
    }
}
