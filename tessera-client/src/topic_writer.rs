use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info, warn};

use tessera_core::message::{Header, Message};
use tessera_core::ontology::Ontology;
use tessera_core::transport::{
    ActionRequest, DataChannel, ResourceName, TopicSchema, WriteLocator,
};

use crate::config::{OnErrorPolicy, WriterConfig};
use crate::connection_pool::ChannelLease;
use crate::errors::{Result, TesseraError};
use crate::executor_pool::ExecutorLane;
use crate::topic_write_state::{BatchLimits, TopicWriteState};

pub(crate) type SharedWriteState = Arc<Mutex<TopicWriteState>>;

/// A high-throughput writer for one topic stream.
///
/// Records accumulate in an internal buffer and are transmitted when a
/// configured batch limit — byte size or record count — is reached. With an
/// executor lane assigned, serialization and transmission run on background
/// workers so `push` rarely blocks on the network.
///
/// Obtained from [`SequenceWriter::topic_create`](crate::SequenceWriter::topic_create);
/// the parent sequence writer finalizes any topic the caller has not
/// finalized itself.
pub struct TopicWriter<T: Ontology> {
    resource: ResourceName,
    lease: ChannelLease,
    state: SharedWriteState,
    closed: Arc<AtomicBool>,
    on_error: OnErrorPolicy,
    _payload: PhantomData<fn() -> T>,
}

impl<T: Ontology> std::fmt::Debug for TopicWriter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicWriter")
            .field("resource", &self.resource)
            .field("tag", &T::tag())
            .field("finalized", &self.finalized())
            .finish()
    }
}

pub(crate) fn validate_topic_name(name: &str) -> Result<()> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(TesseraError::Validation(format!(
            "invalid topic name '{}': must be non-empty without whitespace",
            name
        )));
    }
    Ok(())
}

impl<T: Ontology> TopicWriter<T> {
    /// Opens the remote write stream and initializes the buffer state.
    /// Called by `SequenceWriter::topic_create`, never directly.
    pub(crate) async fn create(
        sequence_name: &str,
        topic_name: &str,
        auth_key: &str,
        lease: ChannelLease,
        lane: Option<ExecutorLane>,
        flush_gate: Arc<Semaphore>,
        config: &WriterConfig,
        user_metadata: serde_json::Value,
    ) -> Result<Self> {
        validate_topic_name(topic_name)?;
        if T::tag().trim().is_empty() {
            return Err(TesseraError::Validation(format!(
                "ontology type for topic '{}' declares an empty tag",
                topic_name
            )));
        }
        // Envelope/payload field collisions surface here, before any
        // network traffic.
        let schema = Message::<T>::combined_schema()?;

        let resource = ResourceName::new(sequence_name, topic_name);
        let locator = WriteLocator {
            resource: resource.clone(),
            key: auth_key.to_string(),
        };
        let topic_schema = TopicSchema {
            ontology_tag: T::tag().to_string(),
            record_schema: schema.clone(),
            user_metadata,
        };
        let stream = lease
            .channel()
            .open_write_stream(locator, topic_schema)
            .await?;

        let state = TopicWriteState::new(
            resource.clone(),
            Arc::new(schema),
            stream,
            lane,
            flush_gate,
            BatchLimits {
                max_bytes: config.max_batch_bytes,
                max_records: config.max_batch_records,
            },
        );
        let closed = state.closed_flag();
        info!(topic = %resource, tag = T::tag(), "topic writer created");

        Ok(TopicWriter {
            resource,
            lease,
            state: Arc::new(Mutex::new(state)),
            closed,
            on_error: config.on_error,
            _payload: PhantomData,
        })
    }

    pub fn topic_name(&self) -> &str {
        &self.resource.topic
    }

    pub fn sequence_name(&self) -> &str {
        &self.resource.sequence
    }

    /// `true` once the stream has been finalized and the writer is closed.
    pub fn finalized(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn shared_state(&self) -> SharedWriteState {
        self.state.clone()
    }

    pub(crate) fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }

    /// Adds one record to the write buffer, transmitting a batch when a
    /// limit is crossed. On failure the error is reported per the on-error
    /// policy and local resources are released before propagating.
    pub async fn push(&mut self, message: Message<T>) -> Result<()> {
        let row = message.to_row();
        let result = {
            let mut state = self.state.lock().await;
            state.push_row(row).await
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.handle_failure(e).await),
        }
    }

    /// Convenience form of [`TopicWriter::push`] from the discrete record
    /// components.
    pub async fn push_with(
        &mut self,
        timestamp_ns: i64,
        header: Option<Header>,
        payload: T,
    ) -> Result<()> {
        self.push(Message {
            timestamp_ns,
            header,
            payload,
        })
        .await
    }

    /// Flushes remaining buffered records and closes the remote stream;
    /// `with_error` skips the flush so a stream understood to be corrupt is
    /// never extended. Idempotent.
    pub async fn finalize(&mut self, with_error: bool) -> Result<()> {
        let result = {
            let mut state = self.state.lock().await;
            state.close(with_error).await
        };
        match result {
            Ok(()) => {
                info!(topic = %self.resource, with_error, "topic writer finalized");
                Ok(())
            }
            Err(e) => Err(self.handle_failure(e).await),
        }
    }

    /// Best-effort error report, then unconditional local cleanup, then
    /// hand the original error back for propagation.
    async fn handle_failure(&mut self, err: TesseraError) -> TesseraError {
        if self.on_error == OnErrorPolicy::Report {
            if let Err(report_err) = self.report_error(&err).await {
                error!(topic = %self.resource, error = %report_err, "failed to report topic error");
            }
        }
        let cleanup = {
            let mut state = self.state.lock().await;
            state.close(true).await
        };
        if let Err(cleanup_err) = cleanup {
            warn!(topic = %self.resource, error = %cleanup_err, "cleanup after failure");
        }
        err
    }

    async fn report_error(&self, err: &TesseraError) -> Result<()> {
        self.lease
            .channel()
            .create_resource(ActionRequest::TopicNotify {
                resource: self.resource.clone(),
                notify_type: "error".to_string(),
                msg: err.to_string(),
            })
            .await?;
        info!(topic = %self.resource, "reported topic error");
        Ok(())
    }
}

impl<T: Ontology> Drop for TopicWriter<T> {
    fn drop(&mut self) {
        if !self.finalized() {
            warn!(
                topic = %self.resource,
                "TopicWriter dropped without finalize(); resources may not have been released properly"
            );
        }
    }
}
