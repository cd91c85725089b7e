use std::sync::Arc;

use tracing::{info, warn};

use tessera_core::batch::RecordBatch;
use tessera_core::message::AnyMessage;
use tessera_core::ontology::OntologyCatalog;
use tessera_core::schema::RecordSchema;
use tessera_core::transport::RecordReadStream;

use crate::errors::Result;

/// Pull-based reader over one remote topic stream with a one-record peek
/// buffer.
///
/// Raw columnar batches are walked row-by-row; the next row is decoded into
/// the peek buffer on demand, so the chronological head of the stream can be
/// inspected any number of times without consuming it. Exhaustion is a
/// sticky end-of-stream state, not an error.
pub(crate) struct TopicReadState {
    topic_name: String,
    ontology_tag: String,
    schema: Arc<RecordSchema>,
    stream: Box<dyn RecordReadStream>,
    catalog: OntologyCatalog,
    current: Option<(RecordBatch, usize)>,
    peeked: Option<AnyMessage>,
    exhausted: bool,
    closed: bool,
}

impl TopicReadState {
    pub(crate) fn new(stream: Box<dyn RecordReadStream>, catalog: OntologyCatalog) -> Self {
        let metadata = stream.metadata();
        TopicReadState {
            topic_name: metadata.resource.topic.clone(),
            ontology_tag: metadata.ontology_tag.clone(),
            schema: metadata.schema.clone(),
            stream,
            catalog,
            current: None,
            peeked: None,
            exhausted: false,
            closed: false,
        }
    }

    pub(crate) fn topic_name(&self) -> &str {
        &self.topic_name
    }

    pub(crate) fn ontology_tag(&self) -> &str {
        &self.ontology_tag
    }

    /// Ensures the peek buffer holds the next record; `false` once the
    /// stream is exhausted.
    async fn fill_peek(&mut self) -> Result<bool> {
        if self.peeked.is_some() {
            return Ok(true);
        }
        if self.exhausted || self.closed {
            return Ok(false);
        }
        loop {
            if let Some((batch, cursor)) = &mut self.current {
                if let Some(values) = batch.row(*cursor) {
                    *cursor += 1;
                    let message = AnyMessage::decode(
                        &self.catalog,
                        &self.ontology_tag,
                        &self.schema,
                        &values,
                    )?;
                    self.peeked = Some(message);
                    return Ok(true);
                }
                self.current = None;
            }
            match self.stream.next_batch().await? {
                Some(batch) if batch.num_rows() == 0 => continue,
                Some(batch) => self.current = Some((batch, 0)),
                None => {
                    self.exhausted = true;
                    return Ok(false);
                }
            }
        }
    }

    /// Timestamp of the next unconsumed record, without advancing the
    /// stream. Idempotent until the next consume; `None` on exhaustion.
    pub(crate) async fn peek_timestamp(&mut self) -> Result<Option<i64>> {
        if !self.fill_peek().await? {
            return Ok(None);
        }
        Ok(self.peeked.as_ref().map(|m| m.timestamp_ns))
    }

    /// Yields the next record in source order; `None` on exhaustion.
    pub(crate) async fn next(&mut self) -> Result<Option<AnyMessage>> {
        if !self.fill_peek().await? {
            return Ok(None);
        }
        Ok(self.peeked.take())
    }

    /// Releases the remote stream. Safe to call repeatedly; secondary close
    /// errors are logged, never raised.
    pub(crate) async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.peeked = None;
        self.current = None;
        if let Err(e) = self.stream.close().await {
            warn!(topic = %self.topic_name, error = %e, "error closing read stream");
        }
        info!(topic = %self.topic_name, "topic reader closed");
    }
}
