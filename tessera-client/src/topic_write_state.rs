use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex, Semaphore};
use tracing::{debug, error, warn};

use tessera_core::batch::RecordBatch;
use tessera_core::schema::RecordSchema;
use tessera_core::transport::{RecordWriteStream, ResourceName, TransportError};
use tessera_core::value::Value;

use crate::errors::{Result, TesseraError};
use crate::executor_pool::ExecutorLane;

/// Flush thresholds for one topic buffer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BatchLimits {
    pub(crate) max_bytes: usize,
    pub(crate) max_records: usize,
}

type FlushAck = oneshot::Receiver<std::result::Result<(), TransportError>>;

/// Per-topic buffer, flush-threshold policy and background-flush
/// orchestration. This is the unit that actually talks to the remote
/// channel for writing.
///
/// The write stream sits behind an async mutex shared with background
/// flush jobs; because every job for one topic goes through the same
/// executor lane, flushes are transmitted in submission order even when
/// they run off the caller's task.
pub(crate) struct TopicWriteState {
    resource: ResourceName,
    schema: Arc<RecordSchema>,
    stream: Arc<Mutex<Box<dyn RecordWriteStream>>>,
    limits: BatchLimits,
    buffer: Vec<Vec<Value>>,
    buffered_bytes: usize,
    lane: Option<ExecutorLane>,
    flush_gate: Arc<Semaphore>,
    pending: VecDeque<FlushAck>,
    closed: Arc<AtomicBool>,
}

impl TopicWriteState {
    pub(crate) fn new(
        resource: ResourceName,
        schema: Arc<RecordSchema>,
        stream: Box<dyn RecordWriteStream>,
        lane: Option<ExecutorLane>,
        flush_gate: Arc<Semaphore>,
        limits: BatchLimits,
    ) -> Self {
        TopicWriteState {
            resource,
            schema,
            stream: Arc::new(Mutex::new(stream)),
            limits,
            buffer: Vec::new(),
            buffered_bytes: 0,
            lane,
            flush_gate,
            pending: VecDeque::new(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared completion flag, readable without locking the state.
    pub(crate) fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn buffered_records(&self) -> usize {
        self.buffer.len()
    }

    /// Appends one encoded row, flushing around the batch thresholds.
    ///
    /// A flush happens *before* appending when the row would push the
    /// buffer past the byte limit, and *after* appending when either
    /// threshold is reached — so no transmitted batch exceeds a limit
    /// unless a single record alone does.
    pub(crate) async fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if self.is_closed() {
            return Err(TesseraError::Lifecycle(format!(
                "topic '{}' is finalized, no further writes accepted",
                self.resource
            )));
        }
        self.schema.validate_row(&row)?;
        self.harvest_completed()?;

        let row_bytes: usize = row.iter().map(Value::encoded_size).sum();
        if !self.buffer.is_empty() && self.buffered_bytes + row_bytes > self.limits.max_bytes {
            self.flush().await?;
        }

        self.buffered_bytes += row_bytes;
        self.buffer.push(row);

        if self.buffer.len() >= self.limits.max_records
            || self.buffered_bytes >= self.limits.max_bytes
        {
            self.flush().await?;
        }
        Ok(())
    }

    /// Drains the buffer into one columnar batch and transmits it, inline
    /// or through the executor lane.
    pub(crate) async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let rows = std::mem::take(&mut self.buffer);
        self.buffered_bytes = 0;
        let record_count = rows.len();
        let batch = RecordBatch::from_rows(self.schema.clone(), rows)?;
        debug!(topic = %self.resource, records = record_count, "flushing batch");

        match self.lane.clone() {
            None => {
                let mut stream = self.stream.lock().await;
                stream.write_batch(batch).await?;
                Ok(())
            }
            Some(lane) => {
                let (ack_tx, ack_rx) = oneshot::channel();
                let stream = Arc::clone(&self.stream);
                let gate = Arc::clone(&self.flush_gate);
                let resource = self.resource.clone();
                let submitted = lane.submit(Box::pin(async move {
                    // The semaphore bounds concurrent flushes per sequence.
                    let _permit = gate.acquire().await.ok();
                    let result = {
                        let mut stream = stream.lock().await;
                        stream.write_batch(batch).await
                    };
                    if let Err(e) = &result {
                        error!(topic = %resource, error = %e, "background flush failed");
                    }
                    let _ = ack_tx.send(result);
                }));
                if !submitted {
                    return Err(TesseraError::Lifecycle(format!(
                        "executor pool is shut down, cannot flush topic '{}'",
                        self.resource
                    )));
                }
                self.pending.push_back(ack_rx);
                Ok(())
            }
        }
    }

    /// Pops results of background flushes that already completed, surfacing
    /// the first failure. Never blocks.
    fn harvest_completed(&mut self) -> Result<()> {
        while let Some(front) = self.pending.front_mut() {
            match front.try_recv() {
                Ok(Ok(())) => {
                    self.pending.pop_front();
                }
                Ok(Err(e)) => {
                    self.pending.pop_front();
                    return Err(e.into());
                }
                Err(oneshot::error::TryRecvError::Empty) => break,
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.pending.pop_front();
                    return Err(TesseraError::Lifecycle(format!(
                        "background flush for topic '{}' was dropped",
                        self.resource
                    )));
                }
            }
        }
        Ok(())
    }

    /// Awaits every in-flight background flush, keeping the first error.
    async fn wait_pending(&mut self) -> Result<()> {
        let mut first_err = None;
        while let Some(ack) = self.pending.pop_front() {
            match ack.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_err.is_none() {
                        first_err = Some(e.into());
                    }
                }
                Err(_) => {
                    if first_err.is_none() {
                        first_err = Some(TesseraError::Lifecycle(format!(
                            "background flush for topic '{}' was dropped",
                            self.resource
                        )));
                    }
                }
            }
        }
        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Final flush of whatever the buffer still holds, always inline: all
    /// pending background flushes were awaited first, so ordering holds.
    async fn flush_remainder(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let rows = std::mem::take(&mut self.buffer);
        self.buffered_bytes = 0;
        let batch = RecordBatch::from_rows(self.schema.clone(), rows)?;
        let mut stream = self.stream.lock().await;
        stream.write_batch(batch).await?;
        Ok(())
    }

    /// Closes the topic stream. Idempotent.
    ///
    /// `with_error == false` drains the buffer to the remote side first;
    /// `with_error == true` discards buffered-but-unsent records so a
    /// stream understood to be corrupt is never extended, and demotes all
    /// secondary failures to log lines. The local handle is released on
    /// every path.
    pub(crate) async fn close(&mut self, with_error: bool) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut result = Ok(());

        let pending = self.wait_pending().await;
        if with_error {
            if !self.buffer.is_empty() {
                warn!(
                    topic = %self.resource,
                    discarded = self.buffer.len(),
                    "closing with error, discarding unflushed records"
                );
            }
            if let Err(e) = pending {
                warn!(topic = %self.resource, error = %e, "pending flush failed during error close");
            }
        } else {
            result = pending;
            if result.is_ok() {
                result = self.flush_remainder().await;
            }
        }
        self.buffer.clear();
        self.buffered_bytes = 0;

        let close_result = {
            let mut stream = self.stream.lock().await;
            stream.close().await
        };
        match close_result {
            Ok(()) => {}
            Err(e) if result.is_ok() && !with_error => result = Err(e.into()),
            Err(e) => {
                warn!(topic = %self.resource, error = %e, "secondary stream close failure")
            }
        }
        result
    }
}
