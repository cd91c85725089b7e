#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use async_trait::async_trait;
#[cfg(test)]
use tokio::sync::Semaphore;

#[cfg(test)]
use tessera_core::batch::RecordBatch;
#[cfg(test)]
use tessera_core::message::Message;
#[cfg(test)]
use tessera_core::schema::RecordSchema;
#[cfg(test)]
use tessera_core::sensors::Temperature;
#[cfg(test)]
use tessera_core::transport::{
    RecordWriteStream, ResourceName, Result as TransportResult, TransportError,
};
#[cfg(test)]
use tessera_core::value::Value;

#[cfg(test)]
use crate::errors::TesseraError;
#[cfg(test)]
use crate::executor_pool::ExecutorPool;
#[cfg(test)]
use crate::topic_write_state::{BatchLimits, TopicWriteState};

/// Write-stream double recording every transmitted batch.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
struct RecordingStream {
    batches: Arc<std::sync::Mutex<Vec<RecordBatch>>>,
    closes: Arc<std::sync::Mutex<usize>>,
    fail_after: Option<usize>,
}

#[cfg(test)]
impl RecordingStream {
    fn failing_after(successes: usize) -> Self {
        RecordingStream {
            fail_after: Some(successes),
            ..Default::default()
        }
    }

    fn batch_sizes(&self) -> Vec<usize> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .map(RecordBatch::num_rows)
            .collect()
    }

    fn close_count(&self) -> usize {
        *self.closes.lock().unwrap()
    }

    fn received_timestamps(&self) -> Vec<i64> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flat_map(|batch| batch.rows().collect::<Vec<_>>())
            .filter_map(|row| row.first().and_then(Value::as_i64))
            .collect()
    }
}

#[cfg(test)]
#[async_trait]
impl RecordWriteStream for RecordingStream {
    async fn write_batch(&mut self, batch: RecordBatch) -> TransportResult<()> {
        if let Some(limit) = self.fail_after {
            if self.batches.lock().unwrap().len() >= limit {
                return Err(TransportError::StreamClosed("injected failure".into()));
            }
        }
        self.batches.lock().unwrap().push(batch);
        Ok(())
    }

    async fn close(&mut self) -> TransportResult<()> {
        *self.closes.lock().unwrap() += 1;
        Ok(())
    }
}

#[cfg(test)]
fn temperature_schema() -> Arc<RecordSchema> {
    Arc::new(Message::<Temperature>::combined_schema().unwrap())
}

#[cfg(test)]
fn temperature_row(timestamp_ns: i64) -> Vec<Value> {
    Message::new(timestamp_ns, Temperature::new(300.0)).to_row()
}

/// A temperature row encodes to 19 approximate bytes: 8 (timestamp) +
/// 1 (null header) + 8 (value) + 1 + 1 (null variance fields).
#[cfg(test)]
const ROW_BYTES: usize = 19;

#[cfg(test)]
fn sync_state(stream: RecordingStream, limits: BatchLimits) -> TopicWriteState {
    TopicWriteState::new(
        ResourceName::new("seq", "/temp"),
        temperature_schema(),
        Box::new(stream),
        None,
        Arc::new(Semaphore::new(1)),
        limits,
    )
}

#[tokio::test]
async fn record_count_threshold_triggers_flush() {
    let stream = RecordingStream::default();
    let mut state = sync_state(
        stream.clone(),
        BatchLimits {
            max_bytes: usize::MAX,
            max_records: 3,
        },
    );

    for ts in 0..7 {
        state.push_row(temperature_row(ts)).await.unwrap();
    }
    assert_eq!(stream.batch_sizes(), vec![3, 3]);
    assert_eq!(state.buffered_records(), 1);

    state.close(false).await.unwrap();
    assert_eq!(stream.batch_sizes(), vec![3, 3, 1]);
    assert_eq!(stream.received_timestamps(), (0..7).collect::<Vec<_>>());
}

#[tokio::test]
async fn byte_threshold_flushes_before_overflow() {
    let stream = RecordingStream::default();
    // two rows fit under the limit, a third would overflow it
    let mut state = sync_state(
        stream.clone(),
        BatchLimits {
            max_bytes: 2 * ROW_BYTES + 2,
            max_records: usize::MAX,
        },
    );

    for ts in 0..5 {
        state.push_row(temperature_row(ts)).await.unwrap();
    }
    state.close(false).await.unwrap();

    let sizes = stream.batch_sizes();
    assert_eq!(sizes.iter().sum::<usize>(), 5);
    // no transmitted batch ever exceeds the byte threshold
    assert!(sizes.iter().all(|&size| size <= 2));
    assert_eq!(stream.received_timestamps(), (0..5).collect::<Vec<_>>());
}

#[tokio::test]
async fn oversized_record_flushes_alone() {
    let stream = RecordingStream::default();
    let mut state = sync_state(
        stream.clone(),
        BatchLimits {
            max_bytes: ROW_BYTES / 2,
            max_records: usize::MAX,
        },
    );

    for ts in 0..3 {
        state.push_row(temperature_row(ts)).await.unwrap();
    }
    assert_eq!(stream.batch_sizes(), vec![1, 1, 1]);
}

#[tokio::test]
async fn async_flushes_preserve_push_order() {
    let pool = ExecutorPool::start(2);
    let stream = RecordingStream::default();
    let mut state = TopicWriteState::new(
        ResourceName::new("seq", "/temp"),
        temperature_schema(),
        Box::new(stream.clone()),
        pool.lane(),
        Arc::new(Semaphore::new(4)),
        BatchLimits {
            max_bytes: usize::MAX,
            max_records: 5,
        },
    );

    for ts in 0..100 {
        state.push_row(temperature_row(ts)).await.unwrap();
    }
    state.close(false).await.unwrap();
    pool.shutdown().await;

    assert_eq!(stream.batch_sizes(), vec![5; 20]);
    assert_eq!(stream.received_timestamps(), (0..100).collect::<Vec<_>>());
}

#[tokio::test]
async fn close_flushes_remainder_and_is_idempotent() {
    let stream = RecordingStream::default();
    let mut state = sync_state(
        stream.clone(),
        BatchLimits {
            max_bytes: usize::MAX,
            max_records: 100,
        },
    );

    state.push_row(temperature_row(1)).await.unwrap();
    state.close(false).await.unwrap();
    assert!(state.is_closed());
    assert_eq!(stream.batch_sizes(), vec![1]);
    assert_eq!(stream.close_count(), 1);

    // second close is a no-op
    state.close(false).await.unwrap();
    assert_eq!(stream.close_count(), 1);
}

#[tokio::test]
async fn close_with_error_discards_unflushed_records() {
    let stream = RecordingStream::default();
    let mut state = sync_state(
        stream.clone(),
        BatchLimits {
            max_bytes: usize::MAX,
            max_records: 3,
        },
    );

    // first three flush, fourth stays buffered
    for ts in 0..4 {
        state.push_row(temperature_row(ts)).await.unwrap();
    }
    state.close(true).await.unwrap();

    // strictly fewer records transmitted than pushed
    assert_eq!(stream.batch_sizes(), vec![3]);
    assert_eq!(stream.close_count(), 1);
}

#[tokio::test]
async fn push_after_close_is_a_lifecycle_error() {
    let stream = RecordingStream::default();
    let mut state = sync_state(
        stream.clone(),
        BatchLimits {
            max_bytes: usize::MAX,
            max_records: 10,
        },
    );
    state.close(false).await.unwrap();

    let err = state.push_row(temperature_row(1)).await.unwrap_err();
    assert!(matches!(err, TesseraError::Lifecycle(_)));
}

#[tokio::test]
async fn failed_inline_flush_propagates_transport_error() {
    let stream = RecordingStream::failing_after(1);
    let mut state = sync_state(
        stream.clone(),
        BatchLimits {
            max_bytes: usize::MAX,
            max_records: 2,
        },
    );

    state.push_row(temperature_row(0)).await.unwrap();
    state.push_row(temperature_row(1)).await.unwrap();

    state.push_row(temperature_row(2)).await.unwrap();
    let err = state.push_row(temperature_row(3)).await.unwrap_err();
    assert!(matches!(err, TesseraError::Transport(_)));

    // cleanup is unconditional and close stays idempotent
    state.close(true).await.unwrap();
    assert_eq!(stream.close_count(), 1);
}

#[tokio::test]
async fn failed_async_flush_surfaces_on_close() {
    let pool = ExecutorPool::start(1);
    let stream = RecordingStream::failing_after(0);
    let mut state = TopicWriteState::new(
        ResourceName::new("seq", "/temp"),
        temperature_schema(),
        Box::new(stream.clone()),
        pool.lane(),
        Arc::new(Semaphore::new(1)),
        BatchLimits {
            max_bytes: usize::MAX,
            max_records: 1,
        },
    );

    // the submission itself succeeds; the failure lands in the ack queue
    state.push_row(temperature_row(0)).await.unwrap();
    let err = state.close(false).await.unwrap_err();
    assert!(matches!(err, TesseraError::Transport(_)));
    pool.shutdown().await;
}

#[tokio::test]
async fn invalid_row_is_rejected_before_buffering() {
    let stream = RecordingStream::default();
    let mut state = sync_state(
        stream.clone(),
        BatchLimits {
            max_bytes: usize::MAX,
            max_records: 10,
        },
    );

    let err = state
        .push_row(vec![Value::Float(1.0)])
        .await
        .unwrap_err();
    assert!(matches!(err, TesseraError::Schema(_)));
    assert_eq!(state.buffered_records(), 0);
}
