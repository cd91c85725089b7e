use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use tokio_stream::Stream;
use tracing::info;

use tessera_core::message::AnyMessage;
use tessera_core::ontology::OntologyCatalog;
use tessera_core::transport::{DataChannel, LocatorDescriptor, TimeWindow};

use crate::connection_pool::ConnectionPool;
use crate::errors::{Result, TesseraError};
use crate::topic_reader::TopicDataStreamer;

/// Heap entry ordering the active streams by their peeked timestamp.
///
/// The derived ordering compares `(timestamp_ns, topic, index)`, so streams
/// presenting the same minimum timestamp are drained in lexicographic
/// topic-name order — a deterministic tie-break rather than an
/// insertion-order accident.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct MergeKey {
    timestamp_ns: i64,
    topic: String,
    index: usize,
}

/// A single chronological iterator over every topic of a sequence.
///
/// Composes one [`TopicDataStreamer`] per topic and performs a K-way merge:
/// each step peeks all active streams, consumes exactly one record from the
/// stream with the smallest pending timestamp and yields it as a
/// `(topic_name, message)` pair. Output is the exact union of the inputs in
/// non-decreasing timestamp order with each stream's internal order
/// preserved; only one record per active stream is buffered at any time.
pub struct SequenceDataStreamer {
    sequence: String,
    streams: Vec<TopicDataStreamer>,
    heap: BinaryHeap<Reverse<MergeKey>>,
    primed: bool,
}

impl SequenceDataStreamer {
    /// Resolves the sequence's per-topic endpoints and opens one streamer
    /// per topic, each on its own pooled channel. Already-open streams are
    /// closed again if a later one fails to connect.
    pub(crate) async fn connect(
        cnx_pool: &Arc<ConnectionPool>,
        catalog: OntologyCatalog,
        sequence_name: &str,
        window: TimeWindow,
    ) -> Result<Self> {
        let lease = cnx_pool.lease();
        let resolved = lease
            .channel()
            .resolve_locator(LocatorDescriptor {
                sequence: sequence_name.to_string(),
                topic: None,
                window,
            })
            .await
            .map_err(TesseraError::from_lookup)?;

        let mut streams: Vec<TopicDataStreamer> = Vec::with_capacity(resolved.endpoints.len());
        for endpoint in resolved.endpoints {
            let stream = TopicDataStreamer::connect_from_ticket(
                cnx_pool.lease(),
                catalog.clone(),
                endpoint.ticket,
            )
            .await;
            match stream {
                Ok(stream) => streams.push(stream),
                Err(e) => {
                    for open in &mut streams {
                        open.close().await;
                    }
                    return Err(e);
                }
            }
        }
        info!(sequence = sequence_name, topics = streams.len(), "sequence streamer connected");

        Ok(SequenceDataStreamer {
            sequence: sequence_name.to_string(),
            streams,
            heap: BinaryHeap::new(),
            primed: false,
        })
    }

    pub fn sequence_name(&self) -> &str {
        &self.sequence
    }

    /// Topic names composing this merged stream, in endpoint order.
    pub fn topic_names(&self) -> Vec<&str> {
        self.streams
            .iter()
            .map(TopicDataStreamer::topic_name)
            .collect()
    }

    /// Seeds the heap with each stream's first pending timestamp. Streams
    /// reporting no data are exhausted and never enter the active set.
    async fn prime(&mut self) -> Result<()> {
        if self.primed {
            return Ok(());
        }
        for (index, stream) in self.streams.iter_mut().enumerate() {
            if let Some(timestamp_ns) = stream.peek_timestamp().await? {
                self.heap.push(Reverse(MergeKey {
                    timestamp_ns,
                    topic: stream.topic_name().to_string(),
                    index,
                }));
            }
        }
        self.primed = true;
        Ok(())
    }

    /// Timestamp of the next record the merge will yield, without
    /// consuming it. Idempotent; `None` once every stream is exhausted.
    pub async fn peek_timestamp(&mut self) -> Result<Option<i64>> {
        self.prime().await?;
        Ok(self.heap.peek().map(|Reverse(key)| key.timestamp_ns))
    }

    /// Yields the next `(topic_name, message)` pair in global chronological
    /// order, or `None` when every topic stream is exhausted.
    pub async fn next(&mut self) -> Result<Option<(String, AnyMessage)>> {
        self.prime().await?;
        let Some(Reverse(key)) = self.heap.pop() else {
            return Ok(None);
        };
        let stream = &mut self.streams[key.index];
        let message = stream.next().await?.ok_or_else(|| {
            TesseraError::Lifecycle(format!(
                "merge invariant violated: peeked stream '{}' yielded no record",
                key.topic
            ))
        })?;
        if let Some(timestamp_ns) = stream.peek_timestamp().await? {
            self.heap.push(Reverse(MergeKey {
                timestamp_ns,
                topic: key.topic.clone(),
                index: key.index,
            }));
        }
        Ok(Some((key.topic, message)))
    }

    /// Closes every composed topic streamer. Safe to call multiple times.
    pub async fn close(&mut self) {
        for stream in &mut self.streams {
            stream.close().await;
        }
        self.heap.clear();
    }

    /// Adapts the merge into a [`Stream`] of `(topic_name, message)` pairs,
    /// closing the composed streams when exhausted.
    pub fn into_stream(self) -> impl Stream<Item = Result<(String, AnyMessage)>> {
        futures::stream::unfold(Some(self), |streamer| async move {
            let mut streamer = streamer?;
            match streamer.next().await {
                Ok(Some(item)) => Some((Ok(item), Some(streamer))),
                Ok(None) => {
                    streamer.close().await;
                    None
                }
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}
