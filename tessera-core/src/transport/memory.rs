//! In-process implementation of the remote data channel.
//!
//! `MemoryDataService` implements the full channel contract (handshakes,
//! window slicing, notifications) against process-local state. It backs the
//! engine's test suites and doubles as a reference for real providers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::batch::RecordBatch;
use crate::message::TIMESTAMP_FIELD;
use crate::schema::RecordSchema;
use crate::transport::{
    ActionRequest, ActionResponse, ChannelFactory, DataChannel, LocatorDescriptor,
    RecordReadStream, RecordWriteStream, ResolvedLocator, ResourceName, Result, StreamMetadata,
    Ticket, TimeWindow, TopicEndpoint, TopicSchema, TopicSystemInfo, TransportError, WriteLocator,
};
use crate::value::Value;

/// A notification recorded by the `*_notify` actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub resource: String,
    pub notify_type: String,
    pub msg: String,
}

#[derive(Debug)]
struct TopicRecord {
    ontology_tag: String,
    schema: Arc<RecordSchema>,
    user_metadata: serde_json::Value,
    batches: Vec<RecordBatch>,
}

#[derive(Debug)]
struct SequenceRecord {
    key: String,
    #[allow(dead_code)]
    user_metadata: serde_json::Value,
    topics: BTreeMap<String, TopicRecord>,
}

#[derive(Debug, Default)]
struct ServiceState {
    sequences: DashMap<String, SequenceRecord>,
    notifications: Mutex<Vec<Notification>>,
    key_counter: AtomicU64,
    channel_counter: AtomicU64,
}

/// The wire content of a memory-provider ticket.
#[derive(Debug, Serialize, Deserialize)]
struct TicketPayload {
    sequence: String,
    topic: String,
    window: TimeWindow,
}

/// Process-local data service shared by every channel it hands out.
#[derive(Debug, Clone, Default)]
pub struct MemoryDataService {
    state: Arc<ServiceState>,
}

impl MemoryDataService {
    pub fn new() -> Self {
        MemoryDataService::default()
    }

    /// Opens a new channel onto this service.
    pub fn channel(&self) -> Arc<dyn DataChannel> {
        Arc::new(MemoryChannel {
            state: self.state.clone(),
            id: self.state.channel_counter.fetch_add(1, Ordering::SeqCst),
        })
    }

    // ---- introspection, used by tests ----

    pub fn sequence_exists(&self, name: &str) -> bool {
        self.state.sequences.contains_key(name)
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.state
            .notifications
            .lock()
            .expect("notification lock poisoned")
            .clone()
    }

    /// Row counts of every batch received for one topic, in arrival order.
    pub fn batch_row_counts(&self, sequence: &str, topic: &str) -> Vec<usize> {
        self.state
            .sequences
            .get(sequence)
            .and_then(|seq| {
                seq.topics
                    .get(topic)
                    .map(|t| t.batches.iter().map(RecordBatch::num_rows).collect())
            })
            .unwrap_or_default()
    }

    /// All rows received for one topic, flattened in arrival order.
    pub fn topic_rows(&self, sequence: &str, topic: &str) -> Vec<Vec<Value>> {
        self.state
            .sequences
            .get(sequence)
            .and_then(|seq| {
                seq.topics
                    .get(topic)
                    .map(|t| t.batches.iter().flat_map(|b| b.rows()).collect())
            })
            .unwrap_or_default()
    }

    pub fn topic_record_count(&self, sequence: &str, topic: &str) -> usize {
        self.batch_row_counts(sequence, topic).iter().sum()
    }
}

#[async_trait]
impl ChannelFactory for MemoryDataService {
    async fn connect(&self) -> Result<Arc<dyn DataChannel>> {
        Ok(self.channel())
    }
}

#[derive(Debug)]
struct MemoryChannel {
    state: Arc<ServiceState>,
    #[allow(dead_code)]
    id: u64,
}

fn timestamp_of(schema: &RecordSchema, row: &[Value]) -> Option<i64> {
    schema
        .field_index(TIMESTAMP_FIELD)
        .and_then(|idx| row.get(idx))
        .and_then(Value::as_i64)
}

fn topic_timestamp_range(topic: &TopicRecord) -> (Option<i64>, Option<i64>) {
    let mut min = None;
    let mut max = None;
    for batch in &topic.batches {
        for row in batch.rows() {
            if let Some(ts) = timestamp_of(&topic.schema, &row) {
                min = Some(min.map_or(ts, |m: i64| m.min(ts)));
                max = Some(max.map_or(ts, |m: i64| m.max(ts)));
            }
        }
    }
    (min, max)
}

impl MemoryChannel {
    fn endpoint_for(&self, sequence: &str, topic_name: &str, topic: &TopicRecord, window: TimeWindow) -> Result<TopicEndpoint> {
        let payload = TicketPayload {
            sequence: sequence.to_string(),
            topic: topic_name.to_string(),
            window,
        };
        let ticket = Ticket(
            serde_json::to_vec(&payload)
                .map_err(|e| TransportError::Malformed(e.to_string()))?,
        );
        let (timestamp_ns_min, timestamp_ns_max) = topic_timestamp_range(topic);
        Ok(TopicEndpoint {
            topic: topic_name.to_string(),
            ticket,
            ontology_tag: topic.ontology_tag.clone(),
            timestamp_ns_min,
            timestamp_ns_max,
            user_metadata: topic.user_metadata.clone(),
        })
    }

    fn record_notification(&self, resource: String, notify_type: String, msg: String) {
        self.state
            .notifications
            .lock()
            .expect("notification lock poisoned")
            .push(Notification {
                resource,
                notify_type,
                msg,
            });
    }
}

#[async_trait]
impl DataChannel for MemoryChannel {
    async fn create_resource(&self, request: ActionRequest) -> Result<ActionResponse> {
        match request {
            ActionRequest::SequenceCreate {
                name,
                user_metadata,
            } => match self.state.sequences.entry(name.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => Err(TransportError::Rejected(
                    format!("sequence '{}' already exists", name),
                )),
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    let key = format!(
                        "key-{:016x}",
                        self.state.key_counter.fetch_add(1, Ordering::SeqCst)
                    );
                    vacant.insert(SequenceRecord {
                        key: key.clone(),
                        user_metadata,
                        topics: BTreeMap::new(),
                    });
                    info!(sequence = %name, "created sequence resource");
                    Ok(ActionResponse {
                        key: Some(key),
                        ..Default::default()
                    })
                }
            },
            ActionRequest::SequenceAbort { name, key } => {
                let stored_key = self
                    .state
                    .sequences
                    .get(&name)
                    .map(|seq| seq.key.clone())
                    .ok_or_else(|| TransportError::NotFound(format!("sequence '{}'", name)))?;
                if stored_key != key {
                    return Err(TransportError::Rejected(
                        "authorization key does not match".to_string(),
                    ));
                }
                self.state.sequences.remove(&name);
                warn!(sequence = %name, "aborted sequence resource deleted");
                Ok(ActionResponse::default())
            }
            ActionRequest::SequenceNotify {
                name,
                notify_type,
                msg,
            } => {
                self.record_notification(name, notify_type, msg);
                Ok(ActionResponse::default())
            }
            ActionRequest::TopicNotify {
                resource,
                notify_type,
                msg,
            } => {
                self.record_notification(resource.to_string(), notify_type, msg);
                Ok(ActionResponse::default())
            }
            ActionRequest::TopicSystemInfo { resource } => {
                let seq = self
                    .state
                    .sequences
                    .get(&resource.sequence)
                    .ok_or_else(|| {
                        TransportError::NotFound(format!("sequence '{}'", resource.sequence))
                    })?;
                let topic = seq.topics.get(&resource.topic).ok_or_else(|| {
                    TransportError::NotFound(format!("topic '{}'", resource))
                })?;
                let (timestamp_ns_min, timestamp_ns_max) = topic_timestamp_range(topic);
                Ok(ActionResponse {
                    system_info: Some(TopicSystemInfo {
                        record_count: topic
                            .batches
                            .iter()
                            .map(|b| b.num_rows() as u64)
                            .sum(),
                        size_bytes: topic
                            .batches
                            .iter()
                            .map(|b| b.approx_bytes() as u64)
                            .sum(),
                        timestamp_ns_min,
                        timestamp_ns_max,
                    }),
                    ..Default::default()
                })
            }
        }
    }

    async fn resolve_locator(&self, descriptor: LocatorDescriptor) -> Result<ResolvedLocator> {
        let seq = self
            .state
            .sequences
            .get(&descriptor.sequence)
            .ok_or_else(|| {
                TransportError::NotFound(format!("sequence '{}'", descriptor.sequence))
            })?;
        let mut endpoints = Vec::new();
        match &descriptor.topic {
            Some(topic_name) => {
                let topic = seq.topics.get(topic_name).ok_or_else(|| {
                    TransportError::NotFound(format!(
                        "topic '{}:{}'",
                        descriptor.sequence, topic_name
                    ))
                })?;
                endpoints.push(self.endpoint_for(
                    &descriptor.sequence,
                    topic_name,
                    topic,
                    descriptor.window,
                )?);
            }
            None => {
                for (topic_name, topic) in &seq.topics {
                    endpoints.push(self.endpoint_for(
                        &descriptor.sequence,
                        topic_name,
                        topic,
                        descriptor.window,
                    )?);
                }
            }
        }
        Ok(ResolvedLocator {
            sequence: descriptor.sequence,
            endpoints,
        })
    }

    async fn open_write_stream(
        &self,
        locator: WriteLocator,
        schema: TopicSchema,
    ) -> Result<Box<dyn RecordWriteStream>> {
        let mut seq = self
            .state
            .sequences
            .get_mut(&locator.resource.sequence)
            .ok_or_else(|| {
                TransportError::NotFound(format!("sequence '{}'", locator.resource.sequence))
            })?;
        if seq.key != locator.key {
            return Err(TransportError::Rejected(
                "authorization key does not match".to_string(),
            ));
        }
        if seq.topics.contains_key(&locator.resource.topic) {
            return Err(TransportError::Rejected(format!(
                "topic '{}' already exists",
                locator.resource
            )));
        }
        seq.topics.insert(
            locator.resource.topic.clone(),
            TopicRecord {
                ontology_tag: schema.ontology_tag,
                schema: Arc::new(schema.record_schema),
                user_metadata: schema.user_metadata,
                batches: Vec::new(),
            },
        );
        Ok(Box::new(MemoryWriteStream {
            state: self.state.clone(),
            resource: locator.resource,
            closed: false,
        }))
    }

    async fn open_read_stream(&self, ticket: Ticket) -> Result<Box<dyn RecordReadStream>> {
        let payload: TicketPayload = serde_json::from_slice(&ticket.0)
            .map_err(|e| TransportError::Malformed(format!("invalid ticket: {}", e)))?;
        let seq = self
            .state
            .sequences
            .get(&payload.sequence)
            .ok_or_else(|| TransportError::NotFound(format!("sequence '{}'", payload.sequence)))?;
        let topic = seq.topics.get(&payload.topic).ok_or_else(|| {
            TransportError::NotFound(format!("topic '{}:{}'", payload.sequence, payload.topic))
        })?;

        // Server-side slicing: drop rows outside the window, preserve batch
        // boundaries, skip batches left empty.
        let mut batches = Vec::new();
        for batch in &topic.batches {
            let rows: Vec<Vec<Value>> = batch
                .rows()
                .filter(|row| {
                    timestamp_of(&topic.schema, row)
                        .is_some_and(|ts| payload.window.contains(ts))
                })
                .collect();
            if !rows.is_empty() {
                batches.push(
                    RecordBatch::from_rows(topic.schema.clone(), rows)
                        .map_err(|e| TransportError::Malformed(e.to_string()))?,
                );
            }
        }

        let metadata = StreamMetadata {
            resource: ResourceName::new(payload.sequence, payload.topic),
            ontology_tag: topic.ontology_tag.clone(),
            schema: topic.schema.clone(),
        };
        Ok(Box::new(MemoryReadStream {
            metadata,
            batches: batches.into_iter().collect(),
            closed: false,
        }))
    }
}

struct MemoryWriteStream {
    state: Arc<ServiceState>,
    resource: ResourceName,
    closed: bool,
}

#[async_trait]
impl RecordWriteStream for MemoryWriteStream {
    async fn write_batch(&mut self, batch: RecordBatch) -> Result<()> {
        if self.closed {
            return Err(TransportError::StreamClosed(self.resource.to_string()));
        }
        let mut seq = self
            .state
            .sequences
            .get_mut(&self.resource.sequence)
            .ok_or_else(|| TransportError::StreamClosed(format!(
                "sequence '{}' no longer exists",
                self.resource.sequence
            )))?;
        let topic = seq
            .topics
            .get_mut(&self.resource.topic)
            .ok_or_else(|| TransportError::StreamClosed(format!(
                "topic '{}' no longer exists",
                self.resource
            )))?;
        topic.batches.push(batch);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

struct MemoryReadStream {
    metadata: StreamMetadata,
    batches: std::collections::VecDeque<RecordBatch>,
    closed: bool,
}

#[async_trait]
impl RecordReadStream for MemoryReadStream {
    fn metadata(&self) -> &StreamMetadata {
        &self.metadata
    }

    async fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        if self.closed {
            return Err(TransportError::StreamClosed(
                self.metadata.resource.to_string(),
            ));
        }
        Ok(self.batches.pop_front())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.batches.clear();
        Ok(())
    }
}
