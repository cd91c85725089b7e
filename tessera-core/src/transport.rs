//! The remote data channel abstraction.
//!
//! The engine never speaks a wire protocol directly: it consumes the traits
//! in this module. A channel exposes four capabilities: one-shot resource
//! actions, locator resolution, and write/read record streams.

pub mod memory;

use std::fmt::{self, Debug, Display, Formatter};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::batch::RecordBatch;
use crate::schema::RecordSchema;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("remote rejected request: {0}")]
    Rejected(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("stream closed: {0}")]
    StreamClosed(String),

    #[error("malformed wire payload: {0}")]
    Malformed(String),

    #[error("connection failed: {0}")]
    Connection(String),
}

/// Fully-qualified name of one topic within a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceName {
    pub sequence: String,
    pub topic: String,
}

impl ResourceName {
    pub fn new(sequence: impl Into<String>, topic: impl Into<String>) -> Self {
        ResourceName {
            sequence: sequence.into(),
            topic: topic.into(),
        }
    }
}

impl Display for ResourceName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.sequence, self.topic)
    }
}

/// Inclusive-start, exclusive-end time window in nanoseconds. Unset bounds
/// are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_ns: Option<i64>,
    pub end_ns: Option<i64>,
}

impl TimeWindow {
    pub fn unbounded() -> Self {
        TimeWindow::default()
    }

    pub fn new(start_ns: Option<i64>, end_ns: Option<i64>) -> Self {
        TimeWindow { start_ns, end_ns }
    }

    pub fn is_unbounded(&self) -> bool {
        self.start_ns.is_none() && self.end_ns.is_none()
    }

    pub fn contains(&self, timestamp_ns: i64) -> bool {
        if let Some(start) = self.start_ns {
            if timestamp_ns < start {
                return false;
            }
        }
        if let Some(end) = self.end_ns {
            if timestamp_ns >= end {
                return false;
            }
        }
        true
    }
}

/// One-shot control-plane request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ActionRequest {
    SequenceCreate {
        name: String,
        user_metadata: serde_json::Value,
    },
    SequenceAbort {
        name: String,
        key: String,
    },
    SequenceNotify {
        name: String,
        notify_type: String,
        msg: String,
    },
    TopicNotify {
        resource: ResourceName,
        notify_type: String,
        msg: String,
    },
    TopicSystemInfo {
        resource: ResourceName,
    },
}

/// Storage-side diagnostics for one topic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicSystemInfo {
    pub record_count: u64,
    pub size_bytes: u64,
    pub timestamp_ns_min: Option<i64>,
    pub timestamp_ns_max: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionResponse {
    /// Authorization key, present for create-style actions.
    pub key: Option<String>,
    /// Diagnostics, present for system-info actions.
    pub system_info: Option<TopicSystemInfo>,
}

/// Write-side addressing: the target resource plus the authorization key
/// captured during the sequence-create handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteLocator {
    pub resource: ResourceName,
    pub key: String,
}

/// Read-side discovery request: one topic, or every topic of a sequence,
/// optionally sliced server-side to a time window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatorDescriptor {
    pub sequence: String,
    pub topic: Option<String>,
    pub window: TimeWindow,
}

/// Opaque server-issued token granting read access to one topic stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket(pub Vec<u8>);

/// Discovery result for one topic endpoint.
#[derive(Debug, Clone)]
pub struct TopicEndpoint {
    pub topic: String,
    pub ticket: Ticket,
    pub ontology_tag: String,
    pub timestamp_ns_min: Option<i64>,
    pub timestamp_ns_max: Option<i64>,
    pub user_metadata: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ResolvedLocator {
    pub sequence: String,
    pub endpoints: Vec<TopicEndpoint>,
}

/// Schema contract attached when opening a write stream: the combined
/// envelope + payload field list plus the payload's ontology tag.
#[derive(Debug, Clone)]
pub struct TopicSchema {
    pub ontology_tag: String,
    pub record_schema: RecordSchema,
    pub user_metadata: serde_json::Value,
}

/// Metadata describing an open read stream, used to decode its rows.
#[derive(Debug, Clone)]
pub struct StreamMetadata {
    pub resource: ResourceName,
    pub ontology_tag: String,
    pub schema: Arc<RecordSchema>,
}

#[async_trait]
pub trait RecordWriteStream: Send {
    /// Transmits one columnar batch. A batch either fully succeeds or the
    /// stream is considered failed; there is no partial-batch retry here.
    async fn write_batch(&mut self, batch: RecordBatch) -> Result<()>;

    /// Signals normal completion and releases the stream.
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait RecordReadStream: Send {
    fn metadata(&self) -> &StreamMetadata;

    /// Pulls the next batch; `None` signals normal end-of-stream.
    async fn next_batch(&mut self) -> Result<Option<RecordBatch>>;

    async fn close(&mut self) -> Result<()>;
}

/// A reusable handle onto the remote data service.
#[async_trait]
pub trait DataChannel: Debug + Send + Sync {
    async fn create_resource(&self, request: ActionRequest) -> Result<ActionResponse>;

    async fn resolve_locator(&self, descriptor: LocatorDescriptor) -> Result<ResolvedLocator>;

    async fn open_write_stream(
        &self,
        locator: WriteLocator,
        schema: TopicSchema,
    ) -> Result<Box<dyn RecordWriteStream>>;

    async fn open_read_stream(&self, ticket: Ticket) -> Result<Box<dyn RecordReadStream>>;
}

/// Dials new channels for the connection pool.
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn DataChannel>>;
}
