//! Tessera-Client
//!
//! Tessera-Client -- client engine for the Tessera time-ordered
//! sensor-data platform

mod client;
pub use client::{TesseraClient, TesseraClientBuilder};

pub mod errors;

mod config;
pub use config::{OnErrorPolicy, WriterConfig};

mod connection_pool;

mod executor_pool;
#[cfg(test)]
mod executor_pool_test;

mod sequence_writer;
pub use sequence_writer::{SequenceStatus, SequenceWriter};

mod topic_writer;
pub use topic_writer::TopicWriter;

mod topic_write_state;
#[cfg(test)]
mod topic_write_state_test;

mod topic_handler;
pub use topic_handler::TopicHandler;

mod topic_reader;
pub use topic_reader::TopicDataStreamer;

mod topic_read_state;
#[cfg(test)]
mod topic_reader_test;

mod sequence_reader;
pub use sequence_reader::SequenceDataStreamer;
