use tokio_stream::Stream;

use tessera_core::message::AnyMessage;
use tessera_core::ontology::OntologyCatalog;
use tessera_core::transport::{DataChannel, LocatorDescriptor, Ticket, TimeWindow};

use crate::connection_pool::ChannelLease;
use crate::errors::{Result, TesseraError};
use crate::topic_read_state::TopicReadState;

/// A chronological reader over a single topic.
///
/// Wraps a remote pull stream and reconstructs typed records row-by-row.
/// [`TopicDataStreamer::peek_timestamp`] exposes the ordering key of the
/// next record without consuming it, which is what the sequence-level
/// K-way merge builds on.
#[allow(dead_code)]
pub struct TopicDataStreamer {
    // held for its scoped-release side effect: the pooled channel stays
    // leased for exactly the streamer's lifetime
    lease: ChannelLease,
    state: TopicReadState,
}

impl std::fmt::Debug for TopicDataStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicDataStreamer").finish_non_exhaustive()
    }
}

impl TopicDataStreamer {
    /// Resolves the topic locator — optionally carrying a server-side time
    /// window — then opens the pull stream on the matching endpoint.
    pub(crate) async fn connect(
        lease: ChannelLease,
        catalog: OntologyCatalog,
        sequence_name: &str,
        topic_name: &str,
        window: TimeWindow,
    ) -> Result<Self> {
        let resolved = lease
            .channel()
            .resolve_locator(LocatorDescriptor {
                sequence: sequence_name.to_string(),
                topic: Some(topic_name.to_string()),
                window,
            })
            .await
            .map_err(TesseraError::from_lookup)?;
        let endpoint = resolved
            .endpoints
            .into_iter()
            .find(|ep| ep.topic == topic_name)
            .ok_or_else(|| {
                TesseraError::NotFound(format!(
                    "no endpoint for topic '{}' in sequence '{}'",
                    topic_name, sequence_name
                ))
            })?;
        Self::connect_from_ticket(lease, catalog, endpoint.ticket).await
    }

    /// Opens the pull stream directly from a previously resolved ticket.
    pub(crate) async fn connect_from_ticket(
        lease: ChannelLease,
        catalog: OntologyCatalog,
        ticket: Ticket,
    ) -> Result<Self> {
        let stream = lease
            .channel()
            .open_read_stream(ticket)
            .await
            .map_err(|e| {
                TesseraError::Connection(format!("server error opening read stream: {}", e))
            })?;
        let tag = stream.metadata().ontology_tag.clone();
        if !catalog.contains(&tag) {
            return Err(TesseraError::Validation(format!(
                "no ontology registered for tag '{}'; register it on the client catalog",
                tag
            )));
        }
        Ok(TopicDataStreamer {
            lease,
            state: TopicReadState::new(stream, catalog),
        })
    }

    /// The name of the topic this streamer reads.
    pub fn topic_name(&self) -> &str {
        self.state.topic_name()
    }

    pub fn ontology_tag(&self) -> &str {
        self.state.ontology_tag()
    }

    /// Peeks at the timestamp of the next record without consuming it.
    /// Repeated calls return the same value until [`TopicDataStreamer::next`]
    /// is called; `None` once the stream is exhausted.
    pub async fn peek_timestamp(&mut self) -> Result<Option<i64>> {
        self.state.peek_timestamp().await
    }

    /// Returns the next record in source order, or `None` when the stream
    /// is exhausted.
    pub async fn next(&mut self) -> Result<Option<AnyMessage>> {
        self.state.next().await
    }

    /// Releases the remote stream. Safe to call multiple times.
    pub async fn close(&mut self) {
        self.state.close().await;
    }

    /// Adapts the streamer into a [`Stream`] of records, closing the remote
    /// stream when exhausted.
    pub fn into_stream(self) -> impl Stream<Item = Result<AnyMessage>> {
        futures::stream::unfold(Some(self), |streamer| async move {
            let mut streamer = streamer?;
            match streamer.next().await {
                Ok(Some(message)) => Some((Ok(message), Some(streamer))),
                Ok(None) => {
                    streamer.close().await;
                    None
                }
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}
