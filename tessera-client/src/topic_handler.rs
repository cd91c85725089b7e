use std::sync::Arc;

use tessera_core::ontology::OntologyCatalog;
use tessera_core::transport::{
    ActionRequest, DataChannel, LocatorDescriptor, ResourceName, Ticket, TimeWindow,
    TopicSystemInfo,
};

use crate::connection_pool::ConnectionPool;
use crate::errors::{Result, TesseraError};
use crate::topic_reader::TopicDataStreamer;

/// Client-side handle for an existing topic on the platform.
///
/// Resolves the topic's endpoint and system diagnostics once, then serves
/// metadata lookups locally and spawns [`TopicDataStreamer`]s on demand.
///
/// Obtained from [`TesseraClient::topic_handler`](crate::TesseraClient::topic_handler).
pub struct TopicHandler {
    cnx_pool: Arc<ConnectionPool>,
    catalog: OntologyCatalog,
    resource: ResourceName,
    ontology_tag: String,
    user_metadata: serde_json::Value,
    ticket: Ticket,
    timestamp_ns_min: Option<i64>,
    timestamp_ns_max: Option<i64>,
    system_info: TopicSystemInfo,
}

impl TopicHandler {
    pub(crate) async fn connect(
        cnx_pool: Arc<ConnectionPool>,
        catalog: OntologyCatalog,
        sequence_name: &str,
        topic_name: &str,
    ) -> Result<Self> {
        let lease = cnx_pool.lease();
        let resolved = lease
            .channel()
            .resolve_locator(LocatorDescriptor {
                sequence: sequence_name.to_string(),
                topic: Some(topic_name.to_string()),
                window: TimeWindow::unbounded(),
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

        let resource = ResourceName::new(sequence_name, topic_name);
        let system_info = lease
            .channel()
            .create_resource(ActionRequest::TopicSystemInfo {
                resource: resource.clone(),
            })
            .await
            .map_err(TesseraError::from_lookup)?
            .system_info
            .ok_or_else(|| {
                TesseraError::Connection(format!(
                    "system-info action for '{}' returned no response",
                    resource
                ))
            })?;

        Ok(TopicHandler {
            cnx_pool,
            catalog,
            resource,
            ontology_tag: endpoint.ontology_tag,
            user_metadata: endpoint.user_metadata,
            ticket: endpoint.ticket,
            timestamp_ns_min: endpoint.timestamp_ns_min,
            timestamp_ns_max: endpoint.timestamp_ns_max,
            system_info,
        })
    }

    pub fn topic_name(&self) -> &str {
        &self.resource.topic
    }

    pub fn sequence_name(&self) -> &str {
        &self.resource.sequence
    }

    pub fn ontology_tag(&self) -> &str {
        &self.ontology_tag
    }

    pub fn user_metadata(&self) -> &serde_json::Value {
        &self.user_metadata
    }

    /// Storage diagnostics captured when the handler connected.
    pub fn system_info(&self) -> &TopicSystemInfo {
        &self.system_info
    }

    /// Lowest timestamp recorded in this topic; `None` when empty.
    pub fn timestamp_ns_min(&self) -> Option<i64> {
        self.timestamp_ns_min
    }

    /// Highest timestamp recorded in this topic; `None` when empty.
    pub fn timestamp_ns_max(&self) -> Option<i64> {
        self.timestamp_ns_max
    }

    /// Opens a reading channel over this topic's data.
    ///
    /// A bounded window is resolved through a fresh locator so the server
    /// performs the temporal slicing; the unbounded case reuses the ticket
    /// captured at connect time. The returned streamer owns its pooled
    /// channel and releases it when dropped.
    pub async fn data_streamer(&self, window: TimeWindow) -> Result<TopicDataStreamer> {
        if self.timestamp_ns_min.is_none() || self.timestamp_ns_max.is_none() {
            return Err(TesseraError::Validation(format!(
                "unable to stream topic '{}': the topic contains no data",
                self.resource
            )));
        }
        let lease = self.cnx_pool.lease();
        if window.is_unbounded() {
            TopicDataStreamer::connect_from_ticket(
                lease,
                self.catalog.clone(),
                self.ticket.clone(),
            )
            .await
        } else {
            TopicDataStreamer::connect(
                lease,
                self.catalog.clone(),
                &self.resource.sequence,
                &self.resource.topic,
                window,
            )
            .await
        }
    }
}
