#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use tessera_core::batch::RecordBatch;
#[cfg(test)]
use tessera_core::message::Message;
#[cfg(test)]
use tessera_core::ontology::OntologyCatalog;
#[cfg(test)]
use tessera_core::sensors::Temperature;
#[cfg(test)]
use tessera_core::transport::memory::MemoryDataService;
#[cfg(test)]
use tessera_core::transport::{
    ActionRequest, ChannelFactory, DataChannel, RecordWriteStream, ResourceName, TimeWindow,
    TopicSchema, WriteLocator,
};

#[cfg(test)]
use crate::connection_pool::ConnectionPool;
#[cfg(test)]
use crate::errors::TesseraError;
#[cfg(test)]
use crate::topic_reader::TopicDataStreamer;

#[cfg(test)]
async fn seed_temperatures(
    service: &MemoryDataService,
    topic: &str,
    timestamps: &[i64],
) {
    let channel = service.channel();
    let key = channel
        .create_resource(ActionRequest::SequenceCreate {
            name: "seq".into(),
            user_metadata: serde_json::Value::Null,
        })
        .await
        .unwrap()
        .key
        .unwrap();

    let schema = Message::<Temperature>::combined_schema().unwrap();
    let mut stream = channel
        .open_write_stream(
            WriteLocator {
                resource: ResourceName::new("seq", topic),
                key,
            },
            TopicSchema {
                ontology_tag: "temperature".into(),
                record_schema: schema.clone(),
                user_metadata: serde_json::Value::Null,
            },
        )
        .await
        .unwrap();
    let rows = timestamps
        .iter()
        .map(|ts| Message::new(*ts, Temperature::new(290.0 + *ts as f64)).to_row())
        .collect();
    stream
        .write_batch(RecordBatch::from_rows(Arc::new(schema), rows).unwrap())
        .await
        .unwrap();
    stream.close().await.unwrap();
}

#[cfg(test)]
async fn pool_over(service: &MemoryDataService) -> ConnectionPool {
    let factory: Arc<dyn ChannelFactory> = Arc::new(service.clone());
    ConnectionPool::connect(&factory, 2).await.unwrap()
}

#[tokio::test]
async fn peek_is_idempotent_until_consumed() {
    let service = MemoryDataService::new();
    seed_temperatures(&service, "/temp", &[10, 20, 30]).await;
    let pool = pool_over(&service).await;

    let mut streamer = TopicDataStreamer::connect(
        pool.lease(),
        OntologyCatalog::with_builtins(),
        "seq",
        "/temp",
        TimeWindow::unbounded(),
    )
    .await
    .unwrap();

    for _ in 0..5 {
        assert_eq!(streamer.peek_timestamp().await.unwrap(), Some(10));
    }
    let first = streamer.next().await.unwrap().unwrap();
    assert_eq!(first.timestamp_ns, 10);
    assert_eq!(streamer.peek_timestamp().await.unwrap(), Some(20));
    streamer.close().await;
}

#[tokio::test]
async fn records_arrive_in_source_order_until_exhaustion() {
    let service = MemoryDataService::new();
    seed_temperatures(&service, "/temp", &[10, 20, 30]).await;
    let pool = pool_over(&service).await;

    let mut streamer = TopicDataStreamer::connect(
        pool.lease(),
        OntologyCatalog::with_builtins(),
        "seq",
        "/temp",
        TimeWindow::unbounded(),
    )
    .await
    .unwrap();
    assert_eq!(streamer.topic_name(), "/temp");
    assert_eq!(streamer.ontology_tag(), "temperature");

    let mut seen = Vec::new();
    while let Some(message) = streamer.next().await.unwrap() {
        assert!(message.payload::<Temperature>().is_some());
        seen.push(message.timestamp_ns);
    }
    assert_eq!(seen, vec![10, 20, 30]);

    // exhaustion is a sticky end-of-stream signal, not an error
    assert!(streamer.next().await.unwrap().is_none());
    assert_eq!(streamer.peek_timestamp().await.unwrap(), None);
    streamer.close().await;
    // close is safe to repeat
    streamer.close().await;
}

#[tokio::test]
async fn window_slicing_is_inclusive_exclusive() {
    let service = MemoryDataService::new();
    seed_temperatures(&service, "/temp", &[10, 20, 30, 40, 50]).await;
    let pool = pool_over(&service).await;

    let mut streamer = TopicDataStreamer::connect(
        pool.lease(),
        OntologyCatalog::with_builtins(),
        "seq",
        "/temp",
        TimeWindow::new(Some(20), Some(40)),
    )
    .await
    .unwrap();

    let mut seen = Vec::new();
    while let Some(message) = streamer.next().await.unwrap() {
        seen.push(message.timestamp_ns);
    }
    assert_eq!(seen, vec![20, 30]);
    streamer.close().await;
}

#[tokio::test]
async fn missing_topic_is_not_found() {
    let service = MemoryDataService::new();
    seed_temperatures(&service, "/temp", &[10]).await;
    let pool = pool_over(&service).await;

    let err = TopicDataStreamer::connect(
        pool.lease(),
        OntologyCatalog::with_builtins(),
        "seq",
        "/absent",
        TimeWindow::unbounded(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TesseraError::NotFound(_)));

    let err = TopicDataStreamer::connect(
        pool.lease(),
        OntologyCatalog::with_builtins(),
        "ghost-sequence",
        "/temp",
        TimeWindow::unbounded(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TesseraError::NotFound(_)));
}

#[tokio::test]
async fn unregistered_tag_is_rejected() {
    let service = MemoryDataService::new();
    seed_temperatures(&service, "/temp", &[10]).await;
    let pool = pool_over(&service).await;

    let err = TopicDataStreamer::connect(
        pool.lease(),
        OntologyCatalog::new(),
        "seq",
        "/temp",
        TimeWindow::unbounded(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TesseraError::Validation(_)));
}

#[tokio::test]
async fn streamer_releases_its_pooled_channel() {
    let service = MemoryDataService::new();
    seed_temperatures(&service, "/temp", &[10]).await;
    let pool = pool_over(&service).await;

    let streamer = TopicDataStreamer::connect(
        pool.lease(),
        OntologyCatalog::with_builtins(),
        "seq",
        "/temp",
        TimeWindow::unbounded(),
    )
    .await
    .unwrap();
    assert_eq!(pool.active_leases(), 1);
    drop(streamer);
    assert_eq!(pool.active_leases(), 0);
}
