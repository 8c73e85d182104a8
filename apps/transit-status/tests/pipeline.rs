//! Pipeline Integration Tests
//!
//! Drives producers, consumers, the supervisor and the aggregation service
//! against the in-process broker.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use transit_status::application::services::{JsonEventProducer, RecordHandler, StartupError};
use transit_status::domain::lines::Direction;
use transit_status::domain::records::{
    ArrivalEvent, Arrivals, ReducedStation, TimestampKey, TurnstileSummary, WeatherEvent,
    WeatherReadings,
};
use transit_status::domain::weather::WeatherStatus;
use transit_status::{
    AggregatedSnapshot, AggregationService, BrokerAdminPort, ConsumerSupervisor, EventProducer,
    InMemoryBroker, IngestRouter, LineColor, ProducerPort, SchemaGovernedCodec, SnapshotReader,
    StartupGate, SubscriptionConsumer, SubscriptionSpec, TopicCatalog, TopicPattern,
    TopicProvisioner, TopicSpec,
};

struct Pipeline {
    broker: Arc<InMemoryBroker>,
    catalog: TopicCatalog,
    codec: SchemaGovernedCodec,
    provisioner: TopicProvisioner,
}

impl Pipeline {
    fn new() -> Self {
        let broker = Arc::new(InMemoryBroker::new());
        let admin: Arc<dyn BrokerAdminPort> = broker.clone();
        Self {
            provisioner: TopicProvisioner::new(admin),
            broker,
            catalog: TopicCatalog::default(),
            codec: SchemaGovernedCodec::builtin().unwrap(),
        }
    }

    fn port(&self) -> Arc<dyn ProducerPort> {
        self.broker.clone()
    }

    fn spec(topic: &transit_status::TopicName) -> TopicSpec {
        TopicSpec::new(topic.clone(), 1, 1)
    }

    async fn json_producer(&self, topic: &transit_status::TopicName) -> JsonEventProducer {
        JsonEventProducer::create(&Self::spec(topic), &self.provisioner, self.port())
            .await
            .unwrap()
    }

    async fn publish_station(
        producer: &JsonEventProducer,
        id: i64,
        name: &str,
        order: i32,
        line: &str,
    ) {
        producer
            .publish(
                Some(&id.to_string()),
                &ReducedStation {
                    station_id: id,
                    station_name: name.to_string(),
                    order,
                    line: line.to_string(),
                },
            )
            .await
            .unwrap();
    }

    /// Start the aggregation service and the four status consumers.
    fn start(&self, root: &CancellationToken) -> (ConsumerSupervisor, SnapshotReader) {
        let (service, handler, reader) = AggregationService::new(
            IngestRouter::new(self.catalog.clone(), self.codec.clone()),
            64,
        );
        tokio::spawn(service.run(root.child_token()));

        let handler: Arc<dyn RecordHandler> = Arc::new(handler);
        let mut supervisor = ConsumerSupervisor::new(root);
        for (topic, structured) in [
            (&self.catalog.weather, true),
            (&self.catalog.reduced_stations, false),
            (&self.catalog.arrivals, true),
            (&self.catalog.turnstile_summary, false),
        ] {
            let pattern = TopicPattern::from(topic.clone());
            let spec = SubscriptionSpec::new(pattern, Arc::clone(&handler))
                .structured(structured)
                .reset_to_earliest(true)
                .with_timing(Duration::from_millis(5), Duration::from_millis(10));
            supervisor.add(SubscriptionConsumer::from_factory(
                spec,
                self.broker.as_ref(),
                self.codec.clone(),
            ));
        }
        supervisor.start_all();
        (supervisor, reader)
    }
}

async fn wait_for(
    reader: &SnapshotReader,
    done: impl Fn(&AggregatedSnapshot) -> bool,
) -> AggregatedSnapshot {
    timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = reader.snapshot();
            if done(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("snapshot did not converge")
}

#[tokio::test]
async fn retained_records_reach_the_snapshot() {
    let pipeline = Pipeline::new();

    let stations = pipeline.json_producer(&pipeline.catalog.reduced_stations).await;
    Pipeline::publish_station(&stations, 1, "A", 1, "red").await;
    Pipeline::publish_station(&stations, 2, "B", 2, "blue").await;

    let arrivals = EventProducer::<Arrivals>::create(
        &Pipeline::spec(&pipeline.catalog.arrivals),
        &pipeline.provisioner,
        pipeline.codec.clone(),
        pipeline.port(),
    )
    .await
    .unwrap();
    arrivals
        .publish(
            &TimestampKey::now(),
            &ArrivalEvent {
                station_id: 1,
                train_id: "RL001".to_string(),
                direction: "a".to_string(),
                line: "red".to_string(),
                train_status: "on_time".to_string(),
                prev_station_id: None,
                prev_direction: None,
            },
        )
        .await
        .unwrap();

    let weather = EventProducer::<WeatherReadings>::create(
        &Pipeline::spec(&pipeline.catalog.weather),
        &pipeline.provisioner,
        pipeline.codec.clone(),
        pipeline.port(),
    )
    .await
    .unwrap();
    weather
        .publish(
            &TimestampKey::now(),
            &WeatherEvent {
                temperature: 71.5,
                status: "sunny".to_string(),
            },
        )
        .await
        .unwrap();

    // Everything above was published before any consumer existed.
    let root = CancellationToken::new();
    let (supervisor, reader) = pipeline.start(&root);

    let snapshot = wait_for(&reader, |s| {
        s.red
            .station(1)
            .is_some_and(|e| e.name.is_some() && e.arrival(Direction::A).is_some())
            && s.blue.station(2).is_some()
            && s.weather.status.is_some()
    })
    .await;

    let a = snapshot.line(LineColor::Red).station(1).unwrap();
    assert_eq!(a.name.as_deref(), Some("A"));
    assert_eq!(a.order, Some(1));
    assert_eq!(a.arrival(Direction::A).unwrap().train_id, "RL001");
    assert!(snapshot.green.stations.is_empty());
    assert!(snapshot.line(LineColor::Blue).station(1).is_none());
    assert_eq!(snapshot.weather.status, Some(WeatherStatus::Sunny));

    // Summaries apply to stations the line already knows.
    let summary = pipeline.json_producer(&pipeline.catalog.turnstile_summary).await;
    summary
        .publish(None, &TurnstileSummary { station_id: 2, count: 17 })
        .await
        .unwrap();
    let snapshot = wait_for(&reader, |s| {
        s.blue.station(2).is_some_and(|e| e.turnstile_entries == 17)
    })
    .await;
    assert_eq!(snapshot.red.station(1).unwrap().turnstile_entries, 0);

    supervisor.stop_all().await;
    root.cancel();
    arrivals.close().await;
    weather.close().await;
}

#[tokio::test]
async fn last_delivered_topology_wins() {
    let pipeline = Pipeline::new();
    let root = CancellationToken::new();
    let (supervisor, reader) = pipeline.start(&root);

    let stations = pipeline.json_producer(&pipeline.catalog.reduced_stations).await;
    Pipeline::publish_station(&stations, 7, "Old Name", 3, "green").await;
    Pipeline::publish_station(&stations, 7, "New Name", 3, "green").await;

    let snapshot = wait_for(&reader, |s| {
        s.green
            .station(7)
            .is_some_and(|e| e.name.as_deref() == Some("New Name"))
    })
    .await;
    assert_eq!(snapshot.green.stations.len(), 1);

    supervisor.stop_all().await;
    root.cancel();
}

#[tokio::test]
async fn provisioning_existing_topic_succeeds_once() {
    let pipeline = Pipeline::new();
    let spec = Pipeline::spec(&pipeline.catalog.weather);
    pipeline.broker.create_topic_now(&spec);

    pipeline.provisioner.ensure(&spec).await.unwrap();
    pipeline.provisioner.ensure(&spec).await.unwrap();

    assert_eq!(pipeline.broker.create_calls(), 1);
    assert!(pipeline.provisioner.provisioned().contains(spec.name.as_str()));
}

#[tokio::test]
async fn startup_gate_reports_missing_summary() {
    let pipeline = Pipeline::new();
    pipeline
        .broker
        .create_topic_now(&Pipeline::spec(&pipeline.catalog.reduced_stations));

    let err = StartupGate::for_catalog(&pipeline.catalog)
        .verify(pipeline.broker.as_ref())
        .await
        .unwrap_err();
    assert!(matches!(err, StartupError::MissingUpstream { .. }));
    assert!(err.to_string().contains("TURNSTILE_SUMMARY"));
    assert!(err.to_string().contains("turnstile summary aggregation"));
}
