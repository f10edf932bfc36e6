// Polling cycles against a mocked cluster and a mocked influxdb.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use elasticsearch_monitor::collect::{
    MSR_DOCUMENT_COUNT, MSR_DOCUMENT_COUNT_PER_SECOND, MSR_MEM_MAX_HEAP, MSR_NODE_COUNT,
};
use elasticsearch_monitor::{
    InfluxDbSink, Measure, MeasureSink, Monitor, MonitorConfig, MonitorHandle, ALL_MEASURES,
    METRIC_GROUP,
};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// An accepted measure: timestamp, group, name and the measure itself.
type Accepted = (i64, String, String, Measure);

/// Keeps every accepted measure, shared with the test.
#[derive(Clone, Default)]
struct RecordingSink {
    accepted: Arc<Mutex<Vec<Accepted>>>,
    flushes: Arc<Mutex<usize>>,
}

impl RecordingSink {
    fn find(&self, name: &str) -> Measure {
        self.accepted
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(_, _, accepted, _)| accepted == name)
            .map(|(_, _, _, measure)| measure.clone())
            .unwrap_or_else(|| panic!("no measure {name}"))
    }
}

#[async_trait]
impl MeasureSink for RecordingSink {
    fn accept(&mut self, timestamp: i64, group: &str, name: &str, measure: &Measure) {
        self.accepted.lock().unwrap().push((
            timestamp,
            group.to_owned(),
            name.to_owned(),
            measure.clone(),
        ));
    }

    async fn flush(&mut self) {
        *self.flushes.lock().unwrap() += 1;
    }
}

async fn mount(server: &MockServer, endpoint: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(endpoint))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn cluster() -> MockServer {
    let server = MockServer::start().await;

    mount(
        &server,
        "/_cluster/health",
        json!({ "number_of_nodes": 1, "number_of_data_nodes": 1, "active_shards": 4 }),
    )
    .await;
    mount(
        &server,
        "/_nodes",
        json!({ "nodes": { "x1": { "name": "es-1", "jvm": { "mem": { "heap_max_in_bytes": 1024 } } } } }),
    )
    .await;
    mount(
        &server,
        "/_cluster/stats",
        json!({ "indices": { "count": 2, "docs": { "count": 1000, "deleted": 3 } } }),
    )
    .await;
    mount(
        &server,
        "/_nodes/stats",
        json!({ "nodes": { "x1": { "name": "es-1", "indices": { "store": { "size_in_bytes": 4096 } } } } }),
    )
    .await;

    server
}

fn config(url: String) -> MonitorConfig {
    MonitorConfig {
        timeout: 5_000,
        ..MonitorConfig::with_url(url)
    }
}

#[tokio::test]
async fn execute_reports_all_measures() {
    let server = cluster().await;
    let mut monitor = Monitor::from_config(&config(server.uri())).unwrap();
    let mut sink = RecordingSink::default();

    monitor.execute(&mut sink).await.unwrap();

    let accepted = sink.accepted.lock().unwrap().clone();
    assert!(accepted.iter().all(|(_, group, _, _)| group == METRIC_GROUP));
    for name in ALL_MEASURES {
        assert!(
            accepted.iter().any(|(_, _, accepted, _)| accepted == name),
            "{name} was not reported"
        );
    }
    assert_eq!(*sink.flushes.lock().unwrap(), 1);

    assert_eq!(sink.find(MSR_NODE_COUNT).value(), 1.0);
    assert_eq!(sink.find(MSR_DOCUMENT_COUNT).value(), 1000.0);
    assert_eq!(sink.find(MSR_MEM_MAX_HEAP).dynamic_values()["es-1"], 1024.0);
    assert_eq!(monitor.trackers().len(), 1);
}

#[tokio::test]
async fn measures_of_a_cycle_share_its_timestamp() {
    let server = cluster().await;
    let mut monitor = Monitor::from_config(&config(server.uri())).unwrap();
    let mut sink = RecordingSink::default();

    monitor.execute(&mut sink).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    monitor.execute(&mut sink).await.unwrap();

    let accepted = sink.accepted.lock().unwrap().clone();
    let (first, second) = accepted.split_at(accepted.len() / 2);
    assert_eq!(first.len(), second.len());

    let first_cycle = first[0].0;
    let second_cycle = second[0].0;
    assert!(first.iter().all(|(timestamp, _, _, _)| *timestamp == first_cycle));
    assert!(second.iter().all(|(timestamp, _, _, _)| *timestamp == second_cycle));
    assert!(second_cycle > first_cycle);
}

#[tokio::test]
async fn repeated_cycles_keep_rates_non_negative() {
    let server = cluster().await;
    let mut monitor = Monitor::from_config(&config(server.uri())).unwrap();
    let mut sink = RecordingSink::default();

    monitor.execute(&mut sink).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    monitor.execute(&mut sink).await.unwrap();

    // the document count did not change
    assert_eq!(sink.find(MSR_DOCUMENT_COUNT_PER_SECOND).value(), 0.0);
}

#[tokio::test]
async fn execute_fails_when_cluster_unavailable() {
    let server = MockServer::start().await;
    let mut monitor = Monitor::from_config(&config(server.uri())).unwrap();
    let mut sink = RecordingSink::default();

    assert!(monitor.execute(&mut sink).await.is_err());
    assert!(sink.accepted.lock().unwrap().is_empty());
    assert_eq!(*sink.flushes.lock().unwrap(), 0);
}

const TIMESTAMP: i64 = 1_700_000_000_000;

async fn influxdb() -> MockServer {
    let influx = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&influx)
        .await;

    influx
}

/// The line protocol bodies written to the mocked influxdb.
async fn written_lines(influx: &MockServer) -> Vec<String> {
    influx
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|request| String::from_utf8_lossy(&request.body).trim().to_owned())
        .collect()
}

fn store_size() -> Measure {
    let mut measure = Measure::dynamic_with_value("Node", 10.0);
    measure.add_dynamic_value("es-1", 4.0).unwrap();
    measure.add_dynamic_value("es-2", 6.0).unwrap();
    measure
}

fn find_line<'a>(lines: &'a [String], contains: &str) -> &'a str {
    let found: Vec<_> = lines.iter().filter(|line| line.contains(contains)).collect();
    assert_eq!(found.len(), 1, "expected one line with {contains}: {lines:?}");
    found[0]
}

#[tokio::test]
async fn influxdb_sink_writes_points() {
    let influx = influxdb().await;
    let mut sink = InfluxDbSink::new(influxdb::Client::new(influx.uri(), "elasticsearch"));

    sink.accept(TIMESTAMP, METRIC_GROUP, "StoreSize", &store_size());
    sink.flush().await;
    assert_eq!(sink.pending(), 0);

    let lines = written_lines(&influx).await;
    assert_eq!(lines.len(), 3);
    for line in &lines {
        assert!(line.starts_with(r"StoreSize,group=Elasticsearch\ Monitor"), "{line}");
        assert!(line.contains(&TIMESTAMP.to_string()), "{line}");
    }

    let base: Vec<_> = lines.iter().filter(|line| !line.contains("Node=")).collect();
    assert_eq!(base.len(), 1, "{lines:?}");
    assert!(base[0].contains(" value=10 "), "{}", base[0]);

    assert!(find_line(&lines, "Node=es-1").contains(" value=4 "));
    assert!(find_line(&lines, "Node=es-2").contains(" value=6 "));
}

#[tokio::test]
async fn influxdb_sink_writes_adjusted_values() {
    let influx = influxdb().await;
    let mut sink = InfluxDbSink::new(influxdb::Client::new(influx.uri(), "elasticsearch"));

    let mut measure = store_size();
    measure.set_adjustment_factor(2.0);
    sink.accept(TIMESTAMP, METRIC_GROUP, "StoreSize", &measure);
    sink.flush().await;

    let lines = written_lines(&influx).await;
    assert_eq!(lines.len(), 3);

    let base: Vec<_> = lines.iter().filter(|line| !line.contains("Node=")).collect();
    assert_eq!(base.len(), 1, "{lines:?}");
    assert!(base[0].contains(" value=20 "), "{}", base[0]);

    assert!(find_line(&lines, "Node=es-1").contains(" value=8 "));
    assert!(find_line(&lines, "Node=es-2").contains(" value=12 "));
}

#[tokio::test]
async fn handle_polls_until_dropped() {
    let server = cluster().await;
    let monitor = Monitor::from_config(&config(server.uri())).unwrap();
    let sink = RecordingSink::default();

    let handle = MonitorHandle::new(monitor, sink.clone(), Duration::from_secs(3600));
    tokio::time::sleep(Duration::from_millis(500)).await;
    drop(handle);

    // the first tick completes immediately
    assert_eq!(*sink.flushes.lock().unwrap(), 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 4);
}

#[tokio::test]
async fn handle_runs_with_zero_interval() {
    let server = cluster().await;
    let monitor = Monitor::from_config(&config(server.uri())).unwrap();
    let sink = RecordingSink::default();

    let handle = MonitorHandle::new(monitor, sink.clone(), Duration::ZERO);
    tokio::time::sleep(Duration::from_millis(500)).await;
    drop(handle);

    assert!(*sink.flushes.lock().unwrap() >= 1);
}
