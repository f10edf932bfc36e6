#![doc = include_str!("../README.md")]

pub mod collect;
pub mod config;
pub mod error;
pub mod measure;
pub mod rate;
pub mod source;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::{stream::FuturesUnordered, StreamExt};
use influxdb::{Timestamp, WriteQuery};
use tokio::time::MissedTickBehavior;

pub use collect::{collect, NamedMeasure, ALL_MEASURES, METRIC_GROUP};
pub use config::{InfluxConfig, MonitorConfig, Settings};
pub use error::{Error, MeasureError, Result};
pub use measure::Measure;
pub use rate::{RateTracker, RateTrackers};
pub use source::{ClusterClient, DocumentSource};

/// Shortest time between two polling cycles of a [`MonitorHandle`].
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Milliseconds since the unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}

/// Dispatch a single query to the database.
/// Will emmit a log record if an error occurs.
pub async fn dispatch(client: &influxdb::Client, query: WriteQuery) {
    if let Err(error) = client.query(query).await {
        tracing::error!("Failed to submit measure: {}", error);
    }
}

/// Dispatch many queries to the database.
/// These will be dispatched concurrently.
pub async fn dispatch_many<I>(client: &influxdb::Client, queries: I)
where
    I: IntoIterator<Item = WriteQuery>,
{
    queries
        .into_iter()
        .map(|query| dispatch(client, query))
        .collect::<FuturesUnordered<_>>()
        .collect::<()>()
        .await;
}

/// Receiver of the measures of each polling cycle.
#[async_trait]
pub trait MeasureSink: Send {
    /// Consume a measure taken at `timestamp` (milliseconds since the unix epoch).
    /// Besides the value, one sub-metric per dynamic value should be reported, tagged with
    /// the measure's dynamic name.
    fn accept(&mut self, timestamp: i64, group: &str, name: &str, measure: &Measure);

    /// Report all consumed measures.
    async fn flush(&mut self);
}

/// Reports measures to [influxdb].
///
/// Every measure becomes a point named after the metric, with a `group` tag and a `value`
/// field. Each dynamic value becomes an additional point tagged with the dynamic name and
/// its key, e.g. `Node=node-1`.
pub struct InfluxDbSink {
    client: influxdb::Client,
    /// Queries waiting for the next flush.
    pending: Vec<WriteQuery>,
}

impl InfluxDbSink {
    /// A sink writing to the given client, with nothing pending.
    pub fn new(client: influxdb::Client) -> Self {
        Self {
            client,
            pending: Vec::new(),
        }
    }

    /// Number of points waiting to be flushed.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn point(timestamp: i64, group: &str, name: &str, value: f64) -> WriteQuery {
        let timestamp = Timestamp::Milliseconds(timestamp.try_into().unwrap_or_default());

        WriteQuery::new(timestamp, name)
            .add_tag("group", group)
            .add_field("value", value)
    }
}

#[async_trait]
impl MeasureSink for InfluxDbSink {
    fn accept(&mut self, timestamp: i64, group: &str, name: &str, measure: &Measure) {
        let dynamic_values = measure.dynamic_values();

        tracing::debug!(
            "Setting measure '{}' to value {}, dynamic: {:?}",
            name,
            measure.value(),
            dynamic_values,
        );

        self.pending
            .push(Self::point(timestamp, group, name, measure.value()));

        if let Some(dimension) = measure.dynamic_name() {
            for (key, value) in dynamic_values {
                let point = Self::point(timestamp, group, name, value).add_tag(dimension, key);
                self.pending.push(point);
            }
        }
    }

    async fn flush(&mut self) {
        dispatch_many(&self.client, self.pending.drain(..)).await;
    }
}

/// Polls an Elasticsearch cluster and keeps the state needed for derived measures.
#[derive(Debug)]
pub struct Monitor<S = ClusterClient> {
    source: S,
    /// Rate trackers of all derived measures, kept across cycles.
    trackers: RateTrackers,
}

impl Monitor<ClusterClient> {
    /// A monitor polling the configured cluster over http.
    pub fn from_config(config: &MonitorConfig) -> Result<Self> {
        Ok(Self::new(ClusterClient::new(config)?))
    }
}

impl<S> Monitor<S>
where
    S: DocumentSource,
{
    /// A monitor reading from `source`, without any rate history.
    pub fn new(source: S) -> Self {
        Self {
            source,
            trackers: RateTrackers::per_second(),
        }
    }

    /// The rate trackers kept across cycles.
    pub fn trackers(&self) -> &RateTrackers {
        &self.trackers
    }

    /// Collect all measures, attributing counters to the given timestamp (milliseconds).
    pub async fn collect(&mut self, timestamp: i64) -> Result<Vec<NamedMeasure>> {
        collect::collect(&self.source, &mut self.trackers, timestamp).await
    }

    /// Run one polling cycle, handing every measure to the sink and flushing it.
    /// All measures of a cycle carry the same timestamp.
    pub async fn execute<K>(&mut self, sink: &mut K) -> Result<()>
    where
        K: MeasureSink + ?Sized,
    {
        tracing::info!("Executing Elasticsearch Monitor for {}", self.source.describe());

        let timestamp = now_millis();
        let measures = match self.collect(timestamp).await {
            Ok(measures) => measures,
            Err(error) => {
                tracing::warn!(
                    "Failed to run Elasticsearch Monitor for {}: {}",
                    self.source.describe(),
                    error
                );
                return Err(error);
            }
        };

        for named in &measures {
            sink.accept(timestamp, METRIC_GROUP, named.name, &named.measure);
        }

        sink.flush().await;

        Ok(())
    }
}

/// A handle to a running monitor.
/// Aborts the polling task when dropped.
#[derive(Debug)]
pub struct MonitorHandle {
    /// The polling task, which executes the monitor in an infinite loop.
    poll_task: tokio::task::JoinHandle<()>,
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.poll_task.abort(); // Prevent the task from leaking.
    }
}

impl MonitorHandle {
    /// Start the polling task.
    /// This task will run indefinitely, but will be aborted when the handle is dropped.
    /// A `poll_interval` below [`MIN_POLL_INTERVAL`] is raised to it.
    pub fn new<S, K>(monitor: Monitor<S>, sink: K, poll_interval: Duration) -> Self
    where
        S: DocumentSource + 'static,
        K: MeasureSink + 'static,
    {
        let task = Self::poll_loop(monitor, sink, poll_interval.max(MIN_POLL_INTERVAL));

        Self {
            poll_task: tokio::task::spawn(task),
        }
    }

    /// Monitor poll loop.
    /// This function will run indefinitely, so it must be placed inside a task so that it can
    /// be aborted when we're done. A failed cycle is logged and retried on the next tick.
    #[tracing::instrument(skip(monitor, sink))]
    async fn poll_loop<S, K>(mut monitor: Monitor<S>, mut sink: K, poll_interval: Duration)
    where
        S: DocumentSource,
        K: MeasureSink,
    {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!("Starting Elasticsearch Monitor loop");

        loop {
            interval.tick().await;

            // Failures are logged by the monitor.
            let _ = monitor.execute(&mut sink).await;
        }
    }
}
