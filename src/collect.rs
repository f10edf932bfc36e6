//! Mapping of the cluster's statistics documents to measures.

use serde_json::Value;

use crate::error::Result;
use crate::measure::Measure;
use crate::rate::RateTrackers;
use crate::source::{DocumentSource, CLUSTER_HEALTH, CLUSTER_STATS, NODES, NODE_STATS};

/// The metric group of all measures.
pub const METRIC_GROUP: &str = "Elasticsearch Monitor";

pub const MSR_NODE_COUNT: &str = "NodeCount";
pub const MSR_DATA_NODE_COUNT: &str = "DataNodeCount";

pub const MSR_ACTIVE_PRIMARY_SHARDS: &str = "ActivePrimaryShards";
pub const MSR_ACTIVE_SHARDS_PERCENT: &str = "ActiveShardsPercent";
pub const MSR_ACTIVE_SHARDS: &str = "ActiveShards";
pub const MSR_RELOCATING_SHARDS: &str = "RelocatingShards";
pub const MSR_INITIALIZING_SHARDS: &str = "InitializingShards";
pub const MSR_UNASSIGNED_SHARDS: &str = "UnassignedShards";
pub const MSR_DELAYED_UNASSIGNED_SHARDS: &str = "DelayedUnassignedShards";

pub const MSR_MEM_INIT_HEAP: &str = "InitHeap";
pub const MSR_MEM_MAX_HEAP: &str = "MaxHeap";
pub const MSR_MEM_INIT_NON_HEAP: &str = "InitNonHeap";
pub const MSR_MEM_MAX_NON_HEAP: &str = "MaxNonHeap";
pub const MSR_MEM_MAX_DIRECT: &str = "MaxDirect";

pub const MSR_INDEX_COUNT: &str = "IndexCount";
pub const MSR_SHARD_COUNT: &str = "ShardCount";

pub const MSR_DOCUMENT_COUNT: &str = "DocCount";
pub const MSR_DOCUMENT_COUNT_PER_SECOND: &str = "DocCountPerSecond";
pub const MSR_DELETED_COUNT: &str = "DeletedCount";

pub const MSR_STORE_SIZE: &str = "StoreSize";
pub const MSR_STORE_THROTTLE_TIME: &str = "StoreThrottleTime";
pub const MSR_INDEXING_THROTTLE_TIME: &str = "IndexingThrottleTime";
pub const MSR_INDEXING_CURRENT: &str = "IndexingCurrent";
pub const MSR_DELETE_CURRENT: &str = "DeleteCurrent";
pub const MSR_QUERY_CURRENT: &str = "QueryCurrent";
pub const MSR_FETCH_CURRENT: &str = "FetchCurrent";
pub const MSR_SCROLL_CURRENT: &str = "ScrollCurrent";
pub const MSR_QUERY_CACHE_SIZE: &str = "QueryCacheSize";
pub const MSR_FIELD_DATA_SIZE: &str = "FieldDataSize";
pub const MSR_FIELD_DATA_EVICTIONS: &str = "FieldDataEvictions";
pub const MSR_PERCOLATE_SIZE: &str = "PercolateSize";
pub const MSR_TRANSLOG_SIZE: &str = "TranslogSize";
pub const MSR_REQUEST_CACHE_SIZE: &str = "RequestCacheSize";
pub const MSR_RECOVERY_THROTTLE_TIME: &str = "RecoveryThrottleTime";
pub const MSR_RECOVERY_AS_SOURCE: &str = "RecoveryAsSource";
pub const MSR_RECOVERY_AS_TARGET: &str = "RecoveryAsTarget";

pub const MSR_COMPLETION_SIZE: &str = "CompletionSize";
pub const MSR_SEGMENT_COUNT: &str = "SegmentCount";
pub const MSR_SEGMENT_SIZE: &str = "SegmentSize";
pub const MSR_FILE_DESCRIPTOR_COUNT: &str = "FileDescriptorCount";
pub const MSR_FILE_SYSTEM_SIZE: &str = "FileSystemSize";
pub const MSR_PERCOLATE_COUNT: &str = "PercolateCount";

/// Every measure the collector reports.
pub const ALL_MEASURES: &[&str] = &[
    MSR_NODE_COUNT,
    MSR_DATA_NODE_COUNT,
    MSR_ACTIVE_PRIMARY_SHARDS,
    MSR_ACTIVE_SHARDS_PERCENT,
    MSR_ACTIVE_SHARDS,
    MSR_RELOCATING_SHARDS,
    MSR_INITIALIZING_SHARDS,
    MSR_UNASSIGNED_SHARDS,
    MSR_DELAYED_UNASSIGNED_SHARDS,
    MSR_MEM_INIT_HEAP,
    MSR_MEM_MAX_HEAP,
    MSR_MEM_INIT_NON_HEAP,
    MSR_MEM_MAX_NON_HEAP,
    MSR_MEM_MAX_DIRECT,
    MSR_INDEX_COUNT,
    MSR_SHARD_COUNT,
    MSR_DOCUMENT_COUNT,
    MSR_DOCUMENT_COUNT_PER_SECOND,
    MSR_DELETED_COUNT,
    MSR_STORE_SIZE,
    MSR_STORE_THROTTLE_TIME,
    MSR_INDEXING_THROTTLE_TIME,
    MSR_INDEXING_CURRENT,
    MSR_DELETE_CURRENT,
    MSR_QUERY_CURRENT,
    MSR_FETCH_CURRENT,
    MSR_SCROLL_CURRENT,
    MSR_QUERY_CACHE_SIZE,
    MSR_FIELD_DATA_SIZE,
    MSR_FIELD_DATA_EVICTIONS,
    MSR_PERCOLATE_SIZE,
    MSR_TRANSLOG_SIZE,
    MSR_REQUEST_CACHE_SIZE,
    MSR_RECOVERY_THROTTLE_TIME,
    MSR_RECOVERY_AS_SOURCE,
    MSR_RECOVERY_AS_TARGET,
    MSR_COMPLETION_SIZE,
    MSR_SEGMENT_COUNT,
    MSR_SEGMENT_SIZE,
    MSR_FILE_DESCRIPTOR_COUNT,
    MSR_FILE_SYSTEM_SIZE,
    MSR_PERCOLATE_COUNT,
];

const DIMENSION_NODE: &str = "Node";
const DIMENSION_STATE: &str = "State";
const DIMENSION_STAT: &str = "Stat";

/// Plain measures of the cluster health document.
const CLUSTER_HEALTH_FIELDS: &[(&str, &str)] = &[
    (MSR_NODE_COUNT, "number_of_nodes"),
    (MSR_DATA_NODE_COUNT, "number_of_data_nodes"),
    (MSR_ACTIVE_PRIMARY_SHARDS, "active_primary_shards"),
    (MSR_ACTIVE_SHARDS, "active_shards"),
    (MSR_ACTIVE_SHARDS_PERCENT, "active_shards_percent_as_number"),
    (MSR_RELOCATING_SHARDS, "relocating_shards"),
    (MSR_INITIALIZING_SHARDS, "initializing_shards"),
    (MSR_UNASSIGNED_SHARDS, "unassigned_shards"),
    (MSR_DELAYED_UNASSIGNED_SHARDS, "delayed_unassigned_shards"),
];

/// Per node measures of the nodes document.
const NODE_FIELDS: &[(&str, &[&str])] = &[
    (MSR_MEM_INIT_HEAP, &["jvm", "mem", "heap_init_in_bytes"]),
    (MSR_MEM_MAX_HEAP, &["jvm", "mem", "heap_max_in_bytes"]),
    (MSR_MEM_INIT_NON_HEAP, &["jvm", "mem", "non_heap_init_in_bytes"]),
    (MSR_MEM_MAX_NON_HEAP, &["jvm", "mem", "non_heap_max_in_bytes"]),
    (MSR_MEM_MAX_DIRECT, &["jvm", "mem", "direct_max_in_bytes"]),
];

/// Per node measures of the node stats document.
const NODE_STATS_FIELDS: &[(&str, &[&str])] = &[
    (MSR_STORE_SIZE, &["indices", "store", "size_in_bytes"]),
    (MSR_STORE_THROTTLE_TIME, &["indices", "store", "throttle_time_in_millis"]),
    (MSR_INDEXING_THROTTLE_TIME, &["indices", "indexing", "throttle_time_in_millis"]),
    (MSR_INDEXING_CURRENT, &["indices", "indexing", "index_current"]),
    (MSR_DELETE_CURRENT, &["indices", "indexing", "delete_current"]),
    (MSR_QUERY_CURRENT, &["indices", "search", "query_current"]),
    (MSR_FETCH_CURRENT, &["indices", "search", "fetch_current"]),
    (MSR_SCROLL_CURRENT, &["indices", "search", "scroll_current"]),
    (MSR_QUERY_CACHE_SIZE, &["indices", "query_cache", "memory_size_in_bytes"]),
    (MSR_FIELD_DATA_SIZE, &["indices", "fielddata", "memory_size_in_bytes"]),
    (MSR_PERCOLATE_SIZE, &["indices", "percolate", "memory_size_in_bytes"]),
    (MSR_TRANSLOG_SIZE, &["indices", "translog", "size_in_bytes"]),
    (MSR_REQUEST_CACHE_SIZE, &["indices", "request_cache", "memory_size_in_bytes"]),
    (MSR_RECOVERY_THROTTLE_TIME, &["indices", "recovery", "throttle_time_in_millis"]),
    (MSR_RECOVERY_AS_SOURCE, &["indices", "recovery", "current_as_source"]),
    (MSR_RECOVERY_AS_TARGET, &["indices", "recovery", "current_as_target"]),
];

const QUERY_CACHE_STATES: &[&str] = &[
    "total_count",
    "hit_count",
    "miss_count",
    "cache_size",
    "cache_count",
    "evictions",
];

const SEGMENT_STATES: &[&str] = &[
    "count",
    "memory_in_bytes",
    "terms_memory_in_bytes",
    "stored_fields_memory_in_bytes",
    "term_vectors_memory_in_bytes",
    "norms_memory_in_bytes",
    "doc_values_memory_in_bytes",
    "index_writer_memory_in_bytes",
    "index_writer_max_memory_in_bytes",
    "version_map_memory_in_bytes",
    "fixed_bit_set_memory_in_bytes",
];

const PERCOLATE_STATES: &[&str] = &[
    "total",
    "time_in_millis",
    "current",
    "memory_size_in_bytes",
    "queries",
];

const FILE_DESCRIPTOR_STATS: &[&str] = &["min", "max", "avg"];

const FILE_SYSTEM_STATS: &[&str] = &["total_in_bytes", "free_in_bytes", "available_in_bytes"];

/// A measure together with its metric name.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedMeasure {
    pub name: &'static str,
    pub measure: Measure,
}

impl NamedMeasure {
    fn new(name: &'static str, measure: Measure) -> Self {
        Self { name, measure }
    }
}

/// Run one collection cycle: fetch all documents and map them to measures.
///
/// `timestamp` (milliseconds) is the time the counters are attributed to. Fails on the
/// first document that cannot be fetched or parsed. Fields missing from a document are
/// skipped.
pub async fn collect<S>(
    source: &S,
    trackers: &mut RateTrackers,
    timestamp: i64,
) -> Result<Vec<NamedMeasure>>
where
    S: DocumentSource + ?Sized,
{
    let mut measures = Vec::with_capacity(ALL_MEASURES.len());

    let health = source.fetch(CLUSTER_HEALTH).await?;
    measures.extend(cluster_health(&health));

    let nodes = source.fetch(NODES).await?;
    measures.extend(per_node(&nodes, NODE_FIELDS)?);

    let stats = source.fetch(CLUSTER_STATS).await?;
    measures.extend(cluster_stats(&stats, trackers, timestamp)?);

    let node_stats = source.fetch(NODE_STATS).await?;
    measures.extend(per_node(&node_stats, NODE_STATS_FIELDS)?);

    Ok(measures)
}

/// Look up a number by its path of object keys.
fn number(node: &Value, path: &[&str]) -> Option<f64> {
    path.iter()
        .try_fold(node, |node, key| node.get(key))?
        .as_f64()
}

/// Add the named field of `node` as dynamic value, if present.
fn add_dynamic_field(measure: &mut Measure, node: &Value, field: &str) -> Result<()> {
    if let Some(value) = number(node, &[field]) {
        measure.add_dynamic_value(field, value)?;
    }
    Ok(())
}

fn add_dynamic_fields(measure: &mut Measure, node: &Value, fields: &[&str]) -> Result<()> {
    fields
        .iter()
        .try_for_each(|field| add_dynamic_field(measure, node, field))
}

fn set_if_present(measure: &mut Measure, node: &Value, path: &[&str]) {
    if let Some(value) = number(node, path) {
        measure.set_value(value);
    }
}

fn plain(node: &Value, name: &'static str, path: &[&str]) -> NamedMeasure {
    let mut measure = Measure::new();
    set_if_present(&mut measure, node, path);
    NamedMeasure::new(name, measure)
}

fn cluster_health(health: &Value) -> Vec<NamedMeasure> {
    CLUSTER_HEALTH_FIELDS
        .iter()
        .map(|&(name, field)| plain(health, name, &[field]))
        .collect()
}

/// Sum up the given fields over all nodes, with one dynamic value per node name.
fn per_node(document: &Value, fields: &[(&'static str, &[&str])]) -> Result<Vec<NamedMeasure>> {
    let mut measures: Vec<_> = fields
        .iter()
        .map(|&(name, _)| NamedMeasure::new(name, Measure::dynamic(DIMENSION_NODE)))
        .collect();

    let nodes = document
        .get("nodes")
        .and_then(Value::as_object)
        .into_iter()
        .flatten();

    for (id, node) in nodes {
        let node_name = match node.get("name").and_then(Value::as_str) {
            Some(name) if !name.is_empty() => name,
            _ => {
                tracing::debug!("Node {} has no name, using its id", id);
                id.as_str()
            }
        };

        for (named, &(_, path)) in measures.iter_mut().zip(fields) {
            if let Some(value) = number(node, path) {
                named.measure.add_value(value);
                named.measure.add_dynamic_value(node_name, value)?;
            }
        }
    }

    Ok(measures)
}

fn cluster_stats(
    stats: &Value,
    trackers: &mut RateTrackers,
    timestamp: i64,
) -> Result<Vec<NamedMeasure>> {
    let mut measures = Vec::new();
    let empty = Value::Null;
    let indices = stats.get("indices").unwrap_or(&empty);

    measures.push(plain(indices, MSR_INDEX_COUNT, &["count"]));

    let shards = indices.get("shards").unwrap_or(&empty);
    let mut shard_count = Measure::dynamic(DIMENSION_STATE);
    set_if_present(&mut shard_count, shards, &["total"]);
    if let Some(primaries) = number(shards, &["primaries"]) {
        shard_count.add_dynamic_value("primary", primaries)?;
    }
    if let Some(replication) = number(shards, &["replication"]) {
        shard_count.add_dynamic_value("replicationFactor", replication)?;
    }
    measures.push(NamedMeasure::new(MSR_SHARD_COUNT, shard_count));

    measures.push(plain(indices, MSR_DOCUMENT_COUNT, &["docs", "count"]));
    measures.push(plain(indices, MSR_DELETED_COUNT, &["docs", "deleted"]));

    if let Some(count) = number(indices, &["docs", "count"]) {
        let rate = trackers
            .record(MSR_DOCUMENT_COUNT, count, timestamp)?
            .derived_rate()
            .value();

        // throughput is reported as non-negative, a shrinking index counts as zero
        if rate.is_finite() {
            measures.push(NamedMeasure::new(
                MSR_DOCUMENT_COUNT_PER_SECOND,
                Measure::with_value(rate.max(0.0)),
            ));
        } else {
            tracing::debug!("Skipping {} without elapsed time", MSR_DOCUMENT_COUNT_PER_SECOND);
        }
    }

    measures.push(plain(indices, MSR_FIELD_DATA_SIZE, &["fielddata", "memory_size_in_bytes"]));
    measures.push(plain(indices, MSR_FIELD_DATA_EVICTIONS, &["fielddata", "evictions"]));

    let query_cache = indices.get("query_cache").unwrap_or(&empty);
    let mut query_cache_per_state = Measure::dynamic(DIMENSION_STATE);
    set_if_present(&mut query_cache_per_state, query_cache, &["memory_size_in_bytes"]);
    add_dynamic_fields(&mut query_cache_per_state, query_cache, QUERY_CACHE_STATES)?;
    measures.push(NamedMeasure::new(MSR_QUERY_CACHE_SIZE, query_cache_per_state));

    measures.push(plain(indices, MSR_COMPLETION_SIZE, &["completion", "size_in_bytes"]));
    measures.push(plain(indices, MSR_SEGMENT_COUNT, &["segments", "count"]));

    let segments = indices.get("segments").unwrap_or(&empty);
    let mut segment_size = Measure::dynamic(DIMENSION_STATE);
    add_dynamic_fields(&mut segment_size, segments, SEGMENT_STATES)?;
    measures.push(NamedMeasure::new(MSR_SEGMENT_SIZE, segment_size));

    let percolate = indices.get("percolate").unwrap_or(&empty);
    let mut percolate_per_state = Measure::dynamic(DIMENSION_STATE);
    set_if_present(&mut percolate_per_state, percolate, &["current"]);
    add_dynamic_fields(&mut percolate_per_state, percolate, PERCOLATE_STATES)?;
    measures.push(NamedMeasure::new(MSR_PERCOLATE_COUNT, percolate_per_state));

    let nodes = stats.get("nodes").unwrap_or(&empty);

    let file_descriptors = nodes
        .get("process")
        .and_then(|process| process.get("open_file_descriptors"))
        .unwrap_or(&empty);
    let mut file_descriptor_count = Measure::dynamic(DIMENSION_STAT);
    set_if_present(&mut file_descriptor_count, file_descriptors, &["max"]);
    add_dynamic_fields(&mut file_descriptor_count, file_descriptors, FILE_DESCRIPTOR_STATS)?;
    measures.push(NamedMeasure::new(MSR_FILE_DESCRIPTOR_COUNT, file_descriptor_count));

    let fs = nodes.get("fs").unwrap_or(&empty);
    let mut file_system_size = Measure::dynamic(DIMENSION_STAT);
    set_if_present(&mut file_system_size, fs, &["free_in_bytes"]);
    add_dynamic_fields(&mut file_system_size, fs, FILE_SYSTEM_STATS)?;
    measures.push(NamedMeasure::new(MSR_FILE_SYSTEM_SIZE, file_system_size));

    Ok(measures)
}
