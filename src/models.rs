//! Typed records derived from raw server documents.
//!
//! Every field's presence or absence is part of the type. All document
//! parsing happens here, at the proxy boundary; nothing above it touches
//! raw BSON.

use mongodb::bson::{Bson, Document};

use crate::rates::RateTracker;

// ---------------------------------------------------------------------------
// Document access helpers
// ---------------------------------------------------------------------------

/// Walks a dotted path of subdocuments down to a terminal value.
fn field<'a>(doc: &'a Document, path: &[&str]) -> Option<&'a Bson> {
    let (last, dirs) = path.split_last()?;
    let mut current = doc;
    for dir in dirs {
        current = current.get_document(dir).ok()?;
    }
    current.get(*last)
}

/// Numeric coercion across the integer and double BSON types.
fn numeric(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

fn num(doc: &Document, path: &[&str]) -> Option<f64> {
    field(doc, path).and_then(numeric)
}

fn int(doc: &Document, path: &[&str]) -> Option<i64> {
    num(doc, path).map(|v| v as i64)
}

/// Gauge read: absent or non-numeric values count as zero.
fn gauge(doc: &Document, path: &[&str]) -> u64 {
    num(doc, path).map(|v| v.max(0.0) as u64).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Status snapshot
// ---------------------------------------------------------------------------

/// Derived per-server status for one poll cycle.
///
/// Rate fields are `None` on the first poll and whenever the source omits
/// the underlying counter; gauges default to zero when absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    pub queries_per_sec: Option<u64>,
    pub active_clients: u64,
    pub current_queue: u64,
    pub flushes_per_sec: Option<u64>,
    pub current_conn: u64,
    pub total_conn: u64,
    pub bytes_in_per_sec: Option<u64>,
    pub bytes_out_per_sec: Option<u64>,
    pub resident_mem: u64,
    pub mapped_mem: u64,
    pub page_faults_per_sec: Option<u64>,
}

impl StatusSnapshot {
    /// Derives a snapshot from a `serverStatus` document.
    ///
    /// The caller must have started the tracker's poll cycle already so that
    /// every counter shares the same elapsed-time denominator.
    pub fn derive(doc: &Document, rates: &mut RateTracker) -> StatusSnapshot {
        let mut rate = |key: &str, value: Option<f64>| -> Option<u64> {
            let value = value?;
            rates.per_second(key, value).map(|r| r.round().max(0.0) as u64)
        };

        let ops_total = doc
            .get_document("opcounters")
            .ok()
            .map(|counters| counters.values().filter_map(numeric).sum::<f64>());

        StatusSnapshot {
            queries_per_sec: rate("qps", ops_total),
            flushes_per_sec: rate("flushes", num(doc, &["backgroundFlushing", "flushes"])),
            bytes_in_per_sec: rate("bytes_in", num(doc, &["network", "bytesIn"])),
            bytes_out_per_sec: rate("bytes_out", num(doc, &["network", "bytesOut"])),
            page_faults_per_sec: rate("page_faults", num(doc, &["extra_info", "page_faults"])),
            active_clients: gauge(doc, &["globalLock", "activeClients", "total"]),
            current_queue: gauge(doc, &["globalLock", "currentQueue", "total"]),
            current_conn: gauge(doc, &["connections", "current"]),
            total_conn: gauge(doc, &["connections", "available"])
                + gauge(doc, &["connections", "current"]),
            // Megabytes on the wire, bytes in the snapshot.
            resident_mem: gauge(doc, &["mem", "resident"]) * 1_000_000,
            mapped_mem: gauge(doc, &["mem", "mapped"]) * 1_000_000,
        }
    }
}

// ---------------------------------------------------------------------------
// In-flight operations
// ---------------------------------------------------------------------------

/// One in-flight unit of work on a server, fresh each poll.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRecord {
    /// Server-scoped identifier; unique only as `(server, opid)`.
    pub opid: i64,
    pub client: Option<String>,
    /// Operation kind reported by the server (`query`, `getmore`, ...).
    pub state: String,
    /// Background and system operations carry no duration.
    pub duration_secs: Option<i64>,
    pub namespace: Option<String>,
    /// Present only for query-shaped operations.
    pub query: Option<QueryPayload>,
}

impl OperationRecord {
    /// Parses one entry of a `currentOp` reply. Entries without an opid are
    /// not actionable and are dropped.
    pub fn from_document(doc: &Document) -> Option<OperationRecord> {
        Some(OperationRecord {
            opid: int(doc, &["opid"])?,
            client: doc.get_str("client").ok().map(str::to_string),
            state: doc.get_str("op").unwrap_or_default().to_string(),
            duration_secs: int(doc, &["secs_running"]),
            namespace: doc.get_str("ns").ok().map(str::to_string),
            query: doc.get("query").and_then(QueryPayload::from_bson),
        })
    }

    /// Heuristic for internal replication plumbing: oplog tailing on the
    /// master, source-tracking operations on the slave. Display convenience
    /// only; misclassification is acceptable.
    pub fn is_replication_noise(&self) -> bool {
        let namespace = self.namespace.as_deref().unwrap_or("");
        if self.state == "getmore" && namespace.contains("local.oplog.") {
            return true;
        }
        !self.state.is_empty() && (namespace.is_empty() || namespace == "local.sources")
    }
}

// ---------------------------------------------------------------------------
// Query payloads
// ---------------------------------------------------------------------------

/// Structured payload of a query-shaped operation.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryPayload {
    /// Degenerate payload: the server sent only a message string.
    Message(String),
    /// A find-shaped payload that can round-trip into an explain.
    Find(FindPayload),
}

/// The parts of a find: filter, ordering, and the explain marker.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FindPayload {
    pub filter: Document,
    /// Ordered `(key, direction)` pairs from the `orderby` part.
    pub sort: Vec<(String, Bson)>,
    pub explain: bool,
}

impl QueryPayload {
    pub fn from_bson(value: &Bson) -> Option<QueryPayload> {
        match value {
            Bson::String(text) => Some(QueryPayload::Message(text.clone())),
            Bson::Document(doc) => {
                if let Ok(message) = doc.get_str("$msg") {
                    return Some(QueryPayload::Message(message.to_string()));
                }
                if doc.contains_key("query") || doc.contains_key("$query") {
                    Some(QueryPayload::Find(FindPayload::from_parts(doc)))
                } else {
                    // The whole document is the filter.
                    Some(QueryPayload::Find(FindPayload {
                        filter: doc.clone(),
                        ..Default::default()
                    }))
                }
            }
            _ => None,
        }
    }

    /// Single-line rendering for the operations table.
    pub fn compact(&self) -> String {
        match self {
            QueryPayload::Message(text) => text.clone(),
            QueryPayload::Find(find) => {
                let mut out = find.filter.to_string();
                if !find.sort.is_empty() {
                    let pairs: Vec<String> = find
                        .sort
                        .iter()
                        .map(|(key, dir)| format!("{}: {}", key, dir))
                        .collect();
                    out.push_str(&format!(" orderby {{ {} }}", pairs.join(", ")));
                }
                out
            }
        }
    }
}

impl FindPayload {
    /// Normalizes the dollar-prefixed wrapper form: `query`/`$query` is the
    /// filter, `orderby`/`$orderby` the sort, `$explain` a marker.
    fn from_parts(doc: &Document) -> FindPayload {
        let part = |name: &str| -> Option<&Bson> {
            doc.get(name).or_else(|| doc.get(format!("${}", name).as_str()))
        };
        let filter = match part("query") {
            Some(Bson::Document(d)) => d.clone(),
            _ => Document::new(),
        };
        let sort = match part("orderby") {
            Some(Bson::Document(d)) => d.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => Vec::new(),
        };
        FindPayload {
            filter,
            sort,
            explain: part("explain").is_some(),
        }
    }

    /// Multi-line description for the inspect flow.
    pub fn describe_lines(&self) -> Vec<String> {
        let mut lines = vec![format!("Filter: {}", self.filter)];
        if !self.sort.is_empty() {
            let pairs: Vec<String> = self
                .sort
                .iter()
                .map(|(key, dir)| format!("{}: {}", key, dir))
                .collect();
            lines.push(format!("Sort: {}", pairs.join(", ")));
        }
        if self.explain {
            lines.push("Explain: true".to_string());
        }
        lines
    }
}

// ---------------------------------------------------------------------------
// Explain reports
// ---------------------------------------------------------------------------

/// Plan diagnostics for one explained query. Every field is optional; the
/// shape of explain output varies widely across server versions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExplainReport {
    pub cursor: Option<String>,
    pub index_bounds: Vec<String>,
    pub index_only: Option<bool>,
    pub multi_key: Option<bool>,
    pub millis: Option<i64>,
    pub documents_returned: Option<i64>,
    pub chunk_skips: Option<i64>,
    pub yields: Option<i64>,
    pub scanned: Option<i64>,
    pub scanned_objects: Option<i64>,
    pub scan_and_order: Option<bool>,
}

impl ExplainReport {
    pub fn from_document(doc: &Document) -> ExplainReport {
        ExplainReport {
            cursor: doc.get_str("cursor").ok().map(str::to_string),
            index_bounds: doc
                .get_document("indexBounds")
                .map(|bounds| bounds.keys().cloned().collect())
                .unwrap_or_default(),
            index_only: doc.get_bool("indexOnly").ok(),
            multi_key: doc.get_bool("isMultiKey").ok(),
            millis: int(doc, &["millis"]),
            documents_returned: int(doc, &["n"]),
            chunk_skips: int(doc, &["nChunkSkips"]),
            yields: int(doc, &["nYields"]),
            scanned: int(doc, &["nscanned"]),
            scanned_objects: int(doc, &["nscannedObjects"]),
            scan_and_order: doc.get_bool("scanAndOrder").ok(),
        }
    }

    /// Labelled lines for the inspect flow, absent fields skipped.
    pub fn lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(cursor) = &self.cursor {
            out.push(format!("Cursor: {}", cursor));
        }
        if !self.index_bounds.is_empty() {
            out.push(format!("Indexes: {}", self.index_bounds.join(" ")));
        }
        if let Some(v) = self.index_only {
            out.push(format!("IndexOnly: {}", v));
        }
        if let Some(v) = self.multi_key {
            out.push(format!("MultiKey: {}", v));
        }
        if let Some(v) = self.millis {
            out.push(format!("Milliseconds: {}", v));
        }
        if let Some(v) = self.documents_returned {
            out.push(format!("Documents: {}", v));
        }
        if let Some(v) = self.chunk_skips {
            out.push(format!("ChunkSkips: {}", v));
        }
        if let Some(v) = self.yields {
            out.push(format!("Yields: {}", v));
        }
        if let Some(v) = self.scanned {
            out.push(format!("Scanned: {}", v));
        }
        if let Some(v) = self.scanned_objects {
            out.push(format!("ScannedObjects: {}", v));
        }
        if let Some(v) = self.scan_and_order {
            out.push(format!("ScanAndOrder: {}", v));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Replication
// ---------------------------------------------------------------------------

/// Master/slave replication source from the `local.sources` collection.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationInfo {
    pub source: String,
    pub source_type: String,
    pub synced_to_secs: Option<i64>,
    pub increment: Option<i64>,
}

impl ReplicationInfo {
    pub fn from_document(doc: &Document) -> Option<ReplicationInfo> {
        let synced = match doc.get("syncedTo") {
            Some(Bson::Timestamp(ts)) => Some(*ts),
            _ => None,
        };
        Some(ReplicationInfo {
            source: doc.get_str("host").ok()?.to_string(),
            source_type: doc.get_str("source").unwrap_or_default().to_string(),
            synced_to_secs: synced.map(|ts| ts.time as i64),
            increment: synced.map(|ts| ts.increment as i64),
        })
    }
}

/// One non-arbiter member of a replica set, from `replSetGetStatus`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaMember {
    pub set: String,
    pub name: String,
    pub state: String,
    pub uptime_secs: Option<i64>,
    pub ping_ms: Option<i64>,
    /// Seconds behind the status document's own date.
    pub lag_secs: Option<i64>,
    pub optime_increment: Option<i64>,
}

/// Parses a `replSetGetStatus` reply, filtering arbiters.
pub fn parse_replica_set(doc: &Document) -> Vec<ReplicaMember> {
    let set = doc.get_str("set").unwrap_or_default().to_string();
    let status_date_ms = match doc.get("date") {
        Some(Bson::DateTime(dt)) => Some(dt.timestamp_millis()),
        _ => None,
    };
    let Ok(members) = doc.get_array("members") else {
        return Vec::new();
    };
    members
        .iter()
        .filter_map(|entry| match entry {
            Bson::Document(member) => ReplicaMember::from_member(member, &set, status_date_ms),
            _ => None,
        })
        .collect()
}

impl ReplicaMember {
    fn from_member(member: &Document, set: &str, status_date_ms: Option<i64>) -> Option<ReplicaMember> {
        let state = member.get_str("stateStr").unwrap_or_default().to_string();
        if state == "ARBITER" {
            return None;
        }
        let optime_ms = match member.get("optimeDate") {
            Some(Bson::DateTime(dt)) => Some(dt.timestamp_millis()),
            _ => None,
        };
        let lag_secs = match (status_date_ms, optime_ms) {
            (Some(date), Some(optime)) => Some((date - optime) / 1000),
            _ => None,
        };
        let optime_increment = match member.get("optime") {
            Some(Bson::Timestamp(ts)) => Some(ts.increment as i64),
            Some(Bson::Document(inner)) => match inner.get("ts") {
                Some(Bson::Timestamp(ts)) => Some(ts.increment as i64),
                _ => None,
            },
            _ => None,
        };
        Some(ReplicaMember {
            set: set.to_string(),
            name: member.get_str("name").ok()?.to_string(),
            state,
            uptime_secs: int(member, &["uptime"]),
            ping_ms: int(member, &["pingMs"]),
            lag_secs,
            optime_increment,
        })
    }
}

/// Merges member rows reported by several servers: one row per `(set, name)`,
/// keeping the freshest value of each field.
pub fn merge_members(members: Vec<ReplicaMember>) -> Vec<ReplicaMember> {
    let mut merged: Vec<ReplicaMember> = Vec::new();
    for member in members {
        match merged
            .iter_mut()
            .find(|m| m.set == member.set && m.name == member.name)
        {
            Some(existing) => {
                existing.uptime_secs = existing.uptime_secs.max(member.uptime_secs);
                existing.ping_ms = existing.ping_ms.max(member.ping_ms);
                existing.lag_secs = existing.lag_secs.max(member.lag_secs);
                existing.optime_increment =
                    existing.optime_increment.max(member.optime_increment);
                if existing.state.is_empty() {
                    existing.state = member.state;
                }
            }
            None => merged.push(member),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;
    use std::time::{Duration, Instant};

    fn status_doc(ops: i64) -> Document {
        doc! {
            "opcounters": { "insert": 10, "query": ops - 30, "update": 10, "command": 10 },
            "globalLock": {
                "activeClients": { "total": 3 },
                "currentQueue": { "total": 1 },
            },
            "backgroundFlushing": { "flushes": 7 },
            "connections": { "current": 12, "available": 188 },
            "network": { "bytesIn": 1000, "bytesOut": 2000 },
            "mem": { "resident": 150, "mapped": 700 },
            "extra_info": { "page_faults": 40 },
        }
    }

    #[test]
    fn status_first_poll_has_gauges_but_no_rates() {
        let mut rates = RateTracker::new();
        rates.start_cycle(Instant::now());
        let snapshot = StatusSnapshot::derive(&status_doc(100), &mut rates);
        assert_eq!(snapshot.queries_per_sec, None);
        assert_eq!(snapshot.bytes_in_per_sec, None);
        assert_eq!(snapshot.active_clients, 3);
        assert_eq!(snapshot.current_queue, 1);
        assert_eq!(snapshot.current_conn, 12);
        assert_eq!(snapshot.total_conn, 200);
        assert_eq!(snapshot.resident_mem, 150_000_000);
        assert_eq!(snapshot.mapped_mem, 700_000_000);
    }

    #[test]
    fn status_second_poll_computes_rates() {
        let mut rates = RateTracker::new();
        let base = Instant::now();
        rates.start_cycle(base);
        StatusSnapshot::derive(&status_doc(100), &mut rates);

        rates.start_cycle(base + Duration::from_secs(1));
        let mut second = status_doc(150);
        second.insert("network", doc! { "bytesIn": 3000, "bytesOut": 2500 });
        let snapshot = StatusSnapshot::derive(&second, &mut rates);
        assert_eq!(snapshot.queries_per_sec, Some(50));
        assert_eq!(snapshot.bytes_in_per_sec, Some(2000));
        assert_eq!(snapshot.bytes_out_per_sec, Some(500));
        assert_eq!(snapshot.flushes_per_sec, Some(0));
    }

    #[test]
    fn status_tolerates_missing_sections() {
        let mut rates = RateTracker::new();
        rates.start_cycle(Instant::now());
        let snapshot = StatusSnapshot::derive(&doc! {}, &mut rates);
        assert_eq!(snapshot, StatusSnapshot::default());
    }

    #[test]
    fn operation_parses_full_document() {
        let op = OperationRecord::from_document(&doc! {
            "opid": 42,
            "client": "10.0.0.5:53231",
            "op": "query",
            "secs_running": 15,
            "ns": "shop.orders",
            "query": { "status": "open" },
        })
        .unwrap();
        assert_eq!(op.opid, 42);
        assert_eq!(op.client.as_deref(), Some("10.0.0.5:53231"));
        assert_eq!(op.state, "query");
        assert_eq!(op.duration_secs, Some(15));
        assert_eq!(op.namespace.as_deref(), Some("shop.orders"));
        match op.query.unwrap() {
            QueryPayload::Find(find) => assert_eq!(find.filter, doc! { "status": "open" }),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn operation_without_opid_is_dropped() {
        assert_eq!(OperationRecord::from_document(&doc! { "op": "none" }), None);
    }

    #[test]
    fn operation_without_duration_parses() {
        let op = OperationRecord::from_document(&doc! { "opid": 7, "op": "none", "ns": "" })
            .unwrap();
        assert_eq!(op.duration_secs, None);
        assert_eq!(op.client, None);
        assert_eq!(op.query, None);
    }

    #[test]
    fn replication_noise_heuristics() {
        let oplog_tail = OperationRecord::from_document(&doc! {
            "opid": 1, "op": "getmore", "ns": "local.oplog.rs",
        })
        .unwrap();
        assert!(oplog_tail.is_replication_noise());

        let source_poll = OperationRecord::from_document(&doc! {
            "opid": 2, "op": "query", "ns": "local.sources",
        })
        .unwrap();
        assert!(source_poll.is_replication_noise());

        let blank_ns = OperationRecord::from_document(&doc! {
            "opid": 3, "op": "command", "ns": "",
        })
        .unwrap();
        assert!(blank_ns.is_replication_noise());

        let user_query = OperationRecord::from_document(&doc! {
            "opid": 4, "op": "query", "ns": "shop.orders",
        })
        .unwrap();
        assert!(!user_query.is_replication_noise());
    }

    #[test]
    fn query_payload_unwraps_dollar_parts() {
        let payload = QueryPayload::from_bson(&Bson::Document(doc! {
            "$query": { "user": 9 },
            "$orderby": { "created": -1 },
        }))
        .unwrap();
        match payload {
            QueryPayload::Find(find) => {
                assert_eq!(find.filter, doc! { "user": 9 });
                assert_eq!(find.sort.len(), 1);
                assert_eq!(find.sort[0].0, "created");
                assert!(!find.explain);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn query_payload_message_form() {
        let payload =
            QueryPayload::from_bson(&Bson::Document(doc! { "$msg": "query not recording" }))
                .unwrap();
        assert_eq!(
            payload,
            QueryPayload::Message("query not recording".to_string())
        );
        assert_eq!(payload.compact(), "query not recording");
    }

    #[test]
    fn explain_report_parses_legacy_fields() {
        let report = ExplainReport::from_document(&doc! {
            "cursor": "BtreeCursor user_1",
            "indexBounds": { "user_1": [] },
            "indexOnly": false,
            "isMultiKey": false,
            "millis": 12,
            "n": 100,
            "nChunkSkips": 0,
            "nYields": 1,
            "nscanned": 120,
            "nscannedObjects": 100,
        });
        assert_eq!(report.cursor.as_deref(), Some("BtreeCursor user_1"));
        assert_eq!(report.index_bounds, vec!["user_1".to_string()]);
        assert_eq!(report.millis, Some(12));
        assert_eq!(report.scanned, Some(120));
        assert_eq!(report.scan_and_order, None);
        let lines = report.lines();
        assert!(lines.contains(&"Milliseconds: 12".to_string()));
        assert!(!lines.iter().any(|l| l.starts_with("ScanAndOrder")));
    }

    #[test]
    fn replica_set_parse_filters_arbiters_and_computes_lag() {
        use mongodb::bson::{DateTime, Timestamp};
        let status = doc! {
            "set": "rs0",
            "date": DateTime::from_millis(10_000),
            "members": [
                {
                    "name": "db1:27017",
                    "stateStr": "PRIMARY",
                    "uptime": 3600,
                    "optimeDate": DateTime::from_millis(10_000),
                    "optime": Bson::Timestamp(Timestamp { time: 10, increment: 3 }),
                },
                {
                    "name": "db2:27017",
                    "stateStr": "SECONDARY",
                    "uptime": 1800,
                    "pingMs": 2,
                    "optimeDate": DateTime::from_millis(4_000),
                },
                { "name": "db3:27017", "stateStr": "ARBITER" },
            ],
        };
        let members = parse_replica_set(&status);
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].state, "PRIMARY");
        assert_eq!(members[0].lag_secs, Some(0));
        assert_eq!(members[0].optime_increment, Some(3));
        assert_eq!(members[1].lag_secs, Some(6));
        assert_eq!(members[1].ping_ms, Some(2));
    }

    #[test]
    fn merge_members_keeps_one_row_per_member() {
        let a = ReplicaMember {
            set: "rs0".to_string(),
            name: "db1:27017".to_string(),
            state: "PRIMARY".to_string(),
            uptime_secs: Some(100),
            ping_ms: None,
            lag_secs: Some(1),
            optime_increment: Some(5),
        };
        let mut b = a.clone();
        b.uptime_secs = Some(200);
        b.ping_ms = Some(3);
        let merged = merge_members(vec![a, b]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].uptime_secs, Some(200));
        assert_eq!(merged[0].ping_ms, Some(3));
    }
}
