//! Per-server connection state, bounded retry, and derived metrics.
//!
//! A [`ServerProxy`] wraps one remote server. Every remote failure is
//! absorbed here: callers receive a value or an explicit absence, never a
//! driver error, and the most recent failure is retrievable through
//! [`ServerProxy::last_error`].

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::ServerDescriptor;
use crate::models::{
    merge_members, parse_replica_set, ExplainReport, FindPayload, OperationRecord,
    ReplicaMember, ReplicationInfo, StatusSnapshot,
};
use crate::rates::RateTracker;
use crate::source::{Connector, Datasource, OpKiller, SourceError};

/// Total attempts per remote call, transient failures only.
const RETRY_ATTEMPTS: u32 = 10;
const RETRY_DELAY: Duration = Duration::from_millis(100);

pub struct ServerProxy {
    descriptor: ServerDescriptor,
    connector: Box<dyn Connector>,
    killer: Box<dyn OpKiller>,
    source: Option<Box<dyn Datasource>>,
    last_error: Option<String>,
    rates: RateTracker,
}

impl ServerProxy {
    pub fn new(
        descriptor: ServerDescriptor,
        connector: Box<dyn Connector>,
        killer: Box<dyn OpKiller>,
    ) -> ServerProxy {
        ServerProxy {
            descriptor,
            connector,
            killer,
            source: None,
            last_error: Some("not connected".to_string()),
            rates: RateTracker::new(),
        }
    }

    /// Attempts to establish the connection. Failure is observable only
    /// through [`connected`](Self::connected) and the recorded error.
    pub fn connect(&mut self) {
        match self.connector.connect() {
            Ok(source) => {
                self.source = Some(source);
                self.last_error = None;
                info!(server = %self.descriptor.name, "connected");
            }
            Err(err) => {
                self.source = None;
                self.last_error = Some(err.to_string());
                warn!(server = %self.descriptor.name, error = %err, "connect failed");
            }
        }
    }

    pub fn connected(&self) -> bool {
        self.source.is_some()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &ServerDescriptor {
        &self.descriptor
    }

    /// True if free-form user input names this server.
    pub fn same_identity(&self, candidate: &str) -> bool {
        self.descriptor.same_identity(candidate)
    }

    /// Runs one remote call with bounded retry on transient failures.
    ///
    /// An operation failure is recorded and surfaced as absence immediately;
    /// a connect-level outage only empties this tick, it does not mark the
    /// server disconnected.
    fn execute<T>(
        &mut self,
        what: &str,
        mut call: impl FnMut(&mut dyn Datasource) -> Result<T, SourceError>,
    ) -> Option<T> {
        let mut source = self.source.take()?;
        let mut outcome = None;
        for attempt in 1..=RETRY_ATTEMPTS {
            match call(source.as_mut()) {
                Ok(value) => {
                    self.last_error = None;
                    outcome = Some(value);
                    break;
                }
                Err(err) => {
                    self.last_error = Some(err.to_string());
                    if !err.is_transient() {
                        debug!(server = %self.descriptor.name, error = %err,
                            "{} rejected", what);
                        break;
                    }
                    if attempt == RETRY_ATTEMPTS {
                        warn!(server = %self.descriptor.name, error = %err,
                            "{} still failing after {} attempts", what, RETRY_ATTEMPTS);
                        break;
                    }
                    debug!(server = %self.descriptor.name, attempt, error = %err,
                        "{} hiccup, retrying", what);
                    thread::sleep(RETRY_DELAY);
                }
            }
        }
        self.source = Some(source);
        outcome
    }

    /// Polls `serverStatus` and derives the snapshot for this cycle.
    ///
    /// `now` is the tick timestamp; all rate denominators for this server
    /// come from the gap between consecutive `now` values.
    pub fn status(&mut self, now: Instant) -> Option<StatusSnapshot> {
        let doc = self.execute("serverStatus", |source| source.admin_status())?;
        self.rates.start_cycle(now);
        Some(StatusSnapshot::derive(&doc, &mut self.rates))
    }

    /// Lists in-flight operations, optionally stripped of replication
    /// plumbing.
    pub fn current_operations(&mut self, hide_replication: bool) -> Vec<OperationRecord> {
        let docs = self
            .execute("currentOp", |source| source.list_operations())
            .unwrap_or_default();
        docs.iter()
            .filter_map(OperationRecord::from_document)
            .filter(|op| !(hide_replication && op.is_replication_noise()))
            .collect()
    }

    /// Explains a find against `namespace`.
    pub fn explain_query(
        &mut self,
        namespace: &str,
        payload: &FindPayload,
    ) -> Option<ExplainReport> {
        let doc = self.execute("explain", |source| source.explain(namespace, payload))?;
        Some(ExplainReport::from_document(&doc))
    }

    /// The replication source this server syncs from, if it tracks one.
    pub fn replication_info(&mut self) -> Option<ReplicationInfo> {
        let docs = self.execute("local.sources", |source| source.replication_sources())?;
        docs.first().and_then(ReplicationInfo::from_document)
    }

    /// Replica set members as this server sees them; empty when the server
    /// is not a member.
    pub fn replica_set_members(&mut self) -> Vec<ReplicaMember> {
        match self.execute("replSetGetStatus", |source| source.replica_set_status()) {
            Some(doc) => merge_members(parse_replica_set(&doc)),
            None => Vec::new(),
        }
    }

    /// Requests termination of one operation. Not idempotent: an opid may
    /// have been reused by the time a retry would land.
    pub fn kill_operation(&mut self, opid: i64) -> bool {
        let accepted = self.killer.kill(&self.descriptor, opid);
        if !accepted {
            warn!(server = %self.descriptor.name, opid, "kill rejected");
        }
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::mock::{MockConnector, MockState, RecordingKiller};
    use mongodb::bson::doc;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn proxy_with(
        connector: MockConnector,
    ) -> (ServerProxy, Rc<RefCell<Vec<i64>>>) {
        let descriptor =
            ServerDescriptor::from_host("localhost:27017", None, None);
        let (killer, kills) = RecordingKiller::new();
        (
            ServerProxy::new(descriptor, Box::new(connector), Box::new(killer)),
            kills,
        )
    }

    fn status_doc(ops: i64) -> mongodb::bson::Document {
        doc! { "opcounters": { "query": ops }, "connections": { "current": 1, "available": 9 } }
    }

    #[test]
    fn connect_failure_leaves_error_set() {
        let (mut proxy, _) =
            proxy_with(MockConnector::Unreachable("connection refused".to_string()));
        assert!(!proxy.connected());
        proxy.connect();
        assert!(!proxy.connected());
        assert_eq!(proxy.last_error(), Some("connection refused"));
        assert_eq!(proxy.status(Instant::now()), None);
    }

    #[test]
    fn connect_success_clears_error() {
        let state = MockState::new();
        let (mut proxy, _) = proxy_with(MockConnector::Reachable(state));
        proxy.connect();
        assert!(proxy.connected());
        assert_eq!(proxy.last_error(), None);
    }

    #[test]
    fn status_rates_span_consecutive_polls() {
        let state = MockState::new();
        state
            .borrow_mut()
            .status_replies
            .extend([Ok(status_doc(100)), Ok(status_doc(150))]);
        let (mut proxy, _) = proxy_with(MockConnector::Reachable(state));
        proxy.connect();

        let base = Instant::now();
        let first = proxy.status(base).unwrap();
        assert_eq!(first.queries_per_sec, None);

        let second = proxy.status(base + Duration::from_secs(1)).unwrap();
        assert_eq!(second.queries_per_sec, Some(50));
    }

    #[test]
    fn transient_failures_are_retried() {
        let state = MockState::new();
        state.borrow_mut().status_replies.extend([
            Err(SourceError::Transient("reset by peer".to_string())),
            Err(SourceError::Transient("reset by peer".to_string())),
            Ok(status_doc(1)),
        ]);
        let (mut proxy, _) = proxy_with(MockConnector::Reachable(state.clone()));
        proxy.connect();

        assert!(proxy.status(Instant::now()).is_some());
        assert_eq!(state.borrow().status_calls, 3);
        assert_eq!(proxy.last_error(), None);
        // A poll hiccup never marks the server disconnected.
        assert!(proxy.connected());
    }

    #[test]
    fn operation_failures_are_not_retried() {
        let state = MockState::new();
        state
            .borrow_mut()
            .status_replies
            .push_back(Err(SourceError::Operation("unauthorized".to_string())));
        let (mut proxy, _) = proxy_with(MockConnector::Reachable(state.clone()));
        proxy.connect();

        assert_eq!(proxy.status(Instant::now()), None);
        assert_eq!(state.borrow().status_calls, 1);
        assert_eq!(proxy.last_error(), Some("unauthorized"));
        assert!(proxy.connected());
    }

    #[test]
    fn replication_noise_is_filtered_on_request() {
        let state = MockState::new();
        state.borrow_mut().operations = Ok(vec![
            doc! { "opid": 1, "op": "getmore", "ns": "local.oplog.rs" },
            doc! { "opid": 2, "op": "query", "ns": "local.sources" },
            doc! { "opid": 3, "op": "query", "ns": "shop.orders", "secs_running": 4 },
        ]);
        let (mut proxy, _) = proxy_with(MockConnector::Reachable(state));
        proxy.connect();

        let visible = proxy.current_operations(true);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].opid, 3);

        let all = proxy.current_operations(false);
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn kill_goes_through_the_killer() {
        let state = MockState::new();
        let (mut proxy, kills) = proxy_with(MockConnector::Reachable(state));
        proxy.connect();
        assert!(proxy.kill_operation(42));
        assert_eq!(*kills.borrow(), vec![42]);
    }

    #[test]
    fn replica_set_absence_is_not_an_error_path() {
        let state = MockState::new();
        let (mut proxy, _) = proxy_with(MockConnector::Reachable(state));
        proxy.connect();
        assert!(proxy.replica_set_members().is_empty());
        assert!(proxy.connected());
    }
}
