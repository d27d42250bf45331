//! Scriptable in-memory capabilities for tests.
//!
//! A [`MockState`] is shared between the test and the source handed to the
//! proxy, so tests can queue replies up front and inspect call counts and
//! issued kills afterwards.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use mongodb::bson::Document;

use crate::config::ServerDescriptor;
use crate::models::FindPayload;

use super::{Connector, Datasource, OpKiller, SourceError};

/// Shared reply script and call log.
#[derive(Debug)]
pub struct MockState {
    /// Consumed front to back, one per `admin_status` call; an exhausted
    /// queue repeats the last reply.
    pub status_replies: VecDeque<Result<Document, SourceError>>,
    pub operations: Result<Vec<Document>, SourceError>,
    pub explain_reply: Option<Result<Document, SourceError>>,
    pub replication_sources: Vec<Document>,
    pub replica_set_reply: Option<Document>,
    pub status_calls: usize,
    pub operation_calls: usize,
    pub explain_calls: Vec<(String, FindPayload)>,
}

impl MockState {
    pub fn new() -> Rc<RefCell<MockState>> {
        Rc::new(RefCell::new(MockState {
            operations: Ok(Vec::new()),
            ..MockState::default()
        }))
    }
}

impl Default for MockState {
    fn default() -> Self {
        MockState {
            status_replies: VecDeque::new(),
            operations: Ok(Vec::new()),
            explain_reply: None,
            replication_sources: Vec::new(),
            replica_set_reply: None,
            status_calls: 0,
            operation_calls: 0,
            explain_calls: Vec::new(),
        }
    }
}

/// Datasource reading from a shared [`MockState`].
pub struct MockSource {
    state: Rc<RefCell<MockState>>,
    last_status: Option<Result<Document, SourceError>>,
}

impl MockSource {
    pub fn new(state: Rc<RefCell<MockState>>) -> Self {
        MockSource {
            state,
            last_status: None,
        }
    }
}

impl Datasource for MockSource {
    fn admin_status(&mut self) -> Result<Document, SourceError> {
        let mut state = self.state.borrow_mut();
        state.status_calls += 1;
        if let Some(reply) = state.status_replies.pop_front() {
            self.last_status = Some(reply.clone());
        }
        self.last_status
            .clone()
            .unwrap_or_else(|| Err(SourceError::Operation("no scripted status".to_string())))
    }

    fn list_operations(&mut self) -> Result<Vec<Document>, SourceError> {
        let mut state = self.state.borrow_mut();
        state.operation_calls += 1;
        state.operations.clone()
    }

    fn explain(
        &mut self,
        namespace: &str,
        payload: &FindPayload,
    ) -> Result<Document, SourceError> {
        let mut state = self.state.borrow_mut();
        state
            .explain_calls
            .push((namespace.to_string(), payload.clone()));
        state
            .explain_reply
            .clone()
            .unwrap_or_else(|| Err(SourceError::Operation("no scripted explain".to_string())))
    }

    fn replication_sources(&mut self) -> Result<Vec<Document>, SourceError> {
        Ok(self.state.borrow().replication_sources.clone())
    }

    fn replica_set_status(&mut self) -> Result<Document, SourceError> {
        match &self.state.borrow().replica_set_reply {
            Some(doc) => Ok(doc.clone()),
            None => Err(SourceError::Operation("not running with --replSet".to_string())),
        }
    }
}

/// Connector that either hands out sources over a shared state or fails.
pub enum MockConnector {
    Reachable(Rc<RefCell<MockState>>),
    Unreachable(String),
}

impl Connector for MockConnector {
    fn connect(&self) -> Result<Box<dyn Datasource>, SourceError> {
        match self {
            MockConnector::Reachable(state) => Ok(Box::new(MockSource::new(state.clone()))),
            MockConnector::Unreachable(message) => {
                Err(SourceError::Transient(message.clone()))
            }
        }
    }
}

/// Kill capability that records instead of killing.
#[derive(Debug, Default)]
pub struct RecordingKiller {
    pub kills: Rc<RefCell<Vec<i64>>>,
    pub succeed: bool,
}

impl RecordingKiller {
    pub fn new() -> (RecordingKiller, Rc<RefCell<Vec<i64>>>) {
        let kills = Rc::new(RefCell::new(Vec::new()));
        (
            RecordingKiller {
                kills: kills.clone(),
                succeed: true,
            },
            kills,
        )
    }
}

impl OpKiller for RecordingKiller {
    fn kill(&self, _server: &ServerDescriptor, opid: i64) -> bool {
        self.kills.borrow_mut().push(opid);
        self.succeed
    }
}
