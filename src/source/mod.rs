//! Remote server capabilities consumed by the proxy layer.
//!
//! [`Datasource`] covers everything read over the driver, [`Connector`]
//! establishes datasources, and [`OpKiller`] terminates operations through
//! an external client. `mongo` implements all three over the official
//! driver; `mock` provides scriptable in-memory stand-ins for tests.

pub mod mock;
pub mod mongo;

use mongodb::bson::Document;

use crate::config::ServerDescriptor;
use crate::models::FindPayload;

/// Failure taxonomy for remote calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Connectivity hiccup; safe to retry.
    Transient(String),
    /// The server rejected the request; retrying cannot help.
    Operation(String),
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Transient(message) => write!(f, "{}", message),
            SourceError::Operation(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for SourceError {}

/// One established server connection, speaking raw documents.
pub trait Datasource {
    /// The administrative status document (`serverStatus`).
    fn admin_status(&mut self) -> Result<Document, SourceError>;

    /// The in-progress operation documents (`currentOp`).
    fn list_operations(&mut self) -> Result<Vec<Document>, SourceError>;

    /// Runs an explain for a find against `namespace`.
    fn explain(&mut self, namespace: &str, payload: &FindPayload)
        -> Result<Document, SourceError>;

    /// Replication source documents from `local.sources`.
    fn replication_sources(&mut self) -> Result<Vec<Document>, SourceError>;

    /// The `replSetGetStatus` document.
    fn replica_set_status(&mut self) -> Result<Document, SourceError>;
}

/// Establishes datasources for one server.
pub trait Connector {
    fn connect(&self) -> Result<Box<dyn Datasource>, SourceError>;
}

/// Terminates one in-flight operation out of band.
pub trait OpKiller {
    /// True when the termination request was accepted.
    fn kill(&self, server: &ServerDescriptor, opid: i64) -> bool;
}
