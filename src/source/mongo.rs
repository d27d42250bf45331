//! MongoDB-backed capabilities over the official sync driver.

use std::process::{Command, Stdio};
use std::time::Duration;

use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{Error as DriverError, ErrorKind};
use mongodb::options::{ClientOptions, Credential, ServerAddress};
use mongodb::sync::Client;
use tracing::{debug, warn};

use crate::config::ServerDescriptor;
use crate::models::FindPayload;

use super::{Connector, Datasource, OpKiller, SourceError};

/// Bounded server selection so a dead server fails a poll, not the session.
const SELECTION_TIMEOUT: Duration = Duration::from_secs(2);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Sorts driver failures into the retry taxonomy.
fn classify(err: DriverError) -> SourceError {
    match err.kind.as_ref() {
        ErrorKind::Io(_)
        | ErrorKind::ServerSelection { .. }
        | ErrorKind::ConnectionPoolCleared { .. } => SourceError::Transient(err.to_string()),
        _ => SourceError::Operation(err.to_string()),
    }
}

/// Builds [`MongoSource`] connections for one server descriptor.
pub struct MongoConnector {
    descriptor: ServerDescriptor,
}

impl MongoConnector {
    pub fn new(descriptor: ServerDescriptor) -> Self {
        MongoConnector { descriptor }
    }
}

impl Connector for MongoConnector {
    fn connect(&self) -> Result<Box<dyn Datasource>, SourceError> {
        let address = ServerAddress::parse(&self.descriptor.address).map_err(classify)?;
        let mut options = ClientOptions::default();
        options.hosts = vec![address];
        options.app_name = Some("mtop".to_string());
        options.direct_connection = Some(true);
        options.server_selection_timeout = Some(SELECTION_TIMEOUT);
        options.connect_timeout = Some(CONNECT_TIMEOUT);
        if let (Some(username), Some(password)) =
            (&self.descriptor.username, &self.descriptor.password)
        {
            let mut credential = Credential::default();
            credential.username = Some(username.clone());
            credential.password = Some(password.clone());
            credential.source = Some("admin".to_string());
            options.credential = Some(credential);
        }
        let client = Client::with_options(options).map_err(classify)?;
        let source = MongoSource { client };
        // The client construction is lazy; prove the server is reachable.
        source.ping()?;
        debug!(server = %self.descriptor.name, "connection established");
        Ok(Box::new(source))
    }
}

/// A live connection to one server.
pub struct MongoSource {
    client: Client,
}

impl MongoSource {
    fn admin(&self) -> mongodb::sync::Database {
        self.client.database("admin")
    }

    fn ping(&self) -> Result<(), SourceError> {
        self.admin()
            .run_command(doc! { "ping": 1 }, None)
            .map(|_| ())
            .map_err(classify)
    }
}

impl Datasource for MongoSource {
    fn admin_status(&mut self) -> Result<Document, SourceError> {
        self.admin()
            .run_command(doc! { "serverStatus": 1 }, None)
            .map_err(classify)
    }

    fn list_operations(&mut self) -> Result<Vec<Document>, SourceError> {
        let reply = self
            .admin()
            .run_command(doc! { "currentOp": 1 }, None)
            .map_err(classify)?;
        let ops = match reply.get_array("inprog") {
            Ok(entries) => entries
                .iter()
                .filter_map(|entry| match entry {
                    Bson::Document(op) => Some(op.clone()),
                    _ => None,
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        Ok(ops)
    }

    fn explain(
        &mut self,
        namespace: &str,
        payload: &FindPayload,
    ) -> Result<Document, SourceError> {
        let (database, collection) = namespace.split_once('.').ok_or_else(|| {
            SourceError::Operation(format!("not a collection namespace: {}", namespace))
        })?;
        let mut find = doc! { "find": collection };
        if !payload.filter.is_empty() {
            find.insert("filter", payload.filter.clone());
        }
        if !payload.sort.is_empty() {
            let mut sort = Document::new();
            for (key, direction) in &payload.sort {
                sort.insert(key.clone(), direction.clone());
            }
            find.insert("sort", sort);
        }
        self.client
            .database(database)
            .run_command(doc! { "explain": find, "verbosity": "executionStats" }, None)
            .map_err(classify)
    }

    fn replication_sources(&mut self) -> Result<Vec<Document>, SourceError> {
        let sources = self
            .client
            .database("local")
            .collection::<Document>("sources");
        let cursor = sources.find(None, None).map_err(classify)?;
        cursor
            .collect::<Result<Vec<Document>, _>>()
            .map_err(classify)
    }

    fn replica_set_status(&mut self) -> Result<Document, SourceError> {
        self.admin()
            .run_command(doc! { "replSetGetStatus": 1 }, None)
            .map_err(classify)
    }
}

/// Kills operations through the `mongo` shell, the way an operator would.
/// Runs out of band, on its own connection.
pub struct ShellKiller;

impl OpKiller for ShellKiller {
    fn kill(&self, server: &ServerDescriptor, opid: i64) -> bool {
        let mut command = Command::new("mongo");
        command
            .arg(format!("{}/admin", server.address))
            .arg("--quiet")
            .arg("--eval")
            .arg(format!("db.killOp({})", opid));
        if let Some(username) = &server.username {
            command.arg("--username").arg(username);
        }
        if let Some(password) = &server.password {
            command.arg("--password").arg(password);
        }
        command.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
        match command.status() {
            Ok(status) => {
                if !status.success() {
                    warn!(server = %server.name, opid, code = ?status.code(), "kill command failed");
                }
                status.success()
            }
            Err(err) => {
                warn!(server = %server.name, opid, error = %err, "could not run kill command");
                false
            }
        }
    }
}
