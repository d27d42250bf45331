//! The query screen: tick loop, block building, and key dispatch.
//!
//! Each tick refreshes every block from every server, renders, then waits
//! about a second for a key. Inspect and kill actions always resolve against
//! the rows of the refresh that just rendered, never a stale tick.

use std::cmp::Reverse;
use std::io;
use std::time::{Duration, Instant};

use crate::console::{Console, INTERRUPT_KEY};
use crate::fmt;
use crate::models::{merge_members, QueryPayload};
use crate::server::ServerProxy;
use crate::table::{Cell, Row, Table};

const TICK: Duration = Duration::from_secs(1);

const STATUS_HEADERS: [&str; 9] = [
    "Server",
    "QPS",
    "Active",
    "Queue",
    "Flush",
    "Connection",
    "Network I/O",
    "Memory",
    "Page Faults",
];
const REPLICATION_HEADERS: [&str; 4] = ["Server", "Source", "SyncedTo", "Inc"];
const MEMBER_HEADERS: [&str; 7] = ["Server", "Set", "State", "Uptime", "Lag", "Inc", "Ping"];
const OPERATION_HEADERS: [&str; 7] =
    ["Server", "Opid", "Client", "State", "Sec", "Namespace", "Query"];

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Owns the server proxies for the lifetime of the monitor.
pub struct MonitorSession {
    proxies: Vec<ServerProxy>,
    /// Servers that turned out not to track a replication source; skipped on
    /// later ticks instead of being asked again.
    replication_hidden: Vec<usize>,
    /// Servers that turned out not to be replica set members.
    member_hidden: Vec<usize>,
}

impl MonitorSession {
    pub fn new(proxies: Vec<ServerProxy>) -> MonitorSession {
        MonitorSession {
            proxies,
            replication_hidden: Vec::new(),
            member_hidden: Vec::new(),
        }
    }

    pub fn connect_all(&mut self) {
        for proxy in &mut self.proxies {
            proxy.connect();
        }
    }

    pub fn proxies(&self) -> &[ServerProxy] {
        &self.proxies
    }

    pub fn proxies_mut(&mut self) -> &mut [ServerProxy] {
        &mut self.proxies
    }

    /// Resolves free-form user input (name, address, address:defaultport) to
    /// a proxy.
    pub fn find_proxy(&mut self, candidate: &str) -> Option<&mut ServerProxy> {
        self.proxies
            .iter_mut()
            .find(|proxy| proxy.same_identity(candidate))
    }

    /// Display name for a remote address, preferring a configured server's
    /// name over the raw address.
    fn display_name(&self, address: &str) -> String {
        self.proxies
            .iter()
            .find(|proxy| proxy.same_identity(address))
            .map(|proxy| proxy.name().to_string())
            .unwrap_or_else(|| address.to_string())
    }

    /// Status rows, one per server: metrics when reachable, the recorded
    /// error otherwise.
    pub fn status_rows(&mut self, now: Instant) -> Vec<Row> {
        let mut rows = Vec::new();
        for proxy in &mut self.proxies {
            if !proxy.descriptor().features.status {
                continue;
            }
            let name = Cell::Str(proxy.name().to_string());
            let snapshot = if proxy.connected() {
                proxy.status(now)
            } else {
                None
            };
            match snapshot {
                Some(status) => rows.push(vec![
                    name,
                    opt_count(status.queries_per_sec),
                    Cell::Count(status.active_clients),
                    Cell::Count(status.current_queue),
                    opt_count(status.flushes_per_sec),
                    Cell::Pair(status.current_conn, status.total_conn),
                    opt_pair(status.bytes_in_per_sec, status.bytes_out_per_sec),
                    Cell::Pair(status.resident_mem, status.mapped_mem),
                    opt_count(status.page_faults_per_sec),
                ]),
                None => rows.push(vec![
                    name,
                    Cell::Str(proxy.last_error().unwrap_or("no data").to_string()),
                ]),
            }
        }
        rows
    }

    /// Replication source rows for servers that track one.
    pub fn replication_rows(&mut self) -> Vec<Row> {
        let mut found = Vec::new();
        for (index, proxy) in self.proxies.iter_mut().enumerate() {
            if !proxy.descriptor().features.replication_info
                || self.replication_hidden.contains(&index)
                || !proxy.connected()
            {
                continue;
            }
            match proxy.replication_info() {
                Some(info) => found.push((index, info)),
                None => self.replication_hidden.push(index),
            }
        }
        found
            .into_iter()
            .map(|(index, info)| {
                let source = self.display_name(&info.source);
                vec![
                    Cell::Str(self.proxies[index].name().to_string()),
                    Cell::Str(format!("{} / {}", info.source_type, source)),
                    info.synced_to_secs
                        .map(|secs| Cell::Str(fmt::epoch_datetime(secs)))
                        .unwrap_or(Cell::Null),
                    info.increment.map(Cell::Num).unwrap_or(Cell::Null),
                ]
            })
            .collect()
    }

    /// Replica set member rows, merged across reporting servers.
    pub fn member_rows(&mut self) -> Vec<Row> {
        let mut members = Vec::new();
        for (index, proxy) in self.proxies.iter_mut().enumerate() {
            if !proxy.descriptor().features.replica_set
                || self.member_hidden.contains(&index)
                || !proxy.connected()
            {
                continue;
            }
            let reported = proxy.replica_set_members();
            if reported.is_empty() {
                self.member_hidden.push(index);
            } else {
                members.extend(reported);
            }
        }
        merge_members(members)
            .into_iter()
            .map(|member| {
                vec![
                    Cell::Str(self.display_name(&member.name)),
                    Cell::Str(member.set),
                    Cell::Str(member.state),
                    member
                        .uptime_secs
                        .map(|secs| Cell::Str(fmt::duration_compact(secs)))
                        .unwrap_or(Cell::Null),
                    member
                        .lag_secs
                        .map(|secs| Cell::Str(fmt::duration_compact(secs)))
                        .unwrap_or(Cell::Null),
                    member.optime_increment.map(Cell::Num).unwrap_or(Cell::Null),
                    member.ping_ms.map(Cell::Num).unwrap_or(Cell::Null),
                ]
            })
            .collect()
    }

    /// Operation rows across all servers, ranked by descending duration.
    pub fn operation_rows(&mut self) -> Vec<Row> {
        let mut rows = Vec::new();
        for proxy in &mut self.proxies {
            let features = proxy.descriptor().features;
            if !features.operations || !proxy.connected() {
                continue;
            }
            let name = proxy.name().to_string();
            for op in proxy.current_operations(!features.replication_operations) {
                rows.push(vec![
                    Cell::Str(name.clone()),
                    Cell::Num(op.opid),
                    op.client.map(Cell::Str).unwrap_or(Cell::Null),
                    Cell::Str(op.state),
                    op.duration_secs.map(Cell::Num).unwrap_or(Cell::Null),
                    op.namespace.map(Cell::Str).unwrap_or(Cell::Null),
                    op.query.map(Cell::Query).unwrap_or(Cell::Null),
                ]);
            }
        }
        rows.sort_by_key(|row| Reverse(row_duration(row)));
        rows
    }
}

fn opt_count(value: Option<u64>) -> Cell {
    value.map(Cell::Count).unwrap_or(Cell::Null)
}

fn opt_pair(first: Option<u64>, second: Option<u64>) -> Cell {
    match (first, second) {
        (Some(first), Some(second)) => Cell::Pair(first, second),
        _ => Cell::Null,
    }
}

/// Duration key of an operation row; durationless rows rank below any
/// threshold.
fn row_duration(row: &Row) -> i64 {
    match row.get(4) {
        Some(Cell::Num(secs)) => *secs,
        _ => -1,
    }
}

/// Resolves a typed server name and opid against the current rows, matching
/// on unformatted identity values.
pub fn find_operation<'a>(operations: &'a Table, server: &str, opid: &str) -> Option<&'a Row> {
    operations.find_row(|cells| {
        cells.len() > 1 && cells[0].plain() == server && cells[1].plain() == opid
    })
}

/// Kills every operation running at least `threshold` seconds, top to
/// bottom. Rows are ordered by descending duration, so the scan stops at the
/// first row below the threshold. Returns the number of accepted kills.
pub fn batch_kill(operations: &Table, session: &mut MonitorSession, threshold: i64) -> usize {
    let mut targets = Vec::new();
    for row in operations.rows() {
        if row_duration(row) < threshold {
            break;
        }
        if let (Some(Cell::Str(server)), Some(Cell::Num(opid))) = (row.first(), row.get(1)) {
            targets.push((server.clone(), *opid));
        }
    }
    let mut killed = 0;
    for (server, opid) in targets {
        if let Some(proxy) = session.find_proxy(&server) {
            if proxy.kill_operation(opid) {
                killed += 1;
            }
        }
    }
    killed
}

// ---------------------------------------------------------------------------
// Query screen
// ---------------------------------------------------------------------------

/// The top-level control loop.
pub struct QueryScreen {
    console: Console,
    session: MonitorSession,
    status_block: Table,
    replication_block: Table,
    member_block: Table,
    operation_block: Table,
    auto_kill_secs: Option<i64>,
}

impl QueryScreen {
    pub fn new(
        console: Console,
        session: MonitorSession,
        auto_kill_secs: Option<i64>,
    ) -> QueryScreen {
        QueryScreen {
            console,
            session,
            status_block: Table::new(STATUS_HEADERS.to_vec()),
            replication_block: Table::new(REPLICATION_HEADERS.to_vec()),
            member_block: Table::new(MEMBER_HEADERS.to_vec()),
            operation_block: Table::new(OPERATION_HEADERS.to_vec()),
            auto_kill_secs,
        }
    }

    /// Runs until `q`, Ctrl+C, or SIGINT.
    pub fn run(&mut self) -> io::Result<()> {
        loop {
            self.refresh(Instant::now());
            self.render()?;
            let key = self.console.poll_key(Some(TICK));
            match key {
                Some('q') | Some(INTERRUPT_KEY) => break,
                Some('p') => {
                    // Paused until any key; the pause key itself may quit.
                    if self.console.wait_key() == Some(INTERRUPT_KEY) {
                        break;
                    }
                }
                Some(action @ ('e' | 'k')) => self.operation_action(action),
                Some('K') => self.batch_kill_prompt(),
                _ => {}
            }
            if self.console.interrupted() {
                break;
            }
            if let Some(threshold) = self.auto_kill_secs {
                batch_kill(&self.operation_block, &mut self.session, threshold);
            }
        }
        Ok(())
    }

    /// Rebuilds every block from fresh server snapshots.
    fn refresh(&mut self, now: Instant) {
        let status = self.session.status_rows(now);
        self.status_block.reset(status);
        let replication = self.session.replication_rows();
        self.replication_block.reset(replication);
        let members = self.session.member_rows();
        self.member_block.reset(members);
        let operations = self.session.operation_rows();
        self.operation_block.reset(operations);
    }

    fn render(&mut self) -> io::Result<()> {
        self.console.render(&mut [
            &mut self.status_block,
            &mut self.replication_block,
            &mut self.member_block,
            &mut self.operation_block,
        ])
    }

    /// Prompts for a target and runs the inspect or kill flow.
    fn operation_action(&mut self, action: char) {
        let values = self.console.prompt_fields(&["Server", "Opid"]);
        if values.is_empty() {
            return;
        }
        if values.len() == 2 {
            let resolved = match action {
                'e' => self.explain_operation(&values[0], &values[1]),
                _ => self.kill_single(&values[0], &values[1]),
            };
            if !resolved {
                self.console.cooked(|| println!("Invalid operation."));
            }
        }
        self.console.wait_key();
    }

    /// Prints the query parts and the explain report for one operation.
    /// False when the target does not resolve to an explainable row.
    fn explain_operation(&mut self, server: &str, opid: &str) -> bool {
        let row = match find_operation(&self.operation_block, server, opid) {
            Some(row) => row.clone(),
            None => return false,
        };
        let namespace = match row.get(5) {
            Some(Cell::Str(ns)) if !ns.is_empty() => ns.clone(),
            _ => return false,
        };
        let payload = match row.get(6) {
            Some(Cell::Query(payload)) => payload.clone(),
            _ => return false,
        };
        match payload {
            QueryPayload::Message(message) => {
                self.console.cooked(|| {
                    println!();
                    println!("{}", message);
                });
            }
            QueryPayload::Find(find) => {
                let report = match self.session.find_proxy(server) {
                    Some(proxy) => proxy.explain_query(&namespace, &find),
                    None => return false,
                };
                let error = self
                    .session
                    .find_proxy(server)
                    .and_then(|proxy| proxy.last_error().map(str::to_string));
                self.console.cooked(|| {
                    println!();
                    for line in find.describe_lines() {
                        println!("{}", line);
                    }
                    println!();
                    match report {
                        Some(report) => {
                            for line in report.lines() {
                                println!("{}", line);
                            }
                        }
                        None => println!(
                            "Explain failed: {}",
                            error.unwrap_or_else(|| "no data".to_string())
                        ),
                    }
                });
            }
        }
        true
    }

    /// Kills one resolved operation. False when the target does not resolve.
    fn kill_single(&mut self, server: &str, opid: &str) -> bool {
        let opid = match find_operation(&self.operation_block, server, opid) {
            Some(row) => match row.get(1) {
                Some(Cell::Num(opid)) => *opid,
                _ => return false,
            },
            None => return false,
        };
        let accepted = match self.session.find_proxy(server) {
            Some(proxy) => proxy.kill_operation(opid),
            None => return false,
        };
        self.console.cooked(|| {
            if accepted {
                println!("Killed {}.", opid);
            } else {
                println!("Kill failed.");
            }
        });
        true
    }

    /// Prompts for a threshold and batch-kills below the operations block.
    fn batch_kill_prompt(&mut self) {
        let values = self.console.prompt_fields(&["Sec"]);
        let Some(value) = values.first() else {
            return;
        };
        match value.parse::<i64>() {
            Ok(threshold) => {
                batch_kill(&self.operation_block, &mut self.session, threshold);
            }
            Err(_) => self.console.cooked(|| println!("Invalid operation.")),
        }
    }
}
