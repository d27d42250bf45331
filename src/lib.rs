//! mtop — terminal activity monitor for MongoDB servers.
//!
//! Provides:
//! - `config`  — server descriptors from a TOML file and CLI arguments
//! - `source`  — datasource, connector, and kill capabilities (driver-backed
//!   and mock implementations)
//! - `server`  — per-server proxy with bounded retry and derived metrics
//! - `rates`   — per-second rate computation between polls
//! - `models`  — typed records parsed from raw server documents
//! - `table`   — ranked tabular blocks with a ratcheting width model
//! - `fmt`     — shared cell formatting helpers
//! - `console` — terminal modes, key polling, block rendering
//! - `screen`  — the interactive tick/key loop

pub mod config;
pub mod console;
pub mod fmt;
pub mod models;
pub mod rates;
pub mod screen;
pub mod server;
pub mod source;
pub mod table;
