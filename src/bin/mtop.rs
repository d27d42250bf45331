//! mtop - realtime activity monitor for MongoDB servers.
//!
//! Shows server status and current operations ordered by duration, refreshed
//! every second. Interactive keys: `q` quit, `p` pause, `e` explain an
//! operation, `k` kill an operation, `K` kill every operation above a
//! duration threshold.
//!
//! Usage:
//!   mtop                          # monitor localhost:27017
//!   mtop db1:27017 db2:27017      # monitor several servers
//!   mtop production               # section name from the configuration file
//!   mtop -K 30                    # auto-kill operations running over 30s

use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use mtop::config::{self, DEFAULT_CONFIG_PATH, DEFAULT_HOST};
use mtop::console::Console;
use mtop::screen::{MonitorSession, QueryScreen};
use mtop::server::ServerProxy;
use mtop::source::mongo::{MongoConnector, ShellKiller};

/// Realtime activity monitor for MongoDB servers.
#[derive(Parser)]
#[command(name = "mtop", about = "Realtime activity monitor for MongoDB servers", version)]
struct Args {
    /// Server addresses, or section names from the configuration file.
    #[arg(value_name = "HOST")]
    hosts: Vec<String>,

    /// Username for authentication.
    #[arg(short, long)]
    username: Option<String>,

    /// Password for authentication.
    #[arg(short, long)]
    password: Option<String>,

    /// Path of the configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    conf: PathBuf,

    /// Kill operations running longer than this many seconds, every tick.
    #[arg(short = 'K', long = "auto-kill", value_name = "SECONDS")]
    auto_kill: Option<i64>,
}

fn main() {
    // Diagnostics go to stderr so the display grid stays clean; enable with
    // RUST_LOG.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let hosts = if args.hosts.is_empty() {
        vec![DEFAULT_HOST.to_string()]
    } else {
        args.hosts.clone()
    };

    let descriptors = match config::load_servers(
        &args.conf,
        &hosts,
        args.username.as_deref(),
        args.password.as_deref(),
    ) {
        Ok(descriptors) => descriptors,
        Err(err) => {
            eprintln!("Error: {}", err);
            process::exit(1);
        }
    };
    if descriptors.is_empty() {
        eprintln!("No servers configured.");
        eprintln!(
            "List server addresses on the command line or add [[servers]] sections to {}.",
            args.conf.display()
        );
        process::exit(1);
    }

    // SIGINT during cooked-mode prompts latches here; the loop checks the
    // flag at every suspension point.
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let flag = interrupted.clone();
        let _ = ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed));
    }

    let proxies: Vec<ServerProxy> = descriptors
        .into_iter()
        .map(|descriptor| {
            ServerProxy::new(
                descriptor.clone(),
                Box::new(MongoConnector::new(descriptor)),
                Box::new(ShellKiller),
            )
        })
        .collect();
    let mut session = MonitorSession::new(proxies);
    session.connect_all();

    let console = Console::new(interrupted);
    let mut screen = QueryScreen::new(console, session, args.auto_kill);
    if let Err(err) = screen.run() {
        eprintln!("Error: {}", err);
        process::exit(1);
    }
}
