//! Interactive table page
//!
//! Runs one table session in the terminal and reads guest actions from
//! stdin: `call`, `back`, `refresh`, `wifi`, `quit`. With `--memory` the
//! session runs against an in-memory backend and `resolve` plays the
//! waiter clearing the call.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use shared::TableRecord;
use table_client::logger::init_logger_with_file;
use table_client::{
    ClientConfig, FeedClient, FeedClientConfig, FileFlagStore, MemoryBackend, RevealOutcome,
    SessionConfig, SessionServices, TableSession, TableView, VenueConfig, WifiGate,
};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, Parser)]
#[command(name = "table-session", about = "Call a waiter from a dining table")]
struct Args {
    /// Page path, e.g. `/mesa/12` or `/12`
    #[arg(default_value = "/")]
    path: String,

    /// Page query string, e.g. `code=A7`
    #[arg(long)]
    query: Option<String>,

    /// Run against an in-memory backend
    #[arg(long)]
    memory: bool,

    /// Directory for local flags
    #[arg(long, env = "TABLE_DATA_DIR", default_value = ".table-session")]
    data_dir: String,

    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    #[arg(long, env = "LOG_DIR")]
    log_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_logger_with_file(args.log_level.as_deref(), args.log_dir.as_deref());

    let session_config = SessionConfig::from_env();
    let backend = args.memory.then(demo_backend);
    let services = match &backend {
        Some(backend) => SessionServices::memory(backend),
        None => remote_services().await?,
    };

    let session = TableSession::from_location(
        &args.path,
        args.query.as_deref(),
        services,
        session_config,
    );

    let wifi = VenueConfig::from_env().map(|venue| {
        WifiGate::new(
            venue,
            Arc::new(FileFlagStore::new(&args.data_dir, "flags.json")),
        )
    });

    let mut view = session.watch();
    render(&view.borrow_and_update());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                render(&view.borrow_and_update());
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match line.trim() {
                    "" => {}
                    "call" => session.call_waiter().await?,
                    "back" => session.back_to_menu().await?,
                    "refresh" => session.refresh().await?,
                    "wifi" => match &wifi {
                        Some(gate) => match gate.request_reveal()? {
                            RevealOutcome::OpenSocial(url) => println!("Follow us first: {url}"),
                            RevealOutcome::Reveal(password) => println!("WiFi password: {password}"),
                        },
                        None => println!("WiFi is not configured"),
                    },
                    "resolve" => match (&backend, session.view().table) {
                        (Some(backend), Some(table)) => {
                            backend.resolve(table.id);
                        }
                        _ => println!("resolve needs --memory and a loaded table"),
                    },
                    "quit" | "exit" => break,
                    other => println!("Unknown command: {other}"),
                }
            }
        }
    }

    session.close().await;
    Ok(())
}

async fn remote_services() -> Result<SessionServices> {
    let config = ClientConfig::from_env();
    let http = config
        .build_http_client()
        .context("Failed to build HTTP client")?;
    let feed_addr = config
        .feed_addr
        .as_deref()
        .context("TABLE_FEED_ADDR must be set unless --memory is used")?;
    let feed = FeedClient::connect(feed_addr, FeedClientConfig::default())
        .await
        .with_context(|| format!("Failed to connect to change feed at {feed_addr}"))?;
    Ok(SessionServices::new(Arc::new(http), Arc::new(feed)))
}

fn demo_backend() -> MemoryBackend {
    let backend = MemoryBackend::new();
    for id in 1..=12 {
        backend.insert(TableRecord::new(id, id.to_string()).with_name(format!("Mesa {id}")));
    }
    backend
}

fn render(view: &TableView) {
    let table = view
        .table
        .as_ref()
        .map(|t| t.name.clone().unwrap_or_else(|| t.code.clone()))
        .unwrap_or_else(|| "-".into());
    match &view.error {
        Some(error) => println!("[{}] {} ({})", view.phase, table, error),
        None => println!("[{}] {}", view.phase, table),
    }
}
