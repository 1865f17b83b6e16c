//! Entry point for the recursive gateway process (spec §4.7): spawned
//! over ssh by a `TreeWorker` (or by another gateway one hop further
//! down), never invoked interactively. Everything it needs to do its job
//! — targets, command, timeouts, grooming delay — arrives in the first
//! `Ctl` frame on stdin; the only thing a caller can fix up front is how
//! far this hop's own recursion goes.

mod session;

use std::fs;
use std::path::Path;

use clap::Parser;
use cls_core::NodeSet;
use cls_tree::RouteTable;
use session::GatewaySession;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cls-gateway", about = "Recursive gateway process for the tree propagator")]
struct Args {
    /// Further routing table for hops beyond this gateway, as a JSON array
    /// of `{"gateway": "...", "covers": "nodeset-text"}` objects. Omitted
    /// for a leaf gateway, which just runs everything it's handed locally.
    #[arg(long)]
    routes_json: Option<std::path::PathBuf>,

    /// Byte budget before the output groomer flushes early (spec §4.7
    /// "Grooming buffer overrun").
    #[arg(long, default_value_t = 1 << 20)]
    max_groom_bytes: usize,
}

#[derive(serde::Deserialize)]
struct RouteEntry {
    gateway: String,
    covers: String,
}

fn load_routes(path: &Path) -> RouteTable {
    let mut table = RouteTable::new();
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(?path, error = %err, "could not read routes file, treating this hop as a leaf");
            return table;
        }
    };
    let entries: Vec<RouteEntry> = match serde_json::from_str(&text) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(?path, error = %err, "malformed routes file, treating this hop as a leaf");
            return table;
        }
    };
    for entry in entries {
        match NodeSet::parse(&entry.covers, None) {
            Ok(covers) => {
                table.add_route(entry.gateway, covers);
            }
            Err(err) => {
                tracing::warn!(gateway = %entry.gateway, error = %err, "skipping malformed route entry");
            }
        }
    }
    table
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let routes = args.routes_json.as_deref().map(load_routes).unwrap_or_default();

    let session = GatewaySession {
        routes,
        max_groomed_bytes: args.max_groom_bytes,
    };

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    if let Err(err) = session.run(stdin.lock(), stdout) {
        tracing::error!(error = %err, "gateway session ended with an error");
        std::process::exit(1);
    }
}
