//! Skiff DTN node CLI
//!
//! Run a store-and-forward DTN node core.
//!
//! Usage:
//!   skiff-cli --serve                         # Run a node
//!   skiff-cli --serve --eid dtn://alpha       # Set the local EID
//!   skiff-cli --serve --max-storage 50GB      # Cap bundle storage

use std::env;
use std::path::PathBuf;

use tracing::info;

use skiff_core::{Daemon, DaemonConfig};

fn print_usage() {
    println!("Skiff DTN Node v0.1.0");
    println!();
    println!("Usage:");
    println!("  skiff-cli --serve                     Run a node");
    println!();
    println!("Options:");
    println!("  --serve, -s                 Run in serve mode (required)");
    println!("  --eid <EID>                 Local endpoint id (default: dtn://skiff)");
    println!("  --workdir <PATH>            Bundle storage directory");
    println!("  --max-storage <SIZE>        Storage cap (e.g., 50GB, 100MB; default: unbounded)");
    println!("  --autoconnect <SECS>        Auto-connect interval (default: 0 = disabled)");
    println!("  --help, -h                  Show this help");
    println!();
    println!("Environment:");
    println!("  RUST_LOG                    Set log level (e.g., info, debug)");
}

/// Parse a human-readable size string into bytes (e.g., "50GB", "100MB")
fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim().to_uppercase();

    let num_end = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (num_str, unit) = s.split_at(num_end);

    let num: f64 = num_str.parse().ok()?;

    let multiplier: u64 = match unit.trim() {
        "" | "B" => 1,
        "KB" | "K" => 1024,
        "MB" | "M" => 1024 * 1024,
        "GB" | "G" => 1024 * 1024 * 1024,
        "TB" | "T" => 1024 * 1024 * 1024 * 1024,
        _ => return None,
    };

    Some((num * multiplier as f64) as u64)
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    let show_help = args.iter().any(|a| a == "--help" || a == "-h");
    let serve_mode = args.iter().any(|a| a == "--serve" || a == "-s");

    if show_help || !serve_mode {
        print_usage();
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let eid: String = args
        .windows(2)
        .find(|w| w[0] == "--eid")
        .map(|w| w[1].clone())
        .unwrap_or_else(|| "dtn://skiff".to_string());

    let workdir: Option<PathBuf> = args
        .windows(2)
        .find(|w| w[0] == "--workdir")
        .map(|w| PathBuf::from(&w[1]));

    let max_storage: Option<u64> = args
        .windows(2)
        .find(|w| w[0] == "--max-storage")
        .and_then(|w| {
            parse_size(&w[1]).or_else(|| {
                eprintln!("Invalid --max-storage value: {}", w[1]);
                eprintln!("  Expected format: 50GB, 100MB, 1TB, etc.");
                None
            })
        });

    let autoconnect: u64 = args
        .windows(2)
        .find(|w| w[0] == "--autoconnect")
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(0);

    let mut config = DaemonConfig::new()
        .with_local_eid(eid)
        .with_auto_connect_interval(autoconnect);
    if let Some(path) = workdir {
        config = config.with_workdir(path);
    }
    if let Some(bytes) = max_storage {
        config = config.with_max_storage(bytes);
    }

    let daemon = match Daemon::start(config).await {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Failed to start: {}", e);
            std::process::exit(1);
        }
    };

    info!("node running, press Ctrl+C to stop");
    let _ = tokio::signal::ctrl_c().await;

    daemon.stop().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size("1024"), Some(1024));
        assert_eq!(parse_size("1KB"), Some(1024));
        assert_eq!(parse_size("100MB"), Some(100 * 1024 * 1024));
        assert_eq!(parse_size("50GB"), Some(50 * 1024 * 1024 * 1024));
        assert_eq!(parse_size("1.5GB"), Some((1.5 * 1024.0 * 1024.0 * 1024.0) as u64));
    }

    #[test]
    fn test_parse_size_rejects_garbage() {
        assert_eq!(parse_size("lots"), None);
        assert_eq!(parse_size("10XB"), None);
    }
}
