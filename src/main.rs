//! AirHound companion — session recorder for the FlockYou scanning peripheral.
//!
//! Replays captured peripheral traffic (or synthetic demo traffic) through a
//! scanning session, prints the proximity, pinned and alert views, and
//! manages the sessions recorded on disk.

mod demo;

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use airhound_companion::comm::{self, peripheral};
use airhound_companion::config::CompanionConfig;
use airhound_companion::defaults::BuiltinTables;
use airhound_companion::scanner::{now_millis, QueryResult, Scanner};
use airhound_companion::store::{FileStore, PersistenceWorker, SnapshotStore};
use airhound_companion::{MacAddress, ScanResults, Summary};

#[derive(Parser, Debug)]
#[command(name = "airhound-companion", version, about = "Session recorder for the FlockYou scanning peripheral")]
struct Cli {
    /// Configuration file (TOML); defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Feed a length-prefixed capture through a new session
    Replay {
        /// Capture file
        capture: PathBuf,

        /// Always list this MAC (repeatable)
        #[arg(long = "pin")]
        pins: Vec<MacAddress>,

        /// Do not record the session
        #[arg(long)]
        no_store: bool,
    },
    /// Generate a synthetic session
    Demo {
        /// Number of frames to generate
        #[arg(long, default_value_t = 60)]
        frames: usize,

        /// Seed for the traffic generator (defaults to the clock)
        #[arg(long)]
        seed: Option<u64>,

        /// Also write the generated frames as a capture file
        #[arg(long)]
        record: Option<PathBuf>,

        /// Do not record the session
        #[arg(long)]
        no_store: bool,
    },
    /// Manage recorded sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsCommand,
    },
}

#[derive(Subcommand, Debug)]
enum SessionsCommand {
    /// List recorded sessions, oldest first
    List,
    /// Print one recorded session
    Show { key: String },
    /// Delete one recorded session
    Delete { key: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CompanionConfig::load_or_default(cli.config.as_deref())?;

    // RUST_LOG wins over the configured level
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    match cli.command {
        Commands::Replay {
            capture,
            pins,
            no_store,
        } => replay(&config, &capture, pins, no_store),
        Commands::Demo {
            frames,
            seed,
            record,
            no_store,
        } => run_demo(&config, frames, seed, record.as_deref(), no_store),
        Commands::Sessions { action } => sessions(&config, action),
    }
}

/// Open a session, persisting to the configured store unless disabled.
fn open_session(config: &CompanionConfig, scan_started: u64, no_store: bool) -> Result<Scanner> {
    let scanner = Scanner::new(scan_started);
    if no_store || !config.persistence.enabled {
        return Ok(scanner);
    }

    let store = FileStore::open(&config.store.dir)?;
    log::info!(
        "Recording session {scan_started} to {}",
        store.dir().display()
    );
    let worker = PersistenceWorker::spawn(Arc::new(store))
        .context("Failed to start persistence thread")?;
    Ok(scanner.with_persistence(worker))
}

fn replay(config: &CompanionConfig, capture: &Path, pins: Vec<MacAddress>, no_store: bool) -> Result<()> {
    let file = File::open(capture)
        .with_context(|| format!("Failed to open capture {}", capture.display()))?;
    let frames = comm::read_frames(BufReader::new(file))
        .with_context(|| format!("Failed to read capture {}", capture.display()))?;
    log::info!("Replaying {} frames from {}", frames.len(), capture.display());

    let mut scanner = open_session(config, now_millis(), no_store)?;
    scanner.on_connect();
    for frame in &frames {
        // Errors land in the session error log
        let _ = scanner.ingest(frame);
    }
    scanner.on_disconnect();
    scanner.shutdown();

    let pinned: HashSet<MacAddress> = pins.into_iter().collect();
    let view = scanner.query(
        config.query.recency_window_ms,
        config.query.strength_threshold,
        &pinned,
    );
    print_session_header(scanner.results());
    print_views(&view);
    print_errors(&scanner);
    Ok(())
}

fn run_demo(
    config: &CompanionConfig,
    frames: usize,
    seed: Option<u64>,
    record: Option<&Path>,
    no_store: bool,
) -> Result<()> {
    let started = now_millis();
    let mut generator = demo::Generator::new(seed.unwrap_or(started));
    let mut recorder = match record {
        Some(path) => Some(BufWriter::new(File::create(path).with_context(|| {
            format!("Failed to create capture {}", path.display())
        })?)),
        None => None,
    };

    log::info!(
        "Simulating {} ({:08X}) for {frames} frames",
        peripheral::DEVICE_NAME,
        peripheral::SERVICE_UUID
    );
    let mut scanner = open_session(config, started, no_store)?;
    scanner.on_connect();

    // One frame every 250 ms of simulated time
    let mut now = started;
    for _ in 0..frames {
        now += 250;
        let frame = generator.next_frame().to_bytes()?;
        if let Some(out) = recorder.as_mut() {
            comm::write_frame(out, &frame)?;
        }
        let _ = scanner.ingest_at(&frame, now);
    }
    if let Some(mut out) = recorder {
        out.flush()?;
    }
    scanner.on_disconnect();
    scanner.shutdown();

    let view = scanner.query_at(
        now,
        config.query.recency_window_ms,
        config.query.strength_threshold,
        &HashSet::new(),
    );
    print_session_header(scanner.results());
    print_views(&view);
    print_errors(&scanner);
    Ok(())
}

fn sessions(config: &CompanionConfig, action: SessionsCommand) -> Result<()> {
    let store = FileStore::open(&config.store.dir)?;
    match action {
        SessionsCommand::List => {
            let keys = store.list_keys()?;
            if keys.is_empty() {
                println!("No sessions in {}", store.dir().display());
            }
            for key in keys {
                match store.get(&key)? {
                    Some(snapshot) => println!(
                        "{key}  wifi={:<4} ble={:<4} last event {}",
                        snapshot.wifi.len(),
                        snapshot.ble.len(),
                        snapshot.last_event_timestamp
                    ),
                    None => println!("{key}  (vanished)"),
                }
            }
        }
        SessionsCommand::Show { key } => {
            let Some(snapshot) = store.get(&key)? else {
                bail!("No session {key} in {}", store.dir().display());
            };
            let results = ScanResults::from_snapshot(snapshot)
                .with_context(|| format!("Session {key} is corrupt"))?;
            print_session_header(&results);
            println!("Devices ({})", results.device_count());
            for summary in results.summaries() {
                print_summary(summary);
            }
        }
        SessionsCommand::Delete { key } => {
            store.delete(&key)?;
            println!("Deleted session {key}");
        }
    }
    Ok(())
}

// ── Output ───────────────────────────────────────────────────────────

fn print_session_header(results: &ScanResults) {
    println!(
        "Session {}: {} Wi-Fi, {} BLE, last event {}",
        results.scan_started(),
        results.wifi().len(),
        results.ble().len(),
        results.last_event()
    );
}

fn print_views(view: &QueryResult<'_>) {
    for (title, list) in [
        ("Nearby", &view.matched),
        ("Pinned", &view.pinned),
        ("Detected", &view.detected),
    ] {
        println!("{title} ({})", list.len());
        for summary in list {
            print_summary(summary);
        }
    }
}

fn print_summary(summary: &Summary) {
    let detections: Vec<&str> = summary
        .detections()
        .iter()
        .map(|d| d.kind.label())
        .collect();
    println!(
        "  {:<4} {}  {:>4} dBm  x{:<4} {:<24} {:<20} {}",
        summary.kind().as_str(),
        summary.mac,
        summary.latest_strength(),
        summary.samples().len(),
        summary.display_name().unwrap_or("-"),
        summary.vendor(&BuiltinTables).unwrap_or("-"),
        detections.join(",")
    );
}

fn print_errors(scanner: &Scanner) {
    let errors = scanner.errors();
    if errors.is_empty() {
        return;
    }
    println!("Errors ({})", errors.len());
    for entry in errors {
        println!("  {}  {}", entry.at, entry.error);
    }
}
