
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use boardsync::clock::SystemClock;
use boardsync::config::SyncConfig;
use boardsync::geometry::Bounds;
use boardsync::model::{BoardObject, Geometry, ObjectKind};
use boardsync::persistence::SnapshotEvent;
use boardsync::reconcile::{ChangeType, ObjectMap, RemoteChange, reconcile};
use boardsync::session::BoardSession;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid viewport `{0}`; expected x,y,w,h")]
    InvalidViewport(String),
}

#[derive(Parser, Debug)]
#[command(name = "boardsync", about = "Board sync core: snapshot replay and reconciliation bench")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply a JSON array of snapshot events to a fresh session and summarise.
    Replay(ReplayArgs),
    /// Time reconciliation of a few modifications against a large board.
    Bench(BenchArgs),
}

#[derive(Args, Debug)]
struct ReplayArgs {
    file: PathBuf,
    /// Viewport as x,y,w,h.
    #[arg(long)]
    viewport: Option<String>,
    #[arg(long, default_value = "replay")]
    board_id: String,
}

#[derive(Args, Debug)]
struct BenchArgs {
    #[arg(long, default_value_t = 1000)]
    objects: usize,
    #[arg(long, default_value_t = 5)]
    modifications: usize,
    #[arg(long, default_value_t = 1000)]
    iterations: usize,
}

fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Replay(args) => run_replay(&args),
        Command::Bench(args) => run_bench(&args),
    }
}

fn run_replay(args: &ReplayArgs) -> Result<(), CliError> {
    let viewport = args.viewport.as_deref().map(parse_viewport).transpose()?;
    let raw = std::fs::read_to_string(&args.file)?;
    let events: Vec<SnapshotEvent> = serde_json::from_str(&raw)?;

    let config = SyncConfig::from_env();
    let mut session = BoardSession::new(&config, Arc::new(SystemClock));
    session.set_board(Some(args.board_id.clone()));

    let mut changed_events = 0usize;
    for event in &events {
        if session.apply_snapshot(event) {
            changed_events += 1;
        }
    }
    info!(events = events.len(), changed_events, "replay complete");

    let store = session.store();
    let visible = viewport.map(|rect| session.visible_ids(&rect));
    let summary = json!({
        "boardId": args.board_id,
        "events": events.len(),
        "changedEvents": changed_events,
        "objects": store.len(),
        "frames": store.frames().len(),
        "indexRebuilds": store.index_rebuilds(),
        "visibleIds": visible,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn run_bench(args: &BenchArgs) -> Result<(), CliError> {
    let objects: ObjectMap = (0..args.objects)
        .map(|i| {
            let id = format!("obj-{i}");
            #[allow(clippy::cast_precision_loss)]
            let x = (i % 100) as f64 * 120.0;
            #[allow(clippy::cast_precision_loss)]
            let y = (i / 100) as f64 * 120.0;
            (id.clone(), BoardObject::new(id, x, y, Geometry::area(ObjectKind::StickyNote, 100.0, 100.0)))
        })
        .collect();
    let current = Arc::new(objects);

    let step = (args.objects / args.modifications.max(1)).max(1);
    let mut changes = Vec::with_capacity(args.modifications);
    for obj in current.values().step_by(step).take(args.modifications) {
        let mut moved = obj.clone();
        moved.x += 1.0;
        changes.push(RemoteChange::from_object(ChangeType::Modified, &moved)?);
    }

    let iterations = args.iterations.max(1);
    let started = Instant::now();
    let mut touched = 0usize;
    for _ in 0..iterations {
        touched += reconcile(&current, &changes).touched.len();
    }
    let elapsed = started.elapsed();
    #[allow(clippy::cast_precision_loss)]
    let mean_us = elapsed.as_secs_f64() * 1e6 / iterations as f64;

    let summary = json!({
        "objects": args.objects,
        "modifications": changes.len(),
        "iterations": iterations,
        "touchedPerPass": touched / iterations,
        "meanMicros": mean_us,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn parse_viewport(raw: &str) -> Result<Bounds, CliError> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| CliError::InvalidViewport(raw.to_owned()))?;
    let [x, y, w, h] = parts[..] else {
        return Err(CliError::InvalidViewport(raw.to_owned()));
    };
    Ok(Bounds::from_rect(x, y, w, h))
}
