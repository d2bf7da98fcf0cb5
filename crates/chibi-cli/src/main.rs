use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chibi_contracts::events::EventWriter;
use chibi_contracts::runs::records::{JsonRecordStore, RecordStore};
use chibi_contracts::runs::summary::write_summary;
use chibi_engine::config::EngineConfig;
use chibi_engine::gemini::GeminiModelService;
use chibi_engine::invoker::FallbackInvoker;
use chibi_engine::model::ModelService;
use chibi_engine::pipeline::ChibiPipeline;
use chibi_engine::policy::{BackoffPolicy, PacingPolicy};
use chibi_engine::scanner::PersonScanner;
use chibi_engine::segmenter::{remove_background, Segmentation};
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "chibi-rs", version, about = "Chibi portrait pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Run(RunArgs),
    Scan(ScanArgs),
    Segment(SegmentArgs),
}

#[derive(Debug, Default, Parser)]
struct MediaArgs {
    #[arg(long)]
    media_root: Option<PathBuf>,
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    public_prefix: Option<String>,
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    record: String,
    #[arg(long = "photo")]
    photos: Vec<String>,
    #[command(flatten)]
    media: MediaArgs,
    /// JSON record file; photos are read from it when none are given and
    /// the produced paths are written back.
    #[arg(long)]
    records: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    summary: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ScanArgs {
    #[arg(long = "photo", required = true)]
    photos: Vec<String>,
    #[arg(long)]
    media_root: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct SegmentArgs {
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    output: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("chibi-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run_pipeline(args),
        Command::Scan(args) => run_scan(args),
        Command::Segment(args) => run_segment(args),
    }
}

fn run_pipeline(args: RunArgs) -> Result<i32> {
    let config = apply_media_overrides(EngineConfig::from_env()?, &args.media);
    let service: Arc<dyn ModelService> = Arc::new(GeminiModelService::from_config(&config)?);

    let mut store = args.records.as_ref().map(JsonRecordStore::new);
    let photos = resolve_photos(&args.photos, store.as_mut(), &args.record);
    if photos.is_empty() {
        bail!("no photos given for record {}", args.record);
    }

    let mut pipeline = ChibiPipeline::from_config(&config, service);
    if let Some(events_path) = &args.events {
        pipeline = pipeline.with_events(EventWriter::new(events_path, new_run_id()));
    }
    let outcome = pipeline.run_detailed(&photos, &args.record);
    let paths = outcome.paths();
    info!(record_id = %args.record, produced = paths.len(), "pipeline done");

    if let Some(store) = store.as_mut() {
        store.attach_chibis(&args.record, &paths)?;
    }
    if let Some(summary_path) = &args.summary {
        let mut extra = Map::new();
        extra.insert(
            "failures".to_string(),
            Value::Array(
                outcome
                    .failures
                    .iter()
                    .map(|failure| json!({ "label": failure.label, "reason": failure.reason }))
                    .collect(),
            ),
        );
        write_summary(summary_path, &outcome.summary(), Some(&extra))?;
    }
    for path in &paths {
        println!("{path}");
    }
    Ok(0)
}

fn run_scan(args: ScanArgs) -> Result<i32> {
    let media = MediaArgs {
        media_root: args.media_root,
        ..MediaArgs::default()
    };
    let config = apply_media_overrides(EngineConfig::from_env()?, &media);
    let service: Arc<dyn ModelService> = Arc::new(GeminiModelService::from_config(&config)?);
    let invoker =
        FallbackInvoker::new(service, config.scan_tiers.clone(), BackoffPolicy::default());
    let scanner = PersonScanner::new(
        Arc::new(invoker),
        &config.media_root,
        PacingPolicy::default().between_photos,
    );
    let roster = scanner.scan(&args.photos);
    println!("{}", serde_json::to_string_pretty(&roster)?);
    Ok(0)
}

fn run_segment(args: SegmentArgs) -> Result<i32> {
    let bytes = fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let segmentation = remove_background(&bytes);
    write_output(&args.output, segmentation.bytes())?;
    match &segmentation {
        Segmentation::Segmented { stats, .. } => println!(
            "segmented {}x{} ({} background, {} edge pixels)",
            stats.width, stats.height, stats.background_pixels, stats.edge_pixels
        ),
        Segmentation::Fallback { reason, .. } => println!("unsegmented: {reason}"),
    }
    Ok(0)
}

fn apply_media_overrides(mut config: EngineConfig, media: &MediaArgs) -> EngineConfig {
    if let Some(root) = &media.media_root {
        config.media_root = root.clone();
        if media.out.is_none() {
            config.output_dir = root.clone();
        }
    }
    if let Some(out) = &media.out {
        config.output_dir = out.clone();
    }
    if let Some(prefix) = &media.public_prefix {
        config.public_prefix = prefix.clone();
    }
    config
}

fn resolve_photos(
    explicit: &[String],
    store: Option<&mut JsonRecordStore>,
    record_id: &str,
) -> Vec<String> {
    if !explicit.is_empty() {
        return explicit.to_vec();
    }
    store.map(|store| store.photos(record_id)).unwrap_or_default()
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

fn new_run_id() -> String {
    format!("run-{}", chrono::Utc::now().format("%Y%m%dT%H%M%S"))
}
