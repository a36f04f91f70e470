//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use fieldline_core::config::{EngineConfig, load_config};
use fieldline_core::ingest::{ChunkStream, DetectionCache, SourceInput};
use fieldline_core::pipeline::{Pipeline, RunStatus};
use fieldline_core::sink::JsonlSink;
use std::path::{Path, PathBuf};

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            config,
            output,
            inputs,
        } => handle_run(config.as_deref(), &output, &inputs).await,
        Commands::Map { config, input } => handle_map(config.as_deref(), &input).await,
        Commands::Detect { config, input } => handle_detect(config.as_deref(), &input),
        Commands::Config { action } => handle_config(action),
    }
}

fn load(config: Option<&Path>) -> anyhow::Result<EngineConfig> {
    load_config(config, None).map_err(|e| anyhow::anyhow!("Configuration error: {}", e))
}

fn open_sources(inputs: &[PathBuf]) -> anyhow::Result<Vec<SourceInput>> {
    inputs
        .iter()
        .map(|path| {
            SourceInput::open(path)
                .map_err(|e| anyhow::anyhow!("Cannot open '{}': {}", path.display(), e))
        })
        .collect()
}

async fn handle_run(config: Option<&Path>, output: &Path, inputs: &[PathBuf]) -> anyhow::Result<()> {
    let config = load(config)?;
    let sources = open_sources(inputs)?;
    let pipeline = Pipeline::new(config);

    let token = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight chunks");
            token.cancel();
        }
    });

    let mut sink = JsonlSink::create(output)?;
    let summary = pipeline.run(sources, &mut sink).await?;

    println!(
        "Run {} finished in {} ms: {} rows in, {} rows out, quality {:.3}",
        summary.run_id,
        summary.duration_ms,
        summary.counts.rows_in,
        summary.counts.rows_out,
        summary.quality.metrics.quality_score
    );
    for warning in &summary.warnings {
        println!("  warning: {}", warning);
    }
    println!("Output written to {}", sink.dir().display());

    match summary.status {
        RunStatus::Failed(reason) => Err(anyhow::anyhow!("Run failed: {}", reason)),
        _ => Ok(()),
    }
}

async fn handle_map(config: Option<&Path>, input: &Path) -> anyhow::Result<()> {
    let config = load(config)?;
    if config.mapping.targets.is_empty() {
        anyhow::bail!("No target fields configured under [mapping.targets]");
    }
    let source = SourceInput::open(input)?;
    let pipeline = Pipeline::new(config);
    let plan = tokio::task::spawn_blocking(move || pipeline.propose_mapping(source)).await??;

    println!("{}", serde_json::to_string_pretty(&plan)?);
    if !plan.unmapped.is_empty() {
        eprintln!("Unmapped targets: {}", plan.unmapped.join(", "));
    }
    Ok(())
}

fn handle_detect(config: Option<&Path>, input: &Path) -> anyhow::Result<()> {
    let config = load(config)?;
    let source = SourceInput::open(input)?;
    let cache = DetectionCache::new();
    let stream = ChunkStream::open(&source.name, source.reader, &config.stream, &cache)?;

    let report = serde_json::json!({
        "source": source.name,
        "detection": stream.detection(),
        "compression": stream.compression(),
        "header": stream.header().as_slice(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn handle_config(action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init { path } => {
            if path.exists() {
                println!("Configuration file already exists at: {}", path.display());
                return Ok(());
            }
            let toml_str = toml::to_string_pretty(&EngineConfig::default())?;
            std::fs::write(&path, &toml_str)?;
            println!("Created default configuration at: {}", path.display());
            Ok(())
        }
        ConfigAction::Show { config } => {
            let config = load(config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
