//! Command implementations.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use recall_service::{QueryRequest, Recall};
use recall_types::{EmbeddingOptions, Settings};
use recall_vector::{DistanceMetric, Filter, VectorPoint};

use crate::cli::{Cli, Commands};

/// Load settings, apply CLI overrides, install logging, and run a command.
pub async fn run(cli: Cli) -> Result<()> {
    let mut settings =
        Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(log_level) = cli.log_level {
        settings.log_level = log_level;
    }

    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    if let Commands::Models = cli.command {
        list_models(&settings);
        return Ok(());
    }

    let recall = Recall::connect(&settings)
        .await
        .context("Failed to build retrieval pipeline")?;
    let result = dispatch(&recall, cli.command).await;
    recall.close().await;
    result
}

async fn dispatch(recall: &Recall, command: Commands) -> Result<()> {
    match command {
        Commands::Embed {
            text,
            model,
            dimensions,
            json,
        } => {
            let model = model.unwrap_or_else(|| recall.default_model().to_string());
            let mut options = EmbeddingOptions::new();
            if let Some(dimensions) = dimensions {
                options = options.with_dimensions(dimensions);
            }

            let outcome = recall
                .generate_embedding(&text, &model, &options)
                .await
                .context("Embedding failed")?;

            if json {
                println!("{}", serde_json::to_string(&outcome.vector)?);
            } else {
                println!("Model:      {}", model);
                println!("Dimensions: {}", outcome.vector.len());
                println!("Cache hit:  {}", outcome.cache_hit);
                println!("Truncated:  {}", outcome.truncated);
                let preview: Vec<String> = outcome
                    .vector
                    .iter()
                    .take(8)
                    .map(|v| format!("{:.4}", v))
                    .collect();
                println!("Vector:     [{}, ...]", preview.join(", "));
            }
        }
        Commands::Query {
            text,
            collection,
            model,
            limit,
            threshold,
            filter,
        } => {
            let mut request = QueryRequest::new(text, collection)
                .with_model(model.unwrap_or_else(|| recall.default_model().to_string()))
                .with_limit(limit);
            if let Some(threshold) = threshold {
                request = request.with_score_threshold(threshold);
            }
            if let Some(filter) = filter {
                let filter: Filter =
                    serde_json::from_str(&filter).context("Invalid --filter JSON")?;
                request = request.with_filter(filter);
            }

            let results = recall.query(&request).await.context("Query failed")?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Commands::EnsureCollection { name, size, metric } => {
            let metric: DistanceMetric = metric.parse()?;
            recall
                .ensure_collection(&name, size, metric)
                .await
                .with_context(|| format!("Failed to ensure collection {}", name))?;
            println!("Collection {} ready (size={}, distance={})", name, size, metric);
        }
        Commands::Upsert {
            collection,
            file,
            batch_size,
        } => {
            let points = load_points(Path::new(&file))?;
            recall
                .upsert_vectors(&collection, &points, batch_size)
                .await
                .with_context(|| format!("Failed to upsert into {}", collection))?;
            info!(collection = %collection, points = points.len(), "Upsert complete");
            println!("Upserted {} point(s) into {}", points.len(), collection);
        }
        Commands::Describe { collection } => {
            let stats = recall
                .describe_collection(&collection)
                .await
                .with_context(|| format!("Failed to describe {}", collection))?;
            println!("Collection:  {}", collection);
            println!("Points:      {}", stats.point_count);
            println!("Vector size: {}", stats.config.vector_size);
            println!("Distance:    {}", stats.config.distance);
        }
        Commands::Models => {}
    }
    Ok(())
}

fn list_models(settings: &Settings) {
    let registry = settings.model_registry();
    println!("{:<28} {:>6} {:>10}  TIER", "MODEL", "DIMS", "MAX_CHARS");
    for name in registry.names() {
        if let Some(model) = registry.describe(name) {
            println!(
                "{:<28} {:>6} {:>10}  {}",
                model.name,
                model.dimensions,
                model.max_input_length,
                model.performance_tier.as_str()
            );
        }
    }
}

/// Read a JSON array of points from disk.
pub fn load_points(path: &Path) -> Result<Vec<VectorPoint>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid points file {}", path.display()))
}
