//! CLI argument parsing for the `recall` binary.
//!
//! CLI flags override every other config source.

use clap::{Parser, Subcommand};

/// vector-recall
///
/// Embedding generation, caching, and vector retrieval.
#[derive(Parser, Debug)]
#[command(name = "recall")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/vector-recall/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate an embedding for a text
    Embed {
        /// Text to embed
        text: String,

        /// Model (default from config)
        #[arg(short, long)]
        model: Option<String>,

        /// Requested output dimensions (models with reducible output only)
        #[arg(long)]
        dimensions: Option<usize>,

        /// Print the full vector as JSON
        #[arg(long)]
        json: bool,
    },

    /// Search a collection for text
    Query {
        /// Query text
        text: String,

        /// Collection to search
        #[arg(short = 'C', long)]
        collection: String,

        /// Model (default from config)
        #[arg(short, long)]
        model: Option<String>,

        /// Maximum number of results
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,

        /// Minimum score
        #[arg(long)]
        threshold: Option<f32>,

        /// Payload filter as JSON ({"must": [{"type": "match", ...}]})
        #[arg(long)]
        filter: Option<String>,
    },

    /// Create a collection if it does not exist
    EnsureCollection {
        /// Collection name
        name: String,

        /// Vector dimensionality
        #[arg(long)]
        size: usize,

        /// Distance metric (cosine, euclidean, dot)
        #[arg(long, default_value = "cosine")]
        metric: String,
    },

    /// Upsert points from a JSON file ([{"id", "vector", "payload"}])
    Upsert {
        /// Collection name
        collection: String,

        /// Path to the JSON file
        file: String,

        /// Points per request (0 = configured default)
        #[arg(long, default_value_t = 0)]
        batch_size: usize,
    },

    /// Show point count and config of a collection
    Describe {
        /// Collection name
        collection: String,
    },

    /// List registered embedding models
    Models,
}
