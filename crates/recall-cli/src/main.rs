//! vector-recall CLI
//!
//! Embed text, manage collections, and run retrieval queries against the
//! configured model backend and vector index.
//!
//! # Usage
//!
//! ```bash
//! recall embed "some text" [--model MODEL]
//! recall ensure-collection kb --size 768 [--metric cosine]
//! recall upsert kb points.json [--batch-size 100]
//! recall query "find A" --collection kb [--limit 10]
//! recall describe kb
//! recall models
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/vector-recall/config.toml)
//! 3. `--config` file
//! 4. Environment variables (RECALL__SECTION__KEY)
//! 5. CLI flags

use anyhow::Result;
use clap::Parser;

use recall_cli::{run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    run(cli).await
}
