//! vector-recall CLI library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations over the `Recall` facade

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::{load_points, run};
