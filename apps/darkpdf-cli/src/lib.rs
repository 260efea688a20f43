//! darkpdf command-line front end
//!
//! Thin layer over `darkpdf-core`: reads inputs from paths, merges the TOML
//! config with command-line flags and writes outputs atomically.

pub mod commands;
pub mod config;

pub use config::Config;

use tracing_subscriber::EnvFilter;

/// Log filter: `--verbose` forces debug, otherwise `RUST_LOG`, otherwise info
pub fn log_filter(verbose: bool, rust_log: Option<&str>) -> EnvFilter {
    if verbose {
        return EnvFilter::new("debug");
    }
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}
