//! darkpdf binary
//!
//! Entry point for the dark-mode PDF converter.

use anyhow::bail;
use clap::{Parser, Subcommand};
use darkpdf_cli::{commands, Config};
use darkpdf_core::{CancellationToken, Color, RenderOptions, Theme};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "darkpdf")]
#[command(version, about = "Dark-mode conversion and annotation recoloring for PDF files")]
struct Args {
    /// TOML config file with conversion defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level, overriding RUST_LOG
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Invert or theme-recolor PDFs
    Convert {
        /// Input PDF files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Recolor to a theme (dark-gray, pure-black, night-blue or #RRGGBB)
        #[arg(short, long)]
        theme: Option<Theme>,

        /// Drop annotations from the output
        #[arg(long)]
        no_annotations: bool,

        /// Paint annotations into the page instead of keeping them as objects
        #[arg(long)]
        flatten_annotations: bool,

        /// Directory for converted files (default: next to each input)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Appended to the input file stem
        #[arg(long)]
        suffix: Option<String>,
    },

    /// List distinct annotation colors
    Colors {
        input: PathBuf,
    },

    /// Replace one annotation color with another
    Replace {
        input: PathBuf,

        /// Color to replace (#RRGGBB or #RRGGBBAA)
        #[arg(long)]
        from: Color,

        /// New color
        #[arg(long)]
        to: Color,

        /// Output file (default: <input>_recolored.pdf)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Render a page to PNG
    Preview {
        input: PathBuf,

        /// 1-indexed page number
        #[arg(short, long, default_value = "1")]
        page: u32,

        /// Pixels per PDF point
        #[arg(short, long, default_value = "1.0")]
        scale: f32,

        /// Leave annotations out of the preview
        #[arg(long)]
        no_annotations: bool,

        /// Output PNG file
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries command output. RUST_LOG wins unless
    // --verbose forces debug.
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = darkpdf_cli::log_filter(args.verbose, rust_log.as_deref());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    match args.command {
        Command::Convert {
            inputs,
            theme,
            no_annotations,
            flatten_annotations,
            output_dir,
            suffix,
        } => {
            if theme.is_some() {
                config.theme = theme;
            }
            if no_annotations {
                config.include_annotations = false;
            }
            if flatten_annotations {
                config.flatten_annotations = true;
            }
            if output_dir.is_some() {
                config.output_dir = output_dir;
            }
            if let Some(suffix) = suffix {
                config.suffix = suffix;
            }

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, cancelling conversions");
                    on_interrupt.cancel();
                }
            });

            let summary = commands::convert(&config, &inputs, cancel).await?;
            for path in &summary.written {
                println!("{}", path.display());
            }
            if !summary.failed.is_empty() {
                for (input, reason) in &summary.failed {
                    eprintln!("{}: {}", input.display(), reason);
                }
                bail!(
                    "{} of {} conversions failed",
                    summary.failed.len(),
                    inputs.len()
                );
            }
        }
        Command::Colors { input } => {
            for line in commands::colors(&input)? {
                println!("{}", line);
            }
        }
        Command::Replace {
            input,
            from,
            to,
            output,
        } => {
            let written = commands::replace(&input, from, to, output)?;
            println!("{}", written.display());
        }
        Command::Preview {
            input,
            page,
            scale,
            no_annotations,
            output,
        } => {
            let options = RenderOptions {
                scale,
                include_annotations: !no_annotations,
                ..Default::default()
            };
            commands::preview(&input, page, &options, &output)?;
            println!("{}", output.display());
        }
    }

    Ok(())
}
