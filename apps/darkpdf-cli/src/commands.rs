//! Subcommand implementations
//!
//! Inputs are read fully into memory and never written. Outputs are written
//! through a temporary file in the destination directory and persisted over
//! the target only once complete, so a failed run leaves existing files alone.

use anyhow::{bail, Context};
use darkpdf_core::{
    convert_all, distinct_colors, render_page, replace_annotation_color, BatchJob,
    CancellationToken, Color, RenderOptions, SourceDocument,
};
use image::ImageFormat;
use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{error, info, warn};

use crate::config::Config;

/// What a `convert` run produced
#[derive(Debug, Default)]
pub struct ConvertSummary {
    pub written: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
    pub skipped_pages: usize,
}

/// Convert every input concurrently and write the results
pub async fn convert(config: &Config, inputs: &[PathBuf], cancel: CancellationToken) -> anyhow::Result<ConvertSummary> {
    if inputs.is_empty() {
        bail!("no input files given");
    }
    let outputs = output_paths(config, inputs)?;
    if let Some(dir) = &config.output_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
    }

    let mut jobs = Vec::with_capacity(inputs.len());
    for input in inputs {
        let bytes = fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
        jobs.push(BatchJob::new(input.display().to_string(), bytes));
    }

    let mut summary = ConvertSummary::default();
    let results = convert_all(jobs, config.convert_options(), cancel).await;
    for ((input, output), batch) in inputs.iter().zip(outputs).zip(results) {
        let conversion = match batch.result {
            Ok(conversion) => conversion,
            Err(e) => {
                error!(input = %input.display(), kind = e.kind(), "conversion failed: {}", e);
                summary.failed.push((input.clone(), e.to_string()));
                continue;
            }
        };
        for (index, reason) in conversion.skipped() {
            warn!(input = %input.display(), page = index + 1, "page skipped: {}", reason);
            summary.skipped_pages += 1;
        }

        write_atomic(&output, &conversion.bytes)?;
        info!(
            input = %input.display(),
            output = %output.display(),
            pages = conversion.rendered_count(),
            elapsed_ms = conversion.processing_time_ms,
            "wrote converted document"
        );
        summary.written.push(output);
    }
    Ok(summary)
}

/// Output path per input, rejecting inputs that would overwrite each other
fn output_paths(config: &Config, inputs: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut seen: HashMap<PathBuf, &PathBuf> = HashMap::new();
    let mut outputs = Vec::with_capacity(inputs.len());
    for input in inputs {
        let output = config.output_path(input);
        if let Some(previous) = seen.insert(output.clone(), input) {
            bail!(
                "{} and {} would both be written to {}",
                previous.display(),
                input.display(),
                output.display()
            );
        }
        outputs.push(output);
    }
    Ok(outputs)
}

/// Distinct annotation colors as hex labels
pub fn colors(input: &Path) -> anyhow::Result<Vec<String>> {
    let source = SourceDocument::open(input).with_context(|| format!("Failed to open {}", input.display()))?;
    Ok(distinct_colors(&source)
        .iter()
        .map(Color::to_string)
        .collect())
}

/// Replace an annotation color and write the result
pub fn replace(input: &Path, from: Color, to: Color, output: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let bytes = fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let replacement = replace_annotation_color(&bytes, from, to)
        .with_context(|| format!("Failed to replace colors in {}", input.display()))?;
    let output = output.unwrap_or_else(|| sibling_path(input, "_recolored", "pdf"));
    write_atomic(&output, &replacement.bytes)?;
    info!(
        annotations = replacement.annotations_changed,
        appearances = replacement.appearances_changed,
        output = %output.display(),
        "replaced {} with {}",
        from,
        to
    );
    Ok(output)
}

/// Render one page to PNG
pub fn preview(input: &Path, page: u32, options: &RenderOptions, output: &Path) -> anyhow::Result<()> {
    let source = SourceDocument::open(input).with_context(|| format!("Failed to open {}", input.display()))?;
    let image = render_page(&source, page, options)
        .with_context(|| format!("Failed to render page {} of {}", page, input.display()))?;
    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .context("Failed to encode PNG")?;
    write_atomic(output, &png)?;
    info!(output = %output.display(), width = image.width(), height = image.height(), "wrote preview");
    Ok(())
}

/// `<dir>/<stem><suffix>.<extension>` next to `input`
fn sibling_path(input: &Path, suffix: &str, extension: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    input.with_file_name(format!("{}{}.{}", stem, suffix, extension))
}

/// Write `bytes` to `path` via a temp file in the same directory
pub fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    file.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to move output into place: {}", path.display()))?;
    Ok(())
}
