//! Configuration file support
//!
//! An optional TOML file supplies defaults for `darkpdf convert`; flags on
//! the command line override it.
//!
//! ```toml
//! theme = "night-blue"
//! include_annotations = true
//! flatten_annotations = false
//! output_dir = "out"
//! suffix = "_dark"
//! ```

use anyhow::Context;
use darkpdf_core::{AnnotationMode, ConvertOptions, Theme, TransformKind};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Suffix appended to the input stem when naming converted files
pub const DEFAULT_SUFFIX: &str = "_inverted";

/// Conversion settings loaded from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Recolor to this theme instead of plain inversion
    pub theme: Option<Theme>,
    pub include_annotations: bool,
    /// Paint annotations into page content instead of keeping them as objects
    pub flatten_annotations: bool,
    /// Where converted files go (default: next to each input)
    pub output_dir: Option<PathBuf>,
    pub suffix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            theme: None,
            include_annotations: true,
            flatten_annotations: false,
            output_dir: None,
            suffix: DEFAULT_SUFFIX.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        toml::from_str(s).context("Failed to parse TOML configuration")
    }

    /// Options handed to the converter
    pub fn convert_options(&self) -> ConvertOptions {
        ConvertOptions {
            include_annotations: self.include_annotations,
            transform: match self.theme {
                Some(theme) => TransformKind::ThemeRecolor(theme.background()),
                None => TransformKind::Inversion,
            },
            annotation_mode: if self.flatten_annotations {
                AnnotationMode::Flatten
            } else {
                AnnotationMode::Overlay
            },
        }
    }

    /// `<output_dir or input dir>/<input stem><suffix>.pdf`
    pub fn output_path(&self, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let dir = match &self.output_dir {
            Some(dir) => dir.clone(),
            None => input.parent().map(Path::to_path_buf).unwrap_or_default(),
        };
        dir.join(format!("{}{}.pdf", stem, self.suffix))
    }
}
