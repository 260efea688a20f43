use thiserror::Error;

/// Result type alias for darkpdf operations
pub type Result<T> = std::result::Result<T, DarkPdfError>;

/// Errors that abort a whole conversion or replacement.
///
/// A page that cannot be rendered is not an error: it is reported as
/// [`crate::PageOutcome::Skipped`] and the conversion carries on.
#[derive(Error, Debug)]
pub enum DarkPdfError {
    #[error("Failed to open PDF: {0}")]
    Open(String),

    #[error("Failed to initialize drawing surface: {0}")]
    Context(String),

    #[error("Failed to encode output PDF: {0}")]
    Encode(String),

    #[error("Conversion cancelled")]
    Cancelled,

    #[error("Invalid color: {0}")]
    InvalidColor(String),

    #[cfg(feature = "runtime")]
    #[error("Conversion task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DarkPdfError {
    /// Short, stable label for the error kind, used in logs and CLI summaries
    pub fn kind(&self) -> &'static str {
        match self {
            DarkPdfError::Open(_) => "open",
            DarkPdfError::Context(_) => "context",
            DarkPdfError::Encode(_) => "encode",
            DarkPdfError::Cancelled => "cancelled",
            DarkPdfError::InvalidColor(_) => "invalid-color",
            #[cfg(feature = "runtime")]
            DarkPdfError::Task(_) => "task",
            DarkPdfError::Io(_) => "io",
        }
    }
}
