use crate::i18n::Language;
use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

/// An HTML document and the language to localize it into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub html: String,
    pub language: Language,
}

impl Document {
    pub fn new(html: impl Into<String>, language: Language) -> Self {
        Self {
            html: html.into(),
            language,
        }
    }

    /// Load a document from an HTML file.
    pub fn from_file(path: impl AsRef<Path>, language: Language) -> Result<Self> {
        let path = path.as_ref();
        let html = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read document: {}", path.display()))?;

        Ok(Self::new(html, language))
    }
}

/// Write the localized HTML to `path`, or to stdout when no path is given.
pub fn write_output(path: Option<&Path>, html: &str) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, html)
            .with_context(|| format!("Failed to write output: {}", path.display())),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(html.as_bytes())
                .and_then(|_| stdout.flush())
                .context("Failed to write output to stdout")
        }
    }
}
