//! Target-language support.
//!
//! - `registry`: the fixed, enumerated set of languages and their metadata
//! - `language`: the validated `Language` type the pipeline accepts
//!
//! ```rust,ignore
//! use html_localizer::i18n::{Language, LanguageRegistry};
//!
//! let spanish = Language::from_code("es")?;
//! let german: Language = "German".parse()?;
//! let languages = LanguageRegistry::get().list_enabled();
//! ```

mod language;
mod registry;

pub use language::Language;
pub use registry::{LanguageConfig, LanguageRegistry};
