//! Language registry: the fixed set of target languages.
//!
//! The registry is built once on first access (`OnceLock`) and is immutable
//! thereafter. Prompts address languages by their English `name`, so the
//! name is what the generation service sees.

use std::sync::OnceLock;

/// Configuration for a supported language.
#[derive(Debug, Clone)]
pub struct LanguageConfig {
    /// ISO 639-1 language code (e.g., "en", "es"), or a regional tag where
    /// the script matters (e.g., "zh-Hans")
    pub code: &'static str,

    /// English name of the language, used in prompts
    pub name: &'static str,

    /// Native name of the language
    pub native_name: &'static str,

    /// Whether this is the source language documents are authored in
    pub is_canonical: bool,

    /// Whether this language is enabled for use
    pub enabled: bool,
}

/// Global language registry singleton.
pub struct LanguageRegistry {
    languages: Vec<LanguageConfig>,
}

static REGISTRY: OnceLock<LanguageRegistry> = OnceLock::new();

impl LanguageRegistry {
    /// Get the global language registry instance.
    pub fn get() -> &'static LanguageRegistry {
        REGISTRY.get_or_init(|| LanguageRegistry {
            languages: default_languages(),
        })
    }

    /// Get a language configuration by its code (case-insensitive).
    pub fn get_by_code(&self, code: &str) -> Option<&LanguageConfig> {
        self.languages
            .iter()
            .find(|lang| lang.code.eq_ignore_ascii_case(code))
    }

    /// Get a language configuration by its English or native name (case-insensitive).
    pub fn get_by_name(&self, name: &str) -> Option<&LanguageConfig> {
        let name = name.trim();
        self.languages.iter().find(|lang| {
            lang.name.eq_ignore_ascii_case(name) || lang.native_name.to_lowercase() == name.to_lowercase()
        })
    }

    /// Get all enabled languages.
    pub fn list_enabled(&self) -> Vec<&LanguageConfig> {
        self.languages.iter().filter(|lang| lang.enabled).collect()
    }

    /// Get the canonical language configuration.
    ///
    /// # Panics
    /// Panics if the registry does not define exactly one canonical language.
    pub fn canonical(&self) -> &LanguageConfig {
        let canonical_langs: Vec<_> = self
            .languages
            .iter()
            .filter(|lang| lang.is_canonical)
            .collect();

        match canonical_langs.len() {
            0 => panic!("No canonical language found in registry"),
            1 => canonical_langs[0],
            _ => panic!("Multiple canonical languages found in registry"),
        }
    }

    /// Check if a language code is supported and enabled.
    pub fn is_enabled(&self, code: &str) -> bool {
        self.get_by_code(code)
            .map(|lang| lang.enabled)
            .unwrap_or(false)
    }
}

const fn target(code: &'static str, name: &'static str, native_name: &'static str) -> LanguageConfig {
    LanguageConfig {
        code,
        name,
        native_name,
        is_canonical: false,
        enabled: true,
    }
}

/// Default language configurations: English (canonical) plus the translation targets.
fn default_languages() -> Vec<LanguageConfig> {
    vec![
        LanguageConfig {
            code: "en",
            name: "English",
            native_name: "English",
            is_canonical: true,
            enabled: true,
        },
        target("es", "Spanish", "Español"),
        target("fr", "French", "Français"),
        target("de", "German", "Deutsch"),
        target("it", "Italian", "Italiano"),
        target("pt", "Portuguese", "Português"),
        target("nl", "Dutch", "Nederlands"),
        target("sv", "Swedish", "Svenska"),
        target("da", "Danish", "Dansk"),
        target("no", "Norwegian", "Norsk"),
        target("fi", "Finnish", "Suomi"),
        target("pl", "Polish", "Polski"),
        target("cs", "Czech", "Čeština"),
        target("ro", "Romanian", "Română"),
        target("el", "Greek", "Ελληνικά"),
        target("tr", "Turkish", "Türkçe"),
        target("ru", "Russian", "Русский"),
        target("uk", "Ukrainian", "Українська"),
        target("ar", "Arabic", "العربية"),
        target("he", "Hebrew", "עברית"),
        target("hi", "Hindi", "हिन्दी"),
        target("ja", "Japanese", "日本語"),
        target("ko", "Korean", "한국어"),
        target("zh-Hans", "Chinese (Simplified)", "简体中文"),
        target("zh-Hant", "Chinese (Traditional)", "繁體中文"),
        target("id", "Indonesian", "Bahasa Indonesia"),
        target("vi", "Vietnamese", "Tiếng Việt"),
        target("th", "Thai", "ไทย"),
    ]
}
