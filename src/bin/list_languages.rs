//! List the target languages the localizer accepts.
//!
//! Usage:
//!   cargo run --bin languages

use html_localizer::i18n::LanguageRegistry;

fn main() {
    let registry = LanguageRegistry::get();

    println!("{:<8} {:<24} {}", "CODE", "NAME", "NATIVE NAME");
    for language in registry.list_enabled() {
        let marker = if language.is_canonical { " (source)" } else { "" };
        println!(
            "{:<8} {:<24} {}{}",
            language.code, language.name, language.native_name, marker
        );
    }
}
