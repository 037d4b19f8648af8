pub mod config;
pub mod document;
pub mod generation;
pub mod i18n;
pub mod markup;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod splitter;
pub mod translation;
pub mod verification;
