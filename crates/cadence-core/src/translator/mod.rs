//! Windowed relay between a message channel and a batch sink.

pub mod buffer;
mod engine;

pub use buffer::{WindowBuffer, WindowFrame};
pub use engine::{TranslatorConfig, TranslatorEngine, TranslatorReport};
