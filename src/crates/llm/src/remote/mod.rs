//! Remote inference providers.

mod gemini;

pub use gemini::GeminiClient;
