//! heavy-providers: LLM provider implementations for heavy
//!
//! This crate provides implementations of the Provider trait for the
//! OpenAI-compatible chat completions API (used for OpenRouter) and for
//! Gemini's generateContent API.

pub mod gemini;
pub mod openai;

pub use gemini::GeminiProvider;
pub use openai::OpenAIProvider;
