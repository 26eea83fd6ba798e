//! Reasoning oracle adapters.

pub mod openai;

pub use openai::OpenAiChatOracle;
