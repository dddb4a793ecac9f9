//! docqa-llm
//!
//! [`docqa_core::Generator`] implementations backed by hosted chat models.
pub mod azure;

pub use azure::{AzureOpenAiConfig, AzureOpenAiGenerator};
