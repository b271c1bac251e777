pub mod client;
pub mod gemini;
pub mod normalize;
pub mod provider;
pub mod types;

pub use client::GenerativeModelClient;
pub use gemini::GeminiProvider;
pub use provider::{LlmProvider, ProviderError};
pub use types::{
    Content, FunctionCall, FunctionCallingMode, FunctionDeclaration, GenerateRequest, Generation,
    Part, Turn,
};
