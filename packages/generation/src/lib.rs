// ABOUTME: Code generation for Shipyard build sessions
// ABOUTME: Anthropic Messages API client, secret lookup, and file-set response validation

pub mod client;
pub mod response;
pub mod secrets;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use client::{
    CodeGenerationClient, FileGenerator, GenerationContext, GenerationError, GenerationResult,
    SYSTEM_INSTRUCTION,
};
pub use response::{parse_file_set, strip_code_fence};
pub use secrets::{EnvSecretStore, SecretError, SecretStore, StaticSecretStore};
