// ABOUTME: Configuration and environment variable management for Shipyard
// ABOUTME: Resolves startup configuration once so it can be injected into the orchestrator

pub mod constants;
pub mod env;
pub mod settings;

pub use settings::{
    CommandSpec, ConfigError, GenerationConfig, RuntimeKind, SandboxConfig, SessionConfig,
    ShipyardConfig,
};
