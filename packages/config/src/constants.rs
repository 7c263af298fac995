// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Shipyard

// Generation Service
pub const SHIPYARD_GENERATION_API_URL: &str = "SHIPYARD_GENERATION_API_URL";
pub const SHIPYARD_GENERATION_MODEL: &str = "SHIPYARD_GENERATION_MODEL";
pub const ANTHROPIC_MODEL: &str = "ANTHROPIC_MODEL"; // Fallback
pub const SHIPYARD_GENERATION_MAX_TOKENS: &str = "SHIPYARD_GENERATION_MAX_TOKENS";
pub const SHIPYARD_GENERATION_TIMEOUT_SECS: &str = "SHIPYARD_GENERATION_TIMEOUT_SECS";
pub const SHIPYARD_MAX_RESPONSE_BYTES: &str = "SHIPYARD_MAX_RESPONSE_BYTES";
pub const SHIPYARD_API_KEY_SECRET: &str = "SHIPYARD_API_KEY_SECRET";
pub const SHIPYARD_HISTORY_TURNS: &str = "SHIPYARD_HISTORY_TURNS";

// Default secret holding the generation API key
pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";

// Sandbox Runtime
pub const SHIPYARD_RUNTIME: &str = "SHIPYARD_RUNTIME";
pub const SHIPYARD_SANDBOX_IMAGE: &str = "SHIPYARD_SANDBOX_IMAGE";
pub const SHIPYARD_SANDBOX_WORKDIR: &str = "SHIPYARD_SANDBOX_WORKDIR";
pub const SHIPYARD_DEV_PORT: &str = "SHIPYARD_DEV_PORT";
pub const SHIPYARD_INSTALL_COMMAND: &str = "SHIPYARD_INSTALL_COMMAND";
pub const SHIPYARD_START_COMMAND: &str = "SHIPYARD_START_COMMAND";
pub const SHIPYARD_READY_TIMEOUT_SECS: &str = "SHIPYARD_READY_TIMEOUT_SECS";
pub const SHIPYARD_MAX_FILES: &str = "SHIPYARD_MAX_FILES";
pub const SHIPYARD_MAX_MOUNT_BYTES: &str = "SHIPYARD_MAX_MOUNT_BYTES";

// Session
pub const SHIPYARD_EVENT_CHANNEL_SIZE: &str = "SHIPYARD_EVENT_CHANNEL_SIZE";
pub const SHIPYARD_LOG_CAPACITY: &str = "SHIPYARD_LOG_CAPACITY";

// Logging
pub const RUST_LOG: &str = "RUST_LOG";
