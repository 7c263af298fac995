// ABOUTME: Startup configuration injected into the build orchestrator
// ABOUTME: Generation, sandbox runtime, and session settings resolved once from the environment

use crate::constants::*;
use crate::env::{
    env_string, parse_env_or_default_with_validation, split_command, string_with_fallback,
};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_GENERATION_API_URL: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_GENERATION_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_MAX_TOKENS: u32 = 8192;
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024;
pub const DEFAULT_SANDBOX_IMAGE: &str = "node:20-alpine";
pub const DEFAULT_SANDBOX_WORKDIR: &str = "/home/app";
pub const DEFAULT_DEV_PORT: u16 = 5173;
pub const DEFAULT_INSTALL_COMMAND: &str = "npm install";
pub const DEFAULT_START_COMMAND: &str = "npm run dev";
pub const DEFAULT_EVENT_CHANNEL_SIZE: usize = 200;
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid sandbox runtime '{0}' (expected 'local' or 'docker')")]
    InvalidRuntime(String),

    #[error("Command for {0} cannot be empty")]
    EmptyCommand(&'static str),
}

/// Which sandbox backend hosts generated projects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    /// Temporary directories and host processes
    Local,
    /// Docker containers managed through the daemon socket
    Docker,
}

impl RuntimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeKind::Local => "local",
            RuntimeKind::Docker => "docker",
        }
    }
}

impl FromStr for RuntimeKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(RuntimeKind::Local),
            "docker" => Ok(RuntimeKind::Docker),
            _ => Err(ConfigError::InvalidRuntime(s.to_string())),
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A program and its arguments, run inside a sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn parse(line: &str, what: &'static str) -> Result<Self, ConfigError> {
        let (program, args) = split_command(line).ok_or(ConfigError::EmptyCommand(what))?;
        Ok(Self { program, args })
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub api_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Replies larger than this are rejected before parsing
    pub max_response_bytes: usize,
    /// Secret-store name of the API key
    pub api_key_secret: String,
    /// Prior chat turns sent along with a new prompt
    pub history_turns: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_GENERATION_API_URL.to_string(),
            model: DEFAULT_GENERATION_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            request_timeout: Duration::from_secs(600),
            connect_timeout: Duration::from_secs(10),
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            api_key_secret: ANTHROPIC_API_KEY.to_string(),
            history_turns: 6,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub runtime: RuntimeKind,
    /// Container image (docker runtime only)
    pub image: String,
    /// Project directory inside the container (docker runtime only)
    pub workdir: String,
    /// Port the dev server listens on inside the sandbox
    pub dev_port: u16,
    pub install: CommandSpec,
    pub start: CommandSpec,
    pub ready_timeout: Duration,
    pub max_files: usize,
    pub max_mount_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeKind::Local,
            image: DEFAULT_SANDBOX_IMAGE.to_string(),
            workdir: DEFAULT_SANDBOX_WORKDIR.to_string(),
            dev_port: DEFAULT_DEV_PORT,
            install: CommandSpec::new("npm", &["install"]),
            start: CommandSpec::new("npm", &["run", "dev"]),
            ready_timeout: Duration::from_secs(120),
            max_files: 200,
            max_mount_bytes: 4 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub event_channel_size: usize,
    /// Output chunks retained for display
    pub log_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            event_channel_size: DEFAULT_EVENT_CHANNEL_SIZE,
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

/// Complete startup configuration for one Shipyard process
#[derive(Debug, Clone, Default)]
pub struct ShipyardConfig {
    pub generation: GenerationConfig,
    pub sandbox: SandboxConfig,
    pub session: SessionConfig,
}

impl ShipyardConfig {
    /// Resolve configuration from environment variables.
    ///
    /// Out-of-range numbers fall back to defaults with a warning. An unknown
    /// runtime name or a blank command is an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let generation = GenerationConfig {
            api_url: env_string(SHIPYARD_GENERATION_API_URL)
                .unwrap_or(defaults.generation.api_url),
            model: string_with_fallback(
                SHIPYARD_GENERATION_MODEL,
                ANTHROPIC_MODEL,
                DEFAULT_GENERATION_MODEL,
            ),
            max_tokens: parse_env_or_default_with_validation(
                SHIPYARD_GENERATION_MAX_TOKENS,
                DEFAULT_MAX_TOKENS,
                |v| (256..=64_000).contains(&v),
            ),
            temperature: defaults.generation.temperature,
            request_timeout: Duration::from_secs(parse_env_or_default_with_validation(
                SHIPYARD_GENERATION_TIMEOUT_SECS,
                600u64,
                |v| (10..=3600).contains(&v),
            )),
            connect_timeout: defaults.generation.connect_timeout,
            max_response_bytes: parse_env_or_default_with_validation(
                SHIPYARD_MAX_RESPONSE_BYTES,
                DEFAULT_MAX_RESPONSE_BYTES,
                |v| v >= 1024,
            ),
            api_key_secret: env_string(SHIPYARD_API_KEY_SECRET)
                .unwrap_or(defaults.generation.api_key_secret),
            history_turns: parse_env_or_default_with_validation(
                SHIPYARD_HISTORY_TURNS,
                defaults.generation.history_turns,
                |v| v <= 50,
            ),
        };

        let runtime = match env_string(SHIPYARD_RUNTIME) {
            Some(raw) => raw.parse::<RuntimeKind>()?,
            None => defaults.sandbox.runtime,
        };

        let install = match env_string(SHIPYARD_INSTALL_COMMAND) {
            Some(line) => CommandSpec::parse(&line, "install")?,
            None => defaults.sandbox.install,
        };

        let start = match env_string(SHIPYARD_START_COMMAND) {
            Some(line) => CommandSpec::parse(&line, "start")?,
            None => defaults.sandbox.start,
        };

        let sandbox = SandboxConfig {
            runtime,
            image: env_string(SHIPYARD_SANDBOX_IMAGE).unwrap_or(defaults.sandbox.image),
            workdir: env_string(SHIPYARD_SANDBOX_WORKDIR).unwrap_or(defaults.sandbox.workdir),
            dev_port: parse_env_or_default_with_validation(
                SHIPYARD_DEV_PORT,
                DEFAULT_DEV_PORT,
                |v| v >= 1024,
            ),
            install,
            start,
            ready_timeout: Duration::from_secs(parse_env_or_default_with_validation(
                SHIPYARD_READY_TIMEOUT_SECS,
                120u64,
                |v| (1..=1800).contains(&v),
            )),
            max_files: parse_env_or_default_with_validation(
                SHIPYARD_MAX_FILES,
                defaults.sandbox.max_files,
                |v| v >= 1,
            ),
            max_mount_bytes: parse_env_or_default_with_validation(
                SHIPYARD_MAX_MOUNT_BYTES,
                defaults.sandbox.max_mount_bytes,
                |v| v >= 1024,
            ),
        };

        let session = SessionConfig {
            event_channel_size: parse_env_or_default_with_validation(
                SHIPYARD_EVENT_CHANNEL_SIZE,
                DEFAULT_EVENT_CHANNEL_SIZE,
                |v| (10..=10_000).contains(&v),
            ),
            log_capacity: parse_env_or_default_with_validation(
                SHIPYARD_LOG_CAPACITY,
                DEFAULT_LOG_CAPACITY,
                |v| (10..=100_000).contains(&v),
            ),
        };

        Ok(Self {
            generation,
            sandbox,
            session,
        })
    }
}
