// ABOUTME: Library side of the shipyard CLI
// ABOUTME: Logging setup, terminal rendering, and following build session events

pub mod logging;
pub mod render;
pub mod watch;
