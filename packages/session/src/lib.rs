// ABOUTME: Build sessions that turn chat prompts into running, previewable apps
// ABOUTME: Coordinates generation, sandbox lifecycle, commands, and preview for one session

pub mod error;
pub mod events;
pub mod pipeline;
pub mod session;
pub mod state;
pub mod templates;

pub use error::{PipelineError, SubmitError};
pub use events::SessionEvent;
pub use pipeline::Stage;
pub use session::BuildSession;
pub use state::{RunTicket, SessionSnapshot};
pub use templates::PromptTemplate;
