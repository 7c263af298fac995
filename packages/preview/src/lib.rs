// ABOUTME: Preview surface for build sessions
// ABOUTME: Tracks which sandbox origin, if any, the live preview shows

pub mod surface;

pub use surface::{PreviewBinding, PreviewChange, PreviewSurface};
