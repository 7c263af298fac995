pub mod build;
pub mod templates;
