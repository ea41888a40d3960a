pub mod analyzer;
pub mod archive;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod llm;
pub mod models;
pub mod prompts;
pub mod service;
pub mod store;

pub use config::ServiceConfig;
pub use service::create_app;
