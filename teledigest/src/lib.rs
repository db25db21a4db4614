// Library interface for teledigest modules
// This allows tests and the helper binaries to import modules

pub mod extract;
pub mod fetch;
pub mod image_proxy;
pub mod ingestion;
pub mod llm;
pub mod pipeline;
pub mod post;
pub mod processing;
pub mod progress;
pub mod scraping;
pub mod server;
