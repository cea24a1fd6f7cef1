pub mod error;
pub mod llm;
pub mod parser;
pub mod pipeline;
pub mod prompt;
pub mod questions;
pub mod report;
pub mod schema;
pub mod store;
