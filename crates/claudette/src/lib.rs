pub mod agent;
pub mod conversation;
pub mod errors;
pub mod images;
pub mod loop_guard;
pub mod models;
pub mod prompt_template;
pub mod providers;
pub mod stats;
pub mod tool_parser;
pub mod tools;
