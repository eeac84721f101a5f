//! These models represent the objects passed between the session, the response loop
//! and the chat backend.
//!
//! The same structs are used for three purposes:
//! - the in-memory conversation the loop appends to
//! - the request body sent to the Ollama chat endpoint
//! - the persisted conversation files written by the CLI
//!
//! Keeping one representation means a tool call always serializes as
//! `{function: {name, arguments}}`, whichever of the three it ends up in.
pub mod message;
pub mod role;
pub mod tool;
