//! # RAG Chat Core
//!
//! Runtime-agnostic logic for RAG Chat: data models, chunking, prompt
//! composition, collaborator traits, the session gate, and the chat
//! exchange pipeline.
//!
//! This crate contains no tokio, sqlx, HTTP client or filesystem I/O.
//! Concrete collaborators (SQLite stores, OpenAI clients) live in the
//! `ragchat` app crate; in-memory ones live in [`store::memory`].

pub mod chunk;
pub mod completion;
pub mod embedding;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod retrieve;
pub mod session;
pub mod store;

pub use error::{Error, Result};
