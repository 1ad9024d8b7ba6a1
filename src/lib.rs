//! # RAG Chat
//!
//! A retrieval-augmented chat server. Text files are chunked and embedded
//! into a SQLite vector index; each chat turn retrieves matching chunks,
//! composes a prompt with the user's history, asks a hosted model for a
//! reply, and stores the exchange under the user's account.
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌────────────────┐
//! │ data/*.txt│──▶│ chunk + embed│──▶│ vector index   │
//! └───────────┘   └──────────────┘   └───────┬────────┘
//!                                            │ retrieve
//!   browser ──▶ axum server ──▶ session ──▶ pipeline ──▶ completion API
//!                                 │                 │
//!                                 ▼                 ▼
//!                             accounts        conversations
//! ```
//!
//! The runtime-agnostic pieces (chunking, prompt composition, the session
//! gate, the exchange pipeline) live in `ragchat-core`. This crate supplies
//! the SQLite and HTTP collaborators, configuration and the CLI.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Schema creation |
//! | [`embedding`] | Hosted embedding client |
//! | [`completion`] | Hosted completion client |
//! | [`retry`] | Backoff for collaborator calls |
//! | [`index`] | Persisted vector index |
//! | [`ingest`] | `ragchat index` |
//! | [`sqlite_store`] | Accounts and conversation records |
//! | [`retrieve_cmd`] | `ragchat retrieve` |
//! | [`stats`] | `ragchat stats` |
//! | [`server`] | Chat UI server |

pub mod completion;
pub mod config;
pub mod db;
pub mod embedding;
pub mod index;
pub mod ingest;
pub mod migrate;
pub mod retrieve_cmd;
pub mod retry;
pub mod server;
pub mod sqlite_store;
pub mod stats;
