//! # Chat Universe Core
//!
//! Shared, runtime-agnostic logic for Chat Universe: conversation data
//! models, the term tokenizer, weighted rank fusion, the hybrid search
//! algorithm, retrieval backend traits, and the embedding trait.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. The SQLite
//! indexing store and the concrete backends live in the `chat-universe`
//! crate.

pub mod embedding;
pub mod error;
pub mod fusion;
pub mod models;
pub mod retrieval;
pub mod search;
pub mod tokenize;
