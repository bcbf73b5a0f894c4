//! # Chat Universe
//!
//! A local-first corpus of AI assistant chat exports.
//!
//! Normalized conversations from ChatGPT, Claude, Gemini, Grok and Copilot
//! are ingested into SQLite, tokenized into a shared term lexicon, linked
//! by a thread co-occurrence graph, and exposed through paginated reads and
//! hybrid (full-text + semantic) search.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌───────────────┐
//! │   import    │──▶│  IndexingStore   │──▶│    SQLite     │
//! │ JSON files  │   │ terms + graph    │   │ FTS5 + vectors│
//! └─────────────┘   └──────────────────┘   └───────┬───────┘
//!                                                  │
//!                       ┌──────────────────────────┤
//!                       ▼                          ▼
//!                 ┌────────────┐          ┌────────────────┐
//!                 │   reads    │          │ hybrid search  │
//!                 │  (chatu)   │          │  (RRF fusion)  │
//!                 └────────────┘          └────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! chatu init                        # create database
//! chatu import ./exports            # ingest normalized conversations
//! chatu embed pending               # generate embeddings
//! chatu search "nebula drift"
//! chatu parallel --cross-provider   # threads that talk about the same things
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`store`] | Providers, threads, turns, lexicon, graph, runs, reads |
//! | [`import`] | Batch import with quarantine reports |
//! | [`jobs`] | Background reindex runs |
//! | [`retrieval`] | FTS5 and vector backends |
//! | [`search`] | Hybrid search wiring |
//! | [`embedding`] | Embedding providers |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod browse;
pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod import;
pub mod jobs;
pub mod logging;
pub mod migrate;
pub mod retrieval;
pub mod search;
pub mod stats;
pub mod store;
