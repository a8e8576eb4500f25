//! # QA Harness
//!
//! Documentation-grounded test case and Selenium script generation.
//!
//! The pipeline itself lives in the `qa-harness-core` crate. This crate
//! supplies the concrete collaborators and the two outer surfaces:
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │ FileParser  │──▶│  Session (core)  │──▶│ SqliteStore  │
//! │ md/pdf/docx │   │ chunk·embed·RAG  │   │ vectors+docs │
//! └─────────────┘   └────────┬─────────┘   └──────────────┘
//!                            │ OpenAI / Ollama / hashing
//!              ┌─────────────┴─────────────┐
//!              ▼                           ▼
//!         ┌──────────┐               ┌──────────┐
//!         │   CLI    │               │   HTTP   │
//!         │   (qa)   │               │  (axum)  │
//!         └──────────┘               └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] / [`migrate`] | SQLite connection and schema |
//! | [`sqlite_store`] | Persistent vector index |
//! | [`embedding`] | Embedding service backends |
//! | [`completion`] | Chat completion backends |
//! | [`parser`] | Multi-format document parser |
//! | [`scan`] | Directory walking for `qa ingest` |
//! | [`session`] | Session wiring from config |
//! | [`server`] | JSON HTTP server |

pub mod cases;
pub mod completion;
pub mod config;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod migrate;
pub mod parser;
pub mod query;
pub mod scan;
pub mod server;
pub mod session;
pub mod sqlite_store;
pub mod stats;
