//! # QA Harness Core
//!
//! The retrieval-augmented grounding pipeline behind QA Harness: data
//! models, error taxonomy, chunking, embedding, the store abstraction,
//! retrieval, grounded test-case generation and Selenium script synthesis.
//!
//! This crate does no network, database or filesystem I/O. External
//! services enter through the [`embedding::EmbeddingService`],
//! [`completion::CompletionService`], [`parse::DocumentParser`] and
//! [`store::Store`] traits; the `qa-harness` app crate provides the real
//! implementations.

pub mod chunk;
pub mod completion;
pub mod embedding;
pub mod error;
pub mod generate;
pub mod html;
pub mod index;
pub mod models;
pub mod parse;
pub mod retrieve;
pub mod script;
pub mod session;
pub mod store;

pub use error::{QaError, Result};
pub use session::{Session, SessionSettings};
