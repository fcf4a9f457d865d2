#![deny(missing_docs)]

//! Core library for Rusty Docs: PDF ingestion into per-user vector indexes and
//! retrieval-augmented answering with page citations.

/// Retrieval-augmented answering with conversation memory.
pub mod answer;
/// HTTP routing and REST handlers.
pub mod api;
/// Chat-completion client abstraction and adapters.
pub mod completion;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Per-document embedding indexes and their persistence.
pub mod index;
/// Upload registration, ingestion pipeline, and queue worker.
pub mod ingest;
/// Per-key async locks.
pub mod locks;
/// Structured logging and tracing setup.
pub mod logging;
/// Conversation history storage.
pub mod memory;
/// Ingestion and answering metrics helpers.
pub mod metrics;
/// Text cleanup and token-budget splitting.
pub mod normalize;
/// PDF and archive parsing into page-attributed text units.
pub mod parser;
/// Service façade shared by the HTTP surface and the CLI.
pub mod service;
/// Document lifecycle status tracking.
pub mod status;
/// Blob and document record storage.
pub mod storage;
