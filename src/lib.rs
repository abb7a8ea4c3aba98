//! # Docent
//!
//! Question answering over a collection of technical documents (service
//! manuals, spec sheets, bulletins).
//!
//! Documents are ingested page by page: a language model tags headings and
//! body text, body runs that share a heading path become chunks, and the
//! chunks are embedded and stored in SQLite with an FTS5 index. Questions
//! go through a bounded agent loop that searches the store with hybrid
//! rank fusion until it can answer, then cited passages are turned into
//! presigned document links.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────┐
//! │ .txt / .pdf │──▶│ Structure +  │──▶│  SQLite   │
//! │   pages     │   │ Chunk+Embed  │   │ FTS5+Vec  │
//! └─────────────┘   └──────────────┘   └─────┬─────┘
//!                                            │
//!                  ┌──────────────┐          │
//!                  │  Agent loop  │◀─────────┘
//!                  │ (LLM ring)   │
//!                  └──────┬───────┘
//!                         ▼
//!                 ┌──────────────┐
//!                 │  CLI / HTTP  │
//!                 └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docent init                          # create database
//! docent ingest ./manuals              # structure, chunk, embed
//! docent search "impeller torque" --mode hybrid
//! docent ask "What torque does the HX-200 impeller bolt need?"
//! docent serve                         # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the core `Store` |
//! | [`embedding`] | Embedding providers |
//! | [`llm`] | Chat backends and the rotating backend ring |
//! | [`links`] | Presigned S3 links for citations |
//! | [`pages`] | Page splitting for text and PDF sources |
//! | [`ingest`] | Directory ingestion |
//! | [`search`] | Search entry point and CLI output |
//! | [`ask`] | Question answering |
//! | [`documents`] | Catalog listing |
//! | [`services`] | Shared clients |
//! | [`server`] | HTTP server |

pub mod ask;
pub mod config;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod ingest;
pub mod links;
pub mod llm;
pub mod migrate;
pub mod pages;
pub mod search;
pub mod server;
pub mod services;
pub mod sqlite_store;
