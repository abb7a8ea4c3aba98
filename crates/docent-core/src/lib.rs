//! # Docent Core
//!
//! Store-agnostic logic for Docent: data models, the pseudo-markup tag
//! extractor, the heading-aware document structurer, reciprocal rank
//! fusion, citation linking, and the bounded answering agent loop.
//!
//! This crate contains no tokio, sqlx, HTTP clients, or filesystem I/O.
//! Every external collaborator (language model, embedding model, record
//! store, link signer) is reached through a trait defined here, so the
//! application crate injects real clients and tests inject doubles.
//!
//! ```text
//!  pages ──▶ structure ──▶ Store ──▶ search (RRF) ──▶ agent ──▶ citation
//!              ▲                                        ▲
//!              └───────────── tags ─────────────────────┘
//! ```

pub mod agent;
pub mod capability;
pub mod citation;
pub mod embedding;
pub mod extract;
pub mod models;
pub mod search;
pub mod store;
pub mod structure;
pub mod tags;
