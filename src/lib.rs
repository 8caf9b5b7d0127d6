//! # ragserve
//!
//! A retrieval-augmented chatbot service over your own documents.
//!
//! ragserve ingests documents (PDF, DOCX, plain text, web pages, whole
//! sitemaps), chunks and embeds them into a local vector index, and answers
//! questions grounded in the retrieved chunks via an LLM, with per-session
//! conversation memory.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Normalizer  │──▶│   Pipeline   │──▶│ Vector index │
//! │ pdf/docx/web │   │ chunk+embed  │   │ json snapshot│
//! └──────────────┘   └──────────────┘   └──────┬───────┘
//!                                              │
//!                       ┌──────────────────────┤
//!                       ▼                      ▼
//!                  ┌──────────┐         ┌───────────┐
//!                  │   CLI    │         │ HTTP API  │
//!                  │(ragserve)│         │ chat+inge │
//!                  └──────────┘         └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ragserve ingest ./docs/handbook.pdf     # index local files
//! ragserve query "What is our PTO policy?"
//! ragserve serve                          # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunker`] | Recursive text chunking with overlap |
//! | [`normalize`] | PDF/DOCX/text/HTML to plain text |
//! | [`sitemap`] | Sitemap discovery and URL extraction |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index with snapshot persistence |
//! | [`session`] | Per-session conversation memory |
//! | [`chain`] | Retrieval-augmented answering |
//! | [`ingest`] | Ingestion pipeline and change tracking |
//! | [`server`] | JSON HTTP API |

pub mod chain;
pub mod chunker;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod normalize;
pub mod server;
pub mod session;
pub mod sitemap;
