//! # Reel Curator
//!
//! Discovery, quality scoring and feedback-driven lifecycle management for
//! a catalogue of instructional videos.
//!
//! Reel Curator searches an external video catalog for a target instructor,
//! scores every candidate with a language-model rubric plus an optional
//! transcript signal, persists the ones that clear the threshold, and later
//! promotes, flags, retargets or removes them as viewer feedback arrives.
//! Every ingestion run streams its decision trail to any number of
//! observers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌──────────┐
//! │   Catalog    │──▶│ IngestionPipeline│──▶│  SQLite  │
//! │  (YouTube)   │   │ gate+assess+dedup│   │ records  │
//! └──────────────┘   └────────┬─────────┘   └────┬─────┘
//!                             │ events           │ votes
//!                             ▼                  ▼
//!                      ┌────────────┐   ┌──────────────────┐
//!                      │  RunStore  │   │ LifecycleManager │
//!                      │ (SSE, CLI) │   │   (scheduled)    │
//!                      └────────────┘   └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! reel init
//! reel run --entity "John Danaher" --query "danaher back take" --query "danaher leg lock"
//! reel vote abc123 --helpful
//! reel review
//! reel serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types (re-exported from `reel-curator-core`) |
//! | [`rubric`] | Deterministic scoring rules |
//! | [`store`] | Record store traits and in-memory store |
//! | [`error`] | Collaborator and run error types |
//! | [`traits`] | Catalog, classifier and transcript collaborator traits |
//! | [`catalog_youtube`] | YouTube Data API collaborator |
//! | [`classifier`] | OpenAI classifier collaborator |
//! | [`assess`] | Quality assessor |
//! | [`ingest`] | Ingestion pipeline and run service |
//! | [`progress`] | Run progress broadcast and CLI sinks |
//! | [`lifecycle`] | Feedback-driven lifecycle manager |
//! | [`sqlite_store`] | SQLite record store |
//! | [`app`] | Service wiring |
//! | [`server`] | HTTP server with SSE |
//! | [`stats`] | Catalogue overview and run history |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod app;
pub mod assess;
pub mod catalog_youtube;
pub mod classifier;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod lifecycle;
pub mod migrate;
pub mod progress;
pub mod server;
pub mod sqlite_store;
pub mod stats;
pub mod traits;

pub use reel_curator_core::{models, rubric, store};
