//! # Reel Curator Core
//!
//! Shared logic for Reel Curator: data models, the deterministic parts of
//! the quality rubric, the feedback lifecycle rules, and the record store
//! abstraction.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. Everything
//! here is pure or trait-shaped so it can be tested in isolation.

pub mod lifecycle;
pub mod models;
pub mod rubric;
pub mod store;
