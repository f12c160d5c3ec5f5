//! Lead discovery and enrichment API library.
//!
//! Finds local businesses for a free-text query and location across several public
//! providers, merges duplicates, filters out irrelevant hits and optionally enriches
//! each lead with registry (CNPJ) and social (Instagram) data. Results are cached in
//! an in-process layer backed by an optional Postgres store.
//!
//! # Modules
//!
//! - `api`: HTTP surface.
//! - `core`: Pipeline, dedup, filters and enrichment logic.
//! - `integrations`: Outbound HTTP transport, providers and lookup services.
//! - `cache`: Tiered cache (in-process L1, durable L2).
//! - `db` / `db_storage`: Postgres pool, schema and the `LeadStore` seam.

pub mod api;
pub mod core;
pub mod integrations;

pub mod cache;
pub mod cache_validator;
pub mod catalog;
pub mod category;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod db_storage;
pub mod dedup;
pub mod discovery;
pub mod enrichment;
pub mod errors;
pub mod filter;
pub mod handlers;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod providers;
pub mod registry;
pub mod services;
pub mod social;
pub mod transport;
