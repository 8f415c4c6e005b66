//! netsleuth: flow-volume anomaly triage with passive-DNS enrichment.
//!
//! Flow records are grouped by a configurable key, scored with a per-group
//! z-score on a single numeric metric, and the outliers are resolved to
//! hostnames through a passive-DNS threat-intelligence source.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────┐    ┌──────────┐
//! │  Ingest  │───>│ Analyzer │───>│ Resolver │───>│  Export  │
//! │  (csv)   │    │ (statrs) │    │(reqwest) │    │          │
//! └──────────┘    └──────────┘    └──────────┘    └──────────┘
//! ```
//!
//! - **Ingest**: CSV flow export into [`flow::FlowRecord`]s
//! - **Analyzer**: group statistics, z-scores, threshold filter and ranking
//! - **Resolver**: token-authenticated passive-DNS lookups with a run-scoped cache
//! - **Export**: text, JSON, JSON Lines or CSV report

pub mod analyzer;
pub mod auth;
pub mod config;
pub mod error;
pub mod export;
pub mod flow;
pub mod ingest;
pub mod passive_dns;
pub mod pipeline;
pub mod resolver;
