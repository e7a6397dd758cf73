//! # Lexsignal
//!
//! A local-first storage and analysis core for multi-dimensional linguistic
//! scoring of forum documents. External collectors fetch documents and an
//! external classifier scores them along configurable stylistic dimensions;
//! Lexsignal deduplicates and stores the results in SQLite, rolls them up
//! per period, builds long-run baseline distributions, and tests candidate
//! time windows for statistically anomalous shifts.
//!
//! ## Pipeline
//!
//! ```text
//! collector JSONL -> load -> documents
//! classifier JSONL -> classify -> classifications (deduped) + links
//!                              -> propagate -> word_tokens
//! aggregate / baseline / detect  (read-only analysis over the above)
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration: dimensions, dedup key, thresholds |
//! | [`db`] / [`migrate`] | SQLite pool and schema |
//! | [`store`] | Deduplicating classification store (content-hash keyed) |
//! | [`ingest`] | `load` / `classify` / `propagate` commands |
//! | [`tokenize`] | Word tokenizer and temporal-marker lexicon |
//! | [`propagate`] | Word-token propagation and per-word profiles |
//! | [`aggregate`] | Per-period rollups (day, topic, word) |
//! | [`baseline`] | Percentile reference distributions |
//! | [`detect`] | Event detection: Welch test, thresholds, control windows |
//! | [`stats`] | Pure statistics: Welford, percentile, Welch, Cohen's d |
//! | [`report`] | Corpus overview for `lxs stats` |

pub mod aggregate;
pub mod baseline;
pub mod config;
pub mod db;
pub mod detect;
pub mod error;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod propagate;
pub mod report;
pub mod stats;
pub mod store;
pub mod tokenize;
