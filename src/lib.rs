//! # blip
//!
//! Keeps a local dataset in step with its upstream sources on a schedule and
//! serves filter/sort queries over it.
//!
//! An updater job fetches every configured provider, maps the items onto a
//! declared record schema, and upserts them into SQLite in a single
//! transaction. A query service answers "records where these attributes take
//! these values, ordered by that attribute", and a filter binding exposes
//! the legal values a UI may offer.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────┐   ┌──────────┐
//! │ Providers  │──▶│ Transform │──▶│  SQLite  │
//! │ HTTP/file  │   │ + dedup   │   │  store   │
//! └────────────┘   └───────────┘   └────┬─────┘
//!       ▲                               │
//! ┌─────┴──────┐               ┌────────┴───────┐
//! │ Scheduler  │               │ Query service  │
//! │ (cron)     │               │ + filter UI    │
//! └────────────┘               └────────┬───────┘
//!                                       ▼
//!                              ┌────────────────┐
//!                              │ CLI / HTTP API │
//!                              └────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! blip init                       # create database
//! blip refresh                    # fetch and store once
//! blip query --filter label=robotics --sort published_at --order desc
//! blip serve                      # start HTTP API
//! blip schedule                   # refresh monthly until stopped
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`schema`] | Record schema and query vocabulary |
//! | [`models`] | Core data types |
//! | [`error`] | Refresh and query error types |
//! | [`provider`] | Upstream data providers |
//! | [`transform`] | Upstream item → record mapping |
//! | [`refresh`] | The updater job |
//! | [`scheduler`] | Cron-driven refresh loop |
//! | [`store`] | Storage trait, SQLite and in-memory stores |
//! | [`query`] | Filter/sort query service |
//! | [`filters`] | Filter UI binding |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod error;
pub mod filters;
pub mod migrate;
pub mod models;
pub mod provider;
pub mod query;
pub mod refresh;
pub mod scheduler;
pub mod schema;
pub mod server;
pub mod store;
pub mod transform;
