//! # Ride Report
//!
//! Daily activity report for an exercise-bike fleet.
//!
//! Once a day the previous local day's rides are read from SQLite,
//! summarized into an HTML report and emailed to a fixed recipient.
//! Transient failures in either step are retried with bounded backoff;
//! every run ends in exactly one terminal outcome that is logged and
//! persisted.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌───────────┐   ┌──────────┐
//! │ Scheduler │──▶│ Orchestrator │──▶│ Generator │──▶│  SQLite  │
//! │  (daily)  │   │ state machine│   │ (window)  │   │  rides   │
//! └───────────┘   └──────┬───────┘   └───────────┘   └──────────┘
//!                        │
//!                        ▼
//!                 ┌──────────────┐   ┌──────────────┐
//!                 │   Notifier   │──▶│ HTTP / outbox│
//!                 └──────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ridereport init                         # create database
//! ridereport preview --output report.html # render yesterday's report
//! ridereport run                          # generate and email it now
//! ridereport schedule                     # fire daily at [schedule].fire_at
//! ridereport history                      # recent run outcomes
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Rides, artifacts, notification requests |
//! | [`window`] | Local-day report windows |
//! | [`store`] | Ride store trait and SQLite implementation |
//! | [`report`] | Summarizing and rendering the report |
//! | [`notify`] | Notifier and email transports |
//! | [`retry`] | Bounded exponential backoff |
//! | [`orchestrator`] | Generate-then-notify state machine |
//! | [`runlog`] | Run result sinks |
//! | [`scheduler`] | Daily trigger with overlap policy |
//! | [`pipeline`] | Production wiring and run commands |
//! | [`history`] | Run history command |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod migrate;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod pipeline;
pub mod report;
pub mod retry;
pub mod runlog;
pub mod scheduler;
pub mod store;
pub mod window;
