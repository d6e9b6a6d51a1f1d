//! CloudSleuth Core: crawling, checkpointing and reporting.
//!
//! This crate contains all business logic with zero UI dependencies. The
//! binary is a thin CLI on top of [`job::Job`].
//!
//! # Modules
//!
//! - [`model`]: Arena-allocated container tree, leaves and aggregates.
//! - [`remote`]: The paged listing interface, session refresh and stores.
//! - [`crawler`]: Scope planning, ownership rules and the traversal engine.
//! - [`checkpoint`]: Durable per-container snapshots for resume.
//! - [`report`]: CSV report variants written in completion order.
//! - [`inspect`]: Bounded-concurrency document inspection and duplicates.
//! - [`progress`]: Live counters, recent activity and the reporter thread.
//! - [`job`]: One named run from resume prompt to final report.
//! - [`config`]: TOML-loadable run configuration.
//! - [`error`]: Error types shared by every module.
pub mod checkpoint;
pub mod config;
pub mod crawler;
pub mod error;
pub mod inspect;
pub mod job;
pub mod model;
pub mod progress;
pub mod remote;
pub mod report;
