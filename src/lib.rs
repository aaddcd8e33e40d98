#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Checkup Relay
//!
//! Resilience layer in front of a slow, rate-sensitive health-data provider.
//!
//! ## Overview
//!
//! Every upstream fetch is expensive: a multi-step authenticated exchange returning
//! large payloads under implicit abuse limits. The relay sits between callers and the
//! provider and makes sure each `(identity, request shape)` is fetched as rarely as
//! possible:
//!
//! - **Multi-tier caching**: valid, same-account history and cross-account history
//! - **Single-flight**: concurrent identical requests share one upstream call
//! - **Budgets**: sliding-window limits on fresh and forced fetches per account
//! - **Audit**: every decision that touches the cache or the provider is persisted
//!
//! ## Module Organization
//!
//! - [`orchestrator`] - The fetch decision state machine
//! - [`budget`] - Sliding-window budget ledger and force-refresh cooldown
//! - [`cache`] - Cache tiers and completeness predicates
//! - [`single_flight`] - In-flight request coalescing
//! - [`executor`] - Upstream provider port
//! - [`classification`] - Upstream failure taxonomy and message sanitizing
//! - [`persistence`] - Post-fetch writes
//! - [`status`] - Read-only status surface
//! - [`store`] - Persistence port with in-memory and PostgreSQL implementations
//! - [`identity`], [`fingerprint`], [`targets`] - Request canonicalization
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use checkup_relay::config::RelayConfig;
//! use checkup_relay::executor::FetchExecutor;
//! use checkup_relay::identity::LinkedIdentity;
//! use checkup_relay::orchestrator::{FetchCommand, FetchOrchestrator};
//! use checkup_relay::store::InMemoryFetchStore;
//! use checkup_relay::targets::FetchTarget;
//! use std::sync::Arc;
//!
//! # async fn example(executor: Arc<dyn FetchExecutor>) -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryFetchStore::new());
//! let relay = FetchOrchestrator::new(RelayConfig::load(None)?, store, executor)?;
//!
//! let identity = LinkedIdentity::new("Hong Gildong", "19800101", "010-1234-5678", "kakao");
//! let response = relay
//!     .fetch(FetchCommand::new("account-1", identity, [FetchTarget::CheckupOverview]))
//!     .await?;
//! println!("{}", serde_json::to_string_pretty(&response)?);
//! # Ok(())
//! # }
//! ```

pub mod budget;
pub mod cache;
pub mod classification;
pub mod config;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod identity;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod single_flight;
pub mod status;
pub mod store;
pub mod targets;

pub use config::RelayConfig;
pub use error::{RelayError, RelayResult};
pub use orchestrator::{FetchCommand, FetchOrchestrator, FetchOutcome, FetchResponse};
pub use status::{RelayStatus, StatusService};
