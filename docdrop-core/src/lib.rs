#![doc = "docdrop-core: core pipeline library for docdrop."]

//! This crate holds the event-to-outcome pipeline: readiness, enrichment,
//! preflight, SSH delivery and outcome filing. Concrete adapters for the
//! filesystem watcher and the SSH transport live in the `docdrop` binary crate
//! and plug in through the traits in [`contract`].
//!
//! # Usage
//! Build an [`config::AgentConfig`], pick a [`contract::RemoteTransport`] and
//! a [`contract::ReachabilityProbe`], and feed [`watch::WatchEvent`]s into
//! [`pipeline::Pipeline::run_until`].

pub mod config;
pub mod contract;
pub mod credential;
pub mod delivery;
pub mod enrich;
pub mod error;
pub mod filer;
pub mod pipeline;
pub mod precheck;
pub mod watch;
