//! Tracking Synchronization Module
//!
//! This module provides the core logic for bringing the shipment store up to date with the
//! carriers. It is composed of several submodules, each responsible for one aspect of a run:
//!
//! - `orchestrator`: The main entry point. Resolves carriers, walks the configured groups and wires
//!   the store, strategies and summary together.
//! - `strategies`: Per-package and batch-window lookup strategies, and the recorder that turns
//!   outcomes into store writes and summary entries.
//! - `batch`: Chunks queries into bounded windows and fans window replies back out to queries.
//! - `retry`: Bounded retry of transient carrier failures.
//! - `repositories`: The storage collaborator trait and its JSON file implementation.
//! - `progress_tracker`: Per-group progress logging and statistics.
//! - `summary`: The run summary handed to the notification collaborator.

/// Batch windows for multi-number carriers
pub mod batch;
/// Main coordinator for the update run
pub mod orchestrator;
/// Tracks per-group progress and statistics
pub mod progress_tracker;
/// Shipment store persistence
pub mod repositories;
/// Retry policy for carrier calls
pub mod retry;
/// Pluggable lookup strategies
pub mod strategies;
/// Run summary
pub mod summary;

pub use orchestrator::*;
