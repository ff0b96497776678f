//! # Persistence
//!
//! The engine owns no database. Everything durable goes through the
//! [`PersistenceStore`] trait: execution records, checkpoints, leader leases
//! and dead letters. Any key-value or relational store that can honour the
//! compare-and-swap lease semantics below satisfies the contract.
//!
//! [`InMemoryStore`] is the shipped implementation. It serializes every record
//! to JSON so round-trip fidelity is exercised exactly as a real store would.

mod memory;

pub use memory::InMemoryStore;

use crate::checkpoint::Checkpoint;
use crate::error::Result;
use crate::orchestration::types::{DeadLetter, Execution};
use crate::state_machine::ExecutionState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// A granted leadership lease
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderRecord {
    pub cluster_key: String,
    pub node_id: String,
    /// Monotonic per cluster key; doubles as the fencing token
    pub term: u64,
    pub lease_expiry: DateTime<Utc>,
    pub acquired_at: DateTime<Utc>,
    pub renewed_at: DateTime<Utc>,
}

impl LeaderRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.lease_expiry
    }

    pub fn is_held_by(&self, node_id: &str, now: DateTime<Utc>) -> bool {
        self.node_id == node_id && !self.is_expired(now)
    }
}

/// Durable storage consumed by the engine, the elector and the lifeline
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn save_execution(&self, execution: &Execution) -> Result<()>;

    async fn load_execution(&self, id: Uuid) -> Result<Option<Execution>>;

    /// Executions in any of `states`; all executions when `states` is empty
    async fn list_executions(&self, states: &[ExecutionState]) -> Result<Vec<Execution>>;

    /// Stamp the execution-level lock and heartbeat.
    ///
    /// Returns `false` when the execution is terminal, has been rescued, or is
    /// locked by another node. Callers must stop driving the execution then.
    async fn heartbeat_execution(&self, id: Uuid, node_id: &str, at: DateTime<Utc>) -> Result<bool>;

    async fn release_execution_lock(&self, id: Uuid) -> Result<()>;

    /// Move a running execution to `rescued` and drop its lock, provided its
    /// last heartbeat is still older than `stale_before`.
    ///
    /// The staleness check and the state change are one atomic step, so an
    /// owner that heartbeats in between keeps the execution. Returns the
    /// rescued record, or `None` when the execution is missing, no longer
    /// running, or alive again.
    async fn rescue_execution(&self, id: Uuid, stale_before: DateTime<Utc>, at: DateTime<Utc>) -> Result<Option<Execution>>;

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;

    async fn load_checkpoint(&self, execution_id: Uuid, label: &str) -> Result<Option<Checkpoint>>;

    async fn list_checkpoints(&self, execution_id: Uuid) -> Result<Vec<Checkpoint>>;

    /// Claim the lease for `key`.
    ///
    /// Granted when the lease is absent or expired, in which case the term
    /// increments, or when `node_id` already holds it, in which case the
    /// expiry is extended under the same term. `None` means another node
    /// holds a live lease.
    async fn acquire_lease(&self, key: &str, node_id: &str, ttl: Duration) -> Result<Option<LeaderRecord>>;

    /// Extend a live lease held by `node_id`; `None` once it has expired or moved
    async fn renew_lease(&self, key: &str, node_id: &str, ttl: Duration) -> Result<Option<LeaderRecord>>;

    /// Drop the lease if `node_id` holds it
    async fn release_lease(&self, key: &str, node_id: &str) -> Result<bool>;

    async fn current_lease(&self, key: &str) -> Result<Option<LeaderRecord>>;

    async fn save_dead_letter(&self, letter: &DeadLetter) -> Result<()>;

    async fn load_dead_letter(&self, id: Uuid) -> Result<Option<DeadLetter>>;

    /// Oldest first
    async fn list_dead_letters(&self) -> Result<Vec<DeadLetter>>;

    async fn delete_dead_letter(&self, id: Uuid) -> Result<bool>;
}
