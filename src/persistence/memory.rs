use super::{LeaderRecord, PersistenceStore};
use crate::checkpoint::Checkpoint;
use crate::error::Result;
use crate::error::SagaflowError;
use crate::orchestration::types::{DeadLetter, Execution};
use crate::scheduler::clock::{after, Clock, SystemClock};
use crate::state_machine::{transition, ExecutionEvent, ExecutionState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default)]
struct LeaseTable {
    records: HashMap<String, LeaderRecord>,
    /// Last issued term per key, survives release
    terms: HashMap<String, u64>,
}

/// Process-local store holding JSON blobs
#[derive(Debug)]
pub struct InMemoryStore {
    executions: Mutex<HashMap<Uuid, String>>,
    checkpoints: Mutex<HashMap<(Uuid, String), String>>,
    leases: Mutex<LeaseTable>,
    dead_letters: Mutex<HashMap<Uuid, String>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Lease expiry is judged against `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            executions: Mutex::new(HashMap::new()),
            checkpoints: Mutex::new(HashMap::new()),
            leases: Mutex::new(LeaseTable::default()),
            dead_letters: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn execution_count(&self) -> usize {
        self.executions.lock().len()
    }

    fn decode_execution(blob: &str) -> Result<Execution> {
        Ok(serde_json::from_str(blob)?)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn grant(key: &str, node_id: &str, term: u64, now: DateTime<Utc>, ttl: Duration) -> LeaderRecord {
    LeaderRecord {
        cluster_key: key.to_string(),
        node_id: node_id.to_string(),
        term,
        lease_expiry: after(now, ttl),
        acquired_at: now,
        renewed_at: now,
    }
}

#[async_trait]
impl PersistenceStore for InMemoryStore {
    async fn save_execution(&self, execution: &Execution) -> Result<()> {
        let blob = serde_json::to_string(execution)?;
        self.executions.lock().insert(execution.id, blob);
        Ok(())
    }

    async fn load_execution(&self, id: Uuid) -> Result<Option<Execution>> {
        let executions = self.executions.lock();
        executions.get(&id).map(|blob| Self::decode_execution(blob)).transpose()
    }

    async fn list_executions(&self, states: &[ExecutionState]) -> Result<Vec<Execution>> {
        let blobs: Vec<String> = self.executions.lock().values().cloned().collect();
        let mut executions = Vec::with_capacity(blobs.len());
        for blob in &blobs {
            let execution = Self::decode_execution(blob)?;
            if states.is_empty() || states.contains(&execution.state) {
                executions.push(execution);
            }
        }
        executions.sort_by_key(|e| e.created_at);
        Ok(executions)
    }

    async fn heartbeat_execution(&self, id: Uuid, node_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let mut executions = self.executions.lock();
        let blob = executions
            .get(&id)
            .ok_or(SagaflowError::ExecutionNotFound(id))?;
        let mut execution = Self::decode_execution(blob)?;

        if execution.state.is_terminal() || execution.state == ExecutionState::Rescued {
            return Ok(false);
        }
        if matches!(&execution.locked_by, Some(owner) if owner != node_id) {
            return Ok(false);
        }

        execution.locked_by = Some(node_id.to_string());
        execution.heartbeat_at = Some(at);
        executions.insert(id, serde_json::to_string(&execution)?);
        Ok(true)
    }

    async fn release_execution_lock(&self, id: Uuid) -> Result<()> {
        let mut executions = self.executions.lock();
        if let Some(blob) = executions.get(&id) {
            let mut execution = Self::decode_execution(blob)?;
            execution.locked_by = None;
            executions.insert(id, serde_json::to_string(&execution)?);
        }
        Ok(())
    }

    async fn rescue_execution(&self, id: Uuid, stale_before: DateTime<Utc>, at: DateTime<Utc>) -> Result<Option<Execution>> {
        let mut executions = self.executions.lock();
        let Some(blob) = executions.get(&id) else {
            return Ok(None);
        };
        let mut execution = Self::decode_execution(blob)?;
        if execution.state != ExecutionState::Running || execution.last_seen() >= stale_before {
            return Ok(None);
        }

        transition(&mut execution.state, &ExecutionEvent::Rescue)?;
        execution.current_steps.clear();
        execution.locked_by = None;
        execution.updated_at = at;
        executions.insert(id, serde_json::to_string(&execution)?);
        Ok(Some(execution))
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let blob = serde_json::to_string(checkpoint)?;
        self.checkpoints
            .lock()
            .insert((checkpoint.execution_id, checkpoint.label.clone()), blob);
        Ok(())
    }

    async fn load_checkpoint(&self, execution_id: Uuid, label: &str) -> Result<Option<Checkpoint>> {
        let checkpoints = self.checkpoints.lock();
        match checkpoints.get(&(execution_id, label.to_string())) {
            Some(blob) => Ok(Some(serde_json::from_str(blob)?)),
            None => Ok(None),
        }
    }

    async fn list_checkpoints(&self, execution_id: Uuid) -> Result<Vec<Checkpoint>> {
        let checkpoints = self.checkpoints.lock();
        let mut found = checkpoints
            .iter()
            .filter(|((id, _), _)| *id == execution_id)
            .map(|(_, blob)| serde_json::from_str::<Checkpoint>(blob))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        found.sort_by_key(|c| c.created_at);
        Ok(found)
    }

    async fn acquire_lease(&self, key: &str, node_id: &str, ttl: Duration) -> Result<Option<LeaderRecord>> {
        let now = self.clock.now();
        let mut table = self.leases.lock();

        if let Some(existing) = table.records.get_mut(key) {
            if existing.is_held_by(node_id, now) {
                existing.lease_expiry = after(now, ttl);
                existing.renewed_at = now;
                return Ok(Some(existing.clone()));
            }
            if !existing.is_expired(now) {
                return Ok(None);
            }
        }

        let term = table.terms.get(key).copied().unwrap_or(0) + 1;
        let record = grant(key, node_id, term, now, ttl);
        table.terms.insert(key.to_string(), term);
        table.records.insert(key.to_string(), record.clone());
        debug!(cluster_key = key, node_id = node_id, term = term, "🔑 Lease granted");
        Ok(Some(record))
    }

    async fn renew_lease(&self, key: &str, node_id: &str, ttl: Duration) -> Result<Option<LeaderRecord>> {
        let now = self.clock.now();
        let mut table = self.leases.lock();
        match table.records.get_mut(key) {
            Some(existing) if existing.is_held_by(node_id, now) => {
                existing.lease_expiry = after(now, ttl);
                existing.renewed_at = now;
                Ok(Some(existing.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn release_lease(&self, key: &str, node_id: &str) -> Result<bool> {
        let mut table = self.leases.lock();
        let held = table
            .records
            .get(key)
            .is_some_and(|record| record.node_id == node_id);
        if held {
            table.records.remove(key);
        }
        Ok(held)
    }

    async fn current_lease(&self, key: &str) -> Result<Option<LeaderRecord>> {
        Ok(self.leases.lock().records.get(key).cloned())
    }

    async fn save_dead_letter(&self, letter: &DeadLetter) -> Result<()> {
        let blob = serde_json::to_string(letter)?;
        self.dead_letters.lock().insert(letter.id, blob);
        Ok(())
    }

    async fn load_dead_letter(&self, id: Uuid) -> Result<Option<DeadLetter>> {
        let letters = self.dead_letters.lock();
        match letters.get(&id) {
            Some(blob) => Ok(Some(serde_json::from_str(blob)?)),
            None => Ok(None),
        }
    }

    async fn list_dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let letters = self.dead_letters.lock();
        let mut all = letters
            .values()
            .map(|blob| serde_json::from_str::<DeadLetter>(blob))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        all.sort_by_key(|l| l.failed_at);
        Ok(all)
    }

    async fn delete_dead_letter(&self, id: Uuid) -> Result<bool> {
        Ok(self.dead_letters.lock().remove(&id).is_some())
    }
}
