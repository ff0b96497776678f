//! # Leader Election
//!
//! One active node per cluster key, held through a lease in the persistence
//! store. The holder renews before the TTL runs out; once a lease expires any
//! standby may take it and receives a strictly greater term. The term doubles
//! as a fencing token: work that checks [`LeaderElector::validate`] with the
//! term it started under is refused after a takeover, even if the deposed
//! node has not noticed yet.

use crate::config::LeaderSettings;
use crate::constants::events;
use crate::error::{Result, SagaflowError};
use crate::events::{NoopSink, TelemetryEvent, TelemetrySink};
use crate::logging::log_coordination_operation;
use crate::persistence::{LeaderRecord, PersistenceStore};
use crate::scheduler::clock::{Clock, SystemClock};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Lease-based leader election for one cluster key
pub struct LeaderElector {
    store: Arc<dyn PersistenceStore>,
    node_id: String,
    cluster_key: String,
    lease_ttl: Duration,
    renew_interval: Duration,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn TelemetrySink>,
    current: RwLock<Option<LeaderRecord>>,
}

impl LeaderElector {
    pub fn new(store: Arc<dyn PersistenceStore>, node_id: impl Into<String>) -> Self {
        Self::from_settings(store, node_id, &LeaderSettings::default())
    }

    pub fn from_settings(store: Arc<dyn PersistenceStore>, node_id: impl Into<String>, settings: &LeaderSettings) -> Self {
        Self {
            store,
            node_id: node_id.into(),
            cluster_key: settings.cluster_key.clone(),
            lease_ttl: settings.lease_ttl(),
            renew_interval: settings.renew_interval(),
            clock: Arc::new(SystemClock),
            sink: Arc::new(NoopSink),
            current: RwLock::new(None),
        }
    }

    pub fn with_cluster_key(mut self, key: impl Into<String>) -> Self {
        self.cluster_key = key.into();
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn with_renew_interval(mut self, interval: Duration) -> Self {
        self.renew_interval = interval;
        self
    }

    /// Local expiry checks use this clock; it should match the store's
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn cluster_key(&self) -> &str {
        &self.cluster_key
    }

    /// Acquire the lease, or renew it if this node already holds it.
    ///
    /// Returns whether this node is the leader afterwards.
    #[instrument(skip(self), fields(node_id = %self.node_id, cluster_key = %self.cluster_key))]
    pub async fn try_acquire(&self) -> Result<bool> {
        let previous = self.current.read().clone();
        let granted = self
            .store
            .acquire_lease(&self.cluster_key, &self.node_id, self.lease_ttl)
            .await?;
        Ok(self.apply(previous, granted, "lease_held_elsewhere"))
    }

    /// Renew a held lease; `false` once leadership is gone
    pub async fn heartbeat(&self) -> Result<bool> {
        let previous = self.current.read().clone();
        if previous.is_none() {
            return Ok(false);
        }
        let renewed = self
            .store
            .renew_lease(&self.cluster_key, &self.node_id, self.lease_ttl)
            .await?;
        Ok(self.apply(previous, renewed, "renewal_refused"))
    }

    /// Leadership as last observed, judged against the local clock
    pub fn is_leader(&self) -> bool {
        let now = self.clock.now();
        self.current
            .read()
            .as_ref()
            .is_some_and(|record| record.is_held_by(&self.node_id, now))
    }

    /// Term of the currently held lease
    pub fn fencing_token(&self) -> Option<u64> {
        let now = self.clock.now();
        self.current
            .read()
            .as_ref()
            .filter(|record| record.is_held_by(&self.node_id, now))
            .map(|record| record.term)
    }

    pub fn current_record(&self) -> Option<LeaderRecord> {
        self.current.read().clone()
    }

    /// Confirm against the store that `token` is still the live term held by this node
    pub async fn validate(&self, token: u64) -> Result<bool> {
        let now = self.clock.now();
        let lease = self.store.current_lease(&self.cluster_key).await?;
        let valid = lease
            .as_ref()
            .is_some_and(|record| record.term == token && record.is_held_by(&self.node_id, now));
        if !valid {
            debug!(
                node_id = %self.node_id,
                token = token,
                holder = ?lease.as_ref().map(|r| (&r.node_id, r.term)),
                "🚫 Fencing token rejected"
            );
        }
        Ok(valid)
    }

    /// `Ok(term)` if this node may act as leader right now
    pub async fn ensure_leader(&self) -> Result<u64> {
        match self.fencing_token() {
            Some(token) if self.validate(token).await? => Ok(token),
            _ => Err(SagaflowError::NotLeader(self.node_id.clone())),
        }
    }

    /// Give up the lease voluntarily
    pub async fn resign(&self) -> Result<()> {
        let previous = self.current.write().take();
        let released = self.store.release_lease(&self.cluster_key, &self.node_id).await?;
        if let Some(record) = previous {
            if released {
                info!(node_id = %self.node_id, term = record.term, "👋 Resigned leadership");
            }
            self.emit_resigned(&record, "resigned");
        }
        Ok(())
    }

    /// Campaign and renew every renew interval until `shutdown`, then resign
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let period = self.renew_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let result = if self.is_leader() {
                        self.heartbeat().await
                    } else {
                        self.try_acquire().await
                    };
                    if let Err(e) = result {
                        warn!(node_id = %self.node_id, error = %e, "⚠️ Leader election round failed");
                    }
                }
            }
        }

        if let Err(e) = self.resign().await {
            warn!(node_id = %self.node_id, error = %e, "⚠️ Failed to resign leadership on shutdown");
        }
    }

    /// Record a store answer and report transitions
    fn apply(&self, previous: Option<LeaderRecord>, answer: Option<LeaderRecord>, lost_reason: &str) -> bool {
        match answer {
            Some(record) => {
                let fresh = previous.as_ref().map_or(true, |p| p.term != record.term);
                if fresh {
                    log_coordination_operation("elected", &self.cluster_key, &self.node_id, Some(record.term), "leader");
                    self.sink.emit(
                        TelemetryEvent::new(events::LEADER_ELECTED)
                            .meta("cluster_key", self.cluster_key.clone())
                            .meta("node_id", self.node_id.clone())
                            .measure("term", record.term as f64),
                    );
                }
                *self.current.write() = Some(record);
                true
            }
            None => {
                *self.current.write() = None;
                if let Some(record) = previous {
                    warn!(node_id = %self.node_id, term = record.term, reason = lost_reason, "👑 Leadership lost");
                    self.emit_resigned(&record, lost_reason);
                }
                false
            }
        }
    }

    fn emit_resigned(&self, record: &LeaderRecord, reason: &str) {
        log_coordination_operation("resigned", &self.cluster_key, &self.node_id, Some(record.term), reason);
        self.sink.emit(
            TelemetryEvent::new(events::LEADER_RESIGNED)
                .meta("cluster_key", self.cluster_key.clone())
                .meta("node_id", self.node_id.clone())
                .meta("reason", reason)
                .measure("term", record.term as f64),
        );
    }
}

impl std::fmt::Debug for LeaderElector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElector")
            .field("node_id", &self.node_id)
            .field("cluster_key", &self.cluster_key)
            .field("lease_ttl", &self.lease_ttl)
            .field("current", &*self.current.read())
            .finish_non_exhaustive()
    }
}
