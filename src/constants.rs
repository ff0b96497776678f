//! Shared constants: telemetry event names and system defaults.

pub mod events {
    // Execution lifecycle events
    pub const EXECUTION_START: &str = "execution.start";
    pub const EXECUTION_STOP: &str = "execution.stop";
    pub const EXECUTION_EXCEPTION: &str = "execution.exception";
    pub const EXECUTION_PAUSED: &str = "execution.paused";
    pub const EXECUTION_RESUMED: &str = "execution.resumed";
    pub const EXECUTION_CANCELLED: &str = "execution.cancelled";
    pub const EXECUTION_DEAD_LETTERED: &str = "execution.dead_lettered";

    // Step lifecycle events
    pub const STEP_START: &str = "step.start";
    pub const STEP_STOP: &str = "step.stop";
    pub const STEP_RETRY: &str = "step.retry";
    pub const STEP_EXCEPTION: &str = "step.exception";
    pub const STEP_SKIPPED: &str = "step.skipped";

    // Saga rollback events
    pub const ROLLBACK_START: &str = "rollback.start";
    pub const ROLLBACK_STOP: &str = "rollback.stop";

    // Resilience events
    pub const CIRCUIT_STATE_CHANGE: &str = "circuit.state_change";
    pub const CIRCUIT_TRIP: &str = "circuit.trip";
    pub const CIRCUIT_REJECT: &str = "circuit.reject";
    pub const RATE_LIMIT_REJECT: &str = "rate_limit.reject";

    // Cluster coordination events
    pub const LEADER_ELECTED: &str = "leader.elected";
    pub const LEADER_RESIGNED: &str = "leader.resigned";
    pub const LIFELINE_RESCUED: &str = "lifeline.rescued";

    // Scheduler events
    pub const TRIGGER_FIRED: &str = "trigger.fired";
}

pub mod system {
    /// Cluster key used when the configuration does not name one
    pub const DEFAULT_CLUSTER_KEY: &str = "sagaflow:scheduler";
    /// Label prefix for checkpoints written when a step pauses the execution
    pub const PAUSE_CHECKPOINT_PREFIX: &str = "pause:";
    /// Label for checkpoints written when an execution is rescued
    pub const RESCUE_CHECKPOINT_LABEL: &str = "rescue";
}
