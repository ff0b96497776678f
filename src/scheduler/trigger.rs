//! Scheduled triggers.

use super::clock::after;
use super::cron::CronEvaluator;
use crate::error::{Result, SagaflowError};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// When a trigger fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Schedule {
    /// Five-field cron expression in a fixed UTC offset
    Cron {
        expression: String,
        #[serde(default = "utc_offset", with = "offset_seconds")]
        zone: FixedOffset,
    },
    /// Every `interval`, first fire one interval after registration
    Interval {
        #[serde(with = "millis")]
        interval: Duration,
    },
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

mod offset_seconds {
    use chrono::FixedOffset;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &FixedOffset, serializer: S) -> Result<S::Ok, S::Error> {
        value.local_minus_utc().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<FixedOffset, D::Error> {
        let seconds = i32::deserialize(deserializer)?;
        FixedOffset::east_opt(seconds).ok_or_else(|| D::Error::custom(format!("offset {seconds}s out of range")))
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        (value.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

impl Schedule {
    pub fn cron(expression: impl Into<String>) -> Self {
        Schedule::Cron {
            expression: expression.into(),
            zone: utc_offset(),
        }
    }

    pub fn cron_in(expression: impl Into<String>, zone: FixedOffset) -> Self {
        Schedule::Cron {
            expression: expression.into(),
            zone,
        }
    }

    pub fn every(interval: Duration) -> Self {
        Schedule::Interval { interval }
    }

    /// Next fire time strictly after `now`
    pub fn next_after(&self, cron: &dyn CronEvaluator, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        match self {
            Schedule::Cron { expression, zone } => cron.next_fire(expression, *zone, now),
            Schedule::Interval { interval } if interval.is_zero() => {
                Err(SagaflowError::InvalidState("interval trigger needs a non-zero interval".to_string()))
            }
            Schedule::Interval { interval } => Ok(after(now, *interval)),
        }
    }
}

/// A named schedule that starts a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub name: String,
    pub workflow: String,
    pub schedule: Schedule,
    #[serde(default)]
    pub input: Value,
    /// Higher fires first when several triggers are due on the same tick
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

fn enabled() -> bool {
    true
}

impl Trigger {
    pub fn new(name: impl Into<String>, workflow: impl Into<String>, schedule: Schedule) -> Self {
        Self {
            name: name.into(),
            workflow: workflow.into(),
            schedule,
            input: Value::Null,
            priority: 0,
            enabled: true,
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}
