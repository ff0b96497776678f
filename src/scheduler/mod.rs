//! # Scheduling
//!
//! Time sources, cron evaluation and the leader-gated front-end that turns
//! cron and interval triggers into executions.

pub mod clock;
pub mod cron;
pub mod front_end;
pub mod trigger;

pub use clock::{Clock, ManualClock, SystemClock};
pub use cron::{CronEvaluator, CronerEvaluator};
pub use front_end::{FiredTrigger, Scheduler, TickReport, TriggerStatus};
pub use trigger::{Schedule, Trigger};
