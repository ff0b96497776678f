//! # Backoff
//!
//! Retry delay computation and the error taxonomy that selects retry
//! profiles. See [`strategy`] for the delay math and [`policy`] for
//! per-step retry configuration.

pub mod policy;
pub mod strategy;

pub use policy::{classify_io_error, ErrorKind, Recoverable, RetryPolicy, RetryProfiles};
pub use strategy::{apply_jitter, base_delay, delay, exponential, BackoffCalculator, BackoffStrategy};
