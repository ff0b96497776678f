//! Cron evaluation.
//!
//! Standard five-field expressions (`*`, `,`, `-`, `/`) evaluated in a fixed
//! UTC offset.

use crate::error::{Result, SagaflowError};
use chrono::{DateTime, FixedOffset, Utc};
use croner::Cron;

/// Computes the next fire time of a cron expression
pub trait CronEvaluator: Send + Sync {
    /// First fire time strictly after `after`, evaluated in `zone`
    fn next_fire(&self, expression: &str, zone: FixedOffset, after: DateTime<Utc>) -> Result<DateTime<Utc>>;

    /// Reject an expression early
    fn validate(&self, expression: &str) -> Result<()>;
}

/// [`CronEvaluator`] backed by `croner`
#[derive(Debug, Default, Clone, Copy)]
pub struct CronerEvaluator;

impl CronerEvaluator {
    fn parse(expression: &str) -> Result<Cron> {
        let fields = expression.split_whitespace().count();
        if fields != 5 {
            return Err(SagaflowError::Cron(format!(
                "'{expression}' has {fields} fields, expected 5"
            )));
        }
        expression
            .parse::<Cron>()
            .map_err(|e| SagaflowError::Cron(format!("'{expression}': {e}")))
    }
}

impl CronEvaluator for CronerEvaluator {
    fn next_fire(&self, expression: &str, zone: FixedOffset, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let cron = Self::parse(expression)?;
        cron.iter_after(after.with_timezone(&zone))
            .next()
            .map(|next| next.with_timezone(&Utc))
            .ok_or_else(|| SagaflowError::Cron(format!("'{expression}' never fires after {after}")))
    }

    fn validate(&self, expression: &str) -> Result<()> {
        Self::parse(expression).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_next_fire_in_utc() {
        let cron = CronerEvaluator;
        let zone = FixedOffset::east_opt(0).unwrap();

        assert_eq!(
            cron.next_fire("*/15 * * * *", zone, utc(2024, 3, 1, 10, 7)).unwrap(),
            utc(2024, 3, 1, 10, 15)
        );
        // Strictly after
        assert_eq!(
            cron.next_fire("0 9 * * 1-5", zone, utc(2024, 3, 1, 9, 0)).unwrap(),
            utc(2024, 3, 4, 9, 0)
        );
        assert_eq!(
            cron.next_fire("0,30 12 * * *", zone, utc(2024, 3, 1, 12, 10)).unwrap(),
            utc(2024, 3, 1, 12, 30)
        );
    }

    #[test]
    fn test_zone_offset_is_applied() {
        let cron = CronerEvaluator;
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        // 08:00 at +02:00 is 06:00 UTC
        assert_eq!(
            cron.next_fire("0 8 * * *", plus_two, utc(2024, 3, 1, 0, 0)).unwrap(),
            utc(2024, 3, 1, 6, 0)
        );
    }

    #[test]
    fn test_invalid_expressions() {
        let cron = CronerEvaluator;
        assert!(matches!(cron.validate("not a cron"), Err(SagaflowError::Cron(_))));
        assert!(cron.validate("* * * *").is_err());
        assert!(cron.validate("61 * * * *").is_err());
        assert!(cron.validate("0 9 * * 1-5").is_ok());
    }
}
