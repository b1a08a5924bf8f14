//! Next-execution-time strategies.
//!
//! Given the moment a trigger was processed and its execution-by-time
//! policy, compute when it is due again. Cron policies search forward
//! from the processing time; fixed-rate policies add the interval once,
//! so a stalled trigger does not replay missed executions.

use chrono::{DateTime, Duration, Utc};

use crate::cron::CronExpression;
use crate::domain::ExecutionByTimeData;
use crate::error::ConfigurationError;

/// Computes the next execution time strictly after `from`.
///
/// # Errors
///
/// Returns a [`ConfigurationError`] when the policy cannot be evaluated:
/// a malformed or unsatisfiable cron expression, or a non-positive
/// fixed-rate interval.
pub fn compute_next_execution_time(
    from: DateTime<Utc>,
    policy: &ExecutionByTimeData,
) -> Result<DateTime<Utc>, ConfigurationError> {
    match policy {
        ExecutionByTimeData::Cron { cron } => CronExpression::parse(cron)?.next_after(from),
        ExecutionByTimeData::FixedRate {
            fixed_rate_interval,
        } => {
            if *fixed_rate_interval <= Duration::zero() {
                return Err(ConfigurationError::InvalidInterval {
                    millis: fixed_rate_interval.num_milliseconds(),
                });
            }
            Ok(from + *fixed_rate_interval)
        }
    }
}

/// Checks that a policy will be evaluable later, without needing a
/// reference time. Used when triggers are created or updated.
///
/// # Errors
///
/// Returns a [`ConfigurationError`] for malformed cron expressions and
/// non-positive intervals.
pub fn validate_policy(policy: &ExecutionByTimeData) -> Result<(), ConfigurationError> {
    match policy {
        ExecutionByTimeData::Cron { cron } => CronExpression::parse(cron).map(|_| ()),
        ExecutionByTimeData::FixedRate {
            fixed_rate_interval,
        } => {
            if *fixed_rate_interval <= Duration::zero() {
                return Err(ConfigurationError::InvalidInterval {
                    millis: fixed_rate_interval.num_milliseconds(),
                });
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_rate(interval: Duration) -> ExecutionByTimeData {
        ExecutionByTimeData::FixedRate {
            fixed_rate_interval: interval,
        }
    }

    #[test]
    fn fixed_rate_adds_the_interval_once() {
        let from = Utc.with_ymd_and_hms(2023, 1, 21, 12, 35, 0).unwrap();

        for (interval, expected_seconds) in [
            (Duration::seconds(1), 1),
            (Duration::seconds(5), 5),
            (Duration::minutes(1), 60),
            (Duration::hours(1), 3600),
        ] {
            let next = compute_next_execution_time(from, &fixed_rate(interval))
                .expect("positive interval");
            assert_eq!(next, from + Duration::seconds(expected_seconds));
        }
    }

    #[test]
    fn fixed_rate_does_not_catch_up() {
        // A trigger processed long after it was due is rescheduled from
        // the processing time, not from its overdue slot.
        let processed_at = Utc.with_ymd_and_hms(2023, 1, 21, 18, 0, 7).unwrap();
        let next = compute_next_execution_time(processed_at, &fixed_rate(Duration::minutes(10)))
            .expect("positive interval");
        assert_eq!(
            next,
            Utc.with_ymd_and_hms(2023, 1, 21, 18, 10, 7).unwrap()
        );
    }

    #[test]
    fn non_positive_interval_is_a_configuration_error() {
        let from = Utc.with_ymd_and_hms(2023, 1, 21, 12, 0, 0).unwrap();

        for interval in [Duration::zero(), Duration::seconds(-5)] {
            let result = compute_next_execution_time(from, &fixed_rate(interval));
            assert!(matches!(
                result,
                Err(ConfigurationError::InvalidInterval { .. })
            ));
        }
    }

    #[test]
    fn cron_policy_delegates_to_the_expression() {
        let from = Utc.with_ymd_and_hms(2023, 1, 21, 12, 35, 0).unwrap();
        let policy = ExecutionByTimeData::Cron {
            cron: "0 * * ? * *".to_string(),
        };

        let next = compute_next_execution_time(from, &policy).expect("valid cron");
        assert_eq!(next, Utc.with_ymd_and_hms(2023, 1, 21, 12, 36, 0).unwrap());
    }

    #[test]
    fn validate_rejects_malformed_cron() {
        let policy = ExecutionByTimeData::Cron {
            cron: "every tuesday".to_string(),
        };
        assert!(matches!(
            validate_policy(&policy),
            Err(ConfigurationError::InvalidCron { .. })
        ));
    }

    #[test]
    fn validate_accepts_sound_policies() {
        assert!(validate_policy(&fixed_rate(Duration::seconds(30))).is_ok());
        assert!(
            validate_policy(&ExecutionByTimeData::Cron {
                cron: "0 0 1 1/1 * ? *".to_string(),
            })
            .is_ok()
        );
    }
}
