use std::time::Duration;

use crate::config::ConsumerConfig;

/// What to do with a message once every immediate retry has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAction {
    /// Deliver again after `delay`, stamped with `redelivery_count`.
    Redeliver { delay: Duration, redelivery_count: u32 },
    /// Give up and move the message to the error queue.
    DeadLetter,
}

/// Immediate retry count plus the delayed redelivery schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultPolicy {
    immediate_retries: u32,
    redelivery_intervals: Vec<Duration>,
}

impl FaultPolicy {
    pub fn new(immediate_retries: u32, redelivery_intervals: Vec<Duration>) -> Self {
        Self {
            immediate_retries,
            redelivery_intervals,
        }
    }

    pub fn from_config(config: &ConsumerConfig) -> Self {
        Self::new(config.immediate_retries, config.redelivery_intervals())
    }

    pub fn immediate_retries(&self) -> u32 {
        self.immediate_retries
    }

    pub fn redelivery_intervals(&self) -> &[Duration] {
        &self.redelivery_intervals
    }

    /// First attempt plus immediate retries.
    pub fn attempts_per_delivery(&self) -> u32 {
        self.immediate_retries + 1
    }

    /// `redelivery_count` is the count carried by the delivery that just failed.
    pub fn on_exhausted(&self, redelivery_count: u32) -> FaultAction {
        match self.redelivery_intervals.get(redelivery_count as usize) {
            Some(delay) => FaultAction::Redeliver {
                delay: *delay,
                redelivery_count: redelivery_count + 1,
            },
            None => FaultAction::DeadLetter,
        }
    }
}

impl Default for FaultPolicy {
    fn default() -> Self {
        Self::from_config(&ConsumerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn default_policy_is_six_attempts_then_five_fifteen_thirty_minutes() {
        let policy = FaultPolicy::default();
        assert_eq!(policy.attempts_per_delivery(), 6);

        assert_eq!(
            policy.on_exhausted(0),
            FaultAction::Redeliver { delay: 5 * MINUTE, redelivery_count: 1 }
        );
        assert_eq!(
            policy.on_exhausted(1),
            FaultAction::Redeliver { delay: 15 * MINUTE, redelivery_count: 2 }
        );
        assert_eq!(
            policy.on_exhausted(2),
            FaultAction::Redeliver { delay: 30 * MINUTE, redelivery_count: 3 }
        );
        assert_eq!(policy.on_exhausted(3), FaultAction::DeadLetter);
    }

    #[test]
    fn empty_schedule_dead_letters_immediately() {
        let policy = FaultPolicy::new(0, Vec::new());
        assert_eq!(policy.attempts_per_delivery(), 1);
        assert_eq!(policy.on_exhausted(0), FaultAction::DeadLetter);
    }
}
