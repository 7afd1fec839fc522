use std::time::Duration;

/// Fixed reconnect schedule shared by every transport implementation.
///
/// Attempts walk the schedule (1s, 2s, 4s, 8s, 16s by default); once the
/// attempt count exceeds `max_attempts` the transport stops retrying and
/// surfaces a terminal "not reconnecting" state, resumable only by an
/// explicit manual reconnect.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    schedule: Vec<Duration>,
    max_attempts: usize,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            schedule: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(16),
            ],
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(schedule: Vec<Duration>, max_attempts: usize) -> Self {
        Self {
            schedule,
            max_attempts,
        }
    }

    /// Delay before the given 1-based attempt, or `None` once the policy is
    /// exhausted. Attempts beyond the schedule reuse its final delay.
    pub fn delay(&self, attempt: usize) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts || self.schedule.is_empty() {
            return None;
        }
        let index = (attempt - 1).min(self.schedule.len() - 1);
        self.schedule.get(index).copied()
    }
}
