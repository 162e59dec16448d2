use std::time::Duration;

/// A schedule of delays between attempts of a retryable operation.
///
/// `max_count` is the total attempt budget, so the schedule yields
/// `max_count - 1` delays: the caller makes one attempt, then sleeps for the
/// next delay before each further attempt until the schedule is exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStrategy {
    Fixed {
        max_count: usize,
        delay: Duration,
    },
    ExponentialBackoff {
        max_count: usize,
        initial_delay: Duration,
        max_delay: Duration,
        factor: u32,
    },
}

struct ExponentialBackoffDelay {
    delay: Duration,
    max_delay: Duration,
    factor: u32,
}

impl Iterator for ExponentialBackoffDelay {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let delay = self.delay;
        self.delay = std::cmp::min(delay * self.factor, self.max_delay);
        Some(delay)
    }
}

impl RetryStrategy {
    pub fn delays(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        match self {
            Self::Fixed { max_count, delay } => {
                Box::new(std::iter::repeat_n(*delay, max_count.saturating_sub(1)))
            }
            Self::ExponentialBackoff {
                max_count,
                initial_delay,
                max_delay,
                factor,
            } => Box::new(
                ExponentialBackoffDelay {
                    delay: *initial_delay,
                    max_delay: *max_delay,
                    factor: *factor,
                }
                .take(max_count.saturating_sub(1)),
            ),
        }
    }
}
