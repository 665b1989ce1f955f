use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use std::time::Duration;

/// Capped exponential delay between reconnect attempts, without jitter and
/// without an attempt limit. `reset` after every successful open.
pub(crate) struct Backoff {
    builder: ExponentialBuilder,
    current: ExponentialBackoff,
    max_delay: Duration,
}

impl Backoff {
    pub(crate) fn new(base: Duration, factor: f32, max_delay: Duration) -> Self {
        let builder = ExponentialBuilder::default()
            .with_min_delay(base)
            .with_max_delay(max_delay)
            .with_factor(factor)
            .with_max_times(usize::MAX);
        Self {
            current: builder.clone().build(),
            builder,
            max_delay,
        }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        self.current.next().unwrap_or(self.max_delay)
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.builder.clone().build();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_up_to_the_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), 2.0, Duration::from_secs(30));
        let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = Backoff::new(Duration::from_secs(1), 2.0, Duration::from_secs(30));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }
}
