use std::thread;
use std::time::Duration;

use tracing::debug;

use super::InterruptSignal;

#[derive(Debug, Clone)]
pub struct FlowControlConfig {
    /// Producers stop taking new work while this many results wait unconsumed.
    pub result_backlog_limit: usize,
    pub backpressure_sleep_ms: u64,
    pub interrupt_poll_ms: u64,
    pub idle_sleep_ms: u64,
}

impl Default for FlowControlConfig {
    fn default() -> Self {
        Self {
            result_backlog_limit: 2,
            backpressure_sleep_ms: 25,
            interrupt_poll_ms: 1000,
            idle_sleep_ms: 10,
        }
    }
}

impl FlowControlConfig {
    pub fn interrupt_poll(&self) -> Duration {
        Duration::from_millis(self.interrupt_poll_ms.max(1))
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms.max(1))
    }
}

/// Poll-and-sleep gate in front of a bounded result backlog.
#[derive(Debug, Clone)]
pub struct Backpressure {
    limit: usize,
    sleep: Duration,
}

impl Backpressure {
    pub fn new(config: &FlowControlConfig) -> Self {
        Self {
            limit: config.result_backlog_limit.max(1),
            sleep: Duration::from_millis(config.backpressure_sleep_ms.max(1)),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Block while `backlog()` reports at least `limit` pending results.
    ///
    /// Returns `Ok(false)` if `interrupt` was raised before room opened up.
    pub fn wait<E>(
        &self,
        mut backlog: impl FnMut() -> Result<usize, E>,
        interrupt: &InterruptSignal,
    ) -> Result<bool, E> {
        let mut logged = false;
        loop {
            let pending = backlog()?;
            if pending < self.limit {
                return Ok(true);
            }
            if interrupt.is_raised() {
                return Ok(false);
            }
            if !logged {
                debug!(
                    "Result backlog at {} (limit {}), waiting for the consumer",
                    pending, self.limit
                );
                logged = true;
            }
            thread::sleep(self.sleep);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_returns_once_backlog_drops() {
        let config = FlowControlConfig {
            backpressure_sleep_ms: 1,
            ..FlowControlConfig::default()
        };
        let gate = Backpressure::new(&config);
        let mut pending = 4usize;
        let ok = gate
            .wait(
                || {
                    pending -= 1;
                    Ok::<_, ()>(pending)
                },
                &InterruptSignal::new(),
            )
            .expect("wait should work");
        assert!(ok);
        assert_eq!(pending, 1);
    }

    #[test]
    fn wait_gives_up_when_interrupted() {
        let gate = Backpressure::new(&FlowControlConfig::default());
        let interrupt = InterruptSignal::new();
        interrupt.raise();
        let ok = gate
            .wait(|| Ok::<_, ()>(10), &interrupt)
            .expect("wait should work");
        assert!(!ok);
    }
}
