use async_trait::async_trait;
use std::str::FromStr;
use std::time::Duration;

/// How the wait between validation attempts grows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    /// Doubles the interval after every attempt, up to `RetryPolicy::max_interval`
    Exponential,
}

impl FromStr for Backoff {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fixed" => Ok(Backoff::Fixed),
            "exponential" => Ok(Backoff::Exponential),
            other => Err(format!("unknown backoff strategy: {}", other)),
        }
    }
}

/// RetryPolicy bounds how long a stage may take to converge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_interval: Duration,
    /// Wait before the first attempt, giving the device time to act on the push
    pub settle: Duration,
    pub backoff: Backoff,
    pub max_interval: Duration,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, retry_interval: Duration) -> Self {
        Self {
            max_attempts,
            retry_interval,
            settle: Duration::ZERO,
            backoff: Backoff::Fixed,
            max_interval: retry_interval,
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff, max_interval: Duration) -> Self {
        self.backoff = backoff;
        self.max_interval = max_interval;
        self
    }

    /// At least one attempt is always made
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Wait before the given 1-based attempt
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return self.settle;
        }
        match self.backoff {
            Backoff::Fixed => self.retry_interval,
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 2);
                self.retry_interval
                    .checked_mul(factor)
                    .unwrap_or(self.max_interval)
                    .min(self.max_interval.max(self.retry_interval))
            }
        }
    }

    /// Worst-case time spent waiting across all attempts
    pub fn total_wait(&self) -> Duration {
        (1..=self.attempts()).map(|a| self.delay_before(a)).sum()
    }
}

/// Sleeper is the only way the validator waits, so tests can run without real delays
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Records requested waits and returns immediately
#[cfg(test)]
#[derive(Default)]
pub struct RecordingSleeper {
    waits: std::sync::Mutex<Vec<Duration>>,
}

#[cfg(test)]
impl RecordingSleeper {
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.waits.lock().unwrap().push(duration);
        tokio::task::yield_now().await;
    }
}
