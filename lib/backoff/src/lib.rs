//! Exponential-backoff retry driver shared by the store, lock, and runner
//! call sites. Two shapes are provided: a bounded-attempt async retry loop
//! for transient I/O (store writes, cluster-blocked conditions), and a pure
//! `should_backoff` calculation used by the ISM runner's per-action backoff
//! gate, which only needs to know "how long since the last attempt" rather
//! than to drive a loop itself.

use std::time::Duration;

/// Default backoff used for both the policy-save and metadata-update
/// paths: 250ms initial delay, 3 attempts.
pub const DEFAULT: ExponentialBackoff = ExponentialBackoff {
  initial_delay: Duration::from_millis(250),
  max_attempts: 3,
};

#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
  pub initial_delay: Duration,
  pub max_attempts: u32,
}

impl ExponentialBackoff {
  pub const fn new(initial_delay: Duration, max_attempts: u32) -> Self {
    Self { initial_delay, max_attempts }
  }

  /// Delay before the `attempt`-th retry (0-indexed), doubling each time.
  pub fn delay_for(&self, attempt: u32) -> Duration {
    self.initial_delay.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
  }

  /// Whether the action-level retry counter has already exhausted its
  /// attempt budget.
  pub fn exhausted(&self, consumed_retries: u32) -> bool {
    consumed_retries >= self.max_attempts
  }

  /// Pure backoff-window calculation: given how many retries have already
  /// been consumed and when the last attempt started, decide whether the
  /// caller should still be waiting, and if so for how many more
  /// milliseconds. `now_ms`/`last_start_ms` are caller-supplied so this
  /// stays deterministic under test.
  pub fn should_backoff(
    &self,
    consumed_retries: u32,
    last_start_ms: i64,
    now_ms: i64,
  ) -> (bool, Option<i64>) {
    if self.exhausted(consumed_retries) {
      return (false, None);
    }
    let window_ms = self.delay_for(consumed_retries).as_millis() as i64;
    let elapsed_ms = (now_ms - last_start_ms).max(0);
    if elapsed_ms < window_ms {
      (true, Some(window_ms - elapsed_ms))
    } else {
      (false, None)
    }
  }
}

/// Lets a caller-defined error type tell the retry loop whether it is
/// worth retrying. Semantic failures (parse error, not-found) must return
/// `false` so they fail fast instead of burning the attempt budget.
pub trait Retryable {
  fn is_transient(&self) -> bool;
}

/// Drives `op` until it succeeds or the backoff's attempt budget is
/// exhausted. Sleeps via `tokio::time::sleep` between attempts, so this is
/// a suspension point, not a busy loop. Returns the last error once
/// attempts are exhausted or the error is non-transient.
pub async fn retry<T, E, F, Fut>(
  policy: &ExponentialBackoff,
  mut op: F,
) -> Result<T, E>
where
  E: Retryable,
  F: FnMut() -> Fut,
  Fut: std::future::Future<Output = Result<T, E>>,
{
  let mut attempt = 0;
  loop {
    match op().await {
      Ok(value) => return Ok(value),
      Err(e) if !e.is_transient() => return Err(e),
      Err(e) if attempt + 1 >= policy.max_attempts => return Err(e),
      Err(e) => {
        tracing::warn!(
          attempt,
          "retryable operation failed, backing off: {e:?}",
          e = std::any::type_name::<E>()
        );
        tokio::time::sleep(policy.delay_for(attempt)).await;
        attempt += 1;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn delay_doubles_per_attempt() {
    let b = ExponentialBackoff::new(Duration::from_millis(100), 5);
    assert_eq!(b.delay_for(0), Duration::from_millis(100));
    assert_eq!(b.delay_for(1), Duration::from_millis(200));
    assert_eq!(b.delay_for(2), Duration::from_millis(400));
  }

  #[test]
  fn should_backoff_within_window() {
    let b = ExponentialBackoff::new(Duration::from_millis(250), 3);
    let (wait, remaining) = b.should_backoff(0, 1_000, 1_100);
    assert!(wait);
    assert_eq!(remaining, Some(150));
  }

  #[test]
  fn should_backoff_past_window() {
    let b = ExponentialBackoff::new(Duration::from_millis(250), 3);
    let (wait, remaining) = b.should_backoff(0, 1_000, 1_300);
    assert!(!wait);
    assert_eq!(remaining, None);
  }

  #[test]
  fn should_backoff_exhausted_never_waits() {
    let b = ExponentialBackoff::new(Duration::from_millis(250), 3);
    let (wait, _) = b.should_backoff(3, 1_000, 1_000);
    assert!(!wait);
  }

  #[tokio::test]
  async fn retry_gives_up_on_semantic_failure() {
    #[derive(Debug)]
    struct Semantic;
    impl Retryable for Semantic {
      fn is_transient(&self) -> bool {
        false
      }
    }
    let mut calls = 0;
    let result: Result<(), Semantic> = retry(&DEFAULT, || {
      calls += 1;
      async { Err(Semantic) }
    })
    .await;
    assert!(result.is_err());
    assert_eq!(calls, 1);
  }

  #[tokio::test]
  async fn retry_succeeds_after_transient_failures() {
    #[derive(Debug)]
    struct Transient;
    impl Retryable for Transient {
      fn is_transient(&self) -> bool {
        true
      }
    }
    let policy = ExponentialBackoff::new(Duration::from_millis(1), 3);
    let mut calls = 0;
    let result: Result<u32, Transient> = retry(&policy, || {
      calls += 1;
      let this_call = calls;
      async move {
        if this_call < 2 {
          Err(Transient)
        } else {
          Ok(this_call)
        }
      }
    })
    .await;
    assert_eq!(result.unwrap(), 2);
  }
}
