//! Poll-until-condition primitive.
//!
//! Every provider wait in this crate (node groups draining, NAT gateways
//! reaching `deleted`, volumes becoming available, ...) goes through
//! [`wait_until`]: call a status check, test a predicate over its result,
//! sleep a fixed interval, repeat until the predicate holds or the timeout
//! runs out.

use anyhow::Result;
use cluster_infra_common::defaults::{
    DEFAULT_CLUSTER_TIMEOUT_SECS, DEFAULT_NAT_TIMEOUT_SECS, DEFAULT_STAGE_TIMEOUT_SECS,
};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Timeout and interval for a poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Maximum total time to keep polling
    pub timeout: Duration,
    /// Fixed delay between unsuccessful checks
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            interval: Duration::from_secs(1),
        }
    }
}

impl PollConfig {
    pub const fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    /// EKS node group deletion
    pub const NODE_GROUP: Self = Self::new(
        Duration::from_secs(DEFAULT_CLUSTER_TIMEOUT_SECS),
        Duration::from_secs(10),
    );

    /// EKS cluster disappearing from `ListClusters`
    pub const EKS_CLUSTER: Self = Self::new(
        Duration::from_secs(DEFAULT_CLUSTER_TIMEOUT_SECS),
        Duration::from_secs(10),
    );

    /// NAT gateways reaching `deleted`
    pub const NAT_GATEWAY: Self = Self::new(
        Duration::from_secs(DEFAULT_NAT_TIMEOUT_SECS),
        Duration::from_secs(10),
    );

    /// Network teardown stages: detachments, ENIs releasing, deletions showing up
    pub const NETWORK: Self = Self::new(
        Duration::from_secs(DEFAULT_STAGE_TIMEOUT_SECS),
        Duration::from_secs(5),
    );

    /// Exoscale network load balancers disappearing from the listing
    pub const NETWORK_LOAD_BALANCER: Self =
        Self::new(Duration::from_secs(300), Duration::from_secs(10));

    /// Block-storage volumes becoming ready or disappearing
    pub const VOLUME: Self = Self::new(Duration::from_secs(300), Duration::from_secs(5));

    /// Override the timeout, keeping the interval
    pub const fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            timeout,
            interval: self.interval,
        }
    }
}

/// Poll `check` until `cond` holds for its result or the timeout elapses.
///
/// The check always runs at least once, so a condition that already holds
/// returns `true` without sleeping. Between unsuccessful checks the loop
/// sleeps `config.interval`, but only when the sleep would end within
/// `config.timeout`; the number of sleeps is therefore at most
/// `timeout / interval` and the loop never sleeps after its last check.
///
/// Returns `cond` evaluated on the last observed result. A `false` return
/// means the timeout ran out; there is no separate timeout signal.
///
/// Errors from `check` are not retried and abort the wait immediately.
///
/// # Example
/// ```ignore
/// let gone = wait_until(
///     PollConfig::default(),
///     "subnets",
///     || net.list_subnets(&vpc_id),
///     |subnets| subnets.is_empty(),
/// )
/// .await?;
/// ```
pub async fn wait_until<T, F, Fut, P>(
    config: PollConfig,
    resource_name: &str,
    mut check: F,
    cond: P,
) -> Result<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&T) -> bool,
{
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        let result = match check().await {
            Ok(result) => result,
            Err(e) => {
                warn!(resource = %resource_name, attempts, error = ?e, "Status check failed");
                return Err(e);
            }
        };

        if cond(&result) {
            debug!(resource = %resource_name, attempts, "Condition met");
            return Ok(true);
        }

        if start.elapsed() + config.interval > config.timeout {
            warn!(
                resource = %resource_name,
                attempts,
                timeout = ?config.timeout,
                "Timed out waiting for condition"
            );
            return Ok(cond(&result));
        }

        debug!(
            resource = %resource_name,
            attempt = attempts,
            delay_ms = config.interval.as_millis(),
            "Condition not met, retrying"
        );
        tokio::time::sleep(config.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_check(
        counter: &Arc<AtomicU32>,
        ready_at: u32,
    ) -> impl FnMut() -> std::future::Ready<Result<bool>> {
        let counter = counter.clone();
        move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(Ok(n >= ready_at))
        }
    }

    #[test]
    fn test_with_timeout_keeps_interval() {
        let config = PollConfig::NAT_GATEWAY.with_timeout(Duration::from_secs(30));
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.interval, PollConfig::NAT_GATEWAY.interval);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_true_returns_without_sleeping() {
        let checks = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let met = wait_until(
            PollConfig::default(),
            "test-resource",
            counting_check(&checks, 1),
            |ready: &bool| *ready,
        )
        .await
        .unwrap();

        assert!(met);
        assert_eq!(checks.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let checks = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let met = wait_until(
            PollConfig::new(Duration::from_secs(60), Duration::from_secs(1)),
            "test-resource",
            counting_check(&checks, 3),
            |ready: &bool| *ready,
        )
        .await
        .unwrap();

        assert!(met);
        assert_eq!(checks.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_true_sleeps_at_most_floor_timeout_over_interval() {
        let checks = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let met = wait_until(
            PollConfig::new(Duration::from_secs(10), Duration::from_secs(3)),
            "test-resource",
            counting_check(&checks, u32::MAX),
            |ready: &bool| *ready,
        )
        .await
        .unwrap();

        assert!(!met);
        // 4 checks, 3 sleeps in between: floor(10 / 3) == 3
        assert_eq!(checks.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(9));
        assert!(start.elapsed() <= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exact_multiple_timeout() {
        let checks = Arc::new(AtomicU32::new(0));

        let met = wait_until(
            PollConfig::new(Duration::from_secs(60), Duration::from_secs(10)),
            "test-resource",
            counting_check(&checks, u32::MAX),
            |ready: &bool| *ready,
        )
        .await
        .unwrap();

        assert!(!met);
        // 6 sleeps of 10s fit exactly into 60s, followed by a final check
        assert_eq!(checks.load(Ordering::SeqCst), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_error_propagates_without_retry() {
        let checks = Arc::new(AtomicU32::new(0));
        let counter = checks.clone();

        let result = wait_until(
            PollConfig::default(),
            "test-resource",
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<bool, _>(anyhow::anyhow!("describe failed")) }
            },
            |ready: &bool| *ready,
        )
        .await;

        let err = result.unwrap_err().to_string();
        assert!(err.contains("describe failed"));
        assert_eq!(checks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_predicate_on_last_result() {
        // A non-monotonic predicate that flips to true on its third evaluation,
        // which is the re-evaluation of the last result at timeout.
        let evaluations = AtomicU32::new(0);

        let met = wait_until(
            PollConfig::new(Duration::from_secs(1), Duration::from_secs(1)),
            "test-resource",
            || async { Ok::<_, anyhow::Error>(()) },
            |_| evaluations.fetch_add(1, Ordering::SeqCst) >= 2,
        )
        .await
        .unwrap();

        assert!(met);
        assert_eq!(evaluations.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_passed_to_predicate() {
        let mut remaining = vec![vec!["a", "b"], vec!["a"], vec![]];
        remaining.reverse();

        let met = wait_until(
            PollConfig::default(),
            "items",
            || {
                let next = remaining.pop().unwrap_or_default();
                async move { Ok::<_, anyhow::Error>(next) }
            },
            |items: &Vec<&str>| items.is_empty(),
        )
        .await
        .unwrap();

        assert!(met);
    }
}
