//! AWS test utilities
//!
//! Provides region detection and unique resource names for AWS integration tests.

use chrono::Utc;

/// Get the AWS region for tests.
///
/// Checks environment variables in order:
/// 1. AWS_REGION
/// 2. REGION
/// 3. Falls back to ca-central-1
///
/// # Example
///
/// ```
/// use cluster_infra_test_utils::aws::get_test_region;
///
/// let region = get_test_region();
/// assert!(!region.is_empty());
/// ```
pub fn get_test_region() -> String {
    std::env::var("AWS_REGION")
        .or_else(|_| std::env::var("REGION"))
        .unwrap_or_else(|_| "ca-central-1".to_string())
}

/// Generate a unique cluster name for test resources.
///
/// Format: `test-{timestamp_ms}-{counter}`. The counter keeps names unique
/// even when tests start in the same millisecond.
///
/// # Example
///
/// ```
/// use cluster_infra_test_utils::aws::test_cluster_name;
///
/// let name = test_cluster_name();
/// assert!(name.starts_with("test-"));
/// ```
pub fn test_cluster_name() -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let ts = Utc::now().timestamp_millis();
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("test-{}-{}", ts, counter)
}
