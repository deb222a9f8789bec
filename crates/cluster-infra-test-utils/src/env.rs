//! Scoped environment variable overrides
//!
//! The process environment is global, so every guard holds one shared lock
//! for its lifetime. Tests touching the environment therefore run one at a
//! time even under the default multi-threaded test runner.

use std::sync::{Mutex, MutexGuard};

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Sets environment variables and restores the previous values on drop.
///
/// # Example
///
/// ```
/// use cluster_infra_test_utils::EnvGuard;
///
/// {
///     let _env = EnvGuard::new(&[("CI_EXAMPLE_VAR", Some("1"))]);
///     assert_eq!(std::env::var("CI_EXAMPLE_VAR").as_deref(), Ok("1"));
/// }
/// assert!(std::env::var("CI_EXAMPLE_VAR").is_err());
/// ```
pub struct EnvGuard {
    saved: Vec<(String, Option<String>)>,
    _lock: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Apply the given overrides. `None` removes the variable.
    pub fn new(vars: &[(&str, Option<&str>)]) -> Self {
        let lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut saved = Vec::with_capacity(vars.len());
        for (key, value) in vars {
            saved.push((key.to_string(), std::env::var(key).ok()));
            // SAFETY: all environment mutation in tests goes through ENV_LOCK.
            unsafe {
                match value {
                    Some(v) => std::env::set_var(key, v),
                    None => std::env::remove_var(key),
                }
            }
        }
        Self { saved, _lock: lock }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in self.saved.drain(..).rev() {
            // SAFETY: ENV_LOCK is still held by this guard.
            unsafe {
                match value {
                    Some(v) => std::env::set_var(&key, v),
                    None => std::env::remove_var(&key),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restores_previous_value() {
        {
            let _outer = EnvGuard::new(&[("CI_TEST_UTILS_VAR", Some("before"))]);
            assert_eq!(std::env::var("CI_TEST_UTILS_VAR").as_deref(), Ok("before"));
        }
        assert!(std::env::var("CI_TEST_UTILS_VAR").is_err());
    }

    #[test]
    fn test_removes_variable() {
        let _env = EnvGuard::new(&[("CI_TEST_UTILS_REMOVED", None)]);
        assert!(std::env::var("CI_TEST_UTILS_REMOVED").is_err());
    }
}
