//! Resource limits for script execution.
//!
//! A script runs until its promise settles, but never past
//! [`ResourceLimits::execution_timeout`]. The deadline is checked between
//! timer callbacks, so a synchronous `while (true) {}` cannot be preempted by
//! it; the engine's loop iteration and recursion limits bound that case.

use boa_engine::Context;
use std::time::Duration;

/// Resource limits for one script execution.
///
/// # Example
///
/// ```
/// use hput_server::ResourceLimits;
/// use std::time::Duration;
///
/// let limits = ResourceLimits::new()
///     .with_execution_timeout(Duration::from_secs(5))
///     .with_loop_iteration_limit(1_000_000);
/// assert!(limits.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLimits {
    /// Maximum wall time from evaluation start until the result is final
    pub execution_timeout: Duration,
    /// Maximum iterations of any single loop
    pub loop_iteration_limit: u64,
    /// Maximum call depth
    pub recursion_limit: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            execution_timeout: Duration::from_secs(30),
            loop_iteration_limit: 100_000_000,
            recursion_limit: 512,
        }
    }
}

impl ResourceLimits {
    /// Creates limits with a 30 second execution timeout.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn with_loop_iteration_limit(mut self, limit: u64) -> Self {
        self.loop_iteration_limit = limit;
        self
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Applies the engine-side limits to a fresh context.
    pub(crate) fn apply(&self, context: &mut Context) {
        let runtime_limits = context.runtime_limits_mut();
        runtime_limits.set_loop_iteration_limit(self.loop_iteration_limit);
        runtime_limits.set_recursion_limit(self.recursion_limit);
    }

    /// Validates the resource limits configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Execution timeout is zero or longer than one hour
    /// - Either engine limit is zero
    pub fn validate(&self) -> Result<(), String> {
        if self.execution_timeout.is_zero() {
            return Err("execution timeout must be greater than zero".to_string());
        }

        if self.execution_timeout.as_secs() > 3600 {
            return Err(format!(
                "execution timeout must be <= 1 hour (got {} seconds)",
                self.execution_timeout.as_secs()
            ));
        }

        if self.loop_iteration_limit == 0 {
            return Err("loop iteration limit must be greater than zero".to_string());
        }

        if self.recursion_limit == 0 {
            return Err("recursion limit must be greater than zero".to_string());
        }

        Ok(())
    }
}
