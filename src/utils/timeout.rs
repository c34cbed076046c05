//! Timeout utilities for module shutdown
//!
//! Setup and start hooks are deliberately unbounded; only shutdown is wrapped.
//! The defaults below apply when the plugin configuration does not override
//! `shutdown_timeout_secs` / `module_shutdown_timeout_secs`.

use std::time::Duration;

/// Default upper bound for a whole `shutdown_all` pass
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default window for a single module's shutdown hook
pub const DEFAULT_MODULE_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Execute operation with custom timeout
pub async fn with_custom_timeout<F, T>(
    operation: F,
    duration: Duration,
) -> Result<T, tokio::time::error::Elapsed>
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(duration, operation).await
}
