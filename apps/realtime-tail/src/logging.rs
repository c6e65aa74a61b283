//! Tracing/logging bootstrap for the tail app.

use std::env;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,realtime_tail=debug,realtime_zulip=info";

/// Initialize global tracing subscriber with severity gating from environment.
///
/// Precedence:
/// 1) `RUST_LOG`
/// 2) `REALTIME_TAIL_LOG`
/// 3) internal default filter
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_ids(true)
        .with_env_filter(filter_from_env(|key| env::var(key).ok()))
        .try_init();
}

fn filter_from_env<F>(lookup: F) -> EnvFilter
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup("RUST_LOG").filter(|v| !v.trim().is_empty())
        && let Ok(filter) = EnvFilter::try_new(value)
    {
        return filter;
    }

    if let Some(value) = lookup("REALTIME_TAIL_LOG").filter(|v| !v.trim().is_empty())
        && let Ok(filter) = EnvFilter::try_new(value)
    {
        return filter;
    }

    EnvFilter::new(DEFAULT_FILTER)
}
