//! Configuration options which can alter the behavior of resolvers.

use std::time::Duration;

/// How long may a single probe take before the backend is considered failed?
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// How often are resolvers re-checked if nothing else triggers them?
pub const DEFAULT_RESOLVE_INTERVAL: Duration = Duration::from_secs(30);

/// Policy which is applicable to resolvers built by a [crate::builder::ListBuilder].
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Policy {
    /// Upper bound on a single probe of one address.
    ///
    /// Timeouts are reported the same way as refused connections.
    ///
    /// Default: 3 seconds
    pub probe_timeout: Duration,

    /// How many addresses may be probed at the same time during one pass?
    ///
    /// Default: 16
    pub probe_concurrency: usize,

    /// How many unread errors are buffered on an error stream before new
    /// errors are dropped?
    ///
    /// Default: 10
    pub error_capacity: usize,

    /// How often should a watched resolver re-check its backends, regardless
    /// of connection state changes?
    ///
    /// Default: Some(30 seconds). `None` disables the periodic pass.
    pub resolve_interval: Option<Duration>,

    /// Random jitter added to each periodic pass, so that many resolvers
    /// don't probe in lockstep.
    ///
    /// Default: 1 second
    pub resolve_spread: Duration,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            probe_concurrency: 16,
            error_capacity: 10,
            resolve_interval: Some(DEFAULT_RESOLVE_INTERVAL),
            resolve_spread: Duration::from_secs(1),
        }
    }
}
