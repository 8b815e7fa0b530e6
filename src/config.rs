use crate::error::ConfigError;
use std::{borrow::Cow, num::NonZeroUsize, thread, time::Duration};

/// When the resource-access instrumentation runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AccessChecks {
    /// Never check.
    Off,
    /// Check only in builds with `debug_assertions`.
    #[default]
    DebugOnly,
    /// Check in every build.
    Always,
}

impl AccessChecks {
    /// Whether checks run in the current build.
    #[must_use]
    pub fn enabled(self) -> bool {
        match self {
            Self::Off => false,
            Self::DebugOnly => cfg!(debug_assertions),
            Self::Always => true,
        }
    }
}

/// Scheduler configuration.
///
/// Defaults suit a frame loop on a desktop CPU. Tune `spin_iters` and
/// `park_timeout` against measured frame times, not by guess.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker threads. Defaults to the hardware concurrency.
    pub workers: usize,
    /// Seed for victim selection. Worker `i` derives its own stream from it.
    pub seed: u64,
    /// Victims probed per idle round before the worker backs off.
    pub steal_tries: u32,
    /// Idle rounds spent spinning before a worker starts parking.
    pub spin_iters: u32,
    /// Upper bound on one park. Shorter reacts faster to new frames.
    pub park_timeout: Duration,
    /// Wall-clock budget per frame. Frames over budget are logged and
    /// flagged in their report; they are never interrupted.
    pub frame_budget: Option<Duration>,
    /// Resource-access instrumentation.
    pub access_checks: AccessChecks,
    /// Prefix for worker thread names; the worker index is appended.
    pub thread_name: Cow<'static, str>,
}

impl SchedulerConfig {
    /// Check that every knob is usable.
    ///
    /// # Errors
    /// On the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.steal_tries == 0 {
            return Err(ConfigError::NoStealTries);
        }
        if self.park_timeout.is_zero() {
            return Err(ConfigError::ZeroParkTimeout);
        }
        Ok(())
    }

    /// Set the number of workers.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the victim-selection seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the per-frame wall-clock budget.
    #[must_use]
    pub fn with_frame_budget(mut self, budget: Duration) -> Self {
        self.frame_budget = Some(budget);
        self
    }

    /// Set the access instrumentation mode.
    #[must_use]
    pub fn with_access_checks(mut self, checks: AccessChecks) -> Self {
        self.access_checks = checks;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map_or(1, NonZeroUsize::get),
            seed: 0x853c_49e6_748f_ea9b,
            steal_tries: 4,
            spin_iters: 64,
            park_timeout: Duration::from_micros(200),
            frame_budget: None,
            access_checks: AccessChecks::default(),
            thread_name: Cow::Borrowed("fjs-worker"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SchedulerConfig::default();
        assert!(config.workers >= 1);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn rejects_unusable_values() {
        let base = SchedulerConfig::default();
        assert_eq!(
            base.clone().with_workers(0).validate(),
            Err(ConfigError::NoWorkers)
        );
        let config = SchedulerConfig {
            steal_tries: 0,
            ..base.clone()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoStealTries));
        let config = SchedulerConfig {
            park_timeout: Duration::ZERO,
            ..base
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroParkTimeout));
    }

    #[test]
    fn access_checks_follow_build_profile() {
        assert!(!AccessChecks::Off.enabled());
        assert!(AccessChecks::Always.enabled());
        assert_eq!(AccessChecks::DebugOnly.enabled(), cfg!(debug_assertions));
    }
}
