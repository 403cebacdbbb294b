//! Auto-save timing for a session.
//!
//! The session reports its unsaved-changes state and the outcome of every
//! save here, and asks between edits whether a save is due. The manager
//! never saves on its own.

use std::time::Duration;
use web_time::Instant;

use crate::config::AutoSaveConfig;
use crate::constants::MAX_AUTOSAVE_BACKOFF;
use crate::sync::SaveReport;

/// Decides when a session with unsaved changes should be saved.
///
/// A save is due when:
/// 1. the debounce delay has passed since the last change, and
/// 2. the minimum interval has passed since the last save that reached the
///    backend.
///
/// After failed saves the retry waits one interval per failure, doubling
/// each time up to [`MAX_AUTOSAVE_BACKOFF`] intervals.
#[derive(Debug)]
pub struct AutoSaveManager {
    save_interval: Duration,
    debounce_delay: Duration,
    enabled: bool,
    /// Latest unsaved change; `None` while the session is clean
    last_change: Option<Instant>,
    /// Last save that sent something to the backend
    last_write: Option<Instant>,
    last_failure: Option<Instant>,
    /// Failed saves in a row
    failures: u32,
}

impl AutoSaveManager {
    /// Manager with the given timing, disabled unless the config enables it.
    pub fn from_config(config: &AutoSaveConfig) -> Self {
        Self {
            save_interval: Duration::from_secs(config.interval_secs),
            debounce_delay: Duration::from_secs(config.debounce_secs),
            enabled: config.enabled,
            last_change: None,
            last_write: None,
            last_failure: None,
            failures: 0,
        }
    }

    /// Disabled manager with the default timing.
    pub fn disabled() -> Self {
        Self::from_config(&AutoSaveConfig::default())
    }

    pub fn with_save_interval(mut self, interval: Duration) -> Self {
        self.save_interval = interval;
        self
    }

    pub fn with_debounce_delay(mut self, delay: Duration) -> Self {
        self.debounce_delay = delay;
        self
    }

    /// Record the session state after an edit, undo or redo.
    ///
    /// Going back to the saved state (e.g. by undoing every edit since the
    /// last save) cancels the pending save.
    pub fn note_change(&mut self, unsaved: bool) {
        if unsaved {
            self.last_change = Some(Instant::now());
            log::trace!("Auto-save: change pending");
        } else if self.last_change.take().is_some() {
            log::trace!("Auto-save: back to the saved state, nothing pending");
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.last_change.is_some()
    }

    /// Whether a save is due now.
    pub fn should_save(&self) -> bool {
        if !self.enabled {
            return false;
        }
        let Some(last_change) = self.last_change else {
            return false;
        };
        if last_change.elapsed() < self.debounce_delay {
            return false;
        }
        if let Some(failed) = self.last_failure
            && failed.elapsed() < self.retry_delay()
        {
            return false;
        }
        self.last_write
            .is_none_or(|written| written.elapsed() >= self.save_interval)
    }

    /// Wait before retrying after the current run of failed saves.
    pub fn retry_delay(&self) -> Duration {
        if self.failures == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32
            .saturating_pow(self.failures - 1)
            .min(MAX_AUTOSAVE_BACKOFF);
        self.save_interval.saturating_mul(factor)
    }

    /// Record a successful save.
    ///
    /// A save that sent nothing leaves the minimum interval untouched.
    pub fn record_save(&mut self, report: &SaveReport) {
        if report.calls > 0 {
            self.last_write = Some(Instant::now());
        }
        self.last_change = None;
        self.last_failure = None;
        self.failures = 0;
        log::trace!("Auto-save: saved with {} backend calls", report.calls);
    }

    /// Record a failed save. Changes stay pending and the retry backs off.
    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
        self.last_failure = Some(Instant::now());
        log::debug!(
            "Auto-save: {} failed saves in a row, next try in {:?}",
            self.failures,
            self.retry_delay()
        );
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        log::debug!("Auto-save: enabled = {}", enabled);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn time_since_last_write(&self) -> Option<Duration> {
        self.last_write.map(|t| t.elapsed())
    }

    /// Forget all timing state, e.g. after reloading from the server.
    pub fn reset(&mut self) {
        self.last_change = None;
        self.last_write = None;
        self.last_failure = None;
        self.failures = 0;
    }
}

impl Default for AutoSaveManager {
    fn default() -> Self {
        Self::disabled()
    }
}
