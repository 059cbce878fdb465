// src/deadline.rs

//! Absolute timeouts for `wait` and `sync_for_cpu`.

use crate::drm::abi::Gfx2dTimespec;
use nix::sys::time::TimeSpec;
use nix::time::{clock_gettime, ClockId};
use std::time::Duration;

/// A point in time on `CLOCK_MONOTONIC`.
///
/// The kernel compares deadlines against the monotonic clock, so they are
/// absolute rather than relative: retrying an interrupted wait does not
/// extend it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Duration);

impl Deadline {
    /// The deadline `timeout` from now.
    pub fn after(timeout: Duration) -> nix::Result<Self> {
        Ok(Deadline(now()? + timeout))
    }

    /// A deadline that has already passed.
    pub fn past() -> Self {
        Deadline(Duration::ZERO)
    }

    pub fn has_passed(&self) -> bool {
        now().map(|now| now >= self.0).unwrap_or(true)
    }

    pub fn as_timespec(&self) -> Gfx2dTimespec {
        Gfx2dTimespec {
            tv_sec: self.0.as_secs() as i64,
            tv_nsec: i64::from(self.0.subsec_nanos()),
        }
    }
}

fn now() -> nix::Result<Duration> {
    let ts: TimeSpec = clock_gettime(ClockId::CLOCK_MONOTONIC)?;
    Ok(Duration::from(ts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn past_deadline_has_passed() {
        assert!(Deadline::past().has_passed());
        assert_eq!(Deadline::past().as_timespec(), Gfx2dTimespec::default());
    }

    #[test]
    fn future_deadline_is_pending() {
        let deadline = Deadline::after(Duration::from_secs(60)).unwrap();
        assert!(!deadline.has_passed());
        assert!(deadline > Deadline::past());
        assert!(deadline.as_timespec().tv_nsec < 1_000_000_000);
    }
}
