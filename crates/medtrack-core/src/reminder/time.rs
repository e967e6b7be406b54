//! Trigger time computation.
//!
//! Pure functions over an injected `now`. The resolver is generic over the
//! time zone: the engine passes the host's local zone, tests pass fixed
//! offsets.

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone};

use crate::schedule::TimeOfDay;

/// Offsets used to derive follow-up triggers from a main trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeResolver {
    pre_notice_offset: Duration,
    pre_notice_lead: Duration,
    escalation_interval: Duration,
}

impl Default for TimeResolver {
    fn default() -> Self {
        Self {
            pre_notice_offset: Duration::minutes(5),
            pre_notice_lead: Duration::minutes(6),
            escalation_interval: Duration::minutes(5),
        }
    }
}

impl TimeResolver {
    pub fn new(
        pre_notice_offset: Duration,
        pre_notice_lead: Duration,
        escalation_interval: Duration,
    ) -> Self {
        Self {
            pre_notice_offset,
            pre_notice_lead,
            escalation_interval,
        }
    }

    /// Next instant at `time_of_day`, today if still ahead of `now`,
    /// otherwise tomorrow.
    ///
    /// The result is always strictly after `now` and falls on `now`'s
    /// calendar date or the one after it.
    pub fn next_trigger<Tz: TimeZone>(&self, time_of_day: TimeOfDay, now: &DateTime<Tz>) -> DateTime<Tz> {
        let tz = now.timezone();
        let today = now.date_naive();
        let candidate = resolve_wall_clock(&tz, today.and_time(time_of_day.as_naive()));
        if candidate > *now {
            return candidate;
        }

        match today.succ_opt() {
            Some(tomorrow) => {
                let next = resolve_wall_clock(&tz, tomorrow.and_time(time_of_day.as_naive()));
                if next > *now {
                    next
                } else {
                    // only reachable through pathological zone transitions
                    candidate + Duration::days(1)
                }
            }
            None => candidate + Duration::days(1),
        }
    }

    /// When to warn ahead of `main`, or `None` if there is not enough lead
    /// time left before it.
    pub fn pre_notice_time<Tz: TimeZone>(
        &self,
        main: &DateTime<Tz>,
        now: &DateTime<Tz>,
    ) -> Option<DateTime<Tz>> {
        let lead = main.clone() - now.clone();
        if lead < self.pre_notice_lead {
            return None;
        }
        let at = main.clone() - self.pre_notice_offset;
        (at > *now).then_some(at)
    }

    /// When to repeat an unacknowledged alert that fired at `fired_at`.
    pub fn escalation_time<Tz: TimeZone>(&self, fired_at: &DateTime<Tz>) -> DateTime<Tz> {
        fired_at.clone() + self.escalation_interval
    }
}

/// Map a local wall-clock time to an instant.
///
/// Ambiguous times (DST fall-back) take the earlier instant; times inside a
/// DST gap move forward to the first wall-clock minute that exists.
fn resolve_wall_clock<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    let mut probe = naive;
    for _ in 0..=(4 * 60) {
        match tz.from_local_datetime(&probe) {
            LocalResult::Single(at) => return at,
            LocalResult::Ambiguous(earliest, _) => return earliest,
            LocalResult::None => probe += Duration::minutes(1),
        }
    }
    tz.from_utc_datetime(&naive)
}
