// Run planning: decides whether a job entry is due on a given date
//
// Interval schedules are day-granular: a job with interval_days = N that last
// succeeded on day D is due again on D + N.

use crate::models::{JobEntry, RunDecision, RunReason, SkipReason};
use chrono::{Days, NaiveDate};

/// RunPlanner computes run decisions from an entry's scheduling state
pub trait RunPlanner {
    /// First date on which the entry is due again, if it has ever run
    fn next_run_date(&self) -> Option<NaiveDate>;

    /// Decide whether the entry runs on `today`
    fn decide(&self, today: NaiveDate) -> RunDecision;
}

impl RunPlanner for JobEntry {
    fn next_run_date(&self) -> Option<NaiveDate> {
        let last_run = self.last_run?;
        // An interval that overflows the calendar is never due
        Some(
            last_run
                .checked_add_days(Days::new(u64::from(self.interval_days)))
                .unwrap_or(NaiveDate::MAX),
        )
    }

    fn decide(&self, today: NaiveDate) -> RunDecision {
        if self.disabled {
            return RunDecision::Skip(SkipReason::Disabled);
        }

        if self.force_run {
            return RunDecision::Run(RunReason::Forced);
        }

        match self.next_run_date() {
            None => RunDecision::Run(RunReason::NeverRun),
            Some(next_run) if today >= next_run => RunDecision::Run(RunReason::Due { next_run }),
            Some(next_run) => RunDecision::Skip(SkipReason::NotDue { next_run }),
        }
    }
}

/// Decide whether `entry` runs on `today`
pub fn decide(entry: &JobEntry, today: NaiveDate) -> RunDecision {
    entry.decide(today)
}
