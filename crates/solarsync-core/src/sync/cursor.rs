use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;

use super::event::ChangeEvent;

/// Position of a subscription in the change feed.
///
/// The cursor only moves forward. It is advanced to the newest event
/// timestamp of a successful poll; an empty poll leaves it where it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor(DateTime<Utc>);

impl Cursor {
    #[must_use]
    pub const fn new(at: DateTime<Utc>) -> Self {
        Self(at)
    }

    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    #[must_use]
    pub const fn at(self) -> DateTime<Utc> {
        self.0
    }

    /// Move to `candidate` if it is newer. Returns whether the cursor moved.
    pub fn advance(&mut self, candidate: DateTime<Utc>) -> bool {
        if candidate > self.0 {
            self.0 = candidate;
            true
        } else {
            false
        }
    }

    /// Advance past every event in `events`.
    pub fn advance_past(&mut self, events: &[ChangeEvent]) -> bool {
        events
            .iter()
            .map(ChangeEvent::timestamp)
            .max()
            .is_some_and(|latest| self.advance(latest))
    }

    /// ISO-8601 form sent as the `since` query parameter.
    #[must_use]
    pub fn to_query(self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query())
    }
}

impl From<DateTime<Utc>> for Cursor {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_780_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn query_form_is_utc_millis() {
        let cursor = Cursor::new(Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap());
        assert_eq!(cursor.to_query(), "2026-05-01T10:00:00.000Z");
    }

    #[test]
    fn older_timestamp_does_not_move_cursor() {
        let mut cursor = Cursor::new(t(100));
        assert!(!cursor.advance(t(50)));
        assert!(!cursor.advance(t(100)));
        assert!(cursor.advance(t(101)));
        assert_eq!(cursor.at(), t(101));
    }

    #[test]
    fn empty_batch_keeps_cursor() {
        let mut cursor = Cursor::new(t(0));
        assert!(!cursor.advance_past(&[]));
        assert_eq!(cursor.at(), t(0));
    }

    proptest! {
        #[test]
        fn cursor_never_regresses(start in -10_000i64..10_000, steps in proptest::collection::vec(-10_000i64..10_000, 0..64)) {
            let mut cursor = Cursor::new(t(start));
            let mut high = t(start);
            for step in steps {
                let before = cursor;
                cursor.advance(t(0) + Duration::seconds(step));
                prop_assert!(cursor >= before);
                high = high.max(t(step));
            }
            prop_assert_eq!(cursor.at(), high);
        }
    }
}
