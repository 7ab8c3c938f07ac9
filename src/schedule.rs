//! Class schedule strings such as `"MWF 8:00 AM - 10:00 AM"` or
//! `"Mon-Fri 2:00 PM-4:00 PM"`.

use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Timelike, Weekday};
use regex::Regex;
use std::sync::OnceLock;

/// Students may sign in this long before the class starts and still count.
pub const EARLY_ALLOWANCE_MINUTES: i64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub days: String,
    pub start: NaiveTime,
    pub end: Option<NaiveTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStatus {
    Present,
    Late,
}

impl LoginStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LoginStatus::Present => "present",
            LoginStatus::Late => "late",
        }
    }
}

fn schedule_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(\S+)\s+(\d{1,2}):(\d{2})\s*([AaPp][Mm])(?:\s*-\s*(\d{1,2}):(\d{2})\s*([AaPp][Mm]))?",
        )
        .ok()
    })
    .as_ref()
}

fn clock(hour: &str, minute: &str, meridiem: &str) -> Option<NaiveTime> {
    let h: u32 = hour.parse().ok()?;
    let m: u32 = minute.parse().ok()?;
    if !(1..=12).contains(&h) {
        return None;
    }
    let h24 = match (meridiem.eq_ignore_ascii_case("pm"), h) {
        (false, 12) => 0,
        (false, h) => h,
        (true, 12) => 12,
        (true, h) => h + 12,
    };
    NaiveTime::from_hms_opt(h24, m, 0)
}

pub fn parse_schedule(s: &str) -> Option<Schedule> {
    let caps = schedule_re()?.captures(s)?;
    let start = clock(&caps[2], &caps[3], &caps[4])?;
    let end = match (caps.get(5), caps.get(6), caps.get(7)) {
        (Some(h), Some(m), Some(p)) => Some(clock(h.as_str(), m.as_str(), p.as_str())?),
        _ => None,
    };
    Some(Schedule {
        days: caps[1].to_string(),
        start,
        end,
    })
}

const NAMES: [(&str, Weekday); 7] = [
    ("mon", Weekday::Mon),
    ("tue", Weekday::Tue),
    ("wed", Weekday::Wed),
    ("thu", Weekday::Thu),
    ("fri", Weekday::Fri),
    ("sat", Weekday::Sat),
    ("sun", Weekday::Sun),
];

fn day_by_name(s: &str) -> Option<Weekday> {
    let s = s.to_ascii_lowercase();
    NAMES
        .iter()
        .find(|(name, _)| s.starts_with(name))
        .map(|(_, d)| *d)
}

/// Compact letter codes: M T W Th (or R) F S Su.
fn compact_days(s: &str) -> Vec<Weekday> {
    let lower = s.to_ascii_lowercase();
    let b = lower.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < b.len() {
        let next = b.get(i + 1).copied();
        let (day, step) = match (b[i], next) {
            (b't', Some(b'h')) => (Some(Weekday::Thu), 2),
            (b's', Some(b'u')) => (Some(Weekday::Sun), 2),
            (b's', Some(b'a')) => (Some(Weekday::Sat), 2),
            (b'm', _) => (Some(Weekday::Mon), 1),
            (b't', _) => (Some(Weekday::Tue), 1),
            (b'w', _) => (Some(Weekday::Wed), 1),
            (b'r', _) => (Some(Weekday::Thu), 1),
            (b'f', _) => (Some(Weekday::Fri), 1),
            (b's', _) => (Some(Weekday::Sat), 1),
            _ => (None, 1),
        };
        if let Some(d) = day {
            out.push(d);
        }
        i += step;
    }
    out
}

impl Schedule {
    pub fn meets_on(&self, day: Weekday) -> bool {
        let days = self.days.to_ascii_lowercase();
        if days == "daily" {
            return true;
        }
        if let Some((a, b)) = days.split_once('-') {
            if let (Some(from), Some(to)) = (day_by_name(a), day_by_name(b)) {
                let (from, to, d) = (
                    from.num_days_from_monday(),
                    to.num_days_from_monday(),
                    day.num_days_from_monday(),
                );
                return from <= d && d <= to;
            }
        }
        let abbr = NAMES
            .iter()
            .find(|(_, d)| *d == day)
            .map(|(n, _)| *n)
            .unwrap_or("");
        if days.contains(abbr) {
            return true;
        }
        if days.len() >= 3 && NAMES.iter().any(|(n, _)| days.contains(n)) {
            return false;
        }
        compact_days(&days).contains(&day)
    }

    /// Window is `[start - 10 min, end]` on a meeting day. Schedules without
    /// an end time never match.
    pub fn is_within(&self, now: NaiveDateTime) -> bool {
        let Some(end) = self.end else {
            return false;
        };
        if !self.meets_on(now.weekday()) {
            return false;
        }
        let t = NaiveTime::from_hms_opt(now.hour(), now.minute(), 0).unwrap_or(now.time());
        let opens = self.start - Duration::minutes(EARLY_ALLOWANCE_MINUTES);
        t >= opens && t <= end
    }

    /// At or before `start + grace` is present, anything later is late.
    pub fn classify_login(&self, login: NaiveTime, grace_minutes: i64) -> LoginStatus {
        if login <= self.start + Duration::minutes(grace_minutes) {
            LoginStatus::Present
        } else {
            LoginStatus::Late
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(h, min, 0))
            .expect("valid datetime")
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).expect("valid time")
    }

    #[test]
    fn parses_spaced_and_compact_ranges() {
        let s = parse_schedule("MWF 8:00 AM - 10:00 AM").expect("parse");
        assert_eq!(s.days, "MWF");
        assert_eq!(s.start, t(8, 0));
        assert_eq!(s.end, Some(t(10, 0)));

        let s = parse_schedule("TTh 2:30 PM-4:00 PM").expect("parse");
        assert_eq!(s.start, t(14, 30));
        assert_eq!(s.end, Some(t(16, 0)));

        let s = parse_schedule("Sat 12:00 PM").expect("parse");
        assert_eq!(s.start, t(12, 0));
        assert_eq!(s.end, None);

        assert_eq!(parse_schedule("12:00 AM - 1:00 AM"), None);
        assert_eq!(parse_schedule("TBA"), None);
        assert_eq!(parse_schedule("MWF 13:00 PM - 2:00 PM"), None);
    }

    #[test]
    fn meeting_days() {
        let mwf = parse_schedule("MWF 8:00 AM - 10:00 AM").expect("parse");
        assert!(mwf.meets_on(Weekday::Mon));
        assert!(mwf.meets_on(Weekday::Fri));
        assert!(!mwf.meets_on(Weekday::Tue));

        let tth = parse_schedule("TTh 8:00 AM - 10:00 AM").expect("parse");
        assert!(tth.meets_on(Weekday::Tue));
        assert!(tth.meets_on(Weekday::Thu));
        assert!(!tth.meets_on(Weekday::Wed));

        let range = parse_schedule("Mon-Wed 8:00 AM - 10:00 AM").expect("parse");
        assert!(range.meets_on(Weekday::Tue));
        assert!(!range.meets_on(Weekday::Thu));

        let monday = parse_schedule("Monday 8:00 AM - 10:00 AM").expect("parse");
        assert!(monday.meets_on(Weekday::Mon));
        assert!(!monday.meets_on(Weekday::Sat));

        let sat = parse_schedule("Sat 8:00 AM - 10:00 AM").expect("parse");
        assert!(sat.meets_on(Weekday::Sat));
        assert!(!sat.meets_on(Weekday::Tue));
    }

    #[test]
    fn window_allows_ten_minutes_early() {
        // 2024-01-01 is a Monday.
        let s = parse_schedule("MWF 8:00 AM - 10:00 AM").expect("parse");
        assert!(s.is_within(at(2024, 1, 1, 7, 50)));
        assert!(!s.is_within(at(2024, 1, 1, 7, 49)));
        assert!(s.is_within(at(2024, 1, 1, 10, 0)));
        assert!(!s.is_within(at(2024, 1, 1, 10, 1)));
        assert!(!s.is_within(at(2024, 1, 2, 8, 30)));
    }

    #[test]
    fn grace_boundary_is_present() {
        let s = parse_schedule("MWF 8:00 AM - 10:00 AM").expect("parse");
        assert_eq!(s.classify_login(t(7, 55), 10), LoginStatus::Present);
        assert_eq!(s.classify_login(t(8, 10), 10), LoginStatus::Present);
        assert_eq!(s.classify_login(t(8, 11), 10), LoginStatus::Late);
        assert_eq!(s.classify_login(t(8, 11), 15).as_str(), "present");
    }
}
