use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;

/// Tri-state attendance marker on a schedule entry.
///
/// New entries start as `Unmarked`. The UI advances the state one step per
/// tap; the ring has no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceStatus {
    Unmarked,
    Present,
    Absent,
}

impl AttendanceStatus {
    /// Single forward transition: Unmarked -> Present -> Absent -> Unmarked.
    pub fn next(self) -> Self {
        match self {
            AttendanceStatus::Unmarked => AttendanceStatus::Present,
            AttendanceStatus::Present => AttendanceStatus::Absent,
            AttendanceStatus::Absent => AttendanceStatus::Unmarked,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Unmarked => "unmarked",
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "unmarked" => Some(AttendanceStatus::Unmarked),
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            _ => None,
        }
    }
}

pub const WEEKDAY_LABELS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// The 7 consecutive dates of the calendar week containing `reference`,
/// Monday first. A Sunday reference resolves backward to the Monday six
/// days earlier, never forward into the next week.
pub fn week_window(reference: NaiveDate) -> [NaiveDate; 7] {
    let monday = reference - Duration::days(reference.weekday().num_days_from_monday() as i64);
    std::array::from_fn(|i| monday + Duration::days(i as i64))
}

/// Filter value for record listings: wildcard or exact category match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategorySelector {
    All,
    Exact(String),
}

impl CategorySelector {
    /// Missing, blank, or "all" (any case) means the wildcard.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => CategorySelector::All,
            Some(s) if s.eq_ignore_ascii_case("all") => CategorySelector::All,
            Some(s) => CategorySelector::Exact(s.to_string()),
        }
    }

    pub fn matches(&self, category: &str) -> bool {
        match self {
            CategorySelector::All => true,
            CategorySelector::Exact(want) => category == want,
        }
    }
}

/// Case-insensitive substring search over a record's title and body.
/// An empty or whitespace-only query matches every record.
pub fn text_matches(query: &str, title: &str, body: &str) -> bool {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    title.to_lowercase().contains(&needle) || body.to_lowercase().contains(&needle)
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Arithmetic mean of attendance percentages.
///
/// An empty input is a `no_data` error rather than a silent 0: a 0% result
/// with zero samples would be indistinguishable from real 0% attendance.
pub fn mean_percentage<I>(percentages: I) -> Result<f64, CalcError>
where
    I: IntoIterator<Item = f64>,
{
    let mut sum = 0.0;
    let mut count: usize = 0;
    for p in percentages {
        sum += p;
        count += 1;
    }
    if count == 0 {
        return Err(CalcError::new("no_data", "no attendance records to average"));
    }
    Ok(sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("valid date")
    }

    #[test]
    fn week_window_is_seven_ascending_days_from_monday() {
        // Thursday mid-week.
        let window = week_window(d(2024, 1, 18));
        assert_eq!(window.len(), 7);
        assert_eq!(window[0], d(2024, 1, 15));
        assert_eq!(window[0].weekday(), Weekday::Mon);
        for pair in window.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::days(1));
        }
    }

    #[test]
    fn week_window_monday_reference_is_unchanged() {
        let monday = d(2024, 1, 15);
        assert_eq!(week_window(monday)[0], monday);
    }

    #[test]
    fn week_window_sunday_goes_backward_six_days() {
        let sunday = d(2024, 1, 21);
        let window = week_window(sunday);
        assert_eq!(window[0], d(2024, 1, 15));
        assert_eq!(window[6], sunday);
    }

    #[test]
    fn week_window_crosses_month_boundary() {
        // 2024-03-01 is a Friday; its Monday is in February.
        let window = week_window(d(2024, 3, 1));
        assert_eq!(window[0], d(2024, 2, 26));
        assert_eq!(window[6], d(2024, 3, 3));
    }

    #[test]
    fn attendance_cycle_has_length_three() {
        let s0 = AttendanceStatus::Unmarked;
        let s1 = s0.next();
        let s2 = s1.next();
        let s3 = s2.next();
        assert_eq!(s1, AttendanceStatus::Present);
        assert_eq!(s2, AttendanceStatus::Absent);
        assert_eq!(s3, AttendanceStatus::Unmarked);
    }

    #[test]
    fn attendance_status_round_trips_through_strings() {
        for s in [
            AttendanceStatus::Unmarked,
            AttendanceStatus::Present,
            AttendanceStatus::Absent,
        ] {
            assert_eq!(AttendanceStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(AttendanceStatus::parse("PRESENT"), Some(AttendanceStatus::Present));
        assert_eq!(AttendanceStatus::parse("late"), None);
    }

    #[test]
    fn category_selector_wildcard_forms() {
        assert_eq!(CategorySelector::parse(None), CategorySelector::All);
        assert_eq!(CategorySelector::parse(Some("")), CategorySelector::All);
        assert_eq!(CategorySelector::parse(Some("All")), CategorySelector::All);
        assert_eq!(CategorySelector::parse(Some("ALL")), CategorySelector::All);
        assert_eq!(
            CategorySelector::parse(Some("Physics")),
            CategorySelector::Exact("Physics".to_string())
        );
    }

    #[test]
    fn category_selector_exact_match_is_exact() {
        let sel = CategorySelector::parse(Some("Mathematics"));
        assert!(sel.matches("Mathematics"));
        assert!(!sel.matches("mathematics"));
        assert!(!sel.matches("Physics"));
    }

    #[test]
    fn text_match_is_case_insensitive_over_title_and_body() {
        assert!(text_matches("CALCULUS", "Calculus - Derivatives", ""));
        assert!(text_matches("chain rule", "Derivatives", "the chain rule, with examples"));
        assert!(!text_matches("thermo", "Derivatives", "chain rule"));
    }

    #[test]
    fn empty_query_matches_everything() {
        assert!(text_matches("", "anything", "at all"));
        assert!(text_matches("   ", "anything", "at all"));
    }

    #[test]
    fn mean_percentage_matches_dashboard_sample() {
        let mean = mean_percentage([93.0, 89.0, 85.0, 94.0]).expect("mean");
        assert!((mean - 90.25).abs() < 1e-9);
        assert_eq!(mean.round() as i64, 90);
    }

    #[test]
    fn mean_percentage_rejects_empty_input() {
        let err = mean_percentage(std::iter::empty()).expect_err("empty must fail");
        assert_eq!(err.code, "no_data");
    }
}
