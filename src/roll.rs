use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Day-level attendance state. Stored rows only ever carry Present or
/// Absent; Unmarked is the synthesized "no row exists" state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DayStatus {
    Present,
    Absent,
    Unmarked,
}

impl DayStatus {
    pub fn from_flag(present: bool) -> Self {
        if present {
            DayStatus::Present
        } else {
            DayStatus::Absent
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DayStatus::Present => "present",
            DayStatus::Absent => "absent",
            DayStatus::Unmarked => "unmarked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterStudent {
    pub id: String,
    pub name: String,
    pub email: String,
}

/// An attendance row as read back from the row store. `date` is kept as the
/// stored text and normalized through [`day_key`] before any comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub id: String,
    pub student_id: String,
    pub date: String,
    pub present: bool,
}

impl RawRow {
    fn report_id(&self) -> String {
        if self.id.is_empty() {
            self.student_id.clone()
        } else {
            self.id.clone()
        }
    }
}

/// Canonical `YYYY-MM-DD` day key for a stored date. Any time-of-day or
/// zone suffix after the date part is ignored.
pub fn day_key(raw: &str) -> Option<NaiveDate> {
    let head = raw
        .trim()
        .split(|c| c == 'T' || c == ' ')
        .next()
        .unwrap_or("");
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

/// First and last day of a month. `month` is 1-based; `None` for a
/// month/year combination chrono rejects.
pub fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((first, next_first.pred_opt()?))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciledEntry {
    pub student_id: String,
    pub name: String,
    pub email: String,
    pub row_id: Option<String>,
    pub status: DayStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciledDay {
    pub date: String,
    pub entries: Vec<ReconciledEntry>,
    /// Rows beyond the first for one student/day, first-wins order.
    pub duplicate_rows: Vec<String>,
    /// Rows whose student id is not in the roster.
    pub orphan_rows: Vec<String>,
    /// Rows whose stored date does not normalize to a day key.
    pub malformed_rows: Vec<String>,
}

impl ReconciledDay {
    pub fn present_count(&self) -> usize {
        self.count(DayStatus::Present)
    }

    pub fn absent_count(&self) -> usize {
        self.count(DayStatus::Absent)
    }

    pub fn unmarked_count(&self) -> usize {
        self.count(DayStatus::Unmarked)
    }

    /// Whether any attendance was stored for this day at all.
    pub fn recorded(&self) -> bool {
        self.entries.iter().any(|e| e.row_id.is_some())
    }

    fn count(&self, status: DayStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }
}

/// Merge a day's sparse rows with the full roster: one entry per roster
/// student, in roster order, Unmarked when no row matches. Rows are assumed
/// pre-filtered to `date`; rows normalizing to a different day are ignored.
pub fn reconcile_day(roster: &[RosterStudent], rows: &[RawRow], date: NaiveDate) -> ReconciledDay {
    let roster_ids: HashSet<&str> = roster.iter().map(|s| s.id.as_str()).collect();

    let mut by_student: HashMap<&str, &RawRow> = HashMap::new();
    let mut duplicate_rows = Vec::new();
    let mut orphan_rows = Vec::new();
    let mut malformed_rows = Vec::new();

    for row in rows {
        let Some(key) = day_key(&row.date) else {
            malformed_rows.push(row.report_id());
            continue;
        };
        if key != date {
            continue;
        }
        if !roster_ids.contains(row.student_id.as_str()) {
            orphan_rows.push(row.report_id());
            continue;
        }
        if by_student.contains_key(row.student_id.as_str()) {
            duplicate_rows.push(row.report_id());
        } else {
            by_student.insert(row.student_id.as_str(), row);
        }
    }

    let entries = roster
        .iter()
        .map(|s| match by_student.get(s.id.as_str()) {
            Some(row) => ReconciledEntry {
                student_id: s.id.clone(),
                name: s.name.clone(),
                email: s.email.clone(),
                row_id: Some(row.id.clone()),
                status: DayStatus::from_flag(row.present),
            },
            None => ReconciledEntry {
                student_id: s.id.clone(),
                name: s.name.clone(),
                email: s.email.clone(),
                row_id: None,
                status: DayStatus::Unmarked,
            },
        })
        .collect();

    ReconciledDay {
        date: date.format("%Y-%m-%d").to_string(),
        entries,
        duplicate_rows,
        orphan_rows,
        malformed_rows,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentMonthSummary {
    pub student_id: String,
    pub name: String,
    pub email: String,
    pub present: u32,
    pub absent: u32,
    pub total: u32,
    pub percentage: f64,
}

impl StudentMonthSummary {
    pub fn band(&self) -> Band {
        classify_percentage(self.percentage)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthSummary {
    pub year: i32,
    pub month: u32,
    pub summaries: Vec<StudentMonthSummary>,
    pub orphan_rows: Vec<String>,
    pub malformed_rows: Vec<String>,
}

/// Per-student totals and percentage-present across one month. `month` is
/// 1-based; `None` when chrono rejects the year/month. Rows outside the
/// month's inclusive [first, last] range are ignored; Unmarked days never
/// enter a total, so `present + absent == total` for every student.
pub fn summarize_month(
    roster: &[RosterStudent],
    rows: &[RawRow],
    year: i32,
    month: u32,
) -> Option<MonthSummary> {
    let (first, last) = month_bounds(year, month)?;
    let roster_ids: HashSet<&str> = roster.iter().map(|s| s.id.as_str()).collect();

    let mut tallies: HashMap<&str, (u32, u32)> = HashMap::new();
    let mut orphan_rows = Vec::new();
    let mut malformed_rows = Vec::new();

    for row in rows {
        let Some(key) = day_key(&row.date) else {
            malformed_rows.push(row.report_id());
            continue;
        };
        if key < first || key > last {
            continue;
        }
        if !roster_ids.contains(row.student_id.as_str()) {
            orphan_rows.push(row.report_id());
            continue;
        }
        let tally = tallies.entry(row.student_id.as_str()).or_insert((0, 0));
        if row.present {
            tally.0 += 1;
        } else {
            tally.1 += 1;
        }
    }

    let summaries = roster
        .iter()
        .map(|s| {
            let (present, absent) = tallies.get(s.id.as_str()).copied().unwrap_or((0, 0));
            let total = present + absent;
            let percentage = if total > 0 {
                f64::from(present) / f64::from(total) * 100.0
            } else {
                0.0
            };
            StudentMonthSummary {
                student_id: s.id.clone(),
                name: s.name.clone(),
                email: s.email.clone(),
                present,
                absent,
                total,
                percentage,
            }
        })
        .collect();

    Some(MonthSummary {
        year,
        month,
        summaries,
        orphan_rows,
        malformed_rows,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Excellent,
    Good,
    Warning,
    Critical,
}

impl Band {
    pub fn as_str(self) -> &'static str {
        match self {
            Band::Excellent => "excellent",
            Band::Good => "good",
            Band::Warning => "warning",
            Band::Critical => "critical",
        }
    }
}

/// Display band for an attendance percentage. Lower-inclusive thresholds at
/// 90 / 75 / 60; values outside [0, 100] pass through unchanged.
pub fn classify_percentage(p: f64) -> Band {
    if p >= 90.0 {
        Band::Excellent
    } else if p >= 75.0 {
        Band::Good
    } else if p >= 60.0 {
        Band::Warning
    } else {
        Band::Critical
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(id: &str, name: &str) -> RosterStudent {
        RosterStudent {
            id: id.to_string(),
            name: name.to_string(),
            email: format!("{}@example.com", id),
        }
    }

    fn row(id: &str, student_id: &str, date: &str, present: bool) -> RawRow {
        RawRow {
            id: id.to_string(),
            student_id: student_id.to_string(),
            date: date.to_string(),
            present,
        }
    }

    fn day(s: &str) -> NaiveDate {
        day_key(s).expect("test date")
    }

    #[test]
    fn day_key_ignores_time_and_zone_suffixes() {
        let want = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(day_key("2024-03-01"), Some(want));
        assert_eq!(day_key("2024-03-01T08:30:00Z"), Some(want));
        assert_eq!(day_key("2024-03-01 08:30:00"), Some(want));
        assert_eq!(day_key(" 2024-03-01 "), Some(want));
        assert_eq!(day_key("not-a-date"), None);
        assert_eq!(day_key("2024-13-01"), None);
        assert_eq!(day_key(""), None);
    }

    #[test]
    fn month_bounds_cover_leap_february() {
        let (first, last) = month_bounds(2024, 2).unwrap();
        assert_eq!(first, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(last, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());

        let (_, last) = month_bounds(2023, 2).unwrap();
        assert_eq!(last, NaiveDate::from_ymd_opt(2023, 2, 28).unwrap());

        let (first, last) = month_bounds(2024, 12).unwrap();
        assert_eq!(first, NaiveDate::from_ymd_opt(2024, 12, 1).unwrap());
        assert_eq!(last, NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());

        assert_eq!(month_bounds(2024, 0), None);
        assert_eq!(month_bounds(2024, 13), None);
    }

    #[test]
    fn reconcile_fills_unmarked_for_missing_rows() {
        let roster = vec![student("a", "Avery"), student("b", "Blake")];
        let rows = vec![row("r1", "a", "2024-03-01", true)];
        let out = reconcile_day(&roster, &rows, day("2024-03-01"));

        assert_eq!(out.entries.len(), 2);
        assert_eq!(out.entries[0].student_id, "a");
        assert_eq!(out.entries[0].status, DayStatus::Present);
        assert_eq!(out.entries[0].row_id.as_deref(), Some("r1"));
        assert_eq!(out.entries[1].student_id, "b");
        assert_eq!(out.entries[1].status, DayStatus::Unmarked);
        assert_eq!(out.entries[1].row_id, None);
        assert!(out.recorded());
        assert_eq!(out.present_count(), 1);
        assert_eq!(out.absent_count(), 0);
        assert_eq!(out.unmarked_count(), 1);
    }

    #[test]
    fn reconcile_preserves_roster_order_and_size() {
        let roster: Vec<RosterStudent> = ["c", "a", "b"]
            .iter()
            .map(|id| student(id, id))
            .collect();
        let rows = vec![
            row("r1", "b", "2024-03-01", false),
            row("r2", "a", "2024-03-01", true),
        ];
        let out = reconcile_day(&roster, &rows, day("2024-03-01"));
        let order: Vec<&str> = out.entries.iter().map(|e| e.student_id.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn reconcile_duplicate_rows_resolve_first_wins() {
        let roster = vec![student("a", "Avery")];
        let rows = vec![
            row("r1", "a", "2024-03-01", true),
            row("r2", "a", "2024-03-01", false),
        ];
        let out = reconcile_day(&roster, &rows, day("2024-03-01"));
        assert_eq!(out.entries[0].status, DayStatus::Present);
        assert_eq!(out.entries[0].row_id.as_deref(), Some("r1"));
        assert_eq!(out.duplicate_rows, vec!["r2".to_string()]);
    }

    #[test]
    fn reconcile_reports_orphans_and_malformed_rows() {
        let roster = vec![student("a", "Avery")];
        let rows = vec![
            row("r1", "ghost", "2024-03-01", true),
            row("r2", "a", "yesterday", true),
        ];
        let out = reconcile_day(&roster, &rows, day("2024-03-01"));
        assert_eq!(out.entries[0].status, DayStatus::Unmarked);
        assert_eq!(out.orphan_rows, vec!["r1".to_string()]);
        assert_eq!(out.malformed_rows, vec!["r2".to_string()]);
        assert!(!out.recorded());
    }

    #[test]
    fn reconcile_skips_rows_from_other_days() {
        let roster = vec![student("a", "Avery")];
        let rows = vec![row("r1", "a", "2024-03-02", true)];
        let out = reconcile_day(&roster, &rows, day("2024-03-01"));
        assert_eq!(out.entries[0].status, DayStatus::Unmarked);
        assert!(out.duplicate_rows.is_empty());
        assert!(out.orphan_rows.is_empty());
    }

    #[test]
    fn reconcile_is_idempotent() {
        let roster = vec![student("a", "Avery"), student("b", "Blake")];
        let rows = vec![
            row("r1", "a", "2024-03-01", true),
            row("r2", "a", "2024-03-01", false),
            row("r3", "x", "2024-03-01", true),
        ];
        let once = reconcile_day(&roster, &rows, day("2024-03-01"));
        let twice = reconcile_day(&roster, &rows, day("2024-03-01"));
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_rows_yield_all_zero_summaries() {
        let roster = vec![student("a", "Avery"), student("b", "Blake")];
        let out = summarize_month(&roster, &[], 2024, 3).unwrap();
        assert_eq!(out.summaries.len(), 2);
        for s in &out.summaries {
            assert_eq!(s.present, 0);
            assert_eq!(s.absent, 0);
            assert_eq!(s.total, 0);
            assert_eq!(s.percentage, 0.0);
            assert!(s.percentage.is_finite());
        }
    }

    #[test]
    fn march_2024_scenario() {
        let roster = vec![student("a", "Avery"), student("b", "Blake")];
        let rows = vec![
            row("r1", "a", "2024-03-01", true),
            row("r2", "a", "2024-03-02", false),
            row("r3", "b", "2024-03-01", true),
        ];
        let out = summarize_month(&roster, &rows, 2024, 3).unwrap();

        let a = &out.summaries[0];
        assert_eq!(a.student_id, "a");
        assert_eq!((a.present, a.absent, a.total), (1, 1, 2));
        assert!((a.percentage - 50.0).abs() < 1e-9);
        assert_eq!(a.band(), Band::Critical);

        let b = &out.summaries[1];
        assert_eq!(b.student_id, "b");
        assert_eq!((b.present, b.absent, b.total), (1, 0, 1));
        assert!((b.percentage - 100.0).abs() < 1e-9);
        assert_eq!(b.band(), Band::Excellent);
    }

    #[test]
    fn summary_totals_conserve_row_count() {
        let roster = vec![student("a", "Avery"), student("b", "Blake")];
        let rows = vec![
            row("r1", "a", "2024-03-04", true),
            row("r2", "a", "2024-03-05", false),
            row("r3", "a", "2024-03-06", true),
            row("r4", "b", "2024-03-04", false),
            row("r5", "b", "2024-03-05", false),
        ];
        let out = summarize_month(&roster, &rows, 2024, 3).unwrap();
        let present: u32 = out.summaries.iter().map(|s| s.present).sum();
        let absent: u32 = out.summaries.iter().map(|s| s.absent).sum();
        let total: u32 = out.summaries.iter().map(|s| s.total).sum();
        assert_eq!(present + absent, rows.len() as u32);
        assert_eq!(total, rows.len() as u32);
        for s in &out.summaries {
            assert!(s.percentage >= 0.0 && s.percentage <= 100.0);
        }
    }

    #[test]
    fn summary_ignores_rows_outside_month() {
        let roster = vec![student("a", "Avery")];
        let rows = vec![
            row("r1", "a", "2024-02-29", true),
            row("r2", "a", "2024-03-01", true),
            row("r3", "a", "2024-04-01", false),
        ];
        let out = summarize_month(&roster, &rows, 2024, 3).unwrap();
        assert_eq!(out.summaries[0].total, 1);
        assert_eq!(out.summaries[0].present, 1);
    }

    #[test]
    fn summary_counts_rows_with_time_suffixes() {
        let roster = vec![student("a", "Avery")];
        let rows = vec![row("r1", "a", "2024-03-15T09:00:00+02:00", true)];
        let out = summarize_month(&roster, &rows, 2024, 3).unwrap();
        assert_eq!(out.summaries[0].present, 1);
        assert_eq!(out.summaries[0].total, 1);
    }

    #[test]
    fn orphan_rows_are_reported_not_counted() {
        let roster = vec![student("a", "Avery")];
        let rows = vec![
            row("r1", "a", "2024-03-01", true),
            row("r2", "ghost", "2024-03-01", false),
        ];
        let out = summarize_month(&roster, &rows, 2024, 3).unwrap();
        assert_eq!(out.summaries.len(), 1);
        assert_eq!(out.summaries[0].total, 1);
        assert_eq!(out.orphan_rows, vec!["r2".to_string()]);
    }

    #[test]
    fn summarize_is_idempotent() {
        let roster = vec![student("a", "Avery"), student("b", "Blake")];
        let rows = vec![
            row("r1", "a", "2024-03-01", true),
            row("r2", "ghost", "2024-03-02", false),
            row("r3", "b", "bad-date", true),
        ];
        let once = summarize_month(&roster, &rows, 2024, 3).unwrap();
        let twice = summarize_month(&roster, &rows, 2024, 3).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn summarize_rejects_invalid_month() {
        let roster = vec![student("a", "Avery")];
        assert!(summarize_month(&roster, &[], 2024, 0).is_none());
        assert!(summarize_month(&roster, &[], 2024, 13).is_none());
    }

    #[test]
    fn classify_band_boundaries() {
        assert_eq!(classify_percentage(90.0), Band::Excellent);
        assert_eq!(classify_percentage(89.999), Band::Good);
        assert_eq!(classify_percentage(75.0), Band::Good);
        assert_eq!(classify_percentage(74.9), Band::Warning);
        assert_eq!(classify_percentage(60.0), Band::Warning);
        assert_eq!(classify_percentage(59.9), Band::Critical);
        assert_eq!(classify_percentage(0.0), Band::Critical);
        assert_eq!(classify_percentage(100.0), Band::Excellent);
    }

    #[test]
    fn classify_is_total_outside_expected_range() {
        assert_eq!(classify_percentage(120.0), Band::Excellent);
        assert_eq!(classify_percentage(-5.0), Band::Critical);
        assert_eq!(classify_percentage(f64::NAN), Band::Critical);
    }
}
