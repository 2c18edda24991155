//! Attendance bookkeeping library.
//! A fixed weekly timetable, a semester window and a per-date absence ledger go in;
//! per-subject and overall attendance figures come out. Nothing derived is cached:
//! every figure is recomputed from the persisted state on demand.

pub mod core {
    use crate::calendar::SemesterWindow;
    use crate::ledger::AbsenceLedger;
    use crate::timetable::Timetable;
    use chrono::NaiveDate;
    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize};
    use serde_with::{DefaultOnNull, serde_as};

    pub const DEFAULT_HOLIDAY_NAME: &str = "Holiday";
    pub const DEFAULT_SKIP_REASON: &str = "Skipped";

    /* ------------------------------ Aggregate ------------------------------ */

    /// Aggregate root: the single persisted document.
    ///
    /// Optional fields default centrally here (`serde(default)` / `DefaultOnNull`), so
    /// older or hand-edited files with missing keys or `null` lists still load.
    #[serde_as]
    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct AppState {
        /// Batch picked during setup; `None` until setup completes.
        #[serde(default)]
        pub batch: Option<String>,

        #[serde(default)]
        pub semester_start: Option<NaiveDate>,
        #[serde(default)]
        pub semester_end: Option<NaiveDate>,

        /// Single-date holidays. Legacy `{start,end}` ranges are expanded on load.
        #[serde(default, deserialize_with = "legacy::holidays")]
        pub holidays: Vec<Holiday>,

        /// Full-day absence shortcuts, kept in step with the per-subject ledgers.
        #[serde(default, deserialize_with = "legacy::skipped_days")]
        pub skipped_days: Vec<SkippedDay>,

        #[serde_as(as = "DefaultOnNull")]
        #[serde(default)]
        pub subjects: Vec<Subject>,

        /// Imported timetable; the built-in one applies when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub custom_timetable: Option<Timetable>,
    }

    impl AppState {
        /// The configured semester window, if both bounds are set and ordered.
        pub fn semester(&self) -> Option<SemesterWindow> {
            match (self.semester_start, self.semester_end) {
                (Some(start), Some(end)) => SemesterWindow::new(start, end).ok(),
                _ => None,
            }
        }

        pub fn batch_or_empty(&self) -> &str {
            self.batch.as_deref().unwrap_or("")
        }

        pub fn subject(&self, name: &str) -> Option<&Subject> {
            self.subjects.iter().find(|s| s.name == name)
        }

        pub fn subject_mut(&mut self, name: &str) -> Option<&mut Subject> {
            self.subjects.iter_mut().find(|s| s.name == name)
        }

        pub fn is_holiday(&self, date: NaiveDate) -> bool {
            crate::calendar::is_holiday(date, &self.holidays)
        }

        pub fn skipped_day(&self, date: NaiveDate) -> Option<&SkippedDay> {
            self.skipped_days.iter().find(|s| s.date == date)
        }

        pub fn is_skipped(&self, date: NaiveDate) -> bool {
            self.skipped_day(date).is_some()
        }
    }

    /* ------------------------------ Entities ------------------------------ */

    /// One subject of the selected batch. `name` is unique within the state.
    #[serde_as]
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Subject {
        pub name: String,

        /// Occurrences per week; informational only, never used for totals.
        #[serde_as(as = "DefaultOnNull")]
        #[serde(default)]
        pub weekly_count: u32,

        /// Fixed total; attended is still derived from the ledger.
        #[serde(default)]
        pub total_override: Option<u32>,

        /// Replaces both attended and total when present.
        #[serde(default)]
        pub attendance_override: Option<AttendanceOverride>,

        /// Multiset of absence dates; a date may repeat for multi-period subjects.
        #[serde_as(as = "DefaultOnNull")]
        #[serde(default)]
        pub absent_dates: AbsenceLedger,
    }

    impl Subject {
        pub fn new(name: impl Into<String>, weekly_count: u32) -> Self {
            Self {
                name: name.into(),
                weekly_count,
                total_override: None,
                attendance_override: None,
                absent_dates: AbsenceLedger::default(),
            }
        }
    }

    /// User-entered attended/total pair that supersedes computed figures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct AttendanceOverride {
        pub attended: u32,
        pub total: u32,
    }

    impl AttendanceOverride {
        pub fn new(attended: u32, total: u32) -> Result<Self, AttendanceError> {
            if attended > total {
                return Err(AttendanceError::InvalidOverride(format!(
                    "attended ({attended}) cannot exceed total ({total})"
                )));
            }
            Ok(Self { attended, total })
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Holiday {
        pub name: String,
        pub date: NaiveDate,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct SkippedDay {
        pub reason: String,
        pub date: NaiveDate,
        /// Occurrences appended per subject when the day was bulk-skipped. Empty for
        /// records created by per-subject edits or read from older files.
        #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
        pub added: IndexMap<String, u32>,
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ErrorKind {
        InvalidInput,
        OutOfRange,
        MissingData,
        Storage,
    }

    #[derive(Debug, thiserror::Error)]
    pub enum AttendanceError {
        #[error("invalid date {0:?}; expected YYYY-MM-DD")]
        InvalidDate(String),
        #[error("start date {start} is after end date {end}")]
        InvalidRange { start: NaiveDate, end: NaiveDate },
        #[error("invalid override: {0}")]
        InvalidOverride(String),
        #[error("invalid timetable (line {line}): {reason}")]
        InvalidTimetable { line: usize, reason: String },
        #[error("expected {expected} attendance flags for {date}, got {got}")]
        FlagCountMismatch {
            date: NaiveDate,
            expected: usize,
            got: usize,
        },

        #[error("cannot mark attendance for future date {0}")]
        FutureDate(NaiveDate),
        #[error("{date} is outside the semester ({start} to {end})")]
        OutsideSemester {
            date: NaiveDate,
            start: NaiveDate,
            end: NaiveDate,
        },
        #[error("{0} is a holiday")]
        HolidayConflict(NaiveDate),
        #[error("{0} is already marked as skipped")]
        AlreadySkipped(NaiveDate),
        #[error("{0} is not a skipped day")]
        NotSkipped(NaiveDate),
        #[error("{subject} has no unmarked class left on {date} ({scheduled} scheduled)")]
        OccurrencesExhausted {
            subject: String,
            date: NaiveDate,
            scheduled: u32,
        },

        #[error("no subjects found for batch {0:?}")]
        NoSubjectsForBatch(String),
        #[error("unknown subject {0:?}")]
        UnknownSubject(String),
        #[error("no classes scheduled on {0}")]
        NoClassesOnDay(NaiveDate),
        #[error("semester dates are not configured")]
        SemesterNotConfigured,
        #[error("no batch selected; run setup first")]
        BatchNotConfigured,
        #[error("invalid batch {0:?}")]
        InvalidBatch(String),

        #[error("storage failure: {0:#}")]
        Storage(anyhow::Error),
    }

    impl AttendanceError {
        pub fn kind(&self) -> ErrorKind {
            use AttendanceError::*;
            match self {
                InvalidDate(_)
                | InvalidRange { .. }
                | InvalidOverride(_)
                | InvalidTimetable { .. }
                | FlagCountMismatch { .. }
                | InvalidBatch(_) => ErrorKind::InvalidInput,
                FutureDate(_)
                | OutsideSemester { .. }
                | HolidayConflict(_)
                | AlreadySkipped(_)
                | NotSkipped(_)
                | OccurrencesExhausted { .. } => ErrorKind::OutOfRange,
                NoSubjectsForBatch(_)
                | UnknownSubject(_)
                | NoClassesOnDay(_)
                | SemesterNotConfigured
                | BatchNotConfigured => ErrorKind::MissingData,
                Storage(_) => ErrorKind::Storage,
            }
        }
    }

    /* ------------------------- Legacy record shapes ------------------------- */

    mod legacy {
        //! Holiday and skipped-day lists have been written as `{date}` and as
        //! `{start,end}`. Both are normalized to single-date records here.

        use super::{DEFAULT_HOLIDAY_NAME, DEFAULT_SKIP_REASON, Holiday, SkippedDay};
        use crate::calendar::days_inclusive;
        use chrono::NaiveDate;
        use indexmap::IndexMap;
        use serde::de::IgnoredAny;
        use serde::{Deserialize, Deserializer};

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum DatedRecord {
            Single {
                date: NaiveDate,
                #[serde(default)]
                name: Option<String>,
                #[serde(default)]
                reason: Option<String>,
                #[serde(default)]
                added: IndexMap<String, u32>,
            },
            Range {
                start: NaiveDate,
                #[serde(default)]
                end: Option<NaiveDate>,
                #[serde(default)]
                name: Option<String>,
                #[serde(default)]
                reason: Option<String>,
            },
            Unrecognized(IgnoredAny),
        }

        struct Normalized {
            dates: Vec<NaiveDate>,
            label: Option<String>,
            added: IndexMap<String, u32>,
        }

        fn normalize(record: DatedRecord, list: &str, label_of_name: bool) -> Option<Normalized> {
            match record {
                DatedRecord::Single {
                    date,
                    name,
                    reason,
                    added,
                } => Some(Normalized {
                    dates: vec![date],
                    label: if label_of_name { name } else { reason },
                    added,
                }),
                DatedRecord::Range {
                    start,
                    end,
                    name,
                    reason,
                } => {
                    let end = end.unwrap_or(start).max(start);
                    Some(Normalized {
                        dates: days_inclusive(start, end).collect(),
                        label: if label_of_name { name } else { reason },
                        added: IndexMap::new(),
                    })
                }
                DatedRecord::Unrecognized(_) => {
                    tracing::warn!(list, "ignoring unrecognized record");
                    None
                }
            }
        }

        pub(super) fn holidays<'de, D>(deserializer: D) -> Result<Vec<Holiday>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let records = Option::<Vec<DatedRecord>>::deserialize(deserializer)?.unwrap_or_default();
            let mut out: Vec<Holiday> = Vec::new();
            for record in records {
                let Some(n) = normalize(record, "holidays", true) else {
                    continue;
                };
                let name = n.label.unwrap_or_else(|| DEFAULT_HOLIDAY_NAME.to_string());
                for date in n.dates {
                    if out.iter().all(|h| h.date != date) {
                        out.push(Holiday {
                            name: name.clone(),
                            date,
                        });
                    }
                }
            }
            Ok(out)
        }

        pub(super) fn skipped_days<'de, D>(deserializer: D) -> Result<Vec<SkippedDay>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let records = Option::<Vec<DatedRecord>>::deserialize(deserializer)?.unwrap_or_default();
            let mut out: Vec<SkippedDay> = Vec::new();
            for record in records {
                let Some(n) = normalize(record, "skipped_days", false) else {
                    continue;
                };
                let reason = n.label.unwrap_or_else(|| DEFAULT_SKIP_REASON.to_string());
                for date in n.dates {
                    if out.iter().all(|s| s.date != date) {
                        out.push(SkippedDay {
                            reason: reason.clone(),
                            date,
                            added: n.added.clone(),
                        });
                    }
                }
            }
            Ok(out)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn d(s: &str) -> NaiveDate {
            NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
        }

        #[test]
        fn legacy_holiday_range_expands_to_single_dates() {
            let json = r#"{
                "batch": "B1/B3",
                "holidays": [
                    {"name": "Diwali", "start": "2024-11-01", "end": "2024-11-03"},
                    {"name": "Founders", "date": "2024-11-10"}
                ],
                "subjects": null
            }"#;
            let state: AppState = serde_json::from_str(json).unwrap();
            let dates: Vec<_> = state.holidays.iter().map(|h| h.date).collect();
            assert_eq!(
                dates,
                vec![d("2024-11-01"), d("2024-11-02"), d("2024-11-03"), d("2024-11-10")]
            );
            assert!(state.holidays.iter().take(3).all(|h| h.name == "Diwali"));
            assert!(state.subjects.is_empty());
        }

        #[test]
        fn writer_emits_only_single_date_form() {
            let mut state = AppState::default();
            state.holidays.push(Holiday {
                name: "Holi".into(),
                date: d("2024-03-25"),
            });
            let text = serde_json::to_string(&state).unwrap();
            assert!(text.contains(r#""date":"2024-03-25""#));
            assert!(!text.contains("\"start\""));
            assert!(!text.contains("custom_timetable"));
        }

        #[test]
        fn legacy_skipped_day_uses_start_and_defaults_reason() {
            let json = r#"{"skipped_days": [{"start": "2024-01-10"}, {"bogus": 1}]}"#;
            let state: AppState = serde_json::from_str(json).unwrap();
            assert_eq!(state.skipped_days.len(), 1);
            assert_eq!(state.skipped_days[0].date, d("2024-01-10"));
            assert_eq!(state.skipped_days[0].reason, DEFAULT_SKIP_REASON);
        }

        #[test]
        fn subject_fields_default_when_missing_or_null() {
            let json = r#"{"subjects": [{"name": "CN", "weekly_count": null, "absent_dates": null}]}"#;
            let state: AppState = serde_json::from_str(json).unwrap();
            let cn = state.subject("CN").unwrap();
            assert_eq!(cn.weekly_count, 0);
            assert!(cn.total_override.is_none());
            assert!(cn.attendance_override.is_none());
            assert!(cn.absent_dates.is_empty());
        }

        #[test]
        fn override_rejects_attended_above_total() {
            let err = AttendanceOverride::new(11, 10).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);
            assert!(AttendanceOverride::new(10, 10).is_ok());
        }
    }
}

pub mod timetable {
    //! Weekly timetable: weekday -> ordered time slots -> raw cell text.
    //!
    //! Cells are one of: empty, a break marker, a single subject shared by every batch,
    //! or a batch split such as `CN Lab (DT105) (B1&B3) / DAA Lab (DT111) (B2&B4)`.
    //! Slot order is insertion order and stands for chronological order.

    use crate::core::AttendanceError;
    use anyhow::Context;
    use chrono::Weekday;
    use indexmap::IndexMap;
    use nom::{
        IResult,
        bytes::complete::take_till1,
        character::complete::{char, multispace0, space0},
        combinator::{all_consuming, map, map_res},
        error::VerboseError,
        multi::many0,
        sequence::{delimited, preceded, terminated, tuple},
    };
    use serde::{Deserialize, Serialize};
    use std::{fs, io, path::Path};

    /// Days that can carry classes. Sunday is never scheduled.
    pub const TEACHING_DAYS: [Weekday; 6] = [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
    ];

    pub fn day_name(day: Weekday) -> &'static str {
        match day {
            Weekday::Mon => "MONDAY",
            Weekday::Tue => "TUESDAY",
            Weekday::Wed => "WEDNESDAY",
            Weekday::Thu => "THURSDAY",
            Weekday::Fri => "FRIDAY",
            Weekday::Sat => "SATURDAY",
            Weekday::Sun => "SUNDAY",
        }
    }

    /// Case-insensitive lookup of one of the six teaching day names.
    pub fn parse_day(name: &str) -> Option<Weekday> {
        let upper = name.trim().to_ascii_uppercase();
        TEACHING_DAYS
            .into_iter()
            .find(|day| day_name(*day) == upper)
    }

    pub type Slots = IndexMap<String, String>;

    /* ------------------------------ Timetable ------------------------------ */

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(from = "IndexMap<String, Slots>", into = "IndexMap<String, Slots>")]
    pub struct Timetable {
        /// Always holds the six teaching days, keyed by upper-case name, in week order.
        days: IndexMap<String, Slots>,
    }

    impl Default for Timetable {
        fn default() -> Self {
            Self::new()
        }
    }

    impl From<IndexMap<String, Slots>> for Timetable {
        fn from(raw: IndexMap<String, Slots>) -> Self {
            let mut table = Self::new();
            for (name, slots) in raw {
                match parse_day(&name) {
                    Some(day) => {
                        table.days.insert(day_name(day).to_string(), slots);
                    }
                    None => tracing::warn!(day = %name, "ignoring timetable day"),
                }
            }
            table
        }
    }

    impl From<Timetable> for IndexMap<String, Slots> {
        fn from(table: Timetable) -> Self {
            table.days
        }
    }

    impl Timetable {
        /// An empty timetable that still defines all six teaching days.
        pub fn new() -> Self {
            Self {
                days: TEACHING_DAYS
                    .into_iter()
                    .map(|day| (day_name(day).to_string(), Slots::new()))
                    .collect(),
            }
        }

        /// Timetable shipped with the tool, used until one is imported.
        pub fn builtin() -> Self {
            const B13: &str = "CN Lab (DT105) (B1&B3) / DAA Lab (DT111) (B2&B4)";
            const B24: &str = "CN Lab (DT105) (B2&B4) / DAA Lab (DT111) (B1&B3)";
            const SOFTWARE: &str = "Software Lab (DT105) (B1&B3) / Software Lab (DT111) (B2&B4)";
            const TIMES: [&str; 8] = [
                "09:00-10:00",
                "10:00-11:00",
                "11:00-12:00",
                "12:00-01:00",
                "01:00-02:00",
                "02:00-03:00",
                "03:00-04:00",
                "04:00-05:00",
            ];
            let week: [(Weekday, [&str; 8]); 6] = [
                (
                    Weekday::Mon,
                    ["", "DM (DT203)", "DAA (DT203)", "Lunch Break", "TOC (DT203)", "CN (DT203)", "", ""],
                ),
                (
                    Weekday::Tue,
                    ["", "CN (DT203)", "TOC (DT203)", "Lunch Break", "DAA (DT203)", "", "", ""],
                ),
                (
                    Weekday::Wed,
                    ["", "", "", "DM (DT203)", "Lunch Break", "DAA (DT203)", B13, B13],
                ),
                (
                    Weekday::Thu,
                    ["MDM", "", "DM (DT203)", "Lunch Break", "TOC (DT304)", B24, B24, ""],
                ),
                (
                    Weekday::Fri,
                    [
                        "MDM",
                        SOFTWARE,
                        SOFTWARE,
                        "Lunch Break",
                        "CN (DT212)",
                        "Technical Skill (DT109)",
                        "Technical Skill (DT109)",
                        "",
                    ],
                ),
                (
                    Weekday::Sat,
                    [
                        "MDM",
                        "",
                        "",
                        "HONORS (DT301)",
                        "HONORS (DT301)",
                        "HONORS (DT301)",
                        "HONORS (DT301)",
                        "",
                    ],
                ),
            ];

            let mut table = Self::new();
            for (day, cells) in week {
                for (time, cell) in TIMES.iter().zip(cells) {
                    table.set_slot(day, *time, cell);
                }
            }
            table
        }

        /// Insert or replace a slot. Sunday is ignored.
        pub fn set_slot(&mut self, day: Weekday, time: impl Into<String>, cell: impl Into<String>) {
            if let Some(slots) = self.days.get_mut(day_name(day)) {
                slots.insert(time.into(), cell.into());
            }
        }

        /// Slots of a teaching day in time order; `None` for Sunday.
        pub fn slots(&self, day: Weekday) -> Option<&Slots> {
            self.days.get(day_name(day))
        }

        /// Slots by free-form day name; `None` for anything but the six teaching days.
        pub fn slots_by_name(&self, name: &str) -> Option<&Slots> {
            parse_day(name).and_then(|day| self.slots(day))
        }

        /// Every time label in first-seen order across the week.
        pub fn time_labels(&self) -> Vec<&str> {
            let mut labels: Vec<&str> = Vec::new();
            for slots in self.days.values() {
                for time in slots.keys() {
                    if !labels.contains(&time.as_str()) {
                        labels.push(time);
                    }
                }
            }
            labels
        }

        pub fn cells(&self) -> impl Iterator<Item = &str> {
            self.days
                .values()
                .flat_map(|slots| slots.values().map(String::as_str))
        }

        pub fn slot_count(&self) -> usize {
            self.days.values().map(IndexMap::len).sum()
        }

        /* ------------------------------- CSV ------------------------------- */

        /// Read a `Day,Time,Subject` CSV. The result replaces a timetable wholesale.
        pub fn from_csv_reader<R: io::Read>(reader: R) -> Result<Self, AttendanceError> {
            let mut rdr = csv::ReaderBuilder::new()
                .trim(csv::Trim::All)
                .from_reader(reader);

            let headers = rdr.headers().map_err(|e| csv_error(1, e))?.clone();
            let header_ok = headers.len() == CSV_HEADER.len()
                && headers
                    .iter()
                    .zip(CSV_HEADER)
                    .all(|(found, expected)| found.eq_ignore_ascii_case(expected));
            if !header_ok {
                return Err(AttendanceError::InvalidTimetable {
                    line: 1,
                    reason: format!(
                        "expected header {}, found {}",
                        CSV_HEADER.join(","),
                        headers.iter().collect::<Vec<_>>().join(",")
                    ),
                });
            }

            let mut table = Self::new();
            let mut rows = 0usize;
            for (idx, record) in rdr.records().enumerate() {
                let line = idx + 2;
                let record = record.map_err(|e| csv_error(line, e))?;
                let row: CsvRow = record.deserialize(None).map_err(|e| csv_error(line, e))?;

                let Some(day) = parse_day(&row.day) else {
                    return Err(AttendanceError::InvalidTimetable {
                        line,
                        reason: format!("{:?} is not one of MONDAY..SATURDAY", row.day),
                    });
                };
                if row.time.is_empty() {
                    return Err(AttendanceError::InvalidTimetable {
                        line,
                        reason: "time label is empty".to_string(),
                    });
                }
                if table
                    .slots(day)
                    .is_some_and(|slots| slots.contains_key(&row.time))
                {
                    tracing::warn!(line, day = day_name(day), time = %row.time, "duplicate slot; later row wins");
                }
                table.set_slot(day, row.time, row.subject);
                rows += 1;
            }

            if rows == 0 {
                return Err(AttendanceError::InvalidTimetable {
                    line: 1,
                    reason: "no timetable rows".to_string(),
                });
            }
            Ok(table)
        }

        pub fn read_csv(path: &Path) -> Result<Self, AttendanceError> {
            let file = fs::File::open(path)
                .with_context(|| format!("opening timetable {:?}", path))
                .map_err(AttendanceError::Storage)?;
            Self::from_csv_reader(file)
        }

        pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<(), AttendanceError> {
            let mut wtr = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(writer);
            let write = |wtr: &mut csv::Writer<W>| -> Result<(), csv::Error> {
                wtr.write_record(CSV_HEADER)?;
                for day in TEACHING_DAYS {
                    for (time, cell) in self.slots(day).into_iter().flatten() {
                        wtr.serialize(CsvRow {
                            day: day_name(day).to_string(),
                            time: time.clone(),
                            subject: cell.clone(),
                        })?;
                    }
                }
                wtr.flush()?;
                Ok(())
            };
            write(&mut wtr)
                .context("writing timetable CSV")
                .map_err(AttendanceError::Storage)
        }

        pub fn write_csv_path(&self, path: &Path) -> Result<(), AttendanceError> {
            let file = fs::File::create(path)
                .with_context(|| format!("creating {:?}", path))
                .map_err(AttendanceError::Storage)?;
            self.write_csv(file)
        }
    }

    const CSV_HEADER: [&str; 3] = ["Day", "Time", "Subject"];

    #[derive(Debug, Serialize, Deserialize)]
    struct CsvRow {
        day: String,
        time: String,
        #[serde(default)]
        subject: String,
    }

    fn csv_error(line: usize, err: csv::Error) -> AttendanceError {
        AttendanceError::InvalidTimetable {
            line,
            reason: err.to_string(),
        }
    }

    /* -------------------------------- Cells -------------------------------- */

    /// Shape of a raw cell.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Cell<'a> {
        Empty,
        Break,
        /// One subject attended by every batch.
        Shared(&'a str),
        /// `/`-separated alternatives, at most one of which applies to a batch.
        Split(Vec<&'a str>),
    }

    impl<'a> Cell<'a> {
        pub fn classify(raw: &'a str) -> Self {
            let text = raw.trim();
            if text.is_empty() {
                Cell::Empty
            } else if is_break_marker(text) {
                Cell::Break
            } else if text.contains('/') && text.contains('(') {
                Cell::Split(text.split('/').collect())
            } else {
                Cell::Shared(text)
            }
        }
    }

    pub fn is_break_marker(text: &str) -> bool {
        let lower = text.trim().to_ascii_lowercase();
        lower.contains("lunch") || lower == "break" || lower.ends_with(" break")
    }

    /// One alternative of a split cell, e.g. `CN Lab (DT105) (B1&B3)`.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SlotPart<'a> {
        pub subject: &'a str,
        /// Parenthesized annotations in order (rooms, batch tags).
        pub annotations: Vec<&'a str>,
    }

    impl SlotPart<'_> {
        /// The trailing annotation names the batch.
        pub fn batch_tag(&self) -> Option<&str> {
            self.annotations.last().copied()
        }
    }

    /// Parse one `/`-separated alternative. Malformed text yields `None`.
    pub fn parse_part(input: &str) -> Option<SlotPart<'_>> {
        all_consuming(slot_part)(input).ok().map(|(_, part)| part)
    }

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    fn slot_part(i: &str) -> PResult<'_, SlotPart<'_>> {
        map_res(
            terminated(
                tuple((
                    preceded(multispace0, take_till1(|c: char| c == '(' || c == ')')),
                    many0(preceded(space0, annotation)),
                )),
                multispace0,
            ),
            |(subject, annotations): (&str, Vec<&str>)| {
                let subject = subject.trim();
                if subject.is_empty() {
                    Err("empty subject")
                } else {
                    Ok(SlotPart {
                        subject,
                        annotations,
                    })
                }
            },
        )(i)
    }

    fn annotation(i: &str) -> PResult<'_, &str> {
        map(
            delimited(
                char('('),
                take_till1(|c: char| c == '(' || c == ')'),
                char(')'),
            ),
            str::trim,
        )(i)
    }

}

pub mod schedule {
    //! Timetable + batch -> ordered subject occurrences.

    use crate::timetable::{Cell, Slots, TEACHING_DAYS, Timetable, parse_day, parse_part};
    use chrono::{Datelike, NaiveDate, Weekday};
    use indexmap::IndexMap;
    use std::collections::BTreeSet;

    /// Offered when the timetable carries no batch tags at all.
    pub const FALLBACK_BATCHES: [&str; 2] = ["B1/B3", "B2/B4"];

    /// Uppercase and drop `/`, `&`, `-` and whitespace, so `b1 / b3` matches `(B1&B3)`.
    pub fn normalize_batch(text: &str) -> String {
        text.chars()
            .filter(|c| !matches!(c, '/' | '&' | '-') && !c.is_whitespace())
            .flat_map(char::to_uppercase)
            .collect()
    }

    /// Text before the first `(`, trimmed. `None` when nothing is left.
    pub fn extract_subject_name(cell: &str) -> Option<&str> {
        let name = match cell.find('(') {
            Some(idx) => &cell[..idx],
            None => cell,
        }
        .trim();
        (!name.is_empty()).then_some(name)
    }

    /// Subject a batch attends in one cell, if any.
    pub fn resolve_cell<'a>(cell: &'a str, batch: &str) -> Option<&'a str> {
        match Cell::classify(cell) {
            Cell::Empty | Cell::Break => None,
            Cell::Shared(text) => extract_subject_name(text),
            Cell::Split(parts) => {
                let wanted = normalize_batch(batch);
                if wanted.is_empty() {
                    return None;
                }
                parts.into_iter().find_map(|raw| {
                    let part = parse_part(raw)?;
                    normalize_batch(raw)
                        .contains(&wanted)
                        .then_some(part.subject)
                })
            }
        }
    }

    pub fn occurrences_in_slots(slots: &Slots, batch: &str) -> Vec<String> {
        slots
            .values()
            .filter_map(|cell| resolve_cell(cell, batch))
            .map(str::to_string)
            .collect()
    }

    /// Occurrences on a weekday in slot order; duplicates are kept.
    pub fn occurrences_on(timetable: &Timetable, day: Weekday, batch: &str) -> Vec<String> {
        timetable
            .slots(day)
            .map(|slots| occurrences_in_slots(slots, batch))
            .unwrap_or_default()
    }

    pub fn occurrences_for_day(timetable: &Timetable, date: NaiveDate, batch: &str) -> Vec<String> {
        occurrences_on(timetable, date.weekday(), batch)
    }

    /// By day name; unknown names yield an empty list.
    pub fn occurrences_for_day_name(timetable: &Timetable, name: &str, batch: &str) -> Vec<String> {
        parse_day(name)
            .map(|day| occurrences_on(timetable, day, batch))
            .unwrap_or_default()
    }

    /// Occurrences per subject, in first-seen order.
    pub fn occurrence_counts<S: AsRef<str>>(occurrences: &[S]) -> IndexMap<String, u32> {
        let mut counts: IndexMap<String, u32> = IndexMap::new();
        for name in occurrences {
            *counts.entry(name.as_ref().to_string()).or_default() += 1;
        }
        counts
    }

    /// Weekly occurrence count of every subject the batch attends, Monday first.
    pub fn weekly_counts(timetable: &Timetable, batch: &str) -> IndexMap<String, u32> {
        let mut counts: IndexMap<String, u32> = IndexMap::new();
        for day in TEACHING_DAYS {
            for name in occurrences_on(timetable, day, batch) {
                *counts.entry(name).or_default() += 1;
            }
        }
        counts
    }

    /// Batch tags found in split cells (last parenthesized annotation of each part),
    /// sorted. Falls back to [`FALLBACK_BATCHES`] so setup always has a choice.
    pub fn discover_batches(timetable: &Timetable) -> Vec<String> {
        let mut found = BTreeSet::new();
        for cell in timetable.cells() {
            if let Cell::Split(parts) = Cell::classify(cell) {
                found.extend(
                    parts
                        .into_iter()
                        .filter_map(parse_part)
                        .filter_map(|part| part.batch_tag().map(str::to_string)),
                );
            }
        }
        if found.is_empty() {
            tracing::debug!("no batch tags in timetable; offering defaults");
            return FALLBACK_BATCHES.iter().map(|b| b.to_string()).collect();
        }
        found.into_iter().collect()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn monday_table(cells: &[&str]) -> Timetable {
            let mut table = Timetable::new();
            for (idx, cell) in cells.iter().enumerate() {
                table.set_slot(Weekday::Mon, format!("slot-{idx}"), *cell);
            }
            table
        }

        #[test]
        fn split_slot_picks_the_batch_alternative() {
            let table = monday_table(&["DAA Lab (B1&B3) / DBMS Lab (B2&B4)"]);
            let b13 = occurrences_on(&table, Weekday::Mon, "B1/B3");
            assert_eq!(b13, vec!["DAA Lab"]);
            let b24 = occurrences_on(&table, Weekday::Mon, "b2 & b4");
            assert_eq!(b24, vec!["DBMS Lab"]);
        }

        #[test]
        fn shared_cells_ignore_batch() {
            let table = monday_table(&["CN (DT203)", "Lunch Break", "", "TOC", "CN (DT203)"]);
            let expected = vec!["CN", "TOC", "CN"];
            for batch in ["B1/B3", "B2/B4", "Group A", ""] {
                assert_eq!(occurrences_on(&table, Weekday::Mon, batch), expected);
            }
        }

        #[test]
        fn unmatched_or_malformed_split_contributes_nothing() {
            let table = monday_table(&["DAA Lab (B1&B3) / DBMS Lab (B2&B4)", "X (B5 / Y (B6)"]);
            assert!(occurrences_on(&table, Weekday::Mon, "B7").is_empty());
            assert!(occurrences_on(&table, Weekday::Mon, "").is_empty());
        }

        #[test]
        fn first_matching_part_wins() {
            let table = monday_table(&["A (B1) / B (B1)"]);
            assert_eq!(occurrences_on(&table, Weekday::Mon, "B1"), vec!["A"]);
        }

        #[test]
        fn unknown_day_name_is_empty() {
            let table = Timetable::builtin();
            assert!(occurrences_for_day_name(&table, "Funday", "B1/B3").is_empty());
            assert!(occurrences_for_day_name(&table, "sunday", "B1/B3").is_empty());
            assert!(!occurrences_for_day_name(&table, "monday", "B1/B3").is_empty());
        }

        #[test]
        fn builtin_weekly_counts_for_batch() {
            let table = Timetable::builtin();
            let counts = weekly_counts(&table, "B1/B3");
            assert_eq!(counts.get("CN"), Some(&3));
            assert_eq!(counts.get("CN Lab"), Some(&2));
            assert_eq!(counts.get("DAA Lab"), Some(&2));
            assert_eq!(counts.get("HONORS"), Some(&4));
            assert_eq!(counts.get("Software Lab"), Some(&2));
        }

        #[test]
        fn batches_are_discovered_or_defaulted() {
            assert_eq!(discover_batches(&Timetable::builtin()), vec!["B1&B3", "B2&B4"]);
            assert_eq!(discover_batches(&Timetable::new()), vec!["B1/B3", "B2/B4"]);
        }

        #[test]
        fn occurrence_counts_keep_first_seen_order() {
            let counts = occurrence_counts(&["CN", "TOC", "CN"]);
            let pairs: Vec<_> = counts.into_iter().collect();
            assert_eq!(pairs, vec![("CN".to_string(), 2), ("TOC".to_string(), 1)]);
        }
    }
}

pub mod calendar {
    //! Date parsing, holiday membership and the semester window.

    use crate::core::{AttendanceError, Holiday};
    use chrono::{Datelike, NaiveDate};
    use serde::Serialize;

    pub const DATE_FORMAT: &str = "%Y-%m-%d";

    pub fn parse_date(text: &str) -> Result<NaiveDate, AttendanceError> {
        NaiveDate::parse_from_str(text.trim(), DATE_FORMAT)
            .map_err(|_| AttendanceError::InvalidDate(text.to_string()))
    }

    pub fn is_holiday(date: NaiveDate, holidays: &[Holiday]) -> bool {
        holidays.iter().any(|h| h.date == date)
    }

    pub fn is_future(date: NaiveDate, today: NaiveDate) -> bool {
        date > today
    }

    /// `start..=end`; empty when `end < start`.
    pub fn days_inclusive(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
        start.iter_days().take_while(move |day| *day <= end)
    }

    /// Every date of a calendar month.
    pub fn month_days(year: i32, month: u32) -> Result<Vec<NaiveDate>, AttendanceError> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| AttendanceError::InvalidDate(format!("{year:04}-{month:02}")))?;
        Ok(first
            .iter_days()
            .take_while(|day| day.month() == month)
            .collect())
    }

    /* --------------------------- Semester window --------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    pub struct SemesterWindow {
        pub start: NaiveDate,
        pub end: NaiveDate,
    }

    impl SemesterWindow {
        pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, AttendanceError> {
            if start > end {
                return Err(AttendanceError::InvalidRange { start, end });
            }
            Ok(Self { start, end })
        }

        pub fn contains(&self, date: NaiveDate) -> bool {
            self.start <= date && date <= self.end
        }

        pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
            days_inclusive(self.start, self.end)
        }

        pub fn progress(&self, today: NaiveDate) -> SemesterProgress {
            let total_days = (self.end - self.start).num_days();
            let elapsed_days = (today - self.start).num_days().clamp(0, total_days);
            let remaining_days = (self.end - today).num_days().max(0);
            let percent = if total_days > 0 {
                elapsed_days as f64 / total_days as f64 * 100.0
            } else {
                0.0
            };
            SemesterProgress {
                total_days,
                elapsed_days,
                remaining_days,
                percent,
            }
        }
    }

    /// Window membership; an unconfigured semester admits every date.
    pub fn in_semester(date: NaiveDate, window: Option<&SemesterWindow>) -> bool {
        window.is_none_or(|w| w.contains(date))
    }

    #[derive(Debug, Clone, Copy, PartialEq, Serialize)]
    pub struct SemesterProgress {
        pub total_days: i64,
        pub elapsed_days: i64,
        pub remaining_days: i64,
        pub percent: f64,
    }

}

pub mod accrual {
    //! Exact class counting: walk the calendar day by day against the weekly schedule.

    use crate::calendar::days_inclusive;
    use crate::core::Holiday;
    use crate::schedule::occurrences_on;
    use crate::timetable::Timetable;
    use chrono::{Datelike, NaiveDate, Weekday};
    use std::collections::HashSet;

    /// Occurrences of one subject per weekday, Monday at index 0.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WeeklySchedule([u32; 7]);

    impl WeeklySchedule {
        pub fn for_subject(timetable: &Timetable, subject: &str, batch: &str) -> Self {
            let mut counts = [0u32; 7];
            for (idx, day) in [
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
                Weekday::Sat,
                Weekday::Sun,
            ]
            .into_iter()
            .enumerate()
            {
                counts[idx] = occurrences_on(timetable, day, batch)
                    .iter()
                    .filter(|name| name.as_str() == subject)
                    .count() as u32;
            }
            Self(counts)
        }

        pub fn on(&self, day: Weekday) -> u32 {
            self.0[day.num_days_from_monday() as usize]
        }

        pub fn per_week(&self) -> u32 {
            self.0.iter().sum()
        }

        pub fn is_empty(&self) -> bool {
            self.per_week() == 0
        }
    }

    /// Classes of `schedule` in `start..=end`, skipping holidays. Zero when `end < start`.
    pub fn count_with_schedule(
        schedule: &WeeklySchedule,
        start: NaiveDate,
        end: NaiveDate,
        holidays: &[Holiday],
    ) -> u32 {
        if schedule.is_empty() {
            return 0;
        }
        let off: HashSet<NaiveDate> = holidays.iter().map(|h| h.date).collect();
        days_inclusive(start, end)
            .filter(|day| !off.contains(day))
            .map(|day| schedule.on(day.weekday()))
            .sum()
    }

    pub fn count_classes(
        timetable: &Timetable,
        subject: &str,
        batch: &str,
        start: NaiveDate,
        end: NaiveDate,
        holidays: &[Holiday],
    ) -> u32 {
        let schedule = WeeklySchedule::for_subject(timetable, subject, batch);
        let total = count_with_schedule(&schedule, start, end, holidays);
        tracing::debug!(subject, %start, %end, total, "counted classes");
        total
    }

}

pub mod ledger {
    //! Per-subject absence multisets and the day-level operations that keep the
    //! skipped-day records in step with them.

    use crate::calendar::{SemesterWindow, is_future};
    use crate::core::{AppState, AttendanceError, DEFAULT_HOLIDAY_NAME, Holiday, SkippedDay};
    use crate::schedule::{occurrence_counts, occurrences_for_day};
    use crate::timetable::Timetable;
    use chrono::NaiveDate;
    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;

    /* ---------------------------- AbsenceLedger ---------------------------- */

    /// Multiset of absence dates. A date repeats once per missed period.
    ///
    /// Persisted as a flat list of `YYYY-MM-DD` strings with repeats; entries that
    /// do not parse are dropped on load.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(from = "Vec<String>", into = "Vec<String>")]
    pub struct AbsenceLedger {
        counts: BTreeMap<NaiveDate, u32>,
    }

    impl From<Vec<String>> for AbsenceLedger {
        fn from(raw: Vec<String>) -> Self {
            let mut ledger = Self::default();
            for entry in raw {
                match crate::calendar::parse_date(&entry) {
                    Ok(date) => ledger.add(date),
                    Err(_) => tracing::warn!(entry = %entry, "dropping malformed absence date"),
                }
            }
            ledger
        }
    }

    impl From<AbsenceLedger> for Vec<String> {
        fn from(ledger: AbsenceLedger) -> Self {
            ledger.dates().map(|d| d.to_string()).collect()
        }
    }

    impl AbsenceLedger {
        pub fn add(&mut self, date: NaiveDate) {
            self.add_n(date, 1);
        }

        pub fn add_n(&mut self, date: NaiveDate, n: u32) {
            if n > 0 {
                *self.counts.entry(date).or_default() += n;
            }
        }

        /// Remove a single occurrence. Returns false when none was recorded.
        pub fn remove_one(&mut self, date: NaiveDate) -> bool {
            self.remove_up_to(date, 1) == 1
        }

        /// Remove at most `n` occurrences; returns how many were removed.
        pub fn remove_up_to(&mut self, date: NaiveDate, n: u32) -> u32 {
            let Some(count) = self.counts.get_mut(&date) else {
                return 0;
            };
            let removed = n.min(*count);
            *count -= removed;
            if *count == 0 {
                self.counts.remove(&date);
            }
            removed
        }

        pub fn remove_all(&mut self, date: NaiveDate) -> u32 {
            self.counts.remove(&date).unwrap_or(0)
        }

        pub fn count_of(&self, date: NaiveDate) -> u32 {
            self.counts.get(&date).copied().unwrap_or(0)
        }

        pub fn set_count(&mut self, date: NaiveDate, n: u32) {
            if n == 0 {
                self.counts.remove(&date);
            } else {
                self.counts.insert(date, n);
            }
        }

        /// Total occurrences, repeats included.
        pub fn len(&self) -> usize {
            self.counts.values().map(|n| *n as usize).sum()
        }

        pub fn is_empty(&self) -> bool {
            self.counts.is_empty()
        }

        /// Distinct dates with their counts, ascending.
        pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, u32)> + '_ {
            self.counts.iter().map(|(d, n)| (*d, *n))
        }

        /// Every occurrence, ascending, repeats included.
        pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
            self.iter()
                .flat_map(|(d, n)| std::iter::repeat_n(d, n as usize))
        }

        pub fn clear(&mut self) {
            self.counts.clear();
        }
    }

    /* ------------------------------- DayBook ------------------------------- */

    /// Result of a whole-day absence toggle.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum DayToggle {
        /// Every scheduled class was marked absent; holds what was appended.
        Skipped { added: IndexMap<String, u32> },
        /// The day was fully absent and has been cleared; holds what was removed.
        Restored { removed: IndexMap<String, u32> },
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum HolidayToggle {
        Added,
        Removed,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "snake_case")]
    pub enum DayStatus {
        /// Outside the semester or nothing scheduled.
        NoClass,
        Holiday,
        Future,
        Present,
        PartiallyAbsent,
        FullyAbsent,
    }

    impl DayStatus {
        pub fn symbol(&self) -> char {
            match self {
                DayStatus::NoClass => '.',
                DayStatus::Holiday => 'H',
                DayStatus::Future => ' ',
                DayStatus::Present => 'P',
                DayStatus::PartiallyAbsent => 'a',
                DayStatus::FullyAbsent => 'A',
            }
        }
    }

    /// One scheduled class on a date, for the per-day attendance sheet.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct SheetEntry {
        pub subject: String,
        /// 1-based position among this subject's classes that day.
        pub occurrence: u32,
        pub label: String,
        pub absent: bool,
    }

    /// Read-only queries about single dates.
    #[derive(Clone, Copy)]
    pub struct DayView<'a> {
        state: &'a AppState,
        timetable: &'a Timetable,
        today: NaiveDate,
    }

    impl<'a> DayView<'a> {
        pub fn new(state: &'a AppState, timetable: &'a Timetable, today: NaiveDate) -> Self {
            Self {
                state,
                timetable,
                today,
            }
        }

        /// Classes per subject scheduled on `date` for the configured batch.
        pub fn required(&self, date: NaiveDate) -> IndexMap<String, u32> {
            occurrence_counts(&occurrences_for_day(
                self.timetable,
                date,
                self.state.batch_or_empty(),
            ))
        }

        fn ensure_in_semester(&self, date: NaiveDate) -> Result<(), AttendanceError> {
            match self.state.semester() {
                Some(SemesterWindow { start, end }) if !(start <= date && date <= end) => {
                    Err(AttendanceError::OutsideSemester { date, start, end })
                }
                _ => Ok(()),
            }
        }

        /// True when every scheduled class on `date` is recorded absent. A day with no
        /// classes is never fully absent.
        pub fn is_fully_absent(&self, date: NaiveDate) -> bool {
            self.is_fully_absent_with(date, &self.required(date))
        }

        fn is_fully_absent_with(&self, date: NaiveDate, required: &IndexMap<String, u32>) -> bool {
            !required.is_empty()
                && required.iter().all(|(name, need)| {
                    self.state
                        .subject(name)
                        .is_some_and(|s| s.absent_dates.count_of(date) >= *need)
                })
        }

        /// Classes scheduled on `date` in slot order with their absent flags. The
        /// first `k` classes of a subject show absent when `k` are recorded.
        pub fn day_sheet(&self, date: NaiveDate) -> Vec<SheetEntry> {
            let occurrences = occurrences_for_day(self.timetable, date, self.state.batch_or_empty());
            let totals = occurrence_counts(&occurrences);
            let mut seen: IndexMap<&str, u32> = IndexMap::new();
            occurrences
                .iter()
                .map(|name| {
                    let nth = seen.entry(name.as_str()).or_default();
                    *nth += 1;
                    let absent_count = self
                        .state
                        .subject(name)
                        .map(|s| s.absent_dates.count_of(date))
                        .unwrap_or(0);
                    let label = if totals.get(name).copied().unwrap_or(0) > 1 {
                        format!("{name} (Class #{nth})")
                    } else {
                        name.clone()
                    };
                    SheetEntry {
                        subject: name.clone(),
                        occurrence: *nth,
                        label,
                        absent: *nth <= absent_count,
                    }
                })
                .collect()
        }

        pub fn day_status(&self, date: NaiveDate) -> DayStatus {
            if self.ensure_in_semester(date).is_err() {
                return DayStatus::NoClass;
            }
            if self.state.is_holiday(date) {
                return DayStatus::Holiday;
            }
            let required = self.required(date);
            if required.is_empty() {
                return DayStatus::NoClass;
            }
            if is_future(date, self.today) {
                return DayStatus::Future;
            }
            if self.is_fully_absent_with(date, &required) {
                return DayStatus::FullyAbsent;
            }
            let any_absent = required.keys().any(|name| {
                self.state
                    .subject(name)
                    .is_some_and(|s| s.absent_dates.count_of(date) > 0)
            });
            if any_absent {
                DayStatus::PartiallyAbsent
            } else {
                DayStatus::Present
            }
        }
    }

    /// Date-scoped edits over the aggregate, against one timetable and one "today".
    pub struct DayBook<'a> {
        state: &'a mut AppState,
        timetable: &'a Timetable,
        today: NaiveDate,
    }

    impl<'a> DayBook<'a> {
        pub fn new(state: &'a mut AppState, timetable: &'a Timetable, today: NaiveDate) -> Self {
            Self {
                state,
                timetable,
                today,
            }
        }

        pub fn view(&self) -> DayView<'_> {
            DayView::new(&*self.state, self.timetable, self.today)
        }

        pub fn required(&self, date: NaiveDate) -> IndexMap<String, u32> {
            self.view().required(date)
        }

        pub fn is_fully_absent(&self, date: NaiveDate) -> bool {
            self.view().is_fully_absent(date)
        }

        fn ensure_markable(&self, date: NaiveDate) -> Result<(), AttendanceError> {
            if is_future(date, self.today) {
                return Err(AttendanceError::FutureDate(date));
            }
            self.view().ensure_in_semester(date)
        }

        /// Record one more missed class of `subject` on `date`; returns the new count.
        pub fn mark_absent(&mut self, subject: &str, date: NaiveDate) -> Result<u32, AttendanceError> {
            self.ensure_markable(date)?;
            if self.state.is_holiday(date) {
                return Err(AttendanceError::HolidayConflict(date));
            }
            let scheduled = self.required(date).get(subject).copied().unwrap_or(0);
            let Some(entry) = self.state.subject_mut(subject) else {
                return Err(AttendanceError::UnknownSubject(subject.to_string()));
            };
            let current = entry.absent_dates.count_of(date);
            if current >= scheduled {
                return Err(AttendanceError::OccurrencesExhausted {
                    subject: subject.to_string(),
                    date,
                    scheduled,
                });
            }
            entry.absent_dates.add(date);
            self.sync_skipped_day(date);
            tracing::info!(subject, %date, count = current + 1, "marked absent");
            Ok(current + 1)
        }

        /// Remove one recorded absence; returns false if there was none.
        pub fn mark_present(&mut self, subject: &str, date: NaiveDate) -> Result<bool, AttendanceError> {
            self.ensure_markable(date)?;
            let Some(entry) = self.state.subject_mut(subject) else {
                return Err(AttendanceError::UnknownSubject(subject.to_string()));
            };
            let removed = entry.absent_dates.remove_one(date);
            self.sync_skipped_day(date);
            if removed {
                tracing::info!(subject, %date, "marked present");
            }
            Ok(removed)
        }

        /// Bulk action for a whole day: mark every class absent, or undo a full absence.
        pub fn toggle_day_absence(&mut self, date: NaiveDate) -> Result<DayToggle, AttendanceError> {
            self.ensure_markable(date)?;
            if self.state.is_holiday(date) {
                return Err(AttendanceError::HolidayConflict(date));
            }
            let required = self.required(date);
            if required.is_empty() {
                return Err(AttendanceError::NoClassesOnDay(date));
            }

            if self.view().is_fully_absent_with(date, &required) {
                let removed = self.restore_day(date, &required, true);
                tracing::info!(%date, "cleared full-day absence");
                return Ok(DayToggle::Restored { removed });
            }
            if self.state.is_skipped(date) {
                return Err(AttendanceError::AlreadySkipped(date));
            }

            if let Some(name) = required.keys().find(|name| self.state.subject(name).is_none()) {
                return Err(AttendanceError::UnknownSubject(name.clone()));
            }

            let mut added = IndexMap::new();
            for (name, need) in &required {
                let Some(subject) = self.state.subject_mut(name) else {
                    continue;
                };
                let have = subject.absent_dates.count_of(date);
                if have < *need {
                    subject.absent_dates.add_n(date, need - have);
                    added.insert(name.clone(), need - have);
                }
            }
            self.state.skipped_days.push(SkippedDay {
                reason: format!("Skipped: {}", date.format("%d %b %Y")),
                date,
                added: added.clone(),
            });
            tracing::info!(%date, subjects = added.len(), "marked whole day absent");
            Ok(DayToggle::Skipped { added })
        }

        /// Delete a skipped-day record and take back the absences it stands for.
        pub fn remove_skipped_day(&mut self, date: NaiveDate) -> Result<IndexMap<String, u32>, AttendanceError> {
            if !self.state.is_skipped(date) {
                return Err(AttendanceError::NotSkipped(date));
            }
            let required = self.required(date);
            let removed = self.restore_day(date, &required, false);
            tracing::info!(%date, "removed skipped day");
            Ok(removed)
        }

        /// Undo a full-day absence. A record made by a bulk skip undoes exactly what it
        /// appended; otherwise the scheduled count is removed (or every copy, when
        /// `clear_all` is set).
        fn restore_day(
            &mut self,
            date: NaiveDate,
            required: &IndexMap<String, u32>,
            clear_all: bool,
        ) -> IndexMap<String, u32> {
            let pos = self.state.skipped_days.iter().position(|s| s.date == date);
            let record = pos.map(|idx| self.state.skipped_days.remove(idx));

            let plan: IndexMap<String, Option<u32>> = match record {
                Some(record) if !record.added.is_empty() => record
                    .added
                    .into_iter()
                    .map(|(name, n)| (name, Some(n)))
                    .collect(),
                _ if clear_all => required.keys().map(|name| (name.clone(), None)).collect(),
                _ => required
                    .iter()
                    .map(|(name, n)| (name.clone(), Some(*n)))
                    .collect(),
            };

            let mut removed = IndexMap::new();
            for (name, limit) in plan {
                let Some(subject) = self.state.subject_mut(&name) else {
                    continue;
                };
                let n = match limit {
                    Some(limit) => subject.absent_dates.remove_up_to(date, limit),
                    None => subject.absent_dates.remove_all(date),
                };
                if n > 0 {
                    removed.insert(name, n);
                }
            }
            self.sync_skipped_day(date);
            removed
        }

        /// Add the holiday if absent, remove it otherwise. Absences and any skipped-day
        /// record on the date are kept; they stop counting while the holiday stands.
        pub fn toggle_holiday(
            &mut self,
            date: NaiveDate,
            name: Option<&str>,
        ) -> Result<HolidayToggle, AttendanceError> {
            if let Some(idx) = self.state.holidays.iter().position(|h| h.date == date) {
                let holiday = self.state.holidays.remove(idx);
                self.sync_skipped_day(date);
                tracing::info!(%date, name = %holiday.name, "removed holiday");
                return Ok(HolidayToggle::Removed);
            }
            self.view().ensure_in_semester(date)?;
            let name = name
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .unwrap_or(DEFAULT_HOLIDAY_NAME);
            self.state.holidays.push(Holiday {
                name: name.to_string(),
                date,
            });
            self.state.holidays.sort_by_key(|h| h.date);
            tracing::info!(%date, name, "added holiday");
            Ok(HolidayToggle::Added)
        }


        /// Apply the full checkbox panel for a date: one `present` flag per class in
        /// [`DayView::day_sheet`] order.
        pub fn save_day(&mut self, date: NaiveDate, present: &[bool]) -> Result<(), AttendanceError> {
            self.ensure_markable(date)?;
            if self.state.is_holiday(date) {
                return Err(AttendanceError::HolidayConflict(date));
            }
            let occurrences = occurrences_for_day(self.timetable, date, self.state.batch_or_empty());
            if occurrences.is_empty() {
                return Err(AttendanceError::NoClassesOnDay(date));
            }
            if occurrences.len() != present.len() {
                return Err(AttendanceError::FlagCountMismatch {
                    date,
                    expected: occurrences.len(),
                    got: present.len(),
                });
            }

            let mut absent: IndexMap<&str, u32> = IndexMap::new();
            for (name, is_present) in occurrences.iter().zip(present) {
                *absent.entry(name.as_str()).or_default() += u32::from(!*is_present);
            }
            for (name, count) in absent {
                match self.state.subject_mut(name) {
                    Some(subject) => subject.absent_dates.set_count(date, count),
                    None => tracing::debug!(subject = name, %date, "scheduled subject not tracked"),
                }
            }
            self.sync_skipped_day(date);
            tracing::info!(%date, "saved day attendance");
            Ok(())
        }

        /// Re-check every skipped-day record, e.g. after the schedule changed.
        pub fn resync_skipped_days(&mut self) {
            let dates: Vec<NaiveDate> = self.state.skipped_days.iter().map(|s| s.date).collect();
            for date in dates {
                self.sync_skipped_day(date);
            }
        }

        /// Keep a skipped-day record exactly when the day is fully absent. An existing
        /// record is left as is, and holiday dates are not touched.
        fn sync_skipped_day(&mut self, date: NaiveDate) {
            if self.state.is_holiday(date) {
                return;
            }
            let keep = self.is_fully_absent(date);
            let exists = self.state.is_skipped(date);
            if keep && !exists {
                self.state.skipped_days.push(SkippedDay {
                    reason: format!("All absent: {}", date.format("%d %b %Y")),
                    date,
                    added: IndexMap::new(),
                });
                tracing::debug!(%date, "recorded skipped day");
            } else if !keep && exists {
                self.state.skipped_days.retain(|s| s.date != date);
                tracing::debug!(%date, "dropped skipped day");
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::calendar::parse_date;
        use crate::core::Subject;
        use chrono::Weekday;

        fn d(s: &str) -> NaiveDate {
            parse_date(s).unwrap()
        }

        const WED: &str = "2024-01-10";
        const TODAY: &str = "2024-02-01";

        fn fixture() -> (AppState, Timetable) {
            let mut table = Timetable::new();
            table.set_slot(Weekday::Mon, "09:00", "DAA Lab (B1&B3) / DBMS Lab (B2&B4)");
            table.set_slot(Weekday::Wed, "09:00", "CN (DT203)");
            table.set_slot(Weekday::Wed, "10:00", "TOC");
            table.set_slot(Weekday::Wed, "11:00", "Lunch Break");
            table.set_slot(Weekday::Wed, "12:00", "CN (DT203)");
            let state = AppState {
                batch: Some("B1/B3".into()),
                semester_start: Some(d("2024-01-01")),
                semester_end: Some(d("2024-05-31")),
                subjects: vec![
                    Subject::new("DAA Lab", 1),
                    Subject::new("CN", 2),
                    Subject::new("TOC", 1),
                ],
                ..AppState::default()
            };
            (state, table)
        }

        fn count(state: &AppState, subject: &str, date: &str) -> u32 {
            state.subject(subject).unwrap().absent_dates.count_of(d(date))
        }

        #[test]
        fn ledger_is_a_multiset_and_serializes_flat() {
            let mut ledger = AbsenceLedger::default();
            ledger.add(d("2024-01-10"));
            ledger.add(d("2024-01-03"));
            ledger.add(d("2024-01-10"));
            assert_eq!(ledger.count_of(d("2024-01-10")), 2);
            assert_eq!(ledger.len(), 3);
            let json = serde_json::to_string(&ledger).unwrap();
            assert_eq!(json, r#"["2024-01-03","2024-01-10","2024-01-10"]"#);

            assert!(ledger.remove_one(d("2024-01-10")));
            assert_eq!(ledger.remove_up_to(d("2024-01-10"), 5), 1);
            assert!(!ledger.remove_one(d("2024-01-10")));
            assert_eq!(ledger.len(), 1);
        }

        #[test]
        fn ledger_load_drops_malformed_entries() {
            let ledger: AbsenceLedger =
                serde_json::from_str(r#"["2024-01-10","yesterday","2024-01-10"]"#).unwrap();
            assert_eq!(ledger.count_of(d("2024-01-10")), 2);
            assert_eq!(ledger.len(), 2);
        }

        #[test]
        fn toggle_appends_one_copy_per_scheduled_class() {
            let (mut state, table) = fixture();
            let mut book = DayBook::new(&mut state, &table, d(TODAY));
            let outcome = book.toggle_day_absence(d(WED)).unwrap();
            assert!(matches!(outcome, DayToggle::Skipped { .. }));
            assert_eq!(count(&state, "CN", WED), 2);
            assert_eq!(count(&state, "TOC", WED), 1);
            assert_eq!(count(&state, "DAA Lab", WED), 0);
            assert!(state.is_skipped(d(WED)));
        }

        #[test]
        fn toggle_twice_returns_to_partial_state() {
            let (mut state, table) = fixture();
            let mut book = DayBook::new(&mut state, &table, d(TODAY));
            book.mark_absent("CN", d(WED)).unwrap();
            book.toggle_day_absence(d(WED)).unwrap();
            assert!(book.is_fully_absent(d(WED)));
            book.toggle_day_absence(d(WED)).unwrap();
            assert_eq!(count(&state, "CN", WED), 1);
            assert_eq!(count(&state, "TOC", WED), 0);
            assert!(!state.is_skipped(d(WED)));
        }

        #[test]
        fn toggle_clears_a_manually_completed_day() {
            let (mut state, table) = fixture();
            let mut book = DayBook::new(&mut state, &table, d(TODAY));
            book.mark_absent("CN", d(WED)).unwrap();
            book.mark_absent("CN", d(WED)).unwrap();
            book.mark_absent("TOC", d(WED)).unwrap();
            assert!(state.is_skipped(d(WED)));
            let mut book = DayBook::new(&mut state, &table, d(TODAY));
            assert!(matches!(
                book.toggle_day_absence(d(WED)).unwrap(),
                DayToggle::Restored { .. }
            ));
            assert_eq!(count(&state, "CN", WED), 0);
            assert!(!state.is_skipped(d(WED)));
        }

        #[test]
        fn remove_skipped_day_restores_exact_counts() {
            let (mut state, table) = fixture();
            let mut book = DayBook::new(&mut state, &table, d(TODAY));
            book.mark_absent("CN", d(WED)).unwrap();
            let before = book.state.subjects.clone();
            book.toggle_day_absence(d(WED)).unwrap();
            let removed = book.remove_skipped_day(d(WED)).unwrap();
            assert_eq!(removed.get("CN"), Some(&1));
            assert_eq!(removed.get("TOC"), Some(&1));
            assert_eq!(state.subjects, before);
            assert!(state.skipped_days.is_empty());
        }

        #[test]
        fn remove_skipped_day_requires_record() {
            let (mut state, table) = fixture();
            let mut book = DayBook::new(&mut state, &table, d(TODAY));
            assert!(matches!(
                book.remove_skipped_day(d(WED)),
                Err(AttendanceError::NotSkipped(_))
            ));
        }

        #[test]
        fn holiday_rejects_toggle_whatever_the_prior_state() {
            let (mut state, table) = fixture();
            let mut book = DayBook::new(&mut state, &table, d(TODAY));
            book.toggle_day_absence(d(WED)).unwrap();
            book.toggle_holiday(d(WED), Some("Makar Sankranti")).unwrap();
            assert!(book.state.is_skipped(d(WED)));
            let snapshot = book.state.clone();
            assert!(matches!(
                book.toggle_day_absence(d(WED)),
                Err(AttendanceError::HolidayConflict(_))
            ));
            assert_eq!(*book.state, snapshot);
            // Absences survive under the holiday.
            assert_eq!(count(&state, "CN", WED), 2);
        }

        #[test]
        fn removing_holiday_resyncs_skipped_record() {
            let (mut state, table) = fixture();
            let mut book = DayBook::new(&mut state, &table, d(TODAY));
            book.toggle_day_absence(d(WED)).unwrap();
            book.toggle_holiday(d(WED), None).unwrap();
            assert_eq!(
                book.toggle_holiday(d(WED), None).unwrap(),
                HolidayToggle::Removed
            );
            assert!(state.is_skipped(d(WED)));
        }

        #[test]
        fn holiday_round_trip_keeps_the_skip_undo_record() {
            let (mut state, table) = fixture();
            let mut book = DayBook::new(&mut state, &table, d(TODAY));
            book.mark_absent("CN", d(WED)).unwrap();
            book.toggle_day_absence(d(WED)).unwrap();
            book.toggle_holiday(d(WED), None).unwrap();
            book.toggle_holiday(d(WED), None).unwrap();
            let removed = book.remove_skipped_day(d(WED)).unwrap();
            assert_eq!(removed.get("CN"), Some(&1));
            assert_eq!(removed.get("TOC"), Some(&1));
            assert_eq!(count(&state, "CN", WED), 1);
            assert_eq!(count(&state, "TOC", WED), 0);
            assert!(!state.is_skipped(d(WED)));
        }

        #[test]
        fn toggle_rejects_untracked_scheduled_subject() {
            let (mut state, table) = fixture();
            state.subjects.retain(|s| s.name != "TOC");
            let snapshot = state.clone();
            let mut book = DayBook::new(&mut state, &table, d(TODAY));
            assert!(matches!(
                book.toggle_day_absence(d(WED)),
                Err(AttendanceError::UnknownSubject(name)) if name == "TOC"
            ));
            assert_eq!(state, snapshot);
        }

        #[test]
        fn holiday_outside_semester_is_rejected_but_future_is_allowed() {
            let (mut state, table) = fixture();
            let mut book = DayBook::new(&mut state, &table, d(TODAY));
            assert!(matches!(
                book.toggle_holiday(d("2024-07-01"), None),
                Err(AttendanceError::OutsideSemester { .. })
            ));
            book.toggle_holiday(d("2024-03-25"), Some("Holi")).unwrap();
            assert_eq!(state.holidays[0].name, "Holi");
        }

        #[test]
        fn marks_reject_future_and_out_of_semester_dates() {
            let (mut state, table) = fixture();
            let mut book = DayBook::new(&mut state, &table, d(TODAY));
            assert!(matches!(
                book.mark_absent("CN", d("2024-02-07")),
                Err(AttendanceError::FutureDate(_))
            ));
            assert!(matches!(
                book.toggle_day_absence(d("2023-12-27")),
                Err(AttendanceError::OutsideSemester { .. })
            ));
            assert!(state.subjects.iter().all(|s| s.absent_dates.is_empty()));
        }

        #[test]
        fn mark_absent_stops_at_scheduled_count() {
            let (mut state, table) = fixture();
            let mut book = DayBook::new(&mut state, &table, d(TODAY));
            assert_eq!(book.mark_absent("TOC", d(WED)).unwrap(), 1);
            assert!(matches!(
                book.mark_absent("TOC", d(WED)),
                Err(AttendanceError::OccurrencesExhausted { scheduled: 1, .. })
            ));
            assert!(matches!(
                book.mark_absent("Physics", d(WED)),
                Err(AttendanceError::UnknownSubject(_))
            ));
        }

        #[test]
        fn mark_present_breaks_the_skipped_record() {
            let (mut state, table) = fixture();
            let mut book = DayBook::new(&mut state, &table, d(TODAY));
            book.toggle_day_absence(d(WED)).unwrap();
            assert!(book.mark_present("CN", d(WED)).unwrap());
            assert!(!book.state.is_skipped(d(WED)));
            assert_eq!(book.view().day_status(d(WED)), DayStatus::PartiallyAbsent);
            assert!(!book.mark_present("DAA Lab", d(WED)).unwrap());
        }

        #[test]
        fn no_classes_on_sunday() {
            let (mut state, table) = fixture();
            let mut book = DayBook::new(&mut state, &table, d(TODAY));
            assert!(!book.is_fully_absent(d("2024-01-07")));
            assert!(matches!(
                book.toggle_day_absence(d("2024-01-07")),
                Err(AttendanceError::NoClassesOnDay(_))
            ));
            assert_eq!(book.view().day_status(d("2024-01-07")), DayStatus::NoClass);
        }

        #[test]
        fn day_sheet_labels_repeat_classes() {
            let (mut state, table) = fixture();
            let mut book = DayBook::new(&mut state, &table, d(TODAY));
            book.mark_absent("CN", d(WED)).unwrap();
            let sheet = book.view().day_sheet(d(WED));
            let labels: Vec<_> = sheet.iter().map(|e| e.label.as_str()).collect();
            assert_eq!(labels, vec!["CN (Class #1)", "TOC", "CN (Class #2)"]);
            let flags: Vec<_> = sheet.iter().map(|e| e.absent).collect();
            assert_eq!(flags, vec![true, false, false]);
        }

        #[test]
        fn save_day_sets_counts_and_syncs_record() {
            let (mut state, table) = fixture();
            let mut book = DayBook::new(&mut state, &table, d(TODAY));
            book.save_day(d(WED), &[false, false, false]).unwrap();
            assert!(book.state.is_skipped(d(WED)));
            assert_eq!(book.view().day_status(d(WED)), DayStatus::FullyAbsent);

            book.save_day(d(WED), &[true, true, false]).unwrap();
            assert!(!book.state.is_skipped(d(WED)));
            assert_eq!(count(&book.state, "CN", WED), 1);
            assert_eq!(count(&book.state, "TOC", WED), 0);

            assert!(matches!(
                book.save_day(d(WED), &[true]),
                Err(AttendanceError::FlagCountMismatch { expected: 3, got: 1, .. })
            ));
        }

        #[test]
        fn day_status_covers_every_state() {
            let (mut state, table) = fixture();
            let mut book = DayBook::new(&mut state, &table, d(TODAY));
            assert_eq!(book.view().day_status(d("2024-01-08")), DayStatus::Present);
            assert_eq!(book.view().day_status(d("2024-02-05")), DayStatus::Future);
            assert_eq!(book.view().day_status(d("2024-06-03")), DayStatus::NoClass);
            book.toggle_holiday(d("2024-02-05"), None).unwrap();
            assert_eq!(book.view().day_status(d("2024-02-05")), DayStatus::Holiday);
            book.toggle_day_absence(d("2024-01-08")).unwrap();
            assert_eq!(book.view().day_status(d("2024-01-08")), DayStatus::FullyAbsent);
        }
    }
}

pub mod calc {
    //! Percentages, safe-skip and standing bands.
    //!
    //! Rounding: both the skip allowance and the recovery count are exact integer
    //! answers to their inequality. `safe_skip` floors, `classes_needed` ceils, and
    //! a small epsilon keeps exact boundaries (80/100 at 75% -> 6) from slipping.

    use serde::Serialize;

    /// Per-subject safety line.
    pub const SUBJECT_THRESHOLD: f64 = 60.0;
    /// Aggregate safety line.
    pub const OVERALL_THRESHOLD: f64 = 75.0;
    pub const DEFAULT_SKIP_THRESHOLD: f64 = 75.0;
    pub const SUBJECT_EXCELLENT: f64 = 75.0;
    pub const OVERALL_EXCELLENT: f64 = 85.0;

    const EPSILON: f64 = 1e-9;

    pub fn percentage(attended: u32, total: u32) -> f64 {
        if total == 0 {
            0.0
        } else {
            100.0 * attended as f64 / total as f64
        }
    }

    fn effective_threshold(threshold: f64) -> f64 {
        if threshold.is_finite() && threshold > 0.0 && threshold <= 100.0 {
            threshold
        } else {
            DEFAULT_SKIP_THRESHOLD
        }
    }

    /// Largest `x` with `attended / (total + x) >= threshold%`.
    pub fn safe_skip(attended: u32, total: u32, threshold: f64) -> u32 {
        if total == 0 {
            return 0;
        }
        let p = effective_threshold(threshold) / 100.0;
        let x = (attended as f64 - p * total as f64) / p;
        (x + EPSILON).floor().max(0.0) as u32
    }

    /// Smallest `x` with `(attended + x) / (total + x) >= threshold%`. `None` when no
    /// number of classes can reach it (100% after any absence).
    pub fn classes_needed(attended: u32, total: u32, threshold: f64) -> Option<u32> {
        let p = effective_threshold(threshold) / 100.0;
        if total == 0 {
            return Some(1);
        }
        if percentage(attended, total) + EPSILON >= p * 100.0 {
            return Some(0);
        }
        if p >= 1.0 {
            return None;
        }
        let x = (p * total as f64 - attended as f64) / (1.0 - p);
        Some((x - EPSILON).ceil().max(0.0) as u32)
    }

    pub fn mean(percentages: impl IntoIterator<Item = f64>) -> f64 {
        let (sum, n) = percentages
            .into_iter()
            .fold((0.0, 0usize), |(sum, n), pct| (sum + pct, n + 1));
        if n == 0 { 0.0 } else { sum / n as f64 }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    #[serde(rename_all = "snake_case")]
    pub enum Standing {
        Excellent,
        Safe,
        AtRisk,
    }

    impl Standing {
        pub fn label(&self) -> &'static str {
            match self {
                Standing::Excellent => "Excellent",
                Standing::Safe => "Safe",
                Standing::AtRisk => "At Risk",
            }
        }

        fn banded(pct: f64, excellent: f64, safe: f64) -> Self {
            if pct + EPSILON >= excellent {
                Standing::Excellent
            } else if pct + EPSILON >= safe {
                Standing::Safe
            } else {
                Standing::AtRisk
            }
        }
    }

    pub fn subject_standing(pct: f64) -> Standing {
        Standing::banded(pct, SUBJECT_EXCELLENT, SUBJECT_THRESHOLD)
    }

    pub fn overall_standing(pct: f64) -> Standing {
        Standing::banded(pct, OVERALL_EXCELLENT, OVERALL_THRESHOLD)
    }

}

pub mod overrides {
    //! Effective attended/total per subject: full override, then total override,
    //! then the computed figures.

    use crate::accrual::count_classes;
    use crate::calc::percentage;
    use crate::calendar::SemesterWindow;
    use crate::core::{AppState, Holiday, Subject};
    use crate::timetable::Timetable;
    use chrono::NaiveDate;
    use serde::Serialize;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "snake_case")]
    pub enum TallySource {
        Computed,
        TotalOverride,
        AttendanceOverride,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    pub struct Tally {
        pub attended: u32,
        pub total: u32,
        /// Counted absences: inside the window, up to today, not on holidays.
        pub absences: u32,
        pub source: TallySource,
    }

    impl Tally {
        pub fn percentage(&self) -> f64 {
            percentage(self.attended, self.total)
        }
    }

    /// Everything a tally reads, borrowed from one consistent state.
    pub struct TallyContext<'a> {
        timetable: &'a Timetable,
        batch: &'a str,
        holidays: &'a [Holiday],
        window: Option<SemesterWindow>,
        today: NaiveDate,
    }

    impl<'a> TallyContext<'a> {
        pub fn new(state: &'a AppState, timetable: &'a Timetable, today: NaiveDate) -> Self {
            Self {
                timetable,
                batch: state.batch_or_empty(),
                holidays: &state.holidays,
                window: state.semester(),
                today,
            }
        }

        /// Last counted day: today, or the semester end if that came first.
        pub fn counting_end(&self) -> Option<NaiveDate> {
            self.window.map(|w| w.end.min(self.today))
        }

        pub fn counted_absences(&self, subject: &Subject) -> u32 {
            let (Some(window), Some(end)) = (self.window, self.counting_end()) else {
                return 0;
            };
            subject
                .absent_dates
                .iter()
                .filter(|(date, _)| *date >= window.start && *date <= end)
                .filter(|(date, _)| !crate::calendar::is_holiday(*date, self.holidays))
                .map(|(_, n)| n)
                .sum()
        }

        fn computed_total(&self, subject: &Subject) -> u32 {
            match (self.window, self.counting_end()) {
                (Some(window), Some(end)) => count_classes(
                    self.timetable,
                    &subject.name,
                    self.batch,
                    window.start,
                    end,
                    self.holidays,
                ),
                _ => 0,
            }
        }

        pub fn tally(&self, subject: &Subject) -> Tally {
            let absences = self.counted_absences(subject);
            if let Some(ov) = subject.attendance_override {
                return Tally {
                    attended: ov.attended,
                    total: ov.total,
                    absences,
                    source: TallySource::AttendanceOverride,
                };
            }
            let (total, source) = match subject.total_override {
                Some(total) => (total, TallySource::TotalOverride),
                None => (self.computed_total(subject), TallySource::Computed),
            };
            Tally {
                attended: total.saturating_sub(absences),
                total,
                absences,
                source,
            }
        }

        /// Classes from tomorrow to the semester end; 0 once it has ended.
        pub fn remaining_classes(&self, subject: &Subject) -> u32 {
            let Some(window) = self.window else {
                return 0;
            };
            if self.today >= window.end {
                return 0;
            }
            let from = self.today.succ_opt().unwrap_or(window.end).max(window.start);
            count_classes(
                self.timetable,
                &subject.name,
                self.batch,
                from,
                window.end,
                self.holidays,
            )
        }
    }

}

pub mod report {
    //! Summary rows and the plain-text report.

    use crate::calc::{
        DEFAULT_SKIP_THRESHOLD, OVERALL_THRESHOLD, SUBJECT_THRESHOLD, Standing, classes_needed, mean,
        overall_standing, safe_skip, subject_standing,
    };
    use crate::calendar::{SemesterProgress, SemesterWindow};
    use crate::core::AppState;
    use crate::overrides::{TallyContext, TallySource};
    use crate::timetable::Timetable;
    use chrono::NaiveDate;
    use serde::Serialize;

    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct SubjectRow {
        pub name: String,
        pub weekly_count: u32,
        pub attended: u32,
        pub total: u32,
        pub absences: u32,
        /// Classes left from tomorrow to the semester end.
        pub remaining: u32,
        pub percentage: f64,
        pub standing: Standing,
        pub safe_skip: u32,
        /// Classes to attend in a row to climb back to the subject threshold.
        #[serde(skip_serializing_if = "Option::is_none")]
        pub classes_needed: Option<u32>,
        pub source: TallySource,
    }

    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct OverallSummary {
        /// Mean of the subject percentages.
        pub percentage: f64,
        pub standing: Standing,
        pub excellent: usize,
        pub safe: usize,
        pub at_risk: usize,
        pub below_threshold: bool,
    }

    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct Summary {
        pub batch: Option<String>,
        pub today: NaiveDate,
        pub semester: Option<SemesterWindow>,
        pub progress: Option<SemesterProgress>,
        pub subjects: Vec<SubjectRow>,
        pub overall: OverallSummary,
    }

    pub fn build_summary(state: &AppState, timetable: &Timetable, today: NaiveDate) -> Summary {
        let ctx = TallyContext::new(state, timetable, today);
        let subjects: Vec<SubjectRow> = state
            .subjects
            .iter()
            .map(|subject| {
                let tally = ctx.tally(subject);
                let percentage = tally.percentage();
                let standing = subject_standing(percentage);
                SubjectRow {
                    name: subject.name.clone(),
                    weekly_count: subject.weekly_count,
                    attended: tally.attended,
                    total: tally.total,
                    absences: tally.absences,
                    remaining: ctx.remaining_classes(subject),
                    percentage,
                    standing,
                    safe_skip: safe_skip(tally.attended, tally.total, DEFAULT_SKIP_THRESHOLD),
                    classes_needed: match standing {
                        Standing::AtRisk => {
                            classes_needed(tally.attended, tally.total, SUBJECT_THRESHOLD)
                        }
                        _ => None,
                    },
                    source: tally.source,
                }
            })
            .collect();

        let percentage = mean(subjects.iter().map(|row| row.percentage));
        let count = |s: Standing| subjects.iter().filter(|row| row.standing == s).count();
        let overall = OverallSummary {
            percentage,
            standing: overall_standing(percentage),
            excellent: count(Standing::Excellent),
            safe: count(Standing::Safe),
            at_risk: count(Standing::AtRisk),
            below_threshold: !subjects.is_empty() && percentage < OVERALL_THRESHOLD,
        };
        tracing::debug!(subjects = subjects.len(), overall = percentage, "built summary");

        let semester = state.semester();
        Summary {
            batch: state.batch.clone(),
            today,
            semester,
            progress: semester.map(|w| w.progress(today)),
            subjects,
            overall,
        }
    }

    /// Plain-text table: subject, present, total, percentage, status.
    pub fn render_text(summary: &Summary) -> String {
        use std::fmt::Write;

        let width = summary
            .subjects
            .iter()
            .map(|row| row.name.chars().count())
            .max()
            .unwrap_or(0)
            .max("Subject".len());
        let rule = "-".repeat(width + 38);

        let mut s = String::new();
        let _ = writeln!(s, "Attendance Report");
        let _ = writeln!(s, "Batch: {}", summary.batch.as_deref().unwrap_or("-"));
        match summary.semester {
            Some(w) => {
                let _ = writeln!(s, "Semester: {} to {}", w.start, w.end);
            }
            None => {
                let _ = writeln!(s, "Semester: not configured");
            }
        }
        let _ = writeln!(s, "Generated: {}", summary.today);
        let _ = writeln!(s);
        let _ = writeln!(
            s,
            "{:<width$}  {:>7}  {:>5}  {:>8}  {}",
            "Subject", "Present", "Total", "Percent", "Status"
        );
        let _ = writeln!(s, "{rule}");
        for row in &summary.subjects {
            let _ = writeln!(
                s,
                "{:<width$}  {:>7}  {:>5}  {:>7.1}%  {}",
                row.name,
                row.attended,
                row.total,
                row.percentage,
                row.standing.label()
            );
        }
        let _ = writeln!(s, "{rule}");
        let _ = writeln!(
            s,
            "{:<width$}  {:>7}  {:>5}  {:>7.1}%  {}",
            "Overall",
            "",
            "",
            summary.overall.percentage,
            summary.overall.standing.label()
        );
        if summary.overall.below_threshold {
            let _ = writeln!(
                s,
                "\nWarning: overall attendance is below {OVERALL_THRESHOLD:.0}%."
            );
        }
        s
    }

}

pub mod storage {
    //! Persistence of the single state document.

    use crate::core::AppState;
    use anyhow::{Context, Result};
    use std::{
        ffi::OsString,
        fs, io,
        path::{Path, PathBuf},
    };

    /// Loads and saves the whole aggregate at once.
    pub trait StateRepository {
        /// `Ok(None)` when nothing has been saved yet.
        fn load(&self) -> Result<Option<AppState>>;

        fn save(&self, state: &AppState) -> Result<()>;
    }

    /// Pretty-printed JSON file, replaced atomically on every save.
    #[derive(Debug, Clone)]
    pub struct JsonFileRepository {
        path: PathBuf,
    }

    impl JsonFileRepository {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self { path: path.into() }
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        fn temp_path(&self) -> PathBuf {
            let mut name = self
                .path
                .file_name()
                .map(OsString::from)
                .unwrap_or_else(|| OsString::from("attendance.json"));
            name.push(".tmp");
            self.path.with_file_name(name)
        }
    }

    impl StateRepository for JsonFileRepository {
        fn load(&self) -> Result<Option<AppState>> {
            let raw = match fs::read_to_string(&self.path) {
                Ok(raw) => raw,
                Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(err) => {
                    return Err(err).with_context(|| format!("reading {:?}", self.path));
                }
            };
            if raw.trim().is_empty() {
                return Ok(None);
            }
            let state = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {:?}", self.path))?;
            tracing::debug!(path = ?self.path, "loaded state");
            Ok(Some(state))
        }

        fn save(&self, state: &AppState) -> Result<()> {
            let mut json = serde_json::to_string_pretty(state).context("serializing state")?;
            json.push('\n');
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating directory {:?}", parent))?;
            }
            let tmp = self.temp_path();
            fs::write(&tmp, json).with_context(|| format!("writing {:?}", tmp))?;
            fs::rename(&tmp, &self.path)
                .with_context(|| format!("replacing {:?}", self.path))?;
            tracing::debug!(path = ?self.path, "saved state");
            Ok(())
        }
    }

}

pub mod tracker {
    //! Owning controller: loads the state once, runs each edit, persists after it.

    use crate::calendar::{SemesterWindow, month_days};
    use crate::core::{AppState, AttendanceError, AttendanceOverride, Subject};
    use crate::ledger::{DayBook, DayStatus, DayToggle, DayView, HolidayToggle, SheetEntry};
    use crate::report::{Summary, build_summary, render_text};
    use crate::schedule::{discover_batches, normalize_batch, weekly_counts};
    use crate::storage::StateRepository;
    use crate::timetable::Timetable;
    use chrono::NaiveDate;
    use indexmap::IndexMap;
    use std::path::Path;

    /// Trimmed batch text, rejected when nothing is left after normalising.
    fn checked_batch(batch: &str) -> Result<&str, AttendanceError> {
        let batch = batch.trim();
        if normalize_batch(batch).is_empty() {
            return Err(AttendanceError::InvalidBatch(batch.to_string()));
        }
        Ok(batch)
    }

    pub struct Tracker<R: StateRepository> {
        repo: R,
        state: AppState,
        /// Active timetable: the imported one, else the built-in one.
        timetable: Timetable,
        today: NaiveDate,
        load_warning: Option<String>,
    }

    impl<R: StateRepository> Tracker<R> {
        /// Load the persisted state. An unreadable file is reported through
        /// [`Tracker::load_warning`] and replaced by an empty state.
        pub fn open(repo: R, today: NaiveDate) -> Self {
            let (state, load_warning) = match repo.load() {
                Ok(Some(state)) => (state, None),
                Ok(None) => {
                    tracing::debug!("no saved state; starting empty");
                    (AppState::default(), None)
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    tracing::warn!(error = %message, "could not load saved state; starting empty");
                    (AppState::default(), Some(message))
                }
            };
            let timetable = state
                .custom_timetable
                .clone()
                .unwrap_or_else(Timetable::builtin);
            Self {
                repo,
                state,
                timetable,
                today,
                load_warning,
            }
        }

        pub fn state(&self) -> &AppState {
            &self.state
        }

        pub fn timetable(&self) -> &Timetable {
            &self.timetable
        }

        pub fn today(&self) -> NaiveDate {
            self.today
        }

        pub fn load_warning(&self) -> Option<&str> {
            self.load_warning.as_deref()
        }

        pub fn is_configured(&self) -> bool {
            self.state.batch.is_some()
        }

        fn persist(&self) -> Result<(), AttendanceError> {
            self.repo.save(&self.state).map_err(AttendanceError::Storage)
        }

        fn require_batch(&self) -> Result<(), AttendanceError> {
            match self.state.batch {
                Some(_) => Ok(()),
                None => Err(AttendanceError::BatchNotConfigured),
            }
        }

        fn book(&mut self) -> DayBook<'_> {
            DayBook::new(&mut self.state, &self.timetable, self.today)
        }

        pub fn view(&self) -> DayView<'_> {
            DayView::new(&self.state, &self.timetable, self.today)
        }

        /* ------------------------------ Setup ------------------------------ */

        pub fn candidate_batches(&self) -> Vec<String> {
            discover_batches(&self.timetable)
        }

        /// Subjects the batch attends in `timetable`, carrying over history and
        /// overrides by name.
        fn derive_subjects(&self, timetable: &Timetable, batch: &str) -> Result<Vec<Subject>, AttendanceError> {
            let counts = weekly_counts(timetable, batch);
            if counts.is_empty() {
                return Err(AttendanceError::NoSubjectsForBatch(batch.to_string()));
            }
            let subjects = counts
                .into_iter()
                .map(|(name, weekly_count)| match self.state.subject(&name) {
                    Some(existing) => Subject {
                        weekly_count,
                        ..existing.clone()
                    },
                    None => Subject::new(name, weekly_count),
                })
                .collect::<Vec<_>>();
            let dropped = self
                .state
                .subjects
                .iter()
                .filter(|old| subjects.iter().all(|s| s.name != old.name))
                .count();
            tracing::debug!(batch, subjects = subjects.len(), dropped, "derived subjects");
            Ok(subjects)
        }

        /// First-run configuration: batch, semester and the derived subject list.
        pub fn setup(&mut self, batch: &str, start: NaiveDate, end: NaiveDate) -> Result<usize, AttendanceError> {
            let window = SemesterWindow::new(start, end)?;
            let batch = checked_batch(batch)?;
            let subjects = self.derive_subjects(&self.timetable, batch)?;
            let count = subjects.len();
            self.state.batch = Some(batch.to_string());
            self.state.semester_start = Some(window.start);
            self.state.semester_end = Some(window.end);
            self.state.subjects = subjects;
            self.book().resync_skipped_days();
            self.persist()?;
            tracing::info!(batch, subjects = count, "setup complete");
            Ok(count)
        }

        pub fn change_batch(&mut self, batch: &str) -> Result<usize, AttendanceError> {
            self.require_batch()?;
            let batch = checked_batch(batch)?;
            let subjects = self.derive_subjects(&self.timetable, batch)?;
            let count = subjects.len();
            self.state.batch = Some(batch.to_string());
            self.state.subjects = subjects;
            self.book().resync_skipped_days();
            self.persist()?;
            tracing::info!(batch, subjects = count, "batch changed");
            Ok(count)
        }

        pub fn set_semester(&mut self, start: NaiveDate, end: NaiveDate) -> Result<(), AttendanceError> {
            let window = SemesterWindow::new(start, end)?;
            self.state.semester_start = Some(window.start);
            self.state.semester_end = Some(window.end);
            self.persist()?;
            tracing::info!(%start, %end, "semester updated");
            Ok(())
        }

        /// Replace the active timetable. With a batch selected the subject list is
        /// re-derived; a timetable giving that batch no subjects is rejected.
        pub fn import_timetable(&mut self, timetable: Timetable) -> Result<usize, AttendanceError> {
            let subjects = match self.state.batch.clone() {
                Some(batch) => Some(self.derive_subjects(&timetable, &batch)?),
                None => None,
            };
            let count = subjects.as_ref().map_or(0, Vec::len);
            if let Some(subjects) = subjects {
                self.state.subjects = subjects;
            }
            self.state.custom_timetable = Some(timetable.clone());
            self.timetable = timetable;
            self.book().resync_skipped_days();
            self.persist()?;
            tracing::info!(slots = self.timetable.slot_count(), subjects = count, "timetable imported");
            Ok(count)
        }

        pub fn import_timetable_csv(&mut self, path: &Path) -> Result<usize, AttendanceError> {
            let timetable = Timetable::read_csv(path)?;
            self.import_timetable(timetable)
        }

        /* ---------------------------- Day edits ---------------------------- */

        pub fn mark_absent(&mut self, subject: &str, date: NaiveDate) -> Result<u32, AttendanceError> {
            self.require_batch()?;
            let count = self.book().mark_absent(subject, date)?;
            self.persist()?;
            Ok(count)
        }

        pub fn mark_present(&mut self, subject: &str, date: NaiveDate) -> Result<bool, AttendanceError> {
            self.require_batch()?;
            let removed = self.book().mark_present(subject, date)?;
            if removed {
                self.persist()?;
            }
            Ok(removed)
        }

        pub fn toggle_day_absence(&mut self, date: NaiveDate) -> Result<DayToggle, AttendanceError> {
            self.require_batch()?;
            let outcome = self.book().toggle_day_absence(date)?;
            self.persist()?;
            Ok(outcome)
        }

        pub fn remove_skipped_day(&mut self, date: NaiveDate) -> Result<IndexMap<String, u32>, AttendanceError> {
            let removed = self.book().remove_skipped_day(date)?;
            self.persist()?;
            Ok(removed)
        }

        pub fn toggle_holiday(&mut self, date: NaiveDate, name: Option<&str>) -> Result<HolidayToggle, AttendanceError> {
            let outcome = self.book().toggle_holiday(date, name)?;
            self.persist()?;
            Ok(outcome)
        }

        pub fn save_day(&mut self, date: NaiveDate, present: &[bool]) -> Result<(), AttendanceError> {
            self.require_batch()?;
            self.book().save_day(date, present)?;
            self.persist()
        }

        /* ----------------------------- Overrides ----------------------------- */

        fn subject_mut(&mut self, name: &str) -> Result<&mut Subject, AttendanceError> {
            self.state
                .subject_mut(name)
                .ok_or_else(|| AttendanceError::UnknownSubject(name.to_string()))
        }

        pub fn set_attendance_override(&mut self, subject: &str, attended: u32, total: u32) -> Result<(), AttendanceError> {
            let ov = AttendanceOverride::new(attended, total)?;
            self.subject_mut(subject)?.attendance_override = Some(ov);
            self.persist()?;
            tracing::info!(subject, attended, total, "attendance override set");
            Ok(())
        }

        pub fn set_total_override(&mut self, subject: &str, total: u32) -> Result<(), AttendanceError> {
            self.subject_mut(subject)?.total_override = Some(total);
            self.persist()?;
            tracing::info!(subject, total, "total override set");
            Ok(())
        }

        /// Drop both overrides; returns whether any was set.
        pub fn clear_overrides(&mut self, subject: &str) -> Result<bool, AttendanceError> {
            let entry = self.subject_mut(subject)?;
            let had = entry.attendance_override.take().is_some() | entry.total_override.take().is_some();
            if had {
                self.persist()?;
                tracing::info!(subject, "overrides cleared");
            }
            Ok(had)
        }

        /// Forget holidays, skipped days, absences and overrides. Batch, semester and
        /// timetable stay.
        pub fn reset(&mut self) -> Result<(), AttendanceError> {
            self.state.holidays.clear();
            self.state.skipped_days.clear();
            for subject in &mut self.state.subjects {
                subject.absent_dates.clear();
                subject.total_override = None;
                subject.attendance_override = None;
            }
            self.persist()?;
            tracing::info!("attendance data reset");
            Ok(())
        }

        /* ------------------------------- Views ------------------------------- */

        pub fn summary(&self) -> Summary {
            build_summary(&self.state, &self.timetable, self.today)
        }

        pub fn report_text(&self) -> String {
            render_text(&self.summary())
        }

        pub fn day_sheet(&self, date: NaiveDate) -> Vec<SheetEntry> {
            self.view().day_sheet(date)
        }

        pub fn day_status(&self, date: NaiveDate) -> DayStatus {
            self.view().day_status(date)
        }

        pub fn month_statuses(&self, year: i32, month: u32) -> Result<Vec<(NaiveDate, DayStatus)>, AttendanceError> {
            let view = self.view();
            Ok(month_days(year, month)?
                .into_iter()
                .map(|date| (date, view.day_status(date)))
                .collect())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::calendar::parse_date;
        use crate::storage::JsonFileRepository;
        use chrono::Weekday;
        use std::fs;
        use tempfile::tempdir;

        fn d(s: &str) -> NaiveDate {
            parse_date(s).unwrap()
        }

        fn open(path: &Path) -> Tracker<JsonFileRepository> {
            Tracker::open(JsonFileRepository::new(path), d("2024-02-01"))
        }

        #[test]
        fn setup_derives_subjects_and_persists() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("state.json");
            let mut tracker = open(&path);
            assert!(!tracker.is_configured());
            let n = tracker.setup("B1/B3", d("2024-01-01"), d("2024-05-31")).unwrap();
            assert!(n > 0);
            assert!(tracker.state().subject("DAA Lab").is_some());
            assert!(tracker.state().subject("DBMS Lab").is_none());

            let reopened = open(&path);
            assert_eq!(reopened.state(), tracker.state());
            assert!(reopened.load_warning().is_none());
        }

        #[test]
        fn setup_rejects_batch_without_subjects() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("state.json");
            let mut tracker = open(&path);
            tracker.import_timetable(Timetable::new()).unwrap();
            let err = tracker.setup("B1/B3", d("2024-01-01"), d("2024-05-31")).unwrap_err();
            assert!(matches!(err, AttendanceError::NoSubjectsForBatch(_)));
            assert!(tracker.state().batch.is_none());
        }

        #[test]
        fn corrupt_state_degrades_to_first_run() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("state.json");
            fs::write(&path, "[1, 2").unwrap();
            let tracker = open(&path);
            assert!(tracker.load_warning().is_some());
            assert_eq!(tracker.state(), &AppState::default());
        }

        #[test]
        fn batch_must_survive_normalising() {
            let dir = tempdir().unwrap();
            let mut tracker = open(&dir.path().join("state.json"));
            for batch in ["", "  ", "-", "/", " & "] {
                assert!(matches!(
                    tracker.setup(batch, d("2024-01-01"), d("2024-05-31")),
                    Err(AttendanceError::InvalidBatch(_))
                ));
            }
            assert!(!tracker.is_configured());
            tracker.setup("B1/B3", d("2024-01-01"), d("2024-05-31")).unwrap();
            assert!(matches!(
                tracker.change_batch("/"),
                Err(AttendanceError::InvalidBatch(_))
            ));
            assert_eq!(tracker.state().batch.as_deref(), Some("B1/B3"));
        }

        #[test]
        fn day_edits_require_setup() {
            let dir = tempdir().unwrap();
            let mut tracker = open(&dir.path().join("state.json"));
            assert!(matches!(
                tracker.toggle_day_absence(d("2024-01-10")),
                Err(AttendanceError::BatchNotConfigured)
            ));
        }

        #[test]
        fn import_keeps_history_by_subject_name() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("state.json");
            let mut tracker = open(&path);
            tracker.setup("B1/B3", d("2024-01-01"), d("2024-05-31")).unwrap();
            // 2024-01-08 is a Monday with DM in the built-in timetable.
            tracker.mark_absent("DM", d("2024-01-08")).unwrap();
            tracker.set_total_override("TOC", 30).unwrap();

            let mut table = Timetable::new();
            table.set_slot(Weekday::Mon, "09:00", "DM (DT203)");
            table.set_slot(Weekday::Tue, "09:00", "AI (DT101)");
            let n = tracker.import_timetable(table).unwrap();
            assert_eq!(n, 2);
            let dm = tracker.state().subject("DM").unwrap();
            assert_eq!(dm.absent_dates.count_of(d("2024-01-08")), 1);
            assert_eq!(dm.weekly_count, 1);
            assert!(tracker.state().subject("AI").unwrap().absent_dates.is_empty());
            assert!(tracker.state().subject("TOC").is_none());

            let reopened = open(&path);
            assert!(reopened.state().custom_timetable.is_some());
            assert_eq!(reopened.timetable(), tracker.timetable());
        }

        #[test]
        fn change_batch_swaps_split_subjects() {
            let dir = tempdir().unwrap();
            let mut tracker = open(&dir.path().join("state.json"));
            tracker.setup("B1/B3", d("2024-01-01"), d("2024-05-31")).unwrap();
            tracker.change_batch("B2/B4").unwrap();
            assert_eq!(tracker.state().batch.as_deref(), Some("B2/B4"));
            assert!(tracker.state().subject("CN Lab").is_some());
            assert_eq!(tracker.state().subject("CN Lab").unwrap().weekly_count, 2);
        }

        #[test]
        fn overrides_set_and_clear() {
            let dir = tempdir().unwrap();
            let mut tracker = open(&dir.path().join("state.json"));
            tracker.setup("B1/B3", d("2024-01-01"), d("2024-05-31")).unwrap();
            assert!(matches!(
                tracker.set_attendance_override("CN", 11, 10),
                Err(AttendanceError::InvalidOverride(_))
            ));
            tracker.set_attendance_override("CN", 9, 10).unwrap();
            let row = tracker.summary().subjects.into_iter().find(|r| r.name == "CN").unwrap();
            assert_eq!((row.attended, row.total), (9, 10));
            assert!(tracker.clear_overrides("CN").unwrap());
            assert!(!tracker.clear_overrides("CN").unwrap());
            assert!(matches!(
                tracker.set_total_override("Nope", 1),
                Err(AttendanceError::UnknownSubject(_))
            ));
        }

        #[test]
        fn reset_keeps_configuration() {
            let dir = tempdir().unwrap();
            let mut tracker = open(&dir.path().join("state.json"));
            tracker.setup("B1/B3", d("2024-01-01"), d("2024-05-31")).unwrap();
            tracker.toggle_day_absence(d("2024-01-10")).unwrap();
            tracker.toggle_holiday(d("2024-01-26"), Some("Republic Day")).unwrap();
            tracker.reset().unwrap();
            let state = tracker.state();
            assert!(state.holidays.is_empty() && state.skipped_days.is_empty());
            assert!(state.subjects.iter().all(|s| s.absent_dates.is_empty()));
            assert_eq!(state.batch.as_deref(), Some("B1/B3"));
            assert!(state.semester().is_some());
        }

        #[test]
        fn month_statuses_cover_the_month() {
            let dir = tempdir().unwrap();
            let mut tracker = open(&dir.path().join("state.json"));
            tracker.setup("B1/B3", d("2024-01-01"), d("2024-05-31")).unwrap();
            tracker.toggle_day_absence(d("2024-01-10")).unwrap();
            let days = tracker.month_statuses(2024, 1).unwrap();
            assert_eq!(days.len(), 31);
            let status = |date: &str| days.iter().find(|(day, _)| *day == d(date)).unwrap().1;
            assert_eq!(status("2024-01-10"), DayStatus::FullyAbsent);
            assert_eq!(status("2024-01-07"), DayStatus::NoClass);
            assert_eq!(status("2024-01-08"), DayStatus::Present);
        }
    }
}
