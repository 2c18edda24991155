use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
};

use anyhow::{Context, Result, bail};
use attendance::calc::{DEFAULT_SKIP_THRESHOLD, SUBJECT_THRESHOLD};
use attendance::ledger::{DayStatus, DayToggle, HolidayToggle};
use attendance::overrides::TallySource;
use attendance::schedule::resolve_cell;
use attendance::storage::JsonFileRepository;
use attendance::timetable::{TEACHING_DAYS, day_name};
use attendance::tracker::Tracker;
use chrono::{Datelike, Local, NaiveDate};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "attendance",
    about = "Track class attendance against a weekly timetable",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    /// State file holding batch, semester, holidays and absences.
    #[arg(long, global = true, env = "ATTENDANCE_DATA", default_value = "attendance.json")]
    data: PathBuf,
    /// Date treated as today (YYYY-MM-DD). Defaults to the local date.
    #[arg(long, global = true, env = "ATTENDANCE_TODAY")]
    today: Option<NaiveDate>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Pick a batch and semester and derive the subject list.
    Setup(SetupArgs),

    /// List batch tags found in the active timetable.
    Batches,

    /// Switch to another batch, keeping history for subjects that remain.
    Batch(BatchArgs),

    /// Change the semester window.
    Semester(SemesterArgs),

    /// Show, import or export the weekly timetable.
    Timetable(TimetableArgs),

    /// Show the classes of one date, or set all of them at once.
    Day(DayArgs),

    /// Mark one class of a subject absent.
    Absent(MarkArgs),

    /// Remove one recorded absence of a subject.
    Present(MarkArgs),

    /// Toggle a whole-day absence.
    Skip(DateArgs),

    /// Delete a skipped-day record and the absences it added.
    Unskip(DateArgs),

    /// Toggle a holiday.
    Holiday(HolidayArgs),

    /// Set or clear per-subject overrides.
    Override(OverrideArgs),

    /// Per-subject figures and the overall standing.
    Summary(SummaryArgs),

    /// Day statuses for a month.
    Calendar(CalendarArgs),

    /// Export the attendance report.
    Report(ReportArgs),

    /// Clear holidays, skipped days, absences and overrides.
    Reset(ResetArgs),
}

#[derive(Debug, Args)]
struct SetupArgs {
    /// Batch identifier (e.g. "B1/B3"). Omit to list the candidates.
    #[arg(long)]
    batch: Option<String>,
    /// First day of the semester (YYYY-MM-DD).
    #[arg(long)]
    start: NaiveDate,
    /// Last day of the semester (YYYY-MM-DD).
    #[arg(long)]
    end: NaiveDate,
}

#[derive(Debug, Args)]
struct BatchArgs {
    batch: String,
}

#[derive(Debug, Args)]
struct SemesterArgs {
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Debug, Args)]
struct TimetableArgs {
    #[command(subcommand)]
    command: TimetableCommand,
}

#[derive(Debug, Subcommand)]
enum TimetableCommand {
    /// Print the week as the selected batch sees it.
    Show {
        /// Print raw cell text instead of the resolved subject.
        #[arg(long)]
        raw: bool,
    },
    /// Replace the timetable with a Day,Time,Subject CSV.
    Import { path: PathBuf },
    /// Write the active timetable as CSV (stdout when no path is given).
    Export { path: Option<PathBuf> },
}

#[derive(Debug, Args)]
struct DayArgs {
    date: NaiveDate,
    /// One letter per class in listed order: P (present) or A (absent).
    #[arg(long)]
    set: Option<String>,
    /// Emit JSON instead of a list.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct MarkArgs {
    subject: String,
    date: NaiveDate,
}

#[derive(Debug, Args)]
struct DateArgs {
    date: NaiveDate,
}

#[derive(Debug, Args)]
struct HolidayArgs {
    date: NaiveDate,
    /// Name shown for the holiday.
    #[arg(long)]
    name: Option<String>,
}

#[derive(Debug, Args)]
struct OverrideArgs {
    #[command(subcommand)]
    command: OverrideCommand,
}

#[derive(Debug, Subcommand)]
enum OverrideCommand {
    /// Replace attended and total for a subject.
    Set {
        subject: String,
        attended: u32,
        total: u32,
    },
    /// Fix the total; attended still follows recorded absences.
    Total { subject: String, total: u32 },
    /// Return a subject to computed figures.
    Clear { subject: String },
}

#[derive(Debug, Args)]
struct SummaryArgs {
    /// Emit JSON instead of a table.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct CalendarArgs {
    /// Month to show (YYYY-MM). Defaults to the month of today.
    #[arg(long, value_parser = parse_month)]
    month: Option<(i32, u32)>,
    /// Emit JSON instead of a grid.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct ReportArgs {
    /// Write the report to this path instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    format: ReportFormat,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ReportFormat {
    Text,
    Json,
}

#[derive(Debug, Args)]
struct ResetArgs {
    /// Confirm the reset.
    #[arg(long)]
    yes: bool,
}

/// Options shared by every command.
#[derive(Debug, Clone)]
struct Session {
    data: PathBuf,
    today: NaiveDate,
    verbose: bool,
}

impl Session {
    fn open(&self) -> Tracker<JsonFileRepository> {
        if self.verbose {
            eprintln!("Using state file {:?} (today = {})", self.data, self.today);
        }
        let tracker = Tracker::open(JsonFileRepository::new(&self.data), self.today);
        if let Some(warning) = tracker.load_warning() {
            eprintln!("warning: could not read {:?}; starting fresh ({warning})", self.data);
        }
        tracker
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let session = Session {
        data: cli.data,
        today: cli.today.unwrap_or_else(|| Local::now().date_naive()),
        verbose: cli.verbose,
    };
    match cli.command {
        Commands::Setup(args) => handle_setup(args, &session),
        Commands::Batches => handle_batches(&session),
        Commands::Batch(args) => handle_batch(args, &session),
        Commands::Semester(args) => handle_semester(args, &session),
        Commands::Timetable(args) => handle_timetable(args, &session),
        Commands::Day(args) => handle_day(args, &session),
        Commands::Absent(args) => handle_absent(args, &session),
        Commands::Present(args) => handle_present(args, &session),
        Commands::Skip(args) => handle_skip(args, &session),
        Commands::Unskip(args) => handle_unskip(args, &session),
        Commands::Holiday(args) => handle_holiday(args, &session),
        Commands::Override(args) => handle_override(args, &session),
        Commands::Summary(args) => handle_summary(args, &session),
        Commands::Calendar(args) => handle_calendar(args, &session),
        Commands::Report(args) => handle_report(args, &session),
        Commands::Reset(args) => handle_reset(args, &session),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn parse_month(input: &str) -> std::result::Result<(i32, u32), String> {
    let (year, month) = input
        .split_once('-')
        .ok_or_else(|| format!("expected YYYY-MM, got {input:?}"))?;
    let year: i32 = year.parse().map_err(|_| format!("invalid year in {input:?}"))?;
    let month: u32 = month.parse().map_err(|_| format!("invalid month in {input:?}"))?;
    if !(1..=12).contains(&month) {
        return Err(format!("month must be 1-12, got {month}"));
    }
    Ok((year, month))
}

/// `PAAP` -> one present flag per class.
fn parse_flags(input: &str) -> Result<Vec<bool>> {
    input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .map(|c| match c.to_ascii_uppercase() {
            'P' => Ok(true),
            'A' => Ok(false),
            other => bail!("unexpected flag {other:?}; use P or A"),
        })
        .collect()
}

fn handle_setup(args: SetupArgs, session: &Session) -> Result<()> {
    let mut tracker = session.open();
    let Some(batch) = args.batch else {
        println!("Available batches:");
        for batch in tracker.candidate_batches() {
            println!("  {batch}");
        }
        bail!("choose one with --batch");
    };
    let count = tracker
        .setup(&batch, args.start, args.end)
        .with_context(|| format!("setting up batch {batch:?}"))?;
    println!(
        "Configured batch {batch} for {} to {} with {count} subjects.",
        args.start, args.end
    );
    for subject in &tracker.state().subjects {
        println!("  {:<24} {}/week", subject.name, subject.weekly_count);
    }
    Ok(())
}

fn handle_batches(session: &Session) -> Result<()> {
    let tracker = session.open();
    let current = tracker.state().batch.as_deref();
    for batch in tracker.candidate_batches() {
        let marker = if current == Some(batch.as_str()) { "*" } else { " " };
        println!("{marker} {batch}");
    }
    Ok(())
}

fn handle_batch(args: BatchArgs, session: &Session) -> Result<()> {
    let mut tracker = session.open();
    let count = tracker
        .change_batch(&args.batch)
        .with_context(|| format!("switching to batch {:?}", args.batch))?;
    println!("Switched to batch {} ({count} subjects).", args.batch);
    Ok(())
}

fn handle_semester(args: SemesterArgs, session: &Session) -> Result<()> {
    let mut tracker = session.open();
    tracker.set_semester(args.start, args.end)?;
    println!("Semester set to {} .. {}.", args.start, args.end);
    Ok(())
}

fn handle_timetable(args: TimetableArgs, session: &Session) -> Result<()> {
    match args.command {
        TimetableCommand::Show { raw } => {
            let tracker = session.open();
            let batch = tracker.state().batch_or_empty();
            let table = tracker.timetable();
            for day in TEACHING_DAYS {
                println!("{}", day_name(day));
                for (time, cell) in table.slots(day).into_iter().flatten() {
                    let shown = if raw {
                        cell.as_str()
                    } else {
                        resolve_cell(cell, batch).unwrap_or("-")
                    };
                    println!("  {time:<14} {shown}");
                }
            }
        }
        TimetableCommand::Import { path } => {
            let mut tracker = session.open();
            let count = tracker
                .import_timetable_csv(&path)
                .with_context(|| format!("importing timetable {:?}", path))?;
            println!(
                "Imported {} slots from {:?}; {count} subjects for the current batch.",
                tracker.timetable().slot_count(),
                path
            );
        }
        TimetableCommand::Export { path } => {
            let tracker = session.open();
            match path {
                Some(path) => {
                    tracker
                        .timetable()
                        .write_csv_path(&path)
                        .with_context(|| format!("exporting timetable to {:?}", path))?;
                    println!("Wrote timetable to {:?}", path);
                }
                None => tracker.timetable().write_csv(io::stdout().lock())?,
            }
        }
    }
    Ok(())
}

fn handle_day(args: DayArgs, session: &Session) -> Result<()> {
    let mut tracker = session.open();
    if let Some(flags) = args.set.as_deref() {
        let present = parse_flags(flags)?;
        tracker
            .save_day(args.date, &present)
            .with_context(|| format!("saving attendance for {}", args.date))?;
    }

    let sheet = tracker.day_sheet(args.date);
    let status = tracker.day_status(args.date);
    if args.json {
        #[derive(Serialize)]
        struct DayPayload<'a> {
            date: NaiveDate,
            status: DayStatus,
            classes: &'a [attendance::ledger::SheetEntry],
        }
        let payload = DayPayload {
            date: args.date,
            status,
            classes: &sheet,
        };
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    println!("{} ({:?})", args.date, status);
    if sheet.is_empty() {
        println!("  no classes");
    }
    for (idx, entry) in sheet.iter().enumerate() {
        let mark = if entry.absent { "absent" } else { "present" };
        println!("  {:>2}. {:<28} {mark}", idx + 1, entry.label);
    }
    Ok(())
}

fn handle_absent(args: MarkArgs, session: &Session) -> Result<()> {
    let mut tracker = session.open();
    let count = tracker
        .mark_absent(&args.subject, args.date)
        .with_context(|| format!("marking {} absent on {}", args.subject, args.date))?;
    println!("{} absent on {} ({count} recorded).", args.subject, args.date);
    Ok(())
}

fn handle_present(args: MarkArgs, session: &Session) -> Result<()> {
    let mut tracker = session.open();
    let removed = tracker
        .mark_present(&args.subject, args.date)
        .with_context(|| format!("marking {} present on {}", args.subject, args.date))?;
    if removed {
        println!("Removed one absence of {} on {}.", args.subject, args.date);
    } else {
        println!("No absence of {} recorded on {}.", args.subject, args.date);
    }
    Ok(())
}

fn handle_skip(args: DateArgs, session: &Session) -> Result<()> {
    let mut tracker = session.open();
    let outcome = tracker
        .toggle_day_absence(args.date)
        .with_context(|| format!("toggling whole-day absence on {}", args.date))?;
    match outcome {
        DayToggle::Skipped { added } => {
            println!("Marked {} absent for every class.", args.date);
            for (subject, n) in added {
                println!("  +{n} {subject}");
            }
        }
        DayToggle::Restored { removed } => {
            println!("Cleared the absence on {}.", args.date);
            for (subject, n) in removed {
                println!("  -{n} {subject}");
            }
        }
    }
    Ok(())
}

fn handle_unskip(args: DateArgs, session: &Session) -> Result<()> {
    let mut tracker = session.open();
    let removed = tracker
        .remove_skipped_day(args.date)
        .with_context(|| format!("removing skipped day {}", args.date))?;
    println!("Removed skipped day {}.", args.date);
    for (subject, n) in removed {
        println!("  -{n} {subject}");
    }
    Ok(())
}

fn handle_holiday(args: HolidayArgs, session: &Session) -> Result<()> {
    let mut tracker = session.open();
    match tracker.toggle_holiday(args.date, args.name.as_deref())? {
        HolidayToggle::Added => println!("{} is now a holiday.", args.date),
        HolidayToggle::Removed => println!("{} is no longer a holiday.", args.date),
    }
    Ok(())
}

fn handle_override(args: OverrideArgs, session: &Session) -> Result<()> {
    let mut tracker = session.open();
    match args.command {
        OverrideCommand::Set {
            subject,
            attended,
            total,
        } => {
            tracker.set_attendance_override(&subject, attended, total)?;
            println!("{subject}: using {attended}/{total}.");
        }
        OverrideCommand::Total { subject, total } => {
            tracker.set_total_override(&subject, total)?;
            println!("{subject}: total fixed at {total}.");
        }
        OverrideCommand::Clear { subject } => {
            if tracker.clear_overrides(&subject)? {
                println!("{subject}: overrides cleared.");
            } else {
                println!("{subject}: no override set.");
            }
        }
    }
    Ok(())
}

fn handle_summary(args: SummaryArgs, session: &Session) -> Result<()> {
    let tracker = session.open();
    let summary = tracker.summary();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    if summary.subjects.is_empty() {
        eprintln!("No subjects configured; run `attendance setup` first.");
        return Ok(());
    }

    if let (Some(window), Some(progress)) = (summary.semester, summary.progress) {
        println!(
            "Semester {} .. {}: {:.0}% elapsed, {} days left",
            window.start, window.end, progress.percent, progress.remaining_days
        );
    }
    println!(
        "{:<24} {:>9} {:>7}  {:<9} {:>4} {:>5}  note",
        "Subject", "Att/Total", "Pct", "Status", "Skip", "Left"
    );
    for row in &summary.subjects {
        let mut note = match row.source {
            TallySource::Computed => String::new(),
            TallySource::TotalOverride => "total override".to_string(),
            TallySource::AttendanceOverride => "override".to_string(),
        };
        if let Some(needed) = row.classes_needed {
            if !note.is_empty() {
                note.push_str("; ");
            }
            note.push_str(&format!("attend {needed} to reach {SUBJECT_THRESHOLD:.0}%"));
        }
        println!(
            "{:<24} {:>9} {:>6.1}%  {:<9} {:>4} {:>5}  {note}",
            row.name,
            format!("{}/{}", row.attended, row.total),
            row.percentage,
            row.standing.label(),
            row.safe_skip,
            row.remaining,
        );
    }
    let overall = &summary.overall;
    println!(
        "\nOverall {:.1}% ({}): {} excellent, {} safe, {} at risk. Skip counts keep {:.0}%.",
        overall.percentage,
        overall.standing.label(),
        overall.excellent,
        overall.safe,
        overall.at_risk,
        DEFAULT_SKIP_THRESHOLD
    );
    if overall.below_threshold {
        println!("Warning: overall attendance is below the required level.");
    }
    Ok(())
}

#[derive(Serialize)]
struct CalendarDay {
    date: NaiveDate,
    status: DayStatus,
}

fn handle_calendar(args: CalendarArgs, session: &Session) -> Result<()> {
    let tracker = session.open();
    let (year, month) = args
        .month
        .unwrap_or((session.today.year(), session.today.month()));
    let days = tracker.month_statuses(year, month)?;

    if args.json {
        let payload: Vec<CalendarDay> = days
            .into_iter()
            .map(|(date, status)| CalendarDay { date, status })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    render_month(&mut out, year, month, &days)?;
    Ok(())
}

fn render_month<W: Write>(out: &mut W, year: i32, month: u32, days: &[(NaiveDate, DayStatus)]) -> Result<()> {
    let title = days
        .first()
        .map(|(date, _)| date.format("%B %Y").to_string())
        .unwrap_or_else(|| format!("{year}-{month:02}"));
    writeln!(out, "{title}")?;
    writeln!(out, " Mo  Tu  We  Th  Fr  Sa  Su")?;
    let offset = days
        .first()
        .map(|(date, _)| date.weekday().num_days_from_monday())
        .unwrap_or(0);
    let mut line = "    ".repeat(offset as usize);
    for (date, status) in days {
        line.push_str(&format!("{:>3}{}", date.day(), status.symbol()));
        if date.weekday().num_days_from_monday() == 6 {
            writeln!(out, "{}", line.trim_end())?;
            line.clear();
        }
    }
    if !line.is_empty() {
        writeln!(out, "{}", line.trim_end())?;
    }
    writeln!(
        out,
        "P present  a partly absent  A absent  H holiday  . no class"
    )?;
    Ok(())
}

fn handle_report(args: ReportArgs, session: &Session) -> Result<()> {
    let tracker = session.open();
    let body = match args.format {
        ReportFormat::Text => tracker.report_text(),
        ReportFormat::Json => serde_json::to_string_pretty(&tracker.summary())? + "\n",
    };
    match args.output {
        Some(path) => {
            fs::write(&path, body).with_context(|| format!("writing report to {:?}", path))?;
            println!("Wrote report to {:?}", path);
        }
        None => print!("{body}"),
    }
    Ok(())
}

fn handle_reset(args: ResetArgs, session: &Session) -> Result<()> {
    if !args.yes {
        bail!("reset clears every absence, holiday and override; pass --yes to confirm");
    }
    let mut tracker = session.open();
    tracker.reset()?;
    println!("Attendance data cleared.");
    Ok(())
}
