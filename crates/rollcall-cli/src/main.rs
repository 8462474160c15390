use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rollcall_core::{clock, AttendanceRecord, Clock, StudentKey, SystemClock};
use rollcall_store::{SqliteLedger, StudentDirectory};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI", version)]
struct Cli {
    /// Database path (default: $ROLLCALL_DB_PATH, then the XDG data dir)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,
    /// Day boundary as minutes east of UTC (default: $ROLLCALL_UTC_OFFSET_MINUTES, then 0)
    #[arg(long, global = true, allow_hyphen_values = true)]
    utc_offset: Option<i32>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List active students
    Students,
    /// Show one student and their attendance count
    Show {
        /// Student ID (case-insensitive)
        id: String,
    },
    /// Deactivate a student; their attendance history is kept
    Deactivate {
        /// Student ID (case-insensitive)
        id: String,
    },
    /// List check-ins for a day
    Attendance {
        /// Day as YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<String>,
    },
    /// List one student's check-ins, newest first
    History {
        /// Student ID (case-insensitive)
        id: String,
    },
    /// Headcount for a day
    Stats {
        /// Day as YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<String>,
    },
    /// Export a day's check-ins as CSV
    Export {
        /// Day as YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<String>,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let stdout = std::io::stdout();
    run(cli, &mut stdout.lock())
}

fn run(cli: Cli, out: &mut dyn Write) -> Result<()> {
    let db_path = cli
        .db
        .or_else(|| std::env::var_os("ROLLCALL_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(rollcall_store::default_db_path);
    let offset_minutes = match cli.utc_offset {
        Some(m) => m,
        None => match std::env::var("ROLLCALL_UTC_OFFSET_MINUTES") {
            Ok(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("ROLLCALL_UTC_OFFSET_MINUTES={raw} is not a number"))?,
            Err(_) => 0,
        },
    };
    let Some(offset) = clock::offset_from_minutes(offset_minutes) else {
        bail!("utc offset out of range: {offset_minutes} minutes");
    };
    let clock = SystemClock::new(offset);

    tracing::debug!(db = %db_path.display(), "opening database");
    let conn = rollcall_store::open_db(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    let directory = StudentDirectory::new(&conn);
    let ledger = SqliteLedger::new(&conn);
    let day = |raw: Option<String>| -> Result<NaiveDate> {
        match raw {
            Some(raw) => Ok(clock::parse_date(&raw)?),
            None => Ok(clock.today()),
        }
    };

    match cli.command {
        Commands::Students => {
            let students: Vec<_> = directory.list_active()?.iter().map(|s| s.summary()).collect();
            if cli.json {
                print_json(out, &students)?;
            } else if students.is_empty() {
                writeln!(out, "No students registered")?;
            } else {
                writeln!(out, "{:<12} {:<28} {:<16} REGISTERED", "ID", "NAME", "COURSE")?;
                for s in &students {
                    writeln!(
                        out,
                        "{:<12} {:<28} {:<16} {}",
                        s.student_id,
                        s.name,
                        s.course,
                        s.created_at.format("%Y-%m-%d")
                    )?;
                }
                writeln!(out, "{} active", students.len())?;
            }
        }
        Commands::Show { id } => {
            let key = StudentKey::parse(&id)?;
            let student = directory.require(&key)?;
            let history = ledger.for_student(&key)?;
            if cli.json {
                print_json(
                    out,
                    &serde_json::json!({
                        "student": student.summary(),
                        "check_ins": history.len(),
                        "last_check_in": history.first().map(|r| r.date),
                    }),
                )?;
            } else {
                writeln!(out, "ID:          {}", student.student_id)?;
                writeln!(out, "Name:        {}", student.name)?;
                writeln!(out, "Course:      {}", student.course)?;
                writeln!(out, "Registered:  {}", student.created_at.to_rfc3339())?;
                writeln!(out, "Check-ins:   {}", history.len())?;
                if let Some(last) = history.first() {
                    writeln!(out, "Last seen:   {}", last.date)?;
                }
            }
        }
        Commands::Deactivate { id } => {
            let key = StudentKey::parse(&id)?;
            let student = directory.deactivate(&key, clock.now())?;
            if cli.json {
                print_json(out, &student.summary())?;
            } else {
                writeln!(out, "Deactivated {} ({})", student.student_id, student.name)?;
            }
        }
        Commands::Attendance { date } => {
            let date = day(date)?;
            let records = ledger.on_date(date)?;
            if cli.json {
                print_json(out, &records)?;
            } else {
                print_records(out, &records)?;
                writeln!(out, "{} checked in on {date}", records.len())?;
            }
        }
        Commands::History { id } => {
            let key = StudentKey::parse(&id)?;
            if !directory.ever_registered(&key)? {
                bail!("student {key} not found");
            }
            let records = ledger.for_student(&key)?;
            if cli.json {
                print_json(out, &records)?;
            } else {
                print_records(out, &records)?;
            }
        }
        Commands::Stats { date } => {
            let stats = ledger.stats(day(date)?)?;
            if cli.json {
                print_json(out, &stats)?;
            } else {
                writeln!(out, "Date:      {}", stats.date)?;
                writeln!(out, "Students:  {}", stats.total_students)?;
                writeln!(out, "Present:   {}", stats.present)?;
                writeln!(out, "Absent:    {}", stats.absent)?;
                writeln!(out, "Rate:      {:.1}%", stats.attendance_rate)?;
                writeln!(out, "All-time:  {} check-ins", stats.total_records)?;
            }
        }
        Commands::Export { date, output } => {
            let date = day(date)?;
            let records = ledger.on_date(date)?;
            match output {
                Some(path) => {
                    let file = std::fs::File::create(&path)
                        .with_context(|| format!("failed to create {}", path.display()))?;
                    write_csv(file, &records)?;
                    tracing::info!(path = %path.display(), rows = records.len(), "export written");
                    writeln!(out, "Exported {} records to {}", records.len(), path.display())?;
                }
                None => write_csv(&mut *out, &records)?,
            }
        }
    }

    Ok(())
}

fn print_json<T: Serialize + ?Sized>(out: &mut dyn Write, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn print_records(out: &mut dyn Write, records: &[AttendanceRecord]) -> Result<()> {
    if records.is_empty() {
        writeln!(out, "No check-ins")?;
        return Ok(());
    }
    writeln!(
        out,
        "{:<12} {:<28} {:<16} {:<10} {:<8} CONF",
        "ID", "NAME", "COURSE", "DATE", "TIME"
    )?;
    for r in records {
        let confidence = r
            .confidence
            .map(|c| format!("{c:.1}"))
            .unwrap_or_else(|| "-".into());
        writeln!(
            out,
            "{:<12} {:<28} {:<16} {:<10} {:<8} {}",
            r.student_id,
            r.name,
            r.course,
            r.date,
            r.checked_in_at.format("%H:%M:%S"),
            confidence
        )?;
    }
    Ok(())
}

#[derive(Serialize)]
struct ExportRow<'a> {
    student_id: &'a str,
    name: &'a str,
    course: &'a str,
    date: NaiveDate,
    checked_in_at: String,
    confidence: Option<f32>,
}

fn write_csv<W: Write>(writer: W, records: &[AttendanceRecord]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for r in records {
        csv.serialize(ExportRow {
            student_id: r.student_id.as_str(),
            name: &r.name,
            course: &r.course,
            date: r.date,
            checked_in_at: r.checked_in_at.to_rfc3339(),
            confidence: r.confidence,
        })?;
    }
    csv.flush()?;
    Ok(())
}
