use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::NaiveDate;
use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::buckets::{Bucket, Buckets};
use crate::cache::StorageStats;
use crate::config::Config;
use crate::task::{Priority, Task};
use crate::workspace::WorkspaceState;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => io::stdout().is_terminal(),
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    /// The selected day split into timed, untimed and unscheduled sections.
    #[tracing::instrument(skip(self, out, buckets, tz))]
    pub fn print_day<W: Write>(
        &self,
        out: &mut W,
        day: NaiveDate,
        buckets: &Buckets<'_>,
        today: NaiveDate,
        tz: &Tz,
    ) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint(&day.format("%A %Y-%m-%d").to_string(), "1"))?;
        for bucket in Bucket::DAY {
            self.print_section(out, bucket, buckets.get(bucket), today, tz)?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, out, buckets, tz))]
    pub fn print_list<W: Write>(
        &self,
        out: &mut W,
        buckets: &Buckets<'_>,
        today: NaiveDate,
        tz: &Tz,
    ) -> anyhow::Result<()> {
        for bucket in Bucket::LIST {
            self.print_section(out, bucket, buckets.get(bucket), today, tz)?;
        }
        Ok(())
    }

    /// Timed tasks of one day ordered by their wall-clock start.
    #[tracing::instrument(skip(self, out, timed, tz))]
    pub fn print_calendar<W: Write>(
        &self,
        out: &mut W,
        day: NaiveDate,
        timed: &[&Task],
        tz: &Tz,
    ) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint(&day.format("%A %Y-%m-%d").to_string(), "1"))?;
        if timed.is_empty() {
            writeln!(out, "No timed tasks.")?;
            return Ok(());
        }

        let mut ordered: Vec<&Task> = timed.to_vec();
        ordered.sort_by_key(|task| task.start_clock(tz));

        let rows = ordered
            .iter()
            .map(|task| {
                let clock = task
                    .start_clock(tz)
                    .map(|time| time.format("%H:%M").to_string())
                    .unwrap_or_else(|| "--:--".to_string());
                vec![
                    self.paint(&clock, "36"),
                    task.content.clone(),
                    priority_label(task.priority).to_string(),
                ]
            })
            .collect();
        write_table(
            out,
            vec!["Time".to_string(), "Task".to_string(), "Priority".to_string()],
            rows,
        )
    }

    #[tracing::instrument(skip(self, out, state, tasks, tz))]
    pub fn print_workspace<W: Write>(
        &self,
        out: &mut W,
        name: &str,
        state: &WorkspaceState,
        tasks: &[&Task],
        today: NaiveDate,
        tz: &Tz,
    ) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint(name, "1"))?;
        writeln!(out, "{state}")?;
        writeln!(out)?;
        self.print_tasks(out, tasks, today, tz)
    }

    pub fn print_storage_stats<W: Write>(&self, out: &mut W, stats: &StorageStats) -> anyhow::Result<()> {
        writeln!(out, "keys   {}", stats.key_count)?;
        writeln!(out, "size   {} chars", stats.total_size)?;
        Ok(())
    }

    fn print_section<W: Write>(
        &self,
        out: &mut W,
        bucket: Bucket,
        tasks: &[&Task],
        today: NaiveDate,
        tz: &Tz,
    ) -> anyhow::Result<()> {
        writeln!(out)?;
        writeln!(
            out,
            "{} ({})",
            self.paint(bucket.label(), "1"),
            tasks.len()
        )?;
        if tasks.is_empty() {
            return Ok(());
        }
        self.print_tasks(out, tasks, today, tz)
    }

    fn print_tasks<W: Write>(
        &self,
        out: &mut W,
        tasks: &[&Task],
        today: NaiveDate,
        tz: &Tz,
    ) -> anyhow::Result<()> {
        let headers = vec![
            "ID".to_string(),
            "Pri".to_string(),
            "Start".to_string(),
            "Deadline".to_string(),
            "Task".to_string(),
        ];

        let rows = tasks
            .iter()
            .map(|task| {
                let start = day_cell(task.start_day(tz));
                let deadline_day = task.deadline_day(tz);
                let deadline = day_cell(deadline_day);
                let deadline = match deadline_day {
                    Some(day) if day < today => self.paint(&deadline, "31"),
                    _ => deadline,
                };
                vec![
                    self.paint(&task.id, "33"),
                    priority_label(task.priority).to_string(),
                    start,
                    deadline,
                    task.content.clone(),
                ]
            })
            .collect();

        write_table(out, headers, rows)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn day_cell(day: Option<NaiveDate>) -> String {
    day.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default()
}

fn priority_label(priority: Priority) -> &'static str {
    match priority {
        Priority::Low => "L",
        Priority::Medium => "M",
        Priority::High => "H",
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, width) in headers.iter().zip(widths.iter().copied()) {
        write!(writer, "{header:width$} ")?;
    }
    writeln!(writer)?;

    for &width in &widths {
        write!(writer, "{:-<width$} ", "")?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, width) in row.iter().zip(widths.iter().copied()) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
