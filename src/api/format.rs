//! Plain-text tables for model listings.

use chrono::{DateTime, Datelike, Utc};

use super::types::{PsModel, TagModel};

pub fn format_tags(models: &[TagModel]) -> String {
    let rows: Vec<Vec<String>> = models
        .iter()
        .map(|m| {
            vec![
                m.name.clone(),
                short_digest(&m.digest),
                format_bytes(m.size),
                format_time(m.modified_at.as_ref()),
            ]
        })
        .collect();
    format_table(&["NAME", "ID", "SIZE", "MODIFIED"], &rows)
}

pub fn format_ps(models: &[PsModel]) -> String {
    let rows: Vec<Vec<String>> = models
        .iter()
        .map(|m| {
            vec![
                m.name.clone(),
                short_digest(&m.digest),
                format_bytes(m.size),
                format_time(m.expires_at.as_ref()),
            ]
        })
        .collect();
    format_table(&["NAME", "ID", "SIZE", "UNTIL"], &rows)
}

fn short_digest(digest: &str) -> String {
    digest.trim().chars().take(12).collect()
}

pub fn format_bytes(n: i64) -> String {
    const KB: i64 = 1024;
    const MB: i64 = 1024 * KB;
    const GB: i64 = 1024 * MB;
    const TB: i64 = 1024 * GB;

    let scaled = |unit: i64, suffix: &str| format!("{:.1} {}", n as f64 / unit as f64, suffix);
    match n {
        n if n < 0 => "?".to_string(),
        n if n >= TB => scaled(TB, "TB"),
        n if n >= GB => scaled(GB, "GB"),
        n if n >= MB => scaled(MB, "MB"),
        n if n >= KB => scaled(KB, "KB"),
        n => format!("{} B", n),
    }
}

/// UTC timestamp, or `-` for absent and zero-value times.
fn format_time(time: Option<&DateTime<Utc>>) -> String {
    match time {
        Some(t) if t.year() > 1 => t.format("%Y-%m-%d %H:%M:%SZ").to_string(),
        _ => "-".to_string(),
    }
}

fn format_table(columns: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = columns.iter().map(|c| c.len()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let mut push_row = |cells: &mut dyn Iterator<Item = &str>| {
        let line: Vec<String> = widths
            .iter()
            .map(|w| format!("{:<width$}", cells.next().unwrap_or(""), width = *w))
            .collect();
        out.push_str(&line.join("  "));
        out.push('\n');
    };

    push_row(&mut columns.iter().copied());
    for row in rows {
        push_row(&mut row.iter().map(String::as_str));
    }
    out
}
