//! Session log consolidation.
//!
//! Reads the session logs written since the last consolidation and appends a
//! summary section to `MEMORY.md`, grouped by story. The section header
//! doubles as the marker for the next run:
//!
//! ```text
//! ### Consolidation — 2024-03-10
//!
//! **STORY-003**:
//! - 2024-03-09 14:03:22 [dev] — Wired the retry loop
//!
//! **General**:
//! - 2024-03-09 15:10:00 — Reviewed backlog
//! ```

use anyhow::{Context, Result};
use chrono::NaiveDate;
use regex::Regex;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::Workspace;

/// One parsed session log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub date: String,
    pub time: String,
    pub agent: Option<String>,
    pub story: Option<String>,
    pub message: String,
}

struct Patterns {
    entry: Regex,
    marker: Regex,
}

impl Patterns {
    fn new() -> Result<Self> {
        Ok(Self {
            entry: Regex::new(
                r"^- \*\*(\d{2}:\d{2}:\d{2})\*\*(?:\s*\[([^\]]*)\])?(?:\s*\(([^)]*)\))?\s*—\s*(.+)$",
            )?,
            marker: Regex::new(r"^### Consolidation — (\d{4}-\d{2}-\d{2})")?,
        })
    }

    fn parse_entry(&self, date: &str, line: &str) -> Option<SessionEntry> {
        let caps = self.entry.captures(line.trim())?;
        let group = |i: usize| {
            caps.get(i)
                .map(|m| m.as_str().to_string())
                .filter(|s| !s.is_empty())
        };
        Some(SessionEntry {
            date: date.to_string(),
            time: caps[1].to_string(),
            agent: group(2),
            story: group(3),
            message: caps[4].to_string(),
        })
    }
}

/// Consolidate new session entries into `MEMORY.md`.
///
/// Returns the number of entries written; nothing is written when there are
/// none.
pub fn run(ws: &Workspace, today: NaiveDate, verbose: bool) -> Result<usize> {
    let patterns = Patterns::new()?;
    let memory_path = ws.memory_file();

    let last_date = last_consolidation_date(&patterns, &memory_path)?;
    if verbose {
        eprintln!(
            "Last consolidation: {}",
            last_date.as_deref().unwrap_or("never")
        );
    }

    let session_files = session_files_after(&ws.sessions_dir(), last_date.as_deref())?;
    if session_files.is_empty() {
        if verbose {
            eprintln!("No new session logs to consolidate.");
        }
        return Ok(0);
    }

    let mut entries = Vec::new();
    for (date, path) in &session_files {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let before = entries.len();
        entries.extend(
            content
                .lines()
                .filter_map(|line| patterns.parse_entry(date, line)),
        );
        if verbose {
            eprintln!("  {}.md: {} entries", date, entries.len() - before);
        }
    }

    if entries.is_empty() {
        if verbose {
            eprintln!("No entries found in session files.");
        }
        return Ok(0);
    }

    let section = render_section(today, &entries);
    let needs_newline = std::fs::read_to_string(&memory_path)
        .map(|c| !c.is_empty() && !c.ends_with('\n'))
        .unwrap_or(false);

    std::fs::create_dir_all(ws.memory_dir())?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&memory_path)
        .with_context(|| format!("Failed to open {}", memory_path.display()))?;
    if needs_newline {
        writeln!(file)?;
    }
    file.write_all(section.as_bytes())
        .with_context(|| format!("Failed to write {}", memory_path.display()))?;

    tracing::info!(entries = entries.len(), "consolidated session logs");
    if verbose {
        eprintln!("Consolidated {} entries into MEMORY.md", entries.len());
    }
    Ok(entries.len())
}

/// Render the appended section: stories sorted, untagged entries last.
pub fn render_section(today: NaiveDate, entries: &[SessionEntry]) -> String {
    let mut by_story: BTreeMap<&str, Vec<&SessionEntry>> = BTreeMap::new();
    let mut general = Vec::new();
    for entry in entries {
        match &entry.story {
            Some(story) => by_story.entry(story.as_str()).or_default().push(entry),
            None => general.push(entry),
        }
    }

    let mut lines = vec![
        String::new(),
        format!("### Consolidation — {}", today.format("%Y-%m-%d")),
        String::new(),
    ];

    let groups = by_story
        .into_iter()
        .map(|(story, entries)| (format!("**{}**:", story), entries))
        .chain((!general.is_empty()).then(|| ("**General**:".to_string(), general)));

    for (title, group) in groups {
        lines.push(title);
        for e in group {
            let agent = e
                .agent
                .as_ref()
                .map(|a| format!(" [{}]", a))
                .unwrap_or_default();
            lines.push(format!("- {} {}{} — {}", e.date, e.time, agent, e.message));
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

fn last_consolidation_date(patterns: &Patterns, memory_path: &Path) -> Result<Option<String>> {
    if !memory_path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(memory_path)
        .with_context(|| format!("Failed to read {}", memory_path.display()))?;
    Ok(content
        .lines()
        .filter_map(|line| patterns.marker.captures(line.trim()))
        .map(|caps| caps[1].to_string())
        .last())
}

/// `(date stem, path)` of every session file strictly newer than `after`.
fn session_files_after(sessions_dir: &Path, after: Option<&str>) -> Result<Vec<(String, PathBuf)>> {
    if !sessions_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(sessions_dir)
        .with_context(|| format!("Failed to list {}", sessions_dir.display()))?
    {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };
        if after.is_some_and(|a| stem.as_str() <= a) {
            continue;
        }
        files.push((stem, path));
    }
    files.sort();
    Ok(files)
}
