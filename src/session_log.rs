//! Session log writer.
//!
//! Appends one timestamped line per call to
//! `<memory_dir>/sessions/YYYY-MM-DD.md`:
//!
//! ```text
//! - **14:03:22** [dev] (STORY-003) — Wired the retry loop
//! ```
//!
//! The agent and story parts are optional.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use std::io::Write;
use std::path::PathBuf;

use crate::config::Workspace;
use crate::error::MemoryError;

/// Append `message` to today's session file (local time).
pub fn append(
    ws: &Workspace,
    message: &str,
    agent: Option<&str>,
    story: Option<&str>,
) -> Result<PathBuf> {
    append_at(ws, Local::now().naive_local(), message, agent, story)
}

/// Append `message` to the session file for `now`'s date.
pub fn append_at(
    ws: &Workspace,
    now: NaiveDateTime,
    message: &str,
    agent: Option<&str>,
    story: Option<&str>,
) -> Result<PathBuf> {
    let message = message.trim();
    if message.is_empty() {
        return Err(MemoryError::EmptyLogMessage.into());
    }

    let sessions_dir = ws.sessions_dir();
    std::fs::create_dir_all(&sessions_dir)
        .with_context(|| format!("Failed to create {}", sessions_dir.display()))?;

    let date = now.format("%Y-%m-%d").to_string();
    let path = sessions_dir.join(format!("{}.md", date));
    let is_new = !path.exists();

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    if is_new {
        write!(file, "# Session — {}\n\n", date)?;
    }
    writeln!(file, "{}", format_entry(now, message, agent, story))
        .with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(path)
}

fn format_entry(
    now: NaiveDateTime,
    message: &str,
    agent: Option<&str>,
    story: Option<&str>,
) -> String {
    let mut entry = format!("- **{}**", now.format("%H:%M:%S"));
    if let Some(agent) = agent.filter(|a| !a.is_empty()) {
        entry.push_str(&format!(" [{}]", agent));
    }
    if let Some(story) = story.filter(|s| !s.is_empty()) {
        entry.push_str(&format!(" ({})", story));
    }
    entry.push_str(&format!(" — {}", message));
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_format_entry_variants() {
        assert_eq!(
            format_entry(at(9, 5, 1), "hello", None, None),
            "- **09:05:01** — hello"
        );
        assert_eq!(
            format_entry(at(9, 5, 1), "hello", Some("dev"), Some("STORY-1")),
            "- **09:05:01** [dev] (STORY-1) — hello"
        );
        assert_eq!(
            format_entry(at(9, 5, 1), "hello", None, Some("STORY-2")),
            "- **09:05:01** (STORY-2) — hello"
        );
    }

    #[test]
    fn test_append_creates_file_with_header() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ws = Workspace::new(tmp.path(), Config::default());

        let path = append_at(&ws, at(10, 0, 0), "first", Some("qa"), None).unwrap();
        append_at(&ws, at(10, 0, 5), "second", None, None).unwrap();

        assert_eq!(path, ws.sessions_dir().join("2024-03-09.md"));
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "# Session — 2024-03-09\n\n- **10:00:00** [qa] — first\n- **10:00:05** — second\n"
        );
    }

    #[test]
    fn test_empty_message_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ws = Workspace::new(tmp.path(), Config::default());
        let err = append_at(&ws, at(1, 2, 3), "   ", None, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MemoryError>(),
            Some(MemoryError::EmptyLogMessage)
        ));
        assert!(!ws.sessions_dir().exists());
    }
}
