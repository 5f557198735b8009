//! Sync progress reporting.
//!
//! Per-file progress is emitted on **stderr** so stdout remains parseable
//! for scripts.

use std::io::Write;

/// A single per-file progress event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncProgressEvent {
    Added { path: String, chunks: usize },
    Updated { path: String, chunks: usize },
    Deleted { path: String },
}

/// Reports sync progress. Called from the synchronizer.
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: `  + Added .forge/memory/MEMORY.md (3 chunks)`.
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = format_event(&event);
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{}", line);
        let _ = stderr.flush();
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

fn format_event(event: &SyncProgressEvent) -> String {
    match event {
        SyncProgressEvent::Added { path, chunks } => {
            format!("  + Added {} ({})", path, plural(*chunks, "chunk"))
        }
        SyncProgressEvent::Updated { path, chunks } => {
            format!("  ~ Updated {} ({})", path, plural(*chunks, "chunk"))
        }
        SyncProgressEvent::Deleted { path } => format!("  - Deleted {}", path),
    }
}

fn plural(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("1 {}", noun)
    } else {
        format!("{} {}s", n, noun)
    }
}

/// Reporter for the CLI: human progress on stderr when verbose, otherwise off.
pub fn reporter(verbose: bool) -> Box<dyn SyncProgressReporter> {
    if verbose {
        Box::new(StderrProgress)
    } else {
        Box::new(NoProgress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_events() {
        assert_eq!(
            format_event(&SyncProgressEvent::Added {
                path: "a.md".into(),
                chunks: 3
            }),
            "  + Added a.md (3 chunks)"
        );
        assert_eq!(
            format_event(&SyncProgressEvent::Updated {
                path: "b.md".into(),
                chunks: 1
            }),
            "  ~ Updated b.md (1 chunk)"
        );
        assert_eq!(
            format_event(&SyncProgressEvent::Deleted { path: "c.md".into() }),
            "  - Deleted c.md"
        );
    }
}
