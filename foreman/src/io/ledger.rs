//! Progress ledger: one file, two resources.
//!
//! The file opens with a mutable `## Patterns` section (curated reusable
//! notes, read-modify-write, last-writer-wins) followed by a `## Log`
//! section holding the append-only event stream. The two have different
//! consistency rules: patterns rewrites go through a temp file + rename,
//! log appends are a single `write_all` of one complete line followed by a
//! data sync. Readers only consume complete lines, and an append heals a
//! partial trailing line (from an interrupted writer) by starting on a
//! fresh line.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::core::types::LedgerEvent;

const PATTERNS_HEADING: &str = "## Patterns";
const LOG_HEADING: &str = "## Log";

/// An immutable record of one lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub timestamp: DateTime<Utc>,
    pub event: LedgerEvent,
    /// Display id of the item the event concerns.
    pub item: String,
    pub detail: String,
}

impl LedgerEntry {
    pub fn now(event: LedgerEvent, item: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
            item: item.into(),
            detail: detail.into(),
        }
    }
}

/// Handle on the ledger file.
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scaffold an empty ledger when the file is missing.
    pub fn ensure_exists(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create ledger dir {}", parent.display()))?;
            }
        }
        fs::write(&self.path, format!("{PATTERNS_HEADING}\n\n{LOG_HEADING}\n"))
            .with_context(|| format!("write ledger {}", self.path.display()))
    }

    /// Append one event as a single complete line, synced to disk.
    pub fn append(&self, entry: &LedgerEntry) -> Result<()> {
        self.ensure_exists()?;

        let timestamp = entry.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);
        let detail = entry.detail.replace('\n', " ");
        let mut line = format!(
            "- [{timestamp}] {} {}: {}\n",
            entry.event.as_str(),
            entry.item,
            detail.trim()
        );

        let contents = fs::read(&self.path)
            .with_context(|| format!("read ledger {}", self.path.display()))?;
        if !contents.is_empty() && contents.last() != Some(&b'\n') {
            line.insert(0, '\n');
        }

        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open ledger {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append ledger {}", self.path.display()))?;
        file.sync_data()
            .with_context(|| format!("sync ledger {}", self.path.display()))?;
        Ok(())
    }

    /// The current patterns text (empty when the section is empty or the
    /// file does not exist yet).
    pub fn patterns(&self) -> Result<String> {
        if !self.path.exists() {
            return Ok(String::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read ledger {}", self.path.display()))?;
        let mut inside = false;
        let mut collected = Vec::new();
        for line in contents.lines() {
            if line.trim() == PATTERNS_HEADING {
                inside = true;
                continue;
            }
            if line.trim() == LOG_HEADING {
                break;
            }
            if inside {
                collected.push(line);
            }
        }
        Ok(collected.join("\n").trim().to_string())
    }

    /// Replace the patterns section, preserving the log. Last writer wins;
    /// the rewrite is atomic (temp file + rename).
    pub fn set_patterns(&self, text: &str) -> Result<()> {
        self.ensure_exists()?;
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read ledger {}", self.path.display()))?;
        let log_part = contents
            .find(LOG_HEADING)
            .map_or_else(|| format!("{LOG_HEADING}\n"), |at| contents[at..].to_string());

        let text = text.trim();
        let rebuilt = if text.is_empty() {
            format!("{PATTERNS_HEADING}\n\n{log_part}")
        } else {
            format!("{PATTERNS_HEADING}\n\n{text}\n\n{log_part}")
        };

        let tmp_path = self.path.with_extension("md.tmp");
        fs::write(&tmp_path, rebuilt)
            .with_context(|| format!("write temp ledger {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("replace ledger {}", self.path.display()))?;
        Ok(())
    }

    /// Complete log lines, oldest first. A trailing partial line (no
    /// newline) is ignored rather than parsed.
    pub fn entries(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read ledger {}", self.path.display()))?;
        let log = match contents.find(LOG_HEADING) {
            Some(at) => &contents[at..],
            None => return Ok(Vec::new()),
        };
        Ok(log
            .split_inclusive('\n')
            .filter(|line| line.ends_with('\n'))
            .map(|line| line.trim_end().to_string())
            .filter(|line| line.starts_with("- "))
            .collect())
    }
}
