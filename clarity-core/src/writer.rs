use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::catalog::ArtifactType;
use crate::error::{ClarityError, Result};

const MAX_NAME_LEN: usize = 100;
const UNTITLED: &str = "untitled";
/// Highest `-NNN` suffix tried before giving up on a timestamped name
const MAX_COLLISIONS: usize = 999;

/// Device names Windows reserves regardless of extension
const RESERVED_STEMS: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Characters that are illegal in file names on at least one major platform
const ILLEGAL_CHARS: &[char] = &['\\', '/', '*', '?', ':', '"', '<', '>', '|'];

/// How the writer avoids clobbering earlier artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NamingMode {
    /// `<title>_<YYYYMMDD-HHMMSS>.md`, with a `-NNN` counter on collision
    #[default]
    Timestamped,
    /// `<title>.md`, replacing any existing file
    Overwrite,
}

/// `# PBI: Title`, `## BUG : Title`, `# technical task: Title`
static LABELED_HEADING_RE: Lazy<Regex> = Lazy::new(|| {
    let labels = ArtifactType::ALL
        .iter()
        .map(|t| regex::escape(t.heading_label()).replace(' ', r"\s+"))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)^#{{1,6}}\s*(?:{labels})\s*:\s*(.*)$"))
        .expect("static heading pattern")
});

static ANY_HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#{1,6}\s+(.+)$").expect("static heading pattern"));

/// Title of the artifact: the labeled first heading if present, otherwise the
/// first heading's text, otherwise `None`.
pub fn extract_title(markdown: &str) -> Option<String> {
    let first_heading = markdown
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with('#'))?;

    if let Some(caps) = LABELED_HEADING_RE.captures(first_heading) {
        return non_empty(caps[1].trim());
    }
    ANY_HEADING_RE
        .captures(first_heading)
        .and_then(|caps| non_empty(caps[1].trim()))
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Filesystem-safe version of `title`. Never empty.
pub fn sanitize_file_name(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !ILLEGAL_CHARS.contains(c) && !c.is_control())
        .collect();

    let mut name = cleaned.split_whitespace().collect::<Vec<_>>().join("_");
    name = name.trim_matches(|c| c == '.' || c == '_').to_string();

    let stem_len = name.find('.').unwrap_or(name.len());
    if RESERVED_STEMS.iter().any(|r| r.eq_ignore_ascii_case(&name[..stem_len])) {
        name.insert(stem_len, '_');
    }

    if name.chars().count() > MAX_NAME_LEN {
        name = name.chars().take(MAX_NAME_LEN).collect();
        name = name.trim_end_matches(|c| c == '.' || c == '_').to_string();
    }

    if name.is_empty() {
        UNTITLED.to_string()
    } else {
        name
    }
}

/// Persists generated artifacts as markdown files
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    output_dir: PathBuf,
    mode: NamingMode,
}

impl ArtifactWriter {
    pub fn new(output_dir: impl Into<PathBuf>, mode: NamingMode) -> Self {
        Self {
            output_dir: output_dir.into(),
            mode,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn mode(&self) -> NamingMode {
        self.mode
    }

    /// Write `markdown` into the output directory and return its path.
    #[instrument(skip(self, markdown), fields(dir = %self.output_dir.display(), mode = ?self.mode))]
    pub fn save(&self, markdown: &str, fallback_title: &str) -> Result<PathBuf> {
        self.save_at(markdown, fallback_title, Local::now())
    }

    fn save_at(&self, markdown: &str, fallback_title: &str, now: DateTime<Local>) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir)
            .map_err(|e| ClarityError::local_io(&self.output_dir, e))?;

        let title = extract_title(markdown).unwrap_or_else(|| fallback_title.to_string());
        let base = sanitize_file_name(&title);
        let path = match self.mode {
            NamingMode::Overwrite => {
                let path = self.output_dir.join(format!("{base}.md"));
                fs::write(&path, markdown).map_err(|e| ClarityError::local_io(&path, e))?;
                path
            }
            NamingMode::Timestamped => self.write_new(&base, now, markdown)?,
        };

        info!(path = %path.display(), title = %title, "artifact saved");
        Ok(path)
    }

    /// Claim the first free `<base>_<stamp>[-NNN].md` with `create_new`, so
    /// concurrent saves never share a file.
    fn write_new(&self, base: &str, now: DateTime<Local>, markdown: &str) -> Result<PathBuf> {
        let stem = format!("{base}_{}", now.format("%Y%m%d-%H%M%S"));
        for counter in 0..=MAX_COLLISIONS {
            let name = if counter == 0 {
                format!("{stem}.md")
            } else {
                format!("{stem}-{counter:03}.md")
            };
            let path = self.output_dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(markdown.as_bytes())
                        .map_err(|e| ClarityError::local_io(&path, e))?;
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(ClarityError::local_io(&path, e)),
            }
        }
        Err(ClarityError::local_io(
            self.output_dir.join(format!("{stem}.md")),
            io::Error::new(ErrorKind::AlreadyExists, "no free file name for this timestamp"),
        ))
    }
}
