//! Terminal feedback for the clarity CLI
//!
//! Spinners are suppressed when `--quiet` is passed, `CLARITY_QUIET=1` is set,
//! or stderr is not a TTY, so piped output stays clean.

use std::io::IsTerminal;
use std::sync::OnceLock;
use std::time::Duration;

use clarity_core::ClarityError;
use indicatif::{ProgressBar, ProgressStyle};

static QUIET_MODE: OnceLock<bool> = OnceLock::new();

/// Call once at startup with the --quiet flag value.
pub fn init_quiet_mode(quiet_flag: bool) {
    let is_quiet = quiet_flag
        || std::env::var("CLARITY_QUIET").map(|v| v == "1").unwrap_or(false)
        || !std::io::stderr().is_terminal();

    QUIET_MODE.set(is_quiet).ok();
}

pub fn is_quiet() -> bool {
    *QUIET_MODE.get().unwrap_or(&false)
}

/// Spinner on stderr, or None in quiet mode
pub fn spinner(msg: impl Into<String>) -> Option<ProgressBar> {
    if is_quiet() {
        return None;
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
            .template("{spinner:.cyan} {msg}")
            .expect("valid template"),
    );
    pb.set_message(msg.into());
    pb.enable_steady_tick(Duration::from_millis(80));
    Some(pb)
}

fn finish_with(pb: Option<ProgressBar>, msg: String) {
    if let Some(pb) = pb {
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{msg}")
                .expect("valid template"),
        );
        pb.finish_with_message(msg);
    }
}

pub fn finish_success(pb: Option<ProgressBar>, msg: impl Into<String>) {
    finish_with(pb, format!("✓ {}", msg.into()));
}

pub fn finish_error(pb: Option<ProgressBar>, msg: impl Into<String>) {
    finish_with(pb, format!("✗ {}", msg.into()));
}

/// Two-line failure report: the short summary, then the expandable detail.
pub fn failure_lines(error: &ClarityError) -> (String, String) {
    (
        format!("✗ {} [{}]", error.summary(), error.kind()),
        format!("  {}", error.detail()),
    )
}

pub fn report_failure(error: &ClarityError) {
    let (summary, detail) = failure_lines(error);
    eprintln!("{summary}");
    eprintln!("{detail}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_lines_carry_kind_and_detail() {
        let error = ClarityError::client_rejected(404, "model not found");
        let (summary, detail) = failure_lines(&error);
        assert!(summary.starts_with("✗ The model or endpoint was not found"));
        assert!(summary.ends_with("[client-rejected]"));
        assert_eq!(detail, "  HTTP 404: model not found");
    }
}
