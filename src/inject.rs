use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::host::{Host, require_cursor};
use crate::process::{ProcessConfig, run_process};
use crate::prompts::{CommentStyle, SENTINEL};

const BANNER: &str = "==== AI Code Review ====";
const RULE: &str = "========================";

/// True when the review should be treated as "no issues".
///
/// This is a substring match: a reply that carries the sentinel next to
/// other text still counts as clean. It may hide real findings the model
/// wrote alongside the sentinel.
pub fn is_clean_response(response: &str) -> bool {
    response.trim().contains(SENTINEL)
}

/// Wrap the review in a comment block ready to insert into the buffer.
pub fn format_for_buffer(response: &str, style: CommentStyle) -> String {
    let mut lines = vec![style.wrap(BANNER)];
    if is_clean_response(response) {
        lines.push(style.wrap("No critical issues found. Nice work!"));
    } else {
        lines.extend(response.trim().lines().map(|l| style.wrap(l.trim_end())));
    }
    lines.push(style.wrap(RULE));

    let mut block = lines.join("\n");
    block.push('\n');
    block
}

/// Insert a formatted review at the host's cursor.
pub fn insert_into_buffer<H: Host + ?Sized>(
    host: &H,
    response: &str,
    style: CommentStyle,
) -> Result<String> {
    let position = require_cursor(host)?;
    let block = format_for_buffer(response, style);
    host.insert(position, &block)?;
    Ok(block)
}

/// Where the review ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Insert a comment block at the cursor of the active buffer.
    #[default]
    Buffer,
    /// Type the review into another application with OS automation.
    Automation,
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMode::Buffer => write!(f, "buffer"),
            DeliveryMode::Automation => write!(f, "automation"),
        }
    }
}

/// Delivers review text outside the active buffer.
pub trait ExternalDeliveryChannel {
    fn deliver(&self, text: &str) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Escape text for use inside an AppleScript string literal.
///
/// Newlines cannot appear in a literal, so they are spliced in with `return`.
pub fn escape_applescript(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(normalized.len() + 16);
    for c in normalized.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\" & return & \""),
            '\t' => out.push_str("\" & tab & \""),
            _ => out.push(c),
        }
    }
    out
}

/// Build a script that focuses `target_app`, types `text` and presses return.
pub fn build_script(target_app: &str, text: &str, activation_delay: Duration) -> String {
    format!(
        "tell application \"{app}\" to activate\n\
         delay {delay}\n\
         tell application \"System Events\"\n\
         \tkeystroke \"{text}\"\n\
         \tkey code 36\n\
         end tell\n",
        app = escape_applescript(target_app),
        delay = activation_delay.as_secs_f32(),
        text = escape_applescript(text),
    )
}

/// Types text into a running application via `osascript`.
///
/// Best-effort: success only means the interpreter exited cleanly.
#[derive(Debug, Clone)]
pub struct AppleScriptChannel {
    pub interpreter: String,
    pub target_app: String,
    pub activation_delay: Duration,
    pub timeout: Option<Duration>,
    pub script_dir: Option<PathBuf>,
}

impl AppleScriptChannel {
    pub fn new(interpreter: impl Into<String>, target_app: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            target_app: target_app.into(),
            activation_delay: Duration::from_millis(500),
            timeout: None,
            script_dir: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    // The script goes through a file so long reviews are not cut off by
    // argv limits. The file is removed when `script` drops, on every path.
    fn write_script(&self, text: &str) -> Result<tempfile::NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("diffreview-").suffix(".applescript");
        let mut script = match self.script_dir {
            Some(ref dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| Error::Automation(format!("failed to create script file: {e}")))?;

        script
            .write_all(build_script(&self.target_app, text, self.activation_delay).as_bytes())
            .and_then(|_| script.flush())
            .map_err(|e| Error::Automation(format!("failed to write script file: {e}")))?;
        Ok(script)
    }
}

impl ExternalDeliveryChannel for AppleScriptChannel {
    async fn deliver(&self, text: &str) -> Result<()> {
        let script = self.write_script(text)?;
        let script_path = script.path().to_string_lossy().into_owned();
        debug!(script = %script_path, app = %self.target_app, "running automation script");

        let working_dir = std::env::temp_dir();
        let config = ProcessConfig::new(&self.interpreter, &[&script_path], working_dir)
            .with_timeout(self.timeout)
            .with_log_prefix("automation");

        let output = run_process(config).await.map_err(|e| match e {
            Error::Timeout(msg) => Error::Timeout(msg),
            other => Error::Automation(other.to_string()),
        })?;

        if !output.success() {
            return Err(Error::Automation(format!(
                "{} exited with code {}: {}",
                self.interpreter,
                output.exit_code,
                output.stderr.trim()
            )));
        }

        info!(app = %self.target_app, "review typed into target application");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use crate::host::{ActiveDocument, Position};

    struct BufferHost {
        cursor: Option<Position>,
        inserted: RefCell<Vec<(Position, String)>>,
    }

    impl Host for BufferHost {
        fn active_document(&self) -> Option<ActiveDocument> {
            Some(ActiveDocument {
                file_path: PathBuf::from("/tmp/a.ts"),
                workspace_root: None,
            })
        }
        fn cursor(&self) -> Option<Position> {
            self.cursor
        }
        fn insert(&self, position: Position, text: &str) -> Result<()> {
            self.inserted.borrow_mut().push((position, text.to_string()));
            Ok(())
        }
        fn info(&self, _message: &str) {}
        fn error(&self, _message: &str) {}
        fn confirm(&self, _question: &str) -> bool {
            true
        }
        fn show_preview(&self, _text: &str) {}
    }

    #[test]
    fn test_exact_sentinel_is_clean() {
        assert!(is_clean_response(SENTINEL));
        assert!(is_clean_response(&format!("  {SENTINEL}\n")));
    }

    #[test]
    fn test_sentinel_substring_is_also_clean() {
        let reply = format!("1. [Line 3] Bug - check for null\n{SENTINEL}");
        assert!(is_clean_response(&reply));
    }

    #[test]
    fn test_issue_list_is_not_clean() {
        assert!(!is_clean_response("1. [Line 4] Security - escape the input"));
    }

    #[test]
    fn test_clean_wrapper() {
        let block = format_for_buffer(SENTINEL, CommentStyle::Line("//"));
        assert_eq!(
            block,
            "// ==== AI Code Review ====\n// No critical issues found. Nice work!\n// ========================\n"
        );
    }

    #[test]
    fn test_clean_wrapper_for_substring_match_drops_other_lines() {
        let reply = format!("Looks fine overall.\n{SENTINEL}");
        let block = format_for_buffer(&reply, CommentStyle::Line("#"));
        assert!(block.contains("# No critical issues found."));
        assert!(!block.contains("Looks fine overall."));
    }

    #[test]
    fn test_issue_wrapper_prefixes_each_line() {
        let reply = "1. [Line 2] Bug - handle None\n\n2. [Line 9] Perf - avoid clone";
        let block = format_for_buffer(reply, CommentStyle::Line("//"));
        let lines: Vec<&str> = block.lines().collect();
        assert_eq!(lines[1], "// 1. [Line 2] Bug - handle None");
        assert_eq!(lines[2], "//");
        assert_eq!(lines[3], "// 2. [Line 9] Perf - avoid clone");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn test_block_comment_wrapper() {
        let block = format_for_buffer("1. [Line 1] Style - x", CommentStyle::Block("/*", "*/"));
        assert!(block.contains("/* 1. [Line 1] Style - x */"));
    }

    #[test]
    fn test_insert_into_buffer_uses_cursor() {
        let host = BufferHost {
            cursor: Some(Position { line: 4 }),
            inserted: RefCell::new(vec![]),
        };
        let block = insert_into_buffer(&host, SENTINEL, CommentStyle::Line("//")).unwrap();
        let inserted = host.inserted.borrow();
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].0, Position { line: 4 });
        assert_eq!(inserted[0].1, block);
    }

    #[test]
    fn test_insert_without_cursor_fails() {
        let host = BufferHost {
            cursor: None,
            inserted: RefCell::new(vec![]),
        };
        let err = insert_into_buffer(&host, SENTINEL, CommentStyle::Line("//")).unwrap_err();
        assert!(matches!(err, Error::NoActiveTarget));
        assert!(host.inserted.borrow().is_empty());
    }

    #[test]
    fn test_escape_quotes_and_backslashes() {
        assert_eq!(escape_applescript(r#"say "hi" \o/"#), r#"say \"hi\" \\o/"#);
    }

    #[test]
    fn test_escape_newlines() {
        assert_eq!(escape_applescript("a\nb\r\nc"), "a\" & return & \"b\" & return & \"c");
        assert_eq!(escape_applescript("a\tb"), "a\" & tab & \"b");
    }

    #[test]
    fn test_build_script_shape() {
        let script = build_script("Slack", "line \"1\"\nline 2", Duration::from_millis(500));
        assert!(script.starts_with("tell application \"Slack\" to activate\n"));
        assert!(script.contains("delay 0.5\n"));
        assert!(script.contains("keystroke \"line \\\"1\\\"\" & return & \"line 2\""));
        assert!(script.contains("key code 36"));
        assert!(script.ends_with("end tell\n"));
    }

    #[test]
    fn test_rule_matches_banner_width() {
        assert_eq!(RULE.len(), 24);
        assert_eq!(RULE.len(), BANNER.len());
        assert!(RULE.chars().all(|c| c == '='));
    }

    #[test]
    fn test_delivery_mode_display() {
        assert_eq!(DeliveryMode::Buffer.to_string(), "buffer");
        assert_eq!(DeliveryMode::Automation.to_string(), "automation");
        assert_eq!(DeliveryMode::default(), DeliveryMode::Buffer);
    }
}
