use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Error, Result};

/// The document the user is looking at when the command is invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveDocument {
    pub file_path: PathBuf,
    pub workspace_root: Option<PathBuf>,
}

/// Zero-based line in the active buffer where text is inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
}

/// Capabilities the editing application exposes to the review command.
pub trait Host {
    fn active_document(&self) -> Option<ActiveDocument>;

    fn cursor(&self) -> Option<Position>;

    /// Insert `text` before `position.line` in the active buffer.
    fn insert(&self, position: Position, text: &str) -> Result<()>;

    fn info(&self, message: &str);

    fn error(&self, message: &str);

    /// Ask a yes/no question.
    fn confirm(&self, question: &str) -> bool;

    fn show_preview(&self, text: &str);
}

/// Host for terminal use: the buffer is a file on disk, messages go to stderr.
pub struct TerminalHost {
    file_path: PathBuf,
    workspace_root: Option<PathBuf>,
    line: Option<usize>,
    assume_yes: bool,
}

impl TerminalHost {
    pub fn new(file_path: PathBuf, workspace_root: Option<PathBuf>) -> Self {
        Self {
            file_path,
            workspace_root,
            line: None,
            assume_yes: false,
        }
    }

    /// Set the cursor from a one-based line number, as editors show it.
    pub fn with_line(mut self, line: Option<usize>) -> Self {
        self.line = line.map(|l| l.saturating_sub(1));
        self
    }

    pub fn with_assume_yes(mut self, assume_yes: bool) -> Self {
        self.assume_yes = assume_yes;
        self
    }

    fn absolute_path(&self) -> PathBuf {
        absolutize(&self.file_path)
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

impl Host for TerminalHost {
    fn active_document(&self) -> Option<ActiveDocument> {
        let file_path = self.absolute_path();
        if !file_path.is_file() {
            return None;
        }
        Some(ActiveDocument {
            file_path,
            workspace_root: self.workspace_root.as_deref().map(absolutize),
        })
    }

    fn cursor(&self) -> Option<Position> {
        self.line.map(|line| Position { line })
    }

    fn insert(&self, position: Position, text: &str) -> Result<()> {
        let path = self.absolute_path();
        let content = std::fs::read_to_string(&path)?;
        let updated = insert_at_line(&content, position.line, text);
        std::fs::write(&path, updated)?;
        info!(path = %path.display(), line = position.line + 1, "inserted review");
        Ok(())
    }

    fn info(&self, message: &str) {
        eprintln!("[diffreview] {message}");
    }

    fn error(&self, message: &str) {
        eprintln!("[diffreview] error: {message}");
    }

    fn confirm(&self, question: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        eprint!("[diffreview] {question} [y/N] ");
        let _ = std::io::stderr().flush();
        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }

    fn show_preview(&self, text: &str) {
        println!("{text}");
    }
}

/// Insert `text` so that it starts on zero-based `line`; past the end appends.
pub fn insert_at_line(content: &str, line: usize, text: &str) -> String {
    let mut offset = 0;
    for (idx, l) in content.split_inclusive('\n').enumerate() {
        if idx == line {
            break;
        }
        offset += l.len();
    }

    let mut out = String::with_capacity(content.len() + text.len() + 1);
    out.push_str(&content[..offset]);
    if offset == content.len() && !content.is_empty() && !content.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(text);
    out.push_str(&content[offset..]);
    out
}

/// Cursor of the active buffer, or `NoActiveTarget` when there is none.
pub fn require_cursor<H: Host + ?Sized>(host: &H) -> Result<Position> {
    host.cursor().ok_or(Error::NoActiveTarget)
}
