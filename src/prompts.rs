use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Error, Result};

const DEFAULT_REVIEW: &str = include_str!("default_prompts/review.md");
const DEFAULT_SYSTEM: &str = include_str!("default_prompts/system.md");

/// Exact reply the model is told to give when it finds nothing to report.
///
/// The injector matches on this text, so it must never be paraphrased.
pub const SENTINEL: &str = "NO_CRITICAL_ISSUES_FOUND";

const REVIEW_TEMPLATE_FILE: &str = "review.md";
const SYSTEM_TEMPLATE_FILE: &str = "system.md";

/// How a language writes a single-line comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentStyle {
    Line(&'static str),
    Block(&'static str, &'static str),
}

impl CommentStyle {
    /// Turn one line of text into a comment line.
    pub fn wrap(self, text: &str) -> String {
        match self {
            CommentStyle::Line(marker) if text.is_empty() => marker.to_string(),
            CommentStyle::Line(marker) => format!("{marker} {text}"),
            CommentStyle::Block(open, close) => format!("{open} {text} {close}"),
        }
    }
}

/// Recognized file types, keyed by extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    TypeScript,
    JavaScript,
    Python,
    Rust,
    Go,
    Java,
    CSharp,
    CFamily,
    Ruby,
    Php,
    Swift,
    Kotlin,
    Shell,
    Sql,
    Html,
    Css,
    /// Anything else; carries the lower-cased extension (possibly empty).
    Other(String),
}

impl FileKind {
    /// Classify a lower-cased extension that includes its leading dot.
    pub fn from_extension(extension: &str) -> Self {
        let ext = extension.to_lowercase();
        match ext.as_str() {
            ".ts" | ".tsx" | ".mts" | ".cts" => FileKind::TypeScript,
            ".js" | ".jsx" | ".mjs" | ".cjs" => FileKind::JavaScript,
            ".py" | ".pyi" => FileKind::Python,
            ".rs" => FileKind::Rust,
            ".go" => FileKind::Go,
            ".java" => FileKind::Java,
            ".cs" => FileKind::CSharp,
            ".c" | ".h" | ".cc" | ".cpp" | ".cxx" | ".hpp" | ".hh" => FileKind::CFamily,
            ".rb" => FileKind::Ruby,
            ".php" => FileKind::Php,
            ".swift" => FileKind::Swift,
            ".kt" | ".kts" => FileKind::Kotlin,
            ".sh" | ".bash" | ".zsh" => FileKind::Shell,
            ".sql" => FileKind::Sql,
            ".html" | ".htm" => FileKind::Html,
            ".css" | ".scss" | ".less" => FileKind::Css,
            _ => FileKind::Other(ext),
        }
    }

    pub fn from_path(path: &Path) -> Self {
        Self::from_extension(&extension_of(path))
    }

    /// One-line review focus for this kind of file.
    pub fn guidance(&self) -> String {
        let text = match self {
            FileKind::TypeScript => {
                "Type safety (avoid `any`, unchecked casts), null/undefined handling, unhandled promise rejections"
            }
            FileKind::JavaScript => {
                "Undefined/null access, loose equality, unhandled promise rejections, prototype pollution"
            }
            FileKind::Python => {
                "Exception handling, mutable default arguments, injection risks, resource cleanup"
            }
            FileKind::Rust => "Panics (unwrap/expect/indexing), unsafe blocks, error propagation, needless clones",
            FileKind::Go => "Ignored errors, goroutine leaks, data races, nil pointer dereferences",
            FileKind::Java => "Null handling, resource leaks (try-with-resources), thread safety, exception swallowing",
            FileKind::CSharp => "Null reference risks, IDisposable usage, async/await misuse, LINQ performance",
            FileKind::CFamily => "Memory safety, buffer overflows, undefined behavior, resource ownership",
            FileKind::Ruby => "Nil handling, injection risks, N+1 queries, exception handling",
            FileKind::Php => "SQL injection, XSS, input validation, type juggling",
            FileKind::Swift => "Force unwrapping, retain cycles, main-thread UI access, error handling",
            FileKind::Kotlin => "Null safety escapes (!!), coroutine scope leaks, resource handling",
            FileKind::Shell => "Unquoted variables, missing error checks (set -e), command injection",
            FileKind::Sql => "Injection risks, missing indexes, unbounded queries, transaction safety",
            FileKind::Html => "Accessibility, XSS vectors, invalid nesting, inline script risks",
            FileKind::Css => "Specificity conflicts, layout breakage, unused or duplicated rules",
            FileKind::Other(ext) if ext.is_empty() => {
                return "General code quality, correctness and security for files without an extension"
                    .to_string();
            }
            FileKind::Other(ext) => {
                return format!("General code quality, correctness and security for {ext} files");
            }
        };
        text.to_string()
    }

    pub fn comment_style(&self) -> CommentStyle {
        match self {
            FileKind::Python | FileKind::Ruby | FileKind::Shell => CommentStyle::Line("#"),
            FileKind::Sql => CommentStyle::Line("--"),
            FileKind::Html => CommentStyle::Block("<!--", "-->"),
            FileKind::Css => CommentStyle::Block("/*", "*/"),
            _ => CommentStyle::Line("//"),
        }
    }
}

/// Lower-cased extension including the leading dot, or `""`.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

#[derive(Serialize)]
struct ReviewVars<'a> {
    file_name: &'a str,
    guidance: &'a str,
    diff: &'a str,
    sentinel: &'a str,
}

#[derive(Serialize)]
struct SystemVars<'a> {
    sentinel: &'a str,
}

/// Review prompt templates with embedded defaults and user overrides.
pub struct PromptEngine {
    override_dir: Option<PathBuf>,
    engine: upon::Engine<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new(None)
    }
}

impl PromptEngine {
    pub fn new(override_dir: Option<PathBuf>) -> Self {
        Self {
            override_dir,
            engine: upon::Engine::new(),
        }
    }

    /// Load a template by file name. An override in `override_dir` wins.
    fn load_template(&self, file_name: &str, default: &'static str) -> Result<String> {
        if let Some(ref dir) = self.override_dir {
            let path = dir.join(file_name);
            if path.exists() {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    Error::Prompt(format!(
                        "failed to read override template {}: {e}",
                        path.display()
                    ))
                })?;
                if !content.contains("sentinel") && !content.contains(SENTINEL) {
                    return Err(Error::Prompt(format!(
                        "override template {} never mentions the no-issues sentinel",
                        path.display()
                    )));
                }
                return Ok(content);
            }
        }
        Ok(default.to_string())
    }

    fn render<S: Serialize>(&self, source: &str, vars: S) -> Result<String> {
        let template = self
            .engine
            .compile(source)
            .map_err(|e| Error::Prompt(format!("invalid template: {e}")))?;
        template
            .render(&self.engine, vars)
            .to_string()
            .map_err(|e| Error::Prompt(format!("failed to render template: {e}")))
    }

    /// Build the user prompt for a file's diff.
    pub fn build_prompt(&self, file_name: &str, file_extension: &str, diff: &str) -> Result<String> {
        let guidance = FileKind::from_extension(file_extension).guidance();
        let source = self.load_template(REVIEW_TEMPLATE_FILE, DEFAULT_REVIEW)?;
        self.render(
            &source,
            ReviewVars {
                file_name,
                guidance: &guidance,
                diff,
                sentinel: SENTINEL,
            },
        )
    }

    /// The fixed system instruction sent alongside every prompt.
    pub fn system_prompt(&self) -> Result<String> {
        let source = self.load_template(SYSTEM_TEMPLATE_FILE, DEFAULT_SYSTEM)?;
        Ok(self
            .render(&source, SystemVars { sentinel: SENTINEL })?
            .trim()
            .to_string())
    }
}

/// Build the review prompt with the embedded template.
pub fn build_prompt(file_name: &str, file_extension: &str, diff: &str) -> Result<String> {
    PromptEngine::default().build_prompt(file_name, file_extension, diff)
}
