use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::process::{ProcessConfig, run_process};

/// A place to start the upward repository search from, tried in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootAnchor {
    /// The directory containing the file under review.
    FileDirectory(PathBuf),
    /// The project root reported by the host.
    Workspace(PathBuf),
}

impl RootAnchor {
    pub fn path(&self) -> &Path {
        match self {
            RootAnchor::FileDirectory(p) | RootAnchor::Workspace(p) => p,
        }
    }
}

impl fmt::Display for RootAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RootAnchor::FileDirectory(p) => write!(f, "file directory {}", p.display()),
            RootAnchor::Workspace(p) => write!(f, "workspace {}", p.display()),
        }
    }
}

/// The diff comparisons run against a single file, in the order they are run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffQuery {
    Unstaged,
    Staged,
    AllChanges,
}

impl DiffQuery {
    pub const ALL: [DiffQuery; 3] = [DiffQuery::Unstaged, DiffQuery::Staged, DiffQuery::AllChanges];

    /// Git arguments preceding `-- <path>`.
    pub fn git_args(self) -> &'static [&'static str] {
        match self {
            DiffQuery::Unstaged => &["diff"],
            DiffQuery::Staged => &["diff", "--cached"],
            DiffQuery::AllChanges => &["diff", "HEAD"],
        }
    }

    pub fn header(self) -> &'static str {
        match self {
            DiffQuery::Unstaged => "=== Unstaged changes (working tree vs index) ===",
            DiffQuery::Staged => "=== Staged changes (index vs HEAD) ===",
            DiffQuery::AllChanges => "=== All changes (working tree vs HEAD) ===",
        }
    }
}

impl fmt::Display for DiffQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffQuery::Unstaged => write!(f, "unstaged"),
            DiffQuery::Staged => write!(f, "staged"),
            DiffQuery::AllChanges => write!(f, "all"),
        }
    }
}

/// Runs git queries as child processes.
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: String,
    timeout: Option<Duration>,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git", None)
    }
}

impl GitCli {
    pub fn new(binary: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    async fn run(&self, dir: &Path, args: &[&str], prefix: &str) -> Result<String> {
        // Paths are passed as-is; `[id].tsx` must not glob-match `i.tsx`.
        let config = ProcessConfig::new(&self.binary, args, dir)
            .with_timeout(self.timeout)
            .with_log_prefix(prefix)
            .with_env("GIT_LITERAL_PATHSPECS", "1");
        let output = run_process(config).await?;
        if !output.success() {
            return Err(Error::Process(format!(
                "git {} exited with code {}: {}",
                args.join(" "),
                output.exit_code,
                output.stderr.trim()
            )));
        }
        Ok(output.stdout)
    }

    /// True when `dir` carries a `.git` marker that git itself accepts.
    ///
    /// Subdirectories of a work tree pass `rev-parse` too, so the marker check
    /// is what pins the answer to the root.
    pub async fn is_repository_root(&self, dir: &Path) -> bool {
        if !dir.join(".git").exists() {
            return false;
        }
        match self.run(dir, &["rev-parse", "--git-dir"], "git:rev-parse").await {
            Ok(git_dir) => {
                debug!(dir = %dir.display(), git_dir = git_dir.trim(), "repository check succeeded");
                true
            }
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "repository check failed");
                false
            }
        }
    }

    /// Walk upward from `start_dir` and return the first repository root.
    ///
    /// Missing directories are skipped. Returns `None` once the filesystem
    /// root has been checked.
    pub async fn find_repository_root(&self, start_dir: &Path) -> Option<PathBuf> {
        let mut current = start_dir.to_path_buf();
        loop {
            if current.is_dir() && self.is_repository_root(&current).await {
                return Some(current);
            }
            match current.parent() {
                Some(parent) if parent != current => current = parent.to_path_buf(),
                _ => return None,
            }
        }
    }

    /// Try each anchor in order; the first one that leads to a repository wins.
    pub async fn resolve_repository_root(&self, anchors: &[RootAnchor]) -> Result<PathBuf> {
        for anchor in anchors {
            if let Some(root) = self.find_repository_root(anchor.path()).await {
                info!(root = %root.display(), %anchor, "found repository root");
                return Ok(root);
            }
            debug!(%anchor, "no repository above anchor");
        }

        let tried: Vec<String> = anchors.iter().map(|a| a.to_string()).collect();
        Err(Error::NoRepository(if tried.is_empty() {
            "no search anchors".to_string()
        } else {
            format!("searched from {}", tried.join(", "))
        }))
    }

    /// Collect every non-empty diff of `file` against `repo_root`.
    ///
    /// Each query runs on its own; a failing query is logged and skipped, and
    /// output identical to an earlier section is not repeated. Returns `""`
    /// when the file has no changes in any comparison.
    pub async fn collect_diff(&self, repo_root: &Path, file: &Path) -> Result<String> {
        let relative = relative_path(repo_root, file)?;
        let mut collected = String::new();
        let mut seen: Vec<String> = Vec::new();

        for query in DiffQuery::ALL {
            let mut args: Vec<&str> = query.git_args().to_vec();
            args.push("--");
            args.push(&relative);

            match self.run(repo_root, &args, &format!("git:diff:{query}")).await {
                Ok(text) if text.trim().is_empty() => {
                    debug!(%query, path = %relative, "diff query returned nothing");
                }
                // `diff HEAD` repeats `diff` or `diff --cached` verbatim when only
                // one side has changes.
                Ok(text) if seen.contains(&text) => {
                    debug!(%query, path = %relative, "diff query repeats an earlier section");
                }
                Ok(text) => {
                    debug!(%query, path = %relative, bytes = text.len(), "diff query returned changes");
                    collected.push_str(query.header());
                    collected.push('\n');
                    collected.push_str(&text);
                    collected.push('\n');
                    seen.push(text);
                }
                Err(e) => {
                    warn!(%query, path = %relative, error = %e, "diff query failed, skipping");
                }
            }
        }

        Ok(collected)
    }
}

/// Path of `file` relative to `repo_root`, with `/` separators as git expects.
pub fn relative_path(repo_root: &Path, file: &Path) -> Result<String> {
    let root = canonical_or_self(repo_root);
    let file = canonical_file(file);

    let rel = file.strip_prefix(&root).map_err(|_| {
        Error::NoRepository(format!(
            "{} is not inside repository {}",
            file.display(),
            root.display()
        ))
    })?;

    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    if parts.is_empty() {
        return Err(Error::NoRepository(format!(
            "{} is the repository root, not a file",
            file.display()
        )));
    }
    Ok(parts.join("/"))
}

fn canonical_or_self(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

// A deleted file cannot be canonicalized, but its directory usually can.
fn canonical_file(file: &Path) -> PathBuf {
    if let Ok(p) = file.canonicalize() {
        return p;
    }
    match (file.parent(), file.file_name()) {
        (Some(parent), Some(name)) => canonical_or_self(parent).join(name),
        _ => file.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_query_order_is_fixed() {
        assert_eq!(
            DiffQuery::ALL,
            [DiffQuery::Unstaged, DiffQuery::Staged, DiffQuery::AllChanges]
        );
    }

    #[test]
    fn test_query_args() {
        assert_eq!(DiffQuery::Unstaged.git_args(), &["diff"]);
        assert_eq!(DiffQuery::Staged.git_args(), &["diff", "--cached"]);
        assert_eq!(DiffQuery::AllChanges.git_args(), &["diff", "HEAD"]);
    }

    #[test]
    fn test_headers_are_distinct() {
        let headers: Vec<&str> = DiffQuery::ALL.iter().map(|q| q.header()).collect();
        assert!(headers[0].contains("Unstaged"));
        assert!(headers[1].contains("Staged"));
        assert!(headers[2].contains("All changes"));
    }

    #[test]
    fn test_relative_path_nested() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("src").join("ui");
        std::fs::create_dir_all(&nested).unwrap();
        let file = nested.join("app.ts");
        std::fs::write(&file, "x").unwrap();

        assert_eq!(relative_path(dir.path(), &file).unwrap(), "src/ui/app.ts");
    }

    #[test]
    fn test_relative_path_deleted_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("gone.rs");
        assert_eq!(relative_path(dir.path(), &file).unwrap(), "gone.rs");
    }

    #[test]
    fn test_relative_path_outside_root() {
        let root = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let file = other.path().join("a.py");
        std::fs::write(&file, "x").unwrap();

        let err = relative_path(root.path(), &file).unwrap_err();
        assert!(matches!(err, Error::NoRepository(_)));
    }

    #[test]
    fn test_anchor_display() {
        let anchor = RootAnchor::Workspace(PathBuf::from("/w"));
        assert_eq!(anchor.to_string(), "workspace /w");
        assert_eq!(anchor.path(), Path::new("/w"));
    }
}
