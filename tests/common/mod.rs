#![allow(dead_code)]

use std::path::Path;
use std::process::Command;

use diffreview::config::Config;

pub fn run_git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} in {} failed: {}",
        args,
        dir.display(),
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Create a repo with one committed file at `rel_path`.
pub fn setup_git_repo(rel_path: &str, content: &str) -> tempfile::TempDir {
    let repo_dir = tempfile::TempDir::new().unwrap();
    run_git(repo_dir.path(), &["init"]);
    run_git(repo_dir.path(), &["config", "user.email", "test@test.com"]);
    run_git(repo_dir.path(), &["config", "user.name", "Test"]);

    let file = repo_dir.path().join(rel_path);
    if let Some(parent) = file.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&file, content).unwrap();
    run_git(repo_dir.path(), &["add", "."]);
    run_git(repo_dir.path(), &["commit", "-m", "init"]);

    repo_dir
}

/// `Config` for tests: no timeouts that could flake, buffer delivery.
pub fn default_test_config() -> Config {
    Config {
        git_timeout: None,
        request_timeout: None,
        automation_timeout: None,
        ..Config::default()
    }
}
