use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Configuration for spawning a short-lived child process.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub timeout: Option<Duration>,
    pub log_prefix: String,
    pub env: Vec<(String, String)>,
}

impl ProcessConfig {
    pub fn new(command: &str, args: &[&str], working_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            working_dir: working_dir.into(),
            timeout: None,
            log_prefix: command.to_string(),
            env: vec![],
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_log_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.log_prefix = prefix.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Output from a completed child process.
///
/// Both streams are kept byte for byte; invalid UTF-8 becomes U+FFFD.
#[derive(Debug)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.signal.is_none()
    }

    pub fn stdout_lines(&self) -> Vec<&str> {
        self.stdout.lines().collect()
    }

    pub fn stderr_lines(&self) -> Vec<&str> {
        self.stderr.lines().collect()
    }
}

// Drain the whole stream before decoding so a bad byte cannot end the read
// early and leave the child blocked on a full pipe.
async fn read_stream<R: AsyncRead + Unpin>(mut stream: R) -> std::io::Result<String> {
    let mut bytes = Vec::new();
    stream.read_to_end(&mut bytes).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Spawn a child process, collect its output and wait for it.
///
/// The child is placed in its own process group on Unix so a timeout can
/// terminate everything it started.
pub async fn run_process(config: ProcessConfig) -> Result<ProcessOutput> {
    debug!(
        command = %config.command,
        args = ?config.args,
        cwd = %config.working_dir.display(),
        "spawning process"
    );

    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args)
        .current_dir(&config.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    for (key, value) in &config.env {
        cmd.env(key, value);
    }

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::Process(format!("failed to spawn '{}': {e}", config.command)))?;

    let pid = child
        .id()
        .ok_or_else(|| Error::Process("child has no pid".into()))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Process("child stdout not captured".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Process("child stderr not captured".into()))?;

    let prefix_out = config.log_prefix.clone();
    let prefix_err = config.log_prefix;

    let stdout_task = tokio::spawn(async move {
        let text = read_stream(stdout).await;
        if let Ok(ref text) = text {
            for line in text.lines() {
                debug!("[{prefix_out}] {line}");
            }
        }
        text
    });

    let stderr_task = tokio::spawn(async move {
        let text = read_stream(stderr).await;
        if let Ok(ref text) = text {
            for line in text.lines() {
                warn!("[{prefix_err}] {line}");
            }
        }
        text
    });

    let status = if let Some(dur) = config.timeout {
        match tokio::time::timeout(dur, child.wait()).await {
            Ok(r) => r.map_err(|e| Error::Process(format!("wait error: {e}")))?,
            Err(_) => {
                terminate_group(pid).await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(Error::Timeout(format!(
                    "'{}' did not finish within {dur:?}",
                    config.command
                )));
            }
        }
    } else {
        child
            .wait()
            .await
            .map_err(|e| Error::Process(format!("wait error: {e}")))?
    };

    let stdout = stdout_task
        .await
        .map_err(|e| Error::Process(format!("stdout reader failed: {e}")))?
        .map_err(|e| Error::Process(format!("failed to read stdout: {e}")))?;
    let stderr = stderr_task
        .await
        .map_err(|e| Error::Process(format!("stderr reader failed: {e}")))?
        .map_err(|e| Error::Process(format!("failed to read stderr: {e}")))?;

    let (exit_code, signal) = extract_exit_info(&status);

    Ok(ProcessOutput {
        exit_code,
        signal,
        stdout,
        stderr,
    })
}

#[cfg(unix)]
async fn terminate_group(pid: u32) {
    let pgid = pid as i32;
    unsafe {
        libc::killpg(pgid, libc::SIGTERM);
    }
    tokio::time::sleep(Duration::from_millis(500)).await;
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

// kill_on_drop takes care of the child once it goes out of scope.
#[cfg(not(unix))]
async fn terminate_group(_pid: u32) {}

fn extract_exit_info(status: &std::process::ExitStatus) -> (i32, Option<i32>) {
    if let Some(code) = status.code() {
        return (code, None);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return (128 + sig, Some(sig));
        }
    }
    (-1, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_stream_keeps_bytes() {
        let text = read_stream(&b"a\r\n\n  b\r\n"[..]).await.unwrap();
        assert_eq!(text, "a\r\n\n  b\r\n");
    }

    #[tokio::test]
    async fn test_read_stream_replaces_invalid_utf8() {
        let text = read_stream(&b"caf\xe9\nnext\n"[..]).await.unwrap();
        assert_eq!(text, "caf\u{FFFD}\nnext\n");
    }

    #[test]
    fn test_config_builder() {
        let config = ProcessConfig::new("git", &["diff", "--cached"], "/tmp")
            .with_timeout(Some(Duration::from_secs(5)))
            .with_log_prefix("git:diff");
        assert_eq!(config.command, "git");
        assert_eq!(config.args, vec!["diff", "--cached"]);
        assert_eq!(config.timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.log_prefix, "git:diff");
        assert!(config.env.is_empty());

        let config = config.with_env("GIT_LITERAL_PATHSPECS", "1");
        assert_eq!(
            config.env,
            vec![("GIT_LITERAL_PATHSPECS".to_string(), "1".to_string())]
        );
    }
}
